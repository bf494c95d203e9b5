//! Change logging.
//!
//! Entries recorded inside a transaction are held in a per-transaction buffer
//! and only reach the sink when the transaction commits; a rollback discards
//! them. Outside a transaction entries are written straight away.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use entidb_core::{
    current_transaction, ChangeLogEntry, ChangeLogSink, ChangeOperation, CoreResult, Entity,
    Principal, Repository, TransactionId, TransactionListener, Value,
};

use crate::decorator::RepositoryDecorator;

pub struct ChangeLogBuffer {
    sink: Arc<dyn ChangeLogSink>,
    pending: Mutex<HashMap<TransactionId, Vec<ChangeLogEntry>>>,
}

impl ChangeLogBuffer {
    pub fn new(sink: Arc<dyn ChangeLogSink>) -> Self {
        Self {
            sink,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn record(&self, entries: Vec<ChangeLogEntry>) {
        if entries.is_empty() {
            return;
        }
        match current_transaction() {
            Some(transaction) => self
                .pending
                .lock()
                .entry(transaction)
                .or_default()
                .extend(entries),
            None => self.sink.write(entries),
        }
    }

    /// Entries waiting for `transaction` to commit.
    #[must_use]
    pub fn pending(&self, transaction: TransactionId) -> usize {
        self.pending.lock().get(&transaction).map_or(0, Vec::len)
    }
}

impl TransactionListener for ChangeLogBuffer {
    fn after_commit(&self, transaction: TransactionId) {
        let entries = self.pending.lock().remove(&transaction);
        if let Some(entries) = entries {
            debug!("Flushing {} change log entries of {}", entries.len(), transaction);
            self.sink.write(entries);
        }
    }

    fn after_rollback(&self, transaction: TransactionId) {
        if let Some(entries) = self.pending.lock().remove(&transaction) {
            debug!("Discarding {} change log entries of {}", entries.len(), transaction);
        }
    }
}

pub struct ChangeLogDecorator {
    buffer: Arc<ChangeLogBuffer>,
}

impl ChangeLogDecorator {
    pub fn new(buffer: Arc<ChangeLogBuffer>) -> Self {
        Self { buffer }
    }

    fn entry(next: &dyn Repository, operation: ChangeOperation) -> ChangeLogEntry {
        ChangeLogEntry::new(
            current_transaction(),
            Principal::current().username,
            operation,
            next.name(),
        )
    }

    fn row_entries(
        next: &dyn Repository,
        operation: ChangeOperation,
        entities: &[Entity],
    ) -> Vec<ChangeLogEntry> {
        entities
            .iter()
            .map(|entity| {
                let entry = Self::entry(next, operation).with_snapshot(entity.to_json());
                match entity.id().and_then(Value::key) {
                    Some(key) => entry.with_entity_id(key),
                    None => entry,
                }
            })
            .collect()
    }
}

#[async_trait]
impl RepositoryDecorator for ChangeLogDecorator {
    fn name(&self) -> &'static str {
        "change-log"
    }

    async fn add_all(&self, next: &dyn Repository, entities: &mut [Entity]) -> CoreResult<u64> {
        let added = next.add_all(entities).await?;
        self.buffer
            .record(Self::row_entries(next, ChangeOperation::Add, entities));
        Ok(added)
    }

    async fn update_all(&self, next: &dyn Repository, entities: &mut [Entity]) -> CoreResult<()> {
        next.update_all(entities).await?;
        self.buffer
            .record(Self::row_entries(next, ChangeOperation::Update, entities));
        Ok(())
    }

    async fn delete_all_by_id(&self, next: &dyn Repository, ids: &[Value]) -> CoreResult<()> {
        next.delete_all_by_id(ids).await?;
        let entries = ids
            .iter()
            .map(|id| {
                let entry = Self::entry(next, ChangeOperation::Delete);
                match id.key() {
                    Some(key) => entry.with_entity_id(key),
                    None => entry,
                }
            })
            .collect();
        self.buffer.record(entries);
        Ok(())
    }

    async fn delete_all(&self, next: &dyn Repository) -> CoreResult<()> {
        next.delete_all().await?;
        self.buffer
            .record(vec![Self::entry(next, ChangeOperation::DeleteAll)]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entidb_core::{CoreError, MemoryChangeLog, TransactionManager};

    fn entry() -> ChangeLogEntry {
        ChangeLogEntry::new(current_transaction(), "admin", ChangeOperation::Add, "demo")
    }

    #[tokio::test]
    async fn commit_flushes_and_rollback_discards() {
        let log = Arc::new(MemoryChangeLog::new());
        let buffer = Arc::new(ChangeLogBuffer::new(log.clone()));
        let manager = TransactionManager::new();
        manager.add_listener(buffer.clone());

        manager
            .run(async {
                buffer.record(vec![entry()]);
                let transaction = current_transaction().expect("transaction");
                assert_eq!(buffer.pending(transaction), 1);
                assert!(log.is_empty());
                Ok::<_, CoreError>(())
            })
            .await
            .expect("commit");
        assert_eq!(log.len(), 1);

        let _ = manager
            .run(async {
                buffer.record(vec![entry()]);
                Err::<(), _>(CoreError::internal("abort"))
            })
            .await;
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn without_a_transaction_entries_are_written_at_once() {
        let log = Arc::new(MemoryChangeLog::new());
        let buffer = ChangeLogBuffer::new(log.clone());
        buffer.record(vec![entry()]);
        assert_eq!(log.len(), 1);
    }
}
