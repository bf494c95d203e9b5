//! Transaction boundaries and lifecycle listeners.
//!
//! The active transaction is carried in a task-local, so every repository call
//! awaited inside [`TransactionManager::run`] sees the same [`TransactionId`].
//! Listeners receive `transaction_started` once and then exactly one of
//! `after_commit` / `after_rollback`, including when the work future is
//! cancelled or panics.

use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::CoreResult;
use crate::ids::TransactionId;

tokio::task_local! {
    static CURRENT_TRANSACTION: TransactionId;
}

/// Transaction of the calling task, if one is active.
#[must_use]
pub fn current_transaction() -> Option<TransactionId> {
    CURRENT_TRANSACTION.try_with(|id| *id).ok()
}

/// Callbacks for the transaction lifecycle.
pub trait TransactionListener: Send + Sync {
    fn transaction_started(&self, _id: TransactionId) {}

    fn after_commit(&self, _id: TransactionId) {}

    fn after_rollback(&self, _id: TransactionId) {}
}

/// Opens transaction scopes and notifies registered listeners.
#[derive(Default)]
pub struct TransactionManager {
    listeners: RwLock<Vec<Arc<dyn TransactionListener>>>,
}

impl TransactionManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn TransactionListener>) {
        self.listeners.write().push(listener);
    }

    /// Runs `work` inside a transaction. Commits on `Ok`, rolls back on `Err`.
    ///
    /// A call made while a transaction is already active joins it instead of
    /// opening a nested one.
    pub async fn run<F, T>(&self, work: F) -> CoreResult<T>
    where
        F: Future<Output = CoreResult<T>>,
    {
        if current_transaction().is_some() {
            return work.await;
        }

        let guard = self.begin();
        let result = CURRENT_TRANSACTION.scope(guard.id, work).await;
        match &result {
            Ok(_) => guard.commit(),
            Err(err) => {
                debug!("Rolling back transaction {}: {}", guard.id, err);
                guard.rollback();
            }
        }
        result
    }

    fn begin(&self) -> TransactionGuard {
        let id = TransactionId::new();
        // Listeners registered after this point are not part of this transaction.
        let listeners = self.listeners.read().clone();
        for listener in &listeners {
            listener.transaction_started(id);
        }
        debug!("Started transaction {}", id);
        TransactionGuard {
            id,
            listeners,
            finished: false,
        }
    }
}

struct TransactionGuard {
    id: TransactionId,
    listeners: Vec<Arc<dyn TransactionListener>>,
    finished: bool,
}

impl TransactionGuard {
    fn commit(mut self) {
        self.finished = true;
        for listener in &self.listeners {
            listener.after_commit(self.id);
        }
        debug!("Committed transaction {}", self.id);
    }

    fn rollback(mut self) {
        self.finished = true;
        for listener in &self.listeners {
            listener.after_rollback(self.id);
        }
    }
}

impl Drop for TransactionGuard {
    fn drop(&mut self) {
        if !self.finished {
            warn!("Transaction {} abandoned, rolling back", self.id);
            for listener in &self.listeners {
                listener.after_rollback(self.id);
            }
        }
    }
}
