use std::sync::Arc;

use async_trait::async_trait;

use entidb_core::{CoreResult, Entity, Fetch, Repository, Value};

use crate::decorator::RepositoryDecorator;
use crate::tx_cache::TransactionEntityCache;

/// Serves `find_one_by_id` from the transaction cache and evicts rows before
/// any write reaches the backend.
pub struct TransactionCacheDecorator {
    cache: Arc<TransactionEntityCache>,
}

impl TransactionCacheDecorator {
    pub fn new(cache: Arc<TransactionEntityCache>) -> Self {
        Self { cache }
    }

    fn evict_rows(&self, next: &dyn Repository, entities: &[Entity]) {
        for entity in entities {
            if let Ok(key) = entity.id_key() {
                self.cache.evict(next.name(), &key);
            }
        }
    }
}

#[async_trait]
impl RepositoryDecorator for TransactionCacheDecorator {
    fn name(&self) -> &'static str {
        "transaction-cache"
    }

    async fn find_one_by_id(
        &self,
        next: &dyn Repository,
        id: &Value,
        fetch: Fetch,
    ) -> CoreResult<Option<Entity>> {
        if let Some(key) = id.key() {
            if let Some(mut hit) = self.cache.get(next.name(), &key) {
                hit.rebind(next.entity_type().clone());
                return Ok(Some(hit));
            }
        }
        let row = next.find_one_by_id(id, fetch).await?;
        if let Some(row) = &row {
            self.cache.put(row);
        }
        Ok(row)
    }

    async fn add_all(&self, next: &dyn Repository, entities: &mut [Entity]) -> CoreResult<u64> {
        self.evict_rows(next, entities);
        next.add_all(entities).await
    }

    async fn update_all(&self, next: &dyn Repository, entities: &mut [Entity]) -> CoreResult<()> {
        self.evict_rows(next, entities);
        next.update_all(entities).await
    }

    async fn delete_all_by_id(&self, next: &dyn Repository, ids: &[Value]) -> CoreResult<()> {
        for key in ids.iter().filter_map(Value::key) {
            self.cache.evict(next.name(), &key);
        }
        next.delete_all_by_id(ids).await
    }

    async fn delete_all(&self, next: &dyn Repository) -> CoreResult<()> {
        self.cache.evict_all(next.name());
        next.delete_all().await
    }
}
