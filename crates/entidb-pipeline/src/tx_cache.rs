//! Entity cache scoped to a single transaction.
//!
//! Every transaction gets its own bounded LRU map keyed by
//! `(entity type name, id key)`. The map is created when the transaction starts
//! and dropped when it commits or rolls back, so entries never leak between
//! transactions. Outside a transaction the cache stores nothing.

use std::collections::HashMap;
use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use entidb_core::metrics::CACHE_LOOKUPS;
use entidb_core::{current_transaction, Entity, TransactionId, TransactionListener};

type CacheKey = (String, String);

/// Default number of entities kept per transaction.
pub const DEFAULT_MAX_ENTRIES: usize = 1000;

pub struct TransactionEntityCache {
    capacity: NonZeroUsize,
    caches: Mutex<HashMap<TransactionId, LruCache<CacheKey, Entity>>>,
}

impl TransactionEntityCache {
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Self {
            capacity: NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN),
            caches: Mutex::new(HashMap::new()),
        }
    }

    /// Cached copy of the row, when the current transaction has one.
    pub fn get(&self, entity_type: &str, id_key: &str) -> Option<Entity> {
        let transaction = current_transaction()?;
        let mut caches = self.caches.lock();
        let cache = caches.get_mut(&transaction)?;
        let hit = cache
            .get(&(entity_type.to_string(), id_key.to_string()))
            .cloned();
        let result = if hit.is_some() { "hit" } else { "miss" };
        CACHE_LOOKUPS.with_label_values(&[entity_type, result]).inc();
        hit
    }

    /// Stores a dehydrated copy of `entity` in the current transaction.
    pub fn put(&self, entity: &Entity) {
        let Some(transaction) = current_transaction() else {
            return;
        };
        let Ok(key) = entity.id_key() else {
            return;
        };
        let mut caches = self.caches.lock();
        if let Some(cache) = caches.get_mut(&transaction) {
            cache.put(
                (entity.entity_type_name().to_string(), key),
                entity.dehydrated(),
            );
        }
    }

    pub fn evict(&self, entity_type: &str, id_key: &str) {
        let Some(transaction) = current_transaction() else {
            return;
        };
        if let Some(cache) = self.caches.lock().get_mut(&transaction) {
            cache.pop(&(entity_type.to_string(), id_key.to_string()));
        }
    }

    /// Drops every cached row of `entity_type` in the current transaction.
    pub fn evict_all(&self, entity_type: &str) {
        let Some(transaction) = current_transaction() else {
            return;
        };
        if let Some(cache) = self.caches.lock().get_mut(&transaction) {
            let stale: Vec<CacheKey> = cache
                .iter()
                .filter(|((name, _), _)| name == entity_type)
                .map(|(key, _)| key.clone())
                .collect();
            for key in stale {
                cache.pop(&key);
            }
        }
    }

    /// Number of entries held for `transaction`.
    #[must_use]
    pub fn len(&self, transaction: TransactionId) -> usize {
        self.caches
            .lock()
            .get(&transaction)
            .map_or(0, LruCache::len)
    }

    /// Number of transactions with a live cache.
    #[must_use]
    pub fn active_transactions(&self) -> usize {
        self.caches.lock().len()
    }

    fn drop_transaction(&self, transaction: TransactionId) {
        if let Some(cache) = self.caches.lock().remove(&transaction) {
            debug!(
                "Dropped transaction cache {} with {} entries",
                transaction,
                cache.len()
            );
        }
    }
}

impl Default for TransactionEntityCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl TransactionListener for TransactionEntityCache {
    fn transaction_started(&self, transaction: TransactionId) {
        self.caches
            .lock()
            .insert(transaction, LruCache::new(self.capacity));
    }

    fn after_commit(&self, transaction: TransactionId) {
        self.drop_transaction(transaction);
    }

    fn after_rollback(&self, transaction: TransactionId) {
        self.drop_transaction(transaction);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use entidb_core::{Attribute, CoreError, DataType, EntityType, TransactionManager};

    fn row(id: &str) -> Entity {
        let entity_type = Arc::new(
            EntityType::new("demo")
                .with_id_attribute(Attribute::new("id", DataType::String).required()),
        );
        Entity::new(entity_type).with("id", id)
    }

    fn setup(capacity: usize) -> (TransactionManager, Arc<TransactionEntityCache>) {
        let manager = TransactionManager::new();
        let cache = Arc::new(TransactionEntityCache::new(capacity));
        manager.add_listener(cache.clone());
        (manager, cache)
    }

    #[tokio::test]
    async fn entries_live_only_inside_their_transaction() {
        let (manager, cache) = setup(10);
        let first = manager
            .run(async {
                cache.put(&row("a"));
                assert!(cache.get("demo", "a").is_some());
                Ok::<_, CoreError>(current_transaction())
            })
            .await
            .expect("t1");
        let first = first.expect("transaction id");
        assert_eq!(cache.len(first), 0);
        assert_eq!(cache.active_transactions(), 0);

        manager
            .run(async {
                assert!(cache.get("demo", "a").is_none());
                Ok::<_, CoreError>(())
            })
            .await
            .expect("t2");
    }

    #[tokio::test]
    async fn outside_a_transaction_nothing_is_cached() {
        let cache = TransactionEntityCache::default();
        cache.put(&row("a"));
        assert!(cache.get("demo", "a").is_none());
        assert_eq!(cache.active_transactions(), 0);
    }

    #[tokio::test]
    async fn capacity_bounds_each_transaction() {
        let (manager, cache) = setup(2);
        manager
            .run(async {
                cache.put(&row("a"));
                cache.put(&row("b"));
                cache.put(&row("c"));
                assert!(cache.get("demo", "a").is_none());
                assert!(cache.get("demo", "c").is_some());
                Ok::<_, CoreError>(())
            })
            .await
            .expect("run");
    }

    #[tokio::test]
    async fn eviction_by_key_and_by_type() {
        let (manager, cache) = setup(10);
        manager
            .run(async {
                cache.put(&row("a"));
                cache.put(&row("b"));
                cache.evict("demo", "a");
                assert!(cache.get("demo", "a").is_none());
                assert!(cache.get("demo", "b").is_some());
                cache.evict_all("demo");
                assert!(cache.get("demo", "b").is_none());
                Ok::<_, CoreError>(())
            })
            .await
            .expect("run");
    }

    #[tokio::test]
    async fn rollback_drops_the_cache() {
        let (manager, cache) = setup(10);
        let result: Result<(), CoreError> = manager
            .run(async {
                cache.put(&row("a"));
                Err(CoreError::internal("boom"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(cache.active_transactions(), 0);
    }
}
