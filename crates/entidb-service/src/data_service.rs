//! Wiring of backends, pipeline and metadata from an [`EntidbConfig`].

use std::future::Future;
use std::sync::Arc;

use prometheus::{Encoder, TextEncoder};
use tracing::info;

use entidb_core::{
    CoreError, CoreResult, EntidbConfig, MemoryChangeLog, Repository, RepositoryCollection,
    SearchIndex, TransactionManager,
};
use entidb_metadata::{MetaDataService, SystemEntityTypeRegistry};
use entidb_pipeline::{
    ChangeLogBuffer, CustomDecoratorRegistry, EntityListeners, EntityTypeIndex,
    GrantPermissionService, RepositoryCollectionRegistry, RepositoryDecoratorFactory,
    TransactionEntityCache,
};
use entidb_storage::{
    IndexedRepositoryCollection, MemoryRepositoryCollection, MemorySearchIndex,
    SqliteRepositoryCollection,
};

pub const MEMORY_BACKEND: &str = "memory";
pub const SQLITE_BACKEND: &str = "sqlite";

/// A bootstrapped entidb instance.
pub struct DataService {
    config: EntidbConfig,
    registry: Arc<RepositoryCollectionRegistry>,
    metadata: Arc<MetaDataService>,
    transactions: Arc<TransactionManager>,
    permissions: Arc<GrantPermissionService>,
    listeners: Arc<EntityListeners>,
    custom_decorators: Arc<CustomDecoratorRegistry>,
    change_log: Arc<MemoryChangeLog>,
    search: Option<Arc<MemorySearchIndex>>,
}

impl DataService {
    /// Opens the configured backends and bootstraps the catalog.
    pub async fn open(config: EntidbConfig) -> CoreResult<Self> {
        config
            .validate()
            .map_err(|err| CoreError::validation(err.to_string()))?;

        let search = config
            .search
            .enabled
            .then(|| Arc::new(MemorySearchIndex::new()));
        let mut backends: Vec<Arc<dyn RepositoryCollection>> =
            vec![Arc::new(MemoryRepositoryCollection::new(MEMORY_BACKEND))];
        if config.storage.sqlite.enabled {
            let sqlite = SqliteRepositoryCollection::connect(
                SQLITE_BACKEND,
                &config.storage.sqlite.url,
                config.storage.sqlite.max_connections,
            )
            .await?;
            backends.push(Arc::new(sqlite));
        }
        if let Some(index) = &search {
            let index: Arc<dyn SearchIndex> = index.clone();
            backends = backends
                .into_iter()
                .map(|inner| {
                    Arc::new(IndexedRepositoryCollection::new(inner, index.clone()))
                        as Arc<dyn RepositoryCollection>
                })
                .collect();
        }
        let default_backend = config.storage.default_backend.clone();
        if !backends.iter().any(|b| b.name() == default_backend) {
            return Err(CoreError::invalid_state(format!(
                "default backend `{default_backend}` is not configured"
            )));
        }

        let transactions = Arc::new(TransactionManager::new());
        let permissions = Arc::new(GrantPermissionService::new());
        let listeners = Arc::new(EntityListeners::new());
        let custom_decorators = Arc::new(CustomDecoratorRegistry::new());
        let change_log = Arc::new(MemoryChangeLog::new());

        let mut factory = RepositoryDecoratorFactory::new(permissions.clone())
            .with_listeners(listeners.clone())
            .with_custom_decorators(custom_decorators.clone());
        if config.pipeline.change_log_enabled {
            let buffer = Arc::new(ChangeLogBuffer::new(change_log.clone()));
            transactions.add_listener(buffer.clone());
            factory = factory.with_change_log(buffer);
        }
        if config.cache.enabled {
            let cache = Arc::new(TransactionEntityCache::new(
                config.cache.max_entries_per_transaction,
            ));
            transactions.add_listener(cache.clone());
            factory = factory.with_cache(cache);
        }

        let registry = RepositoryCollectionRegistry::new(
            default_backend.clone(),
            Arc::new(EntityTypeIndex::new()),
            factory,
        );
        for backend in backends {
            registry.add_collection(backend);
        }

        let system_types = SystemEntityTypeRegistry::with_builtins(default_backend.clone())?;
        let metadata = Arc::new(MetaDataService::new(
            registry.clone(),
            Arc::new(system_types),
            transactions.clone(),
        ));
        metadata.bootstrap().await?;
        info!(
            "entidb ready: backends [{}], default `{}`, {} entity types",
            registry
                .collections()
                .iter()
                .map(|b| b.name().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            default_backend,
            registry.entity_types().len()
        );

        Ok(Self {
            config,
            registry,
            metadata,
            transactions,
            permissions,
            listeners,
            custom_decorators,
            change_log,
            search,
        })
    }

    /// Loads the configuration from its usual sources and opens the service.
    pub async fn from_env() -> CoreResult<Self> {
        let config = EntidbConfig::load().map_err(|err| CoreError::validation(err.to_string()))?;
        Self::open(config).await
    }

    #[must_use]
    pub fn config(&self) -> &EntidbConfig {
        &self.config
    }

    #[must_use]
    pub fn metadata(&self) -> &Arc<MetaDataService> {
        &self.metadata
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<RepositoryCollectionRegistry> {
        &self.registry
    }

    /// Decorated repository of a registered entity type.
    pub fn repository(&self, entity_type: &str) -> CoreResult<Arc<dyn Repository>> {
        self.registry.get_repository(entity_type)
    }

    /// Runs `work` in a transaction; nested calls join the outer one.
    pub async fn transaction<T, F>(&self, work: F) -> CoreResult<T>
    where
        F: Future<Output = CoreResult<T>>,
    {
        self.transactions.run(work).await
    }

    #[must_use]
    pub fn permissions(&self) -> &Arc<GrantPermissionService> {
        &self.permissions
    }

    #[must_use]
    pub fn listeners(&self) -> &Arc<EntityListeners> {
        &self.listeners
    }

    #[must_use]
    pub fn custom_decorators(&self) -> &Arc<CustomDecoratorRegistry> {
        &self.custom_decorators
    }

    #[must_use]
    pub fn change_log(&self) -> &Arc<MemoryChangeLog> {
        &self.change_log
    }

    /// The search index, when mirroring is enabled.
    #[must_use]
    pub fn search_index(&self) -> Option<&Arc<MemorySearchIndex>> {
        self.search.as_ref()
    }

    /// Prometheus text exposition of every registered metric.
    pub fn metrics_text(&self) -> CoreResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&prometheus::gather(), &mut buffer)
            .map_err(|err| CoreError::internal(format!("failed to encode metrics: {err}")))?;
        String::from_utf8(buffer)
            .map_err(|err| CoreError::internal(format!("metrics are not utf-8: {err}")))
    }
}
