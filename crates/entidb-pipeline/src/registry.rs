//! Backend registry and decorated repository lookup.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::info;

use entidb_core::{
    CoreError, CoreResult, EntityType, Repository, RepositoryCollection, RepositoryProvider,
};

use crate::entity_types::EntityTypeIndex;
use crate::factory::RepositoryDecoratorFactory;

/// Routes entity types to their backend and hands out decorated repositories.
///
/// The registry is its own [`RepositoryProvider`]: decorators that need other
/// repositories (reference resolution) hold a weak handle back to it.
pub struct RepositoryCollectionRegistry {
    collections: RwLock<BTreeMap<String, Arc<dyn RepositoryCollection>>>,
    default_backend: String,
    entity_types: Arc<EntityTypeIndex>,
    factory: RepositoryDecoratorFactory,
    this: Weak<RepositoryCollectionRegistry>,
}

impl RepositoryCollectionRegistry {
    pub fn new(
        default_backend: impl Into<String>,
        entity_types: Arc<EntityTypeIndex>,
        factory: RepositoryDecoratorFactory,
    ) -> Arc<Self> {
        let default_backend = default_backend.into();
        Arc::new_cyclic(|this| Self {
            collections: RwLock::new(BTreeMap::new()),
            default_backend,
            entity_types,
            factory,
            this: this.clone(),
        })
    }

    pub fn add_collection(&self, collection: Arc<dyn RepositoryCollection>) {
        info!("Registered backend {}", collection.name());
        self.collections
            .write()
            .insert(collection.name().to_string(), collection);
    }

    pub fn collection(&self, name: &str) -> CoreResult<Arc<dyn RepositoryCollection>> {
        self.collections
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::not_found("backend", name))
    }

    #[must_use]
    pub fn has_collection(&self, name: &str) -> bool {
        self.collections.read().contains_key(name)
    }

    #[must_use]
    pub fn collections(&self) -> Vec<Arc<dyn RepositoryCollection>> {
        self.collections.read().values().cloned().collect()
    }

    #[must_use]
    pub fn default_backend(&self) -> &str {
        &self.default_backend
    }

    /// Backend that stores `entity_type`.
    pub fn backend_for(&self, entity_type: &EntityType) -> CoreResult<Arc<dyn RepositoryCollection>> {
        self.collection(&entity_type.backend)
    }

    #[must_use]
    pub fn entity_types(&self) -> &Arc<EntityTypeIndex> {
        &self.entity_types
    }

    #[must_use]
    pub fn factory(&self) -> &RepositoryDecoratorFactory {
        &self.factory
    }

    /// Whether `name` is a registered type with storage in its backend.
    #[must_use]
    pub fn has_repository(&self, name: &str) -> bool {
        let Some(entity_type) = self.entity_types.get(name) else {
            return false;
        };
        self.backend_for(&entity_type)
            .map(|backend| backend.has_repository(name))
            .unwrap_or(false)
    }

    /// Decorated repository for the registered entity type `name`.
    pub fn get_repository(&self, name: &str) -> CoreResult<Arc<dyn Repository>> {
        let entity_type = self.entity_types.require(name)?;
        let raw = self.backend_for(&entity_type)?.get_repository(&entity_type)?;
        Ok(self.decorate(raw))
    }

    /// Undecorated repository for `name`, for internal maintenance work.
    pub fn get_raw_repository(&self, name: &str) -> CoreResult<Arc<dyn Repository>> {
        let entity_type = self.entity_types.require(name)?;
        self.backend_for(&entity_type)?.get_repository(&entity_type)
    }

    pub fn decorate(&self, repository: Arc<dyn Repository>) -> Arc<dyn Repository> {
        let provider: Weak<dyn RepositoryProvider> = self.this.clone();
        self.factory.create_decorated_repository(repository, provider)
    }
}

impl RepositoryProvider for RepositoryCollectionRegistry {
    fn repository(&self, entity_type: &str) -> CoreResult<Arc<dyn Repository>> {
        self.get_repository(entity_type)
    }
}
