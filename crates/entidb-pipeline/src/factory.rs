//! Builds the decorated repository for an entity type.
//!
//! The pipeline is the data in [`PIPELINE`], outermost stage first. Stages
//! that do not apply to an entity type are skipped, so e.g. a type without
//! reference attributes never pays for reference resolution.

use std::fmt;
use std::sync::{Arc, Weak};

use tracing::debug;

use entidb_core::{is_catalog_type, EntityType, Repository, RepositoryCapability, RepositoryProvider};

use crate::decorator::{DecoratedRepository, RepositoryDecorator};
use crate::decorators::{
    AutoValueDecorator, ChangeLogBuffer, ChangeLogDecorator, ChangeNotificationDecorator,
    ComputedValueDecorator, CustomDecoratorRegistry, ExceptionTranslationDecorator,
    MetadataPermissionDecorator, OwnershipDecorator, PermissionDecorator,
    ReferenceResolutionDecorator, TransactionCacheDecorator,
};
use crate::listeners::EntityListeners;
use crate::security::PermissionService;
use crate::tx_cache::TransactionEntityCache;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecoratorStage {
    Custom,
    Ownership,
    ReferenceResolution,
    ComputedValues,
    ChangeNotification,
    ChangeLog,
    ExceptionTranslation,
    Permission,
    MetadataPermission,
    AutoValue,
    TransactionCache,
}

/// Stage order, outermost first. Permission checks sit above auto-value
/// generation so a rejected write has no side effects.
pub const PIPELINE: [DecoratorStage; 11] = [
    DecoratorStage::Custom,
    DecoratorStage::Ownership,
    DecoratorStage::ReferenceResolution,
    DecoratorStage::ComputedValues,
    DecoratorStage::ChangeNotification,
    DecoratorStage::ChangeLog,
    DecoratorStage::ExceptionTranslation,
    DecoratorStage::Permission,
    DecoratorStage::MetadataPermission,
    DecoratorStage::AutoValue,
    DecoratorStage::TransactionCache,
];

impl DecoratorStage {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Custom => "custom",
            Self::Ownership => "ownership",
            Self::ReferenceResolution => "reference-resolution",
            Self::ComputedValues => "computed",
            Self::ChangeNotification => "change-notification",
            Self::ChangeLog => "change-log",
            Self::ExceptionTranslation => "exception-translation",
            Self::Permission => "permission",
            Self::MetadataPermission => "metadata-permission",
            Self::AutoValue => "auto-value",
            Self::TransactionCache => "transaction-cache",
        }
    }
}

impl fmt::Display for DecoratorStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Composes the decorator pipeline around raw repositories.
pub struct RepositoryDecoratorFactory {
    permissions: Arc<dyn PermissionService>,
    listeners: Arc<EntityListeners>,
    change_log: Option<Arc<ChangeLogBuffer>>,
    cache: Option<Arc<TransactionEntityCache>>,
    custom: Arc<CustomDecoratorRegistry>,
}

impl RepositoryDecoratorFactory {
    pub fn new(permissions: Arc<dyn PermissionService>) -> Self {
        Self {
            permissions,
            listeners: Arc::new(EntityListeners::new()),
            change_log: None,
            cache: None,
            custom: Arc::new(CustomDecoratorRegistry::new()),
        }
    }

    #[must_use]
    pub fn with_listeners(mut self, listeners: Arc<EntityListeners>) -> Self {
        self.listeners = listeners;
        self
    }

    #[must_use]
    pub fn with_change_log(mut self, buffer: Arc<ChangeLogBuffer>) -> Self {
        self.change_log = Some(buffer);
        self
    }

    #[must_use]
    pub fn with_cache(mut self, cache: Arc<TransactionEntityCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    #[must_use]
    pub fn with_custom_decorators(mut self, custom: Arc<CustomDecoratorRegistry>) -> Self {
        self.custom = custom;
        self
    }

    #[must_use]
    pub fn permissions(&self) -> &Arc<dyn PermissionService> {
        &self.permissions
    }

    #[must_use]
    pub fn listeners(&self) -> &Arc<EntityListeners> {
        &self.listeners
    }

    /// The transaction cache, when caching is enabled.
    #[must_use]
    pub fn cache(&self) -> Option<&Arc<TransactionEntityCache>> {
        self.cache.as_ref()
    }

    #[must_use]
    pub fn custom_decorators(&self) -> &Arc<CustomDecoratorRegistry> {
        &self.custom
    }

    fn applies(&self, stage: DecoratorStage, repository: &dyn Repository) -> bool {
        let entity_type: &EntityType = repository.entity_type();
        match stage {
            DecoratorStage::Custom => !self.custom.decorators_for(&entity_type.name).is_empty(),
            DecoratorStage::Ownership => entity_type.is_owned(),
            DecoratorStage::ReferenceResolution => !entity_type.reference_attributes().is_empty(),
            DecoratorStage::ComputedValues => !entity_type.computed_attributes().is_empty(),
            DecoratorStage::ChangeNotification | DecoratorStage::ExceptionTranslation => true,
            DecoratorStage::ChangeLog => self.change_log.is_some(),
            DecoratorStage::Permission => !is_catalog_type(&entity_type.name),
            DecoratorStage::MetadataPermission => is_catalog_type(&entity_type.name),
            DecoratorStage::AutoValue => entity_type
                .atomic_attributes()
                .iter()
                .any(|a| a.auto || a.default_value.is_some()),
            DecoratorStage::TransactionCache => {
                self.cache.is_some()
                    && repository
                        .capabilities()
                        .contains(RepositoryCapability::Cacheable)
            }
        }
    }

    /// Stages that apply to `repository`, outermost first.
    #[must_use]
    pub fn applicable_stages(&self, repository: &dyn Repository) -> Vec<DecoratorStage> {
        PIPELINE
            .iter()
            .copied()
            .filter(|stage| self.applies(*stage, repository))
            .collect()
    }

    fn decorators(
        &self,
        stage: DecoratorStage,
        entity_type: &EntityType,
        provider: &Weak<dyn RepositoryProvider>,
    ) -> Vec<Arc<dyn RepositoryDecorator>> {
        let single: Arc<dyn RepositoryDecorator> = match stage {
            DecoratorStage::Custom => return self.custom.decorators_for(&entity_type.name),
            DecoratorStage::Ownership => Arc::new(OwnershipDecorator),
            DecoratorStage::ReferenceResolution => {
                Arc::new(ReferenceResolutionDecorator::new(provider.clone()))
            }
            DecoratorStage::ComputedValues => Arc::new(ComputedValueDecorator),
            DecoratorStage::ChangeNotification => {
                Arc::new(ChangeNotificationDecorator::new(self.listeners.clone()))
            }
            DecoratorStage::ChangeLog => match &self.change_log {
                Some(buffer) => Arc::new(ChangeLogDecorator::new(buffer.clone())),
                None => return Vec::new(),
            },
            DecoratorStage::ExceptionTranslation => Arc::new(ExceptionTranslationDecorator),
            DecoratorStage::Permission => Arc::new(PermissionDecorator::new(self.permissions.clone())),
            DecoratorStage::MetadataPermission => {
                Arc::new(MetadataPermissionDecorator::new(self.permissions.clone()))
            }
            DecoratorStage::AutoValue => Arc::new(AutoValueDecorator),
            DecoratorStage::TransactionCache => match &self.cache {
                Some(cache) => Arc::new(TransactionCacheDecorator::new(cache.clone())),
                None => return Vec::new(),
            },
        };
        vec![single]
    }

    /// Wraps `repository` in every applicable stage.
    pub fn create_decorated_repository(
        &self,
        repository: Arc<dyn Repository>,
        provider: Weak<dyn RepositoryProvider>,
    ) -> Arc<dyn Repository> {
        let entity_type = repository.entity_type().clone();
        let stages = self.applicable_stages(repository.as_ref());
        let mut decorated = repository;
        for stage in stages.iter().rev() {
            for decorator in self.decorators(*stage, &entity_type, &provider).into_iter().rev() {
                decorated = Arc::new(DecoratedRepository::new(decorator, decorated));
            }
        }
        debug!(
            "Decorated {} with [{}]",
            entity_type.name,
            stages
                .iter()
                .map(DecoratorStage::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        );
        decorated
    }
}
