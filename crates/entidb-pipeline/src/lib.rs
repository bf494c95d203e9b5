//! Repository decorator pipeline for entidb.
//!
//! Raw repositories from a backend are wrapped in the stages listed in
//! [`PIPELINE`]: ownership filtering, reference resolution, computed values,
//! change notification and logging, error translation, permission checks,
//! auto values and the transaction cache.

pub mod decorator;
pub mod decorators;
pub mod entity_types;
pub mod expression;
pub mod factory;
pub mod listeners;
pub mod registry;
pub mod security;
pub mod tx_cache;

pub use decorator::{DecoratedRepository, RepositoryDecorator};
pub use decorators::{ChangeLogBuffer, CustomDecoratorRegistry};
pub use entity_types::EntityTypeIndex;
pub use factory::{DecoratorStage, RepositoryDecoratorFactory, PIPELINE};
pub use listeners::{EntityEvent, EntityListener, EntityListeners};
pub use registry::RepositoryCollectionRegistry;
pub use security::{GrantPermissionService, PermissionService, ANY_TARGET};
pub use tx_cache::TransactionEntityCache;
