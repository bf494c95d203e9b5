//! The decorators composed by [`RepositoryDecoratorFactory`](crate::RepositoryDecoratorFactory).

mod auto_value;
mod cache;
mod changelog;
mod computed;
mod custom;
mod listener;
mod metadata_permission;
mod owned;
mod permission;
mod reference;
mod translation;

pub use auto_value::AutoValueDecorator;
pub use cache::TransactionCacheDecorator;
pub use changelog::{ChangeLogBuffer, ChangeLogDecorator};
pub use computed::ComputedValueDecorator;
pub use custom::CustomDecoratorRegistry;
pub use listener::ChangeNotificationDecorator;
pub use metadata_permission::{MetadataPermissionDecorator, ATTRIBUTE_OWNER_REFERENCE};
pub use owned::OwnershipDecorator;
pub use permission::PermissionDecorator;
pub use reference::ReferenceResolutionDecorator;
pub use translation::{translate, ExceptionTranslationDecorator};
