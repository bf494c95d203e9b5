//! Core domain types and traits for the entidb data-access layer.

pub mod attribute;
pub mod audit;
pub mod config;
pub mod data_type;
pub mod entity;
pub mod entity_type;
pub mod error;
pub mod ids;
pub mod metrics;
pub mod package;
pub mod query;
pub mod security;
pub mod tag;
pub mod traits;
pub mod transaction;
pub mod value;

pub use attribute::{Attribute, Range};
pub use audit::{ChangeLogEntry, ChangeLogSink, ChangeOperation, MemoryChangeLog};
pub use config::EntidbConfig;
pub use data_type::DataType;
pub use entity::Entity;
pub use entity_type::{
    is_catalog_type, validate_name, EntityType, ATTRIBUTE_ENTITY_TYPE, CATALOG_ENTITY_TYPES,
    DEFAULT_BACKEND, ENTITY_TYPE_ENTITY_TYPE, OWNED_ENTITY_TYPE, OWNER_ATTRIBUTE,
    PACKAGE_ENTITY_TYPE, TAG_ENTITY_TYPE,
};
pub use error::{BackendErrorCode, BackendFailure, CoreError, CoreResult};
pub use ids::{AttributeId, ChangeLogId, TransactionId};
pub use package::{Package, PackageTree};
pub use query::{Direction, Fetch, Query, QueryRule, Sort};
pub use security::{current_principal, run_as, Permission, Principal};
pub use tag::Tag;
pub use traits::{
    Capabilities, CollectionCapabilities, CollectionCapability, Repository, RepositoryCapabilities,
    RepositoryCapability, RepositoryCollection, RepositoryProvider, SearchIndex,
};
pub use transaction::{current_transaction, TransactionListener, TransactionManager};
pub use value::Value;
