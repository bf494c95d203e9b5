//! Metadata catalog and schema orchestration for entidb.
//!
//! Entity types, attributes, packages and tags are stored as rows of four
//! system entity types (`sys_md_*`) in the default backend. The
//! [`MetaDataService`] keeps those rows, the physical storage and the
//! in-process type index consistent.

pub mod catalog;
pub mod dependency;
pub mod diff;
pub mod service;
pub mod system;

pub use dependency::{dependency_order, sort_entity_types, DependencyNode};
pub use diff::EntityTypeDiff;
pub use service::{MetaDataService, ReconcileReport};
pub use system::{
    owned_entity_type, SystemEntityTypeConstructor, SystemEntityTypeRegistry,
    SystemEntityTypeRegistryBuilder, METADATA_PACKAGE, SECURITY_PACKAGE, SYSTEM_PACKAGE,
};
