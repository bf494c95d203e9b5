//! Ready-to-use entidb instance: backends, decorator pipeline and metadata
//! catalog wired from [`entidb_core::EntidbConfig`].

pub mod data_service;
pub mod telemetry;

pub use data_service::{DataService, MEMORY_BACKEND, SQLITE_BACKEND};
pub use telemetry::init_tracing;
