//! Storage backends for entidb: in-memory, SQLite, and search-index mirroring.

pub mod indexed;
pub mod memory;
pub mod search;
pub mod sqlite;

pub use indexed::{IndexedRepository, IndexedRepositoryCollection};
pub use memory::{MemoryRepository, MemoryRepositoryCollection};
pub use search::MemorySearchIndex;
pub use sqlite::{create_sqlite_pool, SqliteRepository, SqliteRepositoryCollection};
