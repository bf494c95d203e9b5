//! Configuration management for entidb
//!
//! Sources, lowest precedence first:
//! - hardcoded defaults
//! - the file named by `ENTIDB_CONFIG`
//! - `./config/entidb.{yaml,toml,json}`
//! - `ENTIDB__`-prefixed environment variables

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root configuration structure for entidb
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct EntidbConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EntidbConfig {
    /// Load configuration from defaults, files and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        builder = Self::set_defaults(builder)?;

        if let Ok(config_path) = std::env::var("ENTIDB_CONFIG") {
            builder = builder.add_source(File::with_name(&config_path).required(false));
        }

        builder = builder.add_source(File::with_name("./config/entidb").required(false));

        // Example: ENTIDB__CACHE__MAX_ENTRIES_PER_TRANSACTION=5000
        builder = builder.add_source(
            Environment::with_prefix("ENTIDB")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: EntidbConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn set_defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        builder
            // Storage
            .set_default("storage.default_backend", "memory")?
            .set_default("storage.sqlite.enabled", false)?
            .set_default("storage.sqlite.url", "sqlite://entidb.db")?
            .set_default("storage.sqlite.max_connections", 5)?
            // Cache
            .set_default("cache.enabled", true)?
            .set_default("cache.max_entries_per_transaction", 1000)?
            // Pipeline
            .set_default("pipeline.change_log_enabled", true)?
            // Search
            .set_default("search.enabled", false)?
            // Logging
            .set_default("logging.filter", "info")?
            .set_default("logging.format", "pretty")
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.default_backend.trim().is_empty() {
            return Err(ConfigError::Message(
                "storage.default_backend must not be empty".to_string(),
            ));
        }

        if self.storage.default_backend == "sqlite" && !self.storage.sqlite.enabled {
            return Err(ConfigError::Message(
                "storage.default_backend is sqlite but storage.sqlite.enabled is false".to_string(),
            ));
        }

        if self.storage.sqlite.enabled && self.storage.sqlite.max_connections == 0 {
            return Err(ConfigError::Message(
                "storage.sqlite.max_connections must be > 0".to_string(),
            ));
        }

        if self.cache.enabled && self.cache.max_entries_per_transaction == 0 {
            return Err(ConfigError::Message(
                "cache.max_entries_per_transaction must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Load configuration from a specific file path
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: EntidbConfig = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}

/// Storage backend configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Backend holding the catalog and types that do not name one
    pub default_backend: String,

    #[serde(default)]
    pub sqlite: SqliteConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            default_backend: "memory".to_string(),
            sqlite: SqliteConfig::default(),
        }
    }
}

/// SQLite backend configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SqliteConfig {
    pub enabled: bool,

    /// Connection URL, e.g. `sqlite://entidb.db`
    pub url: String,

    pub max_connections: u32,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "sqlite://entidb.db".to_string(),
            max_connections: 5,
        }
    }
}

/// Transaction entity cache configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    pub enabled: bool,

    /// LRU capacity of each transaction's cache
    pub max_entries_per_transaction: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries_per_transaction: 1000,
        }
    }
}

/// Decorator pipeline configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    pub change_log_enabled: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            change_log_enabled: true,
        }
    }
}

/// Search index mirroring configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct SearchConfig {
    pub enabled: bool,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Tracing subscriber configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,

    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}
