//! Relational backend on SQLite.
//!
//! Each entity type is a table and each persistent attribute a column. Unique
//! attributes are enforced by `<table>.<column>.uniq` indexes so they can be
//! dropped together with their column.

mod error;
mod repository;
mod sql;

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use entidb_core::{
    Attribute, CollectionCapabilities, CollectionCapability, CoreError, CoreResult, EntityType,
    Repository, RepositoryCollection, Value,
};

pub use repository::SqliteRepository;

use error::map_sqlx_error;
use sql::{bind_all, SqlArg};

/// Creates a SQLite connection pool configured for entity storage.
pub async fn create_sqlite_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<SqlitePool, sqlx::Error> {
    let options = database_url
        .parse::<SqliteConnectOptions>()?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true);

    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
}

/// Backend storing every entity type in its own SQLite table.
pub struct SqliteRepositoryCollection {
    name: String,
    pool: SqlitePool,
    tables: RwLock<BTreeSet<String>>,
}

impl SqliteRepositoryCollection {
    /// Opens the backend on `pool`, picking up tables created earlier.
    pub async fn open(name: impl Into<String>, pool: SqlitePool) -> CoreResult<Self> {
        let name = name.into();
        let rows = sqlx::query(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
        )
        .fetch_all(&pool)
        .await
        .map_err(|err| map_sqlx_error(&name, err))?;
        let tables = rows
            .iter()
            .map(|row| row.try_get::<String, _>("name"))
            .collect::<Result<BTreeSet<_>, _>>()
            .map_err(|err| map_sqlx_error(&name, err))?;
        info!("Opened sqlite backend `{}` with {} tables", name, tables.len());
        Ok(Self {
            name,
            pool,
            tables: RwLock::new(tables),
        })
    }

    /// Creates a pool for `database_url` and opens the backend on it.
    pub async fn connect(
        name: impl Into<String>,
        database_url: &str,
        max_connections: u32,
    ) -> CoreResult<Self> {
        let name = name.into();
        let pool = create_sqlite_pool(database_url, max_connections)
            .await
            .map_err(|err| map_sqlx_error(&name, err))?;
        Self::open(name, pool).await
    }

    /// Returns the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn execute(&self, statement: &str, args: Vec<SqlArg>) -> CoreResult<()> {
        debug!("sqlite `{}`: {}", self.name, statement);
        bind_all(sqlx::query(statement), args)
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|err| map_sqlx_error(&self.name, err))
    }

    /// Runs DDL statements in one transaction; none of them persist on failure.
    async fn execute_atomically(&self, statements: &[String]) -> CoreResult<()> {
        let map = |err: sqlx::Error| map_sqlx_error(&self.name, err);
        let mut tx = self.pool.begin().await.map_err(map)?;
        for statement in statements {
            debug!("sqlite `{}`: {}", self.name, statement);
            sqlx::query(statement).execute(&mut *tx).await.map_err(map)?;
        }
        tx.commit().await.map_err(map)
    }

    fn require_table(&self, entity_type: &EntityType) -> CoreResult<()> {
        if self.has_repository(&entity_type.name) {
            Ok(())
        } else {
            Err(CoreError::unknown_entity_type(&entity_type.name))
        }
    }

    fn repository(&self, entity_type: &Arc<EntityType>) -> Arc<dyn Repository> {
        Arc::new(SqliteRepository::new(
            self.name.clone(),
            entity_type.clone(),
            self.pool.clone(),
        ))
    }
}

#[async_trait]
impl RepositoryCollection for SqliteRepositoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> CollectionCapabilities {
        CollectionCapabilities::of(&[
            CollectionCapability::Writable,
            CollectionCapability::Updatable,
            CollectionCapability::Manageable,
        ])
    }

    fn entity_type_names(&self) -> Vec<String> {
        self.tables.read().iter().cloned().collect()
    }

    fn has_repository(&self, name: &str) -> bool {
        self.tables.read().contains(name)
    }

    fn get_repository(&self, entity_type: &Arc<EntityType>) -> CoreResult<Arc<dyn Repository>> {
        self.require_table(entity_type)?;
        Ok(self.repository(entity_type))
    }

    async fn create_repository(
        &self,
        entity_type: &Arc<EntityType>,
    ) -> CoreResult<Arc<dyn Repository>> {
        if self.has_repository(&entity_type.name) {
            return Err(CoreError::already_exists("repository", &entity_type.name));
        }
        let mut statements = vec![sql::create_table(entity_type)];
        statements.extend(
            sql::unique_columns(entity_type)
                .into_iter()
                .map(|attribute| sql::create_unique_index(&entity_type.name, &attribute.name)),
        );
        self.execute_atomically(&statements).await?;
        self.tables.write().insert(entity_type.name.clone());
        info!("Created sqlite table {}", entity_type.name);
        Ok(self.repository(entity_type))
    }

    async fn delete_repository(&self, entity_type: &EntityType) -> CoreResult<()> {
        self.require_table(entity_type)?;
        let statement = format!("DROP TABLE IF EXISTS {}", sql::quote(&entity_type.name));
        self.execute(&statement, Vec::new()).await?;
        self.tables.write().remove(&entity_type.name);
        info!("Dropped sqlite table {}", entity_type.name);
        Ok(())
    }

    async fn add_attribute(&self, entity_type: &EntityType, attribute: &Attribute) -> CoreResult<()> {
        self.require_table(entity_type)?;
        if !attribute.is_persistent() {
            return Ok(());
        }
        self.execute(&sql::add_column(&entity_type.name, attribute), Vec::new())
            .await?;
        if let Some(default) = attribute.default_value.as_deref() {
            let value = Value::parse(default, attribute.data_type)?;
            let statement = format!(
                "UPDATE {} SET {} = ?",
                sql::quote(&entity_type.name),
                sql::quote(&attribute.name)
            );
            self.execute(&statement, vec![sql::encode(attribute, &value)?])
                .await?;
        }
        if attribute.unique {
            self.execute(
                &sql::create_unique_index(&entity_type.name, &attribute.name),
                Vec::new(),
            )
            .await?;
        }
        debug!("Added column {}.{}", entity_type.name, attribute.name);
        Ok(())
    }

    async fn delete_attribute(
        &self,
        entity_type: &EntityType,
        attribute: &Attribute,
    ) -> CoreResult<()> {
        self.require_table(entity_type)?;
        if !attribute.is_persistent() {
            return Ok(());
        }
        // SQLite refuses to drop an indexed column.
        self.execute(
            &sql::drop_unique_index(&entity_type.name, &attribute.name),
            Vec::new(),
        )
        .await?;
        self.execute(&sql::drop_column(&entity_type.name, &attribute.name), Vec::new())
            .await?;
        debug!("Dropped column {}.{}", entity_type.name, attribute.name);
        Ok(())
    }
}
