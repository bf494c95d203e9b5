use std::sync::Arc;

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use entidb_core::{
    CoreError, CoreResult, Entity, EntityType, Fetch, Query, Repository, RepositoryCapabilities,
    RepositoryCapability, Value,
};

use super::error::map_sqlx_error;
use super::sql::{self, bind_all, SqlArg};

/// Handle on one SQLite table.
pub struct SqliteRepository {
    backend: String,
    entity_type: Arc<EntityType>,
    pool: SqlitePool,
}

impl SqliteRepository {
    pub(crate) fn new(backend: String, entity_type: Arc<EntityType>, pool: SqlitePool) -> Self {
        Self {
            backend,
            entity_type,
            pool,
        }
    }

    fn map_err(&self, err: sqlx::Error) -> CoreError {
        map_sqlx_error(&self.backend, err)
    }

    fn entity_from_row(&self, row: &SqliteRow) -> CoreResult<Entity> {
        let mut entity = Entity::new(self.entity_type.clone());
        for attribute in self.entity_type.persistent_attributes() {
            let value = sql::decode(row, attribute).map_err(|err| self.map_err(err))?;
            if !value.is_null() {
                entity.set(attribute.name.clone(), value);
            }
        }
        Ok(entity)
    }

    /// Column parameters of `entity` in `persistent_attributes` order.
    fn row_args(&self, entity: &Entity) -> CoreResult<Vec<SqlArg>> {
        self.entity_type
            .persistent_attributes()
            .into_iter()
            .map(|attribute| sql::encode(attribute, entity.get(&attribute.name)))
            .collect()
    }

    fn id_of(&self, entity: &Entity) -> CoreResult<Value> {
        entity.id().cloned().ok_or_else(|| {
            CoreError::validation(format!(
                "entity of type `{}` has no id value",
                self.entity_type.name
            ))
        })
    }

    fn missing(&self, id: &Value) -> CoreError {
        CoreError::not_found("entity", format!("{}/{id}", self.entity_type.name))
    }
}

#[async_trait]
impl Repository for SqliteRepository {
    fn entity_type(&self) -> &Arc<EntityType> {
        &self.entity_type
    }

    fn capabilities(&self) -> RepositoryCapabilities {
        RepositoryCapabilities::of(&[
            RepositoryCapability::Queryable,
            RepositoryCapability::Writable,
            RepositoryCapability::Manageable,
            RepositoryCapability::Cacheable,
        ])
    }

    async fn count(&self, query: &Query) -> CoreResult<u64> {
        let (statement, args) = sql::count(&self.entity_type, query)?;
        let row = bind_all(sqlx::query(&statement), args)
            .fetch_one(&self.pool)
            .await
            .map_err(|err| self.map_err(err))?;
        let count: i64 = row.try_get("n").map_err(|err| self.map_err(err))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn find_all(&self, query: &Query) -> CoreResult<Vec<Entity>> {
        let (statement, args) = sql::select(&self.entity_type, query)?;
        let rows = bind_all(sqlx::query(&statement), args)
            .fetch_all(&self.pool)
            .await
            .map_err(|err| self.map_err(err))?;
        rows.iter().map(|row| self.entity_from_row(row)).collect()
    }

    async fn find_one_by_id(&self, id: &Value, _fetch: Fetch) -> CoreResult<Option<Entity>> {
        let statement = sql::select_by_id(&self.entity_type)?;
        let row = bind_all(sqlx::query(&statement), vec![sql::id_arg(id)?])
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| self.map_err(err))?;
        row.as_ref().map(|row| self.entity_from_row(row)).transpose()
    }

    async fn add_all(&self, entities: &mut [Entity]) -> CoreResult<u64> {
        let statement = sql::insert(&self.entity_type);
        let mut tx = self.pool.begin().await.map_err(|err| self.map_err(err))?;
        let mut added = 0;
        for entity in entities.iter() {
            let args = self.row_args(entity)?;
            let result = bind_all(sqlx::query(&statement), args)
                .execute(&mut *tx)
                .await
                .map_err(|err| self.map_err(err))?;
            added += result.rows_affected();
        }
        tx.commit().await.map_err(|err| self.map_err(err))?;
        Ok(added)
    }

    async fn update_all(&self, entities: &mut [Entity]) -> CoreResult<()> {
        let statement = sql::update(&self.entity_type)?;
        let id_name = self.entity_type.require_id_attribute()?.name.clone();
        let mut tx = self.pool.begin().await.map_err(|err| self.map_err(err))?;
        for entity in entities.iter() {
            let id = self.id_of(entity)?;
            let mut args = Vec::new();
            for attribute in self.entity_type.persistent_attributes() {
                if attribute.name != id_name {
                    args.push(sql::encode(attribute, entity.get(&attribute.name))?);
                }
            }
            args.push(sql::id_arg(&id)?);
            let result = bind_all(sqlx::query(&statement), args)
                .execute(&mut *tx)
                .await
                .map_err(|err| self.map_err(err))?;
            if result.rows_affected() == 0 {
                return Err(self.missing(&id));
            }
        }
        tx.commit().await.map_err(|err| self.map_err(err))
    }

    async fn delete_all_by_id(&self, ids: &[Value]) -> CoreResult<()> {
        let statement = sql::delete_by_id(&self.entity_type)?;
        let mut tx = self.pool.begin().await.map_err(|err| self.map_err(err))?;
        for id in ids {
            let result = bind_all(sqlx::query(&statement), vec![sql::id_arg(id)?])
                .execute(&mut *tx)
                .await
                .map_err(|err| self.map_err(err))?;
            if result.rows_affected() == 0 {
                return Err(self.missing(id));
            }
        }
        tx.commit().await.map_err(|err| self.map_err(err))
    }

    async fn delete_all(&self) -> CoreResult<()> {
        let statement = format!("DELETE FROM {}", sql::quote(&self.entity_type.name));
        sqlx::query(&statement)
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|err| self.map_err(err))
    }
}
