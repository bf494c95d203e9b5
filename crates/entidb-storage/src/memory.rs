//! In-memory storage backend.
//!
//! Rows are kept per entity type as `id key -> attribute values`. Queries are
//! evaluated in process with [`Query::apply`]. Constraint violations are
//! reported as [`BackendFailure`]s, the same way a relational backend reports
//! them, so the pipeline's translation layer treats both alike.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use entidb_core::{
    Attribute, BackendErrorCode, BackendFailure, CollectionCapabilities, CollectionCapability,
    CoreError, CoreResult, Entity, EntityType, Fetch, Query, Repository, RepositoryCapabilities,
    RepositoryCapability, RepositoryCollection, Value,
};

type Row = BTreeMap<String, Value>;
type Table = BTreeMap<String, Row>;
type Tables = Arc<RwLock<HashMap<String, Table>>>;

/// Backend keeping every table in process memory.
pub struct MemoryRepositoryCollection {
    name: String,
    capabilities: CollectionCapabilities,
    tables: Tables,
}

impl MemoryRepositoryCollection {
    /// Creates a fully capable, empty backend.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capabilities: CollectionCapabilities::of(&[
                CollectionCapability::Writable,
                CollectionCapability::Updatable,
                CollectionCapability::Manageable,
            ]),
            tables: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Restricts the advertised capabilities.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: CollectionCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    fn repository_capabilities(&self) -> RepositoryCapabilities {
        let mut capabilities = RepositoryCapabilities::of(&[
            RepositoryCapability::Queryable,
            RepositoryCapability::Cacheable,
        ]);
        if self.capabilities.contains(CollectionCapability::Writable) {
            capabilities = capabilities.with(RepositoryCapability::Writable);
        }
        if self.capabilities.contains(CollectionCapability::Manageable) {
            capabilities = capabilities.with(RepositoryCapability::Manageable);
        }
        capabilities
    }

    fn repository(&self, entity_type: &Arc<EntityType>) -> Arc<dyn Repository> {
        Arc::new(MemoryRepository {
            backend: self.name.clone(),
            entity_type: entity_type.clone(),
            capabilities: self.repository_capabilities(),
            tables: self.tables.clone(),
        })
    }
}

impl Default for MemoryRepositoryCollection {
    fn default() -> Self {
        Self::new(entidb_core::DEFAULT_BACKEND)
    }
}

#[async_trait]
impl RepositoryCollection for MemoryRepositoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> CollectionCapabilities {
        self.capabilities.clone()
    }

    fn entity_type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn has_repository(&self, name: &str) -> bool {
        self.tables.read().contains_key(name)
    }

    fn get_repository(&self, entity_type: &Arc<EntityType>) -> CoreResult<Arc<dyn Repository>> {
        if !self.has_repository(&entity_type.name) {
            return Err(CoreError::unknown_entity_type(&entity_type.name));
        }
        Ok(self.repository(entity_type))
    }

    async fn create_repository(
        &self,
        entity_type: &Arc<EntityType>,
    ) -> CoreResult<Arc<dyn Repository>> {
        self.capabilities
            .require(&self.name, CollectionCapability::Manageable)?;
        {
            let mut tables = self.tables.write();
            if tables.contains_key(&entity_type.name) {
                return Err(CoreError::already_exists("repository", &entity_type.name));
            }
            tables.insert(entity_type.name.clone(), Table::new());
        }
        debug!("Created memory table for {}", entity_type.name);
        Ok(self.repository(entity_type))
    }

    async fn delete_repository(&self, entity_type: &EntityType) -> CoreResult<()> {
        self.capabilities
            .require(&self.name, CollectionCapability::Manageable)?;
        match self.tables.write().remove(&entity_type.name) {
            Some(_) => {
                debug!("Dropped memory table for {}", entity_type.name);
                Ok(())
            }
            None => Err(CoreError::unknown_entity_type(&entity_type.name)),
        }
    }

    async fn add_attribute(&self, entity_type: &EntityType, attribute: &Attribute) -> CoreResult<()> {
        self.capabilities
            .require(&self.name, CollectionCapability::Updatable)?;
        let mut tables = self.tables.write();
        let table = tables
            .get_mut(&entity_type.name)
            .ok_or_else(|| CoreError::unknown_entity_type(&entity_type.name))?;
        if !attribute.is_persistent() {
            return Ok(());
        }
        if let Some(default) = attribute.default_value.as_deref() {
            let value = Value::parse(default, attribute.data_type)?;
            for row in table.values_mut() {
                row.entry(attribute.name.clone()).or_insert_with(|| value.clone());
            }
        }
        Ok(())
    }

    async fn delete_attribute(
        &self,
        entity_type: &EntityType,
        attribute: &Attribute,
    ) -> CoreResult<()> {
        self.capabilities
            .require(&self.name, CollectionCapability::Updatable)?;
        let mut tables = self.tables.write();
        let table = tables
            .get_mut(&entity_type.name)
            .ok_or_else(|| CoreError::unknown_entity_type(&entity_type.name))?;
        for row in table.values_mut() {
            row.remove(&attribute.name);
        }
        Ok(())
    }
}

/// Handle on one in-memory table.
pub struct MemoryRepository {
    backend: String,
    entity_type: Arc<EntityType>,
    capabilities: RepositoryCapabilities,
    tables: Tables,
}

impl MemoryRepository {
    fn failure(&self, code: BackendErrorCode, message: String) -> CoreError {
        BackendFailure::new(&self.backend, code, message).into()
    }

    fn missing_table(&self) -> CoreError {
        self.failure(
            BackendErrorCode::MissingTable,
            format!("no such table: {}", self.entity_type.name),
        )
    }

    fn rows(&self) -> CoreResult<Vec<Entity>> {
        let tables = self.tables.read();
        let table = tables
            .get(&self.entity_type.name)
            .ok_or_else(|| self.missing_table())?;
        Ok(table
            .values()
            .map(|row| Entity::from_values(self.entity_type.clone(), row.clone()))
            .collect())
    }

    /// Persistent values of `entity` with references reduced to ids.
    fn stored_row(&self, entity: &Entity) -> CoreResult<(String, Row)> {
        let key = entity.id_key()?;
        let mut row = Row::new();
        for attribute in self.entity_type.persistent_attributes() {
            let value = entity.get(&attribute.name).dehydrated();
            if value.is_null() {
                if !attribute.nillable {
                    return Err(self.failure(
                        BackendErrorCode::NotNullViolation,
                        format!(
                            "NOT NULL constraint failed: {}.{}",
                            self.entity_type.name, attribute.name
                        ),
                    ));
                }
                continue;
            }
            row.insert(attribute.name.clone(), value);
        }
        Ok((key, row))
    }

    fn check_unique(&self, table: &Table, key: &str, row: &Row) -> CoreResult<()> {
        for attribute in self.entity_type.persistent_attributes() {
            if !attribute.unique {
                continue;
            }
            let Some(value) = row.get(&attribute.name) else {
                continue;
            };
            let clash = table
                .iter()
                .any(|(other_key, other)| other_key != key && other.get(&attribute.name) == Some(value));
            if clash {
                return Err(self.failure(
                    BackendErrorCode::UniqueViolation,
                    format!(
                        "UNIQUE constraint failed: {}.{}",
                        self.entity_type.name, attribute.name
                    ),
                ));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    fn entity_type(&self) -> &Arc<EntityType> {
        &self.entity_type
    }

    fn capabilities(&self) -> RepositoryCapabilities {
        self.capabilities.clone()
    }

    async fn count(&self, query: &Query) -> CoreResult<u64> {
        let rows = self.rows()?;
        Ok(query.unpaged().apply(rows).len() as u64)
    }

    async fn find_all(&self, query: &Query) -> CoreResult<Vec<Entity>> {
        Ok(query.apply(self.rows()?))
    }

    async fn find_one_by_id(&self, id: &Value, _fetch: Fetch) -> CoreResult<Option<Entity>> {
        let key = id.require_key()?;
        let tables = self.tables.read();
        let table = tables
            .get(&self.entity_type.name)
            .ok_or_else(|| self.missing_table())?;
        Ok(table
            .get(&key)
            .map(|row| Entity::from_values(self.entity_type.clone(), row.clone())))
    }

    async fn add_all(&self, entities: &mut [Entity]) -> CoreResult<u64> {
        self.capabilities
            .require(self.name(), RepositoryCapability::Writable)?;
        let rows = entities
            .iter()
            .map(|entity| self.stored_row(entity))
            .collect::<CoreResult<Vec<_>>>()?;

        let mut tables = self.tables.write();
        let table = tables
            .get_mut(&self.entity_type.name)
            .ok_or_else(|| self.missing_table())?;
        // Validate the whole batch before inserting any of it.
        let mut staged = table.clone();
        for (key, row) in rows {
            if staged.contains_key(&key) {
                return Err(self.failure(
                    BackendErrorCode::UniqueViolation,
                    format!("UNIQUE constraint failed: {}.id ({key})", self.entity_type.name),
                ));
            }
            self.check_unique(&staged, &key, &row)?;
            staged.insert(key, row);
        }
        let added = (staged.len() - table.len()) as u64;
        *table = staged;
        Ok(added)
    }

    async fn update_all(&self, entities: &mut [Entity]) -> CoreResult<()> {
        self.capabilities
            .require(self.name(), RepositoryCapability::Writable)?;
        let rows = entities
            .iter()
            .map(|entity| self.stored_row(entity))
            .collect::<CoreResult<Vec<_>>>()?;

        let mut tables = self.tables.write();
        let table = tables
            .get_mut(&self.entity_type.name)
            .ok_or_else(|| self.missing_table())?;
        let mut staged = table.clone();
        for (key, row) in rows {
            if !staged.contains_key(&key) {
                return Err(CoreError::not_found("entity", format!("{}/{key}", self.entity_type.name)));
            }
            self.check_unique(&staged, &key, &row)?;
            staged.insert(key, row);
        }
        *table = staged;
        Ok(())
    }

    async fn delete_all_by_id(&self, ids: &[Value]) -> CoreResult<()> {
        self.capabilities
            .require(self.name(), RepositoryCapability::Writable)?;
        let keys = ids
            .iter()
            .map(Value::require_key)
            .collect::<CoreResult<Vec<_>>>()?;

        let mut tables = self.tables.write();
        let table = tables
            .get_mut(&self.entity_type.name)
            .ok_or_else(|| self.missing_table())?;
        if let Some(missing) = keys.iter().find(|key| !table.contains_key(*key)) {
            return Err(CoreError::not_found("entity", format!("{}/{missing}", self.entity_type.name)));
        }
        for key in keys {
            table.remove(&key);
        }
        Ok(())
    }

    async fn delete_all(&self) -> CoreResult<()> {
        self.capabilities
            .require(self.name(), RepositoryCapability::Writable)?;
        let mut tables = self.tables.write();
        let table = tables
            .get_mut(&self.entity_type.name)
            .ok_or_else(|| self.missing_table())?;
        table.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entidb_core::DataType;

    fn person() -> Arc<EntityType> {
        Arc::new(
            EntityType::new("person")
                .with_id_attribute(Attribute::new("id", DataType::String).required())
                .with_attribute(Attribute::new("email", DataType::Email).unique())
                .with_attribute(Attribute::new("name", DataType::String).required()),
        )
    }

    fn row(id: &str, email: &str) -> Entity {
        Entity::new(person()).with("id", id).with("email", email).with("name", id)
    }

    async fn repository() -> (MemoryRepositoryCollection, Arc<dyn Repository>) {
        let backend = MemoryRepositoryCollection::new("memory");
        let repo = backend.create_repository(&person()).await.expect("create");
        (backend, repo)
    }

    #[tokio::test]
    async fn create_twice_is_a_conflict() {
        let (backend, _) = repository().await;
        let err = backend.create_repository(&person()).await.err().expect("conflict");
        assert!(matches!(err, CoreError::AlreadyExists { .. }));
        assert_eq!(backend.entity_type_names(), vec!["person".to_string()]);
    }

    #[tokio::test]
    async fn crud_round_trip() {
        let (_backend, repo) = repository().await;
        let mut rows = vec![row("a", "a@x.org"), row("b", "b@x.org")];
        assert_eq!(repo.add_all(&mut rows).await.expect("add"), 2);
        assert_eq!(repo.count_all().await.expect("count"), 2);

        let mut changed = row("a", "a@y.org");
        repo.update(&mut changed).await.expect("update");
        let found = repo
            .find_one_by_id(&Value::from("a"), Fetch::Shallow)
            .await
            .expect("find")
            .expect("present");
        assert_eq!(found.get_str("email"), Some("a@y.org"));

        repo.delete_by_id(&Value::from("a")).await.expect("delete");
        assert_eq!(repo.count_all().await.expect("count"), 1);
        let err = repo.delete_by_id(&Value::from("a")).await.expect_err("gone");
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn constraint_violations_are_backend_failures() {
        let (_backend, repo) = repository().await;
        repo.add(&mut row("a", "same@x.org")).await.expect("add");

        let err = repo.add(&mut row("b", "same@x.org")).await.expect_err("unique");
        assert!(matches!(
            err,
            CoreError::Backend(BackendFailure { code: BackendErrorCode::UniqueViolation, .. })
        ));

        let mut nameless = Entity::new(person()).with("id", "c");
        let err = repo.add(&mut nameless).await.expect_err("not null");
        assert!(matches!(
            err,
            CoreError::Backend(BackendFailure { code: BackendErrorCode::NotNullViolation, .. })
        ));
        assert_eq!(repo.count_all().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn read_only_backend_rejects_writes() {
        let backend = MemoryRepositoryCollection::new("memory").with_capabilities(
            CollectionCapabilities::of(&[CollectionCapability::Manageable]),
        );
        let repo = backend.create_repository(&person()).await.expect("create");
        let err = repo.add(&mut row("a", "a@x.org")).await.expect_err("read only");
        assert!(matches!(err, CoreError::Unsupported { .. }));
        let err = backend
            .add_attribute(&person(), &Attribute::new("age", DataType::Int))
            .await
            .expect_err("not updatable");
        assert!(matches!(err, CoreError::Unsupported { .. }));
    }

    #[tokio::test]
    async fn dropped_table_reports_missing_table() {
        let (backend, repo) = repository().await;
        backend.delete_repository(&person()).await.expect("drop");
        assert!(!backend.has_repository("person"));
        let err = repo.count_all().await.expect_err("missing");
        assert!(matches!(
            err,
            CoreError::Backend(BackendFailure { code: BackendErrorCode::MissingTable, .. })
        ));
    }

    #[tokio::test]
    async fn added_attribute_is_backfilled_with_its_default() {
        let (backend, repo) = repository().await;
        repo.add(&mut row("a", "a@x.org")).await.expect("add");
        let active = Attribute::new("active", DataType::Bool).with_default_value("true");
        backend.add_attribute(&person(), &active).await.expect("add attribute");
        let found = repo.find_all(&Query::new()).await.expect("find");
        assert_eq!(found[0].get_bool("active"), Some(true));

        backend.delete_attribute(&person(), &active).await.expect("delete attribute");
        let found = repo.find_all(&Query::new()).await.expect("find");
        assert!(!found[0].contains("active"));
    }
}
