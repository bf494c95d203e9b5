//! Mirrors a primary backend into a [`SearchIndex`].
//!
//! Writes go to the primary first and then to the index. Queries with a
//! full-text rule ask the index for matching ids and fetch the rows from the
//! primary. The two stores are not updated atomically.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use entidb_core::{
    Attribute, CollectionCapabilities, CoreResult, Entity, EntityType, Fetch, Query, Repository,
    RepositoryCapabilities, RepositoryCapability, RepositoryCollection, SearchIndex, Value,
};

/// Backend wrapper keeping a search mapping for every repository.
pub struct IndexedRepositoryCollection {
    inner: Arc<dyn RepositoryCollection>,
    index: Arc<dyn SearchIndex>,
}

impl IndexedRepositoryCollection {
    pub fn new(inner: Arc<dyn RepositoryCollection>, index: Arc<dyn SearchIndex>) -> Self {
        Self { inner, index }
    }

    fn wrap(&self, inner: Arc<dyn Repository>) -> Arc<dyn Repository> {
        Arc::new(IndexedRepository {
            inner,
            index: self.index.clone(),
        })
    }

    /// Drops and rebuilds the mapping from the primary's rows.
    async fn reindex(&self, entity_type: &Arc<EntityType>) -> CoreResult<usize> {
        if self.index.has_mapping(entity_type).await? {
            self.index.delete_mapping(entity_type).await?;
        }
        self.index.create_mapping(entity_type).await?;
        let rows = self
            .inner
            .get_repository(entity_type)?
            .find_all(&Query::new().fetch(Fetch::Shallow))
            .await?;
        for row in &rows {
            self.index.index(row).await?;
        }
        debug!("Reindexed {} rows of {}", rows.len(), entity_type.name);
        Ok(rows.len())
    }
}

#[async_trait]
impl RepositoryCollection for IndexedRepositoryCollection {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn capabilities(&self) -> CollectionCapabilities {
        self.inner.capabilities()
    }

    fn entity_type_names(&self) -> Vec<String> {
        self.inner.entity_type_names()
    }

    fn has_repository(&self, name: &str) -> bool {
        self.inner.has_repository(name)
    }

    fn get_repository(&self, entity_type: &Arc<EntityType>) -> CoreResult<Arc<dyn Repository>> {
        Ok(self.wrap(self.inner.get_repository(entity_type)?))
    }

    async fn create_repository(
        &self,
        entity_type: &Arc<EntityType>,
    ) -> CoreResult<Arc<dyn Repository>> {
        let repository = self.inner.create_repository(entity_type).await?;
        if self.index.has_mapping(entity_type).await? {
            warn!("Replacing stale search mapping for {}", entity_type.name);
            self.index.delete_mapping(entity_type).await?;
        }
        self.index.create_mapping(entity_type).await?;
        Ok(self.wrap(repository))
    }

    async fn delete_repository(&self, entity_type: &EntityType) -> CoreResult<()> {
        self.inner.delete_repository(entity_type).await?;
        if self.index.has_mapping(entity_type).await? {
            self.index.delete_mapping(entity_type).await?;
        }
        Ok(())
    }

    async fn add_attribute(&self, entity_type: &EntityType, attribute: &Attribute) -> CoreResult<()> {
        self.inner.add_attribute(entity_type, attribute).await?;
        if attribute.default_value.is_some() && attribute.data_type.is_string_like() {
            self.reindex(&Arc::new(entity_type.clone())).await?;
        }
        Ok(())
    }

    async fn delete_attribute(
        &self,
        entity_type: &EntityType,
        attribute: &Attribute,
    ) -> CoreResult<()> {
        self.inner.delete_attribute(entity_type, attribute).await?;
        if attribute.data_type.is_string_like() {
            self.reindex(&Arc::new(entity_type.clone())).await?;
        }
        Ok(())
    }

    async fn repair_repository(&self, entity_type: &Arc<EntityType>) -> CoreResult<Vec<String>> {
        let mut repairs = self.inner.repair_repository(entity_type).await?;
        if !self.index.has_mapping(entity_type).await? {
            let rows = self.reindex(entity_type).await?;
            info!("Recreated search mapping for {}", entity_type.name);
            repairs.push(format!(
                "created search mapping for `{}` ({rows} rows indexed)",
                entity_type.name
            ));
        }
        Ok(repairs)
    }
}

/// Repository writing through to the search index.
pub struct IndexedRepository {
    inner: Arc<dyn Repository>,
    index: Arc<dyn SearchIndex>,
}

impl IndexedRepository {
    /// Replaces the search rule by an id restriction, or `None` when nothing matches.
    async fn resolve_search(&self, query: &Query) -> CoreResult<Option<Query>> {
        let Some(text) = query.search_term() else {
            return Ok(Some(query.clone()));
        };
        let ids = self.index.search(self.entity_type(), text).await?;
        if ids.is_empty() {
            return Ok(None);
        }
        let id_attribute = self.entity_type().require_id_attribute()?.name.clone();
        Ok(Some(query.without_search().in_values(id_attribute, ids)))
    }
}

#[async_trait]
impl Repository for IndexedRepository {
    fn entity_type(&self) -> &Arc<EntityType> {
        self.inner.entity_type()
    }

    fn capabilities(&self) -> RepositoryCapabilities {
        self.inner.capabilities().with(RepositoryCapability::Indexable)
    }

    async fn count(&self, query: &Query) -> CoreResult<u64> {
        match self.resolve_search(query).await? {
            Some(query) => self.inner.count(&query).await,
            None => Ok(0),
        }
    }

    async fn find_all(&self, query: &Query) -> CoreResult<Vec<Entity>> {
        match self.resolve_search(query).await? {
            Some(query) => self.inner.find_all(&query).await,
            None => Ok(Vec::new()),
        }
    }

    async fn find_one_by_id(&self, id: &Value, fetch: Fetch) -> CoreResult<Option<Entity>> {
        self.inner.find_one_by_id(id, fetch).await
    }

    async fn add_all(&self, entities: &mut [Entity]) -> CoreResult<u64> {
        let added = self.inner.add_all(entities).await?;
        for entity in entities.iter() {
            self.index.index(entity).await?;
        }
        Ok(added)
    }

    async fn update_all(&self, entities: &mut [Entity]) -> CoreResult<()> {
        self.inner.update_all(entities).await?;
        for entity in entities.iter() {
            self.index.index(entity).await?;
        }
        Ok(())
    }

    async fn delete_all_by_id(&self, ids: &[Value]) -> CoreResult<()> {
        self.inner.delete_all_by_id(ids).await?;
        for id in ids {
            self.index.delete(self.entity_type(), id).await?;
        }
        Ok(())
    }

    async fn delete_all(&self) -> CoreResult<()> {
        self.inner.delete_all().await?;
        self.index.delete_all(self.entity_type()).await
    }
}
