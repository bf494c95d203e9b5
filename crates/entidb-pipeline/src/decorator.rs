//! The decorator contract and its single generic composition.
//!
//! A [`RepositoryDecorator`] sees every repository call together with the
//! next repository in the chain. Each hook defaults to delegation, so a
//! decorator only overrides the calls it cares about. [`DecoratedRepository`]
//! turns a decorator plus an inner repository back into a [`Repository`].

use std::sync::Arc;

use async_trait::async_trait;

use entidb_core::{CoreResult, Entity, EntityType, Fetch, Query, Repository, RepositoryCapabilities, Value};

/// One cross-cutting behaviour around a repository.
#[async_trait]
pub trait RepositoryDecorator: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    fn capabilities(&self, next: &dyn Repository) -> RepositoryCapabilities {
        next.capabilities()
    }

    async fn count(&self, next: &dyn Repository, query: &Query) -> CoreResult<u64> {
        next.count(query).await
    }

    async fn find_all(&self, next: &dyn Repository, query: &Query) -> CoreResult<Vec<Entity>> {
        next.find_all(query).await
    }

    async fn find_one_by_id(
        &self,
        next: &dyn Repository,
        id: &Value,
        fetch: Fetch,
    ) -> CoreResult<Option<Entity>> {
        next.find_one_by_id(id, fetch).await
    }

    async fn add_all(&self, next: &dyn Repository, entities: &mut [Entity]) -> CoreResult<u64> {
        next.add_all(entities).await
    }

    async fn update_all(&self, next: &dyn Repository, entities: &mut [Entity]) -> CoreResult<()> {
        next.update_all(entities).await
    }

    async fn delete_all_by_id(&self, next: &dyn Repository, ids: &[Value]) -> CoreResult<()> {
        next.delete_all_by_id(ids).await
    }

    async fn delete_all(&self, next: &dyn Repository) -> CoreResult<()> {
        next.delete_all().await
    }
}

/// A decorator bound to the repository it wraps.
pub struct DecoratedRepository {
    decorator: Arc<dyn RepositoryDecorator>,
    inner: Arc<dyn Repository>,
}

impl DecoratedRepository {
    pub fn new(decorator: Arc<dyn RepositoryDecorator>, inner: Arc<dyn Repository>) -> Self {
        Self { decorator, inner }
    }

    #[must_use]
    pub fn decorator_name(&self) -> &'static str {
        self.decorator.name()
    }

    #[must_use]
    pub fn inner(&self) -> &Arc<dyn Repository> {
        &self.inner
    }
}

#[async_trait]
impl Repository for DecoratedRepository {
    fn entity_type(&self) -> &Arc<EntityType> {
        self.inner.entity_type()
    }

    fn capabilities(&self) -> RepositoryCapabilities {
        self.decorator.capabilities(self.inner.as_ref())
    }

    async fn count(&self, query: &Query) -> CoreResult<u64> {
        self.decorator.count(self.inner.as_ref(), query).await
    }

    async fn find_all(&self, query: &Query) -> CoreResult<Vec<Entity>> {
        self.decorator.find_all(self.inner.as_ref(), query).await
    }

    async fn find_one_by_id(&self, id: &Value, fetch: Fetch) -> CoreResult<Option<Entity>> {
        self.decorator
            .find_one_by_id(self.inner.as_ref(), id, fetch)
            .await
    }

    async fn add_all(&self, entities: &mut [Entity]) -> CoreResult<u64> {
        self.decorator.add_all(self.inner.as_ref(), entities).await
    }

    async fn update_all(&self, entities: &mut [Entity]) -> CoreResult<()> {
        self.decorator.update_all(self.inner.as_ref(), entities).await
    }

    async fn delete_all_by_id(&self, ids: &[Value]) -> CoreResult<()> {
        self.decorator
            .delete_all_by_id(self.inner.as_ref(), ids)
            .await
    }

    async fn delete_all(&self) -> CoreResult<()> {
        self.decorator.delete_all(self.inner.as_ref()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entidb_core::{Attribute, DataType, RepositoryCollection};
    use entidb_storage::MemoryRepositoryCollection;

    struct Uppercase;

    #[async_trait]
    impl RepositoryDecorator for Uppercase {
        fn name(&self) -> &'static str {
            "uppercase"
        }

        async fn add_all(&self, next: &dyn Repository, entities: &mut [Entity]) -> CoreResult<u64> {
            for entity in entities.iter_mut() {
                if let Some(name) = entity.get_str("name").map(str::to_uppercase) {
                    entity.set("name", name);
                }
            }
            next.add_all(entities).await
        }
    }

    #[tokio::test]
    async fn untouched_hooks_delegate() {
        let entity_type = Arc::new(
            EntityType::new("demo")
                .with_id_attribute(Attribute::new("id", DataType::String).required())
                .with_attribute(Attribute::new("name", DataType::String)),
        );
        let backend = MemoryRepositoryCollection::new("memory");
        let inner = backend.create_repository(&entity_type).await.expect("create");
        let repo = DecoratedRepository::new(Arc::new(Uppercase), inner);

        repo.add(&mut Entity::new(entity_type.clone()).with("id", "1").with("name", "abc"))
            .await
            .expect("add");
        let stored = repo
            .find_one_by_id(&Value::from("1"), Fetch::Shallow)
            .await
            .expect("find")
            .expect("present");
        assert_eq!(stored.get_str("name"), Some("ABC"));
        assert_eq!(repo.count_all().await.expect("count"), 1);
        assert_eq!(repo.decorator_name(), "uppercase");
        assert_eq!(repo.name(), "demo");
    }
}
