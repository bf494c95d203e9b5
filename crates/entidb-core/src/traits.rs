use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::attribute::Attribute;
use crate::entity::Entity;
use crate::entity_type::EntityType;
use crate::error::{CoreError, CoreResult};
use crate::query::{Fetch, Query};
use crate::value::Value;

/// Operations a [`Repository`] supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RepositoryCapability {
    Queryable,
    Writable,
    Manageable,
    Indexable,
    Cacheable,
}

impl fmt::Display for RepositoryCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Queryable => "queryable",
            Self::Writable => "writable",
            Self::Manageable => "manageable",
            Self::Indexable => "indexable",
            Self::Cacheable => "cacheable",
        };
        f.write_str(name)
    }
}

/// Operations a [`RepositoryCollection`] supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CollectionCapability {
    /// Rows can be written.
    Writable,
    /// Attributes can be added to and removed from existing repositories.
    Updatable,
    /// Repositories can be created and dropped.
    Manageable,
}

impl fmt::Display for CollectionCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Writable => "writable",
            Self::Updatable => "updatable",
            Self::Manageable => "manageable",
        };
        f.write_str(name)
    }
}

/// Capability set advertised by a repository or collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities<C: Ord>(BTreeSet<C>);

impl<C: Ord + Copy + fmt::Display> Capabilities<C> {
    #[must_use]
    pub fn of(capabilities: &[C]) -> Self {
        Self(capabilities.iter().copied().collect())
    }

    #[must_use]
    pub fn contains(&self, capability: C) -> bool {
        self.0.contains(&capability)
    }

    #[must_use]
    pub fn with(mut self, capability: C) -> Self {
        self.0.insert(capability);
        self
    }

    #[must_use]
    pub fn without(mut self, capability: C) -> Self {
        self.0.remove(&capability);
        self
    }

    /// Fails with `Unsupported` when `capability` is missing.
    pub fn require(&self, target: &str, capability: C) -> CoreResult<()> {
        if self.contains(capability) {
            Ok(())
        } else {
            Err(CoreError::unsupported(target, capability))
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &C> {
        self.0.iter()
    }
}

pub type RepositoryCapabilities = Capabilities<RepositoryCapability>;
pub type CollectionCapabilities = Capabilities<CollectionCapability>;

/// CRUD and query handle for one entity type within one backend.
///
/// The required methods are the surface the decorator pipeline intercepts; the
/// provided single-row helpers funnel into them.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Entity type this repository serves.
    fn entity_type(&self) -> &Arc<EntityType>;

    /// What this repository supports; missing capabilities fail with `Unsupported`.
    fn capabilities(&self) -> RepositoryCapabilities;

    /// Fully-qualified entity type name.
    fn name(&self) -> &str {
        &self.entity_type().name
    }

    /// Counts rows matching every rule of `query`; paging is ignored.
    async fn count(&self, query: &Query) -> CoreResult<u64>;

    /// Returns matching rows in query order, within the requested page.
    async fn find_all(&self, query: &Query) -> CoreResult<Vec<Entity>>;

    /// Looks up a single row; `Ok(None)` when no row has `id`.
    async fn find_one_by_id(&self, id: &Value, fetch: Fetch) -> CoreResult<Option<Entity>>;

    /// Inserts rows; layers may fill values (e.g. generated ids) in place.
    async fn add_all(&self, entities: &mut [Entity]) -> CoreResult<u64>;

    /// Replaces stored rows; fails with `NotFound` for unknown ids.
    async fn update_all(&self, entities: &mut [Entity]) -> CoreResult<()>;

    /// Deletes rows by id; unknown ids fail with `NotFound`.
    async fn delete_all_by_id(&self, ids: &[Value]) -> CoreResult<()>;

    /// Deletes every row.
    async fn delete_all(&self) -> CoreResult<()>;

    /// Inserts one row through [`Repository::add_all`].
    async fn add(&self, entity: &mut Entity) -> CoreResult<()> {
        self.add_all(std::slice::from_mut(entity)).await.map(|_| ())
    }

    /// Replaces one row through [`Repository::update_all`].
    async fn update(&self, entity: &mut Entity) -> CoreResult<()> {
        self.update_all(std::slice::from_mut(entity)).await
    }

    /// Deletes one row through [`Repository::delete_all_by_id`].
    async fn delete_by_id(&self, id: &Value) -> CoreResult<()> {
        self.delete_all_by_id(std::slice::from_ref(id)).await
    }

    /// First row matching `query`, if any.
    async fn find_one(&self, query: &Query) -> CoreResult<Option<Entity>> {
        let query = query.clone().page_size(1);
        Ok(self.find_all(&query).await?.into_iter().next())
    }

    /// Counts every row.
    async fn count_all(&self) -> CoreResult<u64> {
        self.count(&Query::new()).await
    }
}

/// A storage engine owning the physical storage of a set of entity types.
#[async_trait]
pub trait RepositoryCollection: Send + Sync {
    /// Backend name used for routing (`EntityType::backend`).
    fn name(&self) -> &str;

    /// Whether the backend accepts writes, attribute changes and DDL.
    fn capabilities(&self) -> CollectionCapabilities;

    /// Names of the entity types this backend currently stores.
    fn entity_type_names(&self) -> Vec<String>;

    /// Whether physical storage exists for the entity type `name`.
    fn has_repository(&self, name: &str) -> bool;

    /// Handle for an existing repository, bound to the given metadata.
    fn get_repository(&self, entity_type: &Arc<EntityType>) -> CoreResult<Arc<dyn Repository>>;

    /// Provisions physical storage; fails with `AlreadyExists` when present.
    async fn create_repository(&self, entity_type: &Arc<EntityType>)
        -> CoreResult<Arc<dyn Repository>>;

    /// Drops physical storage for the entity type.
    async fn delete_repository(&self, entity_type: &EntityType) -> CoreResult<()>;

    /// Adds storage for `attribute`; `entity_type` already declares it.
    async fn add_attribute(&self, entity_type: &EntityType, attribute: &Attribute) -> CoreResult<()>;

    /// Drops storage for `attribute`; `entity_type` still declares it.
    async fn delete_attribute(&self, entity_type: &EntityType, attribute: &Attribute)
        -> CoreResult<()>;

    /// Repairs auxiliary structures of an existing repository, such as search
    /// mappings. Returns one line per repair made.
    async fn repair_repository(&self, _entity_type: &Arc<EntityType>) -> CoreResult<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Secondary full-text index mirrored from a primary backend.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Prepares the index to accept documents of `entity_type`.
    async fn create_mapping(&self, entity_type: &EntityType) -> CoreResult<()>;

    /// Whether a mapping for `entity_type` exists.
    async fn has_mapping(&self, entity_type: &EntityType) -> CoreResult<bool>;

    /// Removes the mapping and every document of `entity_type`.
    async fn delete_mapping(&self, entity_type: &EntityType) -> CoreResult<()>;

    /// Inserts or replaces the document for `entity`.
    async fn index(&self, entity: &Entity) -> CoreResult<()>;

    /// Removes the document for `id`; unknown ids are ignored.
    async fn delete(&self, entity_type: &EntityType, id: &Value) -> CoreResult<()>;

    /// Removes every document of `entity_type`, keeping the mapping.
    async fn delete_all(&self, entity_type: &EntityType) -> CoreResult<()>;

    /// Ids of documents matching every token of `text`.
    async fn search(&self, entity_type: &EntityType, text: &str) -> CoreResult<Vec<Value>>;
}

/// Resolves an entity type name to its fully decorated repository.
pub trait RepositoryProvider: Send + Sync {
    /// Fails with `UnknownEntityType` for unregistered names.
    fn repository(&self, entity_type: &str) -> CoreResult<Arc<dyn Repository>>;
}
