//! Row-level permissions on the metadata catalog.
//!
//! An entity-type row and its attribute rows are visible to principals that
//! may at least count the described entity type, and writable only with
//! `writemeta` on it. Package and tag rows are readable by everyone; writing
//! them needs `writemeta` on the catalog type itself.

use std::sync::Arc;

use async_trait::async_trait;

use entidb_core::{
    CoreResult, Entity, Fetch, Permission, Principal, Query, Repository, Value,
    ATTRIBUTE_ENTITY_TYPE, ENTITY_TYPE_ENTITY_TYPE,
};

use crate::decorator::RepositoryDecorator;
use crate::security::PermissionService;

/// Attribute-row reference to the owning entity-type row.
pub const ATTRIBUTE_OWNER_REFERENCE: &str = "entity";

pub struct MetadataPermissionDecorator {
    permissions: Arc<dyn PermissionService>,
}

impl MetadataPermissionDecorator {
    pub fn new(permissions: Arc<dyn PermissionService>) -> Self {
        Self { permissions }
    }

    /// Name of the entity type a catalog row describes, for row-level checks.
    fn described_type(next: &dyn Repository, row: &Entity) -> Option<String> {
        match next.name() {
            ENTITY_TYPE_ENTITY_TYPE => row.id_key().ok(),
            ATTRIBUTE_ENTITY_TYPE => row
                .get(ATTRIBUTE_OWNER_REFERENCE)
                .reference_id()
                .and_then(|id| id.key()),
            _ => None,
        }
    }

    fn row_level(next: &dyn Repository) -> bool {
        matches!(next.name(), ENTITY_TYPE_ENTITY_TYPE | ATTRIBUTE_ENTITY_TYPE)
    }

    fn visible(&self, principal: &Principal, next: &dyn Repository, row: &Entity) -> bool {
        match Self::described_type(next, row) {
            Some(target) => self
                .permissions
                .has_permission(principal, &target, Permission::Count),
            None => principal.superuser,
        }
    }

    fn check_write(&self, principal: &Principal, next: &dyn Repository, row: &Entity) -> CoreResult<()> {
        let target = Self::described_type(next, row).unwrap_or_else(|| next.name().to_string());
        self.permissions
            .check(principal, &target, Permission::WriteMeta)
    }

    /// Rows of `query` the principal may see, paged after filtering.
    async fn visible_rows(&self, next: &dyn Repository, query: &Query) -> CoreResult<Vec<Entity>> {
        let principal = Principal::current();
        let mut unpaged = query.clone();
        unpaged.offset = 0;
        unpaged.page_size = None;
        let rows = next.find_all(&unpaged).await?;
        let visible = rows
            .into_iter()
            .filter(|row| self.visible(&principal, next, row))
            .skip(query.offset);
        Ok(match query.page_size {
            Some(size) => visible.take(size).collect(),
            None => visible.collect(),
        })
    }
}

#[async_trait]
impl RepositoryDecorator for MetadataPermissionDecorator {
    fn name(&self) -> &'static str {
        "metadata-permission"
    }

    async fn count(&self, next: &dyn Repository, query: &Query) -> CoreResult<u64> {
        if !Self::row_level(next) || Principal::current().superuser {
            return next.count(query).await;
        }
        let rows = self
            .visible_rows(next, &query.unpaged().fetch(Fetch::Shallow))
            .await?;
        Ok(rows.len() as u64)
    }

    async fn find_all(&self, next: &dyn Repository, query: &Query) -> CoreResult<Vec<Entity>> {
        if !Self::row_level(next) || Principal::current().superuser {
            return next.find_all(query).await;
        }
        self.visible_rows(next, query).await
    }

    async fn find_one_by_id(
        &self,
        next: &dyn Repository,
        id: &Value,
        fetch: Fetch,
    ) -> CoreResult<Option<Entity>> {
        let row = next.find_one_by_id(id, fetch).await?;
        if !Self::row_level(next) {
            return Ok(row);
        }
        let principal = Principal::current();
        Ok(row.filter(|row| self.visible(&principal, next, row)))
    }

    async fn add_all(&self, next: &dyn Repository, entities: &mut [Entity]) -> CoreResult<u64> {
        let principal = Principal::current();
        for entity in entities.iter() {
            self.check_write(&principal, next, entity)?;
        }
        next.add_all(entities).await
    }

    async fn update_all(&self, next: &dyn Repository, entities: &mut [Entity]) -> CoreResult<()> {
        let principal = Principal::current();
        for entity in entities.iter() {
            self.check_write(&principal, next, entity)?;
        }
        next.update_all(entities).await
    }

    async fn delete_all_by_id(&self, next: &dyn Repository, ids: &[Value]) -> CoreResult<()> {
        let principal = Principal::current();
        if !principal.superuser {
            for id in ids {
                if let Some(row) = next.find_one_by_id(id, Fetch::Shallow).await? {
                    self.check_write(&principal, next, &row)?;
                }
            }
        }
        next.delete_all_by_id(ids).await
    }

    async fn delete_all(&self, next: &dyn Repository) -> CoreResult<()> {
        self.permissions
            .check(&Principal::current(), next.name(), Permission::WriteMeta)?;
        next.delete_all().await
    }
}
