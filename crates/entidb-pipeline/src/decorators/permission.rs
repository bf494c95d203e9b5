use std::sync::Arc;

use async_trait::async_trait;

use entidb_core::{CoreResult, Entity, Fetch, Permission, Principal, Query, Repository, Value};

use crate::decorator::RepositoryDecorator;
use crate::security::PermissionService;

/// Checks entity-type level permissions before any data access.
///
/// Counting needs `count`, reading needs `read`, and every write needs
/// `write`. A rejected call never reaches the inner layers.
pub struct PermissionDecorator {
    permissions: Arc<dyn PermissionService>,
}

impl PermissionDecorator {
    pub fn new(permissions: Arc<dyn PermissionService>) -> Self {
        Self { permissions }
    }

    fn check(&self, next: &dyn Repository, permission: Permission) -> CoreResult<()> {
        self.permissions
            .check(&Principal::current(), next.name(), permission)
    }
}

#[async_trait]
impl RepositoryDecorator for PermissionDecorator {
    fn name(&self) -> &'static str {
        "permission"
    }

    async fn count(&self, next: &dyn Repository, query: &Query) -> CoreResult<u64> {
        self.check(next, Permission::Count)?;
        next.count(query).await
    }

    async fn find_all(&self, next: &dyn Repository, query: &Query) -> CoreResult<Vec<Entity>> {
        self.check(next, Permission::Read)?;
        next.find_all(query).await
    }

    async fn find_one_by_id(
        &self,
        next: &dyn Repository,
        id: &Value,
        fetch: Fetch,
    ) -> CoreResult<Option<Entity>> {
        self.check(next, Permission::Read)?;
        next.find_one_by_id(id, fetch).await
    }

    async fn add_all(&self, next: &dyn Repository, entities: &mut [Entity]) -> CoreResult<u64> {
        self.check(next, Permission::Write)?;
        next.add_all(entities).await
    }

    async fn update_all(&self, next: &dyn Repository, entities: &mut [Entity]) -> CoreResult<()> {
        self.check(next, Permission::Write)?;
        next.update_all(entities).await
    }

    async fn delete_all_by_id(&self, next: &dyn Repository, ids: &[Value]) -> CoreResult<()> {
        self.check(next, Permission::Write)?;
        next.delete_all_by_id(ids).await
    }

    async fn delete_all(&self, next: &dyn Repository) -> CoreResult<()> {
        self.check(next, Permission::Write)?;
        next.delete_all().await
    }
}
