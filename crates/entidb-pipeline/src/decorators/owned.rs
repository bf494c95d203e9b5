//! Row ownership for types extending `sys_sec_Owned`.
//!
//! Non-superusers only see, update and delete rows whose owner is their own
//! username, and every row they add is owned by them.

use async_trait::async_trait;

use entidb_core::{
    CoreError, CoreResult, Entity, Fetch, Permission, Principal, Query, Repository, Value,
    OWNER_ATTRIBUTE,
};

use crate::decorator::RepositoryDecorator;

pub struct OwnershipDecorator;

/// The acting principal, unless it may see every row.
fn restricted_principal() -> Option<Principal> {
    let principal = Principal::current();
    (!principal.superuser).then_some(principal)
}

fn is_owner(entity: &Entity, principal: &Principal) -> bool {
    entity.get_str(OWNER_ATTRIBUTE) == Some(principal.username.as_str())
}

fn not_owner(principal: &Principal, next: &dyn Repository, id: &Value) -> CoreError {
    CoreError::permission_denied(
        &principal.username,
        Permission::Write,
        format!("{}/{}", next.name(), id),
    )
}

impl OwnershipDecorator {
    /// Fails unless every existing row among `ids` is owned by `principal`.
    /// Missing rows are left for the inner layers to report.
    async fn require_owned(
        next: &dyn Repository,
        principal: &Principal,
        ids: &[Value],
    ) -> CoreResult<()> {
        for id in ids {
            if let Some(existing) = next.find_one_by_id(id, Fetch::Shallow).await? {
                if !is_owner(&existing, principal) {
                    return Err(not_owner(principal, next, id));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RepositoryDecorator for OwnershipDecorator {
    fn name(&self) -> &'static str {
        "ownership"
    }

    async fn count(&self, next: &dyn Repository, query: &Query) -> CoreResult<u64> {
        match restricted_principal() {
            Some(principal) => {
                next.count(&query.clone().eq(OWNER_ATTRIBUTE, principal.username))
                    .await
            }
            None => next.count(query).await,
        }
    }

    async fn find_all(&self, next: &dyn Repository, query: &Query) -> CoreResult<Vec<Entity>> {
        match restricted_principal() {
            Some(principal) => {
                next.find_all(&query.clone().eq(OWNER_ATTRIBUTE, principal.username))
                    .await
            }
            None => next.find_all(query).await,
        }
    }

    async fn find_one_by_id(
        &self,
        next: &dyn Repository,
        id: &Value,
        fetch: Fetch,
    ) -> CoreResult<Option<Entity>> {
        let row = next.find_one_by_id(id, fetch).await?;
        Ok(match restricted_principal() {
            Some(principal) => row.filter(|row| is_owner(row, &principal)),
            None => row,
        })
    }

    async fn add_all(&self, next: &dyn Repository, entities: &mut [Entity]) -> CoreResult<u64> {
        let principal = Principal::current();
        for entity in entities.iter_mut() {
            if !principal.superuser || entity.get(OWNER_ATTRIBUTE).is_null() {
                entity.set(OWNER_ATTRIBUTE, principal.username.clone());
            }
        }
        next.add_all(entities).await
    }

    async fn update_all(&self, next: &dyn Repository, entities: &mut [Entity]) -> CoreResult<()> {
        let principal = Principal::current();
        for entity in entities.iter_mut() {
            let Some(id) = entity.id().cloned() else {
                continue;
            };
            let keep_owner = !principal.superuser || entity.get(OWNER_ATTRIBUTE).is_null();
            if !keep_owner {
                continue;
            }
            let Some(existing) = next.find_one_by_id(&id, Fetch::Shallow).await? else {
                continue;
            };
            if !principal.superuser && !is_owner(&existing, &principal) {
                return Err(not_owner(&principal, next, &id));
            }
            entity.set(OWNER_ATTRIBUTE, existing.get(OWNER_ATTRIBUTE).clone());
        }
        next.update_all(entities).await
    }

    async fn delete_all_by_id(&self, next: &dyn Repository, ids: &[Value]) -> CoreResult<()> {
        if let Some(principal) = restricted_principal() {
            Self::require_owned(next, &principal, ids).await?;
        }
        next.delete_all_by_id(ids).await
    }

    async fn delete_all(&self, next: &dyn Repository) -> CoreResult<()> {
        let Some(principal) = restricted_principal() else {
            return next.delete_all().await;
        };
        let query = Query::new()
            .eq(OWNER_ATTRIBUTE, principal.username)
            .fetch(Fetch::Shallow);
        let ids: Vec<Value> = next
            .find_all(&query)
            .await?
            .iter()
            .filter_map(|row| row.id().cloned())
            .collect();
        // An empty batch still travels down so the write permission is checked.
        next.delete_all_by_id(&ids).await
    }
}
