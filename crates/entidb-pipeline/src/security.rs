//! Permission lookups used by the permission stages and the metadata service.

use std::collections::{BTreeSet, HashMap};

use parking_lot::RwLock;
use tracing::debug;

use entidb_core::{CoreError, CoreResult, Permission, Principal};

/// Target that matches every entity type in a grant.
pub const ANY_TARGET: &str = "*";

/// Answers whether a principal holds a permission on a target.
///
/// Targets are entity type names. Superusers hold every permission.
pub trait PermissionService: Send + Sync {
    fn has_permission(&self, principal: &Principal, target: &str, permission: Permission) -> bool;

    /// Removes every grant on `target`.
    fn revoke_all(&self, target: &str);

    /// Fails with `PermissionDenied` unless the principal holds `permission`.
    fn check(&self, principal: &Principal, target: &str, permission: Permission) -> CoreResult<()> {
        if self.has_permission(principal, target, permission) {
            Ok(())
        } else {
            Err(CoreError::permission_denied(
                &principal.username,
                permission,
                target,
            ))
        }
    }
}

/// In-memory grant table: username to target to permissions.
#[derive(Debug, Default)]
pub struct GrantPermissionService {
    grants: RwLock<HashMap<String, HashMap<String, BTreeSet<Permission>>>>,
}

impl GrantPermissionService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, username: impl Into<String>, target: impl Into<String>, permission: Permission) {
        let username = username.into();
        let target = target.into();
        debug!("Granting {} on {} to {}", permission, target, username);
        self.grants
            .write()
            .entry(username)
            .or_default()
            .entry(target)
            .or_default()
            .insert(permission);
    }

    pub fn revoke(&self, username: &str, target: &str, permission: Permission) {
        if let Some(targets) = self.grants.write().get_mut(username) {
            if let Some(permissions) = targets.get_mut(target) {
                permissions.remove(&permission);
            }
        }
    }

    /// Permissions granted to `username` on exactly `target`.
    #[must_use]
    pub fn granted(&self, username: &str, target: &str) -> BTreeSet<Permission> {
        self.grants
            .read()
            .get(username)
            .and_then(|targets| targets.get(target))
            .cloned()
            .unwrap_or_default()
    }
}

impl PermissionService for GrantPermissionService {
    fn has_permission(&self, principal: &Principal, target: &str, permission: Permission) -> bool {
        if principal.superuser {
            return true;
        }
        let grants = self.grants.read();
        let Some(targets) = grants.get(&principal.username) else {
            return false;
        };
        [target, ANY_TARGET]
            .iter()
            .filter_map(|t| targets.get(*t))
            .flatten()
            .any(|held| held.implies(permission))
    }

    fn revoke_all(&self, target: &str) {
        let mut grants = self.grants.write();
        for targets in grants.values_mut() {
            targets.remove(target);
        }
        debug!("Revoked all grants on {}", target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grants_imply_weaker_permissions() {
        let service = GrantPermissionService::new();
        let alice = Principal::user("alice");
        service.grant("alice", "demo", Permission::Write);
        assert!(service.has_permission(&alice, "demo", Permission::Read));
        assert!(service.has_permission(&alice, "demo", Permission::Count));
        assert!(!service.has_permission(&alice, "demo", Permission::WriteMeta));
        assert!(!service.has_permission(&alice, "other", Permission::Count));
    }

    #[test]
    fn wildcard_and_superuser() {
        let service = GrantPermissionService::new();
        service.grant("bob", ANY_TARGET, Permission::Read);
        assert!(service.has_permission(&Principal::user("bob"), "anything", Permission::Read));
        assert!(service.has_permission(&Principal::superuser("root"), "demo", Permission::WriteMeta));
        assert!(service.has_permission(&Principal::system(), "demo", Permission::WriteMeta));
    }

    #[test]
    fn revoke_all_clears_the_target() {
        let service = GrantPermissionService::new();
        let alice = Principal::user("alice");
        service.grant("alice", "demo", Permission::Read);
        service.grant("alice", "kept", Permission::Read);
        service.revoke_all("demo");
        assert!(service.granted("alice", "demo").is_empty());
        assert!(service.has_permission(&alice, "kept", Permission::Read));

        let err = service.check(&alice, "demo", Permission::Read).expect_err("denied");
        assert!(matches!(err, CoreError::PermissionDenied { .. }));
    }
}
