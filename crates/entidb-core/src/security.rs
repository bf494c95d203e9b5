//! Acting principal and permission vocabulary.

use std::fmt;
use std::future::Future;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

tokio::task_local! {
    static CURRENT_PRINCIPAL: Principal;
}

/// Identity on whose behalf repository calls are made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub username: String,
    /// Bypasses every permission check.
    pub superuser: bool,
    /// Internal bootstrap and reconciliation work.
    pub system: bool,
}

impl Principal {
    #[must_use]
    pub fn user(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            superuser: false,
            system: false,
        }
    }

    #[must_use]
    pub fn superuser(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            superuser: true,
            system: false,
        }
    }

    #[must_use]
    pub fn system() -> Self {
        Self {
            username: "system".to_string(),
            superuser: true,
            system: true,
        }
    }

    #[must_use]
    pub fn anonymous() -> Self {
        Self::user("anonymous")
    }

    /// Principal of the calling task; anonymous outside [`run_as`].
    #[must_use]
    pub fn current() -> Self {
        current_principal().unwrap_or_else(Self::anonymous)
    }
}

/// Principal of the calling task, if one was set.
#[must_use]
pub fn current_principal() -> Option<Principal> {
    CURRENT_PRINCIPAL.try_with(Clone::clone).ok()
}

/// Runs `work` with `principal` as the acting identity.
pub async fn run_as<F: Future>(principal: Principal, work: F) -> F::Output {
    CURRENT_PRINCIPAL.scope(principal, work).await
}

/// Permissions checked by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Permission {
    Count,
    Read,
    Write,
    /// Create, alter or drop the entity type itself.
    WriteMeta,
}

impl Permission {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Read => "read",
            Self::Write => "write",
            Self::WriteMeta => "writemeta",
        }
    }

    /// Whether holding `self` also grants `other`.
    #[must_use]
    pub fn implies(self, other: Permission) -> bool {
        match self {
            Self::WriteMeta => true,
            Self::Write => matches!(other, Self::Write | Self::Read | Self::Count),
            Self::Read => matches!(other, Self::Read | Self::Count),
            Self::Count => other == Self::Count,
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "count" => Ok(Self::Count),
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            "writemeta" => Ok(Self::WriteMeta),
            _ => Err(format!("invalid permission: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn principal_is_scoped_to_the_task() {
        assert_eq!(Principal::current(), Principal::anonymous());
        let seen = run_as(Principal::user("alice"), async { Principal::current() }).await;
        assert_eq!(seen.username, "alice");
        assert!(current_principal().is_none());
    }

    #[test]
    fn permission_hierarchy() {
        assert!(Permission::WriteMeta.implies(Permission::Write));
        assert!(Permission::Write.implies(Permission::Count));
        assert!(!Permission::Read.implies(Permission::Write));
        assert!(!Permission::Count.implies(Permission::Read));
        assert_eq!("writemeta".parse::<Permission>(), Ok(Permission::WriteMeta));
    }
}
