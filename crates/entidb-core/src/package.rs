//! Hierarchical package namespace.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::tag::Tag;

/// Grouping namespace for entity types. Packages never influence storage routing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    /// Fully-qualified package name.
    pub id: String,
    pub label: String,
    pub description: Option<String>,
    /// Fully-qualified name of the parent package.
    pub parent: Option<String>,
    pub tags: Vec<Tag>,
}

impl Package {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            id,
            description: None,
            parent: None,
            tags: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Flat package table keyed by name, with parent links resolved by lookup.
#[derive(Debug, Clone, Default)]
pub struct PackageTree {
    packages: HashMap<String, Package>,
}

impl PackageTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Package> {
        self.packages.get(id)
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.packages.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Package> {
        self.packages.values()
    }

    /// Inserts or replaces a package after checking that its parent exists and
    /// that the parent chain does not loop back to it.
    pub fn insert(&mut self, package: Package) -> CoreResult<()> {
        if let Some(parent) = &package.parent {
            if !self.packages.contains_key(parent) && parent != &package.id {
                return Err(CoreError::not_found("package", parent.clone()));
            }
            let mut seen = HashSet::from([package.id.as_str()]);
            let mut cursor = Some(parent.as_str());
            while let Some(current) = cursor {
                if !seen.insert(current) {
                    return Err(CoreError::validation(format!(
                        "package `{}` would create a parent cycle through `{current}`",
                        package.id
                    )));
                }
                cursor = self
                    .packages
                    .get(current)
                    .and_then(|p| p.parent.as_deref());
            }
        }
        self.packages.insert(package.id.clone(), package);
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Option<Package> {
        self.packages.remove(id)
    }

    /// Direct sub-packages of `id`.
    #[must_use]
    pub fn children(&self, id: &str) -> Vec<&Package> {
        self.packages
            .values()
            .filter(|p| p.parent.as_deref() == Some(id))
            .collect()
    }
}
