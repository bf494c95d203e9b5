//! In-memory index of the registered entity types.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use entidb_core::{CoreError, CoreResult, EntityType};

/// Name-keyed view of every registered entity type.
///
/// Children hold their parent by `Arc`, so replacing a type also rebuilds the
/// types that extend it, transitively, to point at the new version.
#[derive(Default)]
pub struct EntityTypeIndex {
    types: RwLock<BTreeMap<String, Arc<EntityType>>>,
}

impl EntityTypeIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<EntityType>> {
        self.types.read().get(name).cloned()
    }

    pub fn require(&self, name: &str) -> CoreResult<Arc<EntityType>> {
        self.get(name)
            .ok_or_else(|| CoreError::unknown_entity_type(name))
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.types.read().contains_key(name)
    }

    #[must_use]
    pub fn all(&self) -> Vec<Arc<EntityType>> {
        self.types.read().values().cloned().collect()
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.types.read().keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.types.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.read().is_empty()
    }

    /// Inserts or replaces `entity_type` and relinks its descendants.
    /// Returns the stored version.
    pub fn insert(&self, entity_type: EntityType) -> Arc<EntityType> {
        let entity_type = Arc::new(entity_type);
        let mut types = self.types.write();
        types.insert(entity_type.name.clone(), entity_type.clone());
        relink_children(&mut types, &entity_type);
        entity_type
    }

    pub fn remove(&self, name: &str) -> Option<Arc<EntityType>> {
        self.types.write().remove(name)
    }

    /// Types that extend `name` directly.
    #[must_use]
    pub fn children(&self, name: &str) -> Vec<Arc<EntityType>> {
        self.types
            .read()
            .values()
            .filter(|t| t.extends_name() == Some(name))
            .cloned()
            .collect()
    }

    /// Non-abstract types that inherit from `name`, at any depth.
    #[must_use]
    pub fn concrete_descendants(&self, name: &str) -> Vec<Arc<EntityType>> {
        self.types
            .read()
            .values()
            .filter(|t| !t.is_abstract && t.is_descendant_of(name))
            .cloned()
            .collect()
    }

    /// Names of other types that extend or reference `name`.
    #[must_use]
    pub fn dependents(&self, name: &str) -> Vec<String> {
        self.types
            .read()
            .values()
            .filter(|t| t.name != name)
            .filter(|t| {
                t.extends_name() == Some(name)
                    || t
                        .attributes
                        .iter()
                        .any(|a| a.ref_entity_type.as_deref() == Some(name))
            })
            .map(|t| t.name.clone())
            .collect()
    }
}

fn relink_children(types: &mut BTreeMap<String, Arc<EntityType>>, parent: &Arc<EntityType>) {
    let children: Vec<Arc<EntityType>> = types
        .values()
        .filter(|t| t.extends_name() == Some(parent.name.as_str()))
        .cloned()
        .collect();
    for child in children {
        let relinked = Arc::new(EntityType::clone(&child).extending(parent.clone()));
        types.insert(relinked.name.clone(), relinked.clone());
        relink_children(types, &relinked);
    }
}
