//! Dependency ordering of entity types.
//!
//! A type depends on its parent (`extends`) and on every type it references.
//! Parents always come first; an `extends` cycle is an error. Reference
//! cycles are legal (two types may point at each other) and are broken in
//! declaration order.

use std::collections::{BTreeSet, HashMap};

use tracing::warn;

use entidb_core::{CoreError, CoreResult, EntityType};

/// The edges of one entity type, detached from the type itself so that
/// catalog rows can be ordered before they are turned into types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyNode {
    pub name: String,
    pub extends: Option<String>,
    pub references: BTreeSet<String>,
}

impl DependencyNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            extends: None,
            references: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn extending(mut self, parent: impl Into<String>) -> Self {
        self.extends = Some(parent.into());
        self
    }

    #[must_use]
    pub fn referencing(mut self, target: impl Into<String>) -> Self {
        self.references.insert(target.into());
        self
    }
}

impl From<&EntityType> for DependencyNode {
    fn from(entity_type: &EntityType) -> Self {
        let mut references: BTreeSet<String> = entity_type
            .attributes
            .iter()
            .filter_map(|a| a.ref_entity_type.clone())
            .collect();
        references.remove(&entity_type.name);
        Self {
            name: entity_type.name.clone(),
            extends: entity_type.extends_name().map(str::to_string),
            references,
        }
    }
}

/// Returns the positions of `nodes` in dependency order.
///
/// Edges to names outside `nodes` are ignored. Among nodes that are ready at
/// the same time, declaration order wins.
pub fn dependency_order(nodes: &[DependencyNode]) -> CoreResult<Vec<usize>> {
    let positions: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, node)| (node.name.as_str(), i))
        .collect();

    // hard[i]: unresolved parent of i; soft[i]: unresolved reference targets of i.
    let mut hard: Vec<Option<usize>> = Vec::with_capacity(nodes.len());
    let mut soft: Vec<BTreeSet<usize>> = Vec::with_capacity(nodes.len());
    for (i, node) in nodes.iter().enumerate() {
        let parent = node
            .extends
            .as_deref()
            .and_then(|name| positions.get(name).copied());
        if parent == Some(i) {
            return Err(CoreError::validation(format!(
                "entity type `{}` extends itself",
                node.name
            )));
        }
        hard.push(parent);
        soft.push(
            node.references
                .iter()
                .filter_map(|name| positions.get(name.as_str()).copied())
                .filter(|&target| target != i && Some(target) != parent)
                .collect(),
        );
    }

    let mut done = vec![false; nodes.len()];
    let mut order = Vec::with_capacity(nodes.len());
    while order.len() < nodes.len() {
        let ready = (0..nodes.len())
            .find(|&i| !done[i] && hard[i].is_none() && soft[i].is_empty());
        let next = match ready {
            Some(i) => i,
            None => {
                // Only reference edges can be dropped; a node still waiting
                // on its parent here means the parents form a loop.
                let breakable = (0..nodes.len()).find(|&i| !done[i] && hard[i].is_none());
                let Some(i) = breakable else {
                    let cycle: Vec<&str> = (0..nodes.len())
                        .filter(|&i| !done[i])
                        .map(|i| nodes[i].name.as_str())
                        .collect();
                    return Err(CoreError::validation(format!(
                        "entity types extend each other in a cycle: {}",
                        cycle.join(", ")
                    )));
                };
                let pending: Vec<&str> = soft[i].iter().map(|&t| nodes[t].name.as_str()).collect();
                warn!(
                    "Breaking reference cycle at {} (still waiting on {})",
                    nodes[i].name,
                    pending.join(", ")
                );
                i
            }
        };
        done[next] = true;
        order.push(next);
        for i in 0..nodes.len() {
            if hard[i] == Some(next) {
                hard[i] = None;
            }
            soft[i].remove(&next);
        }
    }
    Ok(order)
}

/// Sorts entity types so that every type follows its dependencies.
pub fn sort_entity_types(entity_types: Vec<EntityType>) -> CoreResult<Vec<EntityType>> {
    let nodes: Vec<DependencyNode> = entity_types.iter().map(DependencyNode::from).collect();
    let order = dependency_order(&nodes)?;
    let mut slots: Vec<Option<EntityType>> = entity_types.into_iter().map(Some).collect();
    Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
}
