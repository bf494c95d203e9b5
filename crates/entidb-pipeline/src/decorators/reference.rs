//! Hydrates reference values one level deep on reads and collapses them back
//! to ids on writes.

use std::collections::{BTreeMap, HashMap};
use std::sync::Weak;

use async_trait::async_trait;
use tracing::debug;

use entidb_core::{
    Attribute, CoreError, CoreResult, Entity, Fetch, Query, Repository, RepositoryProvider, Value,
};

use crate::decorator::RepositoryDecorator;

pub struct ReferenceResolutionDecorator {
    provider: Weak<dyn RepositoryProvider>,
}

impl ReferenceResolutionDecorator {
    pub fn new(provider: Weak<dyn RepositoryProvider>) -> Self {
        Self { provider }
    }

    /// Loads the targets of `attribute` for every row, keyed by id.
    /// Returns `None` when the target repository is not readable.
    async fn load_targets(
        &self,
        attribute: &Attribute,
        rows: &[Entity],
    ) -> CoreResult<Option<HashMap<String, Entity>>> {
        let Some(target) = attribute.ref_entity_type.as_deref() else {
            return Ok(None);
        };
        let mut ids: BTreeMap<String, Value> = BTreeMap::new();
        for row in rows {
            for id in row.get(&attribute.name).reference_ids() {
                if let Some(key) = id.key() {
                    ids.entry(key).or_insert(id);
                }
            }
        }
        if ids.is_empty() {
            return Ok(None);
        }

        let provider = self
            .provider
            .upgrade()
            .ok_or_else(|| CoreError::invalid_state("repository registry is gone"))?;
        let repository = provider.repository(target)?;
        let id_attribute = repository.entity_type().require_id_attribute()?.name.clone();
        let query = Query::new()
            .in_values(id_attribute, ids.into_values().collect())
            .fetch(Fetch::Shallow);
        let targets = match repository.find_all(&query).await {
            Ok(targets) => targets,
            Err(CoreError::PermissionDenied { .. }) => {
                debug!("Leaving {} references unresolved: not readable", target);
                return Ok(None);
            }
            Err(err) => return Err(err),
        };
        Ok(Some(
            targets
                .into_iter()
                .filter_map(|entity| entity.id_key().ok().map(|key| (key, entity)))
                .collect(),
        ))
    }

    async fn resolve(&self, next: &dyn Repository, rows: &mut [Entity]) -> CoreResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let entity_type = next.entity_type().clone();
        for attribute in entity_type.reference_attributes() {
            let Some(targets) = self.load_targets(attribute, rows).await? else {
                continue;
            };
            for row in rows.iter_mut() {
                if let Some(resolved) = hydrate(row.get(&attribute.name), &targets) {
                    row.set(attribute.name.clone(), resolved);
                }
            }
        }
        Ok(())
    }
}

/// Hydrated form of `value`; `None` keeps the stored ids, which happens when
/// any referenced row is missing.
fn hydrate(value: &Value, targets: &HashMap<String, Entity>) -> Option<Value> {
    let lookup = |id: &Value| id.key().and_then(|key| targets.get(&key)).cloned();
    match value {
        Value::Reference(id) => lookup(id).map(|entity| Value::Entity(Box::new(entity))),
        Value::References(ids) => ids
            .iter()
            .map(lookup)
            .collect::<Option<Vec<Entity>>>()
            .map(Value::Entities),
        _ => None,
    }
}

fn dehydrate_all(entities: &mut [Entity]) {
    for entity in entities.iter_mut() {
        *entity = entity.dehydrated();
    }
}

#[async_trait]
impl RepositoryDecorator for ReferenceResolutionDecorator {
    fn name(&self) -> &'static str {
        "reference-resolution"
    }

    async fn find_all(&self, next: &dyn Repository, query: &Query) -> CoreResult<Vec<Entity>> {
        let mut rows = next.find_all(query).await?;
        if query.fetch == Fetch::Resolve {
            self.resolve(next, &mut rows).await?;
        }
        Ok(rows)
    }

    async fn find_one_by_id(
        &self,
        next: &dyn Repository,
        id: &Value,
        fetch: Fetch,
    ) -> CoreResult<Option<Entity>> {
        let Some(row) = next.find_one_by_id(id, fetch).await? else {
            return Ok(None);
        };
        let mut rows = [row];
        if fetch == Fetch::Resolve {
            self.resolve(next, &mut rows).await?;
        }
        let [row] = rows;
        Ok(Some(row))
    }

    async fn add_all(&self, next: &dyn Repository, entities: &mut [Entity]) -> CoreResult<u64> {
        dehydrate_all(entities);
        next.add_all(entities).await
    }

    async fn update_all(&self, next: &dyn Repository, entities: &mut [Entity]) -> CoreResult<()> {
        dehydrate_all(entities);
        next.update_all(entities).await
    }
}
