//! Computed attributes: evaluated on read, never stored.
//!
//! Queries that filter or sort on a computed attribute cannot be pushed to
//! the backend. Those rules are evaluated in process after the stored rules
//! have narrowed the rows.

use std::collections::HashSet;

use async_trait::async_trait;

use entidb_core::{CoreResult, Entity, EntityType, Fetch, Query, QueryRule, Repository, Value};

use crate::decorator::RepositoryDecorator;
use crate::expression;

pub struct ComputedValueDecorator;

fn rule_attribute(rule: &QueryRule) -> Option<&str> {
    match rule {
        QueryRule::Eq(attribute, _)
        | QueryRule::In(attribute, _)
        | QueryRule::Like(attribute, _)
        | QueryRule::Range(attribute, _, _)
        | QueryRule::IsNull(attribute) => Some(attribute),
        QueryRule::Search(_) => None,
    }
}

fn computed_names(entity_type: &EntityType) -> HashSet<String> {
    entity_type
        .computed_attributes()
        .into_iter()
        .map(|attribute| attribute.name.clone())
        .collect()
}

/// Splits `query` into the part the backend can answer and, when needed, the
/// full query to re-apply in process.
fn split(query: &Query, computed: &HashSet<String>) -> (Query, Option<Query>) {
    let touches_computed = query
        .rules
        .iter()
        .filter_map(rule_attribute)
        .chain(query.sort.iter().map(|sort| sort.attribute.as_str()))
        .any(|name| computed.contains(name));
    if !touches_computed {
        return (query.clone(), None);
    }
    let mut stored = query.unpaged();
    stored
        .rules
        .retain(|rule| rule_attribute(rule).map_or(true, |name| !computed.contains(name)));
    (stored, Some(query.without_search()))
}

fn compute_all(entity_type: &EntityType, rows: &mut [Entity]) -> CoreResult<()> {
    let attributes = entity_type.computed_attributes();
    for row in rows.iter_mut() {
        for attribute in &attributes {
            let value = expression::evaluate(attribute, row)?;
            row.set(attribute.name.clone(), value);
        }
    }
    Ok(())
}

fn strip_computed(entities: &mut [Entity]) {
    for entity in entities.iter_mut() {
        let computed: Vec<String> = entity
            .entity_type()
            .computed_attributes()
            .into_iter()
            .map(|attribute| attribute.name.clone())
            .collect();
        for name in computed {
            entity.remove(&name);
        }
    }
}

#[async_trait]
impl RepositoryDecorator for ComputedValueDecorator {
    fn name(&self) -> &'static str {
        "computed"
    }

    async fn count(&self, next: &dyn Repository, query: &Query) -> CoreResult<u64> {
        let computed = computed_names(next.entity_type());
        match split(&query.unpaged(), &computed) {
            (stored, None) => next.count(&stored).await,
            (stored, Some(full)) => {
                let mut rows = next.find_all(&stored.fetch(Fetch::Shallow)).await?;
                compute_all(next.entity_type(), &mut rows)?;
                Ok(full.apply(rows).len() as u64)
            }
        }
    }

    async fn find_all(&self, next: &dyn Repository, query: &Query) -> CoreResult<Vec<Entity>> {
        let computed = computed_names(next.entity_type());
        let (stored, full) = split(query, &computed);
        let mut rows = next.find_all(&stored).await?;
        compute_all(next.entity_type(), &mut rows)?;
        Ok(match full {
            Some(full) => full.apply(rows),
            None => rows,
        })
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
        compute_all(next.entity_type(), &mut rows)?;
        let [row] = rows;
        Ok(Some(row))
    }

    async fn add_all(&self, next: &dyn Repository, entities: &mut [Entity]) -> CoreResult<u64> {
        strip_computed(entities);
        next.add_all(entities).await
    }

    async fn update_all(&self, next: &dyn Repository, entities: &mut [Entity]) -> CoreResult<()> {
        strip_computed(entities);
        next.update_all(entities).await
    }
}
