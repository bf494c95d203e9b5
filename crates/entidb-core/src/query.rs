//! Backend-independent query description.
//!
//! Rules are combined by conjunction. Backends either translate a [`Query`]
//! to their native form or evaluate it in process with [`Query::apply`].

use std::cmp::Ordering;

use crate::entity::Entity;
use crate::value::Value;

/// How references in query results are materialised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fetch {
    /// Hydrate reference values one level deep.
    #[default]
    Resolve,
    /// Leave references as ids.
    Shallow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    pub attribute: String,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryRule {
    Eq(String, Value),
    In(String, Vec<Value>),
    /// Case-insensitive substring match.
    Like(String, String),
    /// Inclusive bounds; either side may be open.
    Range(String, Option<Value>, Option<Value>),
    IsNull(String),
    /// Full-text search over all string-like attributes.
    Search(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    pub rules: Vec<QueryRule>,
    pub sort: Vec<Sort>,
    pub offset: usize,
    /// Maximum rows to return; `None` for no limit.
    pub page_size: Option<usize>,
    pub fetch: Fetch,
}

impl Query {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_rule(mut self, rule: QueryRule) -> Self {
        self.rules.push(rule);
        self
    }

    #[must_use]
    pub fn eq(self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with_rule(QueryRule::Eq(attribute.into(), value.into()))
    }

    #[must_use]
    pub fn in_values(self, attribute: impl Into<String>, values: Vec<Value>) -> Self {
        self.with_rule(QueryRule::In(attribute.into(), values))
    }

    #[must_use]
    pub fn like(self, attribute: impl Into<String>, text: impl Into<String>) -> Self {
        self.with_rule(QueryRule::Like(attribute.into(), text.into()))
    }

    #[must_use]
    pub fn range(self, attribute: impl Into<String>, min: Option<Value>, max: Option<Value>) -> Self {
        self.with_rule(QueryRule::Range(attribute.into(), min, max))
    }

    #[must_use]
    pub fn is_null(self, attribute: impl Into<String>) -> Self {
        self.with_rule(QueryRule::IsNull(attribute.into()))
    }

    #[must_use]
    pub fn search(self, text: impl Into<String>) -> Self {
        self.with_rule(QueryRule::Search(text.into()))
    }

    #[must_use]
    pub fn sort_by(mut self, attribute: impl Into<String>, direction: Direction) -> Self {
        self.sort.push(Sort {
            attribute: attribute.into(),
            direction,
        });
        self
    }

    #[must_use]
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    #[must_use]
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    #[must_use]
    pub fn fetch(mut self, fetch: Fetch) -> Self {
        self.fetch = fetch;
        self
    }

    /// Full-text term of the first search rule, if any.
    #[must_use]
    pub fn search_term(&self) -> Option<&str> {
        self.rules.iter().find_map(|rule| match rule {
            QueryRule::Search(text) => Some(text.as_str()),
            _ => None,
        })
    }

    /// Copy without search rules.
    #[must_use]
    pub fn without_search(&self) -> Query {
        let mut query = self.clone();
        query.rules.retain(|rule| !matches!(rule, QueryRule::Search(_)));
        query
    }

    /// Copy without sort and paging, for counting.
    #[must_use]
    pub fn unpaged(&self) -> Query {
        let mut query = self.clone();
        query.sort.clear();
        query.offset = 0;
        query.page_size = None;
        query
    }

    #[must_use]
    pub fn matches(&self, entity: &Entity) -> bool {
        self.rules.iter().all(|rule| rule_matches(rule, entity))
    }

    /// Filters, sorts and pages `entities` in process.
    #[must_use]
    pub fn apply(&self, entities: Vec<Entity>) -> Vec<Entity> {
        let mut matched: Vec<Entity> = entities.into_iter().filter(|e| self.matches(e)).collect();
        if !self.sort.is_empty() {
            matched.sort_by(|a, b| {
                for sort in &self.sort {
                    let ordering = a
                        .get(&sort.attribute)
                        .compare(b.get(&sort.attribute))
                        .unwrap_or(Ordering::Equal);
                    let ordering = match sort.direction {
                        Direction::Asc => ordering,
                        Direction::Desc => ordering.reverse(),
                    };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
        }
        let paged = matched.into_iter().skip(self.offset);
        match self.page_size {
            Some(size) => paged.take(size).collect(),
            None => paged.collect(),
        }
    }
}

fn values_equal(stored: &Value, expected: &Value) -> bool {
    match stored {
        Value::Reference(_) | Value::Entity(_) | Value::References(_) | Value::Entities(_) => {
            stored.reference_ids().iter().any(|id| id == expected)
        }
        _ => stored.compare(expected) == Some(Ordering::Equal),
    }
}

fn rule_matches(rule: &QueryRule, entity: &Entity) -> bool {
    match rule {
        QueryRule::Eq(attribute, expected) if expected.is_null() => entity.get(attribute).is_null(),
        QueryRule::Eq(attribute, expected) => values_equal(entity.get(attribute), expected),
        QueryRule::In(attribute, values) => {
            let stored = entity.get(attribute);
            values.iter().any(|value| values_equal(stored, value))
        }
        QueryRule::Like(attribute, text) => entity
            .get(attribute)
            .to_string()
            .to_lowercase()
            .contains(&text.to_lowercase()),
        QueryRule::Range(attribute, min, max) => {
            let stored = entity.get(attribute);
            if stored.is_null() {
                return false;
            }
            let above = min.as_ref().map_or(true, |min| {
                matches!(stored.compare(min), Some(Ordering::Greater | Ordering::Equal))
            });
            let below = max.as_ref().map_or(true, |max| {
                matches!(stored.compare(max), Some(Ordering::Less | Ordering::Equal))
            });
            above && below
        }
        QueryRule::IsNull(attribute) => entity.get(attribute).is_null(),
        QueryRule::Search(text) => {
            let needle = text.to_lowercase();
            entity
                .entity_type()
                .atomic_attributes()
                .iter()
                .filter(|a| a.data_type.is_string_like())
                .any(|a| entity.get(&a.name).to_string().to_lowercase().contains(&needle))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{Attribute, DataType, EntityType};

    fn rows() -> Vec<Entity> {
        let entity_type = Arc::new(
            EntityType::new("city")
                .with_id_attribute(Attribute::new("id", DataType::String).required())
                .with_attribute(Attribute::new("name", DataType::String))
                .with_attribute(Attribute::new("population", DataType::Int))
                .with_attribute(Attribute::reference("country", DataType::Xref, "country")),
        );
        let nl = Value::Reference(Box::new(Value::from("nl")));
        vec![
            Entity::new(entity_type.clone())
                .with("id", "ams")
                .with("name", "Amsterdam")
                .with("population", 900_000)
                .with("country", nl.clone()),
            Entity::new(entity_type.clone())
                .with("id", "gro")
                .with("name", "Groningen")
                .with("population", 230_000)
                .with("country", nl),
            Entity::new(entity_type)
                .with("id", "ber")
                .with("name", "Berlin")
                .with("population", 3_600_000),
        ]
    }

    #[test]
    fn conjunction_of_rules() {
        let query = Query::new()
            .eq("country", "nl")
            .range("population", Some(Value::Int(500_000)), None);
        let ids: Vec<_> = query.apply(rows()).iter().map(|e| e.id_key().expect("id")).collect();
        assert_eq!(ids, vec!["ams"]);
    }

    #[test]
    fn sorting_and_paging() {
        let query = Query::new()
            .sort_by("population", Direction::Desc)
            .offset(1)
            .page_size(1);
        let ids: Vec<_> = query.apply(rows()).iter().map(|e| e.id_key().expect("id")).collect();
        assert_eq!(ids, vec!["ams"]);
    }

    #[test]
    fn search_and_null_rules() {
        assert_eq!(Query::new().search("GRON").apply(rows()).len(), 1);
        assert_eq!(Query::new().is_null("country").apply(rows()).len(), 1);
        assert_eq!(Query::new().eq("country", Value::Null).apply(rows()).len(), 1);
        assert_eq!(Query::new().like("name", "er").apply(rows()).len(), 2);
    }

    #[test]
    fn without_search_strips_only_search_rules() {
        let query = Query::new().search("x").eq("id", "a");
        assert_eq!(query.search_term(), Some("x"));
        assert_eq!(query.without_search().rules.len(), 1);
    }
}
