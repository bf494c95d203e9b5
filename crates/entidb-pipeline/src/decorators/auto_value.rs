//! Fills auto attributes and declared defaults on insert.

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use entidb_core::{Attribute, CoreResult, DataType, Entity, Repository, Value};

use crate::decorator::RepositoryDecorator;

pub struct AutoValueDecorator;

/// Generated value for an auto attribute; `None` for types that are not
/// generated.
fn generate(attribute: &Attribute) -> Option<Value> {
    match attribute.data_type {
        data_type if data_type.is_string_like() => {
            Some(Value::String(Uuid::now_v7().simple().to_string()))
        }
        DataType::Date => Some(Value::Date(Utc::now().date_naive())),
        DataType::DateTime => Some(Value::DateTime(Utc::now())),
        _ => None,
    }
}

fn fill(entity: &mut Entity) -> CoreResult<()> {
    let entity_type = entity.entity_type().clone();
    for attribute in entity_type.atomic_attributes() {
        if attribute.is_computed() {
            continue;
        }
        if attribute.auto && entity.get(&attribute.name).is_null() {
            if let Some(value) = generate(attribute) {
                entity.set(attribute.name.clone(), value);
            }
            continue;
        }
        if let Some(default) = attribute.default_value.as_deref() {
            if !entity.contains(&attribute.name) {
                entity.set(
                    attribute.name.clone(),
                    Value::parse(default, attribute.data_type)?,
                );
            }
        }
    }
    Ok(())
}

#[async_trait]
impl RepositoryDecorator for AutoValueDecorator {
    fn name(&self) -> &'static str {
        "auto-value"
    }

    async fn add_all(&self, next: &dyn Repository, entities: &mut [Entity]) -> CoreResult<u64> {
        for entity in entities.iter_mut() {
            fill(entity)?;
        }
        next.add_all(entities).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use entidb_core::EntityType;

    fn note() -> Arc<EntityType> {
        Arc::new(
            EntityType::new("note")
                .with_id_attribute(Attribute::new("id", DataType::String).required().auto())
                .with_attribute(Attribute::new("created", DataType::DateTime).auto())
                .with_attribute(Attribute::new("status", DataType::String).with_default_value("open"))
                .with_attribute(Attribute::new("priority", DataType::Int).with_default_value("3")),
        )
    }

    #[test]
    fn fills_ids_timestamps_and_defaults() {
        let mut entity = Entity::new(note()).with("status", "closed");
        fill(&mut entity).expect("fill");
        assert_eq!(entity.id_key().expect("generated id").len(), 32);
        assert!(matches!(entity.get("created"), Value::DateTime(_)));
        assert_eq!(entity.get_str("status"), Some("closed"));
        assert_eq!(entity.get_i64("priority"), Some(3));
    }

    #[test]
    fn keeps_given_ids() {
        let mut entity = Entity::new(note()).with("id", "mine");
        fill(&mut entity).expect("fill");
        assert_eq!(entity.id_key().expect("id"), "mine");
    }
}
