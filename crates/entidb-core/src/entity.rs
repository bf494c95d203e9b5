//! Generic entity instances.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value as JsonValue};

use crate::entity_type::EntityType;
use crate::error::{CoreError, CoreResult};
use crate::value::Value;

static NULL: Value = Value::Null;

/// Attribute-keyed value container bound to its resolved [`EntityType`].
#[derive(Debug, Clone)]
pub struct Entity {
    entity_type: Arc<EntityType>,
    values: BTreeMap<String, Value>,
}

impl Entity {
    #[must_use]
    pub fn new(entity_type: Arc<EntityType>) -> Self {
        Self {
            entity_type,
            values: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn from_values(entity_type: Arc<EntityType>, values: BTreeMap<String, Value>) -> Self {
        Self {
            entity_type,
            values,
        }
    }

    /// Builder-style [`set`](Self::set).
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    #[must_use]
    pub fn entity_type(&self) -> &Arc<EntityType> {
        &self.entity_type
    }

    #[must_use]
    pub fn entity_type_name(&self) -> &str {
        &self.entity_type.name
    }

    /// Rebinds the values to a newer version of the same entity type.
    pub fn rebind(&mut self, entity_type: Arc<EntityType>) {
        self.entity_type = entity_type;
    }

    /// Value of attribute `name`, `Value::Null` when unset.
    #[must_use]
    pub fn get(&self, name: &str) -> &Value {
        self.values.get(name).unwrap_or(&NULL)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).as_str()
    }

    #[must_use]
    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).as_i64()
    }

    #[must_use]
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).as_bool()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), value.into());
    }

    /// Sets a value after checking that the attribute exists.
    pub fn try_set(&mut self, name: &str, value: impl Into<Value>) -> CoreResult<()> {
        self.entity_type.require_attribute(name)?;
        self.set(name, value);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.values.remove(name)
    }

    #[must_use]
    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut BTreeMap<String, Value> {
        &mut self.values
    }

    #[must_use]
    pub fn into_values(self) -> BTreeMap<String, Value> {
        self.values
    }

    /// Id value, or `None` when the id is unset or null.
    #[must_use]
    pub fn id(&self) -> Option<&Value> {
        let name = self.entity_type.id_attribute_name()?;
        self.values.get(name).filter(|value| !value.is_null())
    }

    /// Row key derived from the id value.
    pub fn id_key(&self) -> CoreResult<String> {
        self.id()
            .ok_or_else(|| {
                CoreError::validation(format!(
                    "entity of type `{}` has no id value",
                    self.entity_type.name
                ))
            })?
            .require_key()
    }

    pub fn set_id(&mut self, id: impl Into<Value>) -> CoreResult<()> {
        let name = self.entity_type.require_id_attribute()?.name.clone();
        self.set(name, id);
        Ok(())
    }

    #[must_use]
    pub fn label(&self) -> Option<&Value> {
        let name = self.entity_type.label_attribute_name()?;
        self.values.get(name)
    }

    /// Copy with every hydrated reference collapsed back to ids.
    #[must_use]
    pub fn dehydrated(&self) -> Entity {
        Entity {
            entity_type: self.entity_type.clone(),
            values: self
                .values
                .iter()
                .map(|(name, value)| (name.clone(), value.dehydrated()))
                .collect(),
        }
    }

    /// JSON object of the stored values, used for change-log snapshots.
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        let map: Map<String, JsonValue> = self
            .values
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect();
        JsonValue::Object(map)
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.entity_type.name == other.entity_type.name && self.values == other.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Attribute, DataType};

    fn demo() -> Arc<EntityType> {
        Arc::new(
            EntityType::new("demo")
                .with_id_attribute(Attribute::new("id", DataType::String).required())
                .with_attribute(Attribute::new("name", DataType::String)),
        )
    }

    #[test]
    fn id_and_label_resolve_through_metadata() {
        let entity = Entity::new(demo()).with("id", "a1").with("name", "Alpha");
        assert_eq!(entity.id(), Some(&Value::from("a1")));
        assert_eq!(entity.id_key().expect("key"), "a1");
        assert_eq!(entity.label(), Some(&Value::from("a1")));
        assert!(entity.get("missing").is_null());
    }

    #[test]
    fn try_set_rejects_unknown_attributes() {
        let mut entity = Entity::new(demo());
        assert!(entity.try_set("name", "x").is_ok());
        assert!(entity.try_set("nope", "x").expect_err("unknown").is_not_found());
    }

    #[test]
    fn missing_id_is_a_validation_error() {
        let entity = Entity::new(demo()).with("name", "Alpha");
        assert!(matches!(entity.id_key(), Err(CoreError::ValidationError(_))));
    }

    #[test]
    fn dehydrating_collapses_entities_to_ids() {
        let target = Entity::new(demo()).with("id", "t1");
        let entity = Entity::new(demo())
            .with("id", "a1")
            .with("name", Value::Entity(Box::new(target)));
        let stored = entity.dehydrated();
        assert_eq!(stored.get("name"), &Value::Reference(Box::new(Value::from("t1"))));
        assert_eq!(stored.to_json()["name"], serde_json::json!("t1"));
    }
}
