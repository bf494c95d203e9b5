//! Attribute-level comparison of a stored entity type with its replacement.

use std::collections::HashMap;

use entidb_core::{Attribute, CoreError, CoreResult, EntityType};

/// How an update changes an entity type.
#[derive(Debug, Default, Clone)]
pub struct EntityTypeDiff {
    /// New attributes, parts before their compound.
    pub added: Vec<Attribute>,
    pub removed: Vec<Attribute>,
    /// `(stored, updated)` pairs whose definition or position changed.
    pub changed: Vec<(Attribute, Attribute)>,
    pub unchanged: Vec<Attribute>,
    /// Anything outside the attribute list changed.
    pub entity_changed: bool,
}

impl EntityTypeDiff {
    /// Whether applying the update would write anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.changed.is_empty()
            && !self.entity_changed
    }
}

/// Copies identifiers of attributes that keep their name from `stored` into
/// `updated`.
pub fn carry_identifiers(stored: &EntityType, updated: &mut EntityType) {
    let ids: HashMap<&str, _> = stored
        .attributes
        .iter()
        .filter_map(|a| a.id.map(|id| (a.name.as_str(), id)))
        .collect();
    for attribute in &mut updated.attributes {
        if let Some(id) = ids.get(attribute.name.as_str()) {
            attribute.id = Some(*id);
        }
    }
}

fn without_attributes(entity_type: &EntityType) -> EntityType {
    let mut copy = entity_type.clone();
    copy.attributes.clear();
    copy
}

/// Partitions the own attributes of `stored` and `updated` by name.
#[must_use]
pub fn diff(stored: &EntityType, updated: &EntityType) -> EntityTypeDiff {
    let stored_positions: HashMap<&str, usize> = stored
        .attributes
        .iter()
        .enumerate()
        .map(|(i, a)| (a.name.as_str(), i))
        .collect();

    let mut result = EntityTypeDiff {
        entity_changed: !without_attributes(stored).structurally_eq(&without_attributes(updated)),
        ..EntityTypeDiff::default()
    };
    for attribute in updated.attributes_post_order() {
        let position = updated
            .attributes
            .iter()
            .position(|a| a.name == attribute.name);
        match stored_positions.get(attribute.name.as_str()) {
            None => result.added.push(attribute.clone()),
            Some(&i) => {
                let before = &stored.attributes[i];
                if before.structurally_eq(attribute) && position == Some(i) {
                    result.unchanged.push(attribute.clone());
                } else {
                    result.changed.push((before.clone(), attribute.clone()));
                }
            }
        }
    }
    result.removed = stored
        .attributes
        .iter()
        .filter(|a| updated.own_attribute(&a.name).is_none())
        .cloned()
        .collect();
    result
}

/// Rejects updates that cannot be applied to existing storage.
///
/// `allow_removal` is only set while reconciling a system type with its
/// compiled-in definition or for an explicit attribute deletion.
pub fn check_update(
    stored: &EntityType,
    updated: &EntityType,
    diff: &EntityTypeDiff,
    allow_removal: bool,
) -> CoreResult<()> {
    let reject = |message: String| Err(CoreError::schema_change(&stored.name, message));

    if !allow_removal {
        if let Some(attribute) = diff.removed.first() {
            return reject(format!(
                "attribute `{}` cannot be removed by an update; delete it explicitly",
                attribute.name
            ));
        }
    }
    if stored.id_attribute_name() != updated.id_attribute_name() {
        return reject(format!(
            "id attribute cannot change from `{}` to `{}`",
            stored.id_attribute_name().unwrap_or("none"),
            updated.id_attribute_name().unwrap_or("none")
        ));
    }
    if stored.backend != updated.backend {
        return reject(format!(
            "backend cannot change from `{}` to `{}`",
            stored.backend, updated.backend
        ));
    }
    if stored.is_abstract != updated.is_abstract {
        return reject("abstract flag cannot change".to_string());
    }
    if stored.extends_name() != updated.extends_name() {
        return reject(format!(
            "parent cannot change from `{}` to `{}`",
            stored.extends_name().unwrap_or("none"),
            updated.extends_name().unwrap_or("none")
        ));
    }
    for (before, after) in &diff.changed {
        if !before.data_type.can_change_to(after.data_type) {
            return reject(format!(
                "attribute `{}` cannot change type from `{}` to `{}`",
                after.name, before.data_type, after.data_type
            ));
        }
        if before.is_computed() != after.is_computed() {
            return reject(format!(
                "attribute `{}` cannot switch between stored and computed",
                after.name
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use entidb_core::{AttributeId, DataType};

    fn stored() -> EntityType {
        EntityType::new("demo")
            .with_id_attribute(
                Attribute::new("id", DataType::String)
                    .required()
                    .with_id(AttributeId::new()),
            )
            .with_attribute(Attribute::new("name", DataType::String).with_id(AttributeId::new()))
            .with_attribute(Attribute::new("age", DataType::Int).with_id(AttributeId::new()))
    }

    fn updated() -> EntityType {
        EntityType::new("demo")
            .with_id_attribute(Attribute::new("id", DataType::String).required())
            .with_attribute(Attribute::new("name", DataType::Text))
            .with_attribute(Attribute::new("age", DataType::Int))
    }

    #[test]
    fn identifiers_follow_names() {
        let stored = stored();
        let mut updated = updated().with_attribute(Attribute::new("email", DataType::Email));
        carry_identifiers(&stored, &mut updated);
        assert_eq!(updated.attributes[1].id, stored.attributes[1].id);
        assert!(updated.attributes[3].id.is_none());
    }

    #[test]
    fn partitions_attributes() {
        let stored = stored();
        let mut updated = updated().with_attribute(Attribute::new("email", DataType::Email));
        carry_identifiers(&stored, &mut updated);
        let diff = diff(&stored, &updated);
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.changed.len(), 1);
        assert_eq!(diff.changed[0].1.name, "name");
        assert_eq!(diff.unchanged.len(), 2);
        assert!(diff.removed.is_empty());
        assert!(!diff.entity_changed);
        check_update(&stored, &updated, &diff, false).expect("string to text is compatible");
    }

    #[test]
    fn identical_types_have_an_empty_diff() {
        let stored = stored();
        let mut updated = stored.clone();
        for attribute in &mut updated.attributes {
            attribute.id = None;
        }
        carry_identifiers(&stored, &mut updated);
        assert!(diff(&stored, &updated).is_empty());
    }

    #[test]
    fn removal_is_rejected_unless_allowed() {
        let stored = stored();
        let mut updated = EntityType::new("demo")
            .with_id_attribute(Attribute::new("id", DataType::String).required())
            .with_attribute(Attribute::new("name", DataType::String));
        carry_identifiers(&stored, &mut updated);
        let diff = diff(&stored, &updated);
        assert_eq!(diff.removed.len(), 1);
        let err = check_update(&stored, &updated, &diff, false).expect_err("removal");
        assert!(matches!(err, CoreError::SchemaChange { .. }));
        check_update(&stored, &updated, &diff, true).expect("reconciliation may remove");
    }

    #[test]
    fn incompatible_type_changes_are_rejected() {
        let stored = stored();
        let mut updated = EntityType::new("demo")
            .with_id_attribute(Attribute::new("id", DataType::String).required())
            .with_attribute(Attribute::new("name", DataType::String))
            .with_attribute(Attribute::new("age", DataType::Bool));
        carry_identifiers(&stored, &mut updated);
        let diff = diff(&stored, &updated);
        assert!(check_update(&stored, &updated, &diff, false).is_err());
    }

    #[test]
    fn structural_fields_are_fixed() {
        let stored = stored();
        let moved = stored.clone().with_backend("sqlite");
        let diff = diff(&stored, &moved);
        assert!(diff.entity_changed);
        assert!(check_update(&stored, &moved, &diff, false).is_err());

        let flipped = stored.clone().abstract_type();
        assert!(check_update(&stored, &flipped, &super::diff(&stored, &flipped), false).is_err());
    }
}
