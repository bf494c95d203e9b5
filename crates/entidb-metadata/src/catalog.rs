//! The metadata catalog: the four entity types that describe all others, and
//! the mapping between their rows and the in-memory metadata model.
//!
//! Catalog rows are plain entities stored through the normal repository
//! pipeline. Attribute rows point at their entity type through `entity` and
//! at their compound parent through `parent`; both hold ids, never names.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use entidb_core::{
    Attribute, AttributeId, CoreError, CoreResult, DataType, Entity, EntityType, Package, Range,
    Tag, Value, ATTRIBUTE_ENTITY_TYPE, ENTITY_TYPE_ENTITY_TYPE, PACKAGE_ENTITY_TYPE,
    TAG_ENTITY_TYPE,
};

use crate::dependency::DependencyNode;
use crate::system::{SystemEntityTypeRegistry, METADATA_PACKAGE};

pub const ID: &str = "id";
pub const LABEL: &str = "label";
pub const DESCRIPTION: &str = "description";
pub const TAGS: &str = "tags";

pub const PACKAGE_PARENT: &str = "parent";

pub const TAG_RELATION_IRI: &str = "relationIri";
pub const TAG_OBJECT_IRI: &str = "objectIri";
pub const TAG_CODE_SYSTEM: &str = "codeSystem";

pub const ENTITY_TYPE_SIMPLE_NAME: &str = "simpleName";
pub const ENTITY_TYPE_PACKAGE: &str = "package";
pub const ENTITY_TYPE_BACKEND: &str = "backend";
pub const ENTITY_TYPE_ABSTRACT: &str = "isAbstract";
pub const ENTITY_TYPE_SYSTEM: &str = "isSystem";
pub const ENTITY_TYPE_ID_ATTRIBUTE: &str = "idAttribute";
pub const ENTITY_TYPE_LABEL_ATTRIBUTE: &str = "labelAttribute";
pub const ENTITY_TYPE_LOOKUP_ATTRIBUTES: &str = "lookupAttributes";
pub const ENTITY_TYPE_EXTENDS: &str = "extends";

pub const ATTRIBUTE_NAME: &str = "name";
pub const ATTRIBUTE_ENTITY: &str = "entity";
pub const ATTRIBUTE_SEQUENCE: &str = "sequenceNr";
pub const ATTRIBUTE_DATA_TYPE: &str = "dataType";
pub const ATTRIBUTE_REF_ENTITY_TYPE: &str = "refEntityType";
pub const ATTRIBUTE_PARENT: &str = "parent";
pub const ATTRIBUTE_NILLABLE: &str = "isNullable";
pub const ATTRIBUTE_AUTO: &str = "isAuto";
pub const ATTRIBUTE_VISIBLE: &str = "isVisible";
pub const ATTRIBUTE_UNIQUE: &str = "isUnique";
pub const ATTRIBUTE_READ_ONLY: &str = "isReadOnly";
pub const ATTRIBUTE_AGGREGATABLE: &str = "isAggregatable";
pub const ATTRIBUTE_RANGE_MIN: &str = "rangeMin";
pub const ATTRIBUTE_RANGE_MAX: &str = "rangeMax";
pub const ATTRIBUTE_ENUM_OPTIONS: &str = "enumOptions";
pub const ATTRIBUTE_DEFAULT_VALUE: &str = "defaultValue";
pub const ATTRIBUTE_EXPRESSION: &str = "expression";
pub const ATTRIBUTE_VALIDATION_EXPRESSION: &str = "validationExpression";
pub const ATTRIBUTE_VISIBLE_EXPRESSION: &str = "visibleExpression";

// ===== Catalog entity types =====

pub fn tag_entity_type(_: &SystemEntityTypeRegistry) -> CoreResult<EntityType> {
    Ok(EntityType::new("Tag")
        .with_package(METADATA_PACKAGE)
        .with_label("Tag")
        .with_id_attribute(Attribute::new(ID, DataType::String).required())
        .with_attribute(Attribute::new(LABEL, DataType::String).required())
        .with_attribute(Attribute::new(TAG_RELATION_IRI, DataType::Hyperlink).required())
        .with_attribute(Attribute::new(TAG_OBJECT_IRI, DataType::Hyperlink).required())
        .with_attribute(Attribute::new(TAG_CODE_SYSTEM, DataType::String))
        .with_label_attribute(LABEL))
}

pub fn package_entity_type(_: &SystemEntityTypeRegistry) -> CoreResult<EntityType> {
    Ok(EntityType::new("Package")
        .with_package(METADATA_PACKAGE)
        .with_label("Package")
        .with_id_attribute(Attribute::new(ID, DataType::String).required())
        .with_attribute(Attribute::new(LABEL, DataType::String).required())
        .with_attribute(Attribute::new(DESCRIPTION, DataType::Text))
        .with_attribute(Attribute::reference(PACKAGE_PARENT, DataType::Xref, PACKAGE_ENTITY_TYPE))
        .with_attribute(Attribute::reference(TAGS, DataType::Mref, TAG_ENTITY_TYPE))
        .with_label_attribute(LABEL))
}

pub fn entity_type_entity_type(_: &SystemEntityTypeRegistry) -> CoreResult<EntityType> {
    Ok(EntityType::new("EntityType")
        .with_package(METADATA_PACKAGE)
        .with_label("Entity type")
        .with_id_attribute(Attribute::new(ID, DataType::String).required())
        .with_attribute(Attribute::new(ENTITY_TYPE_SIMPLE_NAME, DataType::String).required())
        .with_attribute(Attribute::reference(
            ENTITY_TYPE_PACKAGE,
            DataType::Xref,
            PACKAGE_ENTITY_TYPE,
        ))
        .with_attribute(Attribute::new(ENTITY_TYPE_BACKEND, DataType::String).required())
        .with_attribute(Attribute::new(LABEL, DataType::String))
        .with_attribute(Attribute::new(DESCRIPTION, DataType::Text))
        .with_attribute(
            Attribute::new(ENTITY_TYPE_ABSTRACT, DataType::Bool)
                .required()
                .with_default_value("false"),
        )
        .with_attribute(
            Attribute::new(ENTITY_TYPE_SYSTEM, DataType::Bool)
                .required()
                .with_default_value("false"),
        )
        .with_attribute(Attribute::new(ENTITY_TYPE_ID_ATTRIBUTE, DataType::String))
        .with_attribute(Attribute::new(ENTITY_TYPE_LABEL_ATTRIBUTE, DataType::String))
        .with_attribute(Attribute::new(ENTITY_TYPE_LOOKUP_ATTRIBUTES, DataType::Text))
        .with_attribute(Attribute::reference(
            ENTITY_TYPE_EXTENDS,
            DataType::Xref,
            ENTITY_TYPE_ENTITY_TYPE,
        ))
        .with_attribute(Attribute::reference(TAGS, DataType::Mref, TAG_ENTITY_TYPE))
        .with_lookup_attribute(ENTITY_TYPE_SIMPLE_NAME))
}

pub fn attribute_entity_type(_: &SystemEntityTypeRegistry) -> CoreResult<EntityType> {
    let data_types = DataType::ALL.iter().map(DataType::as_str);
    Ok(EntityType::new("Attribute")
        .with_package(METADATA_PACKAGE)
        .with_label("Attribute")
        .with_id_attribute(Attribute::new(ID, DataType::String).required())
        .with_attribute(Attribute::new(ATTRIBUTE_NAME, DataType::String).required())
        .with_attribute(
            Attribute::reference(ATTRIBUTE_ENTITY, DataType::Xref, ENTITY_TYPE_ENTITY_TYPE)
                .required(),
        )
        .with_attribute(Attribute::new(ATTRIBUTE_SEQUENCE, DataType::Int).required())
        .with_attribute(
            Attribute::new(ATTRIBUTE_DATA_TYPE, DataType::Enum)
                .required()
                .with_enum_options(data_types),
        )
        .with_attribute(Attribute::new(ATTRIBUTE_REF_ENTITY_TYPE, DataType::String))
        .with_attribute(Attribute::reference(
            ATTRIBUTE_PARENT,
            DataType::Xref,
            ATTRIBUTE_ENTITY_TYPE,
        ))
        .with_attribute(Attribute::new(LABEL, DataType::String))
        .with_attribute(Attribute::new(DESCRIPTION, DataType::Text))
        .with_attribute(flag(ATTRIBUTE_NILLABLE, true))
        .with_attribute(flag(ATTRIBUTE_AUTO, false))
        .with_attribute(flag(ATTRIBUTE_VISIBLE, true))
        .with_attribute(flag(ATTRIBUTE_UNIQUE, false))
        .with_attribute(flag(ATTRIBUTE_READ_ONLY, false))
        .with_attribute(flag(ATTRIBUTE_AGGREGATABLE, false))
        .with_attribute(Attribute::new(ATTRIBUTE_RANGE_MIN, DataType::Long))
        .with_attribute(Attribute::new(ATTRIBUTE_RANGE_MAX, DataType::Long))
        .with_attribute(Attribute::new(ATTRIBUTE_ENUM_OPTIONS, DataType::Text))
        .with_attribute(Attribute::new(ATTRIBUTE_DEFAULT_VALUE, DataType::Text))
        .with_attribute(Attribute::new(ATTRIBUTE_EXPRESSION, DataType::Text))
        .with_attribute(Attribute::new(ATTRIBUTE_VALIDATION_EXPRESSION, DataType::Text))
        .with_attribute(Attribute::new(ATTRIBUTE_VISIBLE_EXPRESSION, DataType::Text))
        .with_attribute(Attribute::reference(TAGS, DataType::Mref, TAG_ENTITY_TYPE))
        .with_label_attribute(ATTRIBUTE_NAME))
}

fn flag(name: &str, default: bool) -> Attribute {
    Attribute::new(name, DataType::Bool)
        .required()
        .with_default_value(default.to_string())
}

// ===== Row access =====

fn text(row: &Entity, name: &str) -> Option<String> {
    row.get_str(name).map(str::to_string)
}

fn required_text(row: &Entity, name: &str) -> CoreResult<String> {
    text(row, name).ok_or_else(|| {
        CoreError::invalid_state(format!(
            "{} row `{}` has no `{name}`",
            row.entity_type_name(),
            row.id_key().unwrap_or_default()
        ))
    })
}

fn bool_or(row: &Entity, name: &str, default: bool) -> bool {
    row.get_bool(name).unwrap_or(default)
}

fn reference_key(row: &Entity, name: &str) -> Option<String> {
    row.get(name).reference_id().and_then(|id| id.key())
}

fn reference_keys(row: &Entity, name: &str) -> Vec<String> {
    row.get(name)
        .reference_ids()
        .iter()
        .filter_map(Value::key)
        .collect()
}

fn reference(id: impl Into<String>) -> Value {
    Value::Reference(Box::new(Value::String(id.into())))
}

fn references(tags: &[Tag]) -> Value {
    Value::References(tags.iter().map(|t| Value::String(t.id.clone())).collect())
}

fn optional(value: Option<&str>) -> Value {
    value.map_or(Value::Null, Value::from)
}

fn resolve_tags(ids: Vec<String>, tags: &HashMap<String, Tag>) -> CoreResult<Vec<Tag>> {
    ids.into_iter()
        .map(|id| tags.get(&id).cloned().ok_or_else(|| CoreError::not_found("tag", id)))
        .collect()
}

fn json_list(values: &[String]) -> CoreResult<Value> {
    if values.is_empty() {
        return Ok(Value::Null);
    }
    Ok(Value::String(serde_json::to_string(values)?))
}

fn parse_json_list(row: &Entity, name: &str) -> CoreResult<Vec<String>> {
    match row.get_str(name) {
        Some(json) => Ok(serde_json::from_str(json)?),
        None => Ok(Vec::new()),
    }
}

// ===== Tags =====

#[must_use]
pub fn tag_to_row(tag: &Tag, catalog: &Arc<EntityType>) -> Entity {
    Entity::new(catalog.clone())
        .with(ID, tag.id.as_str())
        .with(LABEL, tag.label.as_str())
        .with(TAG_RELATION_IRI, tag.relation_iri.as_str())
        .with(TAG_OBJECT_IRI, tag.object_iri.as_str())
        .with(TAG_CODE_SYSTEM, optional(tag.code_system.as_deref()))
}

pub fn tag_from_row(row: &Entity) -> CoreResult<Tag> {
    Ok(Tag {
        id: required_text(row, ID)?,
        label: required_text(row, LABEL)?,
        relation_iri: required_text(row, TAG_RELATION_IRI)?,
        object_iri: required_text(row, TAG_OBJECT_IRI)?,
        code_system: text(row, TAG_CODE_SYSTEM),
    })
}

// ===== Packages =====

#[must_use]
pub fn package_to_row(package: &Package, catalog: &Arc<EntityType>) -> Entity {
    Entity::new(catalog.clone())
        .with(ID, package.id.as_str())
        .with(LABEL, package.label.as_str())
        .with(DESCRIPTION, optional(package.description.as_deref()))
        .with(
            PACKAGE_PARENT,
            package.parent.as_deref().map_or(Value::Null, reference),
        )
        .with(TAGS, references(&package.tags))
}

pub fn package_from_row(row: &Entity, tags: &HashMap<String, Tag>) -> CoreResult<Package> {
    Ok(Package {
        id: required_text(row, ID)?,
        label: required_text(row, LABEL)?,
        description: text(row, DESCRIPTION),
        parent: reference_key(row, PACKAGE_PARENT),
        tags: resolve_tags(reference_keys(row, TAGS), tags)?,
    })
}

// ===== Entity types =====

pub fn entity_type_to_row(entity_type: &EntityType, catalog: &Arc<EntityType>) -> CoreResult<Entity> {
    Ok(Entity::new(catalog.clone())
        .with(ID, entity_type.name.as_str())
        .with(ENTITY_TYPE_SIMPLE_NAME, entity_type.simple_name.as_str())
        .with(
            ENTITY_TYPE_PACKAGE,
            entity_type.package.as_deref().map_or(Value::Null, reference),
        )
        .with(ENTITY_TYPE_BACKEND, entity_type.backend.as_str())
        .with(LABEL, optional(entity_type.label.as_deref()))
        .with(DESCRIPTION, optional(entity_type.description.as_deref()))
        .with(ENTITY_TYPE_ABSTRACT, entity_type.is_abstract)
        .with(ENTITY_TYPE_SYSTEM, entity_type.is_system)
        .with(ENTITY_TYPE_ID_ATTRIBUTE, optional(entity_type.id_attribute.as_deref()))
        .with(
            ENTITY_TYPE_LABEL_ATTRIBUTE,
            optional(entity_type.label_attribute.as_deref()),
        )
        .with(
            ENTITY_TYPE_LOOKUP_ATTRIBUTES,
            json_list(&entity_type.lookup_attributes)?,
        )
        .with(
            ENTITY_TYPE_EXTENDS,
            entity_type.extends_name().map_or(Value::Null, reference),
        )
        .with(TAGS, references(&entity_type.tags)))
}

/// Dependency edges of a stored entity type, read from its rows.
pub fn dependency_node(row: &Entity, attribute_rows: &[Entity]) -> CoreResult<DependencyNode> {
    let name = required_text(row, ID)?;
    let mut node = DependencyNode::new(name.clone());
    if let Some(parent) = reference_key(row, ENTITY_TYPE_EXTENDS) {
        node = node.extending(parent);
    }
    for target in attribute_rows
        .iter()
        .filter_map(|a| text(a, ATTRIBUTE_REF_ENTITY_TYPE))
        .filter(|target| *target != name)
    {
        node = node.referencing(target);
    }
    Ok(node)
}

/// Rebuilds an entity type from its row and its attribute rows.
///
/// `attribute_names` maps attribute ids to names across the whole catalog so
/// that parts whose compound is inherited still resolve. `parent` must be the
/// already-loaded type named by the row's `extends`.
pub fn entity_type_from_rows(
    row: &Entity,
    attribute_rows: &[Entity],
    tags: &HashMap<String, Tag>,
    attribute_names: &HashMap<String, String>,
    parent: Option<Arc<EntityType>>,
) -> CoreResult<EntityType> {
    let name = required_text(row, ID)?;
    let extends = reference_key(row, ENTITY_TYPE_EXTENDS);
    if extends.as_deref() != parent.as_deref().map(|p| p.name.as_str()) {
        return Err(CoreError::invalid_state(format!(
            "entity type `{name}` extends `{}` but was loaded with `{}`",
            extends.as_deref().unwrap_or("nothing"),
            parent.as_deref().map_or("nothing", |p| p.name.as_str())
        )));
    }

    let mut rows: Vec<&Entity> = attribute_rows.iter().collect();
    rows.sort_by_key(|a| a.get_i64(ATTRIBUTE_SEQUENCE).unwrap_or(i64::MAX));
    let attributes = rows
        .into_iter()
        .map(|a| attribute_from_row(a, tags, attribute_names))
        .collect::<CoreResult<Vec<_>>>()?;

    Ok(EntityType {
        simple_name: required_text(row, ENTITY_TYPE_SIMPLE_NAME)?,
        package: reference_key(row, ENTITY_TYPE_PACKAGE),
        backend: required_text(row, ENTITY_TYPE_BACKEND)?,
        label: text(row, LABEL),
        description: text(row, DESCRIPTION),
        is_abstract: bool_or(row, ENTITY_TYPE_ABSTRACT, false),
        is_system: bool_or(row, ENTITY_TYPE_SYSTEM, false),
        id_attribute: text(row, ENTITY_TYPE_ID_ATTRIBUTE),
        label_attribute: text(row, ENTITY_TYPE_LABEL_ATTRIBUTE),
        lookup_attributes: parse_json_list(row, ENTITY_TYPE_LOOKUP_ATTRIBUTES)?,
        attributes,
        extends: parent,
        tags: resolve_tags(reference_keys(row, TAGS), tags)?,
        name,
    })
}

// ===== Attributes =====

/// Catalog row for `attribute`, the `sequence`-th own attribute of `owner`.
pub fn attribute_to_row(
    owner: &EntityType,
    attribute: &Attribute,
    sequence: usize,
    catalog: &Arc<EntityType>,
) -> CoreResult<Entity> {
    let id = attribute.id.ok_or_else(|| {
        CoreError::invalid_state(format!(
            "attribute `{}.{}` has no identifier",
            owner.name, attribute.name
        ))
    })?;
    let parent = match attribute.parent.as_deref() {
        Some(parent) => {
            let compound = owner.require_attribute(parent)?;
            let parent_id = compound.id.ok_or_else(|| {
                CoreError::invalid_state(format!(
                    "compound `{}.{parent}` has no identifier",
                    owner.name
                ))
            })?;
            reference(parent_id.to_string())
        }
        None => Value::Null,
    };
    let range = attribute.range.unwrap_or(Range { min: None, max: None });
    Ok(Entity::new(catalog.clone())
        .with(ID, id.to_string())
        .with(ATTRIBUTE_NAME, attribute.name.as_str())
        .with(ATTRIBUTE_ENTITY, reference(owner.name.as_str()))
        .with(ATTRIBUTE_SEQUENCE, sequence as i64)
        .with(ATTRIBUTE_DATA_TYPE, attribute.data_type.as_str())
        .with(
            ATTRIBUTE_REF_ENTITY_TYPE,
            optional(attribute.ref_entity_type.as_deref()),
        )
        .with(ATTRIBUTE_PARENT, parent)
        .with(LABEL, optional(attribute.label.as_deref()))
        .with(DESCRIPTION, optional(attribute.description.as_deref()))
        .with(ATTRIBUTE_NILLABLE, attribute.nillable)
        .with(ATTRIBUTE_AUTO, attribute.auto)
        .with(ATTRIBUTE_VISIBLE, attribute.visible)
        .with(ATTRIBUTE_UNIQUE, attribute.unique)
        .with(ATTRIBUTE_READ_ONLY, attribute.read_only)
        .with(ATTRIBUTE_AGGREGATABLE, attribute.aggregatable)
        .with(ATTRIBUTE_RANGE_MIN, range.min.map_or(Value::Null, Value::Int))
        .with(ATTRIBUTE_RANGE_MAX, range.max.map_or(Value::Null, Value::Int))
        .with(ATTRIBUTE_ENUM_OPTIONS, json_list(&attribute.enum_options)?)
        .with(
            ATTRIBUTE_DEFAULT_VALUE,
            optional(attribute.default_value.as_deref()),
        )
        .with(ATTRIBUTE_EXPRESSION, optional(attribute.expression.as_deref()))
        .with(
            ATTRIBUTE_VALIDATION_EXPRESSION,
            optional(attribute.validation_expression.as_deref()),
        )
        .with(
            ATTRIBUTE_VISIBLE_EXPRESSION,
            optional(attribute.visible_expression.as_deref()),
        )
        .with(TAGS, references(&attribute.tags)))
}

pub fn attribute_from_row(
    row: &Entity,
    tags: &HashMap<String, Tag>,
    attribute_names: &HashMap<String, String>,
) -> CoreResult<Attribute> {
    let id = required_text(row, ID)?;
    let id = AttributeId::from_str(&id)
        .map_err(|err| CoreError::invalid_state(format!("attribute id `{id}`: {err}")))?;
    let data_type = required_text(row, ATTRIBUTE_DATA_TYPE)?;
    let data_type = DataType::from_str(&data_type).map_err(CoreError::invalid_state)?;
    let parent = match reference_key(row, ATTRIBUTE_PARENT) {
        Some(parent_id) => Some(attribute_names.get(&parent_id).cloned().ok_or_else(|| {
            CoreError::not_found("attribute", parent_id)
        })?),
        None => None,
    };
    let min = row.get_i64(ATTRIBUTE_RANGE_MIN);
    let max = row.get_i64(ATTRIBUTE_RANGE_MAX);
    Ok(Attribute {
        id: Some(id),
        name: required_text(row, ATTRIBUTE_NAME)?,
        label: text(row, LABEL),
        description: text(row, DESCRIPTION),
        data_type,
        ref_entity_type: text(row, ATTRIBUTE_REF_ENTITY_TYPE),
        parent,
        nillable: bool_or(row, ATTRIBUTE_NILLABLE, true),
        auto: bool_or(row, ATTRIBUTE_AUTO, false),
        visible: bool_or(row, ATTRIBUTE_VISIBLE, true),
        unique: bool_or(row, ATTRIBUTE_UNIQUE, false),
        read_only: bool_or(row, ATTRIBUTE_READ_ONLY, false),
        aggregatable: bool_or(row, ATTRIBUTE_AGGREGATABLE, false),
        range: (min.is_some() || max.is_some()).then_some(Range { min, max }),
        enum_options: parse_json_list(row, ATTRIBUTE_ENUM_OPTIONS)?,
        default_value: text(row, ATTRIBUTE_DEFAULT_VALUE),
        expression: text(row, ATTRIBUTE_EXPRESSION),
        validation_expression: text(row, ATTRIBUTE_VALIDATION_EXPRESSION),
        visible_expression: text(row, ATTRIBUTE_VISIBLE_EXPRESSION),
        tags: resolve_tags(reference_keys(row, TAGS), tags)?,
    })
}

/// Name of the parent type of a stored entity type.
#[must_use]
pub fn entity_type_extends(row: &Entity) -> Option<String> {
    reference_key(row, ENTITY_TYPE_EXTENDS)
}

/// Id key of the entity type an attribute row belongs to.
#[must_use]
pub fn attribute_owner(row: &Entity) -> Option<String> {
    reference_key(row, ATTRIBUTE_ENTITY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::SystemEntityTypeRegistry;

    fn catalog(name: &str) -> Arc<EntityType> {
        SystemEntityTypeRegistry::with_builtins("memory")
            .expect("builtins")
            .get_system_entity(name)
            .expect("catalog type")
    }

    fn person() -> EntityType {
        EntityType::new("person")
            .with_package("base")
            .with_label("Person")
            .with_id_attribute(
                Attribute::new("id", DataType::String)
                    .required()
                    .with_id(AttributeId::new()),
            )
            .with_attribute(Attribute::new("address", DataType::Compound).with_id(AttributeId::new()))
            .with_attribute(
                Attribute::new("street", DataType::String)
                    .with_parent("address")
                    .with_id(AttributeId::new()),
            )
            .with_attribute(
                Attribute::new("size", DataType::Enum)
                    .with_enum_options(["s", "m", "l"])
                    .with_id(AttributeId::new()),
            )
            .with_lookup_attribute("street")
            .with_tag(Tag::new("t1", "Tag one", "http://rel", "http://obj"))
    }

    #[test]
    fn entity_types_survive_their_rows() {
        let person = person();
        let type_catalog = catalog(ENTITY_TYPE_ENTITY_TYPE);
        let attribute_catalog = catalog(ATTRIBUTE_ENTITY_TYPE);

        let row = entity_type_to_row(&person, &type_catalog).expect("type row");
        let attribute_rows: Vec<Entity> = person
            .attributes
            .iter()
            .enumerate()
            .map(|(i, a)| attribute_to_row(&person, a, i, &attribute_catalog))
            .collect::<CoreResult<_>>()
            .expect("attribute rows");
        assert_eq!(
            attribute_owner(&attribute_rows[0]).as_deref(),
            Some("base_person")
        );

        let names: HashMap<String, String> = person
            .attributes
            .iter()
            .filter_map(|a| a.id.map(|id| (id.to_string(), a.name.clone())))
            .collect();
        let tags: HashMap<String, Tag> = person.tags.iter().map(|t| (t.id.clone(), t.clone())).collect();

        let mut shuffled = attribute_rows.clone();
        shuffled.reverse();
        let loaded = entity_type_from_rows(&row, &shuffled, &tags, &names, None).expect("load");
        assert!(loaded.structurally_eq(&person));
        assert_eq!(loaded.attributes[2].parent.as_deref(), Some("address"));
        assert_eq!(loaded.attributes[0].id, person.attributes[0].id);
    }

    #[test]
    fn dependency_nodes_come_from_rows() {
        let city = EntityType::new("city")
            .with_id_attribute(
                Attribute::new("id", DataType::String)
                    .required()
                    .with_id(AttributeId::new()),
            )
            .with_attribute(
                Attribute::reference("country", DataType::Xref, "country").with_id(AttributeId::new()),
            );
        let row = entity_type_to_row(&city, &catalog(ENTITY_TYPE_ENTITY_TYPE)).expect("row");
        let attribute_catalog = catalog(ATTRIBUTE_ENTITY_TYPE);
        let attribute_rows: Vec<Entity> = city
            .attributes
            .iter()
            .enumerate()
            .map(|(i, a)| attribute_to_row(&city, a, i, &attribute_catalog).expect("row"))
            .collect();
        let node = dependency_node(&row, &attribute_rows).expect("node");
        assert_eq!(node, DependencyNode::new("city").referencing("country"));
    }

    #[test]
    fn packages_and_tags_map_both_ways() {
        let tag = Tag::new("t1", "Tag one", "http://rel", "http://obj").with_code_system("snomed");
        let tag_row = tag_to_row(&tag, &catalog(TAG_ENTITY_TYPE));
        assert_eq!(tag_from_row(&tag_row).expect("tag"), tag);

        let package = Package::new("base_sub")
            .with_parent("base")
            .with_description("sub package");
        let package_row = package_to_row(&package, &catalog(PACKAGE_ENTITY_TYPE));
        let loaded = package_from_row(&package_row, &HashMap::new()).expect("package");
        assert_eq!(loaded, package);
    }

    #[test]
    fn attributes_without_identifiers_are_rejected() {
        let person = EntityType::new("person")
            .with_id_attribute(Attribute::new("id", DataType::String).required());
        let err = attribute_to_row(&person, &person.attributes[0], 0, &catalog(ATTRIBUTE_ENTITY_TYPE))
            .expect_err("no id");
        assert!(matches!(err, CoreError::InvalidState { .. }));
    }
}
