//! Entity type metadata.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use crate::attribute::Attribute;
use crate::error::{CoreError, CoreResult};
use crate::tag::Tag;

/// Abstract system entity type that gives rows an owner.
pub const OWNED_ENTITY_TYPE: &str = "sys_sec_Owned";
/// Attribute of [`OWNED_ENTITY_TYPE`] holding the owner's username.
pub const OWNER_ATTRIBUTE: &str = "ownerUsername";
/// Backend used when an entity type does not name one.
pub const DEFAULT_BACKEND: &str = "memory";

/// Catalog entity type holding package rows.
pub const PACKAGE_ENTITY_TYPE: &str = "sys_md_Package";
/// Catalog entity type holding tag rows.
pub const TAG_ENTITY_TYPE: &str = "sys_md_Tag";
/// Catalog entity type holding one row per entity type.
pub const ENTITY_TYPE_ENTITY_TYPE: &str = "sys_md_EntityType";
/// Catalog entity type holding one row per attribute.
pub const ATTRIBUTE_ENTITY_TYPE: &str = "sys_md_Attribute";
/// The catalog types, in the order they are provisioned.
pub const CATALOG_ENTITY_TYPES: [&str; 4] = [
    PACKAGE_ENTITY_TYPE,
    TAG_ENTITY_TYPE,
    ENTITY_TYPE_ENTITY_TYPE,
    ATTRIBUTE_ENTITY_TYPE,
];

/// Whether `name` is one of the metadata catalog types.
#[must_use]
pub fn is_catalog_type(name: &str) -> bool {
    CATALOG_ENTITY_TYPES.contains(&name)
}

/// Schema description of one kind of stored entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityType {
    /// Fully-qualified name, unique across all backends.
    pub name: String,
    pub simple_name: String,
    pub package: Option<String>,
    pub backend: String,
    pub label: Option<String>,
    pub description: Option<String>,
    pub is_abstract: bool,
    pub is_system: bool,
    /// Name of the id attribute; inherited from `extends` when unset.
    pub id_attribute: Option<String>,
    pub label_attribute: Option<String>,
    pub lookup_attributes: Vec<String>,
    /// Own attributes in declaration order, compound parts included.
    pub attributes: Vec<Attribute>,
    pub extends: Option<Arc<EntityType>>,
    pub tags: Vec<Tag>,
}

impl EntityType {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            simple_name: name.clone(),
            name,
            package: None,
            backend: DEFAULT_BACKEND.to_string(),
            label: None,
            description: None,
            is_abstract: false,
            is_system: false,
            id_attribute: None,
            label_attribute: None,
            lookup_attributes: Vec::new(),
            attributes: Vec::new(),
            extends: None,
            tags: Vec::new(),
        }
    }

    /// Places the type in `package`, making the name `<package>_<simple name>`.
    #[must_use]
    pub fn with_package(mut self, package: impl Into<String>) -> Self {
        let package = package.into();
        self.name = format!("{package}_{}", self.simple_name);
        self.package = Some(package);
        self
    }

    #[must_use]
    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = backend.into();
        self
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn abstract_type(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    #[must_use]
    pub fn system(mut self) -> Self {
        self.is_system = true;
        self
    }

    #[must_use]
    pub fn extending(mut self, parent: Arc<EntityType>) -> Self {
        self.extends = Some(parent);
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Adds `attribute` and makes it the id attribute.
    #[must_use]
    pub fn with_id_attribute(mut self, attribute: Attribute) -> Self {
        self.id_attribute = Some(attribute.name.clone());
        self.attributes.push(attribute);
        self
    }

    #[must_use]
    pub fn with_label_attribute(mut self, name: impl Into<String>) -> Self {
        self.label_attribute = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_lookup_attribute(mut self, name: impl Into<String>) -> Self {
        self.lookup_attributes.push(name.into());
        self
    }

    #[must_use]
    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.tags.push(tag);
        self
    }

    /// Name of the parent type, if any.
    #[must_use]
    pub fn extends_name(&self) -> Option<&str> {
        self.extends.as_deref().map(|parent| parent.name.as_str())
    }

    /// Parent chain, nearest first.
    #[must_use]
    pub fn ancestors(&self) -> Vec<&EntityType> {
        let mut ancestors = Vec::new();
        let mut cursor = self.extends.as_deref();
        while let Some(parent) = cursor {
            ancestors.push(parent);
            cursor = parent.extends.as_deref();
        }
        ancestors
    }

    #[must_use]
    pub fn is_descendant_of(&self, name: &str) -> bool {
        self.ancestors().iter().any(|ancestor| ancestor.name == name)
    }

    /// Rows carry an owner and are filtered per principal.
    #[must_use]
    pub fn is_owned(&self) -> bool {
        self.name == OWNED_ENTITY_TYPE || self.is_descendant_of(OWNED_ENTITY_TYPE)
    }

    #[must_use]
    pub fn own_attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Inherited attributes first, then own attributes.
    #[must_use]
    pub fn all_attributes(&self) -> Vec<&Attribute> {
        let mut attributes: Vec<&Attribute> = match self.extends.as_deref() {
            Some(parent) => parent.all_attributes(),
            None => Vec::new(),
        };
        attributes.extend(self.attributes.iter());
        attributes
    }

    /// Case-sensitive lookup across inherited and own attributes.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .or_else(|| self.extends.as_deref().and_then(|p| p.attribute(name)))
    }

    pub fn require_attribute(&self, name: &str) -> CoreResult<&Attribute> {
        self.attribute(name)
            .ok_or_else(|| CoreError::unknown_attribute(&self.name, name))
    }

    #[must_use]
    pub fn own_attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    #[must_use]
    pub fn id_attribute_name(&self) -> Option<&str> {
        self.id_attribute
            .as_deref()
            .or_else(|| self.extends.as_deref().and_then(EntityType::id_attribute_name))
    }

    #[must_use]
    pub fn id_attribute(&self) -> Option<&Attribute> {
        self.id_attribute_name().and_then(|name| self.attribute(name))
    }

    /// Like [`id_attribute`](Self::id_attribute) but fails for types without one.
    pub fn require_id_attribute(&self) -> CoreResult<&Attribute> {
        self.id_attribute().ok_or_else(|| {
            CoreError::invalid_state(format!("entity type `{}` has no id attribute", self.name))
        })
    }

    #[must_use]
    pub fn label_attribute_name(&self) -> Option<&str> {
        self.label_attribute
            .as_deref()
            .or_else(|| self.extends.as_deref().and_then(EntityType::label_attribute_name))
            .or_else(|| self.id_attribute_name())
    }

    /// All attributes that hold a value (compound groupings excluded).
    #[must_use]
    pub fn atomic_attributes(&self) -> Vec<&Attribute> {
        self.all_attributes()
            .into_iter()
            .filter(|a| !a.is_compound())
            .collect()
    }

    /// Attributes backed by physical storage.
    #[must_use]
    pub fn persistent_attributes(&self) -> Vec<&Attribute> {
        self.all_attributes()
            .into_iter()
            .filter(|a| a.is_persistent())
            .collect()
    }

    #[must_use]
    pub fn reference_attributes(&self) -> Vec<&Attribute> {
        self.all_attributes()
            .into_iter()
            .filter(|a| a.is_reference() && !a.is_computed())
            .collect()
    }

    #[must_use]
    pub fn computed_attributes(&self) -> Vec<&Attribute> {
        self.all_attributes()
            .into_iter()
            .filter(|a| a.is_computed())
            .collect()
    }

    #[must_use]
    pub fn auto_attributes(&self) -> Vec<&Attribute> {
        self.all_attributes()
            .into_iter()
            .filter(|a| a.auto && !a.is_computed())
            .collect()
    }

    /// Direct parts of compound attribute `name`.
    #[must_use]
    pub fn children_of(&self, name: &str) -> Vec<&Attribute> {
        self.all_attributes()
            .into_iter()
            .filter(|a| a.parent.as_deref() == Some(name))
            .collect()
    }

    /// Own attribute `name` and every part nested below it.
    #[must_use]
    pub fn subtree(&self, name: &str) -> Vec<&Attribute> {
        let mut collected = Vec::new();
        let mut pending = vec![name.to_string()];
        while let Some(current) = pending.pop() {
            if let Some(attribute) = self.own_attribute(&current) {
                collected.push(attribute);
            }
            for child in self.attributes.iter().filter(|a| a.parent.as_deref() == Some(&current)) {
                pending.push(child.name.clone());
            }
        }
        collected
    }

    /// Own attributes ordered so that parts come before their compound parent.
    #[must_use]
    pub fn attributes_post_order(&self) -> Vec<&Attribute> {
        fn visit<'a>(
            entity_type: &'a EntityType,
            attribute: &'a Attribute,
            visited: &mut HashSet<&'a str>,
            ordered: &mut Vec<&'a Attribute>,
        ) {
            if !visited.insert(attribute.name.as_str()) {
                return;
            }
            for child in entity_type
                .attributes
                .iter()
                .filter(|a| a.parent.as_deref() == Some(attribute.name.as_str()))
            {
                visit(entity_type, child, visited, ordered);
            }
            ordered.push(attribute);
        }

        let mut visited = HashSet::new();
        let mut ordered = Vec::with_capacity(self.attributes.len());
        let roots = self.attributes.iter().filter(|a| {
            a.parent
                .as_deref()
                .map_or(true, |parent| self.own_attribute(parent).is_none())
        });
        for root in roots {
            visit(self, root, &mut visited, &mut ordered);
        }
        ordered
    }

    /// Entity types this one needs to exist first: its parent and every
    /// reference target other than itself.
    #[must_use]
    pub fn dependencies(&self) -> BTreeSet<String> {
        let mut dependencies: BTreeSet<String> = self
            .attributes
            .iter()
            .filter_map(|a| a.ref_entity_type.clone())
            .collect();
        if let Some(parent) = self.extends_name() {
            dependencies.insert(parent.to_string());
        }
        dependencies.remove(&self.name);
        dependencies
    }

    /// Compares shape while ignoring attribute identifiers and the system flag.
    #[must_use]
    pub fn structurally_eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.simple_name == other.simple_name
            && self.package == other.package
            && self.backend == other.backend
            && self.label == other.label
            && self.description == other.description
            && self.is_abstract == other.is_abstract
            && self.id_attribute == other.id_attribute
            && self.label_attribute == other.label_attribute
            && self.lookup_attributes == other.lookup_attributes
            && self.extends_name() == other.extends_name()
            && self.tags == other.tags
            && self.attributes.len() == other.attributes.len()
            && self
                .attributes
                .iter()
                .zip(&other.attributes)
                .all(|(a, b)| a.structurally_eq(b))
    }

    /// Checks naming, the attribute tree and the id/label/lookup declarations.
    pub fn validate(&self) -> CoreResult<()> {
        validate_name(&self.name)?;
        if let Some(parent) = self.extends.as_deref() {
            if !parent.is_abstract {
                return Err(CoreError::validation(format!(
                    "entity type `{}` extends non-abstract `{}`",
                    self.name, parent.name
                )));
            }
            if parent.backend != self.backend {
                return Err(CoreError::validation(format!(
                    "entity type `{}` uses backend `{}` but its parent `{}` uses `{}`",
                    self.name, self.backend, parent.name, parent.backend
                )));
            }
        }

        let all = self.all_attributes();
        let mut names = HashSet::new();
        for attribute in &all {
            validate_name(&attribute.name)?;
            if !names.insert(attribute.name.as_str()) {
                return Err(CoreError::validation(format!(
                    "duplicate attribute `{}` in entity type `{}`",
                    attribute.name, self.name
                )));
            }
        }

        let by_name: HashMap<&str, &Attribute> = all.iter().map(|a| (a.name.as_str(), *a)).collect();
        for attribute in &self.attributes {
            self.validate_attribute(attribute, &by_name)?;
        }

        match self.id_attribute() {
            Some(id) => {
                if id.nillable {
                    return Err(self.invalid(format!("id attribute `{}` must not be nillable", id.name)));
                }
                if !id.data_type.is_valid_id_type() {
                    return Err(self.invalid(format!(
                        "id attribute `{}` has unsupported type `{}`",
                        id.name, id.data_type
                    )));
                }
                if id.is_computed() {
                    return Err(self.invalid(format!("id attribute `{}` must be stored", id.name)));
                }
            }
            None if self.id_attribute_name().is_some() => {
                return Err(self.invalid(format!(
                    "id attribute `{}` is not an attribute",
                    self.id_attribute_name().unwrap_or_default()
                )));
            }
            None if !self.is_abstract => {
                return Err(self.invalid("non-abstract entity type requires an id attribute"));
            }
            None => {}
        }

        if let Some(label) = self.label_attribute.as_deref() {
            if self.attribute(label).is_none() {
                return Err(self.invalid(format!("label attribute `{label}` is not an attribute")));
            }
        }
        for lookup in &self.lookup_attributes {
            if self.attribute(lookup).is_none() {
                return Err(self.invalid(format!("lookup attribute `{lookup}` is not an attribute")));
            }
        }
        Ok(())
    }

    fn validate_attribute(
        &self,
        attribute: &Attribute,
        by_name: &HashMap<&str, &Attribute>,
    ) -> CoreResult<()> {
        if attribute.is_reference() && attribute.ref_entity_type.is_none() {
            return Err(self.invalid(format!(
                "reference attribute `{}` has no referenced entity type",
                attribute.name
            )));
        }
        if !attribute.is_reference() && attribute.ref_entity_type.is_some() {
            return Err(self.invalid(format!(
                "attribute `{}` of type `{}` cannot reference an entity type",
                attribute.name, attribute.data_type
            )));
        }
        if attribute.data_type == crate::DataType::Enum && attribute.enum_options.is_empty() {
            return Err(self.invalid(format!("enum attribute `{}` has no options", attribute.name)));
        }
        if let Some(range) = attribute.range {
            if !matches!(
                attribute.data_type,
                crate::DataType::Int | crate::DataType::Long | crate::DataType::Decimal
            ) {
                return Err(self.invalid(format!(
                    "range on non-numeric attribute `{}`",
                    attribute.name
                )));
            }
            if let (Some(min), Some(max)) = (range.min, range.max) {
                if min > max {
                    return Err(self.invalid(format!("empty range on `{}`", attribute.name)));
                }
            }
        }

        // Walk the parent chain; any revisit means the part tree has a cycle.
        let mut seen = HashSet::from([attribute.name.as_str()]);
        let mut cursor = attribute.parent.as_deref();
        while let Some(parent) = cursor {
            let parent_attribute = by_name.get(parent).ok_or_else(|| {
                self.invalid(format!(
                    "attribute `{}` has unknown parent `{parent}`",
                    attribute.name
                ))
            })?;
            if !parent_attribute.is_compound() {
                return Err(self.invalid(format!(
                    "parent `{parent}` of attribute `{}` is not compound",
                    attribute.name
                )));
            }
            if !seen.insert(parent) {
                return Err(self.invalid(format!(
                    "attribute `{}` is part of a compound cycle",
                    attribute.name
                )));
            }
            cursor = parent_attribute.parent.as_deref();
        }
        Ok(())
    }

    fn invalid(&self, message: impl AsRef<str>) -> CoreError {
        CoreError::validation(format!("entity type `{}`: {}", self.name, message.as_ref()))
    }
}

/// Names start with a letter and continue with letters, digits or `_`.
pub fn validate_name(name: &str) -> CoreResult<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid && name.len() <= 255 {
        Ok(())
    } else {
        Err(CoreError::validation(format!("invalid name `{name}`")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DataType;

    fn person() -> EntityType {
        EntityType::new("person")
            .with_package("base")
            .with_id_attribute(Attribute::new("id", DataType::String).required())
            .with_attribute(Attribute::new("address", DataType::Compound))
            .with_attribute(Attribute::new("street", DataType::String).with_parent("address"))
            .with_attribute(Attribute::new("city", DataType::String).with_parent("address"))
            .with_label_attribute("id")
    }

    #[test]
    fn package_prefixes_the_name() {
        let entity_type = person();
        assert_eq!(entity_type.name, "base_person");
        assert_eq!(entity_type.simple_name, "person");
        entity_type.validate().expect("valid");
    }

    #[test]
    fn post_order_puts_parts_before_compounds() {
        let entity_type = person();
        let order: Vec<&str> = entity_type
            .attributes_post_order()
            .iter()
            .map(|a| a.name.as_str())
            .collect();
        let address = order.iter().position(|n| *n == "address").expect("address");
        let street = order.iter().position(|n| *n == "street").expect("street");
        assert!(street < address);
        assert_eq!(order.len(), 4);
    }

    #[test]
    fn rejects_nillable_or_reference_ids() {
        let nillable = EntityType::new("a").with_id_attribute(Attribute::new("id", DataType::String));
        assert!(nillable.validate().is_err());

        let reference = EntityType::new("b")
            .with_id_attribute(Attribute::reference("id", DataType::Xref, "a").required());
        assert!(reference.validate().is_err());
    }

    #[test]
    fn rejects_compound_cycles() {
        let entity_type = EntityType::new("cyclic")
            .with_id_attribute(Attribute::new("id", DataType::String).required())
            .with_attribute(Attribute::new("a", DataType::Compound).with_parent("b"))
            .with_attribute(Attribute::new("b", DataType::Compound).with_parent("a"));
        let err = entity_type.validate().expect_err("cycle");
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn inherited_names_must_be_unique() {
        let parent = Arc::new(
            EntityType::new("parent")
                .abstract_type()
                .with_id_attribute(Attribute::new("id", DataType::String).required()),
        );
        let child = EntityType::new("child")
            .extending(parent.clone())
            .with_attribute(Attribute::new("id", DataType::String));
        assert!(child.validate().is_err());

        let ok = EntityType::new("child")
            .extending(parent)
            .with_attribute(Attribute::new("name", DataType::String));
        ok.validate().expect("valid child");
        assert_eq!(ok.id_attribute_name(), Some("id"));
        assert_eq!(ok.all_attributes().len(), 2);
    }

    #[test]
    fn non_abstract_parent_is_rejected() {
        let parent = Arc::new(person());
        let child = EntityType::new("employee").extending(parent);
        assert!(child.validate().is_err());
    }

    #[test]
    fn dependencies_exclude_self() {
        let entity_type = EntityType::new("node")
            .with_id_attribute(Attribute::new("id", DataType::String).required())
            .with_attribute(Attribute::reference("parent", DataType::Xref, "node"))
            .with_attribute(Attribute::reference("owner", DataType::Xref, "person"));
        let deps: Vec<String> = entity_type.dependencies().into_iter().collect();
        assert_eq!(deps, vec!["person".to_string()]);
    }

    #[test]
    fn names_are_validated() {
        assert!(validate_name("valid_Name1").is_ok());
        assert!(validate_name("1abc").is_err());
        assert!(validate_name("has space").is_err());
        assert!(validate_name("").is_err());
    }
}
