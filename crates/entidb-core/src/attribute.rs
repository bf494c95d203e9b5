//! Attribute metadata.

use serde::{Deserialize, Serialize};

use crate::data_type::DataType;
use crate::ids::AttributeId;
use crate::tag::Tag;

/// Inclusive numeric bounds for int/long/decimal attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub min: Option<i64>,
    pub max: Option<i64>,
}

impl Range {
    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        self.min.map_or(true, |min| value >= min as f64)
            && self.max.map_or(true, |max| value <= max as f64)
    }
}

/// Description of one field of an entity type.
///
/// Compound attributes group their parts through the `parent` link: parts name
/// their compound parent instead of the compound owning its children, so the
/// part tree is a flat list that the owning [`EntityType`](crate::EntityType)
/// validates for cycles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    /// Assigned when the attribute is first persisted; kept across updates.
    pub id: Option<AttributeId>,
    pub name: String,
    pub label: Option<String>,
    pub description: Option<String>,
    pub data_type: DataType,
    /// Fully-qualified name of the referenced entity type.
    pub ref_entity_type: Option<String>,
    /// Name of the compound attribute this attribute is a part of.
    pub parent: Option<String>,
    pub nillable: bool,
    pub auto: bool,
    pub visible: bool,
    pub unique: bool,
    pub read_only: bool,
    pub aggregatable: bool,
    pub range: Option<Range>,
    pub enum_options: Vec<String>,
    pub default_value: Option<String>,
    /// When set, the value is computed from this expression instead of stored.
    pub expression: Option<String>,
    pub validation_expression: Option<String>,
    pub visible_expression: Option<String>,
    pub tags: Vec<Tag>,
}

impl Attribute {
    /// Creates a nillable, visible attribute with no constraints.
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            id: None,
            name: name.into(),
            label: None,
            description: None,
            data_type,
            ref_entity_type: None,
            parent: None,
            nillable: true,
            auto: false,
            visible: true,
            unique: false,
            read_only: false,
            aggregatable: false,
            range: None,
            enum_options: Vec::new(),
            default_value: None,
            expression: None,
            validation_expression: None,
            visible_expression: None,
            tags: Vec::new(),
        }
    }

    /// Shorthand for a reference attribute pointing at `target`.
    #[must_use]
    pub fn reference(name: impl Into<String>, data_type: DataType, target: impl Into<String>) -> Self {
        let mut attribute = Self::new(name, data_type);
        attribute.ref_entity_type = Some(target.into());
        attribute
    }

    #[must_use]
    pub fn with_id(mut self, id: AttributeId) -> Self {
        self.id = Some(id);
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
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.nillable = false;
        self
    }

    #[must_use]
    pub fn auto(mut self) -> Self {
        self.auto = true;
        self
    }

    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    #[must_use]
    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    #[must_use]
    pub fn aggregatable(mut self) -> Self {
        self.aggregatable = true;
        self
    }

    #[must_use]
    pub fn with_range(mut self, min: Option<i64>, max: Option<i64>) -> Self {
        self.range = Some(Range { min, max });
        self
    }

    #[must_use]
    pub fn with_enum_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enum_options = options.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_default_value(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    #[must_use]
    pub fn with_expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = Some(expression.into());
        self
    }

    #[must_use]
    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.tags.push(tag);
        self
    }

    #[must_use]
    pub fn is_reference(&self) -> bool {
        self.data_type.is_reference()
    }

    #[must_use]
    pub fn is_compound(&self) -> bool {
        self.data_type.is_compound()
    }

    #[must_use]
    pub fn is_computed(&self) -> bool {
        self.expression.is_some()
    }

    /// Whether a physical column/field backs this attribute.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        !self.is_compound() && !self.is_computed()
    }

    /// Label falling back to the name.
    #[must_use]
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }

    /// Compares everything except the identifier.
    #[must_use]
    pub fn structurally_eq(&self, other: &Self) -> bool {
        let mut a = self.clone();
        let mut b = other.clone();
        a.id = None;
        b.id = None;
        a == b
    }

    /// Content differences that only touch the catalog, not physical storage.
    #[must_use]
    pub fn changed_fields(&self, other: &Self) -> Vec<&'static str> {
        let mut changed = Vec::new();
        macro_rules! diff {
            ($($field:ident),*) => {
                $(if self.$field != other.$field { changed.push(stringify!($field)); })*
            };
        }
        diff!(
            label,
            description,
            data_type,
            ref_entity_type,
            parent,
            nillable,
            auto,
            visible,
            unique,
            read_only,
            aggregatable,
            range,
            enum_options,
            default_value,
            expression,
            validation_expression,
            visible_expression,
            tags
        );
        changed
    }
}
