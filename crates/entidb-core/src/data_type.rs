//! Attribute data types and the rules for changing between them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Scalar, reference and structural attribute types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Bool,
    Int,
    Long,
    Decimal,
    String,
    Text,
    Html,
    Email,
    Hyperlink,
    Enum,
    Date,
    DateTime,
    Xref,
    Categorical,
    Mref,
    CategoricalMref,
    File,
    Compound,
}

impl DataType {
    /// All data types, in declaration order.
    pub const ALL: [DataType; 18] = [
        Self::Bool,
        Self::Int,
        Self::Long,
        Self::Decimal,
        Self::String,
        Self::Text,
        Self::Html,
        Self::Email,
        Self::Hyperlink,
        Self::Enum,
        Self::Date,
        Self::DateTime,
        Self::Xref,
        Self::Categorical,
        Self::Mref,
        Self::CategoricalMref,
        Self::File,
        Self::Compound,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Long => "long",
            Self::Decimal => "decimal",
            Self::String => "string",
            Self::Text => "text",
            Self::Html => "html",
            Self::Email => "email",
            Self::Hyperlink => "hyperlink",
            Self::Enum => "enum",
            Self::Date => "date",
            Self::DateTime => "date_time",
            Self::Xref => "xref",
            Self::Categorical => "categorical",
            Self::Mref => "mref",
            Self::CategoricalMref => "categorical_mref",
            Self::File => "file",
            Self::Compound => "compound",
        }
    }

    /// Values of this type point at rows of another entity type.
    #[must_use]
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            Self::Xref | Self::Categorical | Self::Mref | Self::CategoricalMref | Self::File
        )
    }

    #[must_use]
    pub fn is_multi_reference(&self) -> bool {
        matches!(self, Self::Mref | Self::CategoricalMref)
    }

    #[must_use]
    pub fn is_compound(&self) -> bool {
        matches!(self, Self::Compound)
    }

    #[must_use]
    pub fn is_string_like(&self) -> bool {
        matches!(
            self,
            Self::String | Self::Text | Self::Html | Self::Email | Self::Hyperlink | Self::Enum
        )
    }

    /// Types an id attribute may have.
    #[must_use]
    pub fn is_valid_id_type(&self) -> bool {
        matches!(
            self,
            Self::String | Self::Int | Self::Long | Self::Email | Self::Hyperlink
        )
    }

    /// Whether stored values of `self` can be reinterpreted as `to` without
    /// retyping physical storage.
    #[must_use]
    pub fn can_change_to(&self, to: DataType) -> bool {
        if *self == to {
            return true;
        }
        match (self, to) {
            (from, to) if from.is_string_like() && to.is_string_like() => true,
            (Self::Int, Self::Long) => true,
            (Self::Int | Self::Long, Self::Decimal) => true,
            (Self::Xref, Self::Categorical) | (Self::Categorical, Self::Xref) => true,
            (Self::Mref, Self::CategoricalMref) | (Self::CategoricalMref, Self::Mref) => true,
            (Self::Xref, Self::File) => true,
            _ => false,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|data_type| data_type.as_str() == s)
            .ok_or_else(|| format!("invalid data type: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_type_name() {
        for data_type in DataType::ALL {
            assert_eq!(DataType::from_str(data_type.as_str()), Ok(data_type));
        }
        assert!(DataType::from_str("vector").is_err());
    }

    #[test]
    fn compatible_changes() {
        assert!(DataType::String.can_change_to(DataType::Text));
        assert!(DataType::Int.can_change_to(DataType::Long));
        assert!(DataType::Long.can_change_to(DataType::Decimal));
        assert!(DataType::Xref.can_change_to(DataType::Categorical));
        assert!(!DataType::Decimal.can_change_to(DataType::Int));
        assert!(!DataType::String.can_change_to(DataType::Xref));
        assert!(!DataType::Mref.can_change_to(DataType::Xref));
    }

    #[test]
    fn id_types_exclude_references() {
        assert!(DataType::String.is_valid_id_type());
        assert!(!DataType::Xref.is_valid_id_type());
        assert!(!DataType::Decimal.is_valid_id_type());
    }
}
