//! Attribute values.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde_json::{json, Value as JsonValue};

use crate::data_type::DataType;
use crate::entity::Entity;
use crate::error::{CoreError, CoreResult};

/// A single attribute value.
///
/// References are stored as the referenced row's id (`Reference`/`References`)
/// and only become `Entity`/`Entities` once the reference-resolution layer has
/// hydrated them.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Decimal(f64),
    String(String),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
    Reference(Box<Value>),
    References(Vec<Value>),
    Entity(Box<Entity>),
    Entities(Vec<Entity>),
}

impl Value {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(value) => Some(*value as f64),
            Self::Decimal(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Id of the referenced row for stored or hydrated single references.
    #[must_use]
    pub fn reference_id(&self) -> Option<Value> {
        match self {
            Self::Reference(id) => Some((**id).clone()),
            Self::Entity(entity) => entity.id().cloned(),
            _ => None,
        }
    }

    /// Ids of every referenced row, for single and multi references alike.
    #[must_use]
    pub fn reference_ids(&self) -> Vec<Value> {
        match self {
            Self::References(ids) => ids.clone(),
            Self::Entities(entities) => entities.iter().filter_map(|e| e.id().cloned()).collect(),
            other => other.reference_id().into_iter().collect(),
        }
    }

    /// Replaces hydrated entities by their ids so the value can be stored.
    #[must_use]
    pub fn dehydrated(&self) -> Value {
        match self {
            Self::Entity(entity) => entity
                .id()
                .map_or(Self::Null, |id| Self::Reference(Box::new(id.clone()))),
            Self::Entities(entities) => {
                Self::References(entities.iter().filter_map(|e| e.id().cloned()).collect())
            }
            other => other.clone(),
        }
    }

    /// String form used to key rows by id.
    #[must_use]
    pub fn key(&self) -> Option<String> {
        match self {
            Self::Int(value) => Some(value.to_string()),
            Self::String(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// Like [`key`](Self::key) but fails for values that cannot be ids.
    pub fn require_key(&self) -> CoreResult<String> {
        self.key()
            .ok_or_else(|| CoreError::validation(format!("`{self}` is not a valid id value")))
    }

    /// Ordering used for sorting and range rules; `None` for incomparable values.
    #[must_use]
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Self::Null, Self::Null) => Some(Ordering::Equal),
            (Self::Null, _) => Some(Ordering::Less),
            (_, Self::Null) => Some(Ordering::Greater),
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (Self::String(a), Self::String(b)) => Some(a.cmp(b)),
            (Self::Date(a), Self::Date(b)) => Some(a.cmp(b)),
            (Self::DateTime(a), Self::DateTime(b)) => Some(a.cmp(b)),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            },
        }
    }

    /// JSON form of a stored value; hydrated entities collapse to their ids.
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Null => JsonValue::Null,
            Self::Bool(value) => json!(value),
            Self::Int(value) => json!(value),
            Self::Decimal(value) => json!(value),
            Self::String(value) => json!(value),
            Self::Date(value) => json!(value.format("%Y-%m-%d").to_string()),
            Self::DateTime(value) => json!(value.to_rfc3339_opts(SecondsFormat::Millis, true)),
            Self::Reference(id) => id.to_json(),
            Self::References(ids) => JsonValue::Array(ids.iter().map(Value::to_json).collect()),
            Self::Entity(_) | Self::Entities(_) => self.dehydrated().to_json(),
        }
    }

    /// Interprets `json` as a value of `data_type`.
    pub fn from_json(json: &JsonValue, data_type: DataType) -> CoreResult<Value> {
        if json.is_null() {
            return Ok(Self::Null);
        }
        let mismatch = || {
            CoreError::SerializationError(format!("`{json}` is not a valid {data_type} value"))
        };
        let value = match data_type {
            DataType::Bool => Self::Bool(json.as_bool().ok_or_else(mismatch)?),
            DataType::Int | DataType::Long => Self::Int(json.as_i64().ok_or_else(mismatch)?),
            DataType::Decimal => Self::Decimal(json.as_f64().ok_or_else(mismatch)?),
            DataType::Date => {
                let text = json.as_str().ok_or_else(mismatch)?;
                Self::Date(NaiveDate::parse_from_str(text, "%Y-%m-%d").map_err(|_| mismatch())?)
            }
            DataType::DateTime => {
                let text = json.as_str().ok_or_else(mismatch)?;
                Self::DateTime(
                    DateTime::parse_from_rfc3339(text)
                        .map_err(|_| mismatch())?
                        .with_timezone(&Utc),
                )
            }
            DataType::Xref | DataType::Categorical | DataType::File => {
                Self::Reference(Box::new(id_from_json(json).ok_or_else(mismatch)?))
            }
            DataType::Mref | DataType::CategoricalMref => {
                let items = json.as_array().ok_or_else(mismatch)?;
                Self::References(
                    items
                        .iter()
                        .map(|item| id_from_json(item).ok_or_else(mismatch))
                        .collect::<CoreResult<_>>()?,
                )
            }
            DataType::Compound => return Err(mismatch()),
            _ => Self::String(json.as_str().ok_or_else(mismatch)?.to_string()),
        };
        Ok(value)
    }

    /// Parses the textual form used for default values and catalog fields.
    pub fn parse(text: &str, data_type: DataType) -> CoreResult<Value> {
        let invalid = || CoreError::validation(format!("`{text}` is not a valid {data_type} value"));
        let value = match data_type {
            DataType::Bool => Self::Bool(text.parse().map_err(|_| invalid())?),
            DataType::Int | DataType::Long => Self::Int(text.parse().map_err(|_| invalid())?),
            DataType::Decimal => Self::Decimal(text.parse().map_err(|_| invalid())?),
            DataType::Date => {
                Self::Date(NaiveDate::parse_from_str(text, "%Y-%m-%d").map_err(|_| invalid())?)
            }
            DataType::DateTime => Self::DateTime(
                DateTime::parse_from_rfc3339(text)
                    .map_err(|_| invalid())?
                    .with_timezone(&Utc),
            ),
            DataType::Xref | DataType::Categorical | DataType::File => {
                Self::Reference(Box::new(Self::String(text.to_string())))
            }
            DataType::Mref | DataType::CategoricalMref => Self::References(
                text.split(',')
                    .map(|id| Self::String(id.trim().to_string()))
                    .collect(),
            ),
            DataType::Compound => return Err(invalid()),
            _ => Self::String(text.to_string()),
        };
        Ok(value)
    }
}

fn id_from_json(json: &JsonValue) -> Option<Value> {
    match json {
        JsonValue::String(value) => Some(Value::String(value.clone())),
        JsonValue::Number(number) => number.as_i64().map(Value::Int),
        _ => None,
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Decimal(value) => write!(f, "{value}"),
            Self::String(value) => f.write_str(value),
            Self::Date(value) => write!(f, "{}", value.format("%Y-%m-%d")),
            Self::DateTime(value) => f.write_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true)),
            Self::Reference(id) => write!(f, "{id}"),
            Self::References(ids) => {
                let parts: Vec<String> = ids.iter().map(ToString::to_string).collect();
                f.write_str(&parts.join(","))
            }
            Self::Entity(_) | Self::Entities(_) => write!(f, "{}", self.dehydrated()),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Decimal(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}
