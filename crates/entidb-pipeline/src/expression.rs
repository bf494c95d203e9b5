//! Template expressions for computed attributes.
//!
//! An expression is text with `${attribute}` placeholders, for example
//! `"${firstName} ${lastName}"`. An expression that is exactly one placeholder
//! yields the referenced value unchanged; anything else renders to text and is
//! then parsed as the computed attribute's data type.

use entidb_core::{Attribute, CoreError, CoreResult, Entity, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment<'a> {
    Text(&'a str),
    Placeholder(&'a str),
}

fn parse(expression: &str) -> CoreResult<Vec<Segment<'_>>> {
    let mut segments = Vec::new();
    let mut rest = expression;
    while let Some(start) = rest.find("${") {
        if start > 0 {
            segments.push(Segment::Text(&rest[..start]));
        }
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or_else(|| {
            CoreError::validation(format!("unterminated placeholder in `{expression}`"))
        })?;
        let name = after[..end].trim();
        if name.is_empty() {
            return Err(CoreError::validation(format!(
                "empty placeholder in `{expression}`"
            )));
        }
        segments.push(Segment::Placeholder(name));
        rest = &after[end + 1..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Text(rest));
    }
    Ok(segments)
}

/// Attribute names an expression reads.
pub fn referenced_attributes(expression: &str) -> CoreResult<Vec<String>> {
    Ok(parse(expression)?
        .into_iter()
        .filter_map(|segment| match segment {
            Segment::Placeholder(name) => Some(name.to_string()),
            Segment::Text(_) => None,
        })
        .collect())
}

/// Renders `expression` against `entity`; null values render as empty text.
pub fn render(expression: &str, entity: &Entity) -> CoreResult<String> {
    let mut rendered = String::with_capacity(expression.len());
    for segment in parse(expression)? {
        match segment {
            Segment::Text(text) => rendered.push_str(text),
            Segment::Placeholder(name) => {
                entity.entity_type().require_attribute(name)?;
                let value = entity.get(name);
                if !value.is_null() {
                    rendered.push_str(&value.to_string());
                }
            }
        }
    }
    Ok(rendered)
}

/// Value of computed `attribute` for `entity`.
pub fn evaluate(attribute: &Attribute, entity: &Entity) -> CoreResult<Value> {
    let Some(expression) = attribute.expression.as_deref() else {
        return Ok(entity.get(&attribute.name).clone());
    };
    let segments = parse(expression)?;
    if let [Segment::Placeholder(name)] = segments.as_slice() {
        entity.entity_type().require_attribute(name)?;
        return Ok(entity.get(name).clone());
    }
    let rendered = render(expression, entity)?;
    if attribute.data_type.is_string_like() {
        return Ok(Value::String(rendered));
    }
    if rendered.is_empty() {
        return Ok(Value::Null);
    }
    Value::parse(&rendered, attribute.data_type)
}
