//! SQL text generation and value conversion for the SQLite backend.
//!
//! Table and column names are the entity type and attribute names, which are
//! validated identifiers. References are stored as JSON: a single id for
//! single references, an array of ids for multi references.

use sqlx::query::Query as SqlxQuery;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Row, Sqlite};

use entidb_core::{
    Attribute, CoreError, CoreResult, DataType, Direction, EntityType, Query, QueryRule, Value,
};

/// Dynamically typed bind parameter.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SqlArg {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
}

pub(crate) fn bind_all<'q>(
    mut query: SqlxQuery<'q, Sqlite, SqliteArguments<'q>>,
    args: Vec<SqlArg>,
) -> SqlxQuery<'q, Sqlite, SqliteArguments<'q>> {
    for arg in args {
        query = match arg {
            SqlArg::Null => query.bind(None::<String>),
            SqlArg::Int(value) => query.bind(value),
            SqlArg::Real(value) => query.bind(value),
            SqlArg::Text(value) => query.bind(value),
        };
    }
    query
}

pub(crate) fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn column_type(data_type: DataType) -> &'static str {
    match data_type {
        DataType::Bool | DataType::Int | DataType::Long => "INTEGER",
        DataType::Decimal => "REAL",
        _ => "TEXT",
    }
}

/// `.` never occurs in entity or attribute names, so distinct pairs cannot
/// produce the same index name.
pub(crate) fn unique_index_name(table: &str, column: &str) -> String {
    format!("{table}.{column}.uniq")
}

pub(crate) fn create_table(entity_type: &EntityType) -> String {
    let id = entity_type.id_attribute_name();
    let columns: Vec<String> = entity_type
        .persistent_attributes()
        .into_iter()
        .map(|attribute| {
            let mut column = format!("{} {}", quote(&attribute.name), column_type(attribute.data_type));
            if Some(attribute.name.as_str()) == id {
                column.push_str(" PRIMARY KEY");
            }
            if !attribute.nillable {
                column.push_str(" NOT NULL");
            }
            column
        })
        .collect();
    format!("CREATE TABLE {} ({})", quote(&entity_type.name), columns.join(", "))
}

/// Added columns are always nullable: SQLite cannot add a NOT NULL column
/// without a default, and existing rows have no value.
pub(crate) fn add_column(table: &str, attribute: &Attribute) -> String {
    format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        quote(table),
        quote(&attribute.name),
        column_type(attribute.data_type)
    )
}

pub(crate) fn drop_column(table: &str, column: &str) -> String {
    format!("ALTER TABLE {} DROP COLUMN {}", quote(table), quote(column))
}

pub(crate) fn create_unique_index(table: &str, column: &str) -> String {
    format!(
        "CREATE UNIQUE INDEX {} ON {} ({})",
        quote(&unique_index_name(table, column)),
        quote(table),
        quote(column)
    )
}

pub(crate) fn drop_unique_index(table: &str, column: &str) -> String {
    format!("DROP INDEX IF EXISTS {}", quote(&unique_index_name(table, column)))
}

/// Unique, non-id persistent attributes; the primary key is unique already.
pub(crate) fn unique_columns(entity_type: &EntityType) -> Vec<&Attribute> {
    let id = entity_type.id_attribute_name();
    entity_type
        .persistent_attributes()
        .into_iter()
        .filter(|a| a.unique && Some(a.name.as_str()) != id)
        .collect()
}

fn scalar(value: &Value) -> SqlArg {
    match value {
        Value::Null => SqlArg::Null,
        Value::Bool(value) => SqlArg::Int(i64::from(*value)),
        Value::Int(value) => SqlArg::Int(*value),
        Value::Decimal(value) => SqlArg::Real(*value),
        Value::String(value) => SqlArg::Text(value.clone()),
        other => SqlArg::Text(other.to_string()),
    }
}

/// Converts a value into the parameter stored in `attribute`'s column.
pub(crate) fn encode(attribute: &Attribute, value: &Value) -> CoreResult<SqlArg> {
    if value.is_null() {
        return Ok(SqlArg::Null);
    }
    if attribute.is_reference() {
        let json = value.dehydrated().to_json();
        return Ok(SqlArg::Text(serde_json::to_string(&json)?));
    }
    Ok(scalar(value))
}

pub(crate) fn decode(row: &SqliteRow, attribute: &Attribute) -> Result<Value, sqlx::Error> {
    let name = attribute.name.as_str();
    let value = match attribute.data_type {
        DataType::Bool => row.try_get::<Option<bool>, _>(name)?.map(Value::Bool),
        DataType::Int | DataType::Long => row.try_get::<Option<i64>, _>(name)?.map(Value::Int),
        DataType::Decimal => decode_decimal(row, name)?.map(Value::Decimal),
        data_type => match row.try_get::<Option<String>, _>(name)? {
            None => None,
            Some(text) if attribute.is_reference() => {
                let json: serde_json::Value = serde_json::from_str(&text)
                    .map_err(|err| sqlx::Error::Decode(Box::new(err)))?;
                Some(
                    Value::from_json(&json, data_type)
                        .map_err(|err| sqlx::Error::Decode(Box::new(err)))?,
                )
            }
            Some(text) if matches!(data_type, DataType::Date | DataType::DateTime) => Some(
                Value::parse(&text, data_type).map_err(|err| sqlx::Error::Decode(Box::new(err)))?,
            ),
            Some(text) => Some(Value::String(text)),
        },
    };
    Ok(value.unwrap_or(Value::Null))
}

/// Columns created as INTEGER keep that affinity after a type change to
/// decimal; SQLite widens the stored integer when read as a double.
fn decode_decimal(row: &SqliteRow, name: &str) -> Result<Option<f64>, sqlx::Error> {
    row.try_get_unchecked::<Option<f64>, _>(name)
}

fn column<'a>(entity_type: &'a EntityType, name: &str) -> CoreResult<&'a Attribute> {
    let attribute = entity_type.require_attribute(name)?;
    if !attribute.is_persistent() {
        return Err(CoreError::validation(format!(
            "attribute `{name}` of `{}` is not stored and cannot be queried",
            entity_type.name
        )));
    }
    Ok(attribute)
}

fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() + 2);
    escaped.push('%');
    for c in text.to_lowercase().chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

fn like(attribute: &Attribute, text: &str, args: &mut Vec<SqlArg>) -> String {
    args.push(SqlArg::Text(escape_like(text)));
    format!("LOWER({}) LIKE ? ESCAPE '\\'", quote(&attribute.name))
}

fn equals(attribute: &Attribute, value: &Value, args: &mut Vec<SqlArg>) -> CoreResult<String> {
    let column = quote(&attribute.name);
    if value.is_null() {
        return Ok(format!("{column} IS NULL"));
    }
    if attribute.data_type.is_multi_reference() {
        args.push(scalar(&value.reference_id().unwrap_or_else(|| value.clone())));
        return Ok(format!(
            "EXISTS (SELECT 1 FROM json_each({column}) WHERE json_each.value = ?)"
        ));
    }
    if attribute.is_reference() {
        let id = value.reference_id().unwrap_or_else(|| value.clone());
        args.push(SqlArg::Text(serde_json::to_string(&id.to_json())?));
        return Ok(format!("{column} = ?"));
    }
    args.push(scalar(value));
    Ok(format!("{column} = ?"))
}

fn rule(entity_type: &EntityType, rule: &QueryRule, args: &mut Vec<SqlArg>) -> CoreResult<String> {
    let fragment = match rule {
        QueryRule::Eq(name, value) => equals(column(entity_type, name)?, value, args)?,
        QueryRule::In(name, values) => {
            let attribute = column(entity_type, name)?;
            if values.is_empty() {
                return Ok("0".to_string());
            }
            let parts = values
                .iter()
                .map(|value| equals(attribute, value, args))
                .collect::<CoreResult<Vec<_>>>()?;
            format!("({})", parts.join(" OR "))
        }
        QueryRule::Like(name, text) => like(column(entity_type, name)?, text, args),
        QueryRule::Range(name, min, max) => {
            let column_name = quote(&column(entity_type, name)?.name);
            let mut parts = vec![format!("{column_name} IS NOT NULL")];
            if let Some(min) = min {
                args.push(scalar(min));
                parts.push(format!("{column_name} >= ?"));
            }
            if let Some(max) = max {
                args.push(scalar(max));
                parts.push(format!("{column_name} <= ?"));
            }
            format!("({})", parts.join(" AND "))
        }
        QueryRule::IsNull(name) => format!("{} IS NULL", quote(&column(entity_type, name)?.name)),
        QueryRule::Search(text) => {
            let parts: Vec<String> = entity_type
                .persistent_attributes()
                .into_iter()
                .filter(|a| a.data_type.is_string_like())
                .map(|a| like(a, text, args))
                .collect();
            if parts.is_empty() {
                "0".to_string()
            } else {
                format!("({})", parts.join(" OR "))
            }
        }
    };
    Ok(fragment)
}

fn where_clause(entity_type: &EntityType, query: &Query, args: &mut Vec<SqlArg>) -> CoreResult<String> {
    if query.rules.is_empty() {
        return Ok(String::new());
    }
    let parts = query
        .rules
        .iter()
        .map(|r| rule(entity_type, r, args))
        .collect::<CoreResult<Vec<_>>>()?;
    Ok(format!(" WHERE {}", parts.join(" AND ")))
}

fn column_list(entity_type: &EntityType) -> String {
    entity_type
        .persistent_attributes()
        .into_iter()
        .map(|a| quote(&a.name))
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn count(entity_type: &EntityType, query: &Query) -> CoreResult<(String, Vec<SqlArg>)> {
    let mut args = Vec::new();
    let filter = where_clause(entity_type, query, &mut args)?;
    Ok((
        format!("SELECT COUNT(*) AS n FROM {}{filter}", quote(&entity_type.name)),
        args,
    ))
}

pub(crate) fn select(entity_type: &EntityType, query: &Query) -> CoreResult<(String, Vec<SqlArg>)> {
    let mut args = Vec::new();
    let filter = where_clause(entity_type, query, &mut args)?;
    let mut sql = format!(
        "SELECT {} FROM {}{filter}",
        column_list(entity_type),
        quote(&entity_type.name)
    );
    if !query.sort.is_empty() {
        let order = query
            .sort
            .iter()
            .map(|sort| -> CoreResult<String> {
                let direction = match sort.direction {
                    Direction::Asc => "ASC",
                    Direction::Desc => "DESC",
                };
                Ok(format!("{} {direction}", quote(&column(entity_type, &sort.attribute)?.name)))
            })
            .collect::<CoreResult<Vec<_>>>()?;
        sql.push_str(&format!(" ORDER BY {}", order.join(", ")));
    }
    if query.page_size.is_some() || query.offset > 0 {
        let limit = query.page_size.map_or(-1, |size| i64::try_from(size).unwrap_or(i64::MAX));
        sql.push_str(" LIMIT ? OFFSET ?");
        args.push(SqlArg::Int(limit));
        args.push(SqlArg::Int(i64::try_from(query.offset).unwrap_or(i64::MAX)));
    }
    Ok((sql, args))
}

pub(crate) fn select_by_id(entity_type: &EntityType) -> CoreResult<String> {
    let id = entity_type.require_id_attribute()?;
    Ok(format!(
        "SELECT {} FROM {} WHERE {} = ?",
        column_list(entity_type),
        quote(&entity_type.name),
        quote(&id.name)
    ))
}

pub(crate) fn insert(entity_type: &EntityType) -> String {
    let attributes = entity_type.persistent_attributes();
    let placeholders = vec!["?"; attributes.len()].join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({placeholders})",
        quote(&entity_type.name),
        column_list(entity_type)
    )
}

pub(crate) fn update(entity_type: &EntityType) -> CoreResult<String> {
    let id = entity_type.require_id_attribute()?;
    let assignments = entity_type
        .persistent_attributes()
        .into_iter()
        .filter(|a| a.name != id.name)
        .map(|a| format!("{} = ?", quote(&a.name)))
        .collect::<Vec<_>>();
    if assignments.is_empty() {
        // Id-only rows: a no-op update that still reports whether the row exists.
        return Ok(format!(
            "UPDATE {} SET {id_col} = {id_col} WHERE {id_col} = ?",
            quote(&entity_type.name),
            id_col = quote(&id.name)
        ));
    }
    Ok(format!(
        "UPDATE {} SET {} WHERE {} = ?",
        quote(&entity_type.name),
        assignments.join(", "),
        quote(&id.name)
    ))
}

pub(crate) fn delete_by_id(entity_type: &EntityType) -> CoreResult<String> {
    let id = entity_type.require_id_attribute()?;
    Ok(format!(
        "DELETE FROM {} WHERE {} = ?",
        quote(&entity_type.name),
        quote(&id.name)
    ))
}

pub(crate) fn id_arg(id: &Value) -> CoreResult<SqlArg> {
    match id {
        Value::Int(value) => Ok(SqlArg::Int(*value)),
        Value::String(value) => Ok(SqlArg::Text(value.clone())),
        other => Err(CoreError::validation(format!("`{other}` is not a valid id value"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn city() -> EntityType {
        EntityType::new("city")
            .with_id_attribute(Attribute::new("id", DataType::String).required())
            .with_attribute(Attribute::new("name", DataType::String).required().unique())
            .with_attribute(Attribute::new("population", DataType::Int))
            .with_attribute(Attribute::reference("country", DataType::Xref, "country"))
            .with_attribute(Attribute::reference("twins", DataType::Mref, "city"))
            .with_attribute(Attribute::new("slug", DataType::String).with_expression("${name}"))
    }

    #[test]
    fn create_table_skips_computed_attributes() {
        let sql = create_table(&city());
        assert_eq!(
            sql,
            "CREATE TABLE \"city\" (\"id\" TEXT PRIMARY KEY NOT NULL, \"name\" TEXT NOT NULL, \
             \"population\" INTEGER, \"country\" TEXT, \"twins\" TEXT)"
        );
        let city = city();
        let unique: Vec<&str> = unique_columns(&city).iter().map(|a| a.name.as_str()).collect();
        assert_eq!(unique, vec!["name"]);
    }

    #[test]
    fn references_are_matched_as_json() {
        let query = Query::new().eq("country", "nl").eq("twins", "ams");
        let (sql, args) = select(&city(), &query).expect("select");
        assert!(sql.contains("\"country\" = ?"));
        assert!(sql.contains("json_each(\"twins\")"));
        assert_eq!(
            args,
            vec![SqlArg::Text("\"nl\"".to_string()), SqlArg::Text("ams".to_string())]
        );
    }

    #[test]
    fn paging_uses_limit_and_offset() {
        let query = Query::new()
            .range("population", Some(Value::Int(10)), None)
            .sort_by("name", Direction::Desc)
            .offset(5);
        let (sql, args) = select(&city(), &query).expect("select");
        assert!(sql.ends_with("ORDER BY \"name\" DESC LIMIT ? OFFSET ?"));
        assert_eq!(args, vec![SqlArg::Int(10), SqlArg::Int(-1), SqlArg::Int(5)]);
    }

    #[test]
    fn computed_and_unknown_attributes_cannot_be_queried() {
        assert!(select(&city(), &Query::new().eq("slug", "x")).is_err());
        assert!(select(&city(), &Query::new().eq("nope", "x"))
            .expect_err("unknown")
            .is_not_found());
    }

    #[test]
    fn like_patterns_are_escaped() {
        assert_eq!(escape_like("50%_Off"), "%50\\%\\_off%");
    }

    #[test]
    fn unique_index_names_do_not_collide() {
        assert_ne!(unique_index_name("a_b", "c"), unique_index_name("a", "b_c"));
        assert_eq!(
            create_unique_index("city", "name"),
            "CREATE UNIQUE INDEX \"city.name.uniq\" ON \"city\" (\"name\")"
        );
    }
}
