//! Upsert statement builder.
//!
//! Turns a batch of rows into a single parameterized `INSERT ... ON
//! CONFLICT` statement plus one bind vector per row. The column set is
//! taken from the first row of the batch, ordered by the table schema,
//! so every row in a batch binds the same positions.

use tracing::trace;

use crate::error::{Error, Result};
use crate::registry::TableSchema;
use crate::types::{Row, Value};

/// A parameterized upsert plus its per-row bind vectors.
#[derive(Debug, Clone)]
pub struct UpsertStatement {
    /// Target table.
    pub table: String,
    /// SQL text with `$n` placeholders.
    pub sql: String,
    /// Columns bound, in placeholder order.
    pub columns: Vec<String>,
    /// Conflict target column.
    pub conflict_column: String,
    /// One bind vector per row, aligned with `columns`.
    pub params: Vec<Vec<Value>>,
}

impl UpsertStatement {
    /// Number of rows this statement will write.
    pub fn row_count(&self) -> usize {
        self.params.len()
    }
}

/// Build an upsert statement for a non-empty batch.
///
/// Values in columns the schema declares as integers (the id field
/// included) are coerced: truthy values must parse as integers, and
/// missing or falsy values bind as null. Other columns bind as-is,
/// with missing cells bound as null.
pub fn build_upsert(schema: &TableSchema, batch: &[Row]) -> Result<UpsertStatement> {
    let first = batch.first().ok_or(Error::EmptyBatch)?;

    let columns: Vec<String> = schema
        .columns
        .iter()
        .filter(|c| first.contains_key(*c))
        .cloned()
        .collect();
    if columns.is_empty() {
        return Err(Error::EmptyBatch);
    }

    let sql = render_sql(schema, &columns);
    trace!(table = %schema.name, rows = batch.len(), %sql, "built upsert");

    let mut params = Vec::with_capacity(batch.len());
    for row in batch {
        let mut binds = Vec::with_capacity(columns.len());
        for column in &columns {
            binds.push(coerce(schema, column, row.get(column))?);
        }
        params.push(binds);
    }

    Ok(UpsertStatement {
        table: schema.name.clone(),
        sql,
        columns,
        conflict_column: schema.id_field.clone(),
        params,
    })
}

fn render_sql(schema: &TableSchema, columns: &[String]) -> String {
    let column_list = columns
        .iter()
        .map(|c| format!(r#""{c}""#))
        .collect::<Vec<_>>()
        .join(", ");

    let placeholders = (1..=columns.len())
        .map(|n| format!("${n}"))
        .collect::<Vec<_>>()
        .join(", ");

    let updates = columns
        .iter()
        .filter(|c| **c != schema.id_field)
        .map(|c| format!(r#""{c}" = EXCLUDED."{c}""#))
        .collect::<Vec<_>>()
        .join(", ");

    if updates.is_empty() {
        format!(
            r#"INSERT INTO "{table}" ({column_list}) VALUES ({placeholders}) ON CONFLICT ("{id}") DO NOTHING"#,
            table = schema.name,
            id = schema.id_field,
        )
    } else {
        format!(
            r#"INSERT INTO "{table}" ({column_list}) VALUES ({placeholders}) ON CONFLICT ("{id}") DO UPDATE SET {updates}"#,
            table = schema.name,
            id = schema.id_field,
        )
    }
}

fn coerce(schema: &TableSchema, column: &str, value: Option<&Value>) -> Result<Value> {
    if !schema.is_integer_column(column) {
        return Ok(value.cloned().unwrap_or(Value::Null));
    }

    match value {
        Some(v) if v.is_truthy() => match v {
            Value::Int(i) => Ok(Value::Int(*i)),
            Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| Error::type_coercion(column, s.clone())),
            Value::Null => Ok(Value::Null),
        },
        _ => Ok(Value::Null),
    }
}
