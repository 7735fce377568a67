//! Avro schema derivation and row codec.
//!
//! Each table maps to a record schema named `<table>_record` whose
//! fields are all nullable unions, so any column can be absent in the
//! data being backed up. Encoding is lossy on purpose: a value that
//! cannot be coerced to its column's declared type becomes null rather
//! than failing the backup.

use apache_avro::types::Value as AvroValue;
use apache_avro::{Codec, Reader, Schema, Writer};
use serde_json::json;
use tracing::debug;

use crate::error::{Error, Result};
use crate::registry::{LogicalType, TableSchema};
use crate::types::{Row, Value};

fn avro_type_name(lt: LogicalType) -> &'static str {
    match lt {
        LogicalType::Int => "int",
        LogicalType::Long => "long",
        LogicalType::Boolean => "boolean",
        LogicalType::String => "string",
    }
}

/// Derive the Avro record schema for a table.
pub fn record_schema(schema: &TableSchema) -> Result<Schema> {
    let fields: Vec<serde_json::Value> = schema
        .columns
        .iter()
        .map(|c| {
            json!({
                "name": c,
                "type": ["null", avro_type_name(schema.logical_type(c))],
            })
        })
        .collect();

    let doc = json!({
        "type": "record",
        "name": schema.record_name(),
        "fields": fields,
    });

    Schema::parse_str(&doc.to_string()).map_err(|e| Error::avro(e.to_string()))
}

/// Encode rows into an Avro object container file.
pub fn encode_rows(schema: &TableSchema, rows: &[Row]) -> Result<Vec<u8>> {
    let avro_schema = record_schema(schema)?;
    let mut writer = Writer::with_codec(&avro_schema, Vec::new(), Codec::Null);
    let mut nulled = 0u64;

    for row in rows {
        let mut fields = Vec::with_capacity(schema.columns.len());
        for column in &schema.columns {
            let encoded = encode_field(schema, column, row.get(column), &mut nulled);
            fields.push((column.clone(), encoded));
        }
        writer
            .append(AvroValue::Record(fields))
            .map_err(|e| Error::avro(e.to_string()))?;
    }

    if nulled > 0 {
        debug!(
            table = %schema.name,
            count = nulled,
            "values replaced with null during encoding"
        );
    }

    writer.into_inner().map_err(|e| Error::avro(e.to_string()))
}

fn encode_field(
    schema: &TableSchema,
    column: &str,
    value: Option<&Value>,
    nulled: &mut u64,
) -> AvroValue {
    let Some(value) = value else {
        return null_branch();
    };
    if value.is_null() {
        return null_branch();
    }

    match schema.logical_type(column) {
        LogicalType::Int => match coerce_i64(value) {
            Some(i) if i32::try_from(i).is_ok() => some_branch(AvroValue::Int(i as i32)),
            _ => lossy_null(value, nulled),
        },
        LogicalType::Long => match coerce_i64(value) {
            Some(i) => some_branch(AvroValue::Long(i)),
            None => lossy_null(value, nulled),
        },
        // Booleans coerce by truthiness: any present value encodes,
        // the empty string included (as false).
        LogicalType::Boolean => some_branch(AvroValue::Boolean(value.is_truthy())),
        LogicalType::String => some_branch(AvroValue::String(value.as_string())),
    }
}

fn coerce_i64(value: &Value) -> Option<i64> {
    if !value.is_truthy() {
        return None;
    }
    match value {
        Value::Int(i) => Some(*i),
        Value::Bool(b) => Some(i64::from(*b)),
        Value::String(s) => s.trim().parse().ok(),
        Value::Null => None,
    }
}

fn lossy_null(value: &Value, nulled: &mut u64) -> AvroValue {
    // Empty and falsy values map to null by the coercion rules; only a
    // truthy value landing here is an actual loss worth counting.
    if value.is_truthy() {
        *nulled += 1;
    }
    null_branch()
}

fn null_branch() -> AvroValue {
    AvroValue::Union(0, Box::new(AvroValue::Null))
}

fn some_branch(inner: AvroValue) -> AvroValue {
    AvroValue::Union(1, Box::new(inner))
}

/// Decode an Avro object container file back into rows.
pub fn decode_rows(bytes: &[u8]) -> Result<Vec<Row>> {
    let reader = Reader::new(bytes).map_err(|e| Error::avro(e.to_string()))?;

    let mut rows = Vec::new();
    for value in reader {
        let value = value.map_err(|e| Error::avro(e.to_string()))?;
        match value {
            AvroValue::Record(fields) => {
                let mut row = Row::with_capacity(fields.len());
                for (name, field) in fields {
                    row.insert(name, decode_field(field)?);
                }
                rows.push(row);
            }
            other => {
                return Err(Error::avro(format!(
                    "expected a record, got {other:?}"
                )))
            }
        }
    }
    Ok(rows)
}

fn decode_field(value: AvroValue) -> Result<Value> {
    match value {
        AvroValue::Union(_, inner) => decode_field(*inner),
        AvroValue::Null => Ok(Value::Null),
        AvroValue::Boolean(b) => Ok(Value::Bool(b)),
        AvroValue::Int(i) => Ok(Value::Int(i64::from(i))),
        AvroValue::Long(i) => Ok(Value::Int(i)),
        AvroValue::String(s) => Ok(Value::String(s)),
        other => Err(Error::avro(format!("unsupported avro value: {other:?}"))),
    }
}
