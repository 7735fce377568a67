//! Table schema registry.
//!
//! The registry holds the closed set of tables the pipeline may write to.
//! Every ingestion, backup, and restore operation starts with a lookup
//! here; an unlisted table name fails fast with
//! [`Error::UnknownTable`](crate::error::Error::UnknownTable).

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::error::{Error, Result};

/// Logical column type used for coercion and Avro schema derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalType {
    /// 32-bit integer.
    Int,
    /// 64-bit integer.
    Long,
    /// Boolean.
    Boolean,
    /// UTF-8 string.
    String,
}

impl LogicalType {
    /// Whether values of this type are coerced to integers on ingest.
    pub fn is_integer(self) -> bool {
        matches!(self, Self::Int | Self::Long)
    }
}

/// Static description of one ingestible table.
#[derive(Debug, Clone)]
pub struct TableSchema {
    /// Table name as it appears in the store.
    pub name: String,
    /// Ordered column names. CSV fields map to these positionally.
    pub columns: Vec<String>,
    /// Columns that must be present and truthy for a row to be accepted.
    pub required: Vec<String>,
    /// Primary-key column used as the upsert conflict target.
    pub id_field: String,
    /// Logical types per column. Columns absent here default to string.
    types: HashMap<String, LogicalType>,
}

impl TableSchema {
    /// Build a schema. Required columns and the id field must be drawn
    /// from `columns`.
    pub fn new(
        name: &str,
        columns: &[&str],
        required: &[&str],
        id_field: &str,
        types: &[(&str, LogicalType)],
    ) -> Self {
        debug_assert!(columns.contains(&id_field));
        debug_assert!(required.iter().all(|r| columns.contains(r)));

        Self {
            name: name.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            required: required.iter().map(|c| c.to_string()).collect(),
            id_field: id_field.to_string(),
            types: types
                .iter()
                .map(|(c, t)| (c.to_string(), *t))
                .collect(),
        }
    }

    /// Logical type of a column, defaulting to string.
    pub fn logical_type(&self, column: &str) -> LogicalType {
        self.types
            .get(column)
            .copied()
            .unwrap_or(LogicalType::String)
    }

    /// Whether a column's values are coerced to integers. The id field
    /// always is, regardless of its declared type.
    pub fn is_integer_column(&self, column: &str) -> bool {
        column == self.id_field || self.logical_type(column).is_integer()
    }

    /// Name of the Avro record type derived for this table.
    pub fn record_name(&self) -> String {
        format!("{}_record", self.name)
    }
}

/// Lookup table from table name to schema.
#[derive(Debug, Clone)]
pub struct TableRegistry {
    tables: HashMap<String, TableSchema>,
}

impl TableRegistry {
    /// Build a registry from a set of schemas.
    pub fn new(schemas: impl IntoIterator<Item = TableSchema>) -> Self {
        Self {
            tables: schemas
                .into_iter()
                .map(|s| (s.name.clone(), s))
                .collect(),
        }
    }

    /// The built-in registry covering the standard tables.
    pub fn builtin() -> &'static Self {
        static BUILTIN: LazyLock<TableRegistry> = LazyLock::new(|| {
            TableRegistry::new([
                TableSchema::new(
                    "departments",
                    &["id", "department"],
                    &["id", "department"],
                    "id",
                    &[("id", LogicalType::Int)],
                ),
                TableSchema::new(
                    "jobs",
                    &["id", "job"],
                    &["id", "job"],
                    "id",
                    &[("id", LogicalType::Int)],
                ),
                TableSchema::new(
                    "hired_employees",
                    &["id", "name", "datetime", "department_id", "job_id"],
                    &["id", "name", "datetime"],
                    "id",
                    &[
                        ("id", LogicalType::Int),
                        ("department_id", LogicalType::Int),
                        ("job_id", LogicalType::Int),
                    ],
                ),
            ])
        });
        &BUILTIN
    }

    /// Look up a table schema by exact name.
    pub fn get(&self, table: &str) -> Result<&TableSchema> {
        self.tables
            .get(table)
            .ok_or_else(|| Error::unknown_table(table))
    }

    /// Whether the registry knows this table.
    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    /// Names of all registered tables, in no particular order.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_tables_present() {
        let registry = TableRegistry::builtin();
        assert!(registry.contains("departments"));
        assert!(registry.contains("jobs"));
        assert!(registry.contains("hired_employees"));
        assert_eq!(registry.table_names().count(), 3);
    }

    #[test]
    fn test_unknown_table_lookup_fails() {
        let registry = TableRegistry::builtin();
        let err = registry.get("invoices").unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::UnknownTable { table } if table == "invoices"
        ));
    }

    #[test]
    fn test_lookup_is_case_sensitive() {
        let registry = TableRegistry::builtin();
        assert!(registry.get("Departments").is_err());
        assert!(registry.get(" departments").is_err());
    }

    #[test]
    fn test_hired_employees_shape() {
        let schema = TableRegistry::builtin().get("hired_employees").unwrap();
        assert_eq!(
            schema.columns,
            vec!["id", "name", "datetime", "department_id", "job_id"]
        );
        assert_eq!(schema.required, vec!["id", "name", "datetime"]);
        assert_eq!(schema.id_field, "id");
        assert!(schema.is_integer_column("department_id"));
        assert!(!schema.is_integer_column("name"));
        assert_eq!(schema.logical_type("datetime"), LogicalType::String);
    }

    #[test]
    fn test_id_field_always_integer_coerced() {
        let schema = TableSchema::new(
            "notes",
            &["id", "body"],
            &["id"],
            "id",
            &[],
        );
        assert!(schema.is_integer_column("id"));
        assert_eq!(schema.record_name(), "notes_record");
    }
}
