//! Error types for ingestion, backup, and storage operations.

use std::path::PathBuf;

/// Convenient result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the ingestion pipeline, the backup engine, and the
/// storage gateway.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested table is not present in the registry.
    #[error("unknown table: {table}")]
    UnknownTable {
        /// Name of the table that was requested.
        table: String,
    },

    /// A backup file was expected on disk but is missing.
    #[error("backup file not found: {}", path.display())]
    FileNotFound {
        /// Path that was probed.
        path: PathBuf,
    },

    /// A value could not be coerced to the column's declared integer type.
    #[error("cannot coerce value '{value}' in column '{column}' to an integer")]
    TypeCoercion {
        /// Column whose declared type demanded an integer.
        column: String,
        /// The offending raw value.
        value: String,
    },

    /// An upsert statement was requested for a batch with no rows.
    #[error("cannot build an upsert statement from an empty batch")]
    EmptyBatch,

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A failure reported by the backing store.
    #[error("store error: {message}")]
    Store {
        /// Human-readable description.
        message: String,
        /// Underlying driver error, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// CSV parsing failed at the reader level.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// Avro schema derivation, encoding, or decoding failed.
    #[error("avro error: {0}")]
    Avro(String),

    /// Filesystem I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an unknown-table error.
    pub fn unknown_table(table: impl Into<String>) -> Self {
        Self::UnknownTable {
            table: table.into(),
        }
    }

    /// Create a file-not-found error.
    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    /// Create a type-coercion error.
    pub fn type_coercion(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self::TypeCoercion {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a store error without an underlying source.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
            source: None,
        }
    }

    /// Create a store error wrapping a driver error.
    pub fn store_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Store {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an Avro error.
    pub fn avro(message: impl Into<String>) -> Self {
        Self::Avro(message.into())
    }

    /// Classify the error for reporting purposes.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::UnknownTable { .. }
            | Self::TypeCoercion { .. }
            | Self::EmptyBatch
            | Self::Csv(_) => ErrorCategory::Client,
            Self::FileNotFound { .. } => ErrorCategory::NotFound,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Store { .. } | Self::Avro(_) | Self::Io(_) => ErrorCategory::Server,
        }
    }

    /// Whether the error was caused by bad input rather than a system fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Client | ErrorCategory::NotFound
        )
    }
}

/// Broad classification of error causes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed or unacceptable input.
    Client,
    /// A referenced resource does not exist.
    NotFound,
    /// Invalid deployment configuration.
    Configuration,
    /// Internal or downstream failure.
    Server,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_table_is_client_error() {
        let err = Error::unknown_table("invoices");
        assert_eq!(err.category(), ErrorCategory::Client);
        assert!(err.is_client_error());
        assert_eq!(err.to_string(), "unknown table: invoices");
    }

    #[test]
    fn test_file_not_found_category() {
        let err = Error::file_not_found("/tmp/missing.avro");
        assert_eq!(err.category(), ErrorCategory::NotFound);
        assert!(err.is_client_error());
    }

    #[test]
    fn test_type_coercion_message() {
        let err = Error::type_coercion("department_id", "abc");
        assert!(err.to_string().contains("department_id"));
        assert!(err.to_string().contains("abc"));
    }

    #[test]
    fn test_store_error_preserves_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err = Error::store_with_source("write failed", io);
        assert_eq!(err.category(), ErrorCategory::Server);
        assert!(std::error::Error::source(&err).is_some());
    }
}
