//! # Granary
//!
//! Batch CSV ingestion, idempotent upserts, and Avro backup/restore
//! for a fixed set of relational tables.
//!
//! ## Architecture
//!
//! - [`registry`] holds the closed set of ingestible tables and their
//!   column, requiredness, and type metadata.
//! - [`ingest`] maps headerless CSV text onto table columns, filters
//!   defective rows, and writes bounded batches transactionally.
//! - [`upsert`] renders a batch into one parameterized
//!   `INSERT ... ON CONFLICT` statement.
//! - [`avro`] derives per-table Avro record schemas and encodes and
//!   decodes snapshot files.
//! - [`backup`] snapshots tables to disk and restores them.
//! - [`storage`] is the gateway seam; a PostgreSQL backend ships
//!   behind the `postgres` feature and an in-memory backend is always
//!   available.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use granary::prelude::*;
//!
//! # async fn run() -> granary::Result<()> {
//! let settings = Settings::from_env()?;
//! let factory: Arc<dyn GatewayFactory> =
//!     Arc::new(PgGatewayFactory::new(&settings.database_url));
//!
//! let ingest = IngestService::new(Arc::clone(&factory), settings.max_batch_size);
//! let report = ingest
//!     .ingest_csv("departments", "1,Engineering\n2,Sales")
//!     .await?;
//! println!("wrote {} rows", report.rows_written);
//!
//! let backup = BackupService::new(factory, settings.backup_dir);
//! backup.backup("departments").await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod analytics;
pub mod avro;
pub mod backup;
pub mod config;
pub mod error;
pub mod ingest;
pub mod registry;
pub mod storage;
pub mod types;
pub mod upsert;

pub use error::{Error, ErrorCategory, Result};

/// Commonly used types, importable in one line.
pub mod prelude {
    pub use crate::backup::{BackupReport, BackupService};
    pub use crate::config::Settings;
    pub use crate::error::{Error, ErrorCategory, Result};
    pub use crate::ingest::{BatchIter, IngestReport, IngestService};
    pub use crate::registry::{LogicalType, TableRegistry, TableSchema};
    pub use crate::storage::{GatewayFactory, MemoryGatewayFactory, MemoryStore, StorageGateway};
    #[cfg(feature = "postgres")]
    pub use crate::storage::PgGatewayFactory;
    pub use crate::types::{Row, Value};
    pub use crate::upsert::{build_upsert, UpsertStatement};
}
