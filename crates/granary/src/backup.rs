//! Table backup and restore against Avro container files.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::avro::{decode_rows, encode_rows};
use crate::error::{Error, Result};
use crate::registry::{TableRegistry, TableSchema};
use crate::storage::GatewayFactory;
use crate::upsert::build_upsert;

/// Outcome of one backup call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupReport {
    /// Table backed up.
    pub table: String,
    /// File the snapshot was written to.
    pub path: PathBuf,
    /// Records written to the file.
    pub rows_written: u64,
}

/// Snapshots registered tables to disk and restores them.
pub struct BackupService {
    registry: TableRegistry,
    factory: Arc<dyn GatewayFactory>,
    backup_dir: PathBuf,
}

impl BackupService {
    /// Create a service over the built-in registry.
    pub fn new(factory: Arc<dyn GatewayFactory>, backup_dir: impl Into<PathBuf>) -> Self {
        Self::with_registry(TableRegistry::builtin().clone(), factory, backup_dir)
    }

    /// Create a service over a custom registry.
    pub fn with_registry(
        registry: TableRegistry,
        factory: Arc<dyn GatewayFactory>,
        backup_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            factory,
            backup_dir: backup_dir.into(),
        }
    }

    /// Path a table's backup is written to and read from.
    pub fn backup_path(&self, table: &str) -> PathBuf {
        self.backup_dir.join(format!("{table}_backup.avro"))
    }

    /// Snapshot every row of `table` into its backup file, overwriting
    /// any previous snapshot.
    pub async fn backup(&self, table: &str) -> Result<BackupReport> {
        let schema = self.registry.get(table)?;

        let gateway = self.factory.connect().await?;
        let rows = match gateway.fetch_all(&select_all_sql(schema)).await {
            Ok(rows) => {
                close_quietly(gateway.as_ref()).await;
                rows
            }
            Err(e) => {
                close_quietly(gateway.as_ref()).await;
                return Err(e);
            }
        };

        let bytes = encode_rows(schema, &rows)?;
        tokio::fs::create_dir_all(&self.backup_dir).await?;
        let path = self.backup_path(table);
        tokio::fs::write(&path, bytes).await?;

        let report = BackupReport {
            table: schema.name.clone(),
            path,
            rows_written: rows.len() as u64,
        };
        info!(
            table = %report.table,
            path = %report.path.display(),
            rows = report.rows_written,
            "backup written"
        );
        Ok(report)
    }

    /// Load a table's backup file and upsert its records inside one
    /// transaction. Returns the number of records restored.
    pub async fn restore(&self, table: &str) -> Result<u64> {
        let schema = self.registry.get(table)?;

        // Probe the file before touching the store, so a missing backup
        // never costs a connection.
        let path = self.backup_path(table);
        if !tokio::fs::try_exists(&path).await? {
            return Err(Error::file_not_found(path));
        }

        let bytes = tokio::fs::read(&path).await?;
        let rows = decode_rows(&bytes)?;
        if rows.is_empty() {
            info!(table = %schema.name, "backup holds no records, nothing to restore");
            return Ok(0);
        }

        let gateway = self.factory.connect().await?;

        let outcome = async {
            gateway.begin().await?;
            let stmt = build_upsert(schema, &rows)?;
            gateway.execute_upsert(&stmt).await?;
            gateway.commit().await
        }
        .await;

        match outcome {
            Ok(()) => {
                close_quietly(gateway.as_ref()).await;
                let restored = rows.len() as u64;
                info!(table = %schema.name, rows = restored, "restore complete");
                Ok(restored)
            }
            Err(e) => {
                if let Err(re) = gateway.rollback().await {
                    warn!(error = %re, "rollback failed after restore error");
                }
                close_quietly(gateway.as_ref()).await;
                Err(e)
            }
        }
    }
}

async fn close_quietly(gateway: &dyn crate::storage::StorageGateway) {
    if let Err(e) = gateway.close().await {
        debug!(error = %e, "failed to close connection");
    }
}

fn select_all_sql(schema: &TableSchema) -> String {
    let columns = schema
        .columns
        .iter()
        .map(|c| format!(r#""{c}""#))
        .collect::<Vec<_>>()
        .join(", ");
    format!(r#"SELECT {columns} FROM "{table}""#, table = schema.name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryGatewayFactory, MemoryStore};
    use crate::types::{Row, Value};

    fn service(store: &Arc<MemoryStore>, dir: &Path) -> BackupService {
        BackupService::new(
            Arc::new(MemoryGatewayFactory::new(Arc::clone(store))),
            dir,
        )
    }

    fn department(id: i64, name: &str) -> Row {
        Row::from([
            ("id".to_string(), Value::Int(id)),
            ("department".to_string(), Value::from(name)),
        ])
    }

    #[test]
    fn test_select_all_quotes_identifiers() {
        let schema = TableRegistry::builtin().get("departments").unwrap();
        assert_eq!(
            select_all_sql(schema),
            r#"SELECT "id", "department" FROM "departments""#
        );
    }

    #[tokio::test]
    async fn test_backup_writes_expected_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        store.seed(
            "departments",
            "id",
            [department(1, "Engineering"), department(2, "Sales")],
        );

        let report = service(&store, dir.path())
            .backup("departments")
            .await
            .unwrap();

        assert_eq!(report.rows_written, 2);
        assert_eq!(report.path, dir.path().join("departments_backup.avro"));
        assert!(report.path.exists());
    }

    #[tokio::test]
    async fn test_backup_unknown_table_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        let err = service(&store, dir.path())
            .backup("invoices")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownTable { .. }));
    }

    #[tokio::test]
    async fn test_restore_missing_file_fails_before_connect() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();

        let err = service(&store, dir.path())
            .restore("departments")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn test_restore_empty_backup_returns_zero() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        let svc = service(&store, dir.path());

        svc.backup("departments").await.unwrap();
        let restored = svc.restore("departments").await.unwrap();

        assert_eq!(restored, 0);
        assert!(store.is_empty("departments"));
    }

    #[tokio::test]
    async fn test_backup_then_restore_into_fresh_store() {
        let dir = tempfile::tempdir().unwrap();
        let source = MemoryStore::new();
        source.seed(
            "departments",
            "id",
            [department(1, "Engineering"), department(2, "Sales")],
        );
        service(&source, dir.path())
            .backup("departments")
            .await
            .unwrap();

        let target = MemoryStore::new();
        let restored = service(&target, dir.path())
            .restore("departments")
            .await
            .unwrap();

        assert_eq!(restored, 2);
        let rows = target.rows("departments");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["department"], Value::from("Engineering"));
    }

    #[tokio::test]
    async fn test_restore_failure_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let source = MemoryStore::new();
        source.seed("departments", "id", [department(1, "Engineering")]);
        service(&source, dir.path())
            .backup("departments")
            .await
            .unwrap();

        let target = MemoryStore::new();
        target.inject_execute_failure();
        let err = service(&target, dir.path())
            .restore("departments")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Store { .. }));
        assert!(target.is_empty("departments"));
        assert_eq!(target.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_restore_commit_failure_rolls_back_and_closes() {
        let dir = tempfile::tempdir().unwrap();
        let source = MemoryStore::new();
        source.seed("departments", "id", [department(1, "Engineering")]);
        service(&source, dir.path())
            .backup("departments")
            .await
            .unwrap();

        let target = MemoryStore::new();
        target.inject_commit_failure();
        let err = service(&target, dir.path())
            .restore("departments")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Store { .. }));
        assert!(target.is_empty("departments"));
        assert_eq!(target.open_connections(), 0);
    }
}
