//! In-memory gateway for tests and local development.
//!
//! Implements the same upsert-by-id and transaction semantics the
//! SQL backend provides, keyed on the statement's conflict column.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::storage::{GatewayFactory, StorageGateway};
use crate::types::Row;
use crate::upsert::UpsertStatement;

/// Shared state behind every connection a [`MemoryGatewayFactory`]
/// hands out. Rows are keyed by the rendered conflict-column value.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, BTreeMap<String, Row>>>,
    fail_next_execute: AtomicBool,
    fail_next_commit: AtomicBool,
    open_connections: AtomicUsize,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshot of a table's rows, ordered by key.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .lock()
            .get(table)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of rows currently stored in a table.
    pub fn len(&self, table: &str) -> usize {
        self.tables.lock().get(table).map_or(0, BTreeMap::len)
    }

    /// Whether a table holds no rows.
    pub fn is_empty(&self, table: &str) -> bool {
        self.len(table) == 0
    }

    /// Insert rows directly, bypassing the gateway. `id_field` selects
    /// the key column.
    pub fn seed(&self, table: &str, id_field: &str, rows: impl IntoIterator<Item = Row>) {
        let mut tables = self.tables.lock();
        let entries = tables.entry(table.to_string()).or_default();
        for row in rows {
            let key = row
                .get(id_field)
                .map(|v| v.as_string())
                .unwrap_or_default();
            entries.insert(key, row);
        }
    }

    /// Make the next `execute_upsert` on any connection fail.
    pub fn inject_execute_failure(&self) {
        self.fail_next_execute.store(true, Ordering::SeqCst);
    }

    /// Make the next `commit` on any connection fail, leaving its
    /// staged writes unapplied.
    pub fn inject_commit_failure(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Connections handed out but not yet closed.
    pub fn open_connections(&self) -> usize {
        self.open_connections.load(Ordering::SeqCst)
    }

    fn take_execute_failure(&self) -> bool {
        self.fail_next_execute.swap(false, Ordering::SeqCst)
    }

    fn take_commit_failure(&self) -> bool {
        self.fail_next_commit.swap(false, Ordering::SeqCst)
    }

    fn apply(&self, stmt: &UpsertStatement) {
        let mut tables = self.tables.lock();
        let entries = tables.entry(stmt.table.clone()).or_default();
        let id_index = stmt
            .columns
            .iter()
            .position(|c| *c == stmt.conflict_column);
        for binds in &stmt.params {
            let row: Row = stmt
                .columns
                .iter()
                .cloned()
                .zip(binds.iter().cloned())
                .collect();
            let key = id_index
                .and_then(|i| binds.get(i))
                .map(|v| v.as_string())
                .unwrap_or_default();
            entries.insert(key, row);
        }
    }
}

/// Factory whose connections all share one [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct MemoryGatewayFactory {
    store: Arc<MemoryStore>,
}

impl MemoryGatewayFactory {
    /// Create a factory over the given store.
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl GatewayFactory for MemoryGatewayFactory {
    async fn connect(&self) -> Result<Box<dyn StorageGateway>> {
        self.store.open_connections.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryGateway {
            store: Arc::clone(&self.store),
            staged: Mutex::new(Vec::new()),
            in_tx: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemoryGateway {
    store: Arc<MemoryStore>,
    staged: Mutex<Vec<UpsertStatement>>,
    in_tx: AtomicBool,
    closed: AtomicBool,
}

impl MemoryGateway {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(Error::store("connection is closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageGateway for MemoryGateway {
    async fn execute_upsert(&self, stmt: &UpsertStatement) -> Result<u64> {
        self.ensure_open()?;
        if self.store.take_execute_failure() {
            return Err(Error::store("injected execute failure"));
        }

        let rows = stmt.row_count() as u64;
        if self.in_tx.load(Ordering::Relaxed) {
            self.staged.lock().push(stmt.clone());
        } else {
            self.store.apply(stmt);
        }
        Ok(rows)
    }

    async fn fetch_all(&self, sql: &str) -> Result<Vec<Row>> {
        self.ensure_open()?;
        let table = table_name_in(sql)
            .ok_or_else(|| Error::store(format!("cannot resolve table in query: {sql}")))?;
        Ok(self.store.rows(&table))
    }

    async fn begin(&self) -> Result<()> {
        self.ensure_open()?;
        self.in_tx.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        self.ensure_open()?;
        if self.store.take_commit_failure() {
            return Err(Error::store("injected commit failure"));
        }
        for stmt in self.staged.lock().drain(..) {
            self.store.apply(&stmt);
        }
        self.in_tx.store(false, Ordering::Relaxed);
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        self.ensure_open()?;
        self.staged.lock().clear();
        self.in_tx.store(false, Ordering::Relaxed);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.store.open_connections.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Pull the table name out of a `FROM` clause, with or without quoting.
fn table_name_in(sql: &str) -> Option<String> {
    let mut words = sql.split_whitespace();
    while let Some(word) = words.next() {
        if word.eq_ignore_ascii_case("FROM") {
            return words.next().map(|w| w.trim_matches('"').to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TableRegistry;
    use crate::types::Value;
    use crate::upsert::build_upsert;

    fn departments_stmt(rows: &[(&str, &str)]) -> UpsertStatement {
        let schema = TableRegistry::builtin().get("departments").unwrap();
        let batch: Vec<Row> = rows
            .iter()
            .map(|(id, dept)| {
                Row::from([
                    ("id".to_string(), Value::from(*id)),
                    ("department".to_string(), Value::from(*dept)),
                ])
            })
            .collect();
        build_upsert(schema, &batch).unwrap()
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_id() {
        let store = MemoryStore::new();
        let factory = MemoryGatewayFactory::new(Arc::clone(&store));
        let gateway = factory.connect().await.unwrap();

        gateway
            .execute_upsert(&departments_stmt(&[("1", "Engineering")]))
            .await
            .unwrap();
        gateway
            .execute_upsert(&departments_stmt(&[("1", "Platform")]))
            .await
            .unwrap();

        let rows = store.rows("departments");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["department"], Value::from("Platform"));
    }

    #[tokio::test]
    async fn test_rollback_discards_staged_writes() {
        let store = MemoryStore::new();
        let factory = MemoryGatewayFactory::new(Arc::clone(&store));
        let gateway = factory.connect().await.unwrap();

        gateway.begin().await.unwrap();
        gateway
            .execute_upsert(&departments_stmt(&[("1", "Engineering")]))
            .await
            .unwrap();
        gateway.rollback().await.unwrap();

        assert!(store.is_empty("departments"));
    }

    #[tokio::test]
    async fn test_commit_applies_staged_writes() {
        let store = MemoryStore::new();
        let factory = MemoryGatewayFactory::new(Arc::clone(&store));
        let gateway = factory.connect().await.unwrap();

        gateway.begin().await.unwrap();
        gateway
            .execute_upsert(&departments_stmt(&[("1", "Engineering"), ("2", "Sales")]))
            .await
            .unwrap();
        gateway.commit().await.unwrap();

        assert_eq!(store.len("departments"), 2);
    }

    #[tokio::test]
    async fn test_fetch_all_resolves_table_from_query() {
        let store = MemoryStore::new();
        store.seed(
            "jobs",
            "id",
            [Row::from([
                ("id".to_string(), Value::Int(1)),
                ("job".to_string(), Value::from("Analyst")),
            ])],
        );
        let factory = MemoryGatewayFactory::new(Arc::clone(&store));
        let gateway = factory.connect().await.unwrap();

        let rows = gateway
            .fetch_all(r#"SELECT "id", "job" FROM "jobs""#)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["job"], Value::from("Analyst"));
    }

    #[tokio::test]
    async fn test_commit_failure_leaves_store_unchanged() {
        let store = MemoryStore::new();
        let factory = MemoryGatewayFactory::new(Arc::clone(&store));
        let gateway = factory.connect().await.unwrap();

        gateway.begin().await.unwrap();
        gateway
            .execute_upsert(&departments_stmt(&[("1", "Engineering")]))
            .await
            .unwrap();
        store.inject_commit_failure();
        assert!(gateway.commit().await.is_err());
        gateway.rollback().await.unwrap();

        assert!(store.is_empty("departments"));
    }

    #[tokio::test]
    async fn test_open_connection_accounting() {
        let store = MemoryStore::new();
        let factory = MemoryGatewayFactory::new(Arc::clone(&store));
        let gateway = factory.connect().await.unwrap();
        assert_eq!(store.open_connections(), 1);

        // Double close must not underflow the count.
        gateway.close().await.unwrap();
        gateway.close().await.unwrap();
        assert_eq!(store.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_closed_connection_rejects_calls() {
        let store = MemoryStore::new();
        let factory = MemoryGatewayFactory::new(store);
        let gateway = factory.connect().await.unwrap();
        gateway.close().await.unwrap();

        let err = gateway.fetch_all("SELECT 1").await.unwrap_err();
        assert!(matches!(err, Error::Store { .. }));
    }
}
