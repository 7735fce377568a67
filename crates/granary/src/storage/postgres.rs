//! PostgreSQL gateway backed by `tokio-postgres`.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::BytesMut;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::storage::{GatewayFactory, StorageGateway};
use crate::types::{Row, Value};
use crate::upsert::UpsertStatement;

impl ToSql for Value {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(b) => b.to_sql(ty, out),
            Value::Int(i) => {
                if *ty == Type::INT2 {
                    (*i as i16).to_sql(ty, out)
                } else if *ty == Type::INT4 {
                    (*i as i32).to_sql(ty, out)
                } else {
                    i.to_sql(ty, out)
                }
            }
            Value::String(s) => s.to_sql(ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// Opens PostgreSQL connections from a connection string.
#[derive(Debug, Clone)]
pub struct PgGatewayFactory {
    url: String,
}

impl PgGatewayFactory {
    /// Create a factory for the given connection string.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl GatewayFactory for PgGatewayFactory {
    async fn connect(&self) -> Result<Box<dyn StorageGateway>> {
        let (client, connection) = tokio_postgres::connect(&self.url, NoTls)
            .await
            .map_err(|e| Error::store_with_source("failed to connect", e))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "postgres connection terminated");
            }
        });

        Ok(Box::new(PgGateway {
            client,
            closed: AtomicBool::new(false),
        }))
    }
}

/// A single PostgreSQL connection.
pub struct PgGateway {
    client: Client,
    closed: AtomicBool,
}

impl PgGateway {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(Error::store("connection is closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageGateway for PgGateway {
    async fn execute_upsert(&self, stmt: &UpsertStatement) -> Result<u64> {
        self.ensure_open()?;

        let prepared = self
            .client
            .prepare(&stmt.sql)
            .await
            .map_err(|e| Error::store_with_source("failed to prepare statement", e))?;

        let mut affected = 0u64;
        for binds in &stmt.params {
            let refs: Vec<&(dyn ToSql + Sync)> =
                binds.iter().map(|v| v as &(dyn ToSql + Sync)).collect();
            affected += self
                .client
                .execute(&prepared, &refs)
                .await
                .map_err(|e| Error::store_with_source("upsert execution failed", e))?;
        }

        debug!(table = %stmt.table, rows = affected, "executed upsert");
        Ok(affected)
    }

    async fn fetch_all(&self, sql: &str) -> Result<Vec<Row>> {
        self.ensure_open()?;

        let rows = self
            .client
            .query(sql, &[])
            .await
            .map_err(|e| Error::store_with_source("query failed", e))?;

        rows.iter().map(pg_row_to_row).collect()
    }

    async fn begin(&self) -> Result<()> {
        self.ensure_open()?;
        self.client
            .batch_execute("BEGIN")
            .await
            .map_err(|e| Error::store_with_source("failed to begin transaction", e))
    }

    async fn commit(&self) -> Result<()> {
        self.ensure_open()?;
        self.client
            .batch_execute("COMMIT")
            .await
            .map_err(|e| Error::store_with_source("failed to commit transaction", e))
    }

    async fn rollback(&self) -> Result<()> {
        self.ensure_open()?;
        self.client
            .batch_execute("ROLLBACK")
            .await
            .map_err(|e| Error::store_with_source("failed to roll back transaction", e))
    }

    async fn close(&self) -> Result<()> {
        // The client itself is released on drop.
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

fn pg_row_to_row(row: &tokio_postgres::Row) -> Result<Row> {
    let mut out = Row::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let ty = column.type_();
        let value = if *ty == Type::BOOL {
            row.try_get::<_, Option<bool>>(idx)
                .map(Value::from)
                .map_err(|e| Error::store_with_source("failed to read bool column", e))?
        } else if *ty == Type::INT2 {
            row.try_get::<_, Option<i16>>(idx)
                .map(|v| Value::from(v.map(i64::from)))
                .map_err(|e| Error::store_with_source("failed to read int2 column", e))?
        } else if *ty == Type::INT4 {
            row.try_get::<_, Option<i32>>(idx)
                .map(|v| Value::from(v.map(i64::from)))
                .map_err(|e| Error::store_with_source("failed to read int4 column", e))?
        } else if *ty == Type::INT8 {
            row.try_get::<_, Option<i64>>(idx)
                .map(Value::from)
                .map_err(|e| Error::store_with_source("failed to read int8 column", e))?
        } else {
            row.try_get::<_, Option<String>>(idx)
                .map(Value::from)
                .map_err(|e| Error::store_with_source("failed to read text column", e))?
        };
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}
