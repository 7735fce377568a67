//! Storage gateway abstraction.
//!
//! The pipeline never talks to a database driver directly; it goes
//! through [`StorageGateway`], obtained per operation from a
//! [`GatewayFactory`]. Each gateway represents one live connection and
//! is closed by the caller when the operation finishes.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::Row;
use crate::upsert::UpsertStatement;

#[cfg(feature = "postgres")]
mod postgres;
#[cfg(feature = "postgres")]
pub use postgres::{PgGateway, PgGatewayFactory};

mod memory;
pub use memory::{MemoryGatewayFactory, MemoryStore};

/// A live connection to the backing store.
#[async_trait]
pub trait StorageGateway: Send + Sync {
    /// Execute an upsert statement once per bind vector. Returns the
    /// number of rows the store reports as affected.
    async fn execute_upsert(&self, stmt: &UpsertStatement) -> Result<u64>;

    /// Run a read-only query and collect every result row in order.
    async fn fetch_all(&self, sql: &str) -> Result<Vec<Row>>;

    /// Open a transaction on this connection.
    async fn begin(&self) -> Result<()>;

    /// Commit the open transaction.
    async fn commit(&self) -> Result<()>;

    /// Roll back the open transaction.
    async fn rollback(&self) -> Result<()>;

    /// Release the connection. Further calls fail.
    async fn close(&self) -> Result<()>;
}

/// Produces gateway connections on demand.
#[async_trait]
pub trait GatewayFactory: Send + Sync {
    /// Open a fresh connection to the store.
    async fn connect(&self) -> Result<Box<dyn StorageGateway>>;
}
