//! Batch CSV ingestion pipeline.
//!
//! CSV text is read headerless and positionally mapped onto a table's
//! columns. Rows shorter than the required-column count are rejected
//! and reported; rows whose required columns are present but falsy are
//! dropped silently. Surviving rows are grouped into bounded batches,
//! each written as one upsert statement inside a single transaction.

use std::sync::Arc;

use csv::ReaderBuilder;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::registry::{TableRegistry, TableSchema};
use crate::storage::{GatewayFactory, StorageGateway};
use crate::types::{Row, Value};
use crate::upsert::build_upsert;

/// Lazily yields batches of accepted rows from CSV text.
pub struct BatchIter<'a> {
    schema: &'a TableSchema,
    records: csv::StringRecordsIntoIter<&'a [u8]>,
    max_batch_size: usize,
    rejected: Vec<Vec<String>>,
    reported: bool,
}

impl<'a> BatchIter<'a> {
    /// Start reading `csv_text` against `schema`, emitting batches of at
    /// most `max_batch_size` rows.
    pub fn new(schema: &'a TableSchema, csv_text: &'a str, max_batch_size: usize) -> Self {
        debug_assert!(max_batch_size > 0);
        let reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(csv_text.as_bytes());
        Self {
            schema,
            records: reader.into_records(),
            max_batch_size,
            rejected: Vec::new(),
            reported: false,
        }
    }

    /// Raw rows rejected by the length gate so far.
    pub fn rejected(&self) -> &[Vec<String>] {
        &self.rejected
    }

    /// Number of rows rejected by the length gate so far.
    pub fn rejected_count(&self) -> usize {
        self.rejected.len()
    }

    fn map_record(&mut self, record: &csv::StringRecord) -> Option<Row> {
        // Rows with fewer fields than required columns cannot possibly
        // satisfy the schema; reject before mapping.
        if record.len() < self.schema.required.len() {
            self.rejected
                .push(record.iter().map(str::to_string).collect());
            return None;
        }

        let mut row = Row::with_capacity(self.schema.columns.len());
        for (column, field) in self.schema.columns.iter().zip(record.iter()) {
            row.insert(column.clone(), Value::String(field.to_string()));
        }

        // A required column holding an empty value means the row is
        // incomplete; drop it without reporting.
        let complete = self
            .schema
            .required
            .iter()
            .all(|c| row.get(c).is_some_and(Value::is_truthy));
        complete.then_some(row)
    }

    fn report_rejections(&mut self) {
        if self.reported {
            return;
        }
        self.reported = true;
        if !self.rejected.is_empty() {
            warn!(
                table = %self.schema.name,
                count = self.rejected.len(),
                rows = ?self.rejected,
                "rejected rows with too few fields"
            );
        }
    }
}

impl Iterator for BatchIter<'_> {
    type Item = Result<Vec<Row>>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut batch = Vec::new();
        loop {
            match self.records.next() {
                Some(Ok(record)) => {
                    if let Some(row) = self.map_record(&record) {
                        batch.push(row);
                        if batch.len() >= self.max_batch_size {
                            return Some(Ok(batch));
                        }
                    }
                }
                Some(Err(e)) => return Some(Err(e.into())),
                None => {
                    self.report_rejections();
                    return (!batch.is_empty()).then_some(Ok(batch));
                }
            }
        }
    }
}

/// Outcome of one ingestion call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    /// Table written to.
    pub table: String,
    /// Accepted rows submitted to the store.
    pub rows_written: u64,
    /// Rows rejected by the length gate.
    pub rows_rejected: u64,
}

/// Ingests CSV payloads into registered tables.
pub struct IngestService {
    registry: TableRegistry,
    factory: Arc<dyn GatewayFactory>,
    max_batch_size: usize,
}

impl IngestService {
    /// Create a service over the built-in registry.
    pub fn new(factory: Arc<dyn GatewayFactory>, max_batch_size: u32) -> Self {
        Self::with_registry(TableRegistry::builtin().clone(), factory, max_batch_size)
    }

    /// Create a service over a custom registry.
    pub fn with_registry(
        registry: TableRegistry,
        factory: Arc<dyn GatewayFactory>,
        max_batch_size: u32,
    ) -> Self {
        Self {
            registry,
            factory,
            max_batch_size: max_batch_size.max(1) as usize,
        }
    }

    /// Ingest CSV text into `table`, upserting all accepted rows inside
    /// one transaction. Any failure rolls the transaction back.
    pub async fn ingest_csv(&self, table: &str, csv_text: &str) -> Result<IngestReport> {
        let schema = self.registry.get(table)?;
        let gateway = self.factory.connect().await?;

        let outcome = async {
            gateway.begin().await?;
            let report = self.write_batches(schema, csv_text, gateway.as_ref()).await?;
            gateway.commit().await?;
            Ok(report)
        }
        .await;

        match outcome {
            Ok(report) => {
                if let Err(e) = gateway.close().await {
                    debug!(error = %e, "failed to close connection");
                }
                info!(
                    table = %report.table,
                    rows_written = report.rows_written,
                    rows_rejected = report.rows_rejected,
                    "ingestion complete"
                );
                Ok(report)
            }
            Err(e) => {
                if let Err(re) = gateway.rollback().await {
                    warn!(error = %re, "rollback failed after ingestion error");
                }
                if let Err(ce) = gateway.close().await {
                    debug!(error = %ce, "failed to close connection");
                }
                Err(e)
            }
        }
    }

    async fn write_batches(
        &self,
        schema: &TableSchema,
        csv_text: &str,
        gateway: &dyn StorageGateway,
    ) -> Result<IngestReport> {
        let mut batches = BatchIter::new(schema, csv_text, self.max_batch_size);
        let mut rows_written = 0u64;

        while let Some(batch) = batches.next() {
            let batch = batch?;
            let stmt = build_upsert(schema, &batch)?;
            gateway.execute_upsert(&stmt).await?;
            rows_written += batch.len() as u64;
            debug!(table = %schema.name, rows = batch.len(), "wrote batch");
        }

        Ok(IngestReport {
            table: schema.name.clone(),
            rows_written,
            rows_rejected: batches.rejected_count() as u64,
        })
    }
}
