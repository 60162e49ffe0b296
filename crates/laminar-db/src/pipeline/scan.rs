//! Stream scan callbacks.
//!
//! The planner-facing steps run in order:
//!
//! ```text
//! estimate_size ─► choose_access_path ─► build_scan_plan ─► open_scan
//!                                                              │
//!                               next_row / next_batch ◄────────┤
//!                               rescan                         │
//!                               close_scan ◄───────────────────┘
//! ```
//!
//! Streams can only be read by continuous queries. A scan never reaches
//! end-of-stream; `next_row` returning `None` marks the end of the current
//! batch and drops the projection caches.

use std::sync::Arc;
use std::time::Instant;

use arrow::compute::concat_batches;
use arrow_array::RecordBatch;
use arrow_schema::{Field, Schema, SchemaRef};
use laminar_schema::CoercionRegistry;

use super::metrics::StreamMetrics;
use super::projector::ProjectionContext;
use super::source::EventSource;
use crate::config::StreamConfig;
use crate::error::DbError;

/// How the query reading the stream executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// A continuous view; the only mode that may read streams.
    Continuous,
    /// A one-shot query.
    OneShot,
}

/// Size estimate for one stream relation.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanEstimate {
    /// Stream name, for error messages.
    pub stream: String,
    /// Column names the query reads, in output order.
    pub column_names: Vec<String>,
    /// Estimated rows per scan batch.
    pub rows: f64,
}

/// Chosen access path.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanPath {
    /// The estimate the path was built from.
    pub estimate: ScanEstimate,
    /// Cost before the first row.
    pub startup_cost: f64,
    /// Cost of a full batch.
    pub total_cost: f64,
}

/// Plan handed to [`open_scan`].
#[derive(Debug, Clone)]
pub struct StreamScanPlan {
    /// Stream name.
    pub stream: String,
    /// Output column names.
    pub column_names: Vec<String>,
    /// Output column types, positionally aligned with `column_names`.
    pub physical: SchemaRef,
}

/// Records the query's column names and estimates rows per batch.
#[must_use]
pub fn estimate_size(
    config: &StreamConfig,
    stream: &str,
    column_names: Vec<String>,
) -> ScanEstimate {
    ScanEstimate {
        stream: stream.to_string(),
        column_names,
        rows: config.estimated_scan_rows(),
    }
}

/// Picks the single stream access path.
///
/// # Errors
///
/// Returns [`DbError::NotContinuous`] unless `mode` is continuous.
pub fn choose_access_path(estimate: ScanEstimate, mode: ScanMode) -> Result<ScanPath, DbError> {
    if mode != ScanMode::Continuous {
        return Err(DbError::NotContinuous(estimate.stream));
    }
    let total_cost = estimate.rows;
    Ok(ScanPath {
        estimate,
        startup_cost: 0.0,
        total_cost,
    })
}

/// Carries column names and physical types to [`open_scan`].
#[must_use]
pub fn build_scan_plan(path: ScanPath, physical: SchemaRef) -> StreamScanPlan {
    StreamScanPlan {
        stream: path.estimate.stream,
        column_names: path.estimate.column_names,
        physical,
    }
}

/// Counters of one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    /// Events projected.
    pub tuples: u64,
    /// Encoded bytes read.
    pub bytes: u64,
    /// Batch boundaries seen.
    pub batches: u64,
}

/// An open stream scan.
pub struct StreamScan {
    stream: String,
    projector: ProjectionContext,
    source: Box<dyn EventSource>,
    metrics: Option<Arc<StreamMetrics>>,
    stats: ScanStats,
    opened: Instant,
}

impl std::fmt::Debug for StreamScan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamScan")
            .field("stream", &self.stream)
            .field("schema", self.projector.schema())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

/// Opens a scan of `plan` reading events from `source`.
///
/// The output schema takes its names from the plan's column names and its
/// types from the physical schema; every output field is nullable.
///
/// # Errors
///
/// Returns [`DbError::SchemaMismatch`] if the column name count differs from
/// the physical field count.
pub fn open_scan(
    plan: StreamScanPlan,
    source: Box<dyn EventSource>,
    coercions: Arc<CoercionRegistry>,
) -> Result<StreamScan, DbError> {
    let physical = plan.physical.fields();
    if plan.column_names.len() != physical.len() {
        return Err(DbError::SchemaMismatch(format!(
            "stream \"{}\": {} column names for {} output fields",
            plan.stream,
            plan.column_names.len(),
            physical.len()
        )));
    }
    let fields: Vec<Field> = plan
        .column_names
        .iter()
        .zip(physical.iter())
        .map(|(name, f)| {
            Field::new(name, f.data_type().clone(), true).with_metadata(f.metadata().clone())
        })
        .collect();
    let dest = Arc::new(Schema::new(fields));

    tracing::debug!(
        stream = %plan.stream,
        columns = dest.fields().len(),
        "Opened stream scan"
    );
    Ok(StreamScan {
        stream: plan.stream,
        projector: ProjectionContext::new(dest, coercions),
        source,
        metrics: None,
        stats: ScanStats::default(),
        opened: Instant::now(),
    })
}

impl StreamScan {
    /// Reports counters into `metrics` when the scan closes.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<StreamMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// The output schema.
    #[must_use]
    pub fn schema(&self) -> &SchemaRef {
        self.projector.schema()
    }

    /// Counters so far.
    #[must_use]
    pub fn stats(&self) -> ScanStats {
        self.stats
    }

    /// The projection context.
    #[must_use]
    pub fn projector(&self) -> &ProjectionContext {
        &self.projector
    }

    /// Projects the next event as a one-row batch, or returns `None` at the
    /// end of the current batch.
    ///
    /// The event is acknowledged as soon as it is taken from the source,
    /// before projection.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::TypeCoercion`] if a value cannot be coerced, or a
    /// source or decoding error.
    pub fn next_row(&mut self) -> Result<Option<RecordBatch>, DbError> {
        let Some(event) = self.source.next_event()? else {
            self.stats.batches += 1;
            self.projector.reset();
            return Ok(None);
        };
        event.acknowledge();
        self.stats.tuples += 1;
        self.stats.bytes += event.encoded_len() as u64;

        match self.projector.project(&event) {
            Ok(row) => Ok(Some(row)),
            Err(e) => {
                if let (DbError::TypeCoercion(_), Some(metrics)) = (&e, &self.metrics) {
                    metrics.record_coercion_error();
                }
                Err(e)
            }
        }
    }

    /// Projects every event of the current batch into one batch, or returns
    /// `None` if the batch was empty.
    ///
    /// # Errors
    ///
    /// Same as [`next_row`](Self::next_row). Rows projected before the
    /// failing one are discarded.
    pub fn next_batch(&mut self) -> Result<Option<RecordBatch>, DbError> {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row()? {
            rows.push(row);
        }
        if rows.is_empty() {
            return Ok(None);
        }
        Ok(Some(concat_batches(self.projector.schema(), &rows)?))
    }

    /// Restarts the scan. Streams have no position to rewind, so this is a
    /// no-op.
    pub fn rescan(&mut self) {}

    /// Closes the scan, dropping the projection caches, and returns its
    /// counters.
    pub fn close_scan(mut self) -> ScanStats {
        self.projector.reset();
        let stats = self.stats;
        if let Some(metrics) = &self.metrics {
            metrics.record_scan(stats.tuples, stats.bytes);
        }
        tracing::info!(
            stream = %self.stream,
            tuples = stats.tuples,
            bytes = stats.bytes,
            batches = stats.batches,
            elapsed_ms = self.opened.elapsed().as_millis(),
            "Closed stream scan"
        );
        stats
    }
}
