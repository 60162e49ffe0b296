//! Projection of stream events onto a query's output schema.
//!
//! [`ProjectionContext::project`] turns one [`StreamEvent`] into a single-row
//! [`RecordBatch`] over the all-nullable output schema:
//!
//! 1. every output column starts null;
//! 2. each non-null event field that maps to an output column is copied, or
//!    coerced when the types differ;
//! 3. the reserved [`ARRIVAL_TIMESTAMP`] column, if present, is overwritten
//!    with the event's arrival time.
//!
//! A coercion failure aborts the whole row; no partial row is returned.

use std::sync::Arc;

use arrow_array::{
    new_null_array, ArrayRef, RecordBatch, TimestampMicrosecondArray, TimestampMillisecondArray,
    TimestampNanosecondArray, TimestampSecondArray,
};
use arrow_schema::{DataType, SchemaRef, TimeUnit};
use laminar_schema::value::{datum_to_array, decode_row};
use laminar_schema::{CoercionRegistry, SchemaCache};

use super::event::StreamEvent;
use crate::error::DbError;

/// Output column that always receives the event's arrival time.
pub const ARRIVAL_TIMESTAMP: &str = "arrival_timestamp";

/// Per-scan projection state.
#[derive(Debug)]
pub struct ProjectionContext {
    cache: SchemaCache,
    dest: SchemaRef,
    arrival_idx: Option<usize>,
    coercions: Arc<CoercionRegistry>,
}

impl ProjectionContext {
    /// Creates a context projecting onto `dest`.
    #[must_use]
    pub fn new(dest: SchemaRef, coercions: Arc<CoercionRegistry>) -> Self {
        let arrival_idx = dest
            .fields()
            .iter()
            .position(|f| f.name().eq_ignore_ascii_case(ARRIVAL_TIMESTAMP));
        Self {
            cache: SchemaCache::new(Arc::clone(&dest)),
            dest,
            arrival_idx,
            coercions,
        }
    }

    /// The output schema.
    #[must_use]
    pub fn schema(&self) -> &SchemaRef {
        &self.dest
    }

    /// Position of the arrival-time column, if the output has one.
    #[must_use]
    pub fn arrival_column(&self) -> Option<usize> {
        self.arrival_idx
    }

    /// The schema cache.
    #[must_use]
    pub fn cache(&self) -> &SchemaCache {
        &self.cache
    }

    /// Projects one event.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::TypeCoercion`] if a value cannot be coerced, or
    /// [`DbError::Schema`] if the descriptor or row cannot be decoded.
    pub fn project(&mut self, event: &StreamEvent) -> Result<RecordBatch, DbError> {
        let (map, source_fields) = {
            let mapping = self
                .cache
                .ensure_mapping(&event.descriptor, &event.record_descs)?;
            (Arc::clone(mapping.map()), Arc::clone(mapping.source_fields()))
        };

        let row = decode_row(&event.row)?;
        if row.len() != source_fields.len() {
            return Err(DbError::InvalidRow(format!(
                "row has {} values, descriptor has {} fields",
                row.len(),
                source_fields.len()
            )));
        }

        let mut columns: Vec<Option<ArrayRef>> = vec![None; self.dest.fields().len()];
        for (src, dst) in map.iter() {
            let Some(dst) = dst else { continue };
            let datum = &row[src];
            if datum.is_null() {
                continue;
            }
            let value = datum_to_array(datum, &source_fields[src], self.cache.records())?;
            columns[dst] = Some(self.fit(value, dst)?);
        }

        if let Some(idx) = self.arrival_idx {
            columns[idx] = Some(self.arrival(event.arrival_micros, idx)?);
        }

        let columns = columns
            .into_iter()
            .zip(self.dest.fields().iter())
            .map(|(col, field)| col.unwrap_or_else(|| new_null_array(field.data_type(), 1)))
            .collect();
        Ok(RecordBatch::try_new(Arc::clone(&self.dest), columns)?)
    }

    // Timestamp columns get the instant in their own unit and zone; casting a
    // zone-less value would reinterpret it as local time in that zone.
    fn arrival(&self, micros: i64, dst: usize) -> Result<ArrayRef, DbError> {
        let DataType::Timestamp(unit, tz) = self.dest.field(dst).data_type() else {
            let naive: ArrayRef = Arc::new(TimestampMicrosecondArray::from(vec![micros]));
            return self.fit(naive, dst);
        };
        let tz = tz.clone();
        let array: ArrayRef = match unit {
            TimeUnit::Second => Arc::new(
                TimestampSecondArray::from(vec![micros.div_euclid(1_000_000)])
                    .with_timezone_opt(tz),
            ),
            TimeUnit::Millisecond => Arc::new(
                TimestampMillisecondArray::from(vec![micros.div_euclid(1_000)])
                    .with_timezone_opt(tz),
            ),
            TimeUnit::Microsecond => {
                Arc::new(TimestampMicrosecondArray::from(vec![micros]).with_timezone_opt(tz))
            }
            TimeUnit::Nanosecond => Arc::new(
                TimestampNanosecondArray::from(vec![micros.saturating_mul(1_000)])
                    .with_timezone_opt(tz),
            ),
        };
        Ok(array)
    }

    fn fit(&self, value: ArrayRef, dst: usize) -> Result<ArrayRef, DbError> {
        let to = self.dest.field(dst).data_type();
        if value.data_type() == to {
            return Ok(value);
        }
        Ok(self.coercions.coerce(&value, to)?)
    }

    /// Drops the cached mapping and record layouts. Called at every batch
    /// boundary and when the scan closes.
    pub fn reset(&mut self) {
        self.cache.reset();
    }
}
