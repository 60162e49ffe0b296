//! Stream insert callbacks.
//!
//! `plan_insert` fixes the descriptor rows are written with, `open_insert`
//! snapshots the stream's readers and sets up routing, `insert_row` routes one
//! row, and `close_insert` releases the queue and, for synchronous inserts,
//! waits until every routed row was taken by a worker.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use arrow_array::RecordBatch;
use arrow_schema::{Field, Schema, SchemaRef};
use chrono::Utc;
use laminar_core::streaming::{BatchHandle, InsertRouter, QueueSelection, RouterStats};
use laminar_schema::value::{array_to_datum, datum_to_array, encode_row};
use laminar_schema::{Datum, RecordDescriptor, RecordTypeCache, Row, SchemaDescriptor};
use tokio_util::sync::CancellationToken;

use super::event::StreamEvent;
use super::runtime::StreamRuntime;
use crate::config::StreamConfig;
use crate::error::DbError;

/// Catalog entry of a stream.
#[derive(Debug, Clone)]
pub struct StreamDefinition {
    /// Stream id, the key of reader membership.
    pub id: u32,
    /// Stream name.
    pub name: String,
    /// Declared schema. `None` for streams whose schema is inferred from
    /// each insert's target list.
    pub schema: Option<SchemaRef>,
    /// Layouts of the anonymous record types the stream's rows may carry.
    pub records: Vec<RecordDescriptor>,
}

impl StreamDefinition {
    /// A stream with a declared schema.
    #[must_use]
    pub fn new(id: u32, name: impl Into<String>, schema: SchemaRef) -> Self {
        Self {
            id,
            name: name.into(),
            schema: Some(schema),
            records: Vec::new(),
        }
    }

    /// A stream whose schema comes from each insert.
    #[must_use]
    pub fn inferred(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            schema: None,
            records: Vec::new(),
        }
    }

    /// Adds a record layout shipped with every row.
    #[must_use]
    pub fn with_record(mut self, record: RecordDescriptor) -> Self {
        self.records.push(record);
        self
    }
}

/// Output of [`plan_insert`].
#[derive(Debug, Clone)]
pub struct InsertPlan {
    /// Target stream id.
    pub stream_id: u32,
    /// Target stream name.
    pub stream: String,
    /// Descriptor every row of the insert is written with.
    pub descriptor: SchemaDescriptor,
    /// Record layouts shipped with every row.
    pub records: Arc<[RecordDescriptor]>,
}

/// Plans an insert into `stream`.
///
/// A declared schema wins; otherwise the descriptor is built from
/// `target_fields`, the insert's target list.
///
/// # Errors
///
/// Returns [`DbError::InvalidInsertTarget`] if the stream has no declared
/// schema and no target list was given, or [`DbError::Schema`] if the
/// descriptor cannot be packed.
pub fn plan_insert(
    stream: &StreamDefinition,
    target_fields: Option<Vec<Field>>,
) -> Result<InsertPlan, DbError> {
    let schema = match (&stream.schema, target_fields) {
        (Some(schema), _) => Arc::clone(schema),
        (None, Some(fields)) if !fields.is_empty() => Arc::new(Schema::new(fields)),
        (None, _) => {
            return Err(DbError::InvalidInsertTarget(format!(
                "stream \"{}\" has no schema and the insert names no columns",
                stream.name
            )))
        }
    };
    let descriptor = SchemaDescriptor::new(schema)?;
    tracing::debug!(
        stream = %stream.name,
        fields = descriptor.len(),
        inferred = stream.schema.is_none(),
        "Planned stream insert"
    );
    Ok(InsertPlan {
        stream_id: stream.id,
        stream: stream.name.clone(),
        descriptor,
        records: Arc::from(stream.records.clone()),
    })
}

/// Per-insert behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOptions {
    /// Wait for worker acknowledgment of every routed row at close.
    pub synchronous: bool,
    /// The insert runs inside event delivery and must never wait on itself.
    pub reentrant: bool,
    /// Combiner group; pins all rows to one worker queue.
    pub combiner_group: Option<u64>,
}

impl InsertOptions {
    /// Options following the configured synchronous mode.
    #[must_use]
    pub fn from_config(config: &StreamConfig) -> Self {
        Self {
            synchronous: config.synchronous_insert,
            ..Self::default()
        }
    }
}

/// Counters of one insert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertStats {
    /// Rows inserted, routed or not.
    pub rows: u64,
    /// Encoded bytes inserted.
    pub bytes: u64,
    /// Batches written: 1, plus batch boundaries and backpressure episodes.
    pub batches: u64,
    /// Rows pushed to a worker queue.
    pub pushed: u64,
    /// Rows acknowledged, for synchronous inserts.
    pub delivered: Option<u64>,
}

/// An open insert.
#[derive(Debug)]
pub struct StreamInsert {
    plan: InsertPlan,
    runtime: StreamRuntime,
    router: InsertRouter<StreamEvent>,
    readers: Arc<BTreeSet<u32>>,
    records: RecordTypeCache,
    batch: Option<BatchHandle>,
    opened: Instant,
}

/// Opens an insert for `plan`.
///
/// Readers registered on the stream right now are the ones every row is
/// addressed to. A synchronous, non-re-entrant insert with at least one
/// reader registers an acknowledgment batch.
///
/// # Errors
///
/// Returns [`DbError::Schema`] if a record layout of the plan cannot be
/// unpacked, or [`DbError::Streaming`] if the router cannot be set up.
pub fn open_insert(
    plan: InsertPlan,
    runtime: &StreamRuntime,
    options: InsertOptions,
) -> Result<StreamInsert, DbError> {
    let readers = runtime.membership().targets_for(plan.stream_id);
    let mut records = RecordTypeCache::new();
    for record in plan.records.iter() {
        records.register_packed(record)?;
    }
    let selection = match options.combiner_group {
        Some(group) => QueueSelection::for_group(group, runtime.pool().len())?,
        None => QueueSelection::Any,
    };
    let router = InsertRouter::new(
        Arc::clone(runtime.pool()),
        selection,
        runtime.config().batch_size,
    )?;
    let batch = (options.synchronous && !options.reentrant && !readers.is_empty())
        .then(|| runtime.acks().create_batch());

    tracing::debug!(
        stream = %plan.stream,
        readers = readers.len(),
        ?selection,
        batch_id = batch.as_ref().map(BatchHandle::id),
        "Opened stream insert"
    );
    Ok(StreamInsert {
        plan,
        runtime: runtime.clone(),
        router,
        readers: Arc::new(readers),
        records,
        batch,
        opened: Instant::now(),
    })
}

impl StreamInsert {
    /// The plan this insert writes with.
    #[must_use]
    pub fn plan(&self) -> &InsertPlan {
        &self.plan
    }

    /// Readers the rows are addressed to.
    #[must_use]
    pub fn readers(&self) -> &BTreeSet<u32> {
        &self.readers
    }

    /// Id of the acknowledgment batch, for synchronous inserts.
    #[must_use]
    pub fn batch_id(&self) -> Option<u64> {
        self.batch.as_ref().map(BatchHandle::id)
    }

    /// Counters so far.
    #[must_use]
    pub fn stats(&self) -> RouterStats {
        self.router.stats()
    }

    /// Inserts one row and returns it unchanged.
    ///
    /// Without readers the row is encoded and counted but pushed nowhere.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidRow`] if the row width differs from the
    /// descriptor or a value does not match its field, [`DbError::Schema`]
    /// if encoding fails, or [`DbError::Streaming`] if the worker queue was
    /// closed.
    pub fn insert_row(&mut self, row: Row) -> Result<Row, DbError> {
        self.check_row(&row)?;
        let encoded = encode_row(&row)?;
        let len = self.plan.descriptor.packed().len() + encoded.len();

        if self.readers.is_empty() {
            self.router.count_unrouted(len);
            return Ok(row);
        }

        let event = StreamEvent {
            descriptor: self.plan.descriptor.packed().clone(),
            row: encoded,
            arrival_micros: Utc::now().timestamp_micros(),
            record_descs: Arc::clone(&self.plan.records),
            readers: Arc::clone(&self.readers),
            ack: self.batch.as_ref().map(BatchHandle::delivery_ack),
        };
        let queue = self.router.route(event, len)?;
        tracing::trace!(stream = %self.plan.stream, queue, "Routed row");
        Ok(row)
    }

    /// Rejects rows readers could not decode against the descriptor.
    fn check_row(&self, row: &Row) -> Result<(), DbError> {
        let schema = self.plan.descriptor.schema();
        if row.len() != schema.fields().len() {
            return Err(DbError::InvalidRow(format!(
                "stream \"{}\" expects {} values, got {}",
                self.plan.stream,
                schema.fields().len(),
                row.len()
            )));
        }
        for (datum, field) in row.iter().zip(schema.fields().iter()) {
            if matches!(datum, Datum::Null) {
                continue;
            }
            datum_to_array(datum, field, &self.records).map_err(|e| {
                DbError::InvalidRow(format!("stream \"{}\": {e}", self.plan.stream))
            })?;
        }
        Ok(())
    }

    /// Inserts every row of `batch`, whose columns are positionally aligned
    /// with the descriptor. Returns the number of rows inserted.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidRow`] if the column count differs from the
    /// descriptor, or any error of [`insert_row`](Self::insert_row).
    pub fn insert_batch(&mut self, batch: &RecordBatch) -> Result<usize, DbError> {
        if batch.num_columns() != self.plan.descriptor.len() {
            return Err(DbError::InvalidRow(format!(
                "stream \"{}\" expects {} columns, batch has {}",
                self.plan.stream,
                self.plan.descriptor.len(),
                batch.num_columns()
            )));
        }
        for idx in 0..batch.num_rows() {
            let row = batch
                .columns()
                .iter()
                .map(|col| array_to_datum(col.as_ref(), idx))
                .collect::<Result<Row, _>>()?;
            self.insert_row(row)?;
        }
        Ok(batch.num_rows())
    }

    /// Releases the worker queue and, for synchronous inserts, waits until
    /// every pushed row was acknowledged.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Streaming`] with
    /// [`Cancelled`](laminar_core::streaming::StreamingError::Cancelled) if
    /// `cancel` fires, or
    /// [`DeliveryTimeout`](laminar_core::streaming::StreamingError::DeliveryTimeout)
    /// once the configured acknowledgment timeout elapses. Both are
    /// recoverable; the acknowledgment batch is removed either way.
    pub fn close_insert(self, cancel: &CancellationToken) -> Result<InsertStats, DbError> {
        let Self {
            plan,
            runtime,
            router,
            batch,
            opened,
            ..
        } = self;
        let routed = router.finish();
        runtime
            .metrics()
            .record_insert(routed.rows, routed.bytes, routed.batches);

        let delivered = match batch {
            Some(batch) => Some(batch.wait_and_remove(
                routed.pushed,
                cancel,
                runtime.config().wait_options(),
            )?),
            None => None,
        };

        tracing::info!(
            stream = %plan.stream,
            rows = routed.rows,
            bytes = routed.bytes,
            batches = routed.batches,
            pushed = routed.pushed,
            delivered,
            elapsed_ms = opened.elapsed().as_millis(),
            "Closed stream insert"
        );
        Ok(InsertStats {
            rows: routed.rows,
            bytes: routed.bytes,
            batches: routed.batches,
            pushed: routed.pushed,
            delivered,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::membership::StaticMembership;
    use arrow_schema::DataType;
    use laminar_core::streaming::StreamingError;
    use laminar_schema::Datum;
    use std::time::Duration;

    fn runtime(config: StreamConfig) -> (StreamRuntime, Arc<StaticMembership>) {
        let membership = Arc::new(StaticMembership::new());
        let rt = StreamRuntime::new(config, Arc::clone(&membership) as _).unwrap();
        (rt, membership)
    }

    fn clicks() -> StreamDefinition {
        StreamDefinition::new(
            7,
            "clicks",
            Arc::new(Schema::new(vec![
                Field::new("user", DataType::Utf8, true),
                Field::new("n", DataType::Int64, true),
            ])),
        )
    }

    fn row(n: i64) -> Row {
        vec!["u".into(), Datum::Int64(n)]
    }

    #[test]
    fn test_plan_declared_schema_wins() {
        let plan = plan_insert(&clicks(), Some(vec![Field::new("x", DataType::Int64, true)]))
            .unwrap();
        assert_eq!(plan.descriptor.len(), 2);
        assert_eq!(plan.stream_id, 7);
    }

    #[test]
    fn test_plan_inferred_stream() {
        let stream = StreamDefinition::inferred(1, "raw");
        let plan = plan_insert(&stream, Some(vec![Field::new("x", DataType::Int64, true)]))
            .unwrap();
        assert_eq!(plan.descriptor.schema().field(0).name(), "x");

        let err = plan_insert(&stream, None).unwrap_err();
        assert!(matches!(err, DbError::InvalidInsertTarget(_)));
    }

    #[test]
    fn test_no_readers_pushes_nothing() {
        let (rt, _) = runtime(StreamConfig {
            synchronous_insert: true,
            ..StreamConfig::default()
        });
        let plan = plan_insert(&clicks(), None).unwrap();
        let mut insert = open_insert(plan, &rt, InsertOptions::from_config(rt.config())).unwrap();
        assert!(insert.batch_id().is_none());
        for n in 0..3 {
            assert_eq!(insert.insert_row(row(n)).unwrap(), row(n));
        }
        assert_eq!(rt.acks().active_batches(), 0);

        let stats = insert.close_insert(&CancellationToken::new()).unwrap();
        assert_eq!(stats.rows, 3);
        assert!(stats.bytes > 0);
        assert_eq!(stats.pushed, 0);
        assert_eq!(stats.batches, 1);
        assert_eq!(stats.delivered, None);
        assert!(rt.pool().queue(0).unwrap().is_empty());
        assert_eq!(rt.pool().queue(0).unwrap().pushed(), 0);
    }

    #[test]
    fn test_row_width_checked() {
        let (rt, _) = runtime(StreamConfig::default());
        let mut insert =
            open_insert(plan_insert(&clicks(), None).unwrap(), &rt, InsertOptions::default())
                .unwrap();
        let err = insert.insert_row(vec![Datum::Int64(1)]).unwrap_err();
        assert!(matches!(err, DbError::InvalidRow(_)));
    }

    #[test]
    fn test_mistyped_value_rejected_before_routing() {
        let (rt, membership) = runtime(StreamConfig::default());
        membership.register(7, 1);
        let mut insert =
            open_insert(plan_insert(&clicks(), None).unwrap(), &rt, InsertOptions::default())
                .unwrap();

        let err = insert
            .insert_row(vec!["u".into(), "not a number".into()])
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidRow(_)));
        assert!(err.to_string().contains("'n'"));
        assert_eq!(insert.stats().rows, 0);

        insert.insert_row(vec![Datum::Null, Datum::Int64(3)]).unwrap();
        let stats = insert.close_insert(&CancellationToken::new()).unwrap();
        assert_eq!(stats.pushed, 1);
        assert_eq!(rt.pool().queue(0).unwrap().len(), 1);
    }

    #[test]
    fn test_record_value_checked_against_layout() {
        use laminar_schema::descriptor::record_field;

        let (rt, membership) = runtime(StreamConfig::default());
        membership.register(7, 1);
        let layout = Arc::new(Schema::new(vec![Field::new("x", DataType::Int32, true)]));
        let stream = StreamDefinition::new(
            7,
            "points",
            Arc::new(Schema::new(vec![record_field("p", 4)])),
        )
        .with_record(RecordDescriptor::new(4, &layout).unwrap());
        let mut insert =
            open_insert(plan_insert(&stream, None).unwrap(), &rt, InsertOptions::default())
                .unwrap();

        insert
            .insert_row(vec![Datum::Record(vec![Datum::Int32(1)])])
            .unwrap();
        let err = insert
            .insert_row(vec![Datum::Record(vec![Datum::Int64(1)])])
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidRow(_)));
        assert_eq!(insert.stats().pushed, 1);
    }

    #[test]
    fn test_events_carry_readers_and_descriptor() {
        let (rt, membership) = runtime(StreamConfig::default());
        membership.register(7, 1);
        membership.register(7, 2);
        let plan = plan_insert(&clicks(), None).unwrap();
        let packed = plan.descriptor.packed().clone();
        let mut insert = open_insert(plan, &rt, InsertOptions::default()).unwrap();
        insert.insert_row(row(1)).unwrap();
        let stats = insert.close_insert(&CancellationToken::new()).unwrap();
        assert_eq!(stats.pushed, 1);

        let event = rt.pool().queue(0).unwrap().try_pop().unwrap();
        assert_eq!(event.descriptor, packed);
        assert!(event.is_for(1) && event.is_for(2));
        assert!(event.ack.is_none());
        assert!(event.arrival_micros > 0);
    }

    #[test]
    fn test_insert_batch_rows() {
        use arrow_array::{Int64Array, StringArray};

        let (rt, membership) = runtime(StreamConfig::default());
        membership.register(7, 1);
        let plan = plan_insert(&clicks(), None).unwrap();
        let schema = Arc::clone(plan.descriptor.schema());
        let mut insert = open_insert(plan, &rt, InsertOptions::default()).unwrap();

        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec![Some("a"), None])),
                Arc::new(Int64Array::from(vec![1, 2])),
            ],
        )
        .unwrap();
        assert_eq!(insert.insert_batch(&batch).unwrap(), 2);
        assert_eq!(insert.stats().pushed, 2);

        let narrow = batch.project(&[1]).unwrap();
        assert!(matches!(
            insert.insert_batch(&narrow),
            Err(DbError::InvalidRow(_))
        ));
        insert.close_insert(&CancellationToken::new()).unwrap();

        let queue = rt.pool().queue(0).unwrap();
        let first = laminar_schema::value::decode_row(&queue.try_pop().unwrap().row).unwrap();
        assert_eq!(first, vec!["a".into(), Datum::Int64(1)]);
        let second = laminar_schema::value::decode_row(&queue.try_pop().unwrap().row).unwrap();
        assert_eq!(second, vec![Datum::Null, Datum::Int64(2)]);
    }

    #[test]
    fn test_reentrant_insert_never_waits() {
        let (rt, membership) = runtime(StreamConfig::default());
        membership.register(7, 1);
        let options = InsertOptions {
            synchronous: true,
            reentrant: true,
            combiner_group: None,
        };
        let mut insert = open_insert(plan_insert(&clicks(), None).unwrap(), &rt, options).unwrap();
        assert!(insert.batch_id().is_none());
        insert.insert_row(row(1)).unwrap();
        let stats = insert.close_insert(&CancellationToken::new()).unwrap();
        assert_eq!(stats.delivered, None);
    }

    #[test]
    fn test_combiner_pins_to_group_queue() {
        let (rt, membership) = runtime(StreamConfig {
            num_workers: 3,
            batch_size: 2,
            ..StreamConfig::default()
        });
        membership.register(7, 1);
        let options = InsertOptions {
            combiner_group: Some(5),
            ..InsertOptions::default()
        };
        let mut insert = open_insert(plan_insert(&clicks(), None).unwrap(), &rt, options).unwrap();
        for n in 0..5 {
            insert.insert_row(row(n)).unwrap();
        }
        let stats = insert.close_insert(&CancellationToken::new()).unwrap();
        assert_eq!(stats.batches, 3);
        assert_eq!(rt.pool().queue(2).unwrap().len(), 5);
    }

    #[test]
    fn test_synchronous_close_is_cancellable() {
        let (rt, membership) = runtime(StreamConfig {
            synchronous_insert: true,
            ack_poll_interval: Duration::from_millis(1),
            ..StreamConfig::default()
        });
        membership.register(7, 1);
        let mut insert = open_insert(
            plan_insert(&clicks(), None).unwrap(),
            &rt,
            InsertOptions::from_config(rt.config()),
        )
        .unwrap();
        insert.insert_row(row(1)).unwrap();
        assert_eq!(rt.acks().active_batches(), 1);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = insert.close_insert(&cancel).unwrap_err();
        assert!(matches!(
            err,
            DbError::Streaming(StreamingError::Cancelled { delivered: 0, expected: 1, .. })
        ));
        assert!(err.is_recoverable());
        assert_eq!(rt.acks().active_batches(), 0);
    }

    #[test]
    fn test_synchronous_close_times_out() {
        let (rt, membership) = runtime(StreamConfig {
            synchronous_insert: true,
            ack_poll_interval: Duration::from_millis(1),
            ack_timeout: Some(Duration::from_millis(5)),
            ..StreamConfig::default()
        });
        membership.register(7, 1);
        let mut insert = open_insert(
            plan_insert(&clicks(), None).unwrap(),
            &rt,
            InsertOptions::from_config(rt.config()),
        )
        .unwrap();
        insert.insert_row(row(1)).unwrap();
        let err = insert.close_insert(&CancellationToken::new()).unwrap_err();
        assert!(matches!(
            err,
            DbError::Streaming(StreamingError::DeliveryTimeout { .. })
        ));
    }
}
