//! Shared state of the stream read/write path.

use std::sync::Arc;

use laminar_core::streaming::{AckTracker, WorkerQueuePool};
use laminar_schema::CoercionRegistry;

use super::event::StreamEvent;
use super::membership::ReaderMembership;
use super::metrics::StreamMetrics;
use super::source::{QueueEventSource, ReaderSource, WorkerFanout};
use crate::config::StreamConfig;
use crate::error::DbError;
use laminar_core::streaming::StreamingError;

/// Worker queues, acknowledgment registry and counters shared by every
/// scan and insert of one database.
#[derive(Debug, Clone)]
pub struct StreamRuntime {
    config: StreamConfig,
    pool: Arc<WorkerQueuePool<StreamEvent>>,
    acks: AckTracker,
    membership: Arc<dyn ReaderMembership>,
    coercions: Arc<CoercionRegistry>,
    metrics: Arc<StreamMetrics>,
    fanouts: Arc<[WorkerFanout]>,
}

impl StreamRuntime {
    /// Creates a runtime with `config.num_workers` queues.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Config`] if the configuration is invalid.
    pub fn new(
        config: StreamConfig,
        membership: Arc<dyn ReaderMembership>,
    ) -> Result<Self, DbError> {
        config.validate()?;
        let pool = WorkerQueuePool::new(config.num_workers, config.queue_capacity_bytes)?;
        let fanouts = (0..pool.len())
            .filter_map(|idx| pool.queue(idx))
            .map(|queue| {
                WorkerFanout::new(QueueEventSource::new(
                    Arc::clone(queue),
                    config.batch_size,
                    config.scan_poll_timeout,
                ))
            })
            .collect();
        tracing::info!(
            workers = config.num_workers,
            queue_capacity_bytes = config.queue_capacity_bytes,
            batch_size = config.batch_size,
            synchronous_insert = config.synchronous_insert,
            "Stream runtime started"
        );
        Ok(Self {
            config,
            pool: Arc::new(pool),
            acks: AckTracker::new(),
            membership,
            coercions: Arc::new(CoercionRegistry::new()),
            metrics: Arc::new(StreamMetrics::default()),
            fanouts,
        })
    }

    /// Replaces the coercion registry used by scans opened afterwards.
    #[must_use]
    pub fn with_coercions(mut self, coercions: CoercionRegistry) -> Self {
        self.coercions = Arc::new(coercions);
        self
    }

    /// Subscribes a scan of `reader` to worker `worker`'s queue.
    ///
    /// Every scan subscribed to a worker receives the events addressed to
    /// its reader; the queue itself is consumed once.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Streaming`] if `worker` is out of range.
    pub fn reader_source(&self, worker: usize, reader: u32) -> Result<ReaderSource, DbError> {
        let fanout = self
            .fanouts
            .get(worker)
            .ok_or(StreamingError::InvalidWorker {
                index: worker,
                count: self.fanouts.len(),
            })?;
        Ok(fanout.subscribe(reader))
    }

    /// Configuration.
    #[must_use]
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Worker queue pool.
    #[must_use]
    pub fn pool(&self) -> &Arc<WorkerQueuePool<StreamEvent>> {
        &self.pool
    }

    /// Acknowledgment registry.
    #[must_use]
    pub fn acks(&self) -> &AckTracker {
        &self.acks
    }

    /// Reader membership lookup.
    #[must_use]
    pub fn membership(&self) -> &Arc<dyn ReaderMembership> {
        &self.membership
    }

    /// Coercion registry.
    #[must_use]
    pub fn coercions(&self) -> &Arc<CoercionRegistry> {
        &self.coercions
    }

    /// Counters.
    #[must_use]
    pub fn metrics(&self) -> &Arc<StreamMetrics> {
        &self.metrics
    }

    /// Closes every worker queue. Pending events stay readable; new pushes
    /// fail.
    pub fn shutdown(&self) {
        self.pool.close_all();
        tracing::info!(
            active_batches = self.acks.active_batches(),
            "Stream runtime shut down"
        );
    }
}
