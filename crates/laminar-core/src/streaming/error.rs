//! Streaming error types.

use std::time::Duration;

use crate::error_codes;

/// Errors from the worker queue pool, the insert router and the ack tracker.
#[derive(Debug, thiserror::Error)]
pub enum StreamingError {
    /// The pool was created without queues.
    #[error("[LDB-6001] worker queue pool has no queues")]
    NoWorkers,

    /// A worker index outside the pool.
    #[error("[LDB-6002] worker {index} out of range (pool has {count})")]
    InvalidWorker {
        /// Requested index.
        index: usize,
        /// Pool size.
        count: usize,
    },

    /// The queue was closed while pushing.
    #[error("[LDB-6003] worker queue {0} is closed")]
    QueueClosed(usize),

    /// The acknowledgment wait passed its deadline.
    #[error(
        "[LDB-6004] batch {batch_id}: {delivered}/{expected} rows acknowledged after {waited:?}"
    )]
    DeliveryTimeout {
        /// Batch id.
        batch_id: u64,
        /// Rows acknowledged so far.
        delivered: u64,
        /// Rows waited for.
        expected: u64,
        /// Time spent waiting.
        waited: Duration,
    },

    /// The acknowledgment wait was cancelled.
    #[error("[LDB-6005] batch {batch_id}: wait cancelled at {delivered}/{expected} rows")]
    Cancelled {
        /// Batch id.
        batch_id: u64,
        /// Rows acknowledged so far.
        delivered: u64,
        /// Rows waited for.
        expected: u64,
    },

    /// Invalid router or pool configuration.
    #[error("[LDB-0001] invalid streaming config: {0}")]
    InvalidConfig(String),
}

impl StreamingError {
    /// The `LDB-NNNN` code carried in the message.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoWorkers => error_codes::NO_WORKERS,
            Self::InvalidWorker { .. } => error_codes::INVALID_WORKER,
            Self::QueueClosed(_) => error_codes::QUEUE_CLOSED,
            Self::DeliveryTimeout { .. } => error_codes::DELIVERY_TIMEOUT,
            Self::Cancelled { .. } => error_codes::DELIVERY_CANCELLED,
            Self::InvalidConfig(_) => error_codes::INVALID_CONFIG,
        }
    }

    /// Whether the operation can be retried by the caller.
    ///
    /// Timeouts and cancellations leave the rows queued; only the wait ended.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::DeliveryTimeout { .. } | Self::Cancelled { .. })
    }
}
