//! Stream write path.
//!
//! - [`worker_queue`]: byte-bounded worker input queues and their pool
//! - [`router`]: spreads an insert's rows over the pool with bounded retry
//! - [`ack`]: synchronous delivery tracking
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use laminar_core::streaming::{InsertRouter, QueueSelection, WorkerQueuePool};
//!
//! let pool = Arc::new(WorkerQueuePool::new(4, 8 << 20)?);
//! let mut router = InsertRouter::new(Arc::clone(&pool), QueueSelection::Any, 10_000)?;
//! router.route(row_bytes, len)?;
//! let stats = router.finish();
//! ```

pub mod ack;
pub mod error;
pub mod router;
pub mod worker_queue;

pub use ack::{AckTracker, BatchHandle, DeliveryAck, InsertBatch, WaitOptions};
pub use error::StreamingError;
pub use router::{InsertRouter, QueueSelection, RouterStats};
pub use worker_queue::{PushError, QueueHandle, WorkerQueue, WorkerQueuePool};
