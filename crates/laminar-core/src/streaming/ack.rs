//! Delivery acknowledgment for synchronous inserts.
//!
//! A synchronous insert registers an [`InsertBatch`] with the shared
//! [`AckTracker`] and attaches a [`DeliveryAck`] to every row it routes.
//! The consuming side calls [`DeliveryAck::ack`] once per row it has taken.
//! The inserter then calls [`BatchHandle::wait_and_remove`], which blocks
//! until the expected number of rows was acknowledged.
//!
//! # Memory ordering
//!
//! `delivered` and `target` are only changed with `AcqRel` read-modify-write
//! operations and read with `Acquire`. `delivered` never exceeds `target`;
//! surplus acknowledgments are dropped with a warning.
//!
//! # Cancellation
//!
//! The wait re-checks a [`CancellationToken`] every poll interval and stops
//! at an optional deadline. Either way the batch is removed from the tracker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio_util::sync::CancellationToken;

use super::error::StreamingError;
use crate::error_codes::HotPathError;

/// Default interval between cancellation checks while waiting.
pub const DEFAULT_ACK_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A run of rows sent by one insert operation.
#[derive(Debug)]
pub struct InsertBatch {
    id: u64,
    target: AtomicU64,
    delivered: AtomicU64,
    lock: Mutex<()>,
    changed: Condvar,
}

impl InsertBatch {
    fn new(id: u64) -> Self {
        Self {
            id,
            target: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            lock: Mutex::new(()),
            changed: Condvar::new(),
        }
    }

    /// Batch id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Rows sent with acknowledgment enabled.
    #[must_use]
    pub fn target(&self) -> u64 {
        self.target.load(Ordering::Acquire)
    }

    /// Rows acknowledged so far.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Acquire)
    }

    fn expect_rows(&self, n: u64) {
        self.target.fetch_add(n, Ordering::AcqRel);
    }

    /// Records one delivered row. Returns `false` if the batch was already
    /// complete.
    fn ack(&self) -> bool {
        let target = self.target.load(Ordering::Acquire);
        let applied = self
            .delivered
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |d| {
                (d < target).then_some(d + 1)
            })
            .is_ok();
        if applied {
            let _guard = self.lock.lock();
            self.changed.notify_all();
        } else {
            tracing::warn!(
                batch_id = self.id,
                target,
                reason = %HotPathError::SurplusAck,
                "Surplus delivery acknowledgment"
            );
        }
        applied
    }
}

/// Acknowledgment capability attached to each routed row.
#[derive(Debug, Clone)]
pub struct DeliveryAck {
    batch: Arc<InsertBatch>,
}

impl DeliveryAck {
    /// Reports the row as delivered. Returns `false` for a surplus ack.
    pub fn ack(&self) -> bool {
        self.batch.ack()
    }

    /// Id of the batch this row belongs to.
    #[must_use]
    pub fn batch_id(&self) -> u64 {
        self.batch.id
    }
}

#[derive(Debug, Default)]
struct TrackerInner {
    batches: Mutex<HashMap<u64, Arc<InsertBatch>>>,
    next_id: AtomicU64,
}

/// Registry of in-flight insert batches.
///
/// Cloning shares the registry.
#[derive(Debug, Clone, Default)]
pub struct AckTracker {
    inner: Arc<TrackerInner>,
}

impl AckTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new batch.
    #[must_use]
    pub fn create_batch(&self) -> BatchHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let batch = Arc::new(InsertBatch::new(id));
        self.inner.batches.lock().insert(id, Arc::clone(&batch));
        tracing::trace!(batch_id = id, "Registered insert batch");
        BatchHandle {
            batch,
            tracker: self.clone(),
        }
    }

    /// Acknowledges one row of batch `batch_id`, for consumers that only
    /// carry the id. Returns `false` if the batch is unknown or complete.
    pub fn ack(&self, batch_id: u64) -> bool {
        let batch = self.inner.batches.lock().get(&batch_id).cloned();
        batch.is_some_and(|b| b.ack())
    }

    /// Number of registered batches.
    #[must_use]
    pub fn active_batches(&self) -> usize {
        self.inner.batches.lock().len()
    }

    fn remove(&self, batch_id: u64) {
        self.inner.batches.lock().remove(&batch_id);
    }
}

/// How long and how often [`BatchHandle::wait_and_remove`] waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    /// Interval between cancellation checks.
    pub poll_interval: Duration,
    /// Give up after this long; `None` waits until cancelled.
    pub timeout: Option<Duration>,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_ACK_POLL_INTERVAL,
            timeout: None,
        }
    }
}

/// Inserter-side handle of a registered batch.
///
/// Dropping the handle removes the batch from the tracker.
#[derive(Debug)]
pub struct BatchHandle {
    batch: Arc<InsertBatch>,
    tracker: AckTracker,
}

impl BatchHandle {
    /// Batch id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.batch.id
    }

    /// The tracked batch.
    #[must_use]
    pub fn batch(&self) -> &Arc<InsertBatch> {
        &self.batch
    }

    /// Counts one more row to wait for and returns its acknowledgment.
    #[must_use]
    pub fn delivery_ack(&self) -> DeliveryAck {
        self.batch.expect_rows(1);
        DeliveryAck {
            batch: Arc::clone(&self.batch),
        }
    }

    /// Blocks until `expected` rows were acknowledged, then removes the
    /// batch. Returns the delivered count.
    ///
    /// # Errors
    ///
    /// Returns [`StreamingError::Cancelled`] if `cancel` fires, or
    /// [`StreamingError::DeliveryTimeout`] once `options.timeout` elapses.
    pub fn wait_and_remove(
        self,
        expected: u64,
        cancel: &CancellationToken,
        options: WaitOptions,
    ) -> Result<u64, StreamingError> {
        let started = Instant::now();
        let deadline = options.timeout.map(|t| started + t);
        let batch = &self.batch;

        let mut guard = batch.lock.lock();
        loop {
            let delivered = batch.delivered();
            if delivered >= expected {
                tracing::debug!(
                    batch_id = batch.id,
                    delivered,
                    waited_us = started.elapsed().as_micros(),
                    "Insert batch acknowledged"
                );
                return Ok(delivered);
            }
            if cancel.is_cancelled() {
                return Err(StreamingError::Cancelled {
                    batch_id: batch.id,
                    delivered,
                    expected,
                });
            }
            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(StreamingError::DeliveryTimeout {
                            batch_id: batch.id,
                            delivered,
                            expected,
                            waited: now - started,
                        });
                    }
                    options.poll_interval.min(deadline - now)
                }
                None => options.poll_interval,
            };
            let _ = batch.changed.wait_for(&mut guard, wait);
        }
    }
}

impl Drop for BatchHandle {
    fn drop(&mut self) {
        self.tracker.remove(self.batch.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn fast() -> WaitOptions {
        WaitOptions {
            poll_interval: Duration::from_millis(1),
            timeout: None,
        }
    }

    #[test]
    fn test_three_rows_release_waiter() {
        let tracker = AckTracker::new();
        let batch = tracker.create_batch();
        let acks: Vec<_> = (0..3).map(|_| batch.delivery_ack()).collect();
        assert_eq!(batch.batch().target(), 3);

        let consumer = thread::spawn(move || {
            for ack in acks {
                thread::sleep(Duration::from_millis(5));
                assert!(ack.ack());
            }
        });

        let delivered = batch
            .wait_and_remove(3, &CancellationToken::new(), fast())
            .unwrap();
        consumer.join().unwrap();
        assert_eq!(delivered, 3);
        assert_eq!(tracker.active_batches(), 0);
    }

    #[test]
    fn test_delivered_never_exceeds_target() {
        let tracker = AckTracker::new();
        let batch = tracker.create_batch();
        let ack = batch.delivery_ack();
        assert!(ack.ack());
        assert!(!ack.ack());
        assert_eq!(batch.batch().delivered(), 1);
    }

    #[test]
    fn test_ack_by_id() {
        let tracker = AckTracker::new();
        let batch = tracker.create_batch();
        let _ack = batch.delivery_ack();
        assert!(tracker.ack(batch.id()));
        assert!(!tracker.ack(batch.id() + 100));
        assert_eq!(batch.batch().delivered(), 1);
    }

    #[test]
    fn test_cancellation_ends_wait_and_removes_batch() {
        let tracker = AckTracker::new();
        let batch = tracker.create_batch();
        let _ack = batch.delivery_ack();
        let token = CancellationToken::new();

        let canceller = {
            let token = token.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                token.cancel();
            })
        };
        let err = batch.wait_and_remove(1, &token, fast()).unwrap_err();
        canceller.join().unwrap();
        assert!(matches!(
            err,
            StreamingError::Cancelled {
                delivered: 0,
                expected: 1,
                ..
            }
        ));
        assert!(err.is_recoverable());
        assert_eq!(tracker.active_batches(), 0);
    }

    #[test]
    fn test_timeout() {
        let tracker = AckTracker::new();
        let batch = tracker.create_batch();
        let _ack = batch.delivery_ack();
        let options = WaitOptions {
            poll_interval: Duration::from_millis(1),
            timeout: Some(Duration::from_millis(15)),
        };
        let err = batch
            .wait_and_remove(1, &CancellationToken::new(), options)
            .unwrap_err();
        assert!(matches!(err, StreamingError::DeliveryTimeout { .. }));
        assert_eq!(tracker.active_batches(), 0);
    }

    #[test]
    fn test_zero_expected_returns_immediately() {
        let tracker = AckTracker::new();
        let batch = tracker.create_batch();
        assert_eq!(
            batch
                .wait_and_remove(0, &CancellationToken::new(), WaitOptions::default())
                .unwrap(),
            0
        );
    }

    #[test]
    fn test_batch_ids_are_unique() {
        let tracker = AckTracker::new();
        let a = tracker.create_batch();
        let b = tracker.create_batch();
        assert_ne!(a.id(), b.id());
        assert_eq!(tracker.active_batches(), 2);
        drop(a);
        assert_eq!(tracker.active_batches(), 1);
    }
}
