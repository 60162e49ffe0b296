//! Insert routing over the worker queue pool.
//!
//! [`InsertRouter`] pushes encoded rows onto worker queues for one insert
//! operation. It holds one queue's writer lock across a run of pushes and
//! moves to another queue:
//!
//! - after every `batch_size` rows (load spreading), and
//! - when a push finds the queue full (backpressure).
//!
//! Backpressure retries are bounded by the pool size. The last attempt is a
//! blocking push, so a row is never dropped and a full queue never surfaces
//! as an error.
//!
//! A [`QueueSelection::Pinned`] router never changes queue: rows from one
//! combiner group must reach one worker in order. At a batch boundary it
//! releases and retakes the same queue; on a full queue it blocks on it.

use std::sync::Arc;

use super::error::StreamingError;
use super::worker_queue::{PushError, QueueHandle, WorkerQueuePool};
use crate::error_codes::HotPathError;

/// How an inserter picks worker queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueSelection {
    /// Any free queue, no ordering across queues.
    #[default]
    Any,
    /// Always the queue at this index.
    Pinned(usize),
}

impl QueueSelection {
    /// Pins a combiner group to `group_id % num_workers`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamingError::NoWorkers`] if `num_workers` is zero.
    pub fn for_group(group_id: u64, num_workers: usize) -> Result<Self, StreamingError> {
        if num_workers == 0 {
            return Err(StreamingError::NoWorkers);
        }
        // Remainder is < num_workers, so it fits in usize.
        #[allow(clippy::cast_possible_truncation)]
        let index = (group_id % num_workers as u64) as usize;
        Ok(Self::Pinned(index))
    }
}

/// Counters of one insert operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    /// Rows inserted, routed or not.
    pub rows: u64,
    /// Encoded bytes inserted, routed or not.
    pub bytes: u64,
    /// Batches written: 1 for the first, plus one per batch boundary and
    /// one per backpressure episode.
    pub batches: u64,
    /// Rows actually pushed to a queue.
    pub pushed: u64,
}

fn queue_closed(index: usize) -> StreamingError {
    tracing::debug!(queue = index, reason = %HotPathError::QueueClosed, "Push rejected");
    StreamingError::QueueClosed(index)
}

/// Routes rows of one insert operation onto worker queues.
#[derive(Debug)]
pub struct InsertRouter<T> {
    pool: Arc<WorkerQueuePool<T>>,
    selection: QueueSelection,
    batch_size: u64,
    current: Option<QueueHandle<T>>,
    stats: RouterStats,
}

impl<T> InsertRouter<T> {
    /// Creates a router. No queue is taken until the first row.
    ///
    /// # Errors
    ///
    /// Returns [`StreamingError::InvalidConfig`] for a zero `batch_size`, or
    /// [`StreamingError::InvalidWorker`] for a pinned index outside the pool.
    pub fn new(
        pool: Arc<WorkerQueuePool<T>>,
        selection: QueueSelection,
        batch_size: usize,
    ) -> Result<Self, StreamingError> {
        if batch_size == 0 {
            return Err(StreamingError::InvalidConfig(
                "batch_size must be > 0".into(),
            ));
        }
        if let QueueSelection::Pinned(index) = selection {
            if index >= pool.len() {
                return Err(StreamingError::InvalidWorker {
                    index,
                    count: pool.len(),
                });
            }
        }
        Ok(Self {
            pool,
            selection,
            batch_size: batch_size as u64,
            current: None,
            stats: RouterStats {
                batches: 1,
                ..RouterStats::default()
            },
        })
    }

    /// The queue selection policy.
    #[must_use]
    pub fn selection(&self) -> QueueSelection {
        self.selection
    }

    /// Index of the currently held queue.
    #[must_use]
    pub fn current_queue(&self) -> Option<usize> {
        self.current.as_ref().map(QueueHandle::index)
    }

    /// Counters so far.
    #[must_use]
    pub fn stats(&self) -> RouterStats {
        self.stats
    }

    /// Counts a row that had no readers and was not pushed anywhere.
    pub fn count_unrouted(&mut self, len: usize) {
        self.stats.rows += 1;
        self.stats.bytes += len as u64;
    }

    /// Pushes `item` (`len` encoded bytes) and returns the queue index it
    /// landed on.
    ///
    /// # Errors
    ///
    /// Returns [`StreamingError::QueueClosed`] if the queue was closed.
    /// A full queue is never an error.
    pub fn route(&mut self, item: T, len: usize) -> Result<usize, StreamingError> {
        self.stats.rows += 1;
        self.stats.bytes += len as u64;

        if self.stats.pushed > 0 && self.stats.pushed % self.batch_size == 0 {
            self.switch_at_batch_boundary()?;
        }
        let handle = match self.current.take() {
            Some(handle) => handle,
            None => self.acquire()?,
        };

        match self.selection {
            QueueSelection::Pinned(_) => self.push_pinned(handle, item, len),
            QueueSelection::Any => self.push_any(handle, item, len),
        }
    }

    fn push_pinned(
        &mut self,
        handle: QueueHandle<T>,
        item: T,
        len: usize,
    ) -> Result<usize, StreamingError> {
        let index = handle.index();
        let item = match handle.push(item, len, false) {
            Ok(()) => return Ok(self.pushed(handle)),
            Err(PushError::Closed(_)) => return Err(queue_closed(index)),
            Err(PushError::Full(item)) => item,
        };
        self.stats.batches += 1;
        tracing::warn!(
            queue = index,
            reason = %HotPathError::QueueFull,
            "Pinned queue full; blocking until space"
        );
        match handle.push(item, len, true) {
            Ok(()) => Ok(self.pushed(handle)),
            Err(e) => {
                drop(e.into_inner());
                Err(queue_closed(index))
            }
        }
    }

    fn push_any(
        &mut self,
        mut handle: QueueHandle<T>,
        mut item: T,
        len: usize,
    ) -> Result<usize, StreamingError> {
        let num_queues = self.pool.len();
        let mut attempt = 1;
        loop {
            let index = handle.index();
            let must_succeed = attempt >= num_queues;
            if must_succeed && attempt > 1 {
                tracing::warn!(
                    queue = index,
                    attempts = attempt,
                    "All worker queues full; blocking until space"
                );
            }
            match handle.push(item, len, must_succeed) {
                Ok(()) => return Ok(self.pushed(handle)),
                Err(PushError::Closed(_)) => return Err(queue_closed(index)),
                Err(PushError::Full(back)) => {
                    item = back;
                    drop(handle);
                    if attempt == 1 {
                        self.stats.batches += 1;
                    }
                    tracing::debug!(
                        queue = index,
                        attempt,
                        reason = %HotPathError::QueueFull,
                        "Retrying on another worker queue"
                    );
                    handle = self.pool.acquire_any(Some(index));
                    attempt += 1;
                }
            }
        }
    }

    fn pushed(&mut self, handle: QueueHandle<T>) -> usize {
        let index = handle.index();
        self.stats.pushed += 1;
        self.current = Some(handle);
        index
    }

    fn switch_at_batch_boundary(&mut self) -> Result<(), StreamingError> {
        let previous = self.current.take().map(|h| h.index());
        self.stats.batches += 1;
        let next = self.acquire()?;
        tracing::debug!(
            from = ?previous,
            to = next.index(),
            pushed = self.stats.pushed,
            "Switching worker queue at batch boundary"
        );
        self.current = Some(next);
        Ok(())
    }

    fn acquire(&self) -> Result<QueueHandle<T>, StreamingError> {
        match self.selection {
            QueueSelection::Pinned(index) => self.pool.acquire(index),
            QueueSelection::Any => Ok(self.pool.acquire_any(None)),
        }
    }

    /// Releases the held queue, if any.
    pub fn release(&mut self) {
        self.current = None;
    }

    /// Releases the held queue and returns the final counters.
    pub fn finish(mut self) -> RouterStats {
        self.release();
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    fn pool(n: usize, cap: usize) -> Arc<WorkerQueuePool<u32>> {
        Arc::new(WorkerQueuePool::new(n, cap).unwrap())
    }

    fn drain(pool: &WorkerQueuePool<u32>, index: usize) -> Vec<u32> {
        let q = pool.queue(index).unwrap();
        std::iter::from_fn(|| q.try_pop()).collect()
    }

    #[test]
    fn test_rejects_zero_batch_size() {
        assert!(matches!(
            InsertRouter::new(pool(1, 100), QueueSelection::Any, 0),
            Err(StreamingError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rejects_pinned_out_of_range() {
        assert!(matches!(
            InsertRouter::new(pool(2, 100), QueueSelection::Pinned(5), 10),
            Err(StreamingError::InvalidWorker { index: 5, count: 2 })
        ));
    }

    #[test]
    fn test_group_pinning_is_modulo() {
        assert_eq!(
            QueueSelection::for_group(7, 3).unwrap(),
            QueueSelection::Pinned(1)
        );
        assert!(QueueSelection::for_group(7, 0).is_err());
    }

    #[test]
    fn test_same_batch_stays_on_one_queue_in_order() {
        let p = pool(3, 1_000);
        let mut router = InsertRouter::new(Arc::clone(&p), QueueSelection::Any, 100).unwrap();
        let first = router.route(0, 1).unwrap();
        for i in 1..10 {
            assert_eq!(router.route(i, 1).unwrap(), first);
        }
        let stats = router.finish();
        assert_eq!(stats.rows, 10);
        assert_eq!(stats.bytes, 10);
        assert_eq!(stats.batches, 1);
        assert_eq!(drain(&p, first), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_batch_boundary_switches_queue() {
        let p = pool(2, 1_000);
        let mut router = InsertRouter::new(Arc::clone(&p), QueueSelection::Any, 2).unwrap();
        for i in 0..6 {
            router.route(i, 1).unwrap();
        }
        assert_eq!(router.stats().batches, 3);
        let total = drain(&p, 0).len() + drain(&p, 1).len();
        assert_eq!(total, 6);
    }

    #[test]
    fn test_pinned_retakes_same_queue() {
        let p = pool(3, 1_000);
        let mut router = InsertRouter::new(Arc::clone(&p), QueueSelection::Pinned(2), 2).unwrap();
        for i in 0..5 {
            assert_eq!(router.route(i, 1).unwrap(), 2);
        }
        assert_eq!(router.stats().batches, 3);
        assert_eq!(drain(&p, 2), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_full_queue_retries_elsewhere() {
        let p = pool(2, 10);
        p.queue(0).unwrap().push(100, 10, false).unwrap();
        let held = p.acquire(1).unwrap();

        let mut router = InsertRouter::new(Arc::clone(&p), QueueSelection::Any, 100).unwrap();
        let router_thread = thread::spawn(move || {
            let index = router.route(1, 5).unwrap();
            (index, router.finish())
        });
        thread::sleep(Duration::from_millis(20));
        drop(held);
        let (index, stats) = router_thread.join().unwrap();
        assert_eq!(index, 1);
        assert_eq!(stats.batches, 2);
        assert_eq!(drain(&p, 1), vec![1]);
    }

    #[test]
    fn test_all_queues_full_blocks_then_succeeds() {
        const K: usize = 3;
        let p = pool(K, 10);
        for i in 0..K {
            p.queue(i).unwrap().push(1_000, 10, false).unwrap();
        }

        let stop = Arc::new(AtomicBool::new(false));
        let consumer = {
            let p = Arc::clone(&p);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                let mut seen = Vec::new();
                while !stop.load(Ordering::Acquire) {
                    for i in 0..K {
                        if let Some(v) = p.queue(i).unwrap().try_pop() {
                            seen.push(v);
                        }
                    }
                    thread::sleep(Duration::from_millis(1));
                }
                for i in 0..K {
                    seen.extend(drain(&p, i));
                }
                seen
            })
        };

        let mut router = InsertRouter::new(Arc::clone(&p), QueueSelection::Any, 100).unwrap();
        router.route(7, 10).unwrap();
        let stats = router.finish();
        stop.store(true, Ordering::Release);

        let seen = consumer.join().unwrap();
        assert!(seen.contains(&7));
        // One backpressure episode, however many queues were tried.
        assert_eq!(stats.batches, 2);
        assert_eq!(stats.pushed, 1);
    }

    #[test]
    fn test_pinned_full_queue_blocks_on_same_queue() {
        let p = pool(2, 10);
        p.queue(0).unwrap().push(1_000, 10, false).unwrap();

        let consumer = {
            let p = Arc::clone(&p);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                p.queue(0).unwrap().try_pop()
            })
        };
        let mut router = InsertRouter::new(Arc::clone(&p), QueueSelection::Pinned(0), 100).unwrap();
        assert_eq!(router.route(5, 10).unwrap(), 0);
        assert_eq!(router.stats().batches, 2);
        router.release();
        assert_eq!(consumer.join().unwrap(), Some(1_000));
        assert_eq!(drain(&p, 0), vec![5]);
        assert!(p.queue(1).unwrap().is_empty());
    }

    #[test]
    fn test_closed_queue_is_an_error() {
        let p = pool(1, 10);
        p.close_all();
        let mut router = InsertRouter::new(Arc::clone(&p), QueueSelection::Any, 10).unwrap();
        assert!(matches!(
            router.route(1, 1),
            Err(StreamingError::QueueClosed(0))
        ));
    }

    #[test]
    fn test_unrouted_rows_are_counted() {
        let p = pool(1, 10);
        let mut router = InsertRouter::new(Arc::clone(&p), QueueSelection::Any, 10).unwrap();
        router.count_unrouted(4);
        router.count_unrouted(6);
        assert_eq!(router.current_queue(), None);
        let stats = router.finish();
        assert_eq!(stats.rows, 2);
        assert_eq!(stats.bytes, 10);
        assert_eq!(stats.pushed, 0);
        assert_eq!(stats.batches, 1);
        assert!(p.queue(0).unwrap().is_empty());
    }
}
