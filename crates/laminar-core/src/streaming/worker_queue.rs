//! Bounded worker input queues.
//!
//! Each worker owns one [`WorkerQueue`]. Capacity is measured in bytes of
//! encoded rows, not in items. A writer takes the queue's writer lock through
//! [`WorkerQueuePool::acquire`] or [`WorkerQueuePool::acquire_any`] and holds
//! the returned [`QueueHandle`] across a run of pushes; dropping the handle
//! releases the queue. Consumers pop without taking the writer lock.
//!
//! # Push semantics
//!
//! - A push that fits is accepted immediately.
//! - An item larger than the whole capacity is accepted when the queue is
//!   empty, so oversized rows cannot wedge a queue forever.
//! - Otherwise a non-blocking push hands the item back in
//!   [`PushError::Full`]; a `must_succeed` push waits for room instead.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{ArcMutexGuard, Condvar, Mutex, RawMutex};

use super::error::StreamingError;

/// Default per-queue capacity in bytes (8 MiB).
pub const DEFAULT_QUEUE_CAPACITY_BYTES: usize = 8 * 1024 * 1024;

/// A push that was not accepted. The item is handed back.
#[derive(Debug)]
pub enum PushError<T> {
    /// No room for the item right now.
    Full(T),
    /// The queue is closed.
    Closed(T),
}

impl<T> PushError<T> {
    /// Takes the rejected item back.
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(item) | Self::Closed(item) => item,
        }
    }
}

struct QueueState<T> {
    items: VecDeque<(T, usize)>,
    bytes: usize,
    closed: bool,
}

impl<T> QueueState<T> {
    fn fits(&self, len: usize, capacity: usize) -> bool {
        self.items.is_empty() || self.bytes.saturating_add(len) <= capacity
    }
}

/// Byte-bounded MPMC queue feeding one worker.
pub struct WorkerQueue<T> {
    index: usize,
    capacity_bytes: usize,
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    writer: Arc<Mutex<()>>,
    pushed: AtomicU64,
    rejected: AtomicU64,
}

impl<T> fmt::Debug for WorkerQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerQueue")
            .field("index", &self.index)
            .field("capacity_bytes", &self.capacity_bytes)
            .field("len", &self.len())
            .field("bytes", &self.bytes())
            .finish_non_exhaustive()
    }
}

impl<T> WorkerQueue<T> {
    /// Creates an empty queue.
    #[must_use]
    pub fn new(index: usize, capacity_bytes: usize) -> Self {
        Self {
            index,
            capacity_bytes,
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                bytes: 0,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            writer: Arc::new(Mutex::new(())),
            pushed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Position of this queue in its pool.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Capacity in bytes.
    #[must_use]
    pub fn capacity_bytes(&self) -> usize {
        self.capacity_bytes
    }

    /// Pushes an item of `len` encoded bytes.
    ///
    /// With `must_succeed` the call blocks until there is room.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::Full`] when the item does not fit and
    /// `must_succeed` is false, or [`PushError::Closed`] once the queue is
    /// closed. Both hand the item back.
    pub fn push(&self, item: T, len: usize, must_succeed: bool) -> Result<(), PushError<T>> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(PushError::Closed(item));
            }
            if state.fits(len, self.capacity_bytes) {
                break;
            }
            if !must_succeed {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(PushError::Full(item));
            }
            self.not_full.wait(&mut state);
        }
        state.items.push_back((item, len));
        state.bytes += len;
        drop(state);
        self.pushed.fetch_add(1, Ordering::Relaxed);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Pops the oldest item without waiting.
    pub fn try_pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        let popped = Self::take_front(&mut state);
        drop(state);
        if popped.is_some() {
            self.not_full.notify_all();
        }
        popped
    }

    /// Pops the oldest item, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `None` on timeout or when the queue is closed and drained.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let mut state = self.state.lock();
        if state.items.is_empty() && !state.closed {
            let _ = self.not_empty.wait_for(&mut state, timeout);
        }
        let popped = Self::take_front(&mut state);
        drop(state);
        if popped.is_some() {
            self.not_full.notify_all();
        }
        popped
    }

    fn take_front(state: &mut QueueState<T>) -> Option<T> {
        let (item, len) = state.items.pop_front()?;
        state.bytes -= len;
        Some(item)
    }

    /// Closes the queue, waking blocked pushers and poppers.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    /// Returns `true` once [`close`](Self::close) was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Returns `true` if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// Queued bytes.
    #[must_use]
    pub fn bytes(&self) -> usize {
        self.state.lock().bytes
    }

    /// Total accepted pushes.
    #[must_use]
    pub fn pushed(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    /// Total non-blocking pushes rejected as full.
    #[must_use]
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

/// Exclusive write access to one worker queue.
///
/// Dropping the handle releases the queue to other writers.
pub struct QueueHandle<T> {
    queue: Arc<WorkerQueue<T>>,
    _writer: ArcMutexGuard<RawMutex, ()>,
}

impl<T> fmt::Debug for QueueHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueHandle")
            .field("index", &self.queue.index)
            .finish()
    }
}

impl<T> QueueHandle<T> {
    /// Index of the held queue.
    #[must_use]
    pub fn index(&self) -> usize {
        self.queue.index
    }

    /// The held queue.
    #[must_use]
    pub fn queue(&self) -> &Arc<WorkerQueue<T>> {
        &self.queue
    }

    /// Pushes through the held queue. See [`WorkerQueue::push`].
    ///
    /// # Errors
    ///
    /// See [`WorkerQueue::push`].
    pub fn push(&self, item: T, len: usize, must_succeed: bool) -> Result<(), PushError<T>> {
        self.queue.push(item, len, must_succeed)
    }
}

/// Fixed-size pool of worker queues, one per worker.
pub struct WorkerQueuePool<T> {
    queues: Vec<Arc<WorkerQueue<T>>>,
    next: AtomicUsize,
}

impl<T> fmt::Debug for WorkerQueuePool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerQueuePool")
            .field("queues", &self.queues)
            .finish_non_exhaustive()
    }
}

impl<T> WorkerQueuePool<T> {
    /// Creates `num_workers` queues of `capacity_bytes` each.
    ///
    /// # Errors
    ///
    /// Returns [`StreamingError::NoWorkers`] if `num_workers` is zero.
    pub fn new(num_workers: usize, capacity_bytes: usize) -> Result<Self, StreamingError> {
        if num_workers == 0 {
            return Err(StreamingError::NoWorkers);
        }
        Ok(Self {
            queues: (0..num_workers)
                .map(|i| Arc::new(WorkerQueue::new(i, capacity_bytes)))
                .collect(),
            next: AtomicUsize::new(0),
        })
    }

    /// Number of queues.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queues.len()
    }

    /// Always `false`; a pool has at least one queue.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// The queue at `index`, for consumers.
    #[must_use]
    pub fn queue(&self, index: usize) -> Option<&Arc<WorkerQueue<T>>> {
        self.queues.get(index)
    }

    /// Takes the writer lock of queue `index`, blocking while another
    /// writer holds it.
    ///
    /// # Errors
    ///
    /// Returns [`StreamingError::InvalidWorker`] if `index` is out of range.
    pub fn acquire(&self, index: usize) -> Result<QueueHandle<T>, StreamingError> {
        let queue = self
            .queues
            .get(index)
            .ok_or(StreamingError::InvalidWorker {
                index,
                count: self.queues.len(),
            })?;
        Ok(Self::lock(queue))
    }

    /// Takes the writer lock of any queue other than `exclude`.
    ///
    /// Queues are tried round-robin without blocking; if every candidate is
    /// held, blocks on the first candidate. `exclude` is ignored for a pool
    /// of one.
    pub fn acquire_any(&self, exclude: Option<usize>) -> QueueHandle<T> {
        let n = self.queues.len();
        let start = self.next.fetch_add(1, Ordering::Relaxed) % n;
        let candidates = (0..n)
            .map(|off| (start + off) % n)
            .filter(|&i| n == 1 || Some(i) != exclude);

        let mut first = None;
        for i in candidates {
            let queue = &self.queues[i];
            if let Some(writer) = queue.writer.try_lock_arc() {
                return QueueHandle {
                    queue: Arc::clone(queue),
                    _writer: writer,
                };
            }
            first.get_or_insert(i);
        }
        Self::lock(&self.queues[first.unwrap_or(start)])
    }

    fn lock(queue: &Arc<WorkerQueue<T>>) -> QueueHandle<T> {
        QueueHandle {
            queue: Arc::clone(queue),
            _writer: queue.writer.lock_arc(),
        }
    }

    /// Closes every queue.
    pub fn close_all(&self) {
        for queue in &self.queues {
            queue.close();
        }
    }
}
