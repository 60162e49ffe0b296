//! Event sources feeding stream scans.
//!
//! A source yields events until the current batch ends, then `None`. The
//! scan treats `None` as a batch boundary, not end-of-stream: the next call
//! starts a new batch.
//!
//! Each worker queue has exactly one consumer, a [`WorkerFanout`]. Scans
//! subscribe to it and each receive their own copy of every event addressed
//! to their reader, with the same batch boundaries.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use laminar_core::streaming::WorkerQueue;
use parking_lot::Mutex;

use super::event::StreamEvent;
use crate::error::DbError;

/// Lazy, unbounded sequence of events for one scan.
pub trait EventSource: Send {
    /// The next event, or `None` at the end of the current batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the source failed.
    fn next_event(&mut self) -> Result<Option<StreamEvent>, DbError>;
}

/// Reads one worker's queue.
///
/// A batch ends after `batch_size` events or when no event arrives within
/// the poll timeout. Every event is returned, whatever its readers.
#[derive(Debug)]
pub struct QueueEventSource {
    queue: Arc<WorkerQueue<StreamEvent>>,
    batch_size: usize,
    poll_timeout: Duration,
    taken: usize,
}

impl QueueEventSource {
    /// Creates a source over `queue`.
    #[must_use]
    pub fn new(queue: Arc<WorkerQueue<StreamEvent>>, batch_size: usize, poll_timeout: Duration) -> Self {
        Self {
            queue,
            batch_size: batch_size.max(1),
            poll_timeout,
            taken: 0,
        }
    }

    /// Index of the worker queue being read.
    #[must_use]
    pub fn worker(&self) -> usize {
        self.queue.index()
    }
}

impl EventSource for QueueEventSource {
    fn next_event(&mut self) -> Result<Option<StreamEvent>, DbError> {
        if self.taken >= self.batch_size {
            self.taken = 0;
            return Ok(None);
        }
        let Some(event) = self.queue.pop_timeout(self.poll_timeout) else {
            self.taken = 0;
            return Ok(None);
        };
        self.taken += 1;
        Ok(Some(event))
    }
}

#[derive(Debug)]
struct ReaderSlot {
    reader: u32,
    events: VecDeque<Option<StreamEvent>>,
    /// Received events since the last batch boundary.
    open: bool,
}

#[derive(Debug)]
struct FanoutState {
    source: QueueEventSource,
    slots: HashMap<u64, ReaderSlot>,
    next_slot: u64,
}

impl FanoutState {
    /// Acknowledges `event` once and hands a copy to every subscriber it is
    /// addressed to.
    fn dispatch(&mut self, event: StreamEvent) {
        event.acknowledge();
        let mut delivered = 0usize;
        for slot in self.slots.values_mut().filter(|s| event.is_for(s.reader)) {
            slot.events.push_back(Some(StreamEvent {
                ack: None,
                ..event.clone()
            }));
            slot.open = true;
            delivered += 1;
        }
        if delivered == 0 {
            tracing::trace!(
                worker = self.source.worker(),
                readers = event.readers.len(),
                "No open scan for event"
            );
        }
    }

    fn end_batch(&mut self) {
        for slot in self.slots.values_mut().filter(|s| s.open) {
            slot.events.push_back(None);
            slot.open = false;
        }
    }
}

/// Sole consumer of one worker queue, shared by the scans reading it.
///
/// Cloning shares the queue and its subscribers.
#[derive(Debug, Clone)]
pub struct WorkerFanout {
    state: Arc<Mutex<FanoutState>>,
}

impl WorkerFanout {
    /// Creates a fan-out over `source`.
    #[must_use]
    pub fn new(source: QueueEventSource) -> Self {
        Self {
            state: Arc::new(Mutex::new(FanoutState {
                source,
                slots: HashMap::new(),
                next_slot: 0,
            })),
        }
    }

    /// Index of the worker queue being read.
    #[must_use]
    pub fn worker(&self) -> usize {
        self.state.lock().source.worker()
    }

    /// Number of open subscriptions.
    #[must_use]
    pub fn subscribers(&self) -> usize {
        self.state.lock().slots.len()
    }

    /// Subscribes a scan of `reader`. Events taken off the queue from now on
    /// and addressed to `reader` are delivered to the returned source.
    #[must_use]
    pub fn subscribe(&self, reader: u32) -> ReaderSource {
        let mut state = self.state.lock();
        let slot = state.next_slot;
        state.next_slot += 1;
        state.slots.insert(
            slot,
            ReaderSlot {
                reader,
                events: VecDeque::new(),
                open: false,
            },
        );
        tracing::debug!(worker = state.source.worker(), reader, slot, "Reader subscribed");
        ReaderSource {
            fanout: self.clone(),
            reader,
            slot,
        }
    }
}

/// One scan's view of a [`WorkerFanout`].
///
/// Yields the events addressed to its reader. Events come without their
/// delivery acknowledgment: the fan-out acknowledges each row once, when it
/// takes it off the queue. Dropping the source unsubscribes it.
#[derive(Debug)]
pub struct ReaderSource {
    fanout: WorkerFanout,
    reader: u32,
    slot: u64,
}

impl ReaderSource {
    /// Reader this source delivers to.
    #[must_use]
    pub fn reader(&self) -> u32 {
        self.reader
    }

    /// Index of the worker queue being read.
    #[must_use]
    pub fn worker(&self) -> usize {
        self.fanout.worker()
    }
}

impl EventSource for ReaderSource {
    fn next_event(&mut self) -> Result<Option<StreamEvent>, DbError> {
        let mut state = self.fanout.state.lock();
        loop {
            let buffered = state
                .slots
                .get_mut(&self.slot)
                .and_then(|s| s.events.pop_front());
            if let Some(next) = buffered {
                return Ok(next);
            }
            match state.source.next_event()? {
                Some(event) => state.dispatch(event),
                None => {
                    state.end_batch();
                    let own = state
                        .slots
                        .get_mut(&self.slot)
                        .and_then(|s| s.events.pop_front());
                    return Ok(own.flatten());
                }
            }
        }
    }
}

impl Drop for ReaderSource {
    fn drop(&mut self) {
        let mut state = self.fanout.state.lock();
        if let Some(slot) = state.slots.remove(&self.slot) {
            tracing::debug!(
                worker = state.source.worker(),
                reader = self.reader,
                dropped = slot.events.iter().flatten().count(),
                "Reader unsubscribed"
            );
        }
    }
}

/// Fixed list of events, ending a batch after every `batch_size` events.
///
/// Useful for replaying captured events and in tests.
#[derive(Debug, Default)]
pub struct VecEventSource {
    events: std::collections::VecDeque<Option<StreamEvent>>,
}

impl VecEventSource {
    /// Creates a source that yields `events` as a single batch.
    #[must_use]
    pub fn new(events: Vec<StreamEvent>) -> Self {
        let mut source = Self::default();
        source.push_batch(events);
        source
    }

    /// Appends a batch followed by a batch boundary.
    pub fn push_batch(&mut self, events: Vec<StreamEvent>) {
        self.events.extend(events.into_iter().map(Some));
        self.events.push_back(None);
    }
}

impl EventSource for VecEventSource {
    fn next_event(&mut self) -> Result<Option<StreamEvent>, DbError> {
        Ok(self.events.pop_front().flatten())
    }
}
