//! Events routed from inserters to worker queues.

use std::collections::BTreeSet;
use std::sync::Arc;

use bytes::Bytes;
use laminar_core::streaming::DeliveryAck;
use laminar_schema::RecordDescriptor;

/// One inserted row on its way to a worker.
///
/// Descriptor and record layouts are shared between all rows of an insert;
/// cloning an event never copies payload bytes.
#[derive(Debug, Clone)]
pub struct StreamEvent {
    /// Packed descriptor of the schema the row was written with.
    pub descriptor: Bytes,
    /// Encoded row.
    pub row: Bytes,
    /// Arrival time, microseconds since the Unix epoch.
    pub arrival_micros: i64,
    /// Layouts of anonymous record fields in the row.
    pub record_descs: Arc<[RecordDescriptor]>,
    /// Readers registered on the stream when the insert opened.
    pub readers: Arc<BTreeSet<u32>>,
    /// Delivery acknowledgment for synchronous inserts.
    pub ack: Option<DeliveryAck>,
}

impl StreamEvent {
    /// Bytes this event occupies in a worker queue.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        self.descriptor.len() + self.row.len()
    }

    /// Whether reader `id` should see this event.
    #[must_use]
    pub fn is_for(&self, reader: u32) -> bool {
        self.readers.contains(&reader)
    }

    /// Reports the event as delivered, if the insert waits for it.
    pub fn acknowledge(&self) {
        if let Some(ack) = &self.ack {
            ack.ack();
        }
    }
}
