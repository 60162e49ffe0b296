//! Which readers currently consume a stream.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use parking_lot::RwLock;

/// Reader lookup consulted when an insert opens.
pub trait ReaderMembership: Send + Sync + fmt::Debug {
    /// Ids of the readers registered on stream `source_id`.
    fn targets_for(&self, source_id: u32) -> BTreeSet<u32>;
}

/// In-memory reader registry.
#[derive(Debug, Default)]
pub struct StaticMembership {
    readers: RwLock<HashMap<u32, BTreeSet<u32>>>,
}

impl StaticMembership {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `reader` on `source_id`. Returns `false` if it already was.
    pub fn register(&self, source_id: u32, reader: u32) -> bool {
        self.readers
            .write()
            .entry(source_id)
            .or_default()
            .insert(reader)
    }

    /// Removes `reader` from `source_id`. Returns `false` if it was absent.
    pub fn unregister(&self, source_id: u32, reader: u32) -> bool {
        let mut readers = self.readers.write();
        let Some(set) = readers.get_mut(&source_id) else {
            return false;
        };
        let removed = set.remove(&reader);
        if set.is_empty() {
            readers.remove(&source_id);
        }
        removed
    }
}

impl ReaderMembership for StaticMembership {
    fn targets_for(&self, source_id: u32) -> BTreeSet<u32> {
        self.readers
            .read()
            .get(&source_id)
            .cloned()
            .unwrap_or_default()
    }
}
