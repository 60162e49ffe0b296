//! Lock-free stream read/write counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Per-runtime stream counters using atomics (no locks on the data path).
#[derive(Debug, Default)]
pub struct StreamMetrics {
    /// Events projected by scans.
    pub scan_tuples: AtomicU64,
    /// Encoded bytes read by scans.
    pub scan_bytes: AtomicU64,
    /// Scans closed.
    pub scans_closed: AtomicU64,
    /// Rows inserted.
    pub insert_rows: AtomicU64,
    /// Encoded bytes inserted.
    pub insert_bytes: AtomicU64,
    /// Batches written by inserts.
    pub insert_batches: AtomicU64,
    /// Inserts closed.
    pub inserts_closed: AtomicU64,
    /// Projections aborted by a coercion failure.
    pub coercion_errors: AtomicU64,
}

impl StreamMetrics {
    /// Records a closed scan.
    pub fn record_scan(&self, tuples: u64, bytes: u64) {
        self.scans_closed.fetch_add(1, Ordering::Relaxed);
        self.scan_tuples.fetch_add(tuples, Ordering::Relaxed);
        self.scan_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Records a closed insert.
    pub fn record_insert(&self, rows: u64, bytes: u64, batches: u64) {
        self.inserts_closed.fetch_add(1, Ordering::Relaxed);
        self.insert_rows.fetch_add(rows, Ordering::Relaxed);
        self.insert_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.insert_batches.fetch_add(batches, Ordering::Relaxed);
    }

    /// Records a coercion failure.
    pub fn record_coercion_error(&self) {
        self.coercion_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of the current counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            scan_tuples: self.scan_tuples.load(Ordering::Relaxed),
            scan_bytes: self.scan_bytes.load(Ordering::Relaxed),
            scans_closed: self.scans_closed.load(Ordering::Relaxed),
            insert_rows: self.insert_rows.load(Ordering::Relaxed),
            insert_bytes: self.insert_bytes.load(Ordering::Relaxed),
            insert_batches: self.insert_batches.load(Ordering::Relaxed),
            inserts_closed: self.inserts_closed.load(Ordering::Relaxed),
            coercion_errors: self.coercion_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of [`StreamMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Events projected by scans.
    pub scan_tuples: u64,
    /// Encoded bytes read by scans.
    pub scan_bytes: u64,
    /// Scans closed.
    pub scans_closed: u64,
    /// Rows inserted.
    pub insert_rows: u64,
    /// Encoded bytes inserted.
    pub insert_bytes: u64,
    /// Batches written by inserts.
    pub insert_batches: u64,
    /// Inserts closed.
    pub inserts_closed: u64,
    /// Projections aborted by a coercion failure.
    pub coercion_errors: u64,
}
