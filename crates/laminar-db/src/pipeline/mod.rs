//! Stream read/write path.
//!
//! Inserts route rows onto worker queues; continuous queries scan those
//! queues and project each event onto their output schema. A worker's queue
//! is drained once by its `WorkerFanout`, which hands every scan of that
//! worker the events addressed to its reader.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐ ┌──────────────┐
//! │ StreamInsert │ │ StreamInsert │   plan_insert / open_insert / insert_row
//! └──────┬───────┘ └──────┬───────┘
//!       │ InsertRouter   │            batch switches, backpressure retries
//!       ▼                ▼
//! ┌──────────┐ ┌──────────┐ ┌──────────┐
//! │ Queue 0  │ │ Queue 1  │ │ Queue N  │  WorkerQueuePool (byte-bounded)
//! └────┬─────┘ └────┬─────┘ └────┬─────┘
//!      ▼            ▼            ▼
//!  WorkerFanout per queue (acks each row), one ReaderSource per scan
//!      ▼            ▼            ▼
//! ┌──────────┐ ┌──────────┐ ┌──────────┐
//! │StreamScan│ │StreamScan│ │StreamScan│  ProjectionContext per scan
//! └──────────┘ └──────────┘ └──────────┘
//! ```

pub mod event;
pub mod insert;
pub mod membership;
pub mod metrics;
pub mod projector;
pub mod runtime;
pub mod scan;
pub mod source;

pub use event::StreamEvent;
pub use insert::{
    open_insert, plan_insert, InsertOptions, InsertPlan, InsertStats, StreamDefinition,
    StreamInsert,
};
pub use membership::{ReaderMembership, StaticMembership};
pub use metrics::{MetricsSnapshot, StreamMetrics};
pub use projector::{ProjectionContext, ARRIVAL_TIMESTAMP};
pub use runtime::StreamRuntime;
pub use scan::{
    build_scan_plan, choose_access_path, estimate_size, open_scan, ScanEstimate, ScanMode,
    ScanPath, ScanStats, StreamScan, StreamScanPlan,
};
pub use source::{EventSource, QueueEventSource, ReaderSource, VecEventSource, WorkerFanout};
