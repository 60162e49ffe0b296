//! # `LaminarDB`
//!
//! Stream scans and inserts for continuous queries.
//!
//! ```rust,ignore
//! let runtime = StreamRuntime::new(StreamConfig::default(), membership)?;
//!
//! let plan = plan_insert(&stream, None)?;
//! let mut insert = open_insert(plan, &runtime, InsertOptions::from_config(runtime.config()))?;
//! insert.insert_row(vec![Datum::Int32(42), "hello".into()])?;
//! insert.close_insert(&cancel)?;
//!
//! let path = choose_access_path(estimate_size(runtime.config(), "s", names), ScanMode::Continuous)?;
//! let mut scan = open_scan(
//!     build_scan_plan(path, physical),
//!     Box::new(runtime.reader_source(0, reader)?),
//!     Arc::clone(runtime.coercions()),
//! )?;
//! while let Some(row) = scan.next_row()? { /* ... */ }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Stream read/write configuration
pub mod config;

/// Database error types
pub mod error;

/// Scan and insert paths
pub mod pipeline;

pub use config::StreamConfig;
pub use error::DbError;
pub use pipeline::{
    build_scan_plan, choose_access_path, estimate_size, open_insert, open_scan, plan_insert,
    InsertOptions, ScanMode, StreamDefinition, StreamInsert, StreamRuntime, StreamScan,
};
