//! # `LaminarDB` Core
//!
//! Write-side plumbing for streams: the worker queue pool, the insert router
//! that spreads rows over it, and the tracker used for synchronous delivery.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

/// Structured `LDB-NNNN` error codes
pub mod error_codes;

/// Worker queues, insert routing, delivery acknowledgment
pub mod streaming;
