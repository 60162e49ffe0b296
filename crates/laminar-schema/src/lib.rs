//! # `LaminarDB` Stream Schema
//!
//! Event descriptors, field mapping and value coercion for stream reads.
//!
//! Events written to a stream carry the packed descriptor of the schema they
//! were written with. Readers map event fields onto a fixed output schema by
//! case-insensitive name and coerce values whose types differ.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

/// Value coercion: converter registry, Arrow cast, text round-trip
pub mod coercion;

/// Packed schema descriptors and field attributes
pub mod descriptor;

/// Name-based schema diff
pub mod diff;

/// Schema error types
pub mod error;

/// Field maps and the per-reader schema cache
pub mod mapper;

/// Anonymous record layouts
pub mod record;

/// Row values and the row codec
pub mod value;

pub use coercion::{CoercionPath, CoercionRegistry, ValueConverter};
pub use descriptor::{FieldDescriptor, SchemaDescriptor};
pub use error::{SchemaError, SchemaResult};
pub use mapper::{CachedMapping, FieldMap, SchemaCache};
pub use record::{RecordDescriptor, RecordTypeCache};
pub use value::{Datum, Row};
