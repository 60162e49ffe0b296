//! Schema error types.
//!
//! Provides [`SchemaError`] for descriptor packing, row decoding, and value
//! coercion, plus a convenience [`SchemaResult`] alias.

use arrow_schema::DataType;
use thiserror::Error;

/// Result alias for schema operations.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Errors that can occur during schema operations.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// A descriptor or row could not be serialized.
    #[error("pack error: {0}")]
    Pack(String),

    /// A serialized descriptor could not be read back.
    #[error("unpack error: {0}")]
    Unpack(String),

    /// A row value does not fit the field it is decoded against.
    #[error("decode error: {0}")]
    Decode(String),

    /// A value could not be converted between two types by any coercion path.
    #[error("cannot coerce {from} to {to}: {reason}")]
    TypeCoercion {
        /// Source type.
        from: DataType,
        /// Destination type.
        to: DataType,
        /// Why the last attempted conversion failed.
        reason: String,
    },

    /// A record-typed field references a type modifier with no registered descriptor.
    #[error("no record descriptor registered for type modifier {0}")]
    UnknownRecordType(i32),

    /// An Arrow error propagated from schema operations.
    #[error("arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),
}

impl SchemaError {
    /// Returns `true` if this error came from value coercion.
    #[must_use]
    pub fn is_coercion(&self) -> bool {
        matches!(self, Self::TypeCoercion { .. })
    }
}
