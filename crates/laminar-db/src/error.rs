//! Error types for the stream read/write paths.

use laminar_core::error_codes;
use laminar_core::streaming::StreamingError;
use laminar_schema::SchemaError;

/// Errors from stream scans and stream inserts.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// Output schema does not fit the query's column list
    SchemaMismatch(String),

    /// A value could not be coerced to its output field type
    TypeCoercion(#[source] SchemaError),

    /// Descriptor, row or record decoding error
    Schema(#[source] SchemaError),

    /// Worker queue, routing or delivery error
    Streaming(#[from] StreamingError),

    /// Stream read outside a continuous query
    NotContinuous(String),

    /// Insert target list does not fit the stream
    InvalidInsertTarget(String),

    /// Inserted row does not fit the stream descriptor
    InvalidRow(String),

    /// Arrow error while assembling output rows
    Arrow(#[from] arrow_schema::ArrowError),

    /// Configuration validation error
    Config(String),
}

impl From<SchemaError> for DbError {
    fn from(e: SchemaError) -> Self {
        if e.is_coercion() {
            Self::TypeCoercion(e)
        } else {
            Self::Schema(e)
        }
    }
}

impl DbError {
    /// The `LDB-NNNN` code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::SchemaMismatch(_) => error_codes::SCHEMA_MISMATCH,
            Self::TypeCoercion(_) => error_codes::TYPE_COERCION_FAILED,
            Self::Schema(e) => match e {
                SchemaError::Pack(_) => error_codes::DESCRIPTOR_PACK_FAILED,
                SchemaError::Unpack(_) => error_codes::DESCRIPTOR_UNPACK_FAILED,
                SchemaError::UnknownRecordType(_) => error_codes::UNKNOWN_RECORD_TYPE,
                SchemaError::Arrow(_) => error_codes::ARROW_ERROR,
                SchemaError::Decode(_) | SchemaError::TypeCoercion { .. } => {
                    error_codes::ROW_DECODE_FAILED
                }
            },
            Self::Streaming(e) => e.code(),
            Self::NotContinuous(_) => error_codes::NOT_CONTINUOUS,
            Self::InvalidInsertTarget(_) => error_codes::INVALID_INSERT_TARGET,
            Self::InvalidRow(_) => error_codes::INVALID_ROW,
            Self::Arrow(_) => error_codes::ARROW_ERROR,
            Self::Config(_) => error_codes::INVALID_CONFIG,
        }
    }

    /// Whether the caller may retry or continue after this error.
    ///
    /// Only an ended acknowledgment wait qualifies; the rows were routed.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Streaming(e) if e.is_recoverable())
    }
}

impl std::fmt::Display for DbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SchemaMismatch(msg) => {
                write!(f, "[{}] Schema mismatch: {msg}", self.code())
            }
            Self::TypeCoercion(e) => write!(f, "[{}] {e}", self.code()),
            Self::Schema(e) => write!(f, "[{}] Schema error: {e}", self.code()),
            Self::Streaming(e) => write!(f, "Streaming error: {e}"),
            Self::NotContinuous(stream) => write!(
                f,
                "[{}] stream \"{stream}\" can only be read by a continuous view",
                self.code()
            ),
            Self::InvalidInsertTarget(msg) => {
                write!(f, "[{}] Invalid insert target: {msg}", self.code())
            }
            Self::InvalidRow(msg) => write!(f, "[{}] Invalid row: {msg}", self.code()),
            Self::Arrow(e) => write!(f, "[{}] Arrow error: {e}", self.code()),
            Self::Config(msg) => write!(f, "[{}] Config error: {msg}", self.code()),
        }
    }
}
