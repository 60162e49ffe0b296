//! LaminarDB structured error code registry.
//!
//! Every stream read/write error carries a stable `LDB-NNNN` code that is:
//! - Present in the error message (grep-able in logs)
//! - Present in the source code (grep-able in code)
//! - Stable across versions (codes are never reused)
//!
//! # Code Ranges
//!
//! | Range | Category |
//! |-------|----------|
//! | `LDB-0xxx` | General / configuration |
//! | `LDB-1xxx` | Stream planning |
//! | `LDB-4xxx` | Descriptors / row encoding |
//! | `LDB-5xxx` | Value coercion |
//! | `LDB-6xxx` | Insert routing / delivery |
//! | `LDB-7xxx` | Arrow interop |
//! | `LDB-8xxx` | Hot path outcomes |

// ── General / Configuration (LDB-0xxx) ──

/// Invalid configuration value.
pub const INVALID_CONFIG: &str = "LDB-0001";
/// Output schema does not match the query's column list.
pub const SCHEMA_MISMATCH: &str = "LDB-0006";

// ── Stream Planning (LDB-1xxx) ──

/// Stream read outside a continuous query.
pub const NOT_CONTINUOUS: &str = "LDB-1001";
/// Insert target list does not fit the stream.
pub const INVALID_INSERT_TARGET: &str = "LDB-1002";

// ── Descriptors / Row Encoding (LDB-4xxx) ──

/// Schema descriptor could not be packed.
pub const DESCRIPTOR_PACK_FAILED: &str = "LDB-4001";
/// Schema descriptor could not be unpacked.
pub const DESCRIPTOR_UNPACK_FAILED: &str = "LDB-4002";
/// Row bytes could not be decoded against the descriptor.
pub const ROW_DECODE_FAILED: &str = "LDB-4003";
/// Record field references an unregistered record type.
pub const UNKNOWN_RECORD_TYPE: &str = "LDB-4004";
/// Row does not fit the stream it is inserted into.
pub const INVALID_ROW: &str = "LDB-4005";

// ── Value Coercion (LDB-5xxx) ──

/// A value could not be coerced to the output field type.
pub const TYPE_COERCION_FAILED: &str = "LDB-5001";

// ── Insert Routing / Delivery (LDB-6xxx) ──

/// Worker queue pool has no queues.
pub const NO_WORKERS: &str = "LDB-6001";
/// Worker index outside the pool.
pub const INVALID_WORKER: &str = "LDB-6002";
/// Worker queue is closed.
pub const QUEUE_CLOSED: &str = "LDB-6003";
/// Acknowledgment wait exceeded its deadline.
pub const DELIVERY_TIMEOUT: &str = "LDB-6004";
/// Acknowledgment wait was cancelled.
pub const DELIVERY_CANCELLED: &str = "LDB-6005";

// ── Arrow Interop (LDB-7xxx) ──

/// Arrow schema or record batch error.
pub const ARROW_ERROR: &str = "LDB-7002";

// ── Hot Path (LDB-8xxx) ──

/// Outcome of a non-blocking worker queue push, as a counter-friendly code.
///
/// Cheap to copy and never allocates; formatted only when displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum HotPathError {
    /// Queue has no room for the row; the router retries elsewhere.
    QueueFull = 0x0001,
    /// Queue is closed.
    QueueClosed = 0x0002,
    /// Delivery acknowledged more rows than were sent.
    SurplusAck = 0x0003,
}

impl HotPathError {
    /// Returns a static error message.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::QueueFull => "Worker queue is full; retrying on another queue",
            Self::QueueClosed => "Worker queue is closed",
            Self::SurplusAck => "Acknowledgment beyond the batch target; ignored",
        }
    }

    /// Numeric code for metrics counters.
    #[must_use]
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// Returns the `LDB-NNNN` error code string.
    #[must_use]
    pub const fn ldb_code(self) -> &'static str {
        match self {
            Self::QueueFull => "LDB-8011",
            Self::QueueClosed => QUEUE_CLOSED,
            Self::SurplusAck => "LDB-8013",
        }
    }
}

impl std::fmt::Display for HotPathError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.ldb_code(), self.message())
    }
}

impl std::error::Error for HotPathError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hot_path_error_is_copy_and_small() {
        let e = HotPathError::QueueFull;
        let e2 = e;
        assert_eq!(e, e2);
        assert_eq!(std::mem::size_of::<HotPathError>(), 2);
    }

    #[test]
    fn hot_path_error_codes() {
        for v in [
            HotPathError::QueueFull,
            HotPathError::QueueClosed,
            HotPathError::SurplusAck,
        ] {
            assert!(v.code() > 0, "{v:?} has zero code");
            assert!(v.ldb_code().starts_with("LDB-"));
            assert!(v.to_string().starts_with("[LDB-"));
        }
    }

    #[test]
    fn error_codes_are_stable_strings() {
        assert_eq!(INVALID_CONFIG, "LDB-0001");
        assert_eq!(SCHEMA_MISMATCH, "LDB-0006");
        assert_eq!(TYPE_COERCION_FAILED, "LDB-5001");
        assert_eq!(DELIVERY_TIMEOUT, "LDB-6004");
    }
}
