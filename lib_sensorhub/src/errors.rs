//! # Error Taxonomy
//!
//! Every failure the acquisition pipeline can meet falls into one of a few
//! buckets. Only `ConfigurationError` is ever allowed to reach the host, and
//! only from `init`. Everything else is contained inside the acquisition loop,
//! counted, logged, and the loop moves on to the next cycle.

use thiserror::Error;

/// Raised while building schemas, key maps and driver setups. Fatal at `init`.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("option '{key}' must be {expected}, got {value}")]
    MalformedOption {
        key: String,
        value: String,
        expected: &'static str,
    },

    #[error("option '{0}' is not recognized")]
    UnknownOption(String),

    #[error("field '{0}' does not exist in the record schema")]
    UnknownField(String),

    #[error("field '{0}' is declared more than once")]
    DuplicateField(String),

    #[error("field '{field}' has an empty range: min {min} > max {max}")]
    InvalidRange { field: String, min: f64, max: f64 },

    #[error("invalid source address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("HTTP client could not be built: {0}")]
    HttpClient(String),

    #[error("required setting '{0}' is missing")]
    Missing(&'static str),

    #[error("I/O error while preparing the driver: {0}")]
    Io(#[from] std::io::Error),
}

/// One cycle's data could not be obtained. The loop skips the cycle.
#[derive(Debug, Error)]
pub enum TransientFetchError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("HTTP status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse value '{value}' for key '{key}'")]
    Parse { key: String, value: String },

    #[error("source stream closed")]
    Closed,
}

/// Malformed or unsynchronized wire data. The current frame is discarded.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    #[error("expected start byte 0x{expected:02X}, found 0x{found:02X}")]
    BadStartByte { expected: u8, found: u8 },

    #[error("message {msg_id} declares {actual} payload bytes, expected {expected}")]
    LengthMismatch {
        msg_id: u8,
        expected: usize,
        actual: usize,
    },

    #[error("checksum mismatch on message {msg_id}: computed 0x{computed:04X}, received 0x{received:04X}")]
    Checksum {
        msg_id: u8,
        computed: u16,
        received: u16,
    },

    #[error("malformed block: {0}")]
    Malformed(String),
}

/// A value could not be written into a record.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("record '{record}' has no field '{field}'")]
    UnknownField { record: String, field: String },

    #[error("field '{field}' holds {expected} values, cannot store {found}")]
    KindMismatch {
        field: String,
        expected: &'static str,
        found: &'static str,
    },
}

/// Umbrella error for everything a driver reports.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Fetch(#[from] TransientFetchError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Record(#[from] RecordError),

    #[error("cannot {operation} while {state}")]
    Lifecycle {
        operation: &'static str,
        state: &'static str,
    },
}

impl From<std::io::Error> for DriverError {
    fn from(err: std::io::Error) -> Self {
        DriverError::Fetch(TransientFetchError::Io(err))
    }
}
