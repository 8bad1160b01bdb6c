//! Error types for luxbridge

use thiserror::Error;

/// Result type alias for luxbridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Luxbridge core error types
#[derive(Error, Debug)]
pub enum Error {
    /// DMX universe outside the E1.31 range
    #[error("universe out of range: {0} (max 63999)")]
    UniverseOutOfRange(u16),

    /// Merge priority outside the sACN range
    #[error("priority out of range: {0} (max 200)")]
    PriorityOutOfRange(u8),

    /// Mapping record failed validation
    #[error("invalid mapping for device {device_id}: {reason}")]
    InvalidMapping { device_id: String, reason: String },

    /// Two mappings claim intersecting channels without mutual consent
    #[error("mapping overlap in universe {universe}: channels {first}..{first_end} and {second}..{second_end}")]
    MappingOverlap {
        universe: u16,
        first: u16,
        first_end: u16,
        second: u16,
        second_end: u16,
    },

    /// Command payload cannot be expressed by the target protocol
    #[error("unsupported command payload: {0}")]
    UnsupportedCommand(String),

    /// Wire encoding failed
    #[error("encode error: {0}")]
    Encode(String),

    /// Wire decoding failed
    #[error("decode error: {0}")]
    Decode(String),

    /// Device store operation failed
    #[error("store error: {0}")]
    Store(String),

    /// Unknown device protocol identifier
    #[error("unknown protocol: {0}")]
    UnknownProtocol(String),

    /// io error passthrough
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Encode(e.to_string())
    }
}
