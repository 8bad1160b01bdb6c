//! Protocol handler error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("encode error: {0}")]
    Encode(String),

    #[error("payload not expressible by {protocol}: {reason}")]
    Unsupported { protocol: &'static str, reason: String },

    #[error("polling not supported by {0}")]
    PollingUnsupported(&'static str),

    #[error("invalid device identifier {id:?}: {reason}")]
    InvalidDeviceId { id: String, reason: String },
}

impl From<ProtocolError> for luxbridge_core::Error {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::Encode(msg) => luxbridge_core::Error::Encode(msg),
            other => luxbridge_core::Error::UnsupportedCommand(other.to_string()),
        }
    }
}
