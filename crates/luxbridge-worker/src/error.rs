//! Worker error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, WorkerError>;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("send failed: {0}")]
    Send(String),

    #[error("invalid target address {addr}: {reason}")]
    InvalidAddress { addr: String, reason: String },

    #[error("core error: {0}")]
    Core(#[from] luxbridge_core::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] luxbridge_protocol::ProtocolError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
