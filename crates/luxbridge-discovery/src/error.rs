//! Discovery error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DiscoveryError>;

#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// Listener could not bind its UDP port; fatal at startup
    #[error("bind failed on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("probe send failed: {0}")]
    Probe(String),

    #[error("core error: {0}")]
    Core(#[from] luxbridge_core::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
