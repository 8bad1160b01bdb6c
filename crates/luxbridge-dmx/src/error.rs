//! DMX ingress error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DmxError>;

#[derive(Error, Debug)]
pub enum DmxError {
    /// Listener could not bind its UDP port; fatal at startup
    #[error("bind failed on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("multicast join failed for {group}: {source}")]
    MulticastJoin {
        group: String,
        #[source]
        source: std::io::Error,
    },

    #[error("core error: {0}")]
    Core(#[from] luxbridge_core::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
