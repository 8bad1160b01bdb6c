//! Outbound command transport
//!
//! Control commands are fire-and-forget UDP datagrams. Dry-run mode
//! swaps in a transport that logs instead of sending, so the rest of the
//! pipeline (queues, rate limits, dead letters) behaves identically.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::debug;

use crate::error::{Result, WorkerError};

#[async_trait]
pub trait CommandTransport: Send + Sync {
    async fn send(&self, data: &[u8], target: SocketAddr) -> Result<()>;
}

/// Shared-socket UDP transport
pub struct UdpCommandTransport {
    socket: Arc<UdpSocket>,
}

impl UdpCommandTransport {
    pub async fn bind() -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        Ok(Self {
            socket: Arc::new(socket),
        })
    }
}

#[async_trait]
impl CommandTransport for UdpCommandTransport {
    async fn send(&self, data: &[u8], target: SocketAddr) -> Result<()> {
        self.socket
            .send_to(data, target)
            .await
            .map_err(|e| WorkerError::Send(e.to_string()))?;
        Ok(())
    }
}

/// No-op transport used in dry-run mode
#[derive(Default)]
pub struct DryRunTransport;

#[async_trait]
impl CommandTransport for DryRunTransport {
    async fn send(&self, data: &[u8], target: SocketAddr) -> Result<()> {
        debug!(%target, bytes = data.len(), "dry-run: suppressed device send");
        Ok(())
    }
}
