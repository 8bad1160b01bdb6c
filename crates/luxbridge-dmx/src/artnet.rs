//! ArtNet DMX ingress
//!
//! Wire layout of an ArtDmx packet:
//!
//! ```text
//! ┌────────────────────────────────────────────────┐
//! │ 8 bytes   magic "Art-Net\0"                    │
//! │ u16 LE    opcode (OpDmx = 0x5000)              │
//! │ u16 BE    protocol version (>= 14)             │
//! │ u8        sequence                             │
//! │ u8        physical input port                  │
//! │ u16 LE    universe                             │
//! │ u16 BE    data length (2..=512)                │
//! │ N bytes   DMX channel values                   │
//! └────────────────────────────────────────────────┘
//! ```
//!
//! Anything that fails validation is dropped silently (counted by the
//! `ingest_rejected` metric, sampled DEBUG log).

use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use luxbridge_core::{
    BridgeConfig, DmxFrame, MetricsHandle, SourceProtocol, ARTNET_FIXED_PRIORITY, DMX_CHANNELS,
};

use crate::engine::MappingEngine;
use crate::error::{DmxError, Result};

/// Default ArtNet port
pub const ARTNET_PORT: u16 = 6454;

const ARTNET_MAGIC: &[u8; 8] = b"Art-Net\0";
const OP_DMX: u16 = 0x5000;
const MIN_PROTOCOL_VERSION: u16 = 14;
const HEADER_LEN: usize = 18;

/// A validated ArtDmx packet, data padded to 512 channels
#[derive(Debug, Clone)]
pub struct ArtDmxPacket {
    pub universe: u16,
    pub sequence: u8,
    pub physical: u8,
    /// Channel count as carried on the wire, before padding
    pub length: u16,
    pub data: [u8; DMX_CHANNELS],
}

/// Parse an ArtDmx packet, or `None` for anything malformed or not OpDmx
pub fn parse_artnet_packet(data: &[u8]) -> Option<ArtDmxPacket> {
    if data.len() < HEADER_LEN || &data[..8] != ARTNET_MAGIC {
        return None;
    }

    let opcode = u16::from_le_bytes([data[8], data[9]]);
    if opcode != OP_DMX {
        return None;
    }

    let protocol_version = u16::from_be_bytes([data[10], data[11]]);
    if protocol_version < MIN_PROTOCOL_VERSION {
        return None;
    }

    let sequence = data[12];
    let physical = data[13];
    let universe = u16::from_le_bytes([data[14], data[15]]);
    let length = u16::from_be_bytes([data[16], data[17]]);

    if !(2..=512).contains(&length) || data.len() < HEADER_LEN + length as usize {
        return None;
    }

    let mut channels = [0u8; DMX_CHANNELS];
    channels[..length as usize].copy_from_slice(&data[HEADER_LEN..HEADER_LEN + length as usize]);

    Some(ArtDmxPacket {
        universe,
        sequence,
        physical,
        length,
        data: channels,
    })
}

/// ArtNet listener feeding the mapping engine
pub struct ArtnetService {
    config: Arc<BridgeConfig>,
    engine: Arc<MappingEngine>,
    metrics: MetricsHandle,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl ArtnetService {
    pub fn new(config: Arc<BridgeConfig>, engine: Arc<MappingEngine>, metrics: MetricsHandle) -> Self {
        Self {
            config,
            engine,
            metrics,
            shutdown_tx: None,
        }
    }

    /// Bind the listener and start the receive loop. A bind failure is
    /// fatal and surfaces to the caller.
    pub async fn start(&mut self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.config.artnet_port);
        let socket = UdpSocket::bind(&addr).await.map_err(|source| DmxError::Bind {
            addr: addr.clone(),
            source,
        })?;

        info!(%addr, "ArtNet listener started");

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        let engine = self.engine.clone();
        let metrics = self.metrics.clone();
        let sample_rate = self.config.noisy_log_sample_rate;

        tokio::spawn(async move {
            let mut buf = vec![0u8; 2048];
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("ArtNet listener shutting down");
                        break;
                    }
                    result = socket.recv_from(&mut buf) => {
                        match result {
                            Ok((len, from)) => {
                                let Some(packet) = parse_artnet_packet(&buf[..len]) else {
                                    metrics.incr("ingest_rejected");
                                    if fastrand::f64() <= sample_rate {
                                        debug!(%from, len, "dropped malformed ArtNet packet");
                                    }
                                    continue;
                                };

                                let source_id = format!(
                                    "artnet-{}:{}-u{}",
                                    from.ip(),
                                    from.port(),
                                    packet.universe
                                );
                                match DmxFrame::new(
                                    packet.universe,
                                    packet.data,
                                    packet.sequence,
                                    SourceProtocol::Artnet,
                                    ARTNET_FIXED_PRIORITY,
                                    source_id,
                                ) {
                                    Ok(frame) => engine.process_frame(frame).await,
                                    Err(e) => {
                                        metrics.incr("ingest_rejected");
                                        debug!(error = %e, "rejected ArtNet frame");
                                    }
                                }
                            }
                            Err(e) => {
                                error!(error = %e, "ArtNet receive error");
                            }
                        }
                    }
                }
            }
        });

        Ok(())
    }

    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        info!("ArtNet listener stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_packet(universe: u16, payload: &[u8]) -> Vec<u8> {
        let mut packet = Vec::new();
        packet.extend_from_slice(ARTNET_MAGIC);
        packet.extend_from_slice(&OP_DMX.to_le_bytes());
        packet.extend_from_slice(&14u16.to_be_bytes());
        packet.push(1); // sequence
        packet.push(0); // physical
        packet.extend_from_slice(&universe.to_le_bytes());
        packet.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        packet.extend_from_slice(payload);
        packet
    }

    #[test]
    fn test_parse_round_trip() {
        let packet = build_packet(2, &[1, 2, 3, 4]);
        let parsed = parse_artnet_packet(&packet).unwrap();
        assert_eq!(parsed.universe, 2);
        assert_eq!(parsed.sequence, 1);
        assert_eq!(parsed.length, 4);
        assert_eq!(&parsed.data[..4], &[1, 2, 3, 4]);
        assert!(parsed.data[4..].iter().all(|&b| b == 0), "padded with zeros");
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut packet = build_packet(0, &[0, 0]);
        packet[0] = b'X';
        assert!(parse_artnet_packet(&packet).is_none());
    }

    #[test]
    fn test_rejects_wrong_opcode() {
        let mut packet = build_packet(0, &[0, 0]);
        packet[9] = 0x20; // OpPoll
        assert!(parse_artnet_packet(&packet).is_none());
    }

    #[test]
    fn test_rejects_old_protocol_version() {
        let mut packet = build_packet(0, &[0, 0]);
        packet[11] = 13;
        assert!(parse_artnet_packet(&packet).is_none());
    }

    #[test]
    fn test_rejects_bad_lengths() {
        // length 1 is below the minimum of 2
        let packet = build_packet(0, &[7]);
        assert!(parse_artnet_packet(&packet).is_none());

        // declared length larger than the actual payload
        let mut packet = build_packet(0, &[1, 2, 3, 4]);
        packet[17] = 200;
        assert!(parse_artnet_packet(&packet).is_none());
    }

    #[test]
    fn test_accepts_full_universe() {
        let payload = [0xABu8; 512];
        let packet = build_packet(7, &payload);
        let parsed = parse_artnet_packet(&packet).unwrap();
        assert_eq!(parsed.length, 512);
        assert_eq!(parsed.data, payload);
    }

    #[test]
    fn test_truncated_header_rejected() {
        assert!(parse_artnet_packet(b"Art-Net\0\x00\x50").is_none());
    }
}
