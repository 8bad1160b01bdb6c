//! sACN / E1.31 ingress
//!
//! Parses the three-layer E1.31 data packet (Root / Framing / DMP) and
//! feeds the mapping engine. Reception joins the per-universe multicast
//! group `239.255.{hi}.{lo}`; unicast to the same port is also accepted.

use std::net::Ipv4Addr;
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use luxbridge_core::{
    BridgeConfig, DmxFrame, MetricsHandle, SourceProtocol, DMX_CHANNELS, MAX_PRIORITY,
    MAX_UNIVERSE, SACN_DEFAULT_PRIORITY,
};

use crate::engine::MappingEngine;
use crate::error::{DmxError, Result};

/// Default sACN port
pub const SACN_PORT: u16 = 5568;

const ACN_PACKET_IDENTIFIER: &[u8; 12] = b"ASC-E1.17\x00\x00\x00";
const VECTOR_ROOT_E131_DATA: u32 = 0x0000_0004;
const VECTOR_E131_DATA_PACKET: u32 = 0x0000_0002;
const VECTOR_DMP_SET_PROPERTY: u8 = 0x02;

/// Minimum bytes for a packet with zero DMX slots
const MIN_PACKET_LEN: usize = 126;

/// A parsed E1.31 data packet
#[derive(Debug, Clone)]
pub struct SacnPacket {
    pub universe: u16,
    pub sequence: u8,
    /// Clamped into 0..=200; out-of-range falls back to the default 100
    pub priority: u8,
    pub source_name: String,
    pub cid: [u8; 16],
    pub sync_address: u16,
    pub preview: bool,
    pub stream_terminated: bool,
    /// DMX slots as carried on the wire (START code stripped)
    pub data: Vec<u8>,
}

/// Parse an E1.31 data packet, or `None` for anything malformed or of a
/// different vector.
pub fn parse_sacn_packet(data: &[u8]) -> Option<SacnPacket> {
    if data.len() < MIN_PACKET_LEN {
        return None;
    }

    // ===== Root layer =====
    let preamble = u16::from_be_bytes([data[0], data[1]]);
    if preamble != 0x0010 {
        return None;
    }
    let postamble = u16::from_be_bytes([data[2], data[3]]);
    if postamble != 0x0000 {
        return None;
    }
    if &data[4..16] != ACN_PACKET_IDENTIFIER {
        return None;
    }
    // flags/length at 16..18
    let root_vector = u32::from_be_bytes([data[18], data[19], data[20], data[21]]);
    if root_vector != VECTOR_ROOT_E131_DATA {
        return None;
    }
    let mut cid = [0u8; 16];
    cid.copy_from_slice(&data[22..38]);

    // ===== Framing layer =====
    // flags/length at 38..40
    let framing_vector = u32::from_be_bytes([data[40], data[41], data[42], data[43]]);
    if framing_vector != VECTOR_E131_DATA_PACKET {
        return None;
    }
    let name_bytes = &data[44..108];
    let name_end = name_bytes.iter().position(|&b| b == 0).unwrap_or(64);
    let source_name = String::from_utf8_lossy(&name_bytes[..name_end]).into_owned();

    let mut priority = data[108];
    if priority > MAX_PRIORITY {
        priority = SACN_DEFAULT_PRIORITY;
    }
    let sync_address = u16::from_be_bytes([data[109], data[110]]);
    let sequence = data[111];
    let options = data[112];
    let preview = options & 0x80 != 0;
    let stream_terminated = options & 0x40 != 0;
    let universe = u16::from_be_bytes([data[113], data[114]]);
    if universe == 0 || universe > MAX_UNIVERSE {
        return None;
    }

    // ===== DMP layer =====
    // flags/length at 115..117
    let dmp_vector = data[117];
    if dmp_vector != VECTOR_DMP_SET_PROPERTY {
        return None;
    }
    // address/data type at 118
    let first_address = u16::from_be_bytes([data[119], data[120]]);
    if first_address != 0 {
        return None;
    }
    let address_increment = u16::from_be_bytes([data[121], data[122]]);
    if address_increment != 1 {
        return None;
    }
    let property_count = u16::from_be_bytes([data[123], data[124]]) as usize;
    // Property count includes the START code
    if property_count == 0 || property_count > 513 {
        return None;
    }
    let slot_count = property_count - 1;

    let start_code = data[125];
    if start_code != 0x00 {
        return None;
    }
    if data.len() < 126 + slot_count {
        return None;
    }

    Some(SacnPacket {
        universe,
        sequence,
        priority,
        source_name,
        cid,
        sync_address,
        preview,
        stream_terminated,
        data: data[126..126 + slot_count].to_vec(),
    })
}

/// E1.31 multicast group for a universe: `239.255.{hi}.{lo}`
pub fn multicast_address(universe: u16) -> Option<Ipv4Addr> {
    if universe == 0 || universe > MAX_UNIVERSE {
        return None;
    }
    Some(Ipv4Addr::new(
        239,
        255,
        ((universe >> 8) & 0xFF) as u8,
        (universe & 0xFF) as u8,
    ))
}

fn source_id_for(cid: &[u8; 16], universe: u16) -> String {
    let prefix: String = cid[..4].iter().map(|b| format!("{b:02x}")).collect();
    format!("sacn-{prefix}-u{universe}")
}

/// sACN listener feeding the mapping engine
pub struct SacnService {
    config: Arc<BridgeConfig>,
    engine: Arc<MappingEngine>,
    metrics: MetricsHandle,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl SacnService {
    pub fn new(config: Arc<BridgeConfig>, engine: Arc<MappingEngine>, metrics: MetricsHandle) -> Self {
        Self {
            config,
            engine,
            metrics,
            shutdown_tx: None,
        }
    }

    fn bind_socket(&self) -> Result<std::net::UdpSocket> {
        let addr = std::net::SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.config.sacn_port));
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(DmxError::Io)?;
        socket.set_reuse_address(true)?;
        #[cfg(unix)]
        socket.set_reuse_port(true)?;
        socket.bind(&addr.into()).map_err(|source| DmxError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        socket.set_nonblocking(true)?;
        Ok(socket.into())
    }

    /// Bind, join multicast groups for the configured universes, and
    /// start the receive loop.
    pub async fn start(&mut self) -> Result<()> {
        let std_socket = self.bind_socket()?;
        let socket = UdpSocket::from_std(std_socket)?;

        let mut joined = 0usize;
        if self.config.sacn_multicast {
            for &universe in &self.config.sacn_universes {
                let Some(group) = multicast_address(universe) else {
                    warn!(universe, "skipping multicast join; universe out of range");
                    continue;
                };
                match socket.join_multicast_v4(group, Ipv4Addr::UNSPECIFIED) {
                    Ok(()) => {
                        joined += 1;
                        debug!(%group, universe, "joined sACN multicast group");
                    }
                    Err(e) => {
                        warn!(%group, universe, error = %e, "failed to join sACN multicast group");
                    }
                }
            }
        }

        info!(
            port = self.config.sacn_port,
            multicast = self.config.sacn_multicast,
            groups = joined,
            "sACN listener started"
        );

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        let engine = self.engine.clone();
        let metrics = self.metrics.clone();
        let sample_rate = self.config.noisy_log_sample_rate;

        tokio::spawn(async move {
            let mut buf = vec![0u8; 1144];
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("sACN listener shutting down");
                        break;
                    }
                    result = socket.recv_from(&mut buf) => {
                        match result {
                            Ok((len, from)) => {
                                let Some(packet) = parse_sacn_packet(&buf[..len]) else {
                                    metrics.incr("ingest_rejected");
                                    if fastrand::f64() <= sample_rate {
                                        debug!(%from, len, "dropped malformed sACN packet");
                                    }
                                    continue;
                                };
                                handle_packet(&engine, packet, sample_rate).await;
                            }
                            Err(e) => {
                                error!(error = %e, "sACN receive error");
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
        info!("sACN listener stopped");
    }
}

async fn handle_packet(engine: &MappingEngine, packet: SacnPacket, sample_rate: f64) {
    // Preview data never drives live output
    if packet.preview {
        if fastrand::f64() <= sample_rate {
            debug!(
                universe = packet.universe,
                source = %packet.source_name,
                "ignoring sACN preview data"
            );
        }
        return;
    }

    // A terminated stream ages out via the merger timeout rather than
    // synthesising a zero frame.
    if packet.stream_terminated {
        info!(
            universe = packet.universe,
            source = %packet.source_name,
            "sACN stream terminated"
        );
        return;
    }

    let mut data = [0u8; DMX_CHANNELS];
    let len = packet.data.len().min(DMX_CHANNELS);
    data[..len].copy_from_slice(&packet.data[..len]);

    let source_id = source_id_for(&packet.cid, packet.universe);
    match DmxFrame::new(
        packet.universe,
        data,
        packet.sequence,
        SourceProtocol::Sacn,
        packet.priority,
        source_id,
    ) {
        Ok(frame) => engine.process_frame(frame).await,
        Err(e) => debug!(error = %e, "rejected sACN frame"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn build_packet(
        universe: u16,
        priority: u8,
        options: u8,
        slots: &[u8],
    ) -> Vec<u8> {
        let mut packet = Vec::new();
        // Root layer
        packet.extend_from_slice(&0x0010u16.to_be_bytes());
        packet.extend_from_slice(&0x0000u16.to_be_bytes());
        packet.extend_from_slice(ACN_PACKET_IDENTIFIER);
        packet.extend_from_slice(&0x7000u16.to_be_bytes()); // flags/length
        packet.extend_from_slice(&VECTOR_ROOT_E131_DATA.to_be_bytes());
        packet.extend_from_slice(&[0x11u8; 16]); // CID
        // Framing layer
        packet.extend_from_slice(&0x7000u16.to_be_bytes());
        packet.extend_from_slice(&VECTOR_E131_DATA_PACKET.to_be_bytes());
        let mut name = [0u8; 64];
        name[..4].copy_from_slice(b"test");
        packet.extend_from_slice(&name);
        packet.push(priority);
        packet.extend_from_slice(&0u16.to_be_bytes()); // sync address
        packet.push(7); // sequence
        packet.push(options);
        packet.extend_from_slice(&universe.to_be_bytes());
        // DMP layer
        packet.extend_from_slice(&0x7000u16.to_be_bytes());
        packet.push(VECTOR_DMP_SET_PROPERTY);
        packet.push(0xA1); // address & data type
        packet.extend_from_slice(&0u16.to_be_bytes()); // first address
        packet.extend_from_slice(&1u16.to_be_bytes()); // increment
        packet.extend_from_slice(&((slots.len() + 1) as u16).to_be_bytes());
        packet.push(0x00); // START code
        packet.extend_from_slice(slots);
        packet
    }

    #[test]
    fn test_parse_valid_packet() {
        let slots = [10u8, 20, 30];
        let packet = build_packet(1, 100, 0, &slots);
        let parsed = parse_sacn_packet(&packet).unwrap();
        assert_eq!(parsed.universe, 1);
        assert_eq!(parsed.priority, 100);
        assert_eq!(parsed.sequence, 7);
        assert_eq!(parsed.source_name, "test");
        assert_eq!(parsed.data, slots);
        assert!(!parsed.preview);
        assert!(!parsed.stream_terminated);
    }

    #[test]
    fn test_priority_out_of_range_defaults() {
        let packet = build_packet(1, 250, 0, &[0, 0, 0]);
        let parsed = parse_sacn_packet(&packet).unwrap();
        assert_eq!(parsed.priority, SACN_DEFAULT_PRIORITY);
    }

    #[test]
    fn test_options_bits() {
        let preview = parse_sacn_packet(&build_packet(1, 100, 0x80, &[0, 0])).unwrap();
        assert!(preview.preview);

        let terminated = parse_sacn_packet(&build_packet(1, 100, 0x40, &[0, 0])).unwrap();
        assert!(terminated.stream_terminated);
    }

    #[test]
    fn test_universe_zero_rejected() {
        assert!(parse_sacn_packet(&build_packet(0, 100, 0, &[0, 0])).is_none());
    }

    #[test]
    fn test_bad_identifier_rejected() {
        let mut packet = build_packet(1, 100, 0, &[0, 0]);
        packet[4] = b'X';
        assert!(parse_sacn_packet(&packet).is_none());
    }

    #[test]
    fn test_nonzero_start_code_rejected() {
        let mut packet = build_packet(1, 100, 0, &[0, 0]);
        packet[125] = 0x55;
        assert!(parse_sacn_packet(&packet).is_none());
    }

    #[test]
    fn test_multicast_address_mapping() {
        assert_eq!(multicast_address(1), Some(Ipv4Addr::new(239, 255, 0, 1)));
        assert_eq!(multicast_address(256), Some(Ipv4Addr::new(239, 255, 1, 0)));
        assert_eq!(
            multicast_address(63999),
            Some(Ipv4Addr::new(239, 255, 249, 255))
        );
        assert_eq!(multicast_address(0), None);
        assert_eq!(multicast_address(64000), None);
    }

    #[test]
    fn test_multicast_mapping_formula_holds_across_range() {
        for universe in (1..=MAX_UNIVERSE).step_by(997) {
            let addr = multicast_address(universe).unwrap();
            let octets = addr.octets();
            assert_eq!(octets[2], ((universe >> 8) & 0xFF) as u8);
            assert_eq!(octets[3], (universe & 0xFF) as u8);
        }
    }

    #[test]
    fn test_source_id_uses_cid_prefix() {
        let cid = [0xAB; 16];
        assert_eq!(source_id_for(&cid, 5), "sacn-abababab-u5");
    }
}
