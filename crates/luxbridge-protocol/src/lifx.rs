//! LIFX LAN protocol handler
//!
//! Binary little-endian UDP protocol on port 56700 with HSBK colour.
//! Every packet starts with a 36-byte header:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ u16  size         total packet length                        │
//! │ u16  proto/flags  protocol=1024 [11:0], addressable [12],    │
//! │                   tagged [13], origin [15:14]=0              │
//! │ u32  source       sender id (pinned to "LIFX")               │
//! │ u64  target       6-byte MAC + 2 zero bytes; zero = broadcast│
//! │ u48  reserved                                                │
//! │ u8   flags        res_required [0], ack_required [1]         │
//! │ u8   sequence     wrapping per-handler counter               │
//! │ u64  reserved                                                │
//! │ u16  type         message type id                            │
//! │ u16  reserved                                                │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde_json::{json, Value};

use luxbridge_core::{Device, DeviceCommand, DevicePayload};

use crate::capabilities::{CapabilityProviderHandle, DeviceReportedCapabilityProvider};
use crate::error::{ProtocolError, Result};
use crate::traits::{ProtocolHandler, Transport, WireCommand};

/// Port used for control, polling, and discovery alike
pub const LIFX_PORT: u16 = 56700;

/// Header length in bytes
pub const HEADER_SIZE: usize = 36;

const PROTOCOL_NUMBER: u16 = 1024;
/// "LIFX" pinned as the source identifier
const SOURCE_ID: u32 = 0x4C49_4658;

const KELVIN_MIN: u16 = 2500;
const KELVIN_MAX: u16 = 9000;
const KELVIN_DEFAULT: u16 = 3500;

// Message type ids
pub const MSG_GET_SERVICE: u16 = 2;
pub const MSG_STATE_SERVICE: u16 = 3;
pub const MSG_GET_HOST_FIRMWARE: u16 = 14;
pub const MSG_STATE_HOST_FIRMWARE: u16 = 15;
pub const MSG_SET_POWER: u16 = 21;
pub const MSG_GET_LABEL: u16 = 23;
pub const MSG_STATE_LABEL: u16 = 25;
pub const MSG_GET_VERSION: u16 = 32;
pub const MSG_STATE_VERSION: u16 = 33;
pub const MSG_LIGHT_GET: u16 = 101;
pub const MSG_LIGHT_SET_COLOR: u16 = 102;
pub const MSG_LIGHT_STATE: u16 = 107;
pub const MSG_SET_LIGHT_POWER: u16 = 117;

/// Decoded packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Total packet length including payload
    pub size: u16,
    /// Broadcast flag; encode zeroes the target when set
    pub tagged: bool,
    pub source: u32,
    /// Device MAC; all zeros for broadcast
    pub target: [u8; 6],
    pub res_required: bool,
    pub ack_required: bool,
    pub sequence: u8,
    pub message_type: u16,
}

impl Header {
    pub fn new(message_type: u16, payload_len: usize) -> Self {
        Self {
            size: (HEADER_SIZE + payload_len) as u16,
            tagged: false,
            source: SOURCE_ID,
            target: [0; 6],
            res_required: false,
            ack_required: false,
            sequence: 0,
            message_type,
        }
    }

    /// Encode into the 36-byte wire layout
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE);

        buf.put_u16_le(self.size);

        let mut proto_flags = PROTOCOL_NUMBER;
        proto_flags |= 1 << 12; // addressable
        if self.tagged {
            proto_flags |= 1 << 13;
        }
        buf.put_u16_le(proto_flags);

        buf.put_u32_le(self.source);

        if self.tagged {
            buf.put_bytes(0, 8);
        } else {
            buf.put_slice(&self.target);
            buf.put_bytes(0, 2);
        }

        buf.put_bytes(0, 6); // reserved

        let mut flags = 0u8;
        if self.res_required {
            flags |= 0x01;
        }
        if self.ack_required {
            flags |= 0x02;
        }
        buf.put_u8(flags);
        buf.put_u8(self.sequence);

        buf.put_bytes(0, 8); // reserved
        buf.put_u16_le(self.message_type);
        buf.put_bytes(0, 2); // reserved

        buf.freeze()
    }

    /// Decode from wire bytes; `None` when the buffer is too short
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < HEADER_SIZE {
            return None;
        }
        let mut buf = &data[..HEADER_SIZE];

        let size = buf.get_u16_le();
        let proto_flags = buf.get_u16_le();
        let tagged = (proto_flags >> 13) & 0x1 == 1;
        let source = buf.get_u32_le();

        let mut target = [0u8; 6];
        buf.copy_to_slice(&mut target);
        buf.advance(2); // target padding
        buf.advance(6); // reserved

        let flags = buf.get_u8();
        let sequence = buf.get_u8();
        buf.advance(8); // reserved
        let message_type = buf.get_u16_le();

        Some(Self {
            size,
            tagged,
            source,
            target,
            res_required: flags & 0x01 != 0,
            ack_required: flags & 0x02 != 0,
            sequence,
            message_type,
        })
    }

    /// Payload slice bounded by the header's size field
    pub fn payload<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        let end = (self.size as usize).min(data.len());
        if end <= HEADER_SIZE {
            &[]
        } else {
            &data[HEADER_SIZE..end]
        }
    }
}

pub struct LifxHandler {
    sequence: AtomicU8,
    capabilities: CapabilityProviderHandle,
}

impl Default for LifxHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl LifxHandler {
    pub fn new() -> Self {
        Self {
            sequence: AtomicU8::new(0),
            capabilities: Arc::new(DeviceReportedCapabilityProvider::new(json!({
                "color_modes": ["color", "ct"],
                "brightness": true,
                "color": true,
                "color_temperature": true,
                "color_temp_range": [KELVIN_MIN, KELVIN_MAX],
                "white": true,
                "color_model": "hsbk",
            }))),
        }
    }

    fn next_sequence(&self) -> u8 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    fn packet(&self, mut header: Header, payload: &[u8]) -> Bytes {
        header.size = (HEADER_SIZE + payload.len()) as u16;
        let mut buf = BytesMut::with_capacity(header.size as usize);
        buf.put_slice(&header.encode());
        buf.put_slice(payload);
        buf.freeze()
    }

    /// GetService broadcast: tagged, zero target, sequence 0
    pub fn build_get_service(&self) -> Bytes {
        let header = Header {
            tagged: true,
            ..Header::new(MSG_GET_SERVICE, 0)
        };
        self.packet(header, &[])
    }

    pub fn build_get_version(&self, target: [u8; 6]) -> Bytes {
        let header = Header {
            target,
            res_required: true,
            sequence: self.next_sequence(),
            ..Header::new(MSG_GET_VERSION, 0)
        };
        self.packet(header, &[])
    }

    pub fn build_get_label(&self, target: [u8; 6]) -> Bytes {
        let header = Header {
            target,
            res_required: true,
            sequence: self.next_sequence(),
            ..Header::new(MSG_GET_LABEL, 0)
        };
        self.packet(header, &[])
    }

    pub fn build_get_host_firmware(&self, target: [u8; 6]) -> Bytes {
        let header = Header {
            target,
            res_required: true,
            sequence: self.next_sequence(),
            ..Header::new(MSG_GET_HOST_FIRMWARE, 0)
        };
        self.packet(header, &[])
    }

    fn build_set_power(&self, on: bool) -> Bytes {
        let header = Header {
            ack_required: true,
            sequence: self.next_sequence(),
            ..Header::new(MSG_SET_POWER, 2)
        };
        let mut payload = BytesMut::with_capacity(2);
        payload.put_u16_le(if on { 65535 } else { 0 });
        self.packet(header, &payload)
    }

    /// SetLightPower with a fade duration; hosts drive this directly
    /// since DMX payloads carry no transition time.
    pub fn build_set_light_power(&self, on: bool, duration_ms: u32) -> Bytes {
        let header = Header {
            ack_required: true,
            sequence: self.next_sequence(),
            ..Header::new(MSG_SET_LIGHT_POWER, 6)
        };
        let mut payload = BytesMut::with_capacity(6);
        payload.put_u16_le(if on { 65535 } else { 0 });
        payload.put_u32_le(duration_ms);
        self.packet(header, &payload)
    }

    /// SetColor payload: reserved u8, HSBK (4 × u16), duration u32
    fn build_set_color(&self, hue: u16, sat: u16, bri: u16, kelvin: u16, duration_ms: u32) -> Bytes {
        let header = Header {
            ack_required: true,
            sequence: self.next_sequence(),
            ..Header::new(MSG_LIGHT_SET_COLOR, 13)
        };
        let mut payload = BytesMut::with_capacity(13);
        payload.put_u8(0);
        payload.put_u16_le(hue);
        payload.put_u16_le(sat);
        payload.put_u16_le(bri);
        payload.put_u16_le(kelvin);
        payload.put_u32_le(duration_ms);
        self.packet(header, &payload)
    }

    fn build_color_packet(
        &self,
        color: Option<(u8, u8, u8)>,
        kelvin: Option<u16>,
        brightness: Option<u8>,
    ) -> Bytes {
        let kelvin = kelvin.unwrap_or(KELVIN_DEFAULT).clamp(KELVIN_MIN, KELVIN_MAX);

        let (hue, sat, mut bri) = match color {
            Some((r, g, b)) => {
                let (hue, sat, bri, _) = rgb_to_hsbk(r, g, b, kelvin);
                (hue, sat, bri)
            }
            // Kelvin-only: white at full value, temperature does the work
            None => (0, 0, 65535),
        };
        if let Some(brightness) = brightness {
            bri = ((brightness as f64 / 255.0) * 65535.0).round() as u16;
        }

        self.build_set_color(hue, sat, bri, kelvin, 0)
    }

    /// Parse a StateService discovery response into `{mac, service, port}`
    pub fn parse_state_service(header: &Header, payload: &[u8]) -> Option<Value> {
        if header.message_type != MSG_STATE_SERVICE || payload.len() < 5 {
            return None;
        }
        let mut buf = payload;
        let service = buf.get_u8();
        let port = buf.get_u32_le();
        Some(json!({
            "mac": format_mac(&header.target),
            "service": service,
            "port": port,
            "protocol": "lifx",
        }))
    }

    /// StateVersion payload: vendor u32, product u32, version u32
    pub fn parse_state_version(payload: &[u8]) -> Option<Value> {
        if payload.len() < 12 {
            return None;
        }
        let mut buf = payload;
        let vendor_id = buf.get_u32_le();
        let product_id = buf.get_u32_le();
        let version_build = buf.get_u32_le();
        Some(json!({
            "vendor_id": vendor_id,
            "product_id": product_id,
            "version_build": version_build,
            "model_number": format!("{vendor_id}:{product_id}"),
        }))
    }

    /// StateHostFirmware payload: build u64, reserved u64, minor u16, major u16
    pub fn parse_state_host_firmware(payload: &[u8]) -> Option<Value> {
        if payload.len() < 20 {
            return None;
        }
        let mut buf = payload;
        let build = buf.get_u64_le();
        buf.advance(8);
        let minor = buf.get_u16_le();
        let major = buf.get_u16_le();
        Some(json!({
            "firmware_build": build,
            "firmware_version": format!("{major}.{minor}"),
        }))
    }

    /// StateLabel payload: 32-byte null-padded UTF-8
    pub fn parse_state_label(payload: &[u8]) -> Option<Value> {
        if payload.len() < 32 {
            return None;
        }
        Some(json!({ "label": decode_label(&payload[..32]) }))
    }

    /// Light::State payload (52 bytes): HSBK, reserved, power level,
    /// 32-byte label, reserved.
    pub fn parse_light_state(payload: &[u8]) -> Option<Value> {
        if payload.len() < 52 {
            return None;
        }
        let mut buf = payload;
        let hue = buf.get_u16_le();
        let sat = buf.get_u16_le();
        let bri = buf.get_u16_le();
        let kelvin = buf.get_u16_le();
        buf.advance(2); // reserved
        let power = buf.get_u16_le();
        let label = decode_label(&payload[12..44]);

        let (r, g, b) = hsbk_to_rgb(hue, sat, bri);

        Some(json!({
            "hue": hue,
            "saturation": sat,
            "brightness": bri,
            "kelvin": kelvin,
            "power": power == 65535,
            "label": label,
            "color": {"r": r, "g": g, "b": b},
            "brightness_normalized": ((bri as f64 / 65535.0) * 255.0).round() as u8,
        }))
    }

    /// Parse a device id of the form `AA:BB:CC:DD:EE:FF`
    pub fn parse_mac(id: &str) -> Option<[u8; 6]> {
        let mut mac = [0u8; 6];
        let mut parts = id.split(':');
        for byte in mac.iter_mut() {
            *byte = u8::from_str_radix(parts.next()?, 16).ok()?;
        }
        if parts.next().is_some() {
            return None;
        }
        Some(mac)
    }
}

impl ProtocolHandler for LifxHandler {
    fn protocol_name(&self) -> &'static str {
        "lifx"
    }

    fn default_port(&self) -> u16 {
        LIFX_PORT
    }

    fn default_transport(&self) -> Transport {
        Transport::Udp
    }

    fn wrap_command(&self, payload: &DevicePayload) -> Result<Vec<WireCommand>> {
        let commands = payload.commands();
        if commands.is_empty() {
            return Err(ProtocolError::Unsupported {
                protocol: "lifx",
                reason: "empty payload".to_string(),
            });
        }

        let mut packets = Vec::new();
        let mut color = None;
        let mut kelvin = None;
        let mut brightness = None;

        for command in &commands {
            match command {
                DeviceCommand::PowerOn => packets.push(self.build_set_power(true)),
                DeviceCommand::PowerOff => packets.push(self.build_set_power(false)),
                DeviceCommand::SetColor { r, g, b, kelvin: k, .. } => {
                    color = Some((*r, *g, *b));
                    kelvin = *k;
                }
                DeviceCommand::SetKelvin(k) => kelvin = Some(*k),
                DeviceCommand::SetBrightness(v) => brightness = Some(*v),
            }
        }

        // Colour, kelvin, and brightness collapse into one SetColor
        if color.is_some() || kelvin.is_some() || brightness.is_some() {
            packets.push(self.build_color_packet(color, kelvin, brightness));
        }

        Ok(packets)
    }

    fn address_command(&self, command: WireCommand, device: &Device) -> Result<WireCommand> {
        match Self::parse_mac(&device.id) {
            Some(mac) => {
                let mut buf = BytesMut::from(command.as_ref());
                if buf.len() >= HEADER_SIZE {
                    buf[8..14].copy_from_slice(&mac);
                }
                Ok(buf.freeze())
            }
            // Not a MAC-shaped id; zero target still works over unicast
            None => Ok(command),
        }
    }

    fn supports_polling(&self) -> bool {
        true
    }

    fn build_poll_request(&self) -> Result<WireCommand> {
        let header = Header {
            sequence: self.next_sequence(),
            ..Header::new(MSG_LIGHT_GET, 0)
        };
        Ok(self.packet(header, &[]))
    }

    fn parse_poll_response(&self, data: &[u8]) -> Option<Value> {
        let header = Header::decode(data)?;
        if header.message_type != MSG_LIGHT_STATE {
            return None;
        }
        Self::parse_light_state(header.payload(data))
    }

    fn capability_provider(&self) -> CapabilityProviderHandle {
        self.capabilities.clone()
    }
}

fn format_mac(mac: &[u8; 6]) -> String {
    mac.iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

fn decode_label(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// RGB (0..255) to LIFX HSBK via the standard HSV transform
pub fn rgb_to_hsbk(r: u8, g: u8, b: u8, kelvin: u16) -> (u16, u16, u16, u16) {
    let r = r as f64 / 255.0;
    let g = g as f64 / 255.0;
    let b = b as f64 / 255.0;

    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let hue = if delta == 0.0 {
        0.0
    } else if max == r {
        (((g - b) / delta).rem_euclid(6.0)) / 6.0
    } else if max == g {
        ((b - r) / delta + 2.0) / 6.0
    } else {
        ((r - g) / delta + 4.0) / 6.0
    };
    let sat = if max == 0.0 { 0.0 } else { delta / max };

    (
        (hue * 65535.0).round() as u16,
        (sat * 65535.0).round() as u16,
        (max * 65535.0).round() as u16,
        kelvin.clamp(KELVIN_MIN, KELVIN_MAX),
    )
}

/// LIFX HSBK to RGB (0..255); kelvin is ignored
pub fn hsbk_to_rgb(hue: u16, sat: u16, bri: u16) -> (u8, u8, u8) {
    let h = hue as f64 / 65535.0;
    let s = sat as f64 / 65535.0;
    let v = bri as f64 / 65535.0;

    let i = (h * 6.0).floor();
    let f = h * 6.0 - i;
    let p = v * (1.0 - s);
    let q = v * (1.0 - f * s);
    let t = v * (1.0 - (1.0 - f) * s);

    let (r, g, b) = match (i as i64).rem_euclid(6) {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    };

    (
        (r * 255.0).round() as u8,
        (g * 255.0).round() as u8,
        (b * 255.0).round() as u8,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use luxbridge_core::{Color, Power};

    #[test]
    fn test_header_round_trip() {
        let header = Header {
            size: 49,
            tagged: false,
            source: SOURCE_ID,
            target: [0xD0, 0x73, 0xD5, 0x01, 0x02, 0x03],
            res_required: true,
            ack_required: true,
            sequence: 200,
            message_type: MSG_LIGHT_SET_COLOR,
        };
        let encoded = header.encode();
        assert_eq!(encoded.len(), HEADER_SIZE);
        assert_eq!(Header::decode(&encoded), Some(header));
    }

    #[test]
    fn test_tagged_header_round_trip_zeroes_target() {
        let header = Header {
            size: 36,
            tagged: true,
            source: SOURCE_ID,
            target: [0; 6],
            res_required: false,
            ack_required: false,
            sequence: 0,
            message_type: MSG_GET_SERVICE,
        };
        let decoded = Header::decode(&header.encode()).unwrap();
        assert_eq!(decoded, header);
        assert!(decoded.tagged);
    }

    #[test]
    fn test_size_field_matches_packet_length() {
        let handler = LifxHandler::new();
        let packet = handler.build_set_power(true);
        let header = Header::decode(&packet).unwrap();
        assert_eq!(header.size as usize, packet.len());
        assert_eq!(packet.len(), HEADER_SIZE + 2);
    }

    #[test]
    fn test_set_color_red_full_brightness() {
        let handler = LifxHandler::new();
        let payload = DevicePayload {
            color: Some(Color::rgb(255, 0, 0)),
            brightness: Some(255),
            ..Default::default()
        };
        let packets = handler.wrap_command(&payload).unwrap();
        assert_eq!(packets.len(), 1);
        let packet = &packets[0];
        assert_eq!(packet.len(), 49);

        let header = Header::decode(packet).unwrap();
        assert_eq!(header.message_type, MSG_LIGHT_SET_COLOR);
        assert_eq!(header.size, 49);
        assert_eq!(header.source, SOURCE_ID);

        let body = header.payload(packet);
        assert_eq!(body[0], 0); // reserved
        let hue = u16::from_le_bytes([body[1], body[2]]);
        let sat = u16::from_le_bytes([body[3], body[4]]);
        let bri = u16::from_le_bytes([body[5], body[6]]);
        let kelvin = u16::from_le_bytes([body[7], body[8]]);
        let duration = u32::from_le_bytes([body[9], body[10], body[11], body[12]]);
        assert_eq!(hue, 0); // red
        assert_eq!(sat, 0xFFFF);
        assert_eq!(bri, 0xFFFF);
        assert_eq!(kelvin, KELVIN_DEFAULT);
        assert_eq!(duration, 0);
    }

    #[test]
    fn test_power_only_payloads() {
        let handler = LifxHandler::new();

        let on = DevicePayload {
            turn: Some(Power::On),
            ..Default::default()
        };
        let packets = handler.wrap_command(&on).unwrap();
        assert_eq!(packets.len(), 1);
        let header = Header::decode(&packets[0]).unwrap();
        assert_eq!(header.message_type, MSG_SET_POWER);
        let level = u16::from_le_bytes([packets[0][36], packets[0][37]]);
        assert_eq!(level, 65535);

        let off = DevicePayload {
            turn: Some(Power::Off),
            color: Some(Color::rgb(9, 9, 9)),
            ..Default::default()
        };
        let packets = handler.wrap_command(&off).unwrap();
        assert_eq!(packets.len(), 1, "power-off is exclusive");
        let level = u16::from_le_bytes([packets[0][36], packets[0][37]]);
        assert_eq!(level, 0);
    }

    #[test]
    fn test_kelvin_clamped_to_lifx_range() {
        let handler = LifxHandler::new();
        let payload = DevicePayload {
            color_temp: Some(1000),
            ..Default::default()
        };
        let packets = handler.wrap_command(&payload).unwrap();
        let body = Header::decode(&packets[0])
            .unwrap()
            .payload(&packets[0])
            .to_vec();
        let kelvin = u16::from_le_bytes([body[7], body[8]]);
        assert_eq!(kelvin, KELVIN_MIN);
    }

    #[test]
    fn test_address_command_patches_target() {
        let handler = LifxHandler::new();
        let device = Device::new("D0:73:D5:AA:BB:CC", "10.0.0.5", "lifx");
        let packet = handler.build_poll_request().unwrap();
        let addressed = handler.address_command(packet, &device).unwrap();
        let header = Header::decode(&addressed).unwrap();
        assert_eq!(header.target, [0xD0, 0x73, 0xD5, 0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn test_address_command_leaves_non_mac_ids() {
        let handler = LifxHandler::new();
        let device = Device::new("not-a-mac", "10.0.0.5", "lifx");
        let packet = handler.build_poll_request().unwrap();
        let addressed = handler.address_command(packet.clone(), &device).unwrap();
        assert_eq!(addressed, packet);
    }

    #[test]
    fn test_light_state_round_trip() {
        let handler = LifxHandler::new();

        // Build a Light::State packet by hand
        let mut payload = BytesMut::new();
        let (hue, sat, bri, kelvin) = rgb_to_hsbk(0, 255, 0, 3500);
        payload.put_u16_le(hue);
        payload.put_u16_le(sat);
        payload.put_u16_le(bri);
        payload.put_u16_le(kelvin);
        payload.put_u16_le(0); // reserved
        payload.put_u16_le(65535); // power
        let mut label = [0u8; 32];
        label[..7].copy_from_slice(b"Kitchen");
        payload.put_slice(&label);
        payload.put_u64_le(0); // reserved

        let header = Header {
            sequence: 9,
            ..Header::new(MSG_LIGHT_STATE, payload.len())
        };
        let mut packet = BytesMut::from(header.encode().as_ref());
        packet.put_slice(&payload);

        let state = handler.parse_poll_response(&packet).unwrap();
        assert_eq!(state["power"], true);
        assert_eq!(state["label"], "Kitchen");
        assert_eq!(state["kelvin"], 3500);
        assert_eq!(state["color"]["g"], 255);
        assert_eq!(state["brightness_normalized"], 255);
    }

    #[test]
    fn test_poll_response_ignores_other_types() {
        let handler = LifxHandler::new();
        let packet = handler.build_get_service();
        assert!(handler.parse_poll_response(&packet).is_none());
    }

    #[test]
    fn test_state_service_parse() {
        let mut payload = BytesMut::new();
        payload.put_u8(1); // UDP service
        payload.put_u32_le(56700);

        let header = Header {
            target: [0xAA, 0xBB, 0xCC, 0x00, 0x11, 0x22],
            ..Header::new(MSG_STATE_SERVICE, payload.len())
        };
        let parsed = LifxHandler::parse_state_service(&header, &payload).unwrap();
        assert_eq!(parsed["mac"], "AA:BB:CC:00:11:22");
        assert_eq!(parsed["port"], 56700);
        assert_eq!(parsed["service"], 1);
    }

    #[test]
    fn test_state_version_and_firmware_parse() {
        let mut payload = BytesMut::new();
        payload.put_u32_le(1);
        payload.put_u32_le(27);
        payload.put_u32_le(42);
        let version = LifxHandler::parse_state_version(&payload).unwrap();
        assert_eq!(version["model_number"], "1:27");

        let mut payload = BytesMut::new();
        payload.put_u64_le(1_600_000_000);
        payload.put_u64_le(0);
        payload.put_u16_le(70);
        payload.put_u16_le(3);
        let firmware = LifxHandler::parse_state_host_firmware(&payload).unwrap();
        assert_eq!(firmware["firmware_version"], "3.70");
    }

    #[test]
    fn test_rgb_hsv_round_trip_primaries() {
        for (r, g, b) in [(255, 0, 0), (0, 255, 0), (0, 0, 255), (255, 255, 255)] {
            let (hue, sat, bri, _) = rgb_to_hsbk(r, g, b, 3500);
            assert_eq!(hsbk_to_rgb(hue, sat, bri), (r, g, b));
        }
    }

    #[test]
    fn test_sequence_wraps() {
        let handler = LifxHandler::new();
        let first = Header::decode(&handler.build_poll_request().unwrap())
            .unwrap()
            .sequence;
        for _ in 0..255 {
            handler.build_poll_request().unwrap();
        }
        let wrapped = Header::decode(&handler.build_poll_request().unwrap())
            .unwrap()
            .sequence;
        assert_eq!(first, wrapped);
    }
}
