//! Device records, discovery results, and delivery bookkeeping

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::command::DevicePayload;

/// A known LAN lighting device.
///
/// The core only mutates runtime state (offline flag, poll counters,
/// last-seen); catalog metadata belongs to the management layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    /// MAC or vendor identifier
    pub id: String,
    pub ip: String,
    /// Protocol handler name ("govee", "lifx", ...)
    pub protocol: String,
    /// Control port; protocol default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// User-created rather than discovered
    #[serde(default)]
    pub manual: bool,
    /// User has ever edited this device; sticky across rediscovery
    #[serde(default)]
    pub configured: bool,
    #[serde(default)]
    pub discovered: bool,
    #[serde(default)]
    pub capabilities: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_seen: Option<SystemTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<SystemTime>,
    #[serde(default)]
    pub offline: bool,
    #[serde(default)]
    pub poll_failure_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_last_success_at: Option<SystemTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_last_failure_at: Option<SystemTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_state: Option<serde_json::Value>,
}

fn default_true() -> bool {
    true
}

impl Device {
    pub fn new(id: impl Into<String>, ip: impl Into<String>, protocol: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ip: ip.into(),
            protocol: protocol.into(),
            port: None,
            enabled: true,
            manual: false,
            configured: false,
            discovered: false,
            capabilities: serde_json::Value::Null,
            first_seen: None,
            last_seen: None,
            offline: false,
            poll_failure_count: 0,
            poll_last_success_at: None,
            poll_last_failure_at: None,
            poll_state: None,
        }
    }

    pub fn port_or(&self, default: u16) -> u16 {
        self.port.unwrap_or(default)
    }

    /// Kelvin range from the capability blob, if the device reports one
    pub fn color_temp_range(&self) -> Option<(u16, u16)> {
        let range = self.capabilities.get("color_temp_range")?.as_array()?;
        let min = range.first()?.as_u64()?;
        let max = range.get(1)?.as_u64()?;
        if min == 0 || max <= min {
            return None;
        }
        Some((min as u16, max as u16))
    }
}

/// One device surfaced by a discovery response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryResult {
    pub id: String,
    pub ip: String,
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<serde_json::Value>,
    #[serde(default)]
    pub manual: bool,
}

/// A device eligible for liveness polling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollTarget {
    pub id: String,
    pub ip: String,
    pub port: u16,
    pub protocol: String,
}

/// A state update queued for delivery to one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStateUpdate {
    pub device_id: String,
    pub payload: DevicePayload,
    /// End-to-end trace correlation id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
}

impl DeviceStateUpdate {
    pub fn new(device_id: impl Into<String>, payload: DevicePayload) -> Self {
        Self {
            device_id: device_id.into(),
            payload,
            context_id: None,
        }
    }
}

/// Why a payload was parked instead of delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterReason {
    MissingIp,
    DeviceUnavailable,
    SendFailedAfterRetries,
    UnsupportedProtocol,
    EncodeError,
}

impl fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeadLetterReason::MissingIp => "missing_ip",
            DeadLetterReason::DeviceUnavailable => "device_unavailable",
            DeadLetterReason::SendFailedAfterRetries => "send_failed_after_retries",
            DeadLetterReason::UnsupportedProtocol => "unsupported_protocol",
            DeadLetterReason::EncodeError => "encode_error",
        };
        write!(f, "{s}")
    }
}

/// An undeliverable payload, parked for inspection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub device_id: String,
    pub payload: DevicePayload,
    pub reason: DeadLetterReason,
    pub first_seen: SystemTime,
    pub attempts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_color_temp_range_parsing() {
        let mut device = Device::new("d1", "10.0.0.2", "lifx");
        assert_eq!(device.color_temp_range(), None);

        device.capabilities = json!({ "color_temp_range": [2500, 9000] });
        assert_eq!(device.color_temp_range(), Some((2500, 9000)));

        device.capabilities = json!({ "color_temp_range": [9000, 2500] });
        assert_eq!(device.color_temp_range(), None);
    }

    #[test]
    fn test_dead_letter_reason_labels() {
        assert_eq!(DeadLetterReason::MissingIp.to_string(), "missing_ip");
        assert_eq!(
            DeadLetterReason::SendFailedAfterRetries.to_string(),
            "send_failed_after_retries"
        );
    }
}
