//! Govee LAN protocol handler
//!
//! Govee devices speak JSON over UDP: control on port 4003, a multicast
//! scan for discovery (group 239.255.255.250, port 4001), and responses
//! back to local port 4002. Command types are `turn`, `brightness`, and
//! `colorwc` (colour + colour temperature).

use std::sync::Arc;

use bytes::Bytes;
use serde_json::{json, Map, Value};

use luxbridge_core::{DeviceCommand, DevicePayload, DiscoveryResult};

use crate::capabilities::{CapabilityProviderHandle, CatalogCapabilityProvider};
use crate::error::{ProtocolError, Result};
use crate::traits::{ProtocolHandler, Transport, WireCommand};

/// Port devices listen on for control commands
pub const GOVEE_CONTROL_PORT: u16 = 4003;
/// Multicast group scans are sent to
pub const GOVEE_DISCOVERY_GROUP: &str = "239.255.255.250";
/// Port within the discovery group
pub const GOVEE_DISCOVERY_PORT: u16 = 4001;
/// Local port where devices answer scans and devStatus
pub const GOVEE_RESPONSE_PORT: u16 = 4002;

pub struct GoveeHandler {
    capabilities: CapabilityProviderHandle,
}

impl Default for GoveeHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl GoveeHandler {
    pub fn new() -> Self {
        Self {
            capabilities: Arc::new(CatalogCapabilityProvider::with_defaults(json!({
                "color": true,
                "brightness": true,
                "color_temperature": true,
            }))),
        }
    }

    /// Catalog-backed constructor for deployments that ship a model catalog
    pub fn with_catalog(catalog: std::collections::HashMap<String, Value>) -> Self {
        Self {
            capabilities: Arc::new(CatalogCapabilityProvider::new(
                catalog,
                json!({ "color": true, "brightness": true }),
            )),
        }
    }

    fn command_json(command: &DeviceCommand) -> Value {
        match command {
            DeviceCommand::PowerOn => json!({"msg": {"cmd": "turn", "data": {"value": 1}}}),
            DeviceCommand::PowerOff => json!({"msg": {"cmd": "turn", "data": {"value": 0}}}),
            DeviceCommand::SetColor { r, g, b, kelvin, .. } => {
                let mut data = Map::new();
                data.insert("color".into(), json!({"r": r, "g": g, "b": b}));
                if let Some(kelvin) = kelvin {
                    data.insert("colorTemInKelvin".into(), json!(kelvin));
                }
                json!({"msg": {"cmd": "colorwc", "data": Value::Object(data)}})
            }
            DeviceCommand::SetKelvin(kelvin) => {
                json!({"msg": {"cmd": "colorwc", "data": {"colorTemInKelvin": kelvin}}})
            }
            DeviceCommand::SetBrightness(value) => {
                json!({"msg": {"cmd": "brightness", "data": {"value": value}}})
            }
        }
    }

    /// The scan probe body sent to the discovery group
    pub fn build_scan_probe() -> Bytes {
        Bytes::from_static(br#"{"msg":{"cmd":"scan","data":{"account_topic":"reserve"}}}"#)
    }

    /// Parse a scan response into a discovery result.
    ///
    /// Accepts the standard `{"msg":{"cmd":"scan","data":{...}}}` envelope,
    /// a bare `{"data": {...}}`, or a flat dict.
    pub fn parse_scan_response(data: &[u8], fallback_ip: &str) -> Option<DiscoveryResult> {
        let payload: Value = serde_json::from_slice(data).ok()?;
        let object = payload.as_object()?;

        let data_block: &Map<String, Value> = if let Some(msg) = object.get("msg").and_then(Value::as_object) {
            if msg.get("cmd").and_then(Value::as_str) != Some("scan") {
                return None;
            }
            msg.get("data")?.as_object()?
        } else if let Some(inner) = object.get("data").and_then(Value::as_object) {
            inner
        } else {
            object
        };

        let device_id = first_of(data_block, &["device", "id", "device_id", "deviceId"])?;
        let device_id = value_to_string(&device_id)?;

        let ip = first_of(data_block, &["ip"])
            .as_ref()
            .and_then(value_to_string)
            .unwrap_or_else(|| fallback_ip.to_string());

        let model_number = first_of(data_block, &["model", "sku", "type"])
            .as_ref()
            .and_then(value_to_string);
        let device_type = first_of(data_block, &["device_type", "deviceType"])
            .as_ref()
            .and_then(value_to_string);
        let description = first_of(data_block, &["description", "name"])
            .as_ref()
            .and_then(value_to_string);

        let mut capabilities = first_of(data_block, &["capabilities", "capability", "features"])
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default();

        // Colour-temperature hints and strip geometry ride along in the
        // capability blob; existing keys win.
        for key in [
            "ct",
            "color_temp",
            "colorTemperature",
            "color_temp_range",
            "ct_range",
            "colorTempRange",
            "colorTemperatureRange",
            "length_meters",
            "lengthMeters",
            "led_count",
            "ledCount",
            "led_density_per_meter",
            "ledDensityPerMeter",
            "has_zones",
            "hasZones",
            "zone_count",
            "zoneCount",
        ] {
            if let Some(value) = data_block.get(key) {
                capabilities.entry(key.to_string()).or_insert(value.clone());
            }
        }

        Some(DiscoveryResult {
            id: device_id,
            ip,
            protocol: "govee".to_string(),
            name: None,
            model_number,
            device_type,
            description,
            capabilities: if capabilities.is_empty() {
                None
            } else {
                Some(Value::Object(capabilities))
            },
            manual: false,
        })
    }
}

impl ProtocolHandler for GoveeHandler {
    fn protocol_name(&self) -> &'static str {
        "govee"
    }

    fn default_port(&self) -> u16 {
        GOVEE_CONTROL_PORT
    }

    fn default_transport(&self) -> Transport {
        Transport::Udp
    }

    fn wrap_command(&self, payload: &DevicePayload) -> Result<Vec<WireCommand>> {
        let commands = payload.commands();
        if commands.is_empty() {
            return Err(ProtocolError::Unsupported {
                protocol: "govee",
                reason: "empty payload".to_string(),
            });
        }

        commands
            .iter()
            .map(|command| {
                serde_json::to_vec(&Self::command_json(command))
                    .map(Bytes::from)
                    .map_err(|e| ProtocolError::Encode(e.to_string()))
            })
            .collect()
    }

    fn supports_polling(&self) -> bool {
        true
    }

    fn build_poll_request(&self) -> Result<WireCommand> {
        Ok(Bytes::from_static(
            br#"{"msg":{"cmd":"devStatus","data":{}}}"#,
        ))
    }

    fn parse_poll_response(&self, data: &[u8]) -> Option<Value> {
        let payload: Value = serde_json::from_slice(data).ok()?;
        extract_state(&payload)
    }

    fn capability_provider(&self) -> CapabilityProviderHandle {
        self.capabilities.clone()
    }
}

fn first_of(map: &Map<String, Value>, keys: &[&str]) -> Option<Value> {
    keys.iter().find_map(|key| map.get(*key)).cloned()
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn coerce_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn normalize_power(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|v| v != 0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "on" | "1" | "true" => Some(true),
            "off" | "0" | "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn normalize_color(value: &Value) -> Option<Value> {
    let object = value.as_object()?;
    let mut channels = Map::new();
    for channel in ["r", "g", "b", "w"] {
        if let Some(v) = object.get(channel).and_then(coerce_int) {
            channels.insert(channel.to_string(), json!(v));
        }
    }
    if channels.is_empty() {
        None
    } else {
        Some(Value::Object(channels))
    }
}

fn pop_first(merged: &mut Map<String, Value>, keys: &[&str]) -> Option<Value> {
    for key in keys {
        if let Some(value) = merged.remove(*key) {
            return Some(value);
        }
    }
    None
}

/// Flatten a devStatus response into normalised state.
///
/// Handles the `{"msg": {"data": ...}}` envelope as well as bare data,
/// merges nested `state`/`property`/`properties` blocks (objects or lists
/// of objects), coerces power and numeric fields, and preserves any
/// remaining unknown fields.
fn extract_state(payload: &Value) -> Option<Value> {
    let object = payload.as_object()?;
    let envelope = object
        .get("msg")
        .and_then(Value::as_object)
        .unwrap_or(object);
    let data_block = envelope
        .get("data")
        .and_then(Value::as_object)
        .unwrap_or(envelope);

    let mut merged: Map<String, Value> = data_block
        .iter()
        .filter(|(k, _)| !matches!(k.as_str(), "state" | "property" | "properties"))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    for key in ["state", "property", "properties"] {
        match data_block.get(key) {
            Some(Value::Object(nested)) => {
                merged.extend(nested.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            Some(Value::Array(entries)) => {
                for entry in entries {
                    if let Some(nested) = entry.as_object() {
                        merged.extend(nested.iter().map(|(k, v)| (k.clone(), v.clone())));
                    }
                }
            }
            _ => {}
        }
    }

    let mut normalized = Map::new();

    if let Some(device) = pop_first(&mut merged, &["device", "device_id", "id"]) {
        if let Some(s) = value_to_string(&device) {
            normalized.insert("device".into(), json!(s));
        }
    }
    if let Some(model) = pop_first(&mut merged, &["model", "model_number", "sku"]) {
        if let Some(s) = value_to_string(&model) {
            normalized.insert("model".into(), json!(s));
        }
    }
    if let Some(firmware) = pop_first(&mut merged, &["firmware", "fwVersion", "fw_version", "version"]) {
        if let Some(s) = value_to_string(&firmware) {
            normalized.insert("firmware".into(), json!(s));
        }
    }
    if let Some(power) = pop_first(&mut merged, &["power", "powerState", "onOff", "switch"])
        .as_ref()
        .and_then(normalize_power)
    {
        normalized.insert("power".into(), json!(power));
    }
    if let Some(brightness) = pop_first(&mut merged, &["brightness", "bright", "level"])
        .as_ref()
        .and_then(coerce_int)
    {
        normalized.insert("brightness".into(), json!(brightness));
    }
    if let Some(ct) = pop_first(
        &mut merged,
        &[
            "color_temperature",
            "colorTemp",
            "colorTem",
            "colorTempInKelvin",
            "colorTemInKelvin",
            "color_temp",
            "ct",
        ],
    )
    .as_ref()
    .and_then(coerce_int)
    {
        normalized.insert("color_temperature".into(), json!(ct));
    }
    if let Some(temperature) = pop_first(&mut merged, &["temperature", "temp", "tem"])
        .as_ref()
        .and_then(coerce_number)
    {
        normalized.insert("temperature".into(), json!(temperature));
    }
    if let Some(mode) = pop_first(&mut merged, &["mode", "workMode", "scene", "sceneId", "sceneNum"]) {
        normalized.insert("mode".into(), mode);
    }
    if let Some(effects) = pop_first(
        &mut merged,
        &["effects", "lightingEffects", "sceneMode", "scene_modes"],
    ) {
        normalized.insert("effects".into(), effects);
    }
    if let Some(color) = pop_first(&mut merged, &["color", "colors", "rgb"])
        .as_ref()
        .and_then(normalize_color)
    {
        normalized.insert("color".into(), color);
    }
    if let Some(ext @ Value::Object(_)) = pop_first(&mut merged, &["ext"]) {
        normalized.insert("ext".into(), ext);
    }

    // Keep whatever the device sent that we did not recognise
    normalized.extend(merged);

    if normalized.is_empty() {
        None
    } else {
        Some(Value::Object(normalized))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use luxbridge_core::{Color, Power};

    fn decode(commands: &[WireCommand]) -> Vec<Value> {
        commands
            .iter()
            .map(|bytes| serde_json::from_slice(bytes).unwrap())
            .collect()
    }

    #[test]
    fn test_turn_off_is_single_command() {
        let handler = GoveeHandler::new();
        let payload = DevicePayload {
            turn: Some(Power::Off),
            color: Some(Color::rgb(255, 0, 0)),
            brightness: Some(200),
            ..Default::default()
        };
        let commands = decode(&handler.wrap_command(&payload).unwrap());
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0]["msg"]["cmd"], "turn");
        assert_eq!(commands[0]["msg"]["data"]["value"], 0);
    }

    #[test]
    fn test_turn_on_with_color_and_brightness_orders_batch() {
        let handler = GoveeHandler::new();
        let payload = DevicePayload {
            turn: Some(Power::On),
            color: Some(Color::rgb(100, 150, 200)),
            brightness: Some(128),
            ..Default::default()
        };
        let commands = decode(&handler.wrap_command(&payload).unwrap());
        assert_eq!(commands.len(), 3);
        assert_eq!(commands[0]["msg"]["cmd"], "turn");
        assert_eq!(commands[0]["msg"]["data"]["value"], 1);
        assert_eq!(commands[1]["msg"]["cmd"], "colorwc");
        assert_eq!(
            commands[1]["msg"]["data"]["color"],
            json!({"r": 100, "g": 150, "b": 200})
        );
        assert_eq!(commands[2]["msg"]["cmd"], "brightness");
        assert_eq!(commands[2]["msg"]["data"]["value"], 128);
    }

    #[test]
    fn test_color_only() {
        let handler = GoveeHandler::new();
        let payload = DevicePayload {
            color: Some(Color::rgb(154, 0, 0)),
            ..Default::default()
        };
        let commands = decode(&handler.wrap_command(&payload).unwrap());
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0]["msg"]["cmd"], "colorwc");
    }

    #[test]
    fn test_brightness_only() {
        let handler = GoveeHandler::new();
        let payload = DevicePayload {
            brightness: Some(42),
            ..Default::default()
        };
        let commands = decode(&handler.wrap_command(&payload).unwrap());
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0]["msg"]["cmd"], "brightness");
        assert_eq!(commands[0]["msg"]["data"]["value"], 42);
    }

    #[test]
    fn test_color_and_brightness_without_turn() {
        let handler = GoveeHandler::new();
        let payload = DevicePayload {
            color: Some(Color::rgb(1, 2, 3)),
            brightness: Some(50),
            ..Default::default()
        };
        let commands = decode(&handler.wrap_command(&payload).unwrap());
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0]["msg"]["cmd"], "colorwc");
        assert_eq!(commands[1]["msg"]["cmd"], "brightness");
    }

    #[test]
    fn test_kelvin_rides_in_colorwc() {
        let handler = GoveeHandler::new();
        let payload = DevicePayload {
            color_temp: Some(4500),
            ..Default::default()
        };
        let commands = decode(&handler.wrap_command(&payload).unwrap());
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0]["msg"]["cmd"], "colorwc");
        assert_eq!(commands[0]["msg"]["data"]["colorTemInKelvin"], 4500);
    }

    #[test]
    fn test_poll_response_flattening() {
        let handler = GoveeHandler::new();
        let response = json!({
            "msg": {
                "cmd": "devStatus",
                "data": {
                    "device": "AA:BB",
                    "state": {"onOff": 1, "brightness": "77"},
                    "properties": [{"colorTemInKelvin": 3500}],
                    "color": {"r": "10", "g": 20, "b": 30},
                    "custom": "kept"
                }
            }
        });
        let state = handler
            .parse_poll_response(response.to_string().as_bytes())
            .unwrap();
        assert_eq!(state["device"], "AA:BB");
        assert_eq!(state["power"], true);
        assert_eq!(state["brightness"], 77);
        assert_eq!(state["color_temperature"], 3500);
        assert_eq!(state["color"], json!({"r": 10, "g": 20, "b": 30}));
        assert_eq!(state["custom"], "kept");
    }

    #[test]
    fn test_poll_response_rejects_garbage() {
        let handler = GoveeHandler::new();
        assert!(handler.parse_poll_response(b"not json").is_none());
        assert!(handler.parse_poll_response(b"[1,2,3]").is_none());
    }

    #[test]
    fn test_scan_response_with_envelope() {
        let response = json!({
            "msg": {
                "cmd": "scan",
                "data": {
                    "device": "12:34:56",
                    "ip": "192.168.1.40",
                    "sku": "H6159",
                    "colorTempRange": [2000, 9000]
                }
            }
        });
        let result =
            GoveeHandler::parse_scan_response(response.to_string().as_bytes(), "10.0.0.9").unwrap();
        assert_eq!(result.id, "12:34:56");
        assert_eq!(result.ip, "192.168.1.40");
        assert_eq!(result.model_number.as_deref(), Some("H6159"));
        assert_eq!(result.protocol, "govee");
        assert_eq!(
            result.capabilities.unwrap()["colorTempRange"],
            json!([2000, 9000])
        );
    }

    #[test]
    fn test_scan_response_bare_data_uses_fallback_ip() {
        let response = json!({"data": {"id": "dev-1"}});
        let result =
            GoveeHandler::parse_scan_response(response.to_string().as_bytes(), "10.0.0.9").unwrap();
        assert_eq!(result.ip, "10.0.0.9");
    }

    #[test]
    fn test_scan_response_without_device_id_is_rejected() {
        let response = json!({"msg": {"cmd": "scan", "data": {"ip": "1.2.3.4"}}});
        assert!(
            GoveeHandler::parse_scan_response(response.to_string().as_bytes(), "10.0.0.9").is_none()
        );
    }
}
