//! Protocol handler trait and registry

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use luxbridge_core::{Device, DevicePayload};

use crate::capabilities::CapabilityProviderHandle;
use crate::error::{ProtocolError, Result};

/// Transport a protocol speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Udp,
    Tcp,
}

/// One wire-ready command. Multi-command payloads produce an ordered
/// batch; the sender preserves the order and spaces the sends.
pub type WireCommand = Bytes;

pub trait ProtocolHandler: Send + Sync {
    fn protocol_name(&self) -> &'static str;

    /// Default control port for devices of this protocol
    fn default_port(&self) -> u16;

    fn default_transport(&self) -> Transport {
        Transport::Udp
    }

    /// Project an abstract payload into ordered wire commands.
    ///
    /// Encoding is entirely protocol-private; callers treat the result
    /// as opaque bytes.
    fn wrap_command(&self, payload: &DevicePayload) -> Result<Vec<WireCommand>>;

    /// Rewrite a wire command for a specific device (e.g. patch a target
    /// MAC into a binary header). Default: commands are device-agnostic.
    fn address_command(&self, command: WireCommand, _device: &Device) -> Result<WireCommand> {
        Ok(command)
    }

    fn supports_polling(&self) -> bool {
        false
    }

    /// Build a liveness poll request. Callers run it through
    /// [`ProtocolHandler::address_command`] before sending.
    fn build_poll_request(&self) -> Result<WireCommand> {
        Err(ProtocolError::PollingUnsupported(self.protocol_name()))
    }

    /// Parse a poll response into normalised state, or `None` when the
    /// bytes are not a recognisable response.
    fn parse_poll_response(&self, _data: &[u8]) -> Option<serde_json::Value> {
        None
    }

    fn capability_provider(&self) -> CapabilityProviderHandle;
}

pub type HandlerHandle = Arc<dyn ProtocolHandler>;

/// Per-instance handler registry; no process-wide singletons.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, HandlerHandle>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in handlers
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(crate::govee::GoveeHandler::new()));
        registry.register(Arc::new(crate::lifx::LifxHandler::new()));
        registry
    }

    pub fn register(&mut self, handler: HandlerHandle) {
        self.handlers.insert(handler.protocol_name(), handler);
    }

    pub fn get(&self, protocol: &str) -> Option<HandlerHandle> {
        self.handlers.get(protocol).cloned()
    }

    pub fn protocols(&self) -> Vec<&'static str> {
        self.handlers.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry() {
        let registry = HandlerRegistry::builtin();
        assert!(registry.get("govee").is_some());
        assert!(registry.get("lifx").is_some());
        assert!(registry.get("wiz").is_none());
        assert_eq!(registry.get("govee").unwrap().default_port(), 4003);
        assert_eq!(registry.get("lifx").unwrap().default_port(), 56700);
    }
}
