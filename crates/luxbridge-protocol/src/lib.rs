//! Device protocol handlers for luxbridge
//!
//! A [`ProtocolHandler`] turns abstract device payloads into wire bytes
//! and parses poll/discovery responses back into normalised state.
//! Implemented protocols:
//! - Govee: JSON over UDP (control 4003, discovery 4001/4002)
//! - LIFX: binary LAN protocol over UDP 56700 with HSBK colour

pub mod capabilities;
pub mod error;
pub mod govee;
pub mod lifx;
pub mod traits;

pub use capabilities::{
    CapabilityProvider, CapabilityProviderHandle, CatalogCapabilityProvider,
    DeviceReportedCapabilityProvider,
};
pub use error::{ProtocolError, Result};
pub use govee::{
    GoveeHandler, GOVEE_CONTROL_PORT, GOVEE_DISCOVERY_GROUP, GOVEE_DISCOVERY_PORT,
    GOVEE_RESPONSE_PORT,
};
pub use lifx::{Header as LifxHeader, LifxHandler, LIFX_PORT};
pub use traits::{HandlerHandle, HandlerRegistry, ProtocolHandler, Transport, WireCommand};
