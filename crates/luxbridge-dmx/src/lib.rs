//! DMX ingress and mapping for luxbridge
//!
//! Two listeners (ArtNet, sACN/E1.31) normalise wire packets into
//! [`luxbridge_core::DmxFrame`]s, the [`PriorityMerger`] selects one
//! winning source per universe, and the [`MappingEngine`] expands the
//! winner's channels into device payloads with gamma/dimmer shaping,
//! change detection, and trailing debounce.

pub mod artnet;
pub mod engine;
pub mod error;
pub mod merger;
pub mod sacn;

pub use artnet::{parse_artnet_packet, ArtDmxPacket, ArtnetService, ARTNET_PORT};
pub use engine::{CompiledMapping, MappingEngine};
pub use error::{DmxError, Result};
pub use merger::{PriorityMerger, SOURCE_TIMEOUT};
pub use sacn::{multicast_address, parse_sacn_packet, SacnPacket, SacnService, SACN_PORT};
