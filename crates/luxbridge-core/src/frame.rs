//! Protocol-agnostic DMX frame
//!
//! Every ingress protocol (ArtNet, sACN, future inputs) normalises its
//! packets into a [`DmxFrame`] so the merger and mapping engine never see
//! protocol-specific structure.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Channels per DMX universe
pub const DMX_CHANNELS: usize = 512;

/// Highest valid E1.31 universe number
pub const MAX_UNIVERSE: u16 = 63999;

/// Highest valid sACN priority
pub const MAX_PRIORITY: u8 = 200;

/// sACN priority used when a packet carries none (or an invalid one)
pub const SACN_DEFAULT_PRIORITY: u8 = 100;

/// Fixed priority assigned to ArtNet sources, below the sACN default so
/// sACN wins whenever both are present with defaults.
pub const ARTNET_FIXED_PRIORITY: u8 = 50;

/// Ingress protocol that produced a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceProtocol {
    Artnet,
    Sacn,
}

impl fmt::Display for SourceProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceProtocol::Artnet => write!(f, "artnet"),
            SourceProtocol::Sacn => write!(f, "sacn"),
        }
    }
}

/// One universe worth of DMX data from a single source
#[derive(Debug, Clone)]
pub struct DmxFrame {
    /// DMX universe number (0..=63999)
    pub universe: u16,
    /// Exactly 512 channel values
    pub data: [u8; DMX_CHANNELS],
    /// Wire sequence number (wraps at 255)
    pub sequence: u8,
    /// Which ingress produced this frame
    pub source_protocol: SourceProtocol,
    /// Merge priority (0..=200, higher wins)
    pub priority: u8,
    /// Monotonic receive time, used for source aging
    pub timestamp: Instant,
    /// Unique identity of the sending source
    pub source_id: String,
}

impl DmxFrame {
    /// Build a frame, rejecting out-of-range universe or priority.
    ///
    /// The 512-byte data invariant is structural: callers must pad or
    /// truncate before constructing the array.
    pub fn new(
        universe: u16,
        data: [u8; DMX_CHANNELS],
        sequence: u8,
        source_protocol: SourceProtocol,
        priority: u8,
        source_id: impl Into<String>,
    ) -> Result<Self> {
        if universe > MAX_UNIVERSE {
            return Err(Error::UniverseOutOfRange(universe));
        }
        if priority > MAX_PRIORITY {
            return Err(Error::PriorityOutOfRange(priority));
        }

        Ok(Self {
            universe,
            data,
            sequence,
            source_protocol,
            priority,
            timestamp: Instant::now(),
            source_id: source_id.into(),
        })
    }

    /// Age of this frame relative to `now`
    pub fn age(&self, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(self.timestamp)
    }
}
