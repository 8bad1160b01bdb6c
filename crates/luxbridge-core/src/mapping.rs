//! Persisted DMX-to-device mapping records
//!
//! Records are created by the management layer and consumed by the
//! mapping engine, which compiles them into an immutable snapshot.
//! Validation that protects other records (overlap checking) lives here;
//! per-record compilation checks live with the engine so a bad record is
//! skipped with a warning instead of poisoning the set.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How a record consumes channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingKind {
    /// A contiguous run of channels interpreted through a template/mode
    Range,
    /// A single channel bound to one named field
    Discrete,
}

/// A channel's meaning within a mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingField {
    R,
    G,
    B,
    W,
    /// Amber channel used by rgbwa/rgbaw fixtures; consumed but not
    /// routable through the abstract payload
    A,
    Dimmer,
    Brightness,
    Kelvin,
}

/// Built-in channel layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Template {
    Rgb,
    Rgbw,
    Rgbwa,
    Rgbaw,
    BrightnessRgb,
    MasterOnly,
    Brightness,
    Temperature,
}

impl Template {
    /// Ordered field list this template expands to
    pub fn fields(&self) -> &'static [MappingField] {
        use MappingField::*;
        match self {
            Template::Rgb => &[R, G, B],
            Template::Rgbw => &[R, G, B, W],
            Template::Rgbwa => &[R, G, B, W, A],
            Template::Rgbaw => &[R, G, B, A, W],
            Template::BrightnessRgb => &[Dimmer, R, G, B],
            Template::MasterOnly => &[Dimmer],
            Template::Brightness => &[Brightness],
            Template::Temperature => &[Kelvin],
        }
    }

    pub fn required_channels(&self) -> u16 {
        self.fields().len() as u16
    }
}

/// White channel shaping policy (see mapping capabilities)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WhitePolicy {
    /// Gamma/dimmer applied to white like any colour channel
    #[default]
    PerChannel,
    /// White forwarded untouched
    PassThrough,
}

/// Per-mapping overrides carried in the record's capability blob
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MappingCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<Template>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<Vec<MappingField>>,
    /// Gamma exponent, clamped into [0.1, 5.0] at compile time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gamma: Option<f64>,
    /// Master dimmer scale, clamped into [0.0, 1.0] at compile time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimmer: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub white_policy: Option<WhitePolicy>,
}

/// A persisted mapping row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingRecord {
    #[serde(default)]
    pub id: i64,
    pub device_id: String,
    pub universe: u16,
    /// 1-based DMX start channel
    pub channel: u16,
    pub length: u16,
    #[serde(default = "default_kind")]
    pub kind: MappingKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<MappingField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<Template>,
    #[serde(default)]
    pub allow_overlap: bool,
    #[serde(default)]
    pub capabilities: MappingCapabilities,
}

fn default_kind() -> MappingKind {
    MappingKind::Range
}

impl MappingRecord {
    /// Half-open channel range `[channel, channel + length)`
    pub fn channel_range(&self) -> (u16, u16) {
        (self.channel, self.channel.saturating_add(self.length))
    }

    fn intersects(&self, other: &MappingRecord) -> bool {
        let (a0, a1) = self.channel_range();
        let (b0, b1) = other.channel_range();
        a0 < b1 && b0 < a1
    }
}

/// Reject intersecting mappings within a universe unless every
/// participant opted into overlap.
pub fn validate_overlaps(records: &[MappingRecord]) -> Result<()> {
    for (i, a) in records.iter().enumerate() {
        for b in records.iter().skip(i + 1) {
            if a.universe != b.universe || !a.intersects(b) {
                continue;
            }
            if a.allow_overlap && b.allow_overlap {
                continue;
            }
            let (first, first_end) = a.channel_range();
            let (second, second_end) = b.channel_range();
            return Err(Error::MappingOverlap {
                universe: a.universe,
                first,
                first_end,
                second,
                second_end,
            });
        }
    }
    Ok(())
}
