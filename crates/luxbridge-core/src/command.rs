//! Abstract device state and command decomposition
//!
//! The mapping engine emits [`DevicePayload`] values; protocol handlers
//! never see DMX. A payload decomposes into an ordered list of
//! [`DeviceCommand`] variants, and all wire-specific encoding happens
//! inside the handler that pattern-matches on them. The ordering contract
//! (power before colour before brightness, power-off exclusive) lives
//! here so every protocol honours it the same way.

use serde::{Deserialize, Serialize};

/// RGB colour with optional white channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub w: Option<u8>,
}

impl Color {
    pub fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, w: None }
    }
}

/// Power state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Power {
    On,
    Off,
}

/// Abstract device state update payload.
///
/// Deep equality on this type is the change-detection boundary: two equal
/// payloads never produce two sends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevicePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<Color>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brightness: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_temp: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn: Option<Power>,
}

impl DevicePayload {
    pub fn is_empty(&self) -> bool {
        self.color.is_none()
            && self.brightness.is_none()
            && self.color_temp.is_none()
            && self.turn.is_none()
    }

    /// Decompose into the ordered command sequence.
    ///
    /// Rules:
    /// - `turn: off` is exclusive: colour and brightness are dropped.
    /// - `turn: on` always comes first so devices do not clamp the
    ///   colour/brightness that follows.
    /// - colour (with any kelvin riding along) precedes brightness.
    /// - a kelvin-only payload becomes [`DeviceCommand::SetKelvin`].
    pub fn commands(&self) -> Vec<DeviceCommand> {
        if self.turn == Some(Power::Off) {
            return vec![DeviceCommand::PowerOff];
        }

        let mut commands = Vec::with_capacity(3);
        if self.turn == Some(Power::On) {
            commands.push(DeviceCommand::PowerOn);
        }
        if let Some(color) = self.color {
            commands.push(DeviceCommand::SetColor {
                r: color.r,
                g: color.g,
                b: color.b,
                w: color.w,
                kelvin: self.color_temp,
            });
        } else if let Some(kelvin) = self.color_temp {
            commands.push(DeviceCommand::SetKelvin(kelvin));
        }
        if let Some(brightness) = self.brightness {
            commands.push(DeviceCommand::SetBrightness(brightness));
        }
        commands
    }
}

/// A single abstract device operation.
///
/// Protocol handlers match on these; nothing wire-specific leaks out of
/// the handler that consumes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    PowerOn,
    PowerOff,
    SetColor {
        r: u8,
        g: u8,
        b: u8,
        w: Option<u8>,
        kelvin: Option<u16>,
    },
    SetBrightness(u8),
    SetKelvin(u16),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_off_is_exclusive() {
        let payload = DevicePayload {
            color: Some(Color::rgb(255, 0, 0)),
            brightness: Some(128),
            turn: Some(Power::Off),
            ..Default::default()
        };
        assert_eq!(payload.commands(), vec![DeviceCommand::PowerOff]);
    }

    #[test]
    fn test_turn_on_ordering() {
        let payload = DevicePayload {
            color: Some(Color::rgb(100, 150, 200)),
            brightness: Some(128),
            turn: Some(Power::On),
            ..Default::default()
        };
        let commands = payload.commands();
        assert_eq!(commands.len(), 3);
        assert_eq!(commands[0], DeviceCommand::PowerOn);
        assert!(matches!(commands[1], DeviceCommand::SetColor { .. }));
        assert_eq!(commands[2], DeviceCommand::SetBrightness(128));
    }

    #[test]
    fn test_kelvin_rides_with_color() {
        let payload = DevicePayload {
            color: Some(Color::rgb(1, 2, 3)),
            color_temp: Some(4000),
            ..Default::default()
        };
        assert_eq!(
            payload.commands(),
            vec![DeviceCommand::SetColor {
                r: 1,
                g: 2,
                b: 3,
                w: None,
                kelvin: Some(4000)
            }]
        );
    }

    #[test]
    fn test_kelvin_only() {
        let payload = DevicePayload {
            color_temp: Some(2700),
            ..Default::default()
        };
        assert_eq!(payload.commands(), vec![DeviceCommand::SetKelvin(2700)]);
    }

    #[test]
    fn test_payload_equality_is_deep() {
        let a = DevicePayload {
            color: Some(Color::rgb(10, 20, 30)),
            ..Default::default()
        };
        let b = DevicePayload {
            color: Some(Color::rgb(10, 20, 30)),
            ..Default::default()
        };
        assert_eq!(a, b);
    }
}
