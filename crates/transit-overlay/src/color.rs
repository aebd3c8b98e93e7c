//! Display colors for routes, vehicles and lights.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// An sRGB color with components in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color {
    pub const WHITE: Color = Color::rgb(1.0, 1.0, 1.0);
    pub const BLACK: Color = Color::rgb(0.0, 0.0, 0.0);
    /// Fallback vehicle paint when neither the record nor its route names one.
    pub const DEFAULT_VEHICLE: Color = Color::rgb(0.93, 0.36, 0.13);

    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    /// Parse `#rrggbb` or `rrggbb`.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let digits = hex.trim().trim_start_matches('#');
        if digits.len() != 6 || !digits.is_ascii() {
            return None;
        }
        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&digits[range], 16)
                .ok()
                .map(|v| f32::from(v) / 255.0)
        };
        Some(Self::rgb(channel(0..2)?, channel(2..4)?, channel(4..6)?))
    }

    /// Blend toward white by `amount` (0 = unchanged, 1 = white).
    #[must_use]
    pub fn lighten(self, amount: f32) -> Self {
        self.mix(Color::WHITE, amount)
    }

    #[must_use]
    pub fn mix(self, other: Color, t: f32) -> Self {
        let t = t.clamp(0.0, 1.0);
        Self::rgb(
            self.r + (other.r - self.r) * t,
            self.g + (other.g - self.g) * t,
            self.b + (other.b - self.b) * t,
        )
    }

    #[must_use]
    pub fn to_array(self) -> [f32; 3] {
        [self.r, self.g, self.b]
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::DEFAULT_VEHICLE
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let to_byte = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
        write!(
            f,
            "#{:02x}{:02x}{:02x}",
            to_byte(self.r),
            to_byte(self.g),
            to_byte(self.b)
        )
    }
}

impl FromStr for Color {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s).ok_or_else(|| Error::InvalidConfig {
            field: "color",
            detail: format!("expected #rrggbb, got '{s}'"),
        })
    }
}

impl TryFrom<String> for Color {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_hex() {
        let c = Color::from_hex("#ff8000").unwrap();
        assert!((c.r - 1.0).abs() < 1e-6);
        assert!((c.g - 128.0 / 255.0).abs() < 1e-6);
        assert!(c.b.abs() < 1e-6);

        // Leading hash is optional.
        assert_eq!(Color::from_hex("ff8000"), Some(c));
    }

    #[test]
    fn test_from_hex_rejects_garbage() {
        assert!(Color::from_hex("#ff80").is_none());
        assert!(Color::from_hex("#gg0000").is_none());
        assert!(Color::from_hex("").is_none());
    }

    #[test]
    fn test_display_matches_input() {
        let c: Color = "#1e90ff".parse().unwrap();
        assert_eq!(c.to_string(), "#1e90ff");
    }

    #[test]
    fn test_lighten() {
        let c = Color::rgb(0.5, 0.5, 0.5);
        assert!((c.lighten(1.0).r - 1.0).abs() < 1e-6);
        assert!((c.lighten(0.0).r - 0.5).abs() < 1e-6);
    }
}
