// src/color.rs

//! Defines the `Color` value type shared by every layer, frame and sink.
//!
//! Colors are plain 24-bit RGB with no alpha channel. Transparency is not a
//! color: layers track it separately (see `crate::composite`), so every one of
//! the 2^24 values stays available to clients.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 24-bit RGB color, compared by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color::new(0, 0, 0);
    pub const WHITE: Color = Color::new(255, 255, 255);
    pub const RED: Color = Color::new(255, 0, 0);
    pub const GREEN: Color = Color::new(0, 255, 0);
    pub const BLUE: Color = Color::new(0, 0, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Color { r, g, b }
    }

    /// Builds a color from the first three bytes of an RGB triplet.
    ///
    /// Returns `None` if fewer than three bytes are available.
    pub fn from_rgb_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [r, g, b, ..] => Some(Color::new(*r, *g, *b)),
            _ => None,
        }
    }

    pub fn is_black(&self) -> bool {
        *self == Color::BLACK
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_rgb_bytes_reads_the_first_triplet() {
        assert_eq!(
            Color::from_rgb_bytes(&[1, 2, 3, 4]),
            Some(Color::new(1, 2, 3))
        );
        assert_eq!(Color::from_rgb_bytes(&[1, 2]), None);
    }

    #[test]
    fn display_formats_as_hex() {
        assert_eq!(Color::new(255, 0, 16).to_string(), "#ff0010");
    }

    #[test]
    fn default_is_black() {
        assert!(Color::default().is_black());
    }
}
