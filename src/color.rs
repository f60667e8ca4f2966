use std::fmt;
use std::str::FromStr;

use palette::{FromColor, Hsv, Srgb};
use serde::Deserialize;

use crate::error::Error;

/// Colour of a single LED.
///
/// `brightness` is the fourth channel: APA102 style strips take it as their
/// per-pixel current setting, everything else multiplies it into the RGB values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub struct LedColor {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub brightness: u8,
}

impl LedColor {
    pub const OFF: LedColor = LedColor::rgb(0, 0, 0);

    pub const fn rgb(red: u8, green: u8, blue: u8) -> LedColor {
        LedColor {
            red,
            green,
            blue,
            brightness: u8::MAX,
        }
    }

    pub const fn with_brightness(self, brightness: u8) -> LedColor {
        LedColor { brightness, ..self }
    }

    /// Takes the RGB channels of `other` and keeps our own brightness.
    pub const fn with_rgb_of(self, other: LedColor) -> LedColor {
        LedColor {
            red: other.red,
            green: other.green,
            blue: other.blue,
            brightness: self.brightness,
        }
    }

    /// Builds a colour from hue in degrees plus saturation and value in 0..=1.
    /// Hue wraps around at 360°, saturation and value are clamped.
    pub fn from_hue(hue: f32, saturation: f32, value: f32) -> LedColor {
        let hsv: Hsv = Hsv::new(
            hue.rem_euclid(360.0),
            saturation.clamp(0.0, 1.0),
            value.clamp(0.0, 1.0),
        );
        let rgb: Srgb = Srgb::from_color(hsv);
        let rgb: Srgb<u8> = rgb.into_format();
        LedColor::rgb(rgb.red, rgb.green, rgb.blue)
    }

    /// Maps 0.0..=1.0 to the full channel range, clamping anything outside.
    pub fn unit_to_channel(value: f32) -> u8 {
        if value.is_nan() {
            return 0;
        }
        (value.clamp(0.0, 1.0) * 255.0).round() as u8
    }

    /// Linear interpolation of the RGB channels, `t` is clamped to 0..=1.
    /// Brightness is taken from `self`.
    pub fn mix(self, other: LedColor, t: f32) -> LedColor {
        let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
        let channel = |a: u8, b: u8| (a as f32 + (b as f32 - a as f32) * t).round() as u8;
        LedColor {
            red: channel(self.red, other.red),
            green: channel(self.green, other.green),
            blue: channel(self.blue, other.blue),
            brightness: self.brightness,
        }
    }

    /// RGB with brightness (and an additional master factor) multiplied in.
    pub fn premultiplied(&self, master: f32) -> [u8; 3] {
        let factor = self.brightness as f32 / 255.0 * master.clamp(0.0, 1.0);
        let scale = |c: u8| (c as f32 * factor).round() as u8;
        [scale(self.red), scale(self.green), scale(self.blue)]
    }
}

impl Default for LedColor {
    fn default() -> Self {
        LedColor::OFF
    }
}

impl fmt::Display for LedColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{:02x}{:02x}{:02x}@{}",
            self.red, self.green, self.blue, self.brightness
        )
    }
}

/// Accepts `#rrggbb` or a CSS colour name such as `gold` or `midnightblue`.
impl FromStr for LedColor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let rgb: Srgb<u8> = if s.starts_with('#') {
            s.parse::<Srgb<u8>>()
                .map_err(|err| Error::Config(format!("bad hex colour '{s}': {err}")))?
        } else {
            palette::named::from_str(&s.to_lowercase())
                .ok_or_else(|| Error::Config(format!("unknown colour name '{s}'")))?
        };

        Ok(LedColor::rgb(rgb.red, rgb.green, rgb.blue))
    }
}

impl TryFrom<String> for LedColor {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Order in which a strip expects the three colour bytes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorOrder {
    Rgb,
    Rbg,
    Grb,
    Gbr,
    Brg,
    Bgr,
}

impl ColorOrder {
    pub fn arrange(&self, [r, g, b]: [u8; 3]) -> [u8; 3] {
        match self {
            ColorOrder::Rgb => [r, g, b],
            ColorOrder::Rbg => [r, b, g],
            ColorOrder::Grb => [g, r, b],
            ColorOrder::Gbr => [g, b, r],
            ColorOrder::Brg => [b, r, g],
            ColorOrder::Bgr => [b, g, r],
        }
    }
}

impl Default for ColorOrder {
    fn default() -> Self {
        ColorOrder::Bgr
    }
}
