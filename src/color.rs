use crate::error::{Error, Result};
use image::Rgba;

/// Multiplier to expand hex color shorthand (e.g., F -> FF)
const HEX_SHORTHAND_MULTIPLIER: u8 = 17;

/// RGB color represented as [R, G, B] with values 0-255
pub type Color = [u8; 3];

/// Normalized RGB color with values 0.0-1.0
pub type NormalizedColor = [f32; 3];

/// A foreground color specification - either known or unknown
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForegroundColorSpec {
    /// A known color specified by the user
    Known(Color),
    /// An unknown color to be deduced by the algorithm
    Unknown,
}

/// Parse a hex color string into RGB
/// Supports: "#ff0000", "ff0000", "#f00", "f00" (case-insensitive)
pub fn parse_hex_color(hex: &str) -> Result<Color> {
    let digits = hex.strip_prefix('#').unwrap_or(hex);

    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::InvalidColor(format!(
            "'{hex}' contains non-hexadecimal characters"
        )));
    }

    let component = |range: std::ops::Range<usize>| {
        u8::from_str_radix(&digits[range], 16)
            .map_err(|_| Error::InvalidColor(format!("'{hex}' is not a valid hex color")))
    };

    match digits.len() {
        3 => {
            // Expand shorthand: "f00" -> "ff0000"
            let r = component(0..1)?;
            let g = component(1..2)?;
            let b = component(2..3)?;
            Ok([
                r * HEX_SHORTHAND_MULTIPLIER,
                g * HEX_SHORTHAND_MULTIPLIER,
                b * HEX_SHORTHAND_MULTIPLIER,
            ])
        }
        6 => Ok([component(0..2)?, component(2..4)?, component(4..6)?]),
        _ => Err(Error::InvalidColor(format!(
            "'{hex}' must have 3 or 6 hex digits (got {})",
            digits.len()
        ))),
    }
}

/// Parse a foreground color specification
/// Can be either a hex color or "auto" for unknown
pub fn parse_foreground_spec(spec: &str) -> Result<ForegroundColorSpec> {
    if spec == "auto" {
        Ok(ForegroundColorSpec::Unknown)
    } else {
        parse_hex_color(spec).map(ForegroundColorSpec::Known)
    }
}

/// Format an RGB color as a lowercase "#rrggbb" hex string
pub fn color_to_hex(color: Color) -> String {
    format!("#{:02x}{:02x}{:02x}", color[0], color[1], color[2])
}

/// Convert a Color to NormalizedColor
pub fn normalize_color(color: Color) -> NormalizedColor {
    [
        color[0] as f32 / 255.0,
        color[1] as f32 / 255.0,
        color[2] as f32 / 255.0,
    ]
}

/// Convert a NormalizedColor back to Color
pub fn denormalize_color(color: NormalizedColor) -> Color {
    [
        (color[0] * 255.0).round().clamp(0.0, 255.0) as u8,
        (color[1] * 255.0).round().clamp(0.0, 255.0) as u8,
        (color[2] * 255.0).round().clamp(0.0, 255.0) as u8,
    ]
}

/// Composite a straight-alpha RGBA pixel over an opaque background color.
///
/// Formula per channel: result = alpha * fg + (1 - alpha) * bg, rounded to the
/// nearest 8-bit value. Fully opaque pixels pass through untouched, so the
/// identity `composite([r, g, b, 255], bg) == [r, g, b]` holds for any bg.
pub fn composite_pixel_over_background(pixel: &Rgba<u8>, background: Color) -> Color {
    if pixel[3] == 255 {
        return [pixel[0], pixel[1], pixel[2]];
    }

    let alpha = pixel[3] as f32 / 255.0;
    let bg = normalize_color(background);
    let fg = normalize_color([pixel[0], pixel[1], pixel[2]]);

    denormalize_color([
        fg[0] * alpha + bg[0] * (1.0 - alpha),
        fg[1] * alpha + bg[1] * (1.0 - alpha),
        fg[2] * alpha + bg[2] * (1.0 - alpha),
    ])
}
