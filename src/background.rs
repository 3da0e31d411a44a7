use crate::color::Color;
use crate::error::{Error, Result};
use image::{DynamicImage, Rgba, RgbaImage};
use std::cmp::Reverse;
use std::collections::HashMap;

/// Detect the background color by sampling the image borders
///
/// Samples every pixel on the four borders (top row, bottom row, left and
/// right columns) and returns the most frequent exact RGB triple. Ties are
/// broken by the first occurrence in scan order (top to bottom, left to right
/// within a row), so detection is deterministic.
///
/// # Errors
/// Returns `EmptyImage` if the image has a zero width or height.
pub fn detect_background_color(img: &DynamicImage) -> Result<Color> {
    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();

    if width == 0 || height == 0 {
        return Err(Error::EmptyImage);
    }

    // (count, first scan-order index) per exact RGB triple
    let mut color_counts: HashMap<Color, (u32, usize)> = HashMap::new();
    let mut order = 0usize;
    let mut sample = |rgba: &RgbaImage, x: u32, y: u32| {
        let color = border_sample_color(rgba.get_pixel(x, y));
        let entry = color_counts.entry(color).or_insert((0, order));
        entry.0 += 1;
        order += 1;
    };

    for y in 0..height {
        if y == 0 || y + 1 == height {
            for x in 0..width {
                sample(&rgba, x, y);
            }
        } else {
            sample(&rgba, 0, y);
            if width > 1 {
                sample(&rgba, width - 1, y);
            }
        }
    }

    color_counts
        .into_iter()
        .max_by_key(|&(_, (count, first))| (count, Reverse(first)))
        .map(|(color, _)| color)
        .ok_or(Error::EmptyImage)
}

/// Effective color of a border sample. Translucent pixels are composited over
/// black so partially transparent borders still vote consistently.
fn border_sample_color(pixel: &Rgba<u8>) -> Color {
    if pixel[3] == 255 {
        return [pixel[0], pixel[1], pixel[2]];
    }
    let alpha = pixel[3] as f32 / 255.0;
    [
        (pixel[0] as f32 * alpha).round() as u8,
        (pixel[1] as f32 * alpha).round() as u8,
        (pixel[2] as f32 * alpha).round() as u8,
    ]
}
