#![allow(dead_code)]

use image::{ImageBuffer, Rgba, RgbaImage};
use std::io::Cursor;

pub type Color = [u8; 3];

/// Encode an RGBA buffer as PNG bytes
pub fn png_bytes(img: &RgbaImage) -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    img.write_to(&mut buffer, image::ImageFormat::Png).unwrap();
    buffer.into_inner()
}

/// Decode encoded image bytes back into an RGBA buffer
pub fn decode(bytes: &[u8]) -> RgbaImage {
    image::load_from_memory(bytes).unwrap().to_rgba8()
}

/// Build an opaque image from a per-pixel color function
pub fn image_from_fn(
    width: u32,
    height: u32,
    mut color_at: impl FnMut(u32, u32) -> Color,
) -> RgbaImage {
    ImageBuffer::from_fn(width, height, |x, y| {
        let [r, g, b] = color_at(x, y);
        Rgba([r, g, b, 255])
    })
}

/// Blend a foreground color over a background at the given alpha, the same
/// gamma-naive way the tool does it
pub fn blend(fg: Color, bg: Color, alpha: f32) -> Color {
    let channel = |f: u8, b: u8| {
        ((f as f32 / 255.0 * alpha + b as f32 / 255.0 * (1.0 - alpha)) * 255.0).round() as u8
    };
    [
        channel(fg[0], bg[0]),
        channel(fg[1], bg[1]),
        channel(fg[2], bg[2]),
    ]
}

/// Overlay an image with an alpha channel onto a solid background color
pub fn overlay_on_background(foreground: &RgbaImage, background_color: Color) -> RgbaImage {
    let (width, height) = foreground.dimensions();
    let mut result = ImageBuffer::new(width, height);

    for (x, y, result_pixel) in result.enumerate_pixels_mut() {
        let fg = foreground.get_pixel(x, y);
        let alpha = fg[3] as f32 / 255.0;
        *result_pixel = Rgba([
            (fg[0] as f32 * alpha + background_color[0] as f32 * (1.0 - alpha)).round() as u8,
            (fg[1] as f32 * alpha + background_color[1] as f32 * (1.0 - alpha)).round() as u8,
            (fg[2] as f32 * alpha + background_color[2] as f32 * (1.0 - alpha)).round() as u8,
            255,
        ]);
    }

    result
}

/// Assert that every channel of every pixel in `actual` is within `tolerance`
/// of `expected`
pub fn assert_images_close(expected: &RgbaImage, actual: &RgbaImage, tolerance: i32) {
    assert_eq!(expected.dimensions(), actual.dimensions());
    for (x, y, expected_pixel) in expected.enumerate_pixels() {
        let actual_pixel = actual.get_pixel(x, y);
        for c in 0..3 {
            let diff = (expected_pixel[c] as i32 - actual_pixel[c] as i32).abs();
            assert!(
                diff <= tolerance,
                "pixel ({x}, {y}) channel {c}: expected {}, got {} (tolerance {tolerance})",
                expected_pixel[c],
                actual_pixel[c]
            );
        }
    }
}
