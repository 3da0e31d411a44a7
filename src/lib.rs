//! Remove a solid background color from an image by reconstructing a
//! transparent foreground.
//!
//! For every pixel the library recovers an alpha value and a foreground color
//! whose alpha-composite over the declared background reproduces the original
//! pixel, preserving anti-aliased edges and translucency. The background can
//! be declared or auto-detected from the image borders, and unknown
//! foreground colors can be deduced from image statistics.

pub mod background;
pub mod color;
pub mod deduce;
mod error;
mod process;
pub mod unmix;

use std::io::Cursor;

use image::{ImageBuffer, ImageFormat, Rgba};

use crate::background::detect_background_color;
use crate::color::normalize_color;
use crate::deduce::deduce_unknown_colors;

pub use crate::color::{
    composite_pixel_over_background as composite_over_background, parse_hex_color as parse_color,
    Color, ForegroundColorSpec, NormalizedColor,
};
pub use crate::error::{Error, Result};
pub use crate::unmix::{unmix_colors, UnmixResult, DEFAULT_COLOR_CLOSENESS_THRESHOLD};

/// Options for a background-removal run.
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// The encoded input image (PNG, JPEG, or anything the decoder accepts)
    pub input: Vec<u8>,
    /// The background color to remove. Auto-detected from the image borders
    /// when not specified.
    pub background_color: Option<Color>,
    /// The foreground colors to decompose against. `Unknown` entries are
    /// deduced from the image. May be empty in non-strict mode.
    pub foreground_colors: Vec<ForegroundColorSpec>,
    /// Restrict unmixing to the specified foreground colors only
    pub strict_mode: bool,
    /// Color closeness threshold in [0, 1]; defaults to
    /// [`DEFAULT_COLOR_CLOSENESS_THRESHOLD`]
    pub threshold: Option<f32>,
    /// Crop the output to the bounding box of non-transparent pixels
    pub trim: bool,
}

/// Process an image to remove its background, returning PNG bytes.
///
/// Supports automatic background detection, foreground color deduction via
/// [`ForegroundColorSpec::Unknown`], and both strict and non-strict modes.
pub fn process(options: &ProcessOptions) -> Result<Vec<u8>> {
    process_internal(options)
}

/// Asynchronous variant of [`process`].
///
/// The whole pipeline (decode, unmix, encode) runs on the blocking thread
/// pool so the calling scheduler is never stalled. Must be called from within
/// a tokio runtime.
pub async fn process_async(options: ProcessOptions) -> Result<Vec<u8>> {
    tokio::task::spawn_blocking(move || process_internal(&options))
        .await
        .unwrap_or_else(|err| std::panic::resume_unwind(err.into_panic()))
}

/// Detect the background color of an encoded image by sampling its borders.
pub fn detect_background(input: &[u8]) -> Result<Color> {
    let img = image::load_from_memory(input).map_err(Error::DecodeFailed)?;
    detect_background_color(&img)
}

/// Crop an encoded image to the bounding box of its non-transparent pixels,
/// returning PNG bytes. A fully transparent image becomes a 1x1 transparent
/// pixel.
pub fn trim_image(input: &[u8]) -> Result<Vec<u8>> {
    let img = image::load_from_memory(input).map_err(Error::DecodeFailed)?;
    let trimmed = process::trim_to_content(&img.to_rgba8());
    encode_png(&trimmed)
}

/// Unmix an observed color into foreground color components.
///
/// # Errors
/// `InsufficientColors` when no foreground colors are supplied.
pub fn unmix_color(
    observed: Color,
    foreground_colors: &[Color],
    background: Color,
) -> Result<UnmixResult> {
    if foreground_colors.is_empty() {
        return Err(Error::InsufficientColors(
            "at least one foreground color is required".into(),
        ));
    }
    let fg_normalized: Vec<NormalizedColor> = foreground_colors
        .iter()
        .map(|&c| normalize_color(c))
        .collect();
    Ok(unmix::unmix_colors(
        observed,
        &fg_normalized,
        normalize_color(background),
    ))
}

/// Compute the final RGBA color from an unmix result: the weighted sum of the
/// basis colors clamped to the unit cube, with the result's alpha.
pub fn compute_unmix_result_color(
    unmix_result: &UnmixResult,
    foreground_colors: &[Color],
) -> [u8; 4] {
    let fg_normalized: Vec<NormalizedColor> = foreground_colors
        .iter()
        .map(|&c| normalize_color(c))
        .collect();
    let (color, alpha) = unmix::compute_result_color(unmix_result, &fg_normalized);
    let rgb = color::denormalize_color(color);
    [rgb[0], rgb[1], rgb[2], (alpha * 255.0).round() as u8]
}

fn process_internal(options: &ProcessOptions) -> Result<Vec<u8>> {
    let img = image::load_from_memory(&options.input).map_err(Error::DecodeFailed)?;
    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();
    if width == 0 || height == 0 {
        return Err(Error::EmptyImage);
    }

    let background_color = match options.background_color {
        Some(color) => color,
        None => detect_background_color(&img)?,
    };

    let threshold = options
        .threshold
        .unwrap_or(DEFAULT_COLOR_CLOSENESS_THRESHOLD);

    // Resolves Unknown entries; a fully-known list passes through unchanged
    let foreground_colors = deduce_unknown_colors(
        &img,
        &options.foreground_colors,
        background_color,
        threshold,
    )?;

    let fg_normalized: Vec<NormalizedColor> = foreground_colors
        .iter()
        .map(|&c| normalize_color(c))
        .collect();

    let output = process::unmix_image(
        &rgba,
        &fg_normalized,
        background_color,
        options.strict_mode,
        threshold,
    );

    let final_img = if options.trim {
        process::trim_to_content(&output)
    } else {
        output
    };

    encode_png(&final_img)
}

fn encode_png(img: &ImageBuffer<Rgba<u8>, Vec<u8>>) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    img.write_to(&mut buffer, ImageFormat::Png)
        .map_err(Error::EncodeFailed)?;
    Ok(buffer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unmix_color_requires_basis() {
        let err = unmix_color([128, 0, 0], &[], [0, 0, 0]).unwrap_err();
        assert!(matches!(err, Error::InsufficientColors(_)));
    }

    #[test]
    fn test_unmix_color_half_red() {
        let result = unmix_color([128, 0, 0], &[[255, 0, 0]], [0, 0, 0]).unwrap();
        assert_eq!(result.weights.len(), 1);
        assert!((result.weights[0] - 1.0).abs() < 1e-5);
        assert!((result.alpha - 0.502).abs() < 0.001);
    }

    #[test]
    fn test_compute_unmix_result_color_mixture() {
        let result = UnmixResult {
            weights: vec![0.5, 0.5],
            alpha: 1.0,
        };
        let rgba = compute_unmix_result_color(&result, &[[255, 0, 0], [0, 255, 0]]);
        assert_eq!(rgba, [128, 128, 0, 255]);
    }

    #[test]
    fn test_default_threshold() {
        assert_eq!(DEFAULT_COLOR_CLOSENESS_THRESHOLD, 0.05);
    }

    #[test]
    fn test_process_rejects_garbage_input() {
        let options = ProcessOptions {
            input: vec![1, 2, 3, 4],
            ..Default::default()
        };
        assert!(matches!(process(&options), Err(Error::DecodeFailed(_))));
    }
}
