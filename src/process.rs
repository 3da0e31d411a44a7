use crate::color::{
    composite_pixel_over_background, denormalize_color, normalize_color, Color, NormalizedColor,
};
use crate::unmix::{
    best_single_fallback, compute_result_color, free_solve, is_color_close_to_foreground,
    to_vector, unmix_constrained, UnmixResult,
};
use image::{imageops, ImageBuffer, Rgba};
use rayon::prelude::*;

/// Minimum slab height for the parallel driver; whole rows keep the output
/// regions disjoint and at least this many amortize the dispatch.
const MIN_SLAB_ROWS: u32 = 16;

/// Unmix a whole image against the background.
///
/// Pixels are processed in parallel over row-aligned slabs; each slab writes
/// to its own disjoint range of the output buffer, so the result is
/// byte-identical regardless of worker count.
pub(crate) fn unmix_image(
    rgba: &ImageBuffer<Rgba<u8>, Vec<u8>>,
    foreground_colors: &[NormalizedColor],
    background_color: Color,
    strict_mode: bool,
    threshold: f32,
) -> ImageBuffer<Rgba<u8>, Vec<u8>> {
    let (width, height) = rgba.dimensions();
    if width == 0 || height == 0 {
        return ImageBuffer::new(width, height);
    }

    let background = normalize_color(background_color);
    let input = rgba.as_raw();
    let mut output = vec![0u8; input.len()];

    let workers = rayon::current_num_threads().max(1) as u32;
    let slab_rows = height.div_ceil(workers).max(MIN_SLAB_ROWS);
    let slab_bytes = slab_rows as usize * width as usize * 4;

    output
        .par_chunks_mut(slab_bytes)
        .enumerate()
        .for_each(|(slab_index, slab)| {
            let base = slab_index * slab_bytes;
            for (offset, out_pixel) in slab.chunks_exact_mut(4).enumerate() {
                let i = base + offset * 4;
                let pixel = Rgba([input[i], input[i + 1], input[i + 2], input[i + 3]]);
                let result = process_pixel(
                    &pixel,
                    foreground_colors,
                    background,
                    background_color,
                    strict_mode,
                    threshold,
                );
                out_pixel.copy_from_slice(&result);
            }
        });

    ImageBuffer::from_raw(width, height, output)
        .expect("output buffer matches the input dimensions")
}

/// Per-pixel policy of the driver.
///
/// The observed color is the input pixel composited over the background, so
/// images that already carry transparency unmix correctly. Background-exact
/// pixels become fully transparent; with an empty basis every pixel takes the
/// free solve; otherwise pixels close to the basis (or all pixels, in strict
/// mode) go through the constrained solve.
fn process_pixel(
    pixel: &Rgba<u8>,
    foreground_colors: &[NormalizedColor],
    background: NormalizedColor,
    background_color: Color,
    strict_mode: bool,
    threshold: f32,
) -> [u8; 4] {
    let observed = composite_pixel_over_background(pixel, background_color);
    if observed == background_color {
        return [0, 0, 0, 0];
    }

    let obs = to_vector(normalize_color(observed));
    let bg = to_vector(background);

    if foreground_colors.is_empty() {
        let (effective, alpha) = free_solve(obs, bg);
        return emit(effective, alpha);
    }

    if strict_mode || is_color_close_to_foreground(obs, foreground_colors, threshold) {
        if let Some(result) = unmix_constrained(obs, foreground_colors, bg) {
            return emit_unmixed(&result, foreground_colors);
        }
        if strict_mode {
            // Keep the chosen basis color even when its best alpha is zero
            let fallback = best_single_fallback(obs, foreground_colors, bg);
            let index = fallback.weights.iter().position(|&w| w > 0.0).unwrap_or(0);
            return emit(foreground_colors[index], fallback.alpha);
        }
        // Non-strict: an infeasible constrained solve falls through to the
        // free solve, which keeps reconstruction exact
    }

    let (effective, alpha) = free_solve(obs, bg);
    emit(effective, alpha)
}

fn emit_unmixed(result: &UnmixResult, foreground_colors: &[NormalizedColor]) -> [u8; 4] {
    let (color, alpha) = compute_result_color(result, foreground_colors);
    emit(color, alpha)
}

fn emit(color: NormalizedColor, alpha: f32) -> [u8; 4] {
    let rgb = denormalize_color(color);
    [rgb[0], rgb[1], rgb[2], (alpha * 255.0).round() as u8]
}

/// Trim an image by cropping to the bounding box of non-transparent pixels.
///
/// If every pixel is fully transparent (or the image has a zero dimension),
/// returns a 1x1 transparent image.
pub(crate) fn trim_to_content(
    img: &ImageBuffer<Rgba<u8>, Vec<u8>>,
) -> ImageBuffer<Rgba<u8>, Vec<u8>> {
    let mut bounds: Option<(u32, u32, u32, u32)> = None;
    for (x, y, pixel) in img.enumerate_pixels() {
        if pixel[3] != 0 {
            bounds = Some(match bounds {
                None => (x, y, x, y),
                Some((min_x, min_y, max_x, max_y)) => {
                    (min_x.min(x), min_y.min(y), max_x.max(x), max_y.max(y))
                }
            });
        }
    }

    match bounds {
        None => ImageBuffer::from_pixel(1, 1, Rgba([0, 0, 0, 0])),
        Some((min_x, min_y, max_x, max_y)) => {
            let (width, height) = (max_x - min_x + 1, max_y - min_y + 1);
            if (width, height) == img.dimensions() {
                img.clone()
            } else {
                imageops::crop_imm(img, min_x, min_y, width, height).to_image()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WHITE: Color = [255, 255, 255];
    const RED_N: NormalizedColor = [1.0, 0.0, 0.0];

    fn image_from_colors(width: u32, height: u32, colors: &[Color]) -> ImageBuffer<Rgba<u8>, Vec<u8>> {
        ImageBuffer::from_fn(width, height, |x, y| {
            let [r, g, b] = colors[(y * width + x) as usize];
            Rgba([r, g, b, 255])
        })
    }

    #[test]
    fn test_background_pixels_become_transparent() {
        let img = image_from_colors(2, 2, &[WHITE, WHITE, WHITE, WHITE]);
        let out = unmix_image(&img, &[], WHITE, false, 0.05);
        for pixel in out.pixels() {
            assert_eq!(pixel.0, [0, 0, 0, 0]);
        }
    }

    #[test]
    fn test_opaque_foreground_survives() {
        let img = image_from_colors(2, 2, &[[255, 0, 0], WHITE, WHITE, WHITE]);
        let out = unmix_image(&img, &[], WHITE, false, 0.05);
        assert_eq!(out.get_pixel(0, 0).0, [255, 0, 0, 255]);
        assert_eq!(out.get_pixel(1, 0).0, [0, 0, 0, 0]);
        assert_eq!(out.get_pixel(0, 1).0, [0, 0, 0, 0]);
        assert_eq!(out.get_pixel(1, 1).0, [0, 0, 0, 0]);
    }

    #[test]
    fn test_strict_half_red_on_black() {
        let img = image_from_colors(1, 1, &[[128, 0, 0]]);
        let out = unmix_image(&img, &[RED_N], [0, 0, 0], true, 0.05);
        let pixel = out.get_pixel(0, 0).0;
        assert_eq!([pixel[0], pixel[1], pixel[2]], [255, 0, 0]);
        assert!((pixel[3] as i32 - 128).abs() <= 1);
    }

    #[test]
    fn test_strict_forces_basis_color() {
        // A blue pixel has no red decomposition; strict mode still emits red,
        // at the best (zero) alpha rather than failing
        let img = image_from_colors(1, 1, &[[0, 0, 255]]);
        let out = unmix_image(&img, &[RED_N], [0, 0, 0], true, 0.05);
        let pixel = out.get_pixel(0, 0).0;
        assert_eq!([pixel[0], pixel[1], pixel[2]], [255, 0, 0]);
        assert_eq!(pixel[3], 0);
    }

    #[test]
    fn test_non_strict_preserves_out_of_palette_colors() {
        // Blue is far from the red basis; non-strict mode reconstructs it
        // perfectly through the free solve
        let img = image_from_colors(1, 1, &[[0, 0, 255]]);
        let out = unmix_image(&img, &[RED_N], [0, 0, 0], false, 0.05);
        let pixel = out.get_pixel(0, 0).0;
        assert_eq!(pixel, [0, 0, 255, 255]);
    }

    #[test]
    fn test_translucent_input_is_precomposited() {
        // A 50% red pixel over white in the input behaves like the blend
        let img = ImageBuffer::from_pixel(1, 1, Rgba([255, 0, 0, 128]));
        let out = unmix_image(&img, &[], WHITE, false, 0.05);
        let pixel = out.get_pixel(0, 0).0;
        // Unmixing the blend against white recovers red at ~50% alpha
        assert_eq!(pixel[0], 255);
        assert!(pixel[1] < 8 && pixel[2] < 8);
        assert!((pixel[3] as i32 - 128).abs() <= 2);
    }

    #[test]
    fn test_driver_is_deterministic() {
        let colors: Vec<Color> = (0..64 * 64)
            .map(|i| [(i % 256) as u8, (i / 64) as u8, 200])
            .collect();
        let img = image_from_colors(64, 64, &colors);
        let first = unmix_image(&img, &[], WHITE, false, 0.05);
        let second = unmix_image(&img, &[], WHITE, false, 0.05);
        assert_eq!(first.as_raw(), second.as_raw());
    }

    #[test]
    fn test_tall_image_spans_multiple_slabs() {
        // 1x100 exercises the slab split; every background pixel must clear
        let img = ImageBuffer::from_pixel(1, 100, Rgba([255, 255, 255, 255]));
        let out = unmix_image(&img, &[], WHITE, false, 0.05);
        assert_eq!(out.dimensions(), (1, 100));
        assert!(out.pixels().all(|p| p.0 == [0, 0, 0, 0]));
    }

    #[test]
    fn test_trim_crops_to_content() {
        let mut img = ImageBuffer::from_pixel(10, 8, Rgba([0, 0, 0, 0]));
        img.put_pixel(3, 2, Rgba([255, 0, 0, 255]));
        img.put_pixel(6, 5, Rgba([0, 255, 0, 128]));
        let trimmed = trim_to_content(&img);
        assert_eq!(trimmed.dimensions(), (4, 4));
        assert_eq!(trimmed.get_pixel(0, 0).0, [255, 0, 0, 255]);
        assert_eq!(trimmed.get_pixel(3, 3).0, [0, 255, 0, 128]);
    }

    #[test]
    fn test_trim_fully_transparent_returns_1x1() {
        let img = ImageBuffer::from_pixel(5, 5, Rgba([0, 0, 0, 0]));
        let trimmed = trim_to_content(&img);
        assert_eq!(trimmed.dimensions(), (1, 1));
        assert_eq!(trimmed.get_pixel(0, 0).0, [0, 0, 0, 0]);
    }

    #[test]
    fn test_trim_no_op_when_content_touches_edges() {
        let img = ImageBuffer::from_pixel(4, 3, Rgba([1, 2, 3, 255]));
        let trimmed = trim_to_content(&img);
        assert_eq!(trimmed.dimensions(), (4, 3));
        assert_eq!(trimmed.as_raw(), img.as_raw());
    }
}
