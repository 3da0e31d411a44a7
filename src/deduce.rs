use crate::color::{
    composite_pixel_over_background, denormalize_color, normalize_color, Color,
    ForegroundColorSpec,
};
use crate::error::{Error, Result};
use crate::unmix::{free_solve, to_vector, MAX_RGB_DISTANCE};
use image::DynamicImage;
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cmp::Reverse;
use std::collections::HashMap;

/// Fixed PRNG seed so k-means++ picks the same centroids on every run.
const KMEANS_SEED: u64 = 0xB60E5;

/// Iteration cap for the Lloyd refinement loop.
const KMEANS_MAX_ITERATIONS: usize = 32;

/// Deduce unknown foreground colors from an image
///
/// Every observed color that is clearly distinct from the background (and from
/// the already-known foreground colors) is mapped to the pure foreground color
/// implied by its natural alpha, and the resulting points are clustered with
/// k-means, one cluster per unknown slot. Unknown slots are filled in order
/// with the cluster centroids, largest cluster first.
///
/// # Arguments
/// * `image` - The input image
/// * `specs` - The foreground color specifications (mix of known and unknown)
/// * `background_color` - The background color
/// * `threshold` - Color closeness threshold (1.0 spans the whole RGB cube)
///
/// # Returns
/// A vector of all foreground colors with unknowns replaced by deduced colors
///
/// # Errors
/// `InsufficientColors` when the image does not contain enough distinct
/// non-background colors to form one cluster per unknown slot.
pub fn deduce_unknown_colors(
    image: &DynamicImage,
    specs: &[ForegroundColorSpec],
    background_color: Color,
    threshold: f32,
) -> Result<Vec<Color>> {
    let known_colors: Vec<Color> = specs
        .iter()
        .filter_map(|spec| match spec {
            ForegroundColorSpec::Known(color) => Some(*color),
            ForegroundColorSpec::Unknown => None,
        })
        .collect();
    let unknown_count = specs.len() - known_colors.len();

    if unknown_count == 0 {
        return Ok(known_colors);
    }

    let points = candidate_foreground_points(image, &known_colors, background_color, threshold);
    if points.len() < unknown_count {
        return Err(Error::InsufficientColors(format!(
            "found {} candidate colors beyond the background threshold, need at least {}",
            points.len(),
            unknown_count
        )));
    }

    let mut rng = StdRng::seed_from_u64(KMEANS_SEED);
    let mut clusters = kmeans_clusters(&points, unknown_count, &mut rng)?;

    // Largest clusters first; ties broken by the snapped centroid value
    clusters.sort_by_key(|&(centroid, population)| (Reverse(population), snap_to_rgb(centroid)));
    let mut deduced = clusters
        .into_iter()
        .map(|(centroid, _)| snap_to_rgb(centroid));

    Ok(specs
        .iter()
        .map(|spec| match spec {
            ForegroundColorSpec::Known(color) => *color,
            ForegroundColorSpec::Unknown => deduced.next().unwrap_or([128, 128, 128]),
        })
        .collect())
}

/// Collect the implied pure-foreground points to cluster.
///
/// Works on unique observed colors (after compositing any existing alpha over
/// the background), ordered by descending pixel count so the point order, and
/// with it the seeded clustering, is deterministic. Colors within the
/// threshold of the background or of a known foreground color are skipped.
fn candidate_foreground_points(
    image: &DynamicImage,
    known_colors: &[Color],
    background_color: Color,
    threshold: f32,
) -> Vec<Vector3<f32>> {
    let rgba = image.to_rgba8();

    let mut color_counts: HashMap<Color, usize> = HashMap::new();
    for pixel in rgba.pixels() {
        let color = composite_pixel_over_background(pixel, background_color);
        *color_counts.entry(color).or_insert(0) += 1;
    }

    let mut observed: Vec<(Color, usize)> = color_counts.into_iter().collect();
    observed.sort_by_key(|&(color, count)| (Reverse(count), color));

    let max_distance = threshold * MAX_RGB_DISTANCE;
    let background = to_vector(normalize_color(background_color));
    let known: Vec<Vector3<f32>> = known_colors
        .iter()
        .map(|&c| to_vector(normalize_color(c)))
        .collect();

    let mut points = Vec::new();
    for (color, _) in observed {
        let obs = to_vector(normalize_color(color));
        if (obs - background).norm() <= max_distance {
            continue;
        }
        if known.iter().any(|k| (obs - k).norm() <= max_distance) {
            continue;
        }

        // Pure foreground implied by the pixel's natural (minimal) alpha
        let (effective, alpha) = free_solve(obs, background);
        if alpha <= 0.0 {
            continue;
        }
        points.push(Vector3::from_row_slice(&effective));
    }
    points
}

/// k-means over the candidate points: k-means++ seeding from the supplied
/// PRNG, then Lloyd iterations to a fixed point or the iteration cap.
///
/// Returns (centroid, population) pairs. Fails when fewer than k distinct
/// clusters can be formed.
fn kmeans_clusters(
    points: &[Vector3<f32>],
    k: usize,
    rng: &mut StdRng,
) -> Result<Vec<(Vector3<f32>, usize)>> {
    let mut centroids: Vec<Vector3<f32>> = Vec::with_capacity(k);
    centroids.push(points[rng.random_range(0..points.len())]);

    while centroids.len() < k {
        // Squared distance to the nearest chosen centroid, per point
        let distances: Vec<f32> = points
            .iter()
            .map(|p| {
                centroids
                    .iter()
                    .map(|c| (p - c).norm_squared())
                    .fold(f32::INFINITY, f32::min)
            })
            .collect();

        if distances.iter().sum::<f32>() <= 0.0 {
            return Err(Error::InsufficientColors(format!(
                "cannot form {k} distinct color clusters from the image"
            )));
        }
        centroids.push(points[pick_weighted(rng, &distances)]);
    }

    let mut assignments = vec![0usize; points.len()];
    for _ in 0..KMEANS_MAX_ITERATIONS {
        for (pi, point) in points.iter().enumerate() {
            let mut best = 0;
            let mut best_distance = f32::INFINITY;
            for (ci, centroid) in centroids.iter().enumerate() {
                let distance = (point - centroid).norm_squared();
                if distance < best_distance {
                    best = ci;
                    best_distance = distance;
                }
            }
            assignments[pi] = best;
        }

        let mut sums = vec![Vector3::zeros(); k];
        let mut counts = vec![0usize; k];
        for (pi, &ci) in assignments.iter().enumerate() {
            sums[ci] += points[pi];
            counts[ci] += 1;
        }

        let mut converged = true;
        for ci in 0..k {
            if counts[ci] == 0 {
                continue;
            }
            let updated = sums[ci] / counts[ci] as f32;
            if updated != centroids[ci] {
                centroids[ci] = updated;
                converged = false;
            }
        }
        if converged {
            break;
        }
    }

    let mut populations = vec![0usize; k];
    for &ci in &assignments {
        populations[ci] += 1;
    }
    if populations.contains(&0) {
        return Err(Error::InsufficientColors(format!(
            "cannot form {k} distinct color clusters from the image"
        )));
    }

    Ok(centroids.into_iter().zip(populations).collect())
}

/// Sample an index with probability proportional to its weight. The caller
/// guarantees a positive total.
fn pick_weighted(rng: &mut StdRng, weights: &[f32]) -> usize {
    let total: f32 = weights.iter().sum();
    let mut target = rng.random::<f32>() * total;
    for (i, &weight) in weights.iter().enumerate() {
        if target < weight {
            return i;
        }
        target -= weight;
    }
    weights.len() - 1
}

fn snap_to_rgb(centroid: Vector3<f32>) -> Color {
    denormalize_color([centroid[0], centroid[1], centroid[2]])
}
