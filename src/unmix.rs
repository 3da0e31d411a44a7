use crate::color::{normalize_color, Color, NormalizedColor};
use nalgebra::{DMatrix, DVector, Vector3};

/// Channel-wise comparison tolerance. All reconstruction checks and the alpha
/// bisection precision use this value.
pub(crate) const EPSILON: f32 = 1.0 / 512.0;

/// Default threshold for color closeness (0.05 = 5% of max RGB distance)
pub const DEFAULT_COLOR_CLOSENESS_THRESHOLD: f32 = 0.05;

/// Maximum distance between two colors in normalized RGB space (sqrt(3)).
/// A closeness threshold of 1.0 spans the whole cube.
pub(crate) const MAX_RGB_DISTANCE: f32 = 1.732_050_8;

/// Lower bound of the alpha bisection, one 8-bit step above fully transparent.
const ALPHA_FLOOR: f32 = 1.0 / 255.0;

/// Singular-value cutoff for the least-squares pseudo-inverse.
const PINV_EPSILON: f32 = 1e-6;

/// Result of color unmixing: weights for each foreground color and overall alpha
#[derive(Debug, Clone)]
pub struct UnmixResult {
    /// Weight for each foreground color. Weights are non-negative and describe
    /// the effective foreground color before alpha is applied; their sum may
    /// exceed 1 when the basis colors are dim relative to the observed color.
    pub weights: Vec<f32>,
    /// Overall alpha value (0.0 = fully transparent, 1.0 = fully opaque)
    pub alpha: f32,
}

/// Unmix an observed color into foreground components.
///
/// Given an observed color and known foreground/background colors, determines
/// how much of each foreground color contributed to the observed color and how
/// transparent the pixel is. This function is total: when the constrained
/// solve has no exact solution it falls back to the single foreground color
/// that best reconstructs the observation.
pub fn unmix_colors(
    observed: Color,
    foreground_colors: &[NormalizedColor],
    background: NormalizedColor,
) -> UnmixResult {
    let obs = to_vector(normalize_color(observed));
    let bg = Vector3::from_row_slice(&background);

    if foreground_colors.is_empty() {
        return UnmixResult {
            weights: vec![],
            alpha: 0.0,
        };
    }

    unmix_constrained(obs, foreground_colors, bg)
        .unwrap_or_else(|| best_single_fallback(obs, foreground_colors, bg))
}

/// Solve the compositing equation restricted to the given basis colors.
///
/// Returns None when no combination of the basis colors reconstructs the
/// observation within the channel tolerance at any alpha in (0, 1].
pub(crate) fn unmix_constrained(
    observed: Vector3<f32>,
    foreground_colors: &[NormalizedColor],
    background: Vector3<f32>,
) -> Option<UnmixResult> {
    match foreground_colors.len() {
        0 => None,
        1 => {
            let (alpha, error) = single_color_alpha(observed, foreground_colors[0], background);
            (error <= EPSILON).then(|| UnmixResult {
                weights: vec![1.0],
                alpha,
            })
        }
        _ => unmix_multiple_colors(observed, foreground_colors, background),
    }
}

/// Closed-form single-basis solve.
///
/// Uses the channel with the largest |fg - bg| denominator for numerical
/// stability. Returns the clamped alpha and the worst post-clamp per-channel
/// reconstruction error.
fn single_color_alpha(
    observed: Vector3<f32>,
    foreground: NormalizedColor,
    background: Vector3<f32>,
) -> (f32, f32) {
    let fg = Vector3::from_row_slice(&foreground);
    let diff = fg - background;

    let mut k = 0;
    for i in 1..3 {
        if diff[i].abs() > diff[k].abs() {
            k = i;
        }
    }

    let alpha = if diff[k].abs() > f32::EPSILON {
        ((observed[k] - background[k]) / diff[k]).clamp(0.0, 1.0)
    } else {
        // Foreground equals background; only an exact background pixel fits
        0.0
    };

    let reconstructed = background + diff * alpha;
    let error = (0..3)
        .map(|i| (reconstructed[i] - observed[i]).abs())
        .fold(0.0f32, f32::max);

    (alpha, error)
}

/// Multi-basis solve: bisection on alpha for the most transparent feasible
/// decomposition.
///
/// A candidate alpha is feasible iff the implied effective foreground
/// E = bg + (observed - bg) / alpha lies inside the unit RGB cube and can be
/// written as a non-negative combination of the basis colors. The bisection
/// keeps the upper bound feasible and narrows to 1/512 precision.
fn unmix_multiple_colors(
    observed: Vector3<f32>,
    foreground_colors: &[NormalizedColor],
    background: Vector3<f32>,
) -> Option<UnmixResult> {
    let mut hi = 1.0f32;
    let mut best = solve_weights_at(observed, foreground_colors, background, hi)?;

    let mut lo = ALPHA_FLOOR;
    if let Some(weights) = solve_weights_at(observed, foreground_colors, background, lo) {
        return Some(UnmixResult { weights, alpha: lo });
    }

    while hi - lo > EPSILON {
        let mid = 0.5 * (lo + hi);
        match solve_weights_at(observed, foreground_colors, background, mid) {
            Some(weights) => {
                best = weights;
                hi = mid;
            }
            None => lo = mid,
        }
    }

    Some(UnmixResult {
        weights: best,
        alpha: hi,
    })
}

/// Feasibility check for one alpha candidate: the implied effective foreground
/// must sit in [0,1]^3 and admit a non-negative least-squares fit.
fn solve_weights_at(
    observed: Vector3<f32>,
    foreground_colors: &[NormalizedColor],
    background: Vector3<f32>,
    alpha: f32,
) -> Option<Vec<f32>> {
    let effective = background + (observed - background) / alpha;
    if (0..3).any(|i| effective[i] < -EPSILON || effective[i] > 1.0 + EPSILON) {
        return None;
    }
    nonnegative_least_squares(effective, foreground_colors)
}

/// Non-negative least squares by brute-force enumeration of active sets.
///
/// For each non-empty subset of basis colors, solves the unconstrained least
/// squares via pseudo-inverse and keeps the subset whose solution is
/// non-negative with the smallest residual. Exponential in the basis size,
/// which stays tiny in practice (n <= 4).
fn nonnegative_least_squares(
    target: Vector3<f32>,
    foreground_colors: &[NormalizedColor],
) -> Option<Vec<f32>> {
    let n = foreground_colors.len();
    let b = DVector::from_column_slice(&[target[0], target[1], target[2]]);

    let mut best: Option<(f32, Vec<f32>)> = None;

    for mask in 1u32..(1 << n) {
        let members: Vec<usize> = (0..n).filter(|i| mask & (1 << i) != 0).collect();

        let mut columns = Vec::with_capacity(3 * members.len());
        for &i in &members {
            columns.extend_from_slice(&foreground_colors[i]);
        }
        let a = DMatrix::from_column_slice(3, members.len(), &columns);

        let Ok(pinv) = a.clone().pseudo_inverse(PINV_EPSILON) else {
            continue;
        };
        let solution = pinv * &b;

        if solution.iter().any(|&w| w < -EPSILON) {
            continue;
        }

        let reconstructed = &a * &solution;
        let residual = (0..3)
            .map(|i| (reconstructed[i] - target[i]).abs())
            .fold(0.0f32, f32::max);
        if residual > EPSILON {
            continue;
        }

        if best.as_ref().is_none_or(|(r, _)| residual < *r) {
            let mut weights = vec![0.0; n];
            for (j, &i) in members.iter().enumerate() {
                weights[i] = solution[j].max(0.0);
            }
            best = Some((residual, weights));
        }
    }

    best.map(|(_, weights)| weights)
}

/// Pick the single basis color with the smallest post-clamp reconstruction
/// error. Used when the constrained solve is infeasible in strict mode.
pub(crate) fn best_single_fallback(
    observed: Vector3<f32>,
    foreground_colors: &[NormalizedColor],
    background: Vector3<f32>,
) -> UnmixResult {
    let mut best_index = 0;
    let mut best_alpha = 0.0f32;
    let mut best_error = f32::INFINITY;

    for (i, &fg) in foreground_colors.iter().enumerate() {
        let (alpha, error) = single_color_alpha(observed, fg, background);
        if error < best_error {
            best_index = i;
            best_alpha = alpha;
            best_error = error;
        }
    }

    let mut weights = vec![0.0; foreground_colors.len()];
    weights[best_index] = 1.0;
    UnmixResult {
        weights,
        alpha: best_alpha,
    }
}

/// Free-foreground solve: the minimum alpha whose implied foreground color
/// stays inside the unit RGB cube, together with that foreground.
///
/// Per channel the binding constraint is E <= 1 when the observation sits
/// above the background and E >= 0 when it sits below, so the minimal alpha is
/// (C - G) / (1 - G) or (G - C) / G respectively, maximized over channels.
/// Reconstruction is exact: alpha * E + (1 - alpha) * G == C.
pub(crate) fn free_solve(
    observed: Vector3<f32>,
    background: Vector3<f32>,
) -> (NormalizedColor, f32) {
    let mut alpha = 0.0f32;
    for i in 0..3 {
        let delta = observed[i] - background[i];
        let needed = if delta > 0.0 {
            delta / (1.0 - background[i])
        } else if delta < 0.0 {
            -delta / background[i]
        } else {
            0.0
        };
        alpha = alpha.max(needed);
    }

    if alpha <= 0.0 {
        return ([0.0, 0.0, 0.0], 0.0);
    }

    let alpha = alpha.min(1.0);
    let mut effective = [0.0f32; 3];
    for i in 0..3 {
        effective[i] =
            (background[i] + (observed[i] - background[i]) / alpha).clamp(0.0, 1.0);
    }
    (effective, alpha)
}

/// Minimum Euclidean distance from an observed color to any basis color, in
/// normalized RGB space.
pub(crate) fn min_distance_to_basis(
    observed: Vector3<f32>,
    foreground_colors: &[NormalizedColor],
) -> f32 {
    foreground_colors
        .iter()
        .map(|fg| (observed - Vector3::from_row_slice(fg)).norm())
        .fold(f32::INFINITY, f32::min)
}

/// Check whether an observed color lies within `threshold` of any foreground
/// color, with the threshold scaled so 1.0 spans the whole RGB cube.
pub fn is_color_close_to_foreground(
    observed: Vector3<f32>,
    foreground_colors: &[NormalizedColor],
    threshold: f32,
) -> bool {
    min_distance_to_basis(observed, foreground_colors) <= threshold * MAX_RGB_DISTANCE
}

/// Compute the effective foreground color from unmixing results.
///
/// The color is the weighted sum of the basis colors, clamped to the unit
/// cube; the alpha passes through. A zero alpha yields transparent black.
pub fn compute_result_color(
    unmix_result: &UnmixResult,
    foreground_colors: &[NormalizedColor],
) -> (NormalizedColor, f32) {
    if unmix_result.alpha == 0.0 {
        return ([0.0, 0.0, 0.0], 0.0);
    }

    let mut result = [0.0f32; 3];
    for (i, &weight) in unmix_result.weights.iter().enumerate() {
        if let Some(fg) = foreground_colors.get(i) {
            result[0] += weight * fg[0];
            result[1] += weight * fg[1];
            result[2] += weight * fg[2];
        }
    }

    for channel in &mut result {
        *channel = channel.clamp(0.0, 1.0);
    }

    (result, unmix_result.alpha)
}

pub(crate) fn to_vector(color: NormalizedColor) -> Vector3<f32> {
    Vector3::from_row_slice(&color)
}
