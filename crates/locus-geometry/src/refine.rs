//! Gauss-Newton refinement of a closed-form estimate.
//!
//! The residual of anchor `i` is `r_i = d_i − ‖p − a_i‖` with the anchor
//! taken on the `z = 0` plane.  Each iteration linearises the residuals,
//! solves the 3×3 normal equations and steps along the least-squares
//! correction until the step is shorter than the tolerance.

use locus_types::Point;
use tracing::{debug, trace};

use crate::error::LocalizationError;
use crate::linalg::Matrix;
use crate::trilateration::{DEFAULT_HEIGHT_SLACK, check_inputs, four_anchor_trilaterate_with};

pub const DEFAULT_MAX_ITERATIONS: usize = 100;
pub const DEFAULT_TOLERANCE: f64 = 1e-6;

/// Step halvings tried before an iteration gives up on finding descent.
const MAX_HALVINGS: usize = 40;

/// Iteration bound, step-size tolerance and seed height slack.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefineOptions {
    pub max_iterations: usize,
    /// Refinement stops once `‖Δ‖` drops below this.
    pub tolerance: f64,
    /// Passed to [`four_anchor_trilaterate_with`] for the seed.
    pub height_slack: f64,
}

impl Default for RefineOptions {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tolerance: DEFAULT_TOLERANCE,
            height_slack: DEFAULT_HEIGHT_SLACK,
        }
    }
}

/// Refined position and its diagnostics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Refinement {
    pub position: Point,
    /// Number of Gauss-Newton steps taken.
    pub iterations: usize,
    /// `false` when the iteration bound was reached first.
    pub converged: bool,
    /// Length of the last step, `0.0` when no step was taken.
    pub step_norm: f64,
    /// Root-mean-square residual at `position`.
    pub rms_residual: f64,
}

/// Refine with [`RefineOptions::default`].
pub fn refine(distances: &[f64], anchors: &[Point]) -> Result<Refinement, LocalizationError> {
    refine_with(distances, anchors, RefineOptions::default())
}

/// Seed from [`four_anchor_trilaterate_with`] on the first four anchors, then
/// run Gauss-Newton over all of them.
///
/// Each step is halved until the squared residual no longer grows, so the
/// returned position is never worse than the seed.  Near the anchor plane the
/// height column of the Jacobian nearly vanishes and the full step in `z` is
/// far too long; the halving keeps the iterate in place there.  Residuals
/// depend on `z²` only, so the height is kept non-negative.
pub fn refine_with(
    distances: &[f64],
    anchors: &[Point],
    options: RefineOptions,
) -> Result<Refinement, LocalizationError> {
    check_inputs(distances, anchors, 4)?;
    let mut position =
        four_anchor_trilaterate_with(&distances[..4], &anchors[..4], options.height_slack)?;
    debug!(%position, anchors = anchors.len(), "refinement seed");

    let mut cost = squared_residual(&position, distances, anchors);
    let mut iterations = 0;
    let mut step_norm = 0.0;
    let mut converged = false;
    'outer: while iterations < options.max_iterations {
        let (jacobian, residuals) = linearise(&position, distances, anchors)?;
        let jt = jacobian.transpose();
        let hessian = jt.mul(&jacobian)?;
        let gradient = jt.mul_vec(&residuals)?;
        let delta = normal_step(&hessian, &gradient, iterations)?;
        if delta.iter().any(|v| !v.is_finite()) {
            return Err(LocalizationError::DegenerateGeometry {
                iteration: iterations,
                details: "Gauss-Newton step is not finite".to_string(),
            });
        }
        iterations += 1;

        let full_norm = delta.iter().map(|v| v * v).sum::<f64>().sqrt();
        let mut scale = 1.0;
        for _ in 0..MAX_HALVINGS {
            step_norm = scale * full_norm;
            let candidate = Point::new(
                position.x - scale * delta[0],
                position.y - scale * delta[1],
                (position.z - scale * delta[2]).abs(),
            );
            let candidate_cost = squared_residual(&candidate, distances, anchors);
            if candidate_cost <= cost {
                position = candidate;
                cost = candidate_cost;
                trace!(iteration = iterations, step_norm, %position, "gauss-newton step");
                if step_norm < options.tolerance {
                    converged = true;
                    break 'outer;
                }
                continue 'outer;
            }
            if step_norm < options.tolerance {
                // No descent left above the tolerance: `position` is a minimum.
                converged = true;
                break 'outer;
            }
            scale *= 0.5;
        }
        debug!(iteration = iterations, "no descent along the Gauss-Newton step");
        break;
    }

    let rms_residual = (cost / distances.len() as f64).sqrt();
    debug!(iterations, converged, step_norm, rms_residual, %position, "refinement finished");
    Ok(Refinement {
        position,
        iterations,
        converged,
        step_norm,
        rms_residual,
    })
}

/// The N×3 Jacobian `∂r/∂p` and the residual vector at `position`.
fn linearise(
    position: &Point,
    distances: &[f64],
    anchors: &[Point],
) -> Result<(Matrix, Vec<f64>), LocalizationError> {
    let mut rows = Vec::with_capacity(anchors.len() * 3);
    let mut residuals = Vec::with_capacity(anchors.len());
    for (d, anchor) in distances.iter().zip(anchors) {
        let (dx, dy, dz) = (position.x - anchor.x, position.y - anchor.y, position.z);
        let predicted = (dx * dx + dy * dy + dz * dz).sqrt();
        residuals.push(d - predicted);
        if predicted == 0.0 {
            rows.extend([0.0; 3]);
        } else {
            rows.extend([-dx / predicted, -dy / predicted, -dz / predicted]);
        }
    }
    Ok((Matrix::new(anchors.len(), 3, rows)?, residuals))
}

/// Solve `H·Δ = g`.
///
/// An iterate on the anchor plane zeroes the height column of the Jacobian;
/// the step is then taken in `(x, y)` alone with `Δz = 0`.
fn normal_step(
    hessian: &Matrix,
    gradient: &[f64],
    iteration: usize,
) -> Result<[f64; 3], LocalizationError> {
    match hessian.solve(gradient) {
        Ok(delta) => Ok([delta[0], delta[1], delta[2]]),
        Err(LocalizationError::SingularMatrix { determinant }) => {
            let planar = hessian.top_left(2)?.solve(&gradient[..2]).map_err(|_| {
                LocalizationError::DegenerateGeometry {
                    iteration,
                    details: format!("normal equations are singular (determinant {determinant:e})"),
                }
            })?;
            trace!(iteration, "height unobservable; planar step");
            Ok([planar[0], planar[1], 0.0])
        }
        Err(err) => Err(err),
    }
}

/// `Σ r_i²` with every anchor on the `z = 0` plane.
fn squared_residual(position: &Point, distances: &[f64], anchors: &[Point]) -> f64 {
    distances
        .iter()
        .zip(anchors)
        .map(|(d, anchor)| {
            let r = d - position.distance_to(&Point::planar(anchor.x, anchor.y));
            r * r
        })
        .sum()
}
