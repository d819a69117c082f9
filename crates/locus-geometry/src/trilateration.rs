//! Closed-form position estimates.
//!
//! Each range `d_i` to anchor `a_i` defines a circle (a sphere once the
//! target height is free).  Differencing two circle equations cancels the
//! quadratic terms and leaves a line:
//!
//! ```text
//! 2(x_i − x_j)·x + 2(y_i − y_j)·y = R_i − R_j,   R_k = x_k² + y_k² − d_k²
//! ```
//!
//! Two such lines give a 2×2 system for the horizontal position.  Because the
//! anchors share the `z = 0` plane, the target height cancels too and is
//! recovered afterwards from the horizontal fit.

use locus_types::Point;
use tracing::debug;

use crate::containment::{point_in_quadrilateral, point_in_region};
use crate::error::LocalizationError;
use crate::linalg::Matrix;

/// Anchor pairings used by [`four_anchor_trilaterate`].  Each entry lists the
/// `(i, j)` index pairs of the two differenced rows.
const FOUR_ANCHOR_PAIRINGS: [[(usize, usize); 2]; 3] = [
    [(1, 0), (3, 2)],
    [(1, 2), (3, 0)],
    [(0, 2), (3, 1)],
];

/// A candidate closer than this to every leave-one-out corner is taken to lie
/// in the (collapsed) containment region.
const COINCIDENCE_TOLERANCE: f64 = 1e-6;

/// Default relative slack below zero still accepted for `d² − h²`.
///
/// This only absorbs floating-point error.  A target on or near the anchor
/// plane with ranges rounded coarser than that often has every `d_i² − h_i²`
/// slightly negative and yields [`LocalizationError::HeightUnresolvable`];
/// pass a larger slack to [`four_anchor_trilaterate_with`] (about `1e-3` for
/// centimetre-rounded ranges in a 10 m room) to read those as `z ≈ 0`.
pub const DEFAULT_HEIGHT_SLACK: f64 = 1e-9;

/// Reject non-finite or negative ranges.
pub(crate) fn validate_ranges(distances: &[f64]) -> Result<(), LocalizationError> {
    match distances
        .iter()
        .enumerate()
        .find(|(_, d)| !d.is_finite() || **d < 0.0)
    {
        Some((index, value)) => Err(LocalizationError::InvalidMeasurement {
            index,
            value: *value,
        }),
        None => Ok(()),
    }
}

/// Check that at least `needed` index-aligned ranges and anchors are present.
pub(crate) fn check_inputs(
    distances: &[f64],
    anchors: &[Point],
    needed: usize,
) -> Result<(), LocalizationError> {
    if distances.len() < needed {
        return Err(LocalizationError::InsufficientMeasurements {
            needed,
            got: distances.len(),
        });
    }
    if distances.len() != anchors.len() {
        return Err(LocalizationError::DimensionMismatch {
            operation: "trilaterate",
            left: (distances.len(), 1),
            right: (anchors.len(), 3),
        });
    }
    validate_ranges(distances)
}

fn range_term(anchor: &Point, distance: f64) -> f64 {
    anchor.x * anchor.x + anchor.y * anchor.y - distance * distance
}

/// Row `2(a_i − a_j)` and right-hand side `R_i − R_j`.
fn difference_row(distances: &[f64], anchors: &[Point], i: usize, j: usize) -> ([f64; 2], f64) {
    let (ai, aj) = (&anchors[i], &anchors[j]);
    (
        [2.0 * (ai.x - aj.x), 2.0 * (ai.y - aj.y)],
        range_term(ai, distances[i]) - range_term(aj, distances[j]),
    )
}

fn solve_pairing(
    distances: &[f64],
    anchors: &[Point],
    pairing: [(usize, usize); 2],
) -> Result<Point, LocalizationError> {
    let (row0, b0) = difference_row(distances, anchors, pairing[0].0, pairing[0].1);
    let (row1, b1) = difference_row(distances, anchors, pairing[1].0, pairing[1].1);
    let xy = Matrix::from_rows(&[row0, row1]).solve(&[b0, b1])?;
    Ok(Point::planar(xy[0], xy[1]))
}

/// Horizontal position from the first three anchors.
///
/// The first range circle is subtracted from the other two.  The result has
/// `z = 0`.
pub fn three_anchor_trilaterate(
    distances: &[f64],
    anchors: &[Point],
) -> Result<Point, LocalizationError> {
    check_inputs(distances, anchors, 3)?;
    solve_pairing(distances, anchors, [(1, 0), (2, 0)])
}

/// Corner `i` is the three-anchor fix that leaves anchor `i` out.
fn leave_one_out_region(
    distances: &[f64],
    anchors: &[Point],
) -> Result<[Point; 4], LocalizationError> {
    let mut corners = [Point::default(); 4];
    for (i, corner) in corners.iter_mut().enumerate() {
        let others = [(i + 1) % 4, (i + 2) % 4, (i + 3) % 4];
        let d = others.map(|k| distances[k]);
        let a = others.map(|k| anchors[k]);
        *corner = three_anchor_trilaterate(&d, &a)?;
    }
    Ok(corners)
}

fn collapsed_onto(candidate: &Point, region: &[Point; 4]) -> bool {
    region
        .iter()
        .all(|corner| corner.horizontal_distance_to(candidate) < COINCIDENCE_TOLERANCE)
}

/// 3-D position from the first four anchors.
///
/// 1. Three differenced 2×2 systems, one per entry of the pairing table,
///    each give a candidate `(x, y)`.  Pairings that are singular for this
///    anchor layout (e.g. the parallel sides of a rectangle) give none.
/// 2. The four leave-one-out three-anchor fixes form the containment
///    quadrilateral.
/// 3. The last candidate inside that quadrilateral is kept.  Noise-free
///    ranges collapse the quadrilateral onto the true position; a candidate
///    coinciding with all four corners is kept as well.
/// 4. The height is the mean of `sqrt(d_i² − h_i²)` over the anchors whose
///    range reaches the horizontal distance `h_i`, up to
///    [`DEFAULT_HEIGHT_SLACK`].
pub fn four_anchor_trilaterate(
    distances: &[f64],
    anchors: &[Point],
) -> Result<Point, LocalizationError> {
    four_anchor_trilaterate_with(distances, anchors, DEFAULT_HEIGHT_SLACK)
}

/// [`four_anchor_trilaterate`] accepting `d_i² − h_i² ≥ −height_slack · max(d_i², 1)`
/// as a zero height contribution.
pub fn four_anchor_trilaterate_with(
    distances: &[f64],
    anchors: &[Point],
    height_slack: f64,
) -> Result<Point, LocalizationError> {
    check_inputs(distances, anchors, 4)?;
    let (distances, anchors) = (&distances[..4], &anchors[..4]);

    let mut candidates = Vec::with_capacity(FOUR_ANCHOR_PAIRINGS.len());
    let mut singular = None;
    for pairing in FOUR_ANCHOR_PAIRINGS {
        match solve_pairing(distances, anchors, pairing) {
            Ok(candidate) => candidates.push(candidate),
            Err(err @ LocalizationError::SingularMatrix { .. }) => {
                debug!(?pairing, "anchor pairing is singular; skipping candidate");
                singular = Some(err);
            }
            Err(err) => return Err(err),
        }
    }
    if candidates.is_empty() {
        return Err(singular.unwrap_or(LocalizationError::AmbiguousGeometry));
    }

    let region = leave_one_out_region(distances, anchors)?;
    let selected = candidates
        .iter()
        .rev()
        .find(|c| point_in_quadrilateral(c, &region) || collapsed_onto(c, &region))
        .copied()
        .ok_or(LocalizationError::AmbiguousGeometry)?;

    let heights: Vec<f64> = distances
        .iter()
        .zip(anchors)
        .filter_map(|(d, anchor)| {
            let h = selected.horizontal_distance_to(anchor);
            let gap = d * d - h * h;
            (gap >= -height_slack * (d * d).max(1.0)).then(|| gap.max(0.0).sqrt())
        })
        .collect();
    if heights.is_empty() {
        return Err(LocalizationError::HeightUnresolvable);
    }
    let z = heights.iter().sum::<f64>() / heights.len() as f64;

    debug!(
        x = selected.x,
        y = selected.y,
        z,
        candidates = candidates.len(),
        "four-anchor estimate"
    );
    Ok(Point::new(selected.x, selected.y, z))
}

/// Intersect the radical line `row · [x y] = rhs` with the line through
/// `origin` at `bearing` radians.
fn intersect_bearing(
    origin: &Point,
    bearing: f64,
    row: [f64; 2],
    rhs: f64,
) -> Result<Point, LocalizationError> {
    let (sin, cos) = bearing.sin_cos();
    let a = Matrix::from_rows(&[row, [-sin, cos]]);
    let xy = a.solve(&[rhs, -sin * origin.x + cos * origin.y])?;
    Ok(Point::planar(xy[0], xy[1]))
}

/// Horizontal position from the two anchors `anchor1` and `anchor2`.
///
/// The law of cosines gives the angle `θ` between the baseline
/// `anchor1 → anchor2` and the range vector from `anchor1`.  The bearings at
/// `±θ` each meet the radical line of the two range circles in one
/// candidate.  The `+θ` candidate is returned when it lies in `region` (3 or 4
/// points); otherwise the `−θ` candidate is returned without a containment
/// check.
pub fn two_anchor_trilaterate(
    anchor1: usize,
    anchor2: usize,
    distances: &[f64],
    anchors: &[Point],
    region: &[Point],
) -> Result<Point, LocalizationError> {
    let needed = anchor1.max(anchor2) + 1;
    check_inputs(distances, anchors, needed.max(2))?;

    let (p1, p2) = (&anchors[anchor1], &anchors[anchor2]);
    let (d1, d2) = (distances[anchor1], distances[anchor2]);
    let baseline = p1.horizontal_distance_to(p2);
    let denominator = 2.0 * d1 * baseline;
    if denominator == 0.0 {
        return Err(LocalizationError::InvalidTriangle { cosine: f64::NAN });
    }
    let cosine = (d1 * d1 + baseline * baseline - d2 * d2) / denominator;
    if !(-1.0..=1.0).contains(&cosine) {
        return Err(LocalizationError::InvalidTriangle { cosine });
    }

    let theta = cosine.acos();
    let heading = (p2.y - p1.y).atan2(p2.x - p1.x);
    let (row, rhs) = difference_row(distances, anchors, anchor2, anchor1);

    let plus = intersect_bearing(p1, heading + theta, row, rhs)?;
    if point_in_region(&plus, region)? {
        return Ok(plus);
    }
    debug!(x = plus.x, y = plus.y, "+θ candidate outside region; using −θ");
    intersect_bearing(p1, heading - theta, row, rhs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<Point> {
        vec![
            Point::planar(0.0, 0.0),
            Point::planar(10.0, 0.0),
            Point::planar(10.0, 10.0),
            Point::planar(0.0, 10.0),
        ]
    }

    fn ranges_to(target: &Point, anchors: &[Point]) -> Vec<f64> {
        anchors.iter().map(|a| a.distance_to(target)).collect()
    }

    fn assert_near(p: &Point, x: f64, y: f64, z: f64, tol: f64) {
        assert!(
            (p.x - x).abs() < tol && (p.y - y).abs() < tol && (p.z - z).abs() < tol,
            "expected ({x}, {y}, {z}) got {p}"
        );
    }

    // ── three anchors ───────────────────────────────────────────────────────

    #[test]
    fn three_anchor_exact() {
        let anchors = &square()[..3];
        let d = ranges_to(&Point::planar(2.0, 7.0), anchors);
        let p = three_anchor_trilaterate(&d, anchors).unwrap();
        assert_near(&p, 2.0, 7.0, 0.0, 1e-9);
    }

    #[test]
    fn three_anchor_ignores_height() {
        let anchors = &square()[..3];
        let d = ranges_to(&Point::new(6.0, 3.0, 2.5), anchors);
        let p = three_anchor_trilaterate(&d, anchors).unwrap();
        assert_near(&p, 6.0, 3.0, 0.0, 1e-9);
    }

    #[test]
    fn three_anchor_needs_three_ranges() {
        let anchors = square();
        let err = three_anchor_trilaterate(&[1.0, 2.0], &anchors[..2]).unwrap_err();
        assert_eq!(err, LocalizationError::InsufficientMeasurements { needed: 3, got: 2 });

        let err = three_anchor_trilaterate(&[1.0, 2.0], &anchors).unwrap_err();
        assert!(matches!(err, LocalizationError::InsufficientMeasurements { got: 2, .. }));
    }

    #[test]
    fn three_anchor_collinear_is_singular() {
        let anchors = [Point::planar(0.0, 0.0), Point::planar(1.0, 0.0), Point::planar(2.0, 0.0)];
        let err = three_anchor_trilaterate(&[1.0, 1.0, 1.0], &anchors).unwrap_err();
        assert!(matches!(err, LocalizationError::SingularMatrix { .. }));
    }

    #[test]
    fn rejects_negative_and_nan_ranges() {
        let anchors = &square()[..3];
        assert_eq!(
            three_anchor_trilaterate(&[1.0, -2.0, 3.0], anchors),
            Err(LocalizationError::InvalidMeasurement { index: 1, value: -2.0 })
        );
        assert!(matches!(
            three_anchor_trilaterate(&[1.0, 2.0, f64::NAN], anchors),
            Err(LocalizationError::InvalidMeasurement { index: 2, .. })
        ));
    }

    #[test]
    fn mismatched_lengths() {
        let anchors = square();
        let err = three_anchor_trilaterate(&[1.0, 2.0, 3.0], &anchors).unwrap_err();
        assert!(matches!(err, LocalizationError::DimensionMismatch { .. }));
    }

    // ── four anchors ────────────────────────────────────────────────────────

    #[test]
    fn four_anchor_recovers_height() {
        let anchors = square();
        let d = ranges_to(&Point::new(5.0, 5.0, 2.0), &anchors);
        let p = four_anchor_trilaterate(&d, &anchors).unwrap();
        assert_near(&p, 5.0, 5.0, 2.0, 1e-2);
    }

    #[test]
    fn four_anchor_off_centre_planar_target() {
        let anchors = square();
        let d = ranges_to(&Point::planar(2.5, 8.0), &anchors);
        let p = four_anchor_trilaterate(&d, &anchors).unwrap();
        assert_near(&p, 2.5, 8.0, 0.0, 1e-5);
    }

    #[test]
    fn four_anchor_irregular_quadrilateral() {
        let anchors = vec![
            Point::planar(-1.0, 0.5),
            Point::planar(12.0, -2.0),
            Point::planar(9.0, 11.0),
            Point::planar(1.0, 8.0),
        ];
        let target = Point::new(4.0, 3.0, 1.2);
        let p = four_anchor_trilaterate(&ranges_to(&target, &anchors), &anchors).unwrap();
        assert_near(&p, 4.0, 3.0, 1.2, 1e-6);
    }

    #[test]
    fn four_anchor_collinear_fails_without_nan() {
        let anchors: Vec<Point> = (0..4).map(|i| Point::planar(i as f64, 0.0)).collect();
        let err = four_anchor_trilaterate(&[1.0, 1.0, 1.0, 2.0], &anchors).unwrap_err();
        assert!(matches!(err, LocalizationError::SingularMatrix { .. }));
    }

    #[test]
    fn four_anchor_inconsistent_ranges_are_ambiguous() {
        // The leave-one-out fixes form a non-convex quadrilateral that none of
        // the three candidates falls inside.
        let anchors = vec![
            Point::planar(-1.0, 0.5),
            Point::planar(12.0, -2.0),
            Point::planar(9.0, 11.0),
            Point::planar(1.0, 8.0),
        ];
        let err = four_anchor_trilaterate(&[8.2, 3.8, 10.3, 19.7], &anchors).unwrap_err();
        assert_eq!(err, LocalizationError::AmbiguousGeometry);
    }

    #[test]
    fn four_anchor_short_ranges_leave_height_unresolvable() {
        // Candidate (9.2, 0.8) is farther from every anchor than its range.
        let anchors = square();
        let err = four_anchor_trilaterate(&[1.0, 1.0, 1.0, 13.0], &anchors).unwrap_err();
        assert_eq!(err, LocalizationError::HeightUnresolvable);
    }

    #[test]
    fn height_slack_reads_rounded_planar_ranges_as_zero_height() {
        // (2, 4, 0) with ranges rounded to the centimetre.
        let anchors = square();
        let d = [4.47, 8.94, 10.0, 6.32];
        assert_eq!(
            four_anchor_trilaterate(&d, &anchors).unwrap_err(),
            LocalizationError::HeightUnresolvable
        );
        let p = four_anchor_trilaterate_with(&d, &anchors, 1e-3).unwrap();
        assert!(p.horizontal_distance_to(&Point::planar(2.0, 4.0)) < 1e-2);
        assert_eq!(p.z, 0.0);
    }

    #[test]
    fn four_anchor_needs_four_ranges() {
        let anchors = square();
        let err = four_anchor_trilaterate(&[1.0, 2.0, 3.0], &anchors[..3]).unwrap_err();
        assert_eq!(err, LocalizationError::InsufficientMeasurements { needed: 4, got: 3 });
    }

    // ── two anchors ─────────────────────────────────────────────────────────

    fn two_anchor_setup() -> (Vec<Point>, Vec<f64>) {
        let anchors = vec![Point::planar(0.0, 0.0), Point::planar(10.0, 0.0)];
        let d = ranges_to(&Point::planar(3.0, 4.0), &anchors);
        (anchors, d)
    }

    #[test]
    fn two_anchor_keeps_plus_candidate_inside_region() {
        let (anchors, d) = two_anchor_setup();
        let p = two_anchor_trilaterate(0, 1, &d, &anchors, &square()).unwrap();
        assert_near(&p, 3.0, 4.0, 0.0, 1e-9);
    }

    #[test]
    fn two_anchor_falls_back_to_minus_candidate() {
        let (anchors, d) = two_anchor_setup();
        let below = [
            Point::planar(0.0, 0.0),
            Point::planar(10.0, 0.0),
            Point::planar(10.0, -10.0),
            Point::planar(0.0, -10.0),
        ];
        let p = two_anchor_trilaterate(0, 1, &d, &anchors, &below).unwrap();
        assert_near(&p, 3.0, -4.0, 0.0, 1e-9);
    }

    #[test]
    fn two_anchor_fallback_is_not_checked() {
        let (anchors, d) = two_anchor_setup();
        let elsewhere = [Point::planar(50.0, 50.0), Point::planar(60.0, 50.0), Point::planar(60.0, 60.0)];
        let p = two_anchor_trilaterate(0, 1, &d, &anchors, &elsewhere).unwrap();
        assert_near(&p, 3.0, -4.0, 0.0, 1e-9);
    }

    #[test]
    fn two_anchor_vertical_baseline() {
        let anchors = vec![Point::planar(2.0, 0.0), Point::planar(2.0, 10.0)];
        let d = ranges_to(&Point::planar(6.0, 3.0), &anchors);
        let region = [
            Point::planar(2.0, -1.0),
            Point::planar(12.0, -1.0),
            Point::planar(12.0, 11.0),
            Point::planar(2.0, 11.0),
        ];
        // +θ turns counter-clockwise from the baseline onto the x < 2 side,
        // outside the region, so the −θ candidate is returned.
        let p = two_anchor_trilaterate(0, 1, &d, &anchors, &region).unwrap();
        assert_near(&p, 6.0, 3.0, 0.0, 1e-9);
    }

    #[test]
    fn two_anchor_inconsistent_ranges() {
        let anchors = vec![Point::planar(0.0, 0.0), Point::planar(10.0, 0.0)];
        let err = two_anchor_trilaterate(0, 1, &[2.0, 2.0], &anchors, &square()).unwrap_err();
        assert!(matches!(err, LocalizationError::InvalidTriangle { cosine } if cosine > 1.0));
    }

    #[test]
    fn two_anchor_zero_range_is_invalid() {
        let anchors = vec![Point::planar(0.0, 0.0), Point::planar(10.0, 0.0)];
        let err = two_anchor_trilaterate(0, 1, &[0.0, 10.0], &anchors, &square()).unwrap_err();
        assert!(matches!(err, LocalizationError::InvalidTriangle { .. }));
    }

    #[test]
    fn two_anchor_index_out_of_range() {
        let (anchors, d) = two_anchor_setup();
        let err = two_anchor_trilaterate(0, 3, &d, &anchors, &square()).unwrap_err();
        assert_eq!(err, LocalizationError::InsufficientMeasurements { needed: 4, got: 2 });
    }
}
