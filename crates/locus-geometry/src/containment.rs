//! Planar containment tests.
//!
//! Only the `x` and `y` coordinates of a [`Point`] take part.  Boundaries are
//! exclusive: a point on an outer edge or vertex is outside.

use locus_types::Point;

use crate::error::LocalizationError;

/// Scalar 2-D cross product `(o − b) × (a − b)`.
///
/// Its sign tells which side of the directed line `b → a` the point `o`
/// lies on; zero means collinear.
pub fn sign(o: &Point, a: &Point, b: &Point) -> f64 {
    (o.x - b.x) * (a.y - b.y) - (a.x - b.x) * (o.y - b.y)
}

/// `true` when every value is strictly negative or every value is strictly
/// positive.
fn strictly_same_side(signs: &[f64]) -> bool {
    signs.iter().all(|s| *s < 0.0) || signs.iter().all(|s| *s > 0.0)
}

/// Strict point-in-triangle test.
///
/// A clockwise triangle yields three negative edge signs for interior points,
/// a counter-clockwise one three positive signs; either winding is accepted.
pub fn point_in_triangle(p: &Point, t0: &Point, t1: &Point, t2: &Point) -> bool {
    strictly_same_side(&[sign(p, t0, t1), sign(p, t1, t2), sign(p, t2, t0)])
}

/// Strict point-in-quadrilateral test.
///
/// The quadrilateral is split along the `q0–q2` diagonal into `(q0, q1, q2)`
/// and `(q0, q2, q3)`.  Points on the open shared diagonal are interior to
/// the quadrilateral even though they lie on a boundary of both triangles, so
/// they are accepted when they are strictly inside all four outer edges.
///
/// `quad` must be listed in a consistent winding (hull order); that is not
/// checked.
pub fn point_in_quadrilateral(p: &Point, quad: &[Point; 4]) -> bool {
    let [q0, q1, q2, q3] = quad;
    if point_in_triangle(p, q0, q1, q2) || point_in_triangle(p, q0, q2, q3) {
        return true;
    }
    sign(p, q2, q0) == 0.0
        && strictly_same_side(&[sign(p, q0, q1), sign(p, q1, q2), sign(p, q2, q3), sign(p, q3, q0)])
}

/// Containment in a triangle (3 points) or quadrilateral (4 points).
pub fn point_in_region(p: &Point, region: &[Point]) -> Result<bool, LocalizationError> {
    match region {
        [t0, t1, t2] => Ok(point_in_triangle(p, t0, t1, t2)),
        [q0, q1, q2, q3] => Ok(point_in_quadrilateral(p, &[*q0, *q1, *q2, *q3])),
        _ => Err(LocalizationError::DimensionMismatch {
            operation: "point_in_region",
            left: (region.len(), 2),
            right: (4, 2),
        }),
    }
}
