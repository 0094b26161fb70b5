//! Tag position recovery from range measurements
//!
//! The primary solver intersects two circles around two anchors in the plane.
//! Three-sphere intersection and planar least squares cover setups with more
//! anchors.

use crate::core::{NodeId, Point2, Point3, RangeSample, ReferencePoint, GEOMETRY_EPSILON};
use crate::validation::error::{ensure_non_negative, GeometryIssue, PositioningError, Result};
use nalgebra::{DMatrix, DVector, Vector2, Vector3};
use serde::{Deserialize, Serialize};

/// Which of the two circle-intersection roots to return
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SidePreference {
    /// Root on the left-hand side of A→B (positive signed distance)
    Positive,
    /// Root on the right-hand side of A→B
    Negative,
    /// Root closest to a previously known position
    Nearest(Point2),
}

impl Default for SidePreference {
    fn default() -> Self {
        SidePreference::Positive
    }
}

/// Trilateration solvers
pub struct Trilateration;

impl Trilateration {
    /// Intersect the circles of radius `dist_a` around `anchor_a` and `dist_b` around `anchor_b`
    ///
    /// Works in a frame where A is the origin and B lies on the positive x-axis:
    /// `x = (d₁² − d₂² + d²) / 2d`, `y = ±√(d₁² − x²)`. When the circles do not
    /// intersect because of measurement noise, the negative discriminant is
    /// clamped to zero and the closest point on the baseline is returned.
    pub fn solve(
        anchor_a: Point2,
        anchor_b: Point2,
        dist_a: f64,
        dist_b: f64,
        side_preference: SidePreference,
    ) -> Result<Point2> {
        let dist_a = ensure_non_negative("dist_a", dist_a)?;
        let dist_b = ensure_non_negative("dist_b", dist_b)?;

        let baseline = anchor_b - anchor_a;
        let d = baseline.norm();
        if !d.is_finite() || d < GEOMETRY_EPSILON {
            return Err(PositioningError::degenerate(
                GeometryIssue::Coincident,
                format!("anchors at {} and {} coincide", anchor_a, anchor_b),
            ));
        }

        let ux = baseline / d;
        let x = (dist_a * dist_a - dist_b * dist_b + d * d) / (2.0 * d);
        let discriminant = dist_a * dist_a - x * x;
        let y = discriminant.max(0.0).sqrt();

        // Perpendicular pointing to the left of A→B
        let uy = Vector2::new(-ux.y, ux.x);
        let positive = anchor_a + ux * x + uy * y;
        let negative = anchor_a + ux * x - uy * y;

        Ok(match side_preference {
            SidePreference::Positive => positive,
            SidePreference::Negative => negative,
            SidePreference::Nearest(previous) => {
                if (positive - previous).norm_squared() <= (negative - previous).norm_squared() {
                    positive
                } else {
                    negative
                }
            }
        })
    }

    /// Solve from the two lowest-id anchors that have a range sample to `tag`
    pub fn estimate(
        anchors: &[ReferencePoint],
        ranges: &[RangeSample],
        tag: NodeId,
        side_preference: SidePreference,
    ) -> Result<Point2> {
        let mut matched = Self::match_ranges(anchors, ranges, tag);
        if matched.len() < 2 {
            return Err(PositioningError::invalid(
                "ranges",
                matched.len(),
                "need range samples to at least two known anchors",
            ));
        }
        matched.sort_by_key(|(anchor, _)| anchor.id);

        let (anchor_a, range_a) = matched[0];
        let (anchor_b, range_b) = matched[1];
        Self::solve(
            anchor_a.planar(),
            anchor_b.planar(),
            range_a.distance_m,
            range_b.distance_m,
            side_preference,
        )
    }

    /// Intersect three spheres
    ///
    /// Returns the root on the positive side of the plane through the anchors
    /// (normal `(p2−p1) × (p3−p1)`). If the spheres do not meet, the negative
    /// height is clamped and the in-plane solution is returned.
    pub fn solve_spheres(anchors: [Point3; 3], distances: [f64; 3]) -> Result<Point3> {
        for (i, d) in distances.iter().enumerate() {
            ensure_non_negative(&format!("distances[{}]", i), *d)?;
        }
        let [p1, p2, p3] = anchors;
        let [r1, r2, r3] = distances;

        let v12 = p2 - p1;
        let d = v12.norm();
        if d < GEOMETRY_EPSILON {
            return Err(PositioningError::degenerate(
                GeometryIssue::Coincident,
                "first two anchors coincide",
            ));
        }
        let ex = v12 / d;

        let v13 = p3 - p1;
        let i = ex.dot(&v13);
        let ey_raw = v13 - ex * i;
        let j = ey_raw.norm();
        if j < GEOMETRY_EPSILON {
            return Err(PositioningError::degenerate(
                GeometryIssue::Collinear,
                "three anchors lie on one line",
            ));
        }
        let ey = ey_raw / j;
        let ez = ex.cross(&ey);

        let x = (r1 * r1 - r2 * r2 + d * d) / (2.0 * d);
        let y = (r1 * r1 - r3 * r3 + i * i + j * j) / (2.0 * j) - (i / j) * x;
        let z = (r1 * r1 - x * x - y * y).max(0.0).sqrt();

        Ok(p1 + ex * x + ey * y + ez * z)
    }

    /// Planar weighted least squares for three or more anchors
    ///
    /// Linearizes the range equations against the first anchor. Samples with a
    /// positive variance are weighted by its inverse; others get unit weight.
    pub fn least_squares(anchors: &[ReferencePoint], ranges: &[RangeSample], tag: NodeId) -> Result<Point2> {
        let matched = Self::match_ranges(anchors, ranges, tag);
        let n = matched.len();
        if n < 3 {
            return Err(PositioningError::invalid(
                "ranges",
                n,
                "least squares needs range samples to at least three anchors",
            ));
        }

        let (ref_anchor, ref_range) = matched[0];
        let p1 = ref_anchor.planar();
        let r1 = ensure_non_negative("distance_m", ref_range.distance_m)?;

        let mut a_matrix = DMatrix::zeros(n - 1, 2);
        let mut b_vector = DVector::zeros(n - 1);
        let mut weights = DVector::zeros(n - 1);

        for (row, (anchor, range)) in matched.iter().skip(1).enumerate() {
            let pi = anchor.planar();
            let ri = ensure_non_negative("distance_m", range.distance_m)?;

            a_matrix[(row, 0)] = 2.0 * (pi.x - p1.x);
            a_matrix[(row, 1)] = 2.0 * (pi.y - p1.y);
            b_vector[row] = r1 * r1 - ri * ri + pi.x * pi.x - p1.x * p1.x + pi.y * pi.y - p1.y * p1.y;
            weights[row] = match range.variance_m2 {
                Some(v) if v > 0.0 => 1.0 / v,
                _ => 1.0,
            };
        }

        let weight_matrix = DMatrix::from_diagonal(&weights);
        let at_w = a_matrix.transpose() * weight_matrix;
        let normal = &at_w * &a_matrix;
        let rhs = &at_w * &b_vector;

        let solution = normal.try_inverse().map(|inv| inv * rhs).ok_or_else(|| {
            PositioningError::degenerate(GeometryIssue::Collinear, "anchors do not span the plane")
        })?;

        Ok(Point2::new(solution[0], solution[1]))
    }

    /// Pair each range sample to `tag` with its anchor, in anchor order
    fn match_ranges<'a>(
        anchors: &'a [ReferencePoint],
        ranges: &'a [RangeSample],
        tag: NodeId,
    ) -> Vec<(&'a ReferencePoint, &'a RangeSample)> {
        anchors
            .iter()
            .filter_map(|anchor| {
                ranges
                    .iter()
                    .find(|r| r.link.involves(tag) && r.link.other(tag) == Some(anchor.id))
                    .map(|r| (anchor, r))
            })
            .collect()
    }
}

/// Lift a planar solution to 3-D at the mean anchor height
pub fn lift_to_anchor_plane(point: Point2, anchors: &[ReferencePoint]) -> Point3 {
    let z = if anchors.is_empty() {
        0.0
    } else {
        anchors.iter().map(|a| a.position.z).sum::<f64>() / anchors.len() as f64
    };
    Point3::from(Vector3::new(point.x, point.y, z))
}
