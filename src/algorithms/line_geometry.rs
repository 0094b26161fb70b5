//! Signed distance and crossing tests against the line through two reference points
//!
//! Sign convention: positive means the left-hand side of a→b, from the 2-D
//! cross product `(b − a) × (p − a)`.

use crate::core::{Point2, Point3, TagSample, GEOMETRY_EPSILON, MIN_CLOSING_SPEED_M_S, NANOS_PER_SECOND};
use crate::validation::error::{GeometryIssue, PositioningError, Result};
use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};

/// Side of a directed line a point lies on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
    On,
}

impl Side {
    pub fn from_cross(cross: f64) -> Self {
        if cross > 0.0 {
            Side::Left
        } else if cross < 0.0 {
            Side::Right
        } else {
            Side::On
        }
    }
}

/// Direction of a line crossing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrossingDirection {
    LeftToRight,
    RightToLeft,
}

/// Unnormalized cross product `(b − a) × (p − a)`
pub fn side_of(a: Point2, b: Point2, p: Point2) -> f64 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

/// Perpendicular distance of `p` from the infinite line a→b, positive on the left
pub fn signed_distance(a: Point2, b: Point2, p: Point2) -> Result<f64> {
    let length = (b - a).norm();
    if length < GEOMETRY_EPSILON {
        return Err(PositioningError::degenerate(
            GeometryIssue::ZeroLengthLine,
            format!("line endpoints {} and {} coincide", a, b),
        ));
    }
    Ok(side_of(a, b, p) / length)
}

/// True iff `previous` and `current` lie strictly on opposite sides of a→b
///
/// A sample exactly on the line does not count as a crossing.
pub fn crossed(a: Point2, b: Point2, previous: Point2, current: Point2) -> bool {
    side_of(a, b, previous) * side_of(a, b, current) < 0.0
}

/// Velocity component directed toward the line (m/s)
///
/// Positive while approaching, negative while moving away. A point on the line
/// has no approach direction and reports 0.
pub fn closing_speed(a: Point2, b: Point2, p: Point2, velocity: Vector2<f64>) -> Result<f64> {
    let distance = signed_distance(a, b, p)?;
    if distance == 0.0 {
        return Ok(0.0);
    }
    let direction = (b - a).normalize();
    let left_normal = Vector2::new(-direction.y, direction.x);
    let toward_line = left_normal * -distance.signum();
    Ok(velocity.dot(&toward_line))
}

/// Estimated time until the line is reached (seconds)
///
/// Returns `f64::INFINITY` when the closing speed is not positive.
pub fn time_to_line(distance_m: f64, closing_speed_m_s: f64) -> f64 {
    if closing_speed_m_s.is_nan() || closing_speed_m_s <= 0.0 {
        return f64::INFINITY;
    }
    distance_m.abs() / closing_speed_m_s.max(MIN_CLOSING_SPEED_M_S)
}

/// A detected crossing of the line
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LineCrossing {
    /// Timestamp of the sample that completed the crossing
    pub timestamp_ns: u64,
    /// Position of that sample
    pub position: Point3,
    pub direction: CrossingDirection,
    /// Point where the straight path between the two samples meets the line
    pub interpolated_position: Point3,
    /// Linear estimate of when that point was reached
    pub interpolated_timestamp_ns: u64,
}

/// Two-sample sliding window that reports line crossings
///
/// Samples exactly on the line do not replace the reference sample, so the
/// crossing fires once, on the first sample strictly on the other side.
#[derive(Debug, Clone)]
pub struct LineCrossingDetector {
    a: Point2,
    b: Point2,
    reference: Option<TagSample>,
    crossings: u64,
}

impl LineCrossingDetector {
    pub fn new(a: Point2, b: Point2) -> Result<Self> {
        if (b - a).norm() < GEOMETRY_EPSILON {
            return Err(PositioningError::degenerate(
                GeometryIssue::ZeroLengthLine,
                format!("line endpoints {} and {} coincide", a, b),
            ));
        }
        Ok(Self {
            a,
            b,
            reference: None,
            crossings: 0,
        })
    }

    pub fn endpoints(&self) -> (Point2, Point2) {
        (self.a, self.b)
    }

    /// Number of crossings reported so far
    pub fn crossing_count(&self) -> u64 {
        self.crossings
    }

    /// Feed the next sample; returns the crossing it completes, if any
    pub fn update(&mut self, sample: TagSample) -> Option<LineCrossing> {
        let current_side = side_of(self.a, self.b, sample.planar());
        if current_side == 0.0 {
            if self.reference.is_none() {
                self.reference = Some(sample);
            }
            return None;
        }

        let crossing = match self.reference {
            Some(previous) => {
                let previous_side = side_of(self.a, self.b, previous.planar());
                if previous_side * current_side < 0.0 {
                    Some(self.describe(&previous, previous_side, &sample, current_side))
                } else {
                    None
                }
            }
            None => None,
        };

        if crossing.is_some() {
            self.crossings += 1;
        }
        self.reference = Some(sample);
        crossing
    }

    pub fn reset(&mut self) {
        self.reference = None;
    }

    fn describe(&self, previous: &TagSample, previous_side: f64, current: &TagSample, current_side: f64) -> LineCrossing {
        // Fraction of the step at which the side function reaches zero
        let fraction = previous_side / (previous_side - current_side);
        let step: Vector3<f64> = current.position - previous.position;
        let interpolated_position = previous.position + step * fraction;

        let dt_ns = current.timestamp_ns.saturating_sub(previous.timestamp_ns) as f64;
        let interpolated_timestamp_ns = previous.timestamp_ns + (dt_ns * fraction).round() as u64;

        let direction = if previous_side > 0.0 {
            CrossingDirection::LeftToRight
        } else {
            CrossingDirection::RightToLeft
        };

        LineCrossing {
            timestamp_ns: current.timestamp_ns,
            position: current.position,
            direction,
            interpolated_position,
            interpolated_timestamp_ns,
        }
    }
}

/// Velocity differenced from two samples (m/s)
pub fn finite_difference_velocity(previous: &TagSample, current: &TagSample) -> Option<Vector3<f64>> {
    let dt_ns = current.timestamp_ns.checked_sub(previous.timestamp_ns)?;
    if dt_ns == 0 {
        return None;
    }
    let dt_s = dt_ns as f64 / NANOS_PER_SECOND;
    Some((current.position - previous.position) / dt_s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::error::ErrorKind;
    use approx::assert_relative_eq;

    fn a() -> Point2 {
        Point2::new(0.0, 0.0)
    }

    fn b() -> Point2 {
        Point2::new(10.0, 0.0)
    }

    fn sample(t_ms: u64, x: f64, y: f64) -> TagSample {
        TagSample::new(t_ms * 1_000_000, Point3::new(x, y, 0.0))
    }

    #[test]
    fn test_signed_distance() {
        assert_relative_eq!(signed_distance(a(), b(), Point2::new(5.0, 3.0)).unwrap(), 3.0);
        assert_relative_eq!(signed_distance(a(), b(), Point2::new(-4.0, -2.0)).unwrap(), -2.0);

        // Diagonal line
        let d = signed_distance(a(), Point2::new(1.0, 1.0), Point2::new(0.0, 2.0)).unwrap();
        assert_relative_eq!(d, 2f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_zero_length_line_rejected() {
        let err = signed_distance(a(), a(), Point2::new(1.0, 1.0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DegenerateGeometry);
        assert!(LineCrossingDetector::new(b(), b()).is_err());
    }

    #[test]
    fn test_side_of() {
        assert_eq!(Side::from_cross(side_of(a(), b(), Point2::new(3.0, 1.0))), Side::Left);
        assert_eq!(Side::from_cross(side_of(a(), b(), Point2::new(3.0, -1.0))), Side::Right);
        assert_eq!(Side::from_cross(side_of(a(), b(), Point2::new(3.0, 0.0))), Side::On);
    }

    #[test]
    fn test_crossed() {
        assert!(crossed(a(), b(), Point2::new(5.0, -1.0), Point2::new(5.0, 1.0)));
        assert!(!crossed(a(), b(), Point2::new(5.0, 1.0), Point2::new(5.0, 2.0)));
        // Landing exactly on the line is not a crossing yet
        assert!(!crossed(a(), b(), Point2::new(5.0, -1.0), Point2::new(5.0, 0.0)));
        assert!(!crossed(a(), b(), Point2::new(5.0, 0.0), Point2::new(5.0, 1.0)));
    }

    #[test]
    fn test_time_to_line() {
        assert_relative_eq!(time_to_line(10.0, 2.0), 5.0);
        assert_relative_eq!(time_to_line(-10.0, 2.0), 5.0);
        assert_eq!(time_to_line(10.0, 0.0), f64::INFINITY);
        assert_eq!(time_to_line(10.0, -1.0), f64::INFINITY);
        assert_eq!(time_to_line(10.0, f64::NAN), f64::INFINITY);
    }

    #[test]
    fn test_closing_speed() {
        // Below the line, moving up: approaching
        let v = closing_speed(a(), b(), Point2::new(5.0, -3.0), Vector2::new(0.0, 2.0)).unwrap();
        assert_relative_eq!(v, 2.0);
        // Above the line, moving up: receding
        let v = closing_speed(a(), b(), Point2::new(5.0, 3.0), Vector2::new(0.0, 2.0)).unwrap();
        assert_relative_eq!(v, -2.0);
        // Moving parallel
        let v = closing_speed(a(), b(), Point2::new(5.0, 3.0), Vector2::new(4.0, 0.0)).unwrap();
        assert_relative_eq!(v, 0.0);
    }

    #[test]
    fn test_detector_fires_once() {
        let mut detector = LineCrossingDetector::new(a(), b()).unwrap();
        assert!(detector.update(sample(0, 5.0, -2.0)).is_none());
        assert!(detector.update(sample(10, 5.0, -1.0)).is_none());

        let crossing = detector.update(sample(20, 5.0, 1.0)).unwrap();
        assert_eq!(crossing.direction, CrossingDirection::RightToLeft);
        assert_eq!(crossing.timestamp_ns, 20_000_000);
        assert_relative_eq!(crossing.interpolated_position, Point3::new(5.0, 0.0, 0.0), epsilon = 1e-12);
        assert_eq!(crossing.interpolated_timestamp_ns, 15_000_000);

        assert!(detector.update(sample(30, 5.0, 2.0)).is_none());
        assert_eq!(detector.crossing_count(), 1);
    }

    #[test]
    fn test_detector_on_line_sample_does_not_double_fire() {
        let mut detector = LineCrossingDetector::new(a(), b()).unwrap();
        detector.update(sample(0, 5.0, 1.0));
        // Touches the line, then continues to the other side
        assert!(detector.update(sample(10, 5.0, 0.0)).is_none());
        let crossing = detector.update(sample(20, 5.0, -1.0)).unwrap();
        assert_eq!(crossing.direction, CrossingDirection::LeftToRight);
        // Bouncing along the line afterwards
        assert!(detector.update(sample(30, 5.0, 0.0)).is_none());
        assert!(detector.update(sample(40, 5.0, -0.5)).is_none());
        assert_eq!(detector.crossing_count(), 1);
    }

    #[test]
    fn test_detector_touch_and_return() {
        let mut detector = LineCrossingDetector::new(a(), b()).unwrap();
        detector.update(sample(0, 5.0, 1.0));
        detector.update(sample(10, 5.0, 0.0));
        assert!(detector.update(sample(20, 5.0, 1.0)).is_none());
        assert_eq!(detector.crossing_count(), 0);
    }

    #[test]
    fn test_finite_difference_velocity() {
        let v = finite_difference_velocity(&sample(0, 0.0, 0.0), &sample(500, 1.0, 2.0)).unwrap();
        assert_relative_eq!(v, Vector3::new(2.0, 4.0, 0.0), epsilon = 1e-12);
        assert!(finite_difference_velocity(&sample(5, 0.0, 0.0), &sample(5, 1.0, 0.0)).is_none());
        assert!(finite_difference_velocity(&sample(6, 0.0, 0.0), &sample(5, 1.0, 0.0)).is_none());
    }
}
