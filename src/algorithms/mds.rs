//! Relative positions of reference points from their pairwise distances
//!
//! Classical multidimensional scaling recovers the point cloud up to rotation,
//! reflection and translation. The result is then pinned to a fixed
//! convention: point 0 at the origin, point 1 on the positive x axis, point 2
//! in the upper half-plane (and, in 3-D, the first off-plane point above it).

use crate::core::{NodeId, Point3, ReferencePoint, COLLINEARITY_TOLERANCE, GEOMETRY_EPSILON, MDS_EIGENVALUE_TOLERANCE};
use crate::validation::error::{GeometryIssue, PositioningError, Result};
use nalgebra::{DMatrix, SymmetricEigen, Vector3};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Number of coordinates recovered per point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dimensions {
    /// x, y only; every recovered z is 0
    Planar,
    Spatial,
}

impl Dimensions {
    fn count(self) -> usize {
        match self {
            Dimensions::Planar => 2,
            Dimensions::Spatial => 3,
        }
    }
}

/// Self-calibration of reference points by classical MDS
#[derive(Debug, Clone)]
pub struct RelativeLocator {
    dimensions: Dimensions,
    /// Negative eigenvalues smaller in magnitude than `tolerance · Σ|λ|` are
    /// clamped to zero; larger ones reject the distance set
    eigenvalue_tolerance: f64,
}

impl Default for RelativeLocator {
    fn default() -> Self {
        Self {
            dimensions: Dimensions::Spatial,
            eigenvalue_tolerance: MDS_EIGENVALUE_TOLERANCE,
        }
    }
}

impl RelativeLocator {
    pub fn new(dimensions: Dimensions) -> Self {
        Self {
            dimensions,
            ..Self::default()
        }
    }

    pub fn with_tolerance(mut self, eigenvalue_tolerance: f64) -> Self {
        self.eigenvalue_tolerance = eigenvalue_tolerance;
        self
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    /// Recover `count` point positions from pairwise distances
    ///
    /// Keys are point indices `(i, j)` with `i != j`, both below `count`.
    /// Either orientation of a pair may be given; if both are, their mean is
    /// used. Every unordered pair must be present.
    pub fn locate(&self, distances: &HashMap<(usize, usize), f64>, count: usize) -> Result<Vec<Point3>> {
        if count < 2 {
            return Err(PositioningError::invalid("count", count, "at least two points are required"));
        }

        let squared = Self::squared_distance_matrix(distances, count)?;
        let gram = Self::double_center(&squared);
        let mut points = self.embed(gram, count)?;
        self.canonicalize(&mut points)?;
        Ok(points)
    }

    fn squared_distance_matrix(distances: &HashMap<(usize, usize), f64>, count: usize) -> Result<DMatrix<f64>> {
        let mut sums = DMatrix::<f64>::zeros(count, count);
        let mut seen = DMatrix::<u32>::zeros(count, count);

        for (&(i, j), &distance) in distances {
            if i >= count || j >= count {
                return Err(PositioningError::invalid(
                    "pair",
                    format!("({}, {})", i, j),
                    "point index out of range",
                ));
            }
            if i == j {
                return Err(PositioningError::invalid("pair", format!("({}, {})", i, j), "self-distance"));
            }
            if !distance.is_finite() || distance < 0.0 {
                return Err(PositioningError::invalid(
                    &format!("distance ({}, {})", i, j),
                    distance,
                    "must be finite and >= 0",
                ));
            }
            let (lo, hi) = (i.min(j), i.max(j));
            sums[(lo, hi)] += distance;
            seen[(lo, hi)] += 1;
        }

        let missing_pairs: Vec<(usize, usize)> = (0..count)
            .flat_map(|i| ((i + 1)..count).map(move |j| (i, j)))
            .filter(|&(i, j)| seen[(i, j)] == 0)
            .collect();
        if !missing_pairs.is_empty() {
            return Err(PositioningError::InsufficientData { count, missing_pairs });
        }

        let mut squared = DMatrix::<f64>::zeros(count, count);
        for i in 0..count {
            for j in (i + 1)..count {
                let d = sums[(i, j)] / seen[(i, j)] as f64;
                squared[(i, j)] = d * d;
                squared[(j, i)] = d * d;
            }
        }
        Ok(squared)
    }

    /// B = −½ · J · D² · J with J = I − 11ᵗ/n
    fn double_center(squared: &DMatrix<f64>) -> DMatrix<f64> {
        let n = squared.nrows();
        let centering = DMatrix::<f64>::identity(n, n) - DMatrix::<f64>::from_element(n, n, 1.0 / n as f64);
        let gram = &centering * squared * &centering * -0.5;
        // Remove asymmetry introduced by rounding before the symmetric solver
        (&gram + gram.transpose()) * 0.5
    }

    fn embed(&self, gram: DMatrix<f64>, count: usize) -> Result<Vec<Point3>> {
        let eigen = SymmetricEigen::new(gram);
        let mut order: Vec<usize> = (0..count).collect();
        order.sort_by(|&a, &b| {
            eigen.eigenvalues[b]
                .partial_cmp(&eigen.eigenvalues[a])
                .unwrap_or(Ordering::Equal)
        });

        // Scale is the total spectral mass, so the threshold grows with the
        // point spread and centimetre noise on long baselines is clamped
        let scale = eigen.eigenvalues.iter().map(|v| v.abs()).sum::<f64>().max(GEOMETRY_EPSILON);
        let threshold = self.eigenvalue_tolerance * scale;
        if let Some(&most_negative) = order.last().map(|&k| &eigen.eigenvalues[k]) {
            if most_negative < -threshold {
                return Err(PositioningError::InconsistentDistances {
                    eigenvalue: most_negative,
                    tolerance: threshold,
                });
            }
        }

        let mut points = vec![Point3::origin(); count];
        for (axis, &k) in order.iter().take(self.dimensions.count()).enumerate() {
            let weight = eigen.eigenvalues[k].max(0.0).sqrt();
            let column = eigen.eigenvectors.column(k);
            for (i, point) in points.iter_mut().enumerate() {
                point[axis] = column[i] * weight;
            }
        }
        Ok(points)
    }

    fn canonicalize(&self, points: &mut [Point3]) -> Result<()> {
        let origin = points[0].coords;
        let offsets: Vec<Vector3<f64>> = points.iter().map(|p| p.coords - origin).collect();

        let n1 = offsets[1].norm();
        if n1 < GEOMETRY_EPSILON {
            return Err(PositioningError::degenerate(
                GeometryIssue::Coincident,
                "points 0 and 1 coincide; the primary axis is undefined",
            ));
        }
        let x = offsets[1] / n1;

        // First point with a component off the primary axis fixes the secondary axis
        let y = offsets
            .iter()
            .skip(2)
            .map(|v| v - x * x.dot(v))
            .find(|w| w.norm() > GEOMETRY_EPSILON.max(COLLINEARITY_TOLERANCE * n1))
            .map(|w| w.normalize())
            .unwrap_or_else(|| {
                let helper = if x.z.abs() < 0.9 { Vector3::z() } else { Vector3::x() };
                helper.cross(&x).normalize()
            });
        let z = x.cross(&y);

        let mut canonical: Vec<Point3> = offsets
            .iter()
            .map(|v| Point3::new(x.dot(v), y.dot(v), z.dot(v)))
            .collect();

        match self.dimensions {
            Dimensions::Planar => canonical.iter_mut().for_each(|p| p.z = 0.0),
            Dimensions::Spatial => {
                let off_plane = canonical
                    .iter()
                    .skip(2)
                    .map(|p| p.z)
                    .find(|z| z.abs() > GEOMETRY_EPSILON.max(COLLINEARITY_TOLERANCE * n1));
                if matches!(off_plane, Some(z) if z < 0.0) {
                    canonical.iter_mut().for_each(|p| p.z = -p.z);
                }
            }
        }

        points.copy_from_slice(&canonical);
        Ok(())
    }
}

fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Repeated inter-point range measurements, reduced per pair by median
#[derive(Debug, Clone, Default)]
pub struct PairwiseDistances {
    samples: HashMap<(usize, usize), Vec<f64>>,
}

impl PairwiseDistances {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one measurement between points `i` and `j`
    ///
    /// Self-pairs and non-positive or non-finite distances are dropped.
    /// Returns whether the measurement was kept.
    pub fn add(&mut self, i: usize, j: usize, distance_m: f64) -> bool {
        if i == j || !distance_m.is_finite() || distance_m <= 0.0 {
            log::debug!("Ignoring pairwise distance ({}, {}) = {}", i, j, distance_m);
            return false;
        }
        self.samples.entry((i.min(j), i.max(j))).or_default().push(distance_m);
        true
    }

    /// Number of measurements recorded for the unordered pair
    pub fn sample_count(&self, i: usize, j: usize) -> usize {
        self.samples.get(&(i.min(j), i.max(j))).map_or(0, Vec::len)
    }

    /// Number of distinct pairs with at least one measurement
    pub fn pair_count(&self) -> usize {
        self.samples.len()
    }

    pub fn median(&self, i: usize, j: usize) -> Option<f64> {
        self.samples.get(&(i.min(j), i.max(j))).and_then(|values| median(values))
    }

    /// Median distance for every recorded pair
    pub fn reduced(&self) -> HashMap<(usize, usize), f64> {
        self.samples
            .iter()
            .filter_map(|(&pair, values)| median(values).map(|m| (pair, m)))
            .collect()
    }

    pub fn locate(&self, locator: &RelativeLocator, count: usize) -> Result<Vec<Point3>> {
        locator.locate(&self.reduced(), count)
    }

    /// Locate and label points; index `i` in the recorded pairs is `ids[i]`
    pub fn locate_reference_points(&self, locator: &RelativeLocator, ids: &[NodeId]) -> Result<Vec<ReferencePoint>> {
        let points = self.locate(locator, ids.len())?;
        log::debug!("Located {} reference points from {} pairs", ids.len(), self.pair_count());
        Ok(ids
            .iter()
            .zip(points)
            .map(|(&id, position)| ReferencePoint::new(id, position))
            .collect())
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::error::ErrorKind;
    use approx::assert_relative_eq;

    fn distances_of(points: &[Point3]) -> HashMap<(usize, usize), f64> {
        let mut map = HashMap::new();
        for i in 0..points.len() {
            for j in (i + 1)..points.len() {
                map.insert((i, j), (points[i] - points[j]).norm());
            }
        }
        map
    }

    #[test]
    fn test_right_triangle_recovery() {
        let distances: HashMap<_, _> = [((0, 1), 3.0), ((0, 2), 4.0), ((1, 2), 5.0)].into_iter().collect();
        let points = RelativeLocator::new(Dimensions::Planar).locate(&distances, 3).unwrap();

        assert_relative_eq!(points[0], Point3::origin(), epsilon = 1e-6);
        assert_relative_eq!(points[1], Point3::new(3.0, 0.0, 0.0), epsilon = 1e-6);
        assert_relative_eq!(points[2], Point3::new(0.0, 4.0, 0.0), epsilon = 1e-6);
    }

    #[test]
    fn test_spatial_recovery_matches_canonical_input() {
        // Already in canonical orientation
        let truth = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(4.0, 0.0, 0.0),
            Point3::new(1.0, 3.0, 0.0),
            Point3::new(1.0, 1.0, 2.0),
            Point3::new(3.0, 2.0, -1.0),
        ];
        let points = RelativeLocator::new(Dimensions::Spatial)
            .locate(&distances_of(&truth), truth.len())
            .unwrap();
        for (p, t) in points.iter().zip(truth.iter()) {
            assert_relative_eq!(*p, *t, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_recovery_preserves_distances() {
        let truth = vec![
            Point3::new(12.0, -3.0, 0.0),
            Point3::new(-5.0, 8.0, 0.0),
            Point3::new(20.0, 14.0, 0.0),
            Point3::new(2.0, 25.0, 0.0),
        ];
        let distances = distances_of(&truth);
        let points = RelativeLocator::new(Dimensions::Planar).locate(&distances, 4).unwrap();

        for (&(i, j), &d) in distances.iter() {
            assert_relative_eq!((points[i] - points[j]).norm(), d, epsilon = 1e-6);
        }
        assert_relative_eq!(points[0], Point3::origin(), epsilon = 1e-9);
        assert!(points[1].x > 0.0 && points[1].y.abs() < 1e-6);
        assert!(points[2].y > 0.0);
    }

    #[test]
    fn test_both_orientations_are_averaged() {
        let distances: HashMap<_, _> = [((0, 1), 2.9), ((1, 0), 3.1), ((0, 2), 4.0), ((2, 1), 5.0)]
            .into_iter()
            .collect();
        let points = RelativeLocator::new(Dimensions::Planar).locate(&distances, 3).unwrap();
        assert_relative_eq!(points[1].x, 3.0, epsilon = 1e-6);
    }

    #[test]
    fn test_missing_pairs_reported() {
        let distances: HashMap<_, _> = [((0, 1), 3.0), ((0, 2), 4.0)].into_iter().collect();
        let err = RelativeLocator::default().locate(&distances, 3).unwrap_err();
        assert_eq!(
            err,
            PositioningError::InsufficientData {
                count: 3,
                missing_pairs: vec![(1, 2)],
            }
        );
    }

    #[test]
    fn test_invalid_inputs_rejected() {
        let locator = RelativeLocator::default();
        let one: HashMap<_, _> = [((0, 1), 1.0)].into_iter().collect();
        assert_eq!(locator.locate(&one, 1).unwrap_err().kind(), ErrorKind::InvalidInput);

        let negative: HashMap<_, _> = [((0, 1), -1.0)].into_iter().collect();
        assert_eq!(locator.locate(&negative, 2).unwrap_err().kind(), ErrorKind::InvalidInput);

        let out_of_range: HashMap<_, _> = [((0, 1), 1.0), ((0, 5), 1.0)].into_iter().collect();
        assert_eq!(locator.locate(&out_of_range, 2).unwrap_err().kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_triangle_inequality_violation_is_inconsistent() {
        let distances: HashMap<_, _> = [((0, 1), 1.0), ((0, 2), 1.0), ((1, 2), 5.0)].into_iter().collect();
        let err = RelativeLocator::new(Dimensions::Planar).locate(&distances, 3).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InconsistentDistances);
    }

    fn noisy_rectangle() -> HashMap<(usize, usize), f64> {
        let corners = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(20.0, 0.0, 0.0),
            Point3::new(20.0, 15.0, 0.0),
            Point3::new(0.0, 15.0, 0.0),
        ];
        let mut distances = distances_of(&corners);
        // 1 cm ranging error on one diagonal: no exact planar embedding exists
        *distances.get_mut(&(0, 2)).unwrap() += 0.01;
        distances
    }

    #[test]
    fn test_measurement_noise_is_clamped() {
        let distances = noisy_rectangle();
        for dimensions in [Dimensions::Planar, Dimensions::Spatial] {
            let points = RelativeLocator::new(dimensions).locate(&distances, 4).unwrap();
            for (&(i, j), &d) in &distances {
                assert!(((points[i] - points[j]).norm() - d).abs() < 0.01);
            }
            assert_relative_eq!(points[1].y, 0.0, epsilon = 1e-9);
            assert!(points[3].y > 0.0);
        }
    }

    #[test]
    fn test_tight_tolerance_rejects_noise() {
        let err = RelativeLocator::new(Dimensions::Planar)
            .with_tolerance(1e-6)
            .locate(&noisy_rectangle(), 4)
            .unwrap_err();
        match err {
            PositioningError::InconsistentDistances { eigenvalue, tolerance } => {
                assert!(eigenvalue < -0.1);
                assert!(tolerance < 1e-3);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_coincident_first_points_rejected() {
        let distances: HashMap<_, _> = [((0, 1), 0.0), ((0, 2), 4.0), ((1, 2), 4.0)].into_iter().collect();
        let err = RelativeLocator::new(Dimensions::Planar).locate(&distances, 3).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DegenerateGeometry);
    }

    #[test]
    fn test_two_points() {
        let distances: HashMap<_, _> = [((1, 0), 25.0)].into_iter().collect();
        let points = RelativeLocator::default().locate(&distances, 2).unwrap();
        assert_relative_eq!(points[1], Point3::new(25.0, 0.0, 0.0), epsilon = 1e-9);
    }

    #[test]
    fn test_pairwise_median_accumulator() {
        let mut pairs = PairwiseDistances::new();
        for d in [3.2, 2.9, 3.0, 100.0, 3.05] {
            assert!(pairs.add(0, 1, d));
        }
        assert!(!pairs.add(1, 1, 3.0));
        assert!(!pairs.add(0, 2, -4.0));
        assert!(!pairs.add(0, 2, f64::NAN));
        pairs.add(2, 0, 4.0);
        pairs.add(1, 2, 5.0);
        pairs.add(2, 1, 5.2);

        assert_eq!(pairs.sample_count(1, 0), 5);
        assert_eq!(pairs.pair_count(), 3);
        assert_eq!(pairs.median(0, 1), Some(3.05));
        assert_relative_eq!(pairs.median(1, 2).unwrap(), 5.1, epsilon = 1e-12);
        assert_eq!(pairs.median(3, 4), None);

        let anchors = pairs
            .locate_reference_points(&RelativeLocator::new(Dimensions::Planar), &[10, 11, 12])
            .unwrap();
        assert_eq!(anchors[2].id, 12);
        assert_relative_eq!(anchors[1].position.x, 3.05, epsilon = 1e-6);
        assert!(anchors[2].position.y > 0.0);

        pairs.clear();
        assert_eq!(pairs.pair_count(), 0);
    }
}
