//! Rigid-body alignment between the local ranging frame and a target frame
//!
//! Three corresponding points define an orthonormal basis in each frame; the
//! rotation maps one basis onto the other. More than three points use an
//! SVD-based least-squares fit. A `FrameTransform` is immutable once built;
//! recalibration installs a new one through a `TransformHandle`.

use crate::algorithms::geodetic::LocalTangentPlane;
use crate::core::{
    CalibrationSet, GeodeticPosition, Point3, COLLINEARITY_TOLERANCE, GEOMETRY_EPSILON, ORTHONORMALITY_TOLERANCE,
};
use crate::validation::error::{GeometryIssue, PositioningError, Result};
use nalgebra::{Matrix3, Vector3};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Rotation and translation mapping local-frame points into the target frame
///
/// `target = R · local + t`, with R orthonormal and det(R) = +1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTransform")]
pub struct FrameTransform {
    rotation: Matrix3<f64>,
    translation: Vector3<f64>,
}

#[derive(Deserialize)]
struct RawTransform {
    rotation: Matrix3<f64>,
    translation: Vector3<f64>,
}

impl TryFrom<RawTransform> for FrameTransform {
    type Error = PositioningError;

    fn try_from(raw: RawTransform) -> Result<Self> {
        FrameTransform::new(raw.rotation, raw.translation)
    }
}

impl FrameTransform {
    /// Build a transform, rejecting anything that is not a proper rotation
    pub fn new(rotation: Matrix3<f64>, translation: Vector3<f64>) -> Result<Self> {
        Self::with_tolerance(rotation, translation, ORTHONORMALITY_TOLERANCE)
    }

    pub fn with_tolerance(rotation: Matrix3<f64>, translation: Vector3<f64>, tolerance: f64) -> Result<Self> {
        if rotation.iter().chain(translation.iter()).any(|v| !v.is_finite()) {
            return Err(PositioningError::CalibrationFailed {
                determinant: f64::NAN,
                orthogonality_error: f64::NAN,
            });
        }

        let determinant = rotation.determinant();
        let orthogonality_error = (rotation.transpose() * rotation - Matrix3::identity()).norm();
        if (determinant - 1.0).abs() >= tolerance || orthogonality_error >= tolerance {
            return Err(PositioningError::CalibrationFailed {
                determinant,
                orthogonality_error,
            });
        }

        Ok(Self { rotation, translation })
    }

    pub fn identity() -> Self {
        Self {
            rotation: Matrix3::identity(),
            translation: Vector3::zeros(),
        }
    }

    pub fn rotation(&self) -> &Matrix3<f64> {
        &self.rotation
    }

    pub fn translation(&self) -> &Vector3<f64> {
        &self.translation
    }

    /// Map a local-frame point into the target frame
    pub fn apply(&self, local: &Point3) -> Point3 {
        Point3::from(self.rotation * local.coords + self.translation)
    }

    /// Rotate a direction (velocity, offset); translation does not apply
    pub fn apply_vector(&self, local: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * local
    }

    /// Transform mapping target-frame points back into the local frame
    pub fn inverse(&self) -> Self {
        let rotation = self.rotation.transpose();
        Self {
            translation: -(rotation * self.translation),
            rotation,
        }
    }

    /// `self` applied after `first`
    pub fn compose(&self, first: &FrameTransform) -> Self {
        Self {
            rotation: self.rotation * first.rotation,
            translation: self.rotation * first.translation + self.translation,
        }
    }

    /// Absolute deviation of det(R) from 1
    pub fn determinant_error(&self) -> f64 {
        (self.rotation.determinant() - 1.0).abs()
    }

    /// Frobenius norm of RᵗR − I
    pub fn orthogonality_error(&self) -> f64 {
        (self.rotation.transpose() * self.rotation - Matrix3::identity()).norm()
    }
}

/// Computes frame transforms from corresponding point sets
#[derive(Debug, Clone)]
pub struct FrameAligner {
    /// Tolerance for the det(R) and RᵗR checks
    pub orthonormality_tolerance: f64,
    /// Minimum sine of the angle between the basis edges
    pub collinearity_tolerance: f64,
}

impl Default for FrameAligner {
    fn default() -> Self {
        Self {
            orthonormality_tolerance: ORTHONORMALITY_TOLERANCE,
            collinearity_tolerance: COLLINEARITY_TOLERANCE,
        }
    }
}

impl FrameAligner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tolerances(orthonormality_tolerance: f64, collinearity_tolerance: f64) -> Self {
        Self {
            orthonormality_tolerance,
            collinearity_tolerance,
        }
    }

    /// Align three corresponding points: `target_points[i] ≈ R · local_points[i] + t`
    pub fn align(&self, local_points: &[Point3; 3], target_points: &[Point3; 3]) -> Result<FrameTransform> {
        let u = self.basis(local_points, "local")?;
        let e = self.basis(target_points, "target")?;

        let rotation = e * u.transpose();
        let translation = target_points[0].coords - rotation * local_points[0].coords;

        FrameTransform::with_tolerance(rotation, translation, self.orthonormality_tolerance)
    }

    /// Align a calibration set of three or more pairs
    ///
    /// Exactly three pairs use the basis construction of `align`; more pairs
    /// use a least-squares fit (Kabsch) over all of them.
    pub fn align_set(&self, set: &CalibrationSet) -> Result<FrameTransform> {
        if set.local.len() != set.target.len() {
            return Err(PositioningError::invalid(
                "calibration_set",
                format!("{} local / {} target", set.local.len(), set.target.len()),
                "local and target point counts differ",
            ));
        }
        let local = set.local_points();
        match local.len() {
            0..=2 => Err(PositioningError::invalid(
                "calibration_set",
                local.len(),
                "at least three reference points are required",
            )),
            3 => self.align(&[local[0], local[1], local[2]], &[set.target[0], set.target[1], set.target[2]]),
            _ => self.align_least_squares(&local, &set.target),
        }
    }

    /// Root-mean-square distance between transformed local points and their targets
    pub fn residual_rms(transform: &FrameTransform, local: &[Point3], target: &[Point3]) -> f64 {
        let n = local.len().min(target.len());
        if n == 0 {
            return 0.0;
        }
        let sum: f64 = local
            .iter()
            .zip(target.iter())
            .map(|(l, t)| (transform.apply(l) - *t).norm_squared())
            .sum();
        (sum / n as f64).sqrt()
    }

    /// Align with a geodetic target frame
    ///
    /// Target points are projected into the tangent plane anchored at
    /// `target_points[0]`; the resulting alignment reports geodetic positions
    /// through the inverse projection.
    pub fn align_geodetic(
        &self,
        local_points: &[Point3; 3],
        target_points: &[GeodeticPosition; 3],
    ) -> Result<GeodeticAlignment> {
        let plane = LocalTangentPlane::new(target_points[0])?;
        let enu = [
            plane.to_enu(&target_points[0])?,
            plane.to_enu(&target_points[1])?,
            plane.to_enu(&target_points[2])?,
        ];
        let transform = self.align(local_points, &enu)?;
        Ok(GeodeticAlignment { transform, plane })
    }

    /// Orthonormal basis [x̂ ŷ ẑ] (as columns) of three points
    fn basis(&self, points: &[Point3; 3], frame: &str) -> Result<Matrix3<f64>> {
        let v1 = points[1] - points[0];
        let v2 = points[2] - points[0];
        let (n1, n2) = (v1.norm(), v2.norm());
        if n1 < GEOMETRY_EPSILON || n2 < GEOMETRY_EPSILON {
            return Err(PositioningError::degenerate(
                GeometryIssue::Coincident,
                format!("{} reference points coincide", frame),
            ));
        }

        // Checked before normalizing so the division below is safe
        let normal = v1.cross(&v2);
        if normal.norm() <= self.collinearity_tolerance * n1 * n2 {
            return Err(PositioningError::degenerate(
                GeometryIssue::Collinear,
                format!(
                    "{} reference points {}, {}, {} are collinear",
                    frame, points[0], points[1], points[2]
                ),
            ));
        }

        let x = v1 / n1;
        let z = normal.normalize();
        let y = z.cross(&x);
        Ok(Matrix3::from_columns(&[x, y, z]))
    }

    fn align_least_squares(&self, local: &[Point3], target: &[Point3]) -> Result<FrameTransform> {
        let n = local.len() as f64;
        let local_centroid = local.iter().fold(Vector3::zeros(), |acc, p| acc + p.coords) / n;
        let target_centroid = target.iter().fold(Vector3::zeros(), |acc, p| acc + p.coords) / n;

        // The cross-covariance has rank < 2 when every point is on one line
        let spread: Vec<Vector3<f64>> = local.iter().map(|p| p.coords - local_centroid).collect();
        let has_plane = spread.iter().any(|a| {
            spread.iter().any(|b| {
                let (na, nb) = (a.norm(), b.norm());
                na > GEOMETRY_EPSILON && nb > GEOMETRY_EPSILON && a.cross(b).norm() > self.collinearity_tolerance * na * nb
            })
        });
        if !has_plane {
            return Err(PositioningError::degenerate(
                GeometryIssue::Collinear,
                format!("all {} local reference points are collinear", local.len()),
            ));
        }

        let covariance = local
            .iter()
            .zip(target.iter())
            .fold(Matrix3::zeros(), |acc, (l, t)| {
                acc + (t.coords - target_centroid) * (l.coords - local_centroid).transpose()
            });

        let svd = covariance.svd(true, true);
        let (u, v_t) = match (svd.u, svd.v_t) {
            (Some(u), Some(v_t)) => (u, v_t),
            _ => {
                return Err(PositioningError::CalibrationFailed {
                    determinant: f64::NAN,
                    orthogonality_error: f64::NAN,
                })
            }
        };

        // Flip the weakest axis if the fit came out as a reflection
        let mut correction = Matrix3::identity();
        if (u * v_t).determinant() < 0.0 {
            correction[(2, 2)] = -1.0;
        }
        let rotation = u * correction * v_t;
        let translation = target_centroid - rotation * local_centroid;

        FrameTransform::with_tolerance(rotation, translation, self.orthonormality_tolerance)
    }
}

/// Alignment between the local frame and WGS84, through a tangent plane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeodeticAlignment {
    transform: FrameTransform,
    plane: LocalTangentPlane,
}

impl GeodeticAlignment {
    /// Local → tangent-plane (ENU) transform
    pub fn transform(&self) -> &FrameTransform {
        &self.transform
    }

    pub fn tangent_plane(&self) -> &LocalTangentPlane {
        &self.plane
    }

    /// Local point → geodetic position
    pub fn to_geodetic(&self, local: &Point3) -> GeodeticPosition {
        self.plane.to_geodetic(&self.transform.apply(local))
    }

    /// Geodetic position → local point
    pub fn to_local(&self, position: &GeodeticPosition) -> Result<Point3> {
        let enu = self.plane.to_enu(position)?;
        Ok(self.transform.inverse().apply(&enu))
    }
}

/// One installed calibration: the transform and, when the target frame is a
/// tangent plane, the plane it projects through
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    transform: FrameTransform,
    tangent_plane: Option<LocalTangentPlane>,
}

impl Calibration {
    pub fn transform(&self) -> &FrameTransform {
        &self.transform
    }

    pub fn tangent_plane(&self) -> Option<&LocalTangentPlane> {
        self.tangent_plane.as_ref()
    }

    /// Local point → target frame
    pub fn to_target(&self, local: &Point3) -> Point3 {
        self.transform.apply(local)
    }

    /// Local point → geodetic position; `None` for non-geodetic targets
    pub fn to_geodetic(&self, local: &Point3) -> Option<GeodeticPosition> {
        let plane = self.tangent_plane.as_ref()?;
        Some(plane.to_geodetic(&self.transform.apply(local)))
    }
}

impl From<FrameTransform> for Calibration {
    fn from(transform: FrameTransform) -> Self {
        Self {
            transform,
            tangent_plane: None,
        }
    }
}

impl From<GeodeticAlignment> for Calibration {
    fn from(alignment: GeodeticAlignment) -> Self {
        Self {
            transform: alignment.transform,
            tangent_plane: Some(alignment.plane),
        }
    }
}

/// Shared, swappable reference to the current calibration
///
/// Readers take an `Arc` snapshot and never observe a partially updated
/// calibration; recalibration replaces the whole snapshot, tangent plane
/// included.
#[derive(Debug, Clone, Default)]
pub struct TransformHandle {
    current: Arc<RwLock<Option<Arc<Calibration>>>>,
}

impl TransformHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_calibration(calibration: impl Into<Calibration>) -> Self {
        Self {
            current: Arc::new(RwLock::new(Some(Arc::new(calibration.into())))),
        }
    }

    /// Current snapshot, if calibrated
    pub fn load(&self) -> Option<Arc<Calibration>> {
        self.current.read().clone()
    }

    /// Install a new calibration, returning the previous one
    pub fn replace(&self, calibration: impl Into<Calibration>) -> Option<Arc<Calibration>> {
        self.install(Arc::new(calibration.into()))
    }

    /// Install an already shared snapshot
    pub fn install(&self, calibration: Arc<Calibration>) -> Option<Arc<Calibration>> {
        std::mem::replace(&mut *self.current.write(), Some(calibration))
    }

    pub fn clear(&self) -> Option<Arc<Calibration>> {
        self.current.write().take()
    }

    pub fn is_calibrated(&self) -> bool {
        self.current.read().is_some()
    }
}
