//! WGS84 geodetic coordinates and the local East-North-Up tangent plane
//!
//! Geodetic input is in degrees; all internal math uses radians. Alignment
//! math never runs on angular coordinates: geodetic points are first
//! linearized into a tangent plane anchored at a reference position.

use crate::core::{
    GeodeticPosition, Point3, WGS84_ECCENTRICITY_SQUARED, WGS84_SEMI_MAJOR_AXIS, WGS84_SEMI_MINOR_AXIS,
};
use crate::validation::error::{PositioningError, Result};
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

/// Fixed number of latitude refinement steps in `ecef_to_geodetic`
const LATITUDE_ITERATIONS: usize = 10;

/// Radius of curvature in the prime vertical at `lat_rad`
fn prime_vertical_radius(lat_rad: f64) -> f64 {
    WGS84_SEMI_MAJOR_AXIS / (1.0 - WGS84_ECCENTRICITY_SQUARED * lat_rad.sin().powi(2)).sqrt()
}

/// Geodetic position to Earth-centered, Earth-fixed coordinates (meters)
pub fn geodetic_to_ecef(position: &GeodeticPosition) -> Vector3<f64> {
    let lat = position.latitude_deg.to_radians();
    let lon = position.longitude_deg.to_radians();
    let n = prime_vertical_radius(lat);
    let h = position.altitude_m;

    Vector3::new(
        (n + h) * lat.cos() * lon.cos(),
        (n + h) * lat.cos() * lon.sin(),
        (n * (1.0 - WGS84_ECCENTRICITY_SQUARED) + h) * lat.sin(),
    )
}

/// Earth-centered, Earth-fixed coordinates to a geodetic position
pub fn ecef_to_geodetic(ecef: &Vector3<f64>) -> GeodeticPosition {
    let lon = ecef.y.atan2(ecef.x);
    let p = (ecef.x * ecef.x + ecef.y * ecef.y).sqrt();

    let mut lat = ecef.z.atan2(p * (1.0 - WGS84_ECCENTRICITY_SQUARED));
    for _ in 0..LATITUDE_ITERATIONS {
        let n = prime_vertical_radius(lat);
        lat = (ecef.z + WGS84_ECCENTRICITY_SQUARED * n * lat.sin()).atan2(p);
    }

    let n = prime_vertical_radius(lat);
    let altitude_m = if lat.cos().abs() > 1e-10 {
        p / lat.cos() - n
    } else {
        ecef.z.abs() - WGS84_SEMI_MINOR_AXIS
    };

    GeodeticPosition {
        latitude_deg: lat.to_degrees(),
        longitude_deg: lon.to_degrees(),
        altitude_m,
    }
}

/// Rotation taking ECEF offsets into East-North-Up at the given origin
fn ecef_to_enu_rotation(origin: &GeodeticPosition) -> Matrix3<f64> {
    let lat = origin.latitude_deg.to_radians();
    let lon = origin.longitude_deg.to_radians();
    let (sin_lat, cos_lat) = lat.sin_cos();
    let (sin_lon, cos_lon) = lon.sin_cos();

    Matrix3::new(
        -sin_lon, cos_lon, 0.0,
        -sin_lat * cos_lon, -sin_lat * sin_lon, cos_lat,
        cos_lat * cos_lon, cos_lat * sin_lon, sin_lat,
    )
}

/// East-North-Up tangent plane anchored at a geodetic origin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalTangentPlane {
    origin: GeodeticPosition,
    origin_ecef: Vector3<f64>,
    ecef_to_enu: Matrix3<f64>,
}

impl LocalTangentPlane {
    pub fn new(origin: GeodeticPosition) -> Result<Self> {
        CoordinateValidator::validate_wgs84(&origin)?;
        Ok(Self {
            origin,
            origin_ecef: geodetic_to_ecef(&origin),
            ecef_to_enu: ecef_to_enu_rotation(&origin),
        })
    }

    pub fn origin(&self) -> &GeodeticPosition {
        &self.origin
    }

    /// Geodetic position to (east, north, up) meters relative to the origin
    pub fn to_enu(&self, position: &GeodeticPosition) -> Result<Point3> {
        CoordinateValidator::validate_wgs84(position)?;
        let offset = geodetic_to_ecef(position) - self.origin_ecef;
        Ok(Point3::from(self.ecef_to_enu * offset))
    }

    /// (east, north, up) meters relative to the origin back to a geodetic position
    pub fn to_geodetic(&self, enu: &Point3) -> GeodeticPosition {
        let ecef = self.origin_ecef + self.ecef_to_enu.transpose() * enu.coords;
        ecef_to_geodetic(&ecef)
    }
}

/// Coordinate range checks applied at the geodetic boundary
pub struct CoordinateValidator;

impl CoordinateValidator {
    /// Validate WGS84 geodetic coordinates
    pub fn validate_wgs84(position: &GeodeticPosition) -> Result<()> {
        if !position.latitude_deg.is_finite() || position.latitude_deg < -90.0 || position.latitude_deg > 90.0 {
            return Err(PositioningError::invalid(
                "latitude_deg",
                position.latitude_deg,
                "must be between -90 and 90 degrees",
            ));
        }

        if !position.longitude_deg.is_finite() || position.longitude_deg < -180.0 || position.longitude_deg > 180.0 {
            return Err(PositioningError::invalid(
                "longitude_deg",
                position.longitude_deg,
                "must be between -180 and 180 degrees",
            ));
        }

        if !position.altitude_m.is_finite() {
            return Err(PositioningError::invalid("altitude_m", position.altitude_m, "must be finite"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::error::ErrorKind;
    use approx::assert_relative_eq;

    #[test]
    fn test_ecef_equator_prime_meridian() {
        let ecef = geodetic_to_ecef(&GeodeticPosition::new(0.0, 0.0, 0.0));
        assert_relative_eq!(ecef.x, WGS84_SEMI_MAJOR_AXIS, epsilon = 1e-6);
        assert_relative_eq!(ecef.y, 0.0, epsilon = 1e-6);
        assert_relative_eq!(ecef.z, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_ecef_round_trip() {
        let positions = [
            GeodeticPosition::new(37.7749, -122.4194, 12.0),
            GeodeticPosition::new(-33.8688, 151.2093, 58.0),
            GeodeticPosition::new(60.1699, 24.9384, -3.5),
        ];
        for position in positions.iter() {
            let back = ecef_to_geodetic(&geodetic_to_ecef(position));
            assert_relative_eq!(back.latitude_deg, position.latitude_deg, epsilon = 1e-9);
            assert_relative_eq!(back.longitude_deg, position.longitude_deg, epsilon = 1e-9);
            assert_relative_eq!(back.altitude_m, position.altitude_m, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_enu_axes() {
        let plane = LocalTangentPlane::new(GeodeticPosition::new(0.0, 0.0, 0.0)).unwrap();

        // ~111 m north and east
        let north = plane.to_enu(&GeodeticPosition::new(0.001, 0.0, 0.0)).unwrap();
        assert!((north.y - 110.57).abs() < 0.5, "north {}", north.y);
        assert!(north.x.abs() < 1e-6);

        let east = plane.to_enu(&GeodeticPosition::new(0.0, 0.001, 0.0)).unwrap();
        assert!((east.x - 111.32).abs() < 0.5, "east {}", east.x);
        assert!(east.y.abs() < 1e-6);

        let up = plane.to_enu(&GeodeticPosition::new(0.0, 0.0, 10.0)).unwrap();
        assert_relative_eq!(up.z, 10.0, epsilon = 1e-6);
    }

    #[test]
    fn test_enu_round_trip() {
        let plane = LocalTangentPlane::new(GeodeticPosition::new(47.3769, 8.5417, 408.0)).unwrap();
        let target = GeodeticPosition::new(47.3775, 8.5430, 410.5);
        let enu = plane.to_enu(&target).unwrap();
        let back = plane.to_geodetic(&enu);
        assert_relative_eq!(back.latitude_deg, target.latitude_deg, epsilon = 1e-10);
        assert_relative_eq!(back.longitude_deg, target.longitude_deg, epsilon = 1e-10);
        assert_relative_eq!(back.altitude_m, target.altitude_m, epsilon = 1e-5);

        let origin = plane.to_enu(plane.origin()).unwrap();
        assert_relative_eq!(origin.coords.norm(), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_coordinate_validation() {
        assert!(CoordinateValidator::validate_wgs84(&GeodeticPosition::new(37.7, -122.4, 100.0)).is_ok());

        let err = CoordinateValidator::validate_wgs84(&GeodeticPosition::new(91.0, 0.0, 0.0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(CoordinateValidator::validate_wgs84(&GeodeticPosition::new(0.0, 181.0, 0.0)).is_err());
        assert!(CoordinateValidator::validate_wgs84(&GeodeticPosition::new(0.0, 0.0, f64::NAN)).is_err());
        assert!(LocalTangentPlane::new(GeodeticPosition::new(f64::NAN, 0.0, 0.0)).is_err());
    }
}
