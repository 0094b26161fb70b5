//! Physical constants and numeric tolerances

/// Speed of light in vacuum (m/s)
pub const SPEED_OF_LIGHT_M_S: f64 = 299_792_458.0;

/// Nanoseconds per second
pub const NANOS_PER_SECOND: f64 = 1e9;

/// Lengths below this are treated as zero (meters)
pub const GEOMETRY_EPSILON: f64 = 1e-9;

/// Relative tolerance for collinearity: the sine of the angle between the two
/// edge vectors must exceed this
pub const COLLINEARITY_TOLERANCE: f64 = 1e-6;

/// Allowed deviation of det(R) from 1 and of RᵗR from I
pub const ORTHONORMALITY_TOLERANCE: f64 = 1e-6;

/// Largest negative MDS eigenvalue accepted, as a fraction of the summed
/// eigenvalue magnitudes
pub const MDS_EIGENVALUE_TOLERANCE: f64 = 1e-2;

/// Denominators below this (ns) are treated as degenerate DS-TWR timing
pub const DS_TWR_DENOMINATOR_EPSILON: f64 = 1e-9;

/// Smallest closing speed used when estimating time to the line (m/s)
pub const MIN_CLOSING_SPEED_M_S: f64 = 1e-6;

/// WGS84 semi-major axis (meters)
pub const WGS84_SEMI_MAJOR_AXIS: f64 = 6_378_137.0;

/// WGS84 flattening
pub const WGS84_FLATTENING: f64 = 1.0 / 298.257_223_563;

/// WGS84 first eccentricity squared
pub const WGS84_ECCENTRICITY_SQUARED: f64 = WGS84_FLATTENING * (2.0 - WGS84_FLATTENING);

/// WGS84 semi-minor axis (meters)
pub const WGS84_SEMI_MINOR_AXIS: f64 = WGS84_SEMI_MAJOR_AXIS * (1.0 - WGS84_FLATTENING);
