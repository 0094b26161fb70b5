//! Error classification for the positioning core
//!
//! Every geometry and ranging operation returns `Result<T, PositioningError>`.
//! Variants carry the offending inputs so a caller can surface them without
//! re-deriving anything.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, PositioningError>;

/// Error taxonomy of the positioning core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum PositioningError {
    /// Out-of-domain scalar (negative distance, NaN, bad index...)
    #[error("invalid input for {parameter}: {value} ({reason})")]
    InvalidInput {
        parameter: String,
        value: String,
        reason: String,
    },

    /// Coincident or collinear points, zero-length line, zero baseline
    #[error("degenerate geometry ({issue}): {detail}")]
    DegenerateGeometry { issue: GeometryIssue, detail: String },

    /// Ranging timestamps whose denominator is too close to zero
    #[error("degenerate ranging timestamps: denominator {denominator_ns:e} ns")]
    DegenerateInput { denominator_ns: f64 },

    /// Pairwise distances missing for calibration
    #[error("insufficient data: {count} points, missing pairs {missing_pairs:?}")]
    InsufficientData {
        count: usize,
        missing_pairs: Vec<(usize, usize)>,
    },

    /// Distance set that cannot be embedded in Euclidean space
    #[error("inconsistent distances: eigenvalue {eigenvalue:.6} below -{tolerance:e}")]
    InconsistentDistances { eigenvalue: f64, tolerance: f64 },

    /// Resulting transform is not a proper rotation
    #[error("calibration failed: det(R) = {determinant:.9}, |RᵗR - I| = {orthogonality_error:e}")]
    CalibrationFailed {
        determinant: f64,
        orthogonality_error: f64,
    },
}

/// Types of geometric degeneracy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeometryIssue {
    /// Two points that must differ occupy the same location
    Coincident,
    /// Three points lie on one line
    Collinear,
    /// Line defined by two identical points
    ZeroLengthLine,
}

impl fmt::Display for GeometryIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GeometryIssue::Coincident => "coincident",
            GeometryIssue::Collinear => "collinear",
            GeometryIssue::ZeroLengthLine => "zero-length line",
        };
        f.write_str(name)
    }
}

/// Fieldless view of `PositioningError`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidInput,
    DegenerateGeometry,
    DegenerateInput,
    InsufficientData,
    InconsistentDistances,
    CalibrationFailed,
}

impl PositioningError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PositioningError::InvalidInput { .. } => ErrorKind::InvalidInput,
            PositioningError::DegenerateGeometry { .. } => ErrorKind::DegenerateGeometry,
            PositioningError::DegenerateInput { .. } => ErrorKind::DegenerateInput,
            PositioningError::InsufficientData { .. } => ErrorKind::InsufficientData,
            PositioningError::InconsistentDistances { .. } => ErrorKind::InconsistentDistances,
            PositioningError::CalibrationFailed { .. } => ErrorKind::CalibrationFailed,
        }
    }

    pub(crate) fn invalid(parameter: &str, value: impl fmt::Display, reason: &str) -> Self {
        PositioningError::InvalidInput {
            parameter: parameter.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn degenerate(issue: GeometryIssue, detail: impl Into<String>) -> Self {
        PositioningError::DegenerateGeometry {
            issue,
            detail: detail.into(),
        }
    }
}

/// Reject NaN/infinite scalars
pub(crate) fn ensure_finite(parameter: &str, value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(PositioningError::invalid(parameter, value, "must be finite"))
    }
}

/// Reject negative or non-finite scalars
pub(crate) fn ensure_non_negative(parameter: &str, value: f64) -> Result<f64> {
    let value = ensure_finite(parameter, value)?;
    if value < 0.0 {
        return Err(PositioningError::invalid(parameter, value, "must be >= 0"));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_mapping() {
        let err = PositioningError::invalid("distance_m", -1.0, "must be >= 0");
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let err = PositioningError::degenerate(GeometryIssue::Collinear, "points 0,1,2");
        assert_eq!(err.kind(), ErrorKind::DegenerateGeometry);

        let err = PositioningError::DegenerateInput { denominator_ns: 0.0 };
        assert_eq!(err.kind(), ErrorKind::DegenerateInput);
    }

    #[test]
    fn test_display_includes_offending_input() {
        let err = PositioningError::invalid("true_distance_m", -2.5, "must be >= 0");
        let message = err.to_string();
        assert!(message.contains("true_distance_m"));
        assert!(message.contains("-2.5"));

        let err = PositioningError::InsufficientData {
            count: 3,
            missing_pairs: vec![(1, 2)],
        };
        assert!(err.to_string().contains("(1, 2)"));
    }

    #[test]
    fn test_scalar_guards() {
        assert_eq!(ensure_non_negative("d", 0.0), Ok(0.0));
        assert!(ensure_non_negative("d", -0.1).is_err());
        assert!(ensure_non_negative("d", f64::NAN).is_err());
        assert!(ensure_finite("d", f64::INFINITY).is_err());
        assert_eq!(ensure_finite("d", -3.0), Ok(-3.0));
    }

    #[test]
    fn test_error_serializes() {
        let err = PositioningError::CalibrationFailed {
            determinant: -1.0,
            orthogonality_error: 0.0,
        };
        let json = serde_json::to_string(&err).unwrap();
        let back: PositioningError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }
}
