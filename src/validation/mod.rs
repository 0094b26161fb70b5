//! Error taxonomy and boundary validation

pub mod data;
pub mod error;

pub use data::{DataValidator, ValidationConfig, ValidationError, ValidationResult};
pub use error::{ErrorKind, GeometryIssue, PositioningError, Result};
