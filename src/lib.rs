//! UWB Line Tracker
//!
//! Positioning core for a regatta start line: two-way-ranging distance
//! model, two-anchor trilateration, signed distance and crossing detection
//! against the line between two anchors, rigid alignment of the local
//! ranging frame with a surveyed frame, and anchor self-calibration from
//! pairwise distances.

pub mod core;
pub mod algorithms;
pub mod processing;
pub mod validation;
pub mod utils;

// Re-export commonly used types
pub use core::{
    CalibrationSet, GeodeticPosition, NodeId, Point2, Point3, RangeLink, RangeSample, ReferencePoint, TagSample,
    SPEED_OF_LIGHT_M_S,
};
pub use algorithms::frame_alignment::{Calibration, FrameAligner, FrameTransform, GeodeticAlignment, TransformHandle};
pub use algorithms::line_geometry::{LineCrossing, LineCrossingDetector, Side};
pub use algorithms::mds::{Dimensions, PairwiseDistances, RelativeLocator};
pub use algorithms::ranging::RangingModel;
pub use algorithms::trilateration::{SidePreference, Trilateration};
pub use processing::{FrameParser, LineTracker, RegattaSimulator, TrackerUpdate};
pub use utils::TrackerConfig;
pub use validation::{ErrorKind, PositioningError, Result};
