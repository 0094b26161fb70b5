//! Core positioning algorithms

pub mod frame_alignment;
pub mod geodetic;
pub mod line_geometry;
pub mod mds;
pub mod ranging;
pub mod trilateration;

pub use frame_alignment::{Calibration, FrameAligner, FrameTransform, GeodeticAlignment, TransformHandle};
pub use geodetic::{CoordinateValidator, LocalTangentPlane};
pub use line_geometry::{CrossingDirection, LineCrossing, LineCrossingDetector, Side};
pub use mds::{Dimensions, PairwiseDistances, RelativeLocator};
pub use ranging::{DsTwrTimestamps, RangingModel, SimulatedExchange};
pub use trilateration::{SidePreference, Trilateration};
