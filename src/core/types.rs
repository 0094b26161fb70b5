//! Core data types for the positioning core
//!
//! Points are nalgebra points in meters. Every record here is a plain value:
//! it is created once and never mutated in place afterwards.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Planar position (meters)
pub type Point2 = nalgebra::Point2<f64>;

/// Spatial position (meters)
pub type Point3 = nalgebra::Point3<f64>;

/// Identifier of a fixed beacon or of the tag
pub type NodeId = u16;

/// Fixed beacon with a known (or calibrated) position in the local ranging frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferencePoint {
    pub id: NodeId,
    /// Human-readable label ("A", "B", ...)
    #[serde(default)]
    pub label: String,
    pub position: Point3,
}

impl ReferencePoint {
    pub fn new(id: NodeId, position: Point3) -> Self {
        Self {
            id,
            label: String::new(),
            position,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Position projected onto the horizontal plane
    pub fn planar(&self) -> Point2 {
        Point2::new(self.position.x, self.position.y)
    }
}

/// The two endpoints of one ranging exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RangeLink {
    pub from: NodeId,
    pub to: NodeId,
}

impl RangeLink {
    pub fn new(from: NodeId, to: NodeId) -> Self {
        Self { from, to }
    }

    /// True if either endpoint is `id`
    pub fn involves(&self, id: NodeId) -> bool {
        self.from == id || self.to == id
    }

    /// The endpoint that is not `id`, if `id` is part of this link
    pub fn other(&self, id: NodeId) -> Option<NodeId> {
        if self.from == id {
            Some(self.to)
        } else if self.to == id {
            Some(self.from)
        } else {
            None
        }
    }
}

/// One range measurement between two endpoints
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangeSample {
    pub link: RangeLink,
    /// Non-negative, finite distance (meters)
    pub distance_m: f64,
    /// Variance estimate of `distance_m` (m²)
    pub variance_m2: Option<f64>,
}

impl RangeSample {
    pub fn new(link: RangeLink, distance_m: f64) -> Self {
        Self {
            link,
            distance_m,
            variance_m2: None,
        }
    }

    pub fn with_variance(mut self, variance_m2: f64) -> Self {
        self.variance_m2 = Some(variance_m2);
        self
    }
}

/// Tag position at one update tick, in the local ranging frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TagSample {
    /// Monotonic timestamp (nanoseconds)
    pub timestamp_ns: u64,
    pub position: Point3,
    /// Velocity (m/s), when the source knows it
    pub velocity: Option<Vector3<f64>>,
}

impl TagSample {
    pub fn new(timestamp_ns: u64, position: Point3) -> Self {
        Self {
            timestamp_ns,
            position,
            velocity: None,
        }
    }

    pub fn with_velocity(mut self, velocity: Vector3<f64>) -> Self {
        self.velocity = Some(velocity);
        self
    }

    pub fn planar(&self) -> Point2 {
        Point2::new(self.position.x, self.position.y)
    }
}

/// Position in WGS84 geodetic coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeodeticPosition {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub altitude_m: f64,
}

impl GeodeticPosition {
    pub fn new(latitude_deg: f64, longitude_deg: f64, altitude_m: f64) -> Self {
        Self {
            latitude_deg,
            longitude_deg,
            altitude_m,
        }
    }
}

/// Reference points whose coordinates are known in both the local and the target frame
///
/// `local[i]` and `target[i]` describe the same physical beacon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSet {
    pub local: Vec<ReferencePoint>,
    pub target: Vec<Point3>,
}

impl CalibrationSet {
    pub fn new() -> Self {
        Self {
            local: Vec::new(),
            target: Vec::new(),
        }
    }

    pub fn with_pair(mut self, local: ReferencePoint, target: Point3) -> Self {
        self.local.push(local);
        self.target.push(target);
        self
    }

    pub fn len(&self) -> usize {
        self.local.len().min(self.target.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn local_points(&self) -> Vec<Point3> {
        self.local.iter().map(|p| p.position).collect()
    }
}

impl Default for CalibrationSet {
    fn default() -> Self {
        Self::new()
    }
}
