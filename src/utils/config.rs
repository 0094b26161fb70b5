use crate::core::{GeodeticPosition, NodeId, Point2, Point3, ReferencePoint};
use crate::validation::data::ValidationConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Complete tracker configuration, stored as JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Fixed anchors in the local ranging frame
    pub anchors: Vec<AnchorConfig>,
    /// Which two anchors define the crossing line
    pub line: LineConfig,
    pub trilateration: TrilaterationConfig,
    pub ranging: RangingConfig,
    pub simulation: SimulationConfig,
    pub tolerances: ToleranceConfig,
    pub validation: ValidationConfig,
    /// Surveyed geodetic positions of three anchors, for global output
    pub geodetic: Vec<GeodeticAnchor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorConfig {
    pub id: NodeId,
    #[serde(default)]
    pub label: String,
    /// Local coordinates (meters)
    pub position: [f64; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineConfig {
    pub anchor_a: NodeId,
    pub anchor_b: NodeId,
}

/// Root selection when two ranges give two candidate positions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SideSelection {
    /// Left of anchor_a → anchor_b
    Positive,
    Negative,
    /// Closest to the previous estimate, `Positive` until one exists
    Nearest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrilaterationConfig {
    pub side_preference: SideSelection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RangingConfig {
    /// Gaussian noise on simulated distances (meters)
    pub noise_std_m: f64,
    /// Clock drift added to simulated time-of-flight (nanoseconds)
    pub clock_drift_ns: f64,
    /// Responder processing delay (nanoseconds)
    pub responder_delay_ns: f64,
    /// Fixed seed for reproducible runs; entropy when absent
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub tag_id: NodeId,
    pub update_rate_hz: f64,
    pub approach_speed_m_s: f64,
    /// Start distance on the approach side of the line (meters)
    pub approach_distance_m: f64,
    /// Distance held past the line before turning back (meters)
    pub crossing_to_anchor_line_m: f64,
    pub semicircle_radius_m: f64,
    pub semicircle_speed_m_s: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToleranceConfig {
    pub mds_eigenvalue_tolerance: f64,
    pub orthonormality_tolerance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeodeticAnchor {
    pub anchor_id: NodeId,
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub altitude_m: f64,
}

impl GeodeticAnchor {
    pub fn position(&self) -> GeodeticPosition {
        GeodeticPosition::new(self.latitude_deg, self.longitude_deg, self.altitude_m)
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Invalid parameter value
    InvalidParameter { parameter: String, value: String, reason: String },
    /// Missing required parameter
    MissingParameter { parameter: String },
    /// Configuration file I/O error
    IoError { message: String },
    /// JSON serialization/deserialization error
    SerializationError { message: String },
    /// Anchor configuration conflict
    AnchorConflict { anchor_id: NodeId, reason: String },
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            anchors: vec![
                AnchorConfig {
                    id: 1,
                    label: "A".to_string(),
                    position: [0.0, 0.0, 0.0],
                },
                AnchorConfig {
                    id: 2,
                    label: "B".to_string(),
                    position: [25.0, 0.0, 0.0],
                },
            ],
            line: LineConfig { anchor_a: 1, anchor_b: 2 },
            trilateration: TrilaterationConfig::default(),
            ranging: RangingConfig::default(),
            simulation: SimulationConfig::default(),
            tolerances: ToleranceConfig::default(),
            validation: ValidationConfig::default(),
            geodetic: Vec::new(),
        }
    }
}

impl Default for LineConfig {
    fn default() -> Self {
        Self { anchor_a: 1, anchor_b: 2 }
    }
}

impl Default for TrilaterationConfig {
    fn default() -> Self {
        Self {
            side_preference: SideSelection::Positive,
        }
    }
}

impl Default for RangingConfig {
    fn default() -> Self {
        Self {
            noise_std_m: 0.015,
            clock_drift_ns: 4.0,
            responder_delay_ns: 120.0,
            seed: None,
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tag_id: 100,
            update_rate_hz: 100.0,
            approach_speed_m_s: 4.0,
            approach_distance_m: 15.0,
            crossing_to_anchor_line_m: 12.5,
            semicircle_radius_m: 18.0,
            semicircle_speed_m_s: 3.5,
        }
    }
}

impl Default for ToleranceConfig {
    fn default() -> Self {
        Self {
            mds_eigenvalue_tolerance: crate::core::MDS_EIGENVALUE_TOLERANCE,
            orthonormality_tolerance: crate::core::ORTHONORMALITY_TOLERANCE,
        }
    }
}

fn invalid(parameter: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidParameter {
        parameter: parameter.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn require_positive(parameter: &str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(invalid(parameter, value, "must be a positive finite number"));
    }
    Ok(())
}

fn require_non_negative(parameter: &str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(invalid(parameter, value, "must be a non-negative finite number"));
    }
    Ok(())
}

impl TrackerConfig {
    /// Load and validate configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let content = fs::read_to_string(&path).map_err(|e| ConfigError::IoError {
            message: format!("Failed to read config file '{}': {}", path_str, e),
        })?;

        let config: TrackerConfig = serde_json::from_str(&content).map_err(|e| ConfigError::SerializationError {
            message: format!("Failed to parse config file '{}': {}", path_str, e),
        })?;

        config.validate()?;
        log::info!("Loaded configuration from {} ({} anchors)", path_str, config.anchors.len());
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let content = serde_json::to_string_pretty(self).map_err(|e| ConfigError::SerializationError {
            message: format!("Failed to serialize config: {}", e),
        })?;

        fs::write(&path, content).map_err(|e| ConfigError::IoError {
            message: format!("Failed to write config file '{}': {}", path_str, e),
        })?;

        log::info!("Saved configuration to {}", path_str);
        Ok(())
    }

    /// Check every section; the first problem found is returned
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (i, anchor) in self.anchors.iter().enumerate() {
            if self.anchors[..i].iter().any(|other| other.id == anchor.id) {
                return Err(ConfigError::AnchorConflict {
                    anchor_id: anchor.id,
                    reason: "duplicate anchor id".to_string(),
                });
            }
            if anchor.position.iter().any(|v| !v.is_finite()) {
                return Err(invalid(
                    &format!("anchors[{}].position", i),
                    format!("{:?}", anchor.position),
                    "coordinates must be finite",
                ));
            }
        }

        let (a, b) = self.line_endpoints()?;
        if (b - a).norm() <= crate::core::GEOMETRY_EPSILON {
            return Err(ConfigError::AnchorConflict {
                anchor_id: self.line.anchor_b,
                reason: format!("line anchors {} and {} coincide", self.line.anchor_a, self.line.anchor_b),
            });
        }

        require_non_negative("ranging.noise_std_m", self.ranging.noise_std_m)?;
        if !self.ranging.clock_drift_ns.is_finite() {
            return Err(invalid("ranging.clock_drift_ns", self.ranging.clock_drift_ns, "must be finite"));
        }
        require_non_negative("ranging.responder_delay_ns", self.ranging.responder_delay_ns)?;

        require_positive("simulation.update_rate_hz", self.simulation.update_rate_hz)?;
        require_positive("simulation.approach_speed_m_s", self.simulation.approach_speed_m_s)?;
        require_positive("simulation.approach_distance_m", self.simulation.approach_distance_m)?;
        require_non_negative(
            "simulation.crossing_to_anchor_line_m",
            self.simulation.crossing_to_anchor_line_m,
        )?;
        require_positive("simulation.semicircle_radius_m", self.simulation.semicircle_radius_m)?;
        require_positive("simulation.semicircle_speed_m_s", self.simulation.semicircle_speed_m_s)?;
        if self.anchors.iter().any(|anchor| anchor.id == self.simulation.tag_id) {
            return Err(ConfigError::AnchorConflict {
                anchor_id: self.simulation.tag_id,
                reason: "tag id is also used by an anchor".to_string(),
            });
        }

        require_positive("tolerances.mds_eigenvalue_tolerance", self.tolerances.mds_eigenvalue_tolerance)?;
        require_positive(
            "tolerances.orthonormality_tolerance",
            self.tolerances.orthonormality_tolerance,
        )?;

        require_positive("validation.max_range_m", self.validation.max_range_m)?;
        require_non_negative("validation.min_anchor_separation_m", self.validation.min_anchor_separation_m)?;
        require_positive("validation.max_tag_speed_m_s", self.validation.max_tag_speed_m_s)?;

        if !self.geodetic.is_empty() {
            if self.geodetic.len() != 3 {
                return Err(invalid(
                    "geodetic",
                    self.geodetic.len(),
                    "exactly three surveyed anchors are required",
                ));
            }
            for entry in &self.geodetic {
                if self.anchor(entry.anchor_id).is_none() {
                    return Err(ConfigError::MissingParameter {
                        parameter: format!("anchors[id = {}]", entry.anchor_id),
                    });
                }
                if !(-90.0..=90.0).contains(&entry.latitude_deg) {
                    return Err(invalid("geodetic.latitude_deg", entry.latitude_deg, "must be between -90 and 90"));
                }
                if !(-180.0..=180.0).contains(&entry.longitude_deg) {
                    return Err(invalid(
                        "geodetic.longitude_deg",
                        entry.longitude_deg,
                        "must be between -180 and 180",
                    ));
                }
                if !entry.altitude_m.is_finite() {
                    return Err(invalid("geodetic.altitude_m", entry.altitude_m, "must be finite"));
                }
            }
        }

        Ok(())
    }

    pub fn anchor(&self, id: NodeId) -> Option<&AnchorConfig> {
        self.anchors.iter().find(|anchor| anchor.id == id)
    }

    /// Anchors as reference points in the local frame
    pub fn reference_points(&self) -> Vec<ReferencePoint> {
        self.anchors
            .iter()
            .map(|anchor| {
                let [x, y, z] = anchor.position;
                ReferencePoint::new(anchor.id, Point3::new(x, y, z)).with_label(anchor.label.clone())
            })
            .collect()
    }

    /// Planar positions of the two line anchors
    pub fn line_endpoints(&self) -> Result<(Point2, Point2), ConfigError> {
        let endpoint = |id: NodeId| {
            self.anchor(id)
                .map(|anchor| Point2::new(anchor.position[0], anchor.position[1]))
                .ok_or_else(|| ConfigError::MissingParameter {
                    parameter: format!("anchors[id = {}]", id),
                })
        };
        Ok((endpoint(self.line.anchor_a)?, endpoint(self.line.anchor_b)?))
    }

    /// Local and geodetic coordinates of the three surveyed anchors
    pub fn geodetic_reference(&self) -> Option<([Point3; 3], [GeodeticPosition; 3])> {
        if self.geodetic.len() != 3 {
            return None;
        }
        let local = |i: usize| {
            self.anchor(self.geodetic[i].anchor_id).map(|anchor| {
                let [x, y, z] = anchor.position;
                Point3::new(x, y, z)
            })
        };
        Some((
            [local(0)?, local(1)?, local(2)?],
            [
                self.geodetic[0].position(),
                self.geodetic[1].position(),
                self.geodetic[2].position(),
            ],
        ))
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidParameter { parameter, value, reason } => {
                write!(f, "Invalid parameter '{}' = '{}': {}", parameter, value, reason)
            }
            ConfigError::MissingParameter { parameter } => {
                write!(f, "Missing required parameter: {}", parameter)
            }
            ConfigError::IoError { message } => {
                write!(f, "I/O error: {}", message)
            }
            ConfigError::SerializationError { message } => {
                write!(f, "Serialization error: {}", message)
            }
            ConfigError::AnchorConflict { anchor_id, reason } => {
                write!(f, "Anchor {} conflict: {}", anchor_id, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
