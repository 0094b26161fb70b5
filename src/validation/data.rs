use crate::core::{NodeId, RangeSample, ReferencePoint, TagSample, NANOS_PER_SECOND};
use crate::validation::error::PositioningError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Configuration for boundary validation of incoming samples
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Longest range the radios can report (meters)
    pub max_range_m: f64,
    /// Minimum separation between any two anchors (meters)
    pub min_anchor_separation_m: f64,
    /// Fastest plausible tag speed between consecutive samples (m/s)
    pub max_tag_speed_m_s: f64,
    /// Minimum number of anchors required for positioning
    pub min_anchor_count: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_range_m: 500.0,
            min_anchor_separation_m: 1.0,
            max_tag_speed_m_s: 30.0,
            min_anchor_count: 2,
        }
    }
}

/// Validation errors raised before data enters the geometry core
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    NonFiniteValue { field: String, value: f64 },
    NegativeDistance { from: NodeId, to: NodeId, distance_m: f64 },
    RangeTooLong { from: NodeId, to: NodeId, distance_m: f64, max_m: f64 },
    NegativeVariance { from: NodeId, to: NodeId, variance_m2: f64 },
    DuplicateAnchor { anchor_id: NodeId },
    AnchorTooClose { anchor1: NodeId, anchor2: NodeId, distance_m: f64 },
    InsufficientAnchors { available: usize, required: usize },
    TimestampRegression { previous_ns: u64, received_ns: u64 },
    PositionJumpDetected { speed_m_s: f64, max_m_s: f64 },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::NonFiniteValue { field, value } => {
                write!(f, "Non-finite value for {}: {}", field, value)
            }
            ValidationError::NegativeDistance { from, to, distance_m } => {
                write!(f, "Negative distance on link {}-{}: {:.3} m", from, to, distance_m)
            }
            ValidationError::RangeTooLong { from, to, distance_m, max_m } => {
                write!(f, "Range on link {}-{} too long: {:.2} m > {:.2} m", from, to, distance_m, max_m)
            }
            ValidationError::NegativeVariance { from, to, variance_m2 } => {
                write!(f, "Negative variance on link {}-{}: {}", from, to, variance_m2)
            }
            ValidationError::DuplicateAnchor { anchor_id } => {
                write!(f, "Duplicate anchor ID: {}", anchor_id)
            }
            ValidationError::AnchorTooClose { anchor1, anchor2, distance_m } => {
                write!(f, "Anchors {} and {} too close: {:.2} m", anchor1, anchor2, distance_m)
            }
            ValidationError::InsufficientAnchors { available, required } => {
                write!(f, "Insufficient anchors: {} available, {} required", available, required)
            }
            ValidationError::TimestampRegression { previous_ns, received_ns } => {
                write!(f, "Timestamp {} ns <= previous {} ns", received_ns, previous_ns)
            }
            ValidationError::PositionJumpDetected { speed_m_s, max_m_s } => {
                write!(f, "Position jump implies {:.1} m/s (max {:.1} m/s)", speed_m_s, max_m_s)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

impl From<ValidationError> for PositioningError {
    fn from(error: ValidationError) -> Self {
        let parameter = match &error {
            ValidationError::NonFiniteValue { field, .. } => field.clone(),
            ValidationError::NegativeDistance { .. }
            | ValidationError::RangeTooLong { .. }
            | ValidationError::NegativeVariance { .. } => "range_sample".to_string(),
            ValidationError::DuplicateAnchor { .. }
            | ValidationError::AnchorTooClose { .. }
            | ValidationError::InsufficientAnchors { .. } => "anchors".to_string(),
            ValidationError::TimestampRegression { .. } | ValidationError::PositionJumpDetected { .. } => {
                "tag_sample".to_string()
            }
        };
        PositioningError::InvalidInput {
            parameter,
            value: format!("{:?}", error),
            reason: error.to_string(),
        }
    }
}

/// Range samples split into accepted and rejected
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub valid_samples: Vec<RangeSample>,
    pub rejected_samples: Vec<(RangeSample, ValidationError)>,
}

/// Boundary validator for anchors, ranges and tag samples
///
/// Keeps the last accepted tag sample to check monotonic timestamps and
/// plausible motion.
#[derive(Debug, Clone, Default)]
pub struct DataValidator {
    config: ValidationConfig,
    last_sample: Option<TagSample>,
}

impl DataValidator {
    /// Create a new data validator with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a validator with custom configuration
    pub fn with_config(config: ValidationConfig) -> Self {
        Self {
            config,
            last_sample: None,
        }
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Update validation configuration
    pub fn update_config(&mut self, config: ValidationConfig) {
        self.config = config;
    }

    /// Check an anchor snapshot for duplicates, bad coordinates and crowding
    pub fn validate_anchors(&self, anchors: &[ReferencePoint]) -> Result<(), ValidationError> {
        if anchors.len() < self.config.min_anchor_count {
            return Err(ValidationError::InsufficientAnchors {
                available: anchors.len(),
                required: self.config.min_anchor_count,
            });
        }

        let mut seen = HashSet::new();
        for anchor in anchors {
            if !seen.insert(anchor.id) {
                return Err(ValidationError::DuplicateAnchor { anchor_id: anchor.id });
            }
            if let Some(value) = anchor.position.iter().copied().find(|v| !v.is_finite()) {
                return Err(ValidationError::NonFiniteValue {
                    field: format!("anchor {} position", anchor.id),
                    value,
                });
            }
        }

        for (i, first) in anchors.iter().enumerate() {
            for second in anchors.iter().skip(i + 1) {
                let distance_m = (first.position - second.position).norm();
                if distance_m < self.config.min_anchor_separation_m {
                    return Err(ValidationError::AnchorTooClose {
                        anchor1: first.id,
                        anchor2: second.id,
                        distance_m,
                    });
                }
            }
        }

        Ok(())
    }

    /// Check one range sample
    pub fn validate_range(&self, sample: &RangeSample) -> Result<(), ValidationError> {
        let RangeSample { link, distance_m, variance_m2 } = *sample;
        if !distance_m.is_finite() {
            return Err(ValidationError::NonFiniteValue {
                field: format!("distance {}-{}", link.from, link.to),
                value: distance_m,
            });
        }
        if distance_m < 0.0 {
            return Err(ValidationError::NegativeDistance {
                from: link.from,
                to: link.to,
                distance_m,
            });
        }
        if distance_m > self.config.max_range_m {
            return Err(ValidationError::RangeTooLong {
                from: link.from,
                to: link.to,
                distance_m,
                max_m: self.config.max_range_m,
            });
        }
        if let Some(variance_m2) = variance_m2 {
            if !variance_m2.is_finite() || variance_m2 < 0.0 {
                return Err(ValidationError::NegativeVariance {
                    from: link.from,
                    to: link.to,
                    variance_m2,
                });
            }
        }
        Ok(())
    }

    /// Validate a batch of range samples
    ///
    /// When a link appears more than once, the last accepted sample wins.
    pub fn validate_ranges(&self, samples: &[RangeSample]) -> ValidationResult {
        let mut accepted: HashMap<(NodeId, NodeId), RangeSample> = HashMap::new();
        let mut order = Vec::new();
        let mut rejected_samples = Vec::new();

        for sample in samples {
            match self.validate_range(sample) {
                Ok(()) => {
                    let key = (sample.link.from.min(sample.link.to), sample.link.from.max(sample.link.to));
                    if accepted.insert(key, *sample).is_none() {
                        order.push(key);
                    }
                }
                Err(error) => rejected_samples.push((*sample, error)),
            }
        }

        let valid_samples = order.iter().filter_map(|key| accepted.get(key).copied()).collect();
        ValidationResult {
            valid_samples,
            rejected_samples,
        }
    }

    /// Validate a tag sample against the last accepted one and remember it
    pub fn validate_sample(&mut self, sample: &TagSample) -> Result<(), ValidationError> {
        if let Some(value) = sample.position.iter().copied().find(|v| !v.is_finite()) {
            return Err(ValidationError::NonFiniteValue {
                field: "tag position".to_string(),
                value,
            });
        }
        if let Some(velocity) = sample.velocity {
            if let Some(value) = velocity.iter().copied().find(|v| !v.is_finite()) {
                return Err(ValidationError::NonFiniteValue {
                    field: "tag velocity".to_string(),
                    value,
                });
            }
        }

        if let Some(previous) = &self.last_sample {
            if sample.timestamp_ns <= previous.timestamp_ns {
                return Err(ValidationError::TimestampRegression {
                    previous_ns: previous.timestamp_ns,
                    received_ns: sample.timestamp_ns,
                });
            }
            let dt = (sample.timestamp_ns - previous.timestamp_ns) as f64 / NANOS_PER_SECOND;
            let speed_m_s = (sample.position - previous.position).norm() / dt;
            if speed_m_s > self.config.max_tag_speed_m_s {
                return Err(ValidationError::PositionJumpDetected {
                    speed_m_s,
                    max_m_s: self.config.max_tag_speed_m_s,
                });
            }
        }

        self.last_sample = Some(*sample);
        Ok(())
    }

    /// Forget the last accepted tag sample
    pub fn clear_history(&mut self) {
        self.last_sample = None;
    }
}
