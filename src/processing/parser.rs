//! JSON-lines frame codec
//!
//! One frame per line: anchor snapshot, tag state, per-anchor range
//! measurements and an optional crossing report. Node ids on the wire may be
//! numbers or text labels ("A", "B"); labels are mapped to numeric ids by the
//! parser, which remembers every mapping it has handed out.

use crate::core::{NodeId, Point3, RangeLink, RangeSample, ReferencePoint, TagSample};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// First id handed out for labels that were not registered up front
const FIRST_DYNAMIC_ID: NodeId = 0x8000;

/// Node identifier as it appears on the wire
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireId {
    Numeric(NodeId),
    Label(String),
}

impl fmt::Display for WireId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireId::Numeric(id) => write!(f, "{}", id),
            WireId::Label(label) => f.write_str(label),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireAnchor {
    pub id: WireId,
    pub position: [f64; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireTag {
    pub id: WireId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub true_position: Option<[f64; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velocity: Option<[f64; 3]>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMeasurement {
    pub anchor_id: WireId,
    pub tag_id: WireId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tof_ns: Option<f64>,
    pub distance_m: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variance_m2: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round_trip_ns: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_time_ns: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireLineCrossing {
    pub timestamp_ns: u64,
    pub tag_position: [f64; 3],
}

/// One frame exactly as serialized
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FramePayload {
    pub frame_id: u64,
    pub timestamp_ns: u64,
    pub anchors: Vec<WireAnchor>,
    pub tag: WireTag,
    #[serde(default)]
    pub measurements: Vec<WireMeasurement>,
    #[serde(default)]
    pub line_crossing: Option<WireLineCrossing>,
}

/// Frame after boundary validation, in core types
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    pub frame_id: u64,
    pub timestamp_ns: u64,
    pub anchors: Vec<ReferencePoint>,
    pub tag_id: NodeId,
    /// Ground-truth tag state, when the source provides one
    pub tag: Option<TagSample>,
    pub ranges: Vec<RangeSample>,
    /// Crossing reported by the source: (timestamp, position)
    pub reported_crossing: Option<(u64, Point3)>,
}

/// Errors that can occur while decoding a frame
#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    EmptyLine,
    InvalidFormat { details: String },
    InvalidPosition { field: String, value: f64 },
    InvalidMeasurement { anchor: String, details: String },
    UnknownAnchor { id: String },
    TagMismatch { expected: String, actual: String },
    IdSpaceExhausted { label: String },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::EmptyLine => write!(f, "Empty frame line"),
            ParseError::InvalidFormat { details } => write!(f, "Invalid frame format: {}", details),
            ParseError::InvalidPosition { field, value } => write!(f, "Invalid position {}: {}", field, value),
            ParseError::InvalidMeasurement { anchor, details } => {
                write!(f, "Invalid measurement from anchor {}: {}", anchor, details)
            }
            ParseError::UnknownAnchor { id } => write!(f, "Measurement references unknown anchor {}", id),
            ParseError::TagMismatch { expected, actual } => {
                write!(f, "Measurement for tag {} in frame of tag {}", actual, expected)
            }
            ParseError::IdSpaceExhausted { label } => write!(f, "No node id left for label {}", label),
        }
    }
}

impl std::error::Error for ParseError {}

fn point_from(field: &str, values: [f64; 3]) -> Result<Point3, ParseError> {
    if let Some(value) = values.iter().copied().find(|v| !v.is_finite()) {
        return Err(ParseError::InvalidPosition {
            field: field.to_string(),
            value,
        });
    }
    Ok(Point3::new(values[0], values[1], values[2]))
}

/// Frame parser with a label → id registry
#[derive(Debug, Clone)]
pub struct FrameParser {
    labels: HashMap<String, NodeId>,
    /// None once the last id has been handed out
    next_dynamic_id: Option<NodeId>,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self {
            labels: HashMap::new(),
            next_dynamic_id: Some(FIRST_DYNAMIC_ID),
        }
    }
}

impl FrameParser {
    /// Create a new parser with an empty label registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Parser that maps each labelled reference point's label to its id
    pub fn with_labels(anchors: &[ReferencePoint]) -> Self {
        let mut parser = Self::new();
        for anchor in anchors.iter().filter(|anchor| !anchor.label.is_empty()) {
            parser.register(&anchor.label, anchor.id);
        }
        parser
    }

    pub fn register(&mut self, label: &str, id: NodeId) {
        self.labels.insert(label.to_string(), id);
    }

    /// Numeric id for a wire id, allocating one for unseen labels
    ///
    /// Allocated ids never wrap: once the id space is used up, new labels
    /// are rejected instead of aliasing an earlier node.
    pub fn resolve(&mut self, id: &WireId) -> Result<NodeId, ParseError> {
        match id {
            WireId::Numeric(id) => Ok(*id),
            WireId::Label(label) => {
                if let Some(id) = self.labels.get(label) {
                    return Ok(*id);
                }
                if let Ok(id) = label.parse::<NodeId>() {
                    return Ok(id);
                }
                let id = self
                    .next_dynamic_id
                    .ok_or_else(|| ParseError::IdSpaceExhausted { label: label.clone() })?;
                self.next_dynamic_id = id.checked_add(1);
                self.labels.insert(label.clone(), id);
                Ok(id)
            }
        }
    }

    /// Decode one JSON line
    pub fn decode_line(&mut self, line: &str) -> Result<DecodedFrame, ParseError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(ParseError::EmptyLine);
        }
        let payload: FramePayload = serde_json::from_str(line).map_err(|e| ParseError::InvalidFormat {
            details: e.to_string(),
        })?;
        self.decode(&payload)
    }

    /// Validate a payload and convert it into core types
    pub fn decode(&mut self, payload: &FramePayload) -> Result<DecodedFrame, ParseError> {
        let mut anchors = Vec::with_capacity(payload.anchors.len());
        let mut anchor_ids = HashMap::new();
        for anchor in &payload.anchors {
            let position = point_from(&format!("anchor {}", anchor.id), anchor.position)?;
            let id = self.resolve(&anchor.id)?;
            let label = match &anchor.id {
                WireId::Label(label) => label.clone(),
                WireId::Numeric(_) => String::new(),
            };
            anchor_ids.insert(anchor.id.clone(), id);
            anchors.push(ReferencePoint::new(id, position).with_label(label));
        }

        let tag_id = self.resolve(&payload.tag.id)?;
        let tag = match payload.tag.true_position {
            Some(position) => {
                let mut sample = TagSample::new(payload.timestamp_ns, point_from("tag true_position", position)?);
                if let Some(velocity) = payload.tag.velocity {
                    let v = point_from("tag velocity", velocity)?;
                    sample = sample.with_velocity(Vector3::new(v.x, v.y, v.z));
                }
                Some(sample)
            }
            None => None,
        };

        let mut ranges = Vec::with_capacity(payload.measurements.len());
        for measurement in &payload.measurements {
            let anchor_id = *anchor_ids.get(&measurement.anchor_id).ok_or_else(|| ParseError::UnknownAnchor {
                id: measurement.anchor_id.to_string(),
            })?;
            if self.resolve(&measurement.tag_id)? != tag_id {
                return Err(ParseError::TagMismatch {
                    expected: payload.tag.id.to_string(),
                    actual: measurement.tag_id.to_string(),
                });
            }
            if !measurement.distance_m.is_finite() || measurement.distance_m < 0.0 {
                return Err(ParseError::InvalidMeasurement {
                    anchor: measurement.anchor_id.to_string(),
                    details: format!("distance_m = {}", measurement.distance_m),
                });
            }

            let mut sample = RangeSample::new(RangeLink::new(anchor_id, tag_id), measurement.distance_m);
            if let Some(variance) = measurement.variance_m2 {
                if !variance.is_finite() || variance < 0.0 {
                    return Err(ParseError::InvalidMeasurement {
                        anchor: measurement.anchor_id.to_string(),
                        details: format!("variance_m2 = {}", variance),
                    });
                }
                sample = sample.with_variance(variance);
            }
            ranges.push(sample);
        }

        let reported_crossing = match &payload.line_crossing {
            Some(crossing) => Some((
                crossing.timestamp_ns,
                point_from("line_crossing tag_position", crossing.tag_position)?,
            )),
            None => None,
        };

        Ok(DecodedFrame {
            frame_id: payload.frame_id,
            timestamp_ns: payload.timestamp_ns,
            anchors,
            tag_id,
            tag,
            ranges,
            reported_crossing,
        })
    }
}

/// Serialize a payload as one newline-terminated JSON line
pub fn encode_line(payload: &FramePayload) -> Result<String, ParseError> {
    let mut line = serde_json::to_string(payload).map_err(|e| ParseError::InvalidFormat {
        details: e.to_string(),
    })?;
    line.push('\n');
    Ok(line)
}

/// Wire id for a reference point: its label when it has one
pub fn wire_id(anchor: &ReferencePoint) -> WireId {
    if anchor.label.is_empty() {
        WireId::Numeric(anchor.id)
    } else {
        WireId::Label(anchor.label.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_LINE: &str = r#"{"frame_id": 12, "timestamp_ns": 1700000000000000000,
        "anchors": [{"id": "A", "position": [0.0, 0.0, 0.0]}, {"id": "B", "position": [25.0, 0.0, 0.0]}],
        "tag": {"id": "boat", "true_position": [12.5, -3.0, 0.0], "velocity": [0.0, 4.0, 0.0]},
        "measurements": [
            {"anchor_id": "A", "tag_id": "boat", "tof_ns": 42.9, "distance_m": 12.855, "variance_m2": 0.000225,
             "round_trip_ns": 205.8, "reply_time_ns": 120.0},
            {"anchor_id": "B", "tag_id": "boat", "tof_ns": 42.9, "distance_m": 12.855, "variance_m2": 0.000225,
             "round_trip_ns": 205.8, "reply_time_ns": 120.0}
        ],
        "line_crossing": null}"#;

    #[test]
    fn test_decode_labelled_frame() {
        let anchors = vec![
            ReferencePoint::new(1, Point3::origin()).with_label("A"),
            ReferencePoint::new(2, Point3::new(25.0, 0.0, 0.0)).with_label("B"),
        ];
        let mut parser = FrameParser::with_labels(&anchors);
        let frame = parser.decode_line(SAMPLE_LINE).unwrap();

        assert_eq!(frame.frame_id, 12);
        assert_eq!(frame.anchors.len(), 2);
        assert_eq!(frame.anchors[1].id, 2);
        assert_eq!(frame.anchors[1].label, "B");
        assert_eq!(frame.tag_id, FIRST_DYNAMIC_ID);

        let tag = frame.tag.unwrap();
        assert_eq!(tag.position, Point3::new(12.5, -3.0, 0.0));
        assert_eq!(tag.velocity, Some(Vector3::new(0.0, 4.0, 0.0)));

        assert_eq!(frame.ranges.len(), 2);
        assert_eq!(frame.ranges[0].link, RangeLink::new(1, FIRST_DYNAMIC_ID));
        assert_eq!(frame.ranges[0].variance_m2, Some(0.000225));
        assert!(frame.reported_crossing.is_none());
    }

    #[test]
    fn test_numeric_ids_and_minimal_fields() {
        let line = r#"{"frame_id": 0, "timestamp_ns": 10, "anchors": [{"id": 1, "position": [0, 0, 0]},
            {"id": 2, "position": [10, 0, 0]}], "tag": {"id": 100},
            "measurements": [{"anchor_id": 2, "tag_id": 100, "distance_m": 7.0}]}"#;
        let frame = FrameParser::new().decode_line(line).unwrap();
        assert_eq!(frame.tag_id, 100);
        assert!(frame.tag.is_none());
        assert_eq!(frame.ranges[0].link, RangeLink::new(2, 100));
        assert_eq!(frame.ranges[0].variance_m2, None);
    }

    #[test]
    fn test_labels_are_stable_across_frames() {
        let mut parser = FrameParser::new();
        let first = parser.resolve(&WireId::Label("C".to_string())).unwrap();
        let second = parser.resolve(&WireId::Label("D".to_string())).unwrap();
        assert_ne!(first, second);
        assert_eq!(parser.resolve(&WireId::Label("C".to_string())).unwrap(), first);
        assert_eq!(parser.resolve(&WireId::Label("42".to_string())).unwrap(), 42);
    }

    #[test]
    fn test_label_ids_do_not_wrap() {
        let mut parser = FrameParser::new();
        let early = parser.resolve(&WireId::Label("A".to_string())).unwrap();
        parser.next_dynamic_id = Some(NodeId::MAX);

        assert_eq!(parser.resolve(&WireId::Label("Y".to_string())).unwrap(), NodeId::MAX);
        assert_eq!(
            parser.resolve(&WireId::Label("Z".to_string())),
            Err(ParseError::IdSpaceExhausted { label: "Z".to_string() })
        );
        // Known labels still resolve
        assert_eq!(parser.resolve(&WireId::Label("A".to_string())).unwrap(), early);

        let line = r#"{"frame_id": 0, "timestamp_ns": 0, "anchors": [{"id": "W", "position": [0, 0, 0]}],
            "tag": {"id": "Y"}, "measurements": []}"#;
        assert!(matches!(parser.decode_line(line), Err(ParseError::IdSpaceExhausted { .. })));
    }

    #[test]
    fn test_boundary_rejections() {
        let mut parser = FrameParser::new();
        assert_eq!(parser.decode_line("   "), Err(ParseError::EmptyLine));
        assert!(matches!(parser.decode_line("{\"frame_id\": 1}"), Err(ParseError::InvalidFormat { .. })));

        let unknown = r#"{"frame_id": 0, "timestamp_ns": 0, "anchors": [{"id": 1, "position": [0, 0, 0]}],
            "tag": {"id": 100}, "measurements": [{"anchor_id": 9, "tag_id": 100, "distance_m": 1.0}]}"#;
        assert_eq!(
            parser.decode_line(unknown),
            Err(ParseError::UnknownAnchor { id: "9".to_string() })
        );

        let negative = r#"{"frame_id": 0, "timestamp_ns": 0, "anchors": [{"id": 1, "position": [0, 0, 0]}],
            "tag": {"id": 100}, "measurements": [{"anchor_id": 1, "tag_id": 100, "distance_m": -1.0}]}"#;
        assert!(matches!(parser.decode_line(negative), Err(ParseError::InvalidMeasurement { .. })));

        let other_tag = r#"{"frame_id": 0, "timestamp_ns": 0, "anchors": [{"id": 1, "position": [0, 0, 0]}],
            "tag": {"id": 100}, "measurements": [{"anchor_id": 1, "tag_id": 101, "distance_m": 1.0}]}"#;
        assert!(matches!(parser.decode_line(other_tag), Err(ParseError::TagMismatch { .. })));
    }

    #[test]
    fn test_encode_then_decode_crossing() {
        let payload = FramePayload {
            frame_id: 3,
            timestamp_ns: 30_000_000,
            anchors: vec![WireAnchor {
                id: WireId::Label("A".to_string()),
                position: [0.0, 0.0, 0.0],
            }],
            tag: WireTag {
                id: WireId::Numeric(100),
                true_position: Some([1.0, 0.0, 0.0]),
                velocity: None,
            },
            measurements: Vec::new(),
            line_crossing: Some(WireLineCrossing {
                timestamp_ns: 29_500_000,
                tag_position: [1.0, 0.0, 0.0],
            }),
        };

        let line = encode_line(&payload).unwrap();
        assert!(line.ends_with('\n'));
        assert!(!line.contains("velocity"));

        let frame = FrameParser::new().decode_line(&line).unwrap();
        assert_eq!(frame.reported_crossing, Some((29_500_000, Point3::new(1.0, 0.0, 0.0))));
        assert_eq!(frame.anchors[0].label, "A");
    }
}
