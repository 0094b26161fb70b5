//! Deterministic regatta start simulator
//!
//! The tag approaches the line along its perpendicular through the midpoint,
//! crosses it, continues a fixed distance and returns to the start on a
//! half-loop that swings out past anchor_a. Each tick advances a fixed `dt`,
//! so a seeded run always produces the same frames.

use crate::algorithms::line_geometry::{LineCrossing, LineCrossingDetector};
use crate::algorithms::ranging::{RangingModel, SimulatedExchange};
use crate::core::{NodeId, Point2, Point3, RangeLink, RangeSample, ReferencePoint, TagSample, NANOS_PER_SECOND};
use crate::processing::parser::{wire_id, FramePayload, WireAnchor, WireId, WireLineCrossing, WireMeasurement, WireTag};
use crate::utils::config::{RangingConfig, SimulationConfig, TrackerConfig};
use crate::validation::error::{PositioningError, Result};
use nalgebra::{Vector2, Vector3};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

/// Motion phase of the simulated tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MotionPhase {
    /// Heading for the line from the start position
    Approach,
    /// Past the line, holding course
    Crossing,
    /// Returning to the start position
    Return,
}

/// One simulator tick
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedFrame {
    pub frame_id: u64,
    pub timestamp_ns: u64,
    pub phase: MotionPhase,
    /// Ground-truth tag state, velocity included
    pub tag: TagSample,
    /// One exchange per anchor
    pub exchanges: Vec<SimulatedExchange>,
    /// Crossing of the true path, if this tick completed one
    pub crossing: Option<LineCrossing>,
}

impl SimulatedFrame {
    pub fn ranges(&self) -> Vec<RangeSample> {
        self.exchanges.iter().map(|exchange| exchange.sample).collect()
    }
}

/// Line geometry in the plane of the anchors
#[derive(Debug, Clone, Copy)]
struct Course {
    anchor_a: Point2,
    midpoint: Point2,
    /// Unit vector anchor_a → anchor_b
    along: Vector2<f64>,
    /// Unit normal to the left of `along`
    left: Vector2<f64>,
}

/// Return half-loop from `from` back to the start
#[derive(Debug, Clone, Copy)]
struct ReturnLoop {
    center: Point2,
    /// Half the distance between loop start and end, along `left`
    half_length: f64,
    /// How far the loop swings out along `-along`
    reach: f64,
    angle: f64,
}

impl ReturnLoop {
    fn position(&self, course: &Course) -> Point2 {
        self.center + course.left * (self.half_length * self.angle.cos())
            - course.along * (self.reach * self.angle.sin())
    }

    /// Derivative of `position` with respect to the loop angle
    fn tangent(&self, course: &Course) -> Vector2<f64> {
        -course.left * (self.half_length * self.angle.sin()) - course.along * (self.reach * self.angle.cos())
    }
}

/// Smooth approach, crossing and return loop with simulated ranging
#[derive(Debug)]
pub struct RegattaSimulator {
    anchors: Vec<ReferencePoint>,
    tag_id: NodeId,
    settings: SimulationConfig,
    ranging: RangingConfig,
    model: RangingModel<StdRng>,
    course: Course,
    start: Point2,
    height: f64,
    dt_ns: u64,
    frame_id: u64,
    timestamp_ns: u64,
    phase: MotionPhase,
    position: Point2,
    crossing_start: Point2,
    return_loop: Option<ReturnLoop>,
    detector: LineCrossingDetector,
}

impl RegattaSimulator {
    pub fn new(
        anchors: Vec<ReferencePoint>,
        line: (NodeId, NodeId),
        settings: SimulationConfig,
        ranging: RangingConfig,
    ) -> Result<Self> {
        if !(settings.update_rate_hz.is_finite() && settings.update_rate_hz > 0.0) {
            return Err(PositioningError::invalid(
                "update_rate_hz",
                settings.update_rate_hz,
                "must be positive",
            ));
        }
        let find = |id: NodeId| {
            anchors
                .iter()
                .find(|anchor| anchor.id == id)
                .map(ReferencePoint::planar)
                .ok_or_else(|| PositioningError::invalid("line anchor", id, "not in the anchor set"))
        };
        let (a, b) = (find(line.0)?, find(line.1)?);
        let detector = LineCrossingDetector::new(a, b)?;

        let along = (b - a).normalize();
        let course = Course {
            anchor_a: a,
            midpoint: Point2::from((a.coords + b.coords) * 0.5),
            along,
            left: Vector2::new(-along.y, along.x),
        };
        let start = course.midpoint - course.left * settings.approach_distance_m;
        let height = anchors.iter().map(|anchor| anchor.position.z).sum::<f64>() / anchors.len() as f64;

        let model = match ranging.seed {
            Some(seed) => RangingModel::seeded(seed),
            None => RangingModel::from_entropy(),
        };

        Ok(Self {
            tag_id: settings.tag_id,
            dt_ns: (NANOS_PER_SECOND / settings.update_rate_hz).round() as u64,
            anchors,
            settings,
            ranging,
            model,
            course,
            start,
            height,
            frame_id: 0,
            timestamp_ns: 0,
            phase: MotionPhase::Approach,
            position: start,
            crossing_start: start,
            return_loop: None,
            detector,
        })
    }

    pub fn from_config(config: &TrackerConfig) -> Result<Self> {
        Self::new(
            config.reference_points(),
            (config.line.anchor_a, config.line.anchor_b),
            config.simulation.clone(),
            config.ranging.clone(),
        )
    }

    pub fn phase(&self) -> MotionPhase {
        self.phase
    }

    pub fn anchors(&self) -> &[ReferencePoint] {
        &self.anchors
    }

    /// Tick length (seconds)
    pub fn dt_s(&self) -> f64 {
        self.dt_ns as f64 / NANOS_PER_SECOND
    }

    /// Advance one tick and produce its frame
    pub fn next_frame(&mut self) -> Result<SimulatedFrame> {
        let previous = self.position;
        if self.frame_id > 0 {
            self.timestamp_ns += self.dt_ns;
            self.advance(self.dt_s());
        }

        let velocity = if self.frame_id > 0 {
            (self.position - previous) / self.dt_s()
        } else {
            Vector2::zeros()
        };
        let position = Point3::new(self.position.x, self.position.y, self.height);
        let tag = TagSample::new(self.timestamp_ns, position).with_velocity(Vector3::new(velocity.x, velocity.y, 0.0));

        let mut exchanges = Vec::with_capacity(self.anchors.len());
        for anchor in &self.anchors {
            exchanges.push(self.model.simulate_exchange(
                RangeLink::new(anchor.id, self.tag_id),
                (anchor.position - position).norm(),
                self.ranging.noise_std_m,
                self.ranging.clock_drift_ns,
                self.ranging.responder_delay_ns,
            )?);
        }

        let crossing = self.detector.update(tag);
        let frame = SimulatedFrame {
            frame_id: self.frame_id,
            timestamp_ns: self.timestamp_ns,
            phase: self.phase,
            tag,
            exchanges,
            crossing,
        };
        self.frame_id += 1;
        Ok(frame)
    }

    /// Serializable form of a frame, anchors labelled as configured
    pub fn payload(&self, frame: &SimulatedFrame) -> FramePayload {
        let tag_id = WireId::Numeric(self.tag_id);
        let position = |p: &Point3| [p.x, p.y, p.z];
        FramePayload {
            frame_id: frame.frame_id,
            timestamp_ns: frame.timestamp_ns,
            anchors: self
                .anchors
                .iter()
                .map(|anchor| WireAnchor {
                    id: wire_id(anchor),
                    position: position(&anchor.position),
                })
                .collect(),
            tag: WireTag {
                id: tag_id.clone(),
                true_position: Some(position(&frame.tag.position)),
                velocity: frame.tag.velocity.map(|v| [v.x, v.y, v.z]),
            },
            measurements: frame
                .exchanges
                .iter()
                .filter_map(|exchange| {
                    let anchor = self.anchors.iter().find(|a| a.id == exchange.sample.link.from)?;
                    Some(WireMeasurement {
                        anchor_id: wire_id(anchor),
                        tag_id: tag_id.clone(),
                        tof_ns: Some(exchange.tof_ns),
                        distance_m: exchange.sample.distance_m,
                        variance_m2: exchange.sample.variance_m2,
                        round_trip_ns: Some(exchange.round_trip_ns),
                        reply_time_ns: Some(exchange.reply_time_ns),
                    })
                })
                .collect(),
            line_crossing: frame.crossing.map(|crossing| WireLineCrossing {
                timestamp_ns: crossing.interpolated_timestamp_ns,
                tag_position: position(&crossing.interpolated_position),
            }),
        }
    }

    fn signed_offset(&self, p: Point2) -> f64 {
        (p - self.course.midpoint).dot(&self.course.left)
    }

    fn advance(&mut self, dt: f64) {
        match self.phase {
            MotionPhase::Approach => {
                self.position += self.course.left * (self.settings.approach_speed_m_s * dt);
                if self.signed_offset(self.position) >= 0.0 {
                    log::debug!("Simulator: crossing phase at t={} ns", self.timestamp_ns);
                    self.phase = MotionPhase::Crossing;
                    self.crossing_start = self.position;
                }
            }
            MotionPhase::Crossing => {
                self.position += self.course.left * (self.settings.approach_speed_m_s * dt);
                if (self.position - self.crossing_start).norm() >= self.settings.crossing_to_anchor_line_m {
                    let from = self.position;
                    let half_length = (from - self.start).norm() / 2.0;
                    self.return_loop = Some(ReturnLoop {
                        center: Point2::from((from.coords + self.start.coords) * 0.5),
                        half_length,
                        reach: self.loop_reach(),
                        angle: 0.0,
                    });
                    log::debug!("Simulator: return phase at t={} ns", self.timestamp_ns);
                    self.phase = MotionPhase::Return;
                }
            }
            MotionPhase::Return => {
                let Some(mut arc) = self.return_loop else {
                    self.phase = MotionPhase::Approach;
                    return;
                };
                // Constant speed along the loop: dθ = v·dt / |dP/dθ|
                let rate = arc.tangent(&self.course).norm().max(1e-6);
                arc.angle += self.settings.semicircle_speed_m_s * dt / rate;

                if arc.angle >= std::f64::consts::PI {
                    log::debug!("Simulator: lap complete at t={} ns", self.timestamp_ns);
                    self.position = self.start;
                    self.return_loop = None;
                    self.phase = MotionPhase::Approach;
                } else {
                    self.position = arc.position(&self.course);
                    self.return_loop = Some(arc);
                }
            }
        }
    }

    /// Lateral reach of the return loop: far enough to clear anchor_a
    fn loop_reach(&self) -> f64 {
        let to_anchor = (self.course.midpoint - self.course.anchor_a).dot(&self.course.along).max(0.0);
        self.settings.semicircle_radius_m.max(to_anchor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::line_geometry::{signed_distance, CrossingDirection};
    use crate::processing::parser::FrameParser;
    use approx::assert_relative_eq;

    fn simulator(seed: u64, noise_std_m: f64) -> RegattaSimulator {
        let mut config = TrackerConfig::default();
        config.ranging.seed = Some(seed);
        config.ranging.noise_std_m = noise_std_m;
        config.ranging.clock_drift_ns = 0.0;
        RegattaSimulator::from_config(&config).unwrap()
    }

    #[test]
    fn test_first_frame_at_start() {
        let mut sim = simulator(1, 0.0);
        let frame = sim.next_frame().unwrap();
        assert_eq!(frame.frame_id, 0);
        assert_eq!(frame.timestamp_ns, 0);
        assert_eq!(frame.phase, MotionPhase::Approach);
        assert_relative_eq!(frame.tag.position, Point3::new(12.5, -15.0, 0.0), epsilon = 1e-12);
        assert_eq!(frame.exchanges.len(), 2);

        // Noise-free ranges equal the geometric distances
        let expected = (12.5f64.powi(2) + 15.0f64.powi(2)).sqrt();
        assert_relative_eq!(frame.exchanges[0].sample.distance_m, expected, epsilon = 1e-9);
        assert_relative_eq!(frame.exchanges[1].sample.distance_m, expected, epsilon = 1e-9);
    }

    #[test]
    fn test_lap_crosses_line_twice() {
        let mut sim = simulator(2, 0.0);
        let (a, b) = (Point2::new(0.0, 0.0), Point2::new(25.0, 0.0));
        let mut crossings = Vec::new();
        let mut phases = Vec::new();
        let mut previous: Option<TagSample> = None;

        for _ in 0..6000 {
            let frame = sim.next_frame().unwrap();
            if phases.last() != Some(&frame.phase) {
                phases.push(frame.phase);
            }
            if let Some(previous) = previous {
                // No teleporting: speed stays within the configured maxima
                let step = (frame.tag.position - previous.position).norm();
                assert!(step <= 4.0 * 0.01 + 1e-9, "step {} at frame {}", step, frame.frame_id);
            }
            if let Some(crossing) = frame.crossing {
                crossings.push(crossing);
            }
            previous = Some(frame.tag);
            if phases.len() == 4 {
                break;
            }
        }

        assert_eq!(
            phases,
            vec![
                MotionPhase::Approach,
                MotionPhase::Crossing,
                MotionPhase::Return,
                MotionPhase::Approach
            ]
        );
        assert_eq!(crossings.len(), 2);
        assert_eq!(crossings[0].direction, CrossingDirection::RightToLeft);
        assert_relative_eq!(crossings[0].interpolated_position.x, 12.5, epsilon = 1e-9);
        assert_eq!(crossings[1].direction, CrossingDirection::LeftToRight);
        assert!(crossings[1].interpolated_position.x < 0.0);

        // First crossing after 15 m at 4 m/s
        assert_relative_eq!(crossings[0].interpolated_timestamp_ns as f64 / 1e9, 3.75, epsilon = 1e-3);

        let end = previous.unwrap();
        assert!(signed_distance(a, b, end.planar()).unwrap() < 0.0);
    }

    #[test]
    fn test_seeded_runs_are_identical() {
        let mut first = simulator(99, 0.015);
        let mut second = simulator(99, 0.015);
        for _ in 0..200 {
            assert_eq!(first.next_frame().unwrap(), second.next_frame().unwrap());
        }
    }

    #[test]
    fn test_payload_decodes() {
        let mut sim = simulator(5, 0.0);
        let frame = sim.next_frame().unwrap();
        let payload = sim.payload(&frame);
        assert_eq!(payload.anchors[0].id, WireId::Label("A".to_string()));
        assert_eq!(payload.measurements.len(), 2);

        let mut parser = FrameParser::with_labels(sim.anchors());
        let decoded = parser.decode(&payload).unwrap();
        assert_eq!(decoded.tag_id, 100);
        assert_eq!(decoded.ranges, frame.ranges());
        assert_eq!(decoded.anchors, sim.anchors().to_vec());
    }

    #[test]
    fn test_invalid_settings() {
        let mut config = TrackerConfig::default();
        config.simulation.update_rate_hz = 0.0;
        assert!(RegattaSimulator::from_config(&config).is_err());

        let mut config = TrackerConfig::default();
        config.line.anchor_b = 42;
        assert!(RegattaSimulator::from_config(&config).is_err());
    }
}
