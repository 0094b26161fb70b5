//! Per-sample orchestration: position estimate, line signals, frame output
//!
//! The tracker owns the anchor snapshot, the crossing detector and a shared
//! handle to the current calibration. Geometry work is delegated to
//! `algorithms`; this layer adds validation and logging.

use crate::algorithms::frame_alignment::{Calibration, FrameAligner, TransformHandle};
use crate::algorithms::line_geometry::{
    closing_speed, finite_difference_velocity, signed_distance, time_to_line, LineCrossing, LineCrossingDetector,
    Side,
};
use crate::algorithms::mds::{Dimensions, PairwiseDistances, RelativeLocator};
use crate::algorithms::trilateration::{lift_to_anchor_plane, SidePreference, Trilateration};
use crate::core::{CalibrationSet, GeodeticPosition, NodeId, Point2, Point3, RangeSample, ReferencePoint, TagSample};
use crate::utils::config::{SideSelection, TrackerConfig};
use crate::validation::data::{DataValidator, ValidationConfig};
use crate::validation::error::{ErrorKind, PositioningError, Result};
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Everything the tracker derives from one tag sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerUpdate {
    pub sample: TagSample,
    /// Positive on the left of anchor_a → anchor_b
    pub signed_distance_m: f64,
    pub side: Side,
    /// Positive while approaching the line; absent without a velocity
    pub closing_speed_m_s: Option<f64>,
    /// Seconds until the line at the current closing speed
    pub time_to_line_s: Option<f64>,
    pub crossing: Option<LineCrossing>,
    /// Position in the calibrated target frame
    pub global_position: Option<Point3>,
    /// Geodetic position, when the target frame is a tangent plane
    pub geodetic_position: Option<GeodeticPosition>,
}

/// Line tracker for a single tag
#[derive(Debug)]
pub struct LineTracker {
    anchors: Vec<ReferencePoint>,
    line_ids: (NodeId, NodeId),
    line: (Point2, Point2),
    tag_id: NodeId,
    side_selection: SideSelection,
    detector: LineCrossingDetector,
    validator: DataValidator,
    aligner: FrameAligner,
    locator: RelativeLocator,
    calibration: TransformHandle,
    previous: Option<TagSample>,
}

/// Planar endpoints of the line anchors within `anchors`
fn line_endpoints(anchors: &[ReferencePoint], (anchor_a, anchor_b): (NodeId, NodeId)) -> Result<(Point2, Point2)> {
    let endpoint = |id: NodeId| {
        anchors
            .iter()
            .find(|anchor| anchor.id == id)
            .map(ReferencePoint::planar)
            .ok_or_else(|| PositioningError::InvalidInput {
                parameter: "line anchor".into(),
                value: id.to_string(),
                reason: "not in the anchor set".into(),
            })
    };
    Ok((endpoint(anchor_a)?, endpoint(anchor_b)?))
}

impl LineTracker {
    /// Tracker for the line through anchors `anchor_a` → `anchor_b`
    pub fn new(anchors: Vec<ReferencePoint>, anchor_a: NodeId, anchor_b: NodeId, tag_id: NodeId) -> Result<Self> {
        Self::with_validation(anchors, anchor_a, anchor_b, tag_id, ValidationConfig::default())
    }

    pub fn with_validation(
        anchors: Vec<ReferencePoint>,
        anchor_a: NodeId,
        anchor_b: NodeId,
        tag_id: NodeId,
        validation: ValidationConfig,
    ) -> Result<Self> {
        let validator = DataValidator::with_config(validation);
        validator.validate_anchors(&anchors)?;

        let line = line_endpoints(&anchors, (anchor_a, anchor_b))?;
        let detector = LineCrossingDetector::new(line.0, line.1)?;

        Ok(Self {
            anchors,
            line_ids: (anchor_a, anchor_b),
            line,
            tag_id,
            side_selection: SideSelection::Positive,
            detector,
            validator,
            aligner: FrameAligner::new(),
            locator: RelativeLocator::new(Dimensions::Planar),
            calibration: TransformHandle::new(),
            previous: None,
        })
    }

    /// Build from configuration, including geodetic calibration when surveyed
    pub fn from_config(config: &TrackerConfig) -> Result<Self> {
        let mut tracker = Self::with_validation(
            config.reference_points(),
            config.line.anchor_a,
            config.line.anchor_b,
            config.simulation.tag_id,
            config.validation.clone(),
        )?;
        tracker.side_selection = config.trilateration.side_preference;
        tracker.aligner.orthonormality_tolerance = config.tolerances.orthonormality_tolerance;
        tracker.locator =
            RelativeLocator::new(Dimensions::Planar).with_tolerance(config.tolerances.mds_eigenvalue_tolerance);

        if let Some((local, geodetic)) = config.geodetic_reference() {
            tracker.calibrate_geodetic(&local, &geodetic)?;
        }
        Ok(tracker)
    }

    pub fn with_side_selection(mut self, side_selection: SideSelection) -> Self {
        self.side_selection = side_selection;
        self
    }

    pub fn anchors(&self) -> &[ReferencePoint] {
        &self.anchors
    }

    pub fn line(&self) -> (Point2, Point2) {
        self.line
    }

    /// Crossings seen since construction or the last anchor update
    pub fn crossing_count(&self) -> u64 {
        self.detector.crossing_count()
    }

    /// Shared handle; clones observe every recalibration
    pub fn transform_handle(&self) -> TransformHandle {
        self.calibration.clone()
    }

    /// Replace the anchor snapshot, e.g. after self-calibration
    ///
    /// The line is re-derived from the new positions. Positions from the old
    /// snapshot are not comparable with new ones, so motion history and the
    /// crossing detector start over.
    pub fn update_anchors(&mut self, anchors: Vec<ReferencePoint>) -> Result<()> {
        self.validator.validate_anchors(&anchors)?;
        let line = line_endpoints(&anchors, self.line_ids)?;
        self.detector = LineCrossingDetector::new(line.0, line.1)?;
        self.line = line;
        self.anchors = anchors;
        self.validator.clear_history();
        self.previous = None;
        log::info!("Anchor snapshot replaced ({} anchors)", self.anchors.len());
        Ok(())
    }

    /// Locate the anchors from their pairwise ranges and install them
    ///
    /// Index `i` in `distances` refers to anchor `ids[i]`. Labels of known
    /// anchors are kept; the first two ids fix the local frame's origin and
    /// x axis.
    pub fn self_calibrate(&mut self, distances: &PairwiseDistances, ids: &[NodeId]) -> Result<&[ReferencePoint]> {
        let located = distances.locate_reference_points(&self.locator, ids)?;
        let anchors = located
            .into_iter()
            .map(|anchor| {
                let label = self
                    .anchors
                    .iter()
                    .find(|known| known.id == anchor.id)
                    .map(|known| known.label.clone())
                    .unwrap_or_default();
                anchor.with_label(label)
            })
            .collect();
        self.update_anchors(anchors)?;
        Ok(self.anchors.as_slice())
    }

    /// Align the local frame with a target frame and install the result
    ///
    /// Replaces any earlier calibration, geodetic output included.
    pub fn calibrate(&self, set: &CalibrationSet) -> Result<Arc<Calibration>> {
        let transform = self.aligner.align_set(set)?;
        let rms = FrameAligner::residual_rms(&transform, &set.local_points(), &set.target);
        let installed = Arc::new(Calibration::from(transform));
        self.calibration.install(Arc::clone(&installed));
        log::info!("Calibration installed from {} reference points (rms {:.4} m)", set.len(), rms);
        Ok(installed)
    }

    /// Align with surveyed geodetic positions; output then includes lat/lon/alt
    pub fn calibrate_geodetic(
        &self,
        local: &[Point3; 3],
        geodetic: &[GeodeticPosition; 3],
    ) -> Result<Arc<Calibration>> {
        let alignment = self.aligner.align_geodetic(local, geodetic)?;
        let origin = *alignment.tangent_plane().origin();
        let installed = Arc::new(Calibration::from(alignment));
        self.calibration.install(Arc::clone(&installed));
        log::info!(
            "Geodetic calibration installed, tangent plane at {:.7}, {:.7}",
            origin.latitude_deg,
            origin.longitude_deg
        );
        Ok(installed)
    }

    /// Estimate the tag position from one round of ranges and process it
    pub fn process_ranges(&mut self, timestamp_ns: u64, ranges: &[RangeSample]) -> Result<TrackerUpdate> {
        let checked = self.validator.validate_ranges(ranges);
        for (sample, error) in &checked.rejected_samples {
            log::warn!("Rejected range {}-{}: {}", sample.link.from, sample.link.to, error);
        }
        let position = self.locate(&checked.valid_samples)?;
        self.process_position(TagSample::new(timestamp_ns, position))
    }

    /// Process a tag position from any source
    pub fn process_position(&mut self, sample: TagSample) -> Result<TrackerUpdate> {
        if let Err(error) = self.validator.validate_sample(&sample) {
            log::warn!("Rejected tag sample at {} ns: {}", sample.timestamp_ns, error);
            return Err(error.into());
        }

        let velocity = sample
            .velocity
            .or_else(|| self.previous.as_ref().and_then(|previous| finite_difference_velocity(previous, &sample)));

        let (a, b) = self.line;
        let p = sample.planar();
        let signed_distance_m = signed_distance(a, b, p)?;
        let closing_speed_m_s = match velocity {
            Some(v) => Some(closing_speed(a, b, p, Vector2::new(v.x, v.y))?),
            None => None,
        };
        let time_to_line_s = closing_speed_m_s.map(|speed| time_to_line(signed_distance_m, speed));

        let crossing = self.detector.update(sample);
        if let Some(crossing) = &crossing {
            log::info!(
                "Line crossing #{} ({:?}) at {} ns, position ({:.3}, {:.3})",
                self.detector.crossing_count(),
                crossing.direction,
                crossing.interpolated_timestamp_ns,
                crossing.interpolated_position.x,
                crossing.interpolated_position.y
            );
        }

        // One snapshot for both outputs, so a concurrent swap cannot mix them
        let calibration = self.calibration.load();
        let global_position = calibration.as_ref().map(|c| c.to_target(&sample.position));
        let geodetic_position = calibration.as_ref().and_then(|c| c.to_geodetic(&sample.position));

        log::trace!(
            "t={} ns pos=({:.3}, {:.3}) d={:.3} m",
            sample.timestamp_ns,
            p.x,
            p.y,
            signed_distance_m
        );

        self.previous = Some(sample);
        Ok(TrackerUpdate {
            sample,
            signed_distance_m,
            side: Side::from_cross(signed_distance_m),
            closing_speed_m_s,
            time_to_line_s,
            crossing,
            global_position,
            geodetic_position,
        })
    }

    /// Forget motion history; calibration and anchors are kept
    pub fn reset(&mut self) {
        self.detector.reset();
        self.validator.clear_history();
        self.previous = None;
    }

    fn side_preference(&self) -> SidePreference {
        match (self.side_selection, &self.previous) {
            (SideSelection::Positive, _) | (SideSelection::Nearest, None) => SidePreference::Positive,
            (SideSelection::Negative, _) => SidePreference::Negative,
            (SideSelection::Nearest, Some(previous)) => SidePreference::Nearest(previous.planar()),
        }
    }

    fn locate(&self, ranges: &[RangeSample]) -> Result<Point3> {
        let ranged = self
            .anchors
            .iter()
            .filter(|anchor| ranges.iter().any(|r| r.link.other(self.tag_id) == Some(anchor.id)))
            .count();

        let planar = if ranged >= 3 {
            match Trilateration::least_squares(&self.anchors, ranges, self.tag_id) {
                Err(error) if error.kind() == ErrorKind::DegenerateGeometry => {
                    log::debug!("Least squares unavailable ({}), using two-anchor solution", error);
                    Trilateration::estimate(&self.anchors, ranges, self.tag_id, self.side_preference())?
                }
                other => other?,
            }
        } else {
            Trilateration::estimate(&self.anchors, ranges, self.tag_id, self.side_preference())?
        };

        Ok(lift_to_anchor_plane(planar, &self.anchors))
    }
}
