//! Multi-object face tracking.
//!
//! A detector runs every `detect_every` frames and a visual tracker follows
//! each face in between. Detections that overlap an existing tracker are
//! treated as already tracked; new faces get a fresh, monotonically
//! increasing id. Trackers whose quality drops below the floor are dropped
//! before the next detection pass, and trackers that drift onto the same face
//! are merged so one face never holds two live ids.
//!
//! The configured pipeline asks the remote detection service for tracks.
//! [`TrackingDetector`] is the in-process alternative: it wraps a local
//! [`FrameAnalyzer`] as a [`FaceDetector`], to be set as
//! `Services::detector` in place of the HTTP client.

use anyhow::Result;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, trace};

use super::bbox::BoundingBox;
use super::tracks::FrameTracks;
use crate::config::TrackingConfig;
use crate::error::ServiceError;
use crate::services::FaceDetector;

/// A face found by the detector in one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f64,
}

/// Follows one face from frame to frame.
pub trait VisualTracker<F> {
    /// Advance to `frame` and report tracking quality (higher is better).
    fn update(&mut self, frame: &F) -> f64;

    fn position(&self) -> BoundingBox;
}

/// Source of frames, detections and trackers for a video.
pub trait FrameAnalyzer {
    type Frame;
    type Tracker: VisualTracker<Self::Frame>;

    fn frames<'a>(&'a self, video: &Path) -> Result<Box<dyn Iterator<Item = Result<Self::Frame>> + 'a>>;

    fn detect(&self, frame: &Self::Frame) -> Result<Vec<Detection>>;

    fn start_tracker(&self, frame: &Self::Frame, bbox: BoundingBox) -> Result<Self::Tracker>;
}

/// Incremental tracker state for one video.
pub struct FaceTracker<'a, A: FrameAnalyzer> {
    analyzer: &'a A,
    config: TrackingConfig,
    trackers: BTreeMap<u32, A::Tracker>,
    next_id: u32,
    frame_index: usize,
    tracks: FrameTracks,
}

impl<'a, A: FrameAnalyzer> FaceTracker<'a, A> {
    pub fn new(analyzer: &'a A, config: TrackingConfig) -> Self {
        Self {
            analyzer,
            config,
            trackers: BTreeMap::new(),
            next_id: 0,
            frame_index: 0,
            tracks: FrameTracks::new(),
        }
    }

    pub fn active_ids(&self) -> Vec<u32> {
        self.trackers.keys().copied().collect()
    }

    pub fn push_frame(&mut self, frame: &A::Frame) -> Result<()> {
        let min_quality = self.config.min_tracking_quality;
        let frame_index = self.frame_index;
        self.trackers.retain(|id, tracker| {
            let quality = tracker.update(frame);
            if quality < min_quality {
                debug!(frame = frame_index, track = id, quality, "Dropping low-quality tracker");
                false
            } else {
                true
            }
        });

        let cadence = self.config.detect_every.max(1);
        if self.frame_index % cadence == 0 {
            self.spawn_trackers(frame)?;
        }

        self.merge_overlapping();

        let boxes = self
            .trackers
            .iter()
            .map(|(&id, tracker)| (id, tracker.position()))
            .collect();
        self.tracks.insert_frame(self.frame_index, boxes);
        self.frame_index += 1;
        Ok(())
    }

    pub fn finish(self) -> FrameTracks {
        self.tracks
    }

    fn spawn_trackers(&mut self, frame: &A::Frame) -> Result<()> {
        let detections = self.analyzer.detect(frame)?;
        for detection in detections {
            if detection.confidence < self.config.min_detection_confidence {
                continue;
            }

            let already_tracked = self
                .trackers
                .values()
                .any(|t| t.position().iou(&detection.bbox) > self.config.iou_threshold);
            if already_tracked {
                continue;
            }

            let tracker = self.analyzer.start_tracker(frame, detection.bbox)?;
            trace!(frame = self.frame_index, track = self.next_id, "Starting tracker");
            self.trackers.insert(self.next_id, tracker);
            self.next_id += 1;
        }
        Ok(())
    }

    /// Collapse overlapping trackers until no pair exceeds the IoU threshold.
    /// The lower id survives and adopts the newer tracker of the higher id.
    fn merge_overlapping(&mut self) {
        loop {
            let positions: Vec<(u32, BoundingBox)> = self
                .trackers
                .iter()
                .map(|(&id, t)| (id, t.position()))
                .collect();

            let overlap = positions.iter().enumerate().find_map(|(i, (low, a))| {
                positions[i + 1..]
                    .iter()
                    .find(|(_, b)| a.iou(b) > self.config.iou_threshold)
                    .map(|(high, _)| (*low, *high))
            });

            let Some((low, high)) = overlap else {
                break;
            };

            if let Some(newer) = self.trackers.remove(&high) {
                debug!(frame = self.frame_index, kept = low, removed = high, "Merging duplicate trackers");
                self.trackers.insert(low, newer);
            }
        }
    }
}

/// Run the tracker over every frame of a video.
pub fn track_video<A: FrameAnalyzer>(
    analyzer: &A,
    video: &Path,
    config: &TrackingConfig,
) -> Result<FrameTracks> {
    let mut tracker = FaceTracker::new(analyzer, config.clone());
    for frame in analyzer.frames(video)? {
        tracker.push_frame(&frame?)?;
    }
    Ok(tracker.finish())
}

/// In-process face detection: the tracker driven by a local frame analyzer.
pub struct TrackingDetector<A> {
    analyzer: A,
    config: TrackingConfig,
}

impl<A> TrackingDetector<A> {
    pub fn new(analyzer: A, config: TrackingConfig) -> Self {
        Self { analyzer, config }
    }
}

impl<A> FaceDetector for TrackingDetector<A>
where
    A: FrameAnalyzer + Send + Sync,
{
    fn detect(&self, video: &Path) -> Result<FrameTracks, ServiceError> {
        track_video(&self.analyzer, video, &self.config).map_err(|e| ServiceError::Local {
            service: "face-tracker",
            message: format!("{:#}", e),
        })
    }
}
