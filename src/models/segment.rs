use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::paths::{segment_dir, HasMediaPaths, SegmentPaths};
use crate::error::RejectReason;
use crate::faces::FrameTracks;

/// Position of a segment in the curation pipeline.
///
/// States only move forward. `Rejected` is terminal: a rejected segment is
/// deleted together with its media and never re-enters a stage.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentState {
    Pending,
    AsrValidated,
    FaceDetected,
    Synchronized,
    Aligned,
    Finalized,
    Rejected(RejectReason),
}

impl SegmentState {
    pub fn label(&self) -> &'static str {
        match self {
            SegmentState::Pending => "pending",
            SegmentState::AsrValidated => "asr_validated",
            SegmentState::FaceDetected => "face_detected",
            SegmentState::Synchronized => "synchronized",
            SegmentState::Aligned => "aligned",
            SegmentState::Finalized => "finalized",
            SegmentState::Rejected(_) => "rejected",
        }
    }

    /// Parse a persisted label. Rejected segments are never persisted.
    pub fn from_label(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SegmentState::Pending),
            "asr_validated" => Some(SegmentState::AsrValidated),
            "face_detected" => Some(SegmentState::FaceDetected),
            "synchronized" => Some(SegmentState::Synchronized),
            "aligned" => Some(SegmentState::Aligned),
            "finalized" => Some(SegmentState::Finalized),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            SegmentState::Pending => 0,
            SegmentState::AsrValidated => 1,
            SegmentState::FaceDetected => 2,
            SegmentState::Synchronized => 3,
            SegmentState::Aligned => 4,
            SegmentState::Finalized => 5,
            SegmentState::Rejected(_) => u8::MAX,
        }
    }

    pub fn rejection(&self) -> Option<&RejectReason> {
        match self {
            SegmentState::Rejected(reason) => Some(reason),
            _ => None,
        }
    }

    /// Whether moving to `next` keeps the state machine monotone.
    pub fn can_advance_to(&self, next: &SegmentState) -> bool {
        if self.rejection().is_some() {
            return false;
        }
        next.rejection().is_some() || next.rank() >= self.rank()
    }
}

/// Cluster id of the person on screen, unique within a video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocalIdentity {
    Assigned(u32),
    #[default]
    Unassigned,
}

impl LocalIdentity {
    pub const UNASSIGNED: i64 = -1;

    pub fn to_db(self) -> i64 {
        match self {
            LocalIdentity::Assigned(id) => id as i64,
            LocalIdentity::Unassigned => Self::UNASSIGNED,
        }
    }

    pub fn from_db(value: Option<i64>) -> Self {
        match value {
            Some(id) if id >= 0 => LocalIdentity::Assigned(id as u32),
            _ => LocalIdentity::Unassigned,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeadPoseDirection {
    #[default]
    NoType,
    UpperLeft,
    UpperCentre,
    UpperRight,
    CentreLeft,
    Centre,
    CentreRight,
    LowerLeft,
    LowerCentre,
    LowerRight,
}

impl HeadPoseDirection {
    /// Degrees either side of zero still considered facing the camera.
    pub const CENTRE_BAND: f64 = 10.0;

    pub fn as_str(&self) -> &'static str {
        match self {
            HeadPoseDirection::NoType => "none",
            HeadPoseDirection::UpperLeft => "upper left",
            HeadPoseDirection::UpperCentre => "upper centre",
            HeadPoseDirection::UpperRight => "upper right",
            HeadPoseDirection::CentreLeft => "centre left",
            HeadPoseDirection::Centre => "centre",
            HeadPoseDirection::CentreRight => "centre right",
            HeadPoseDirection::LowerLeft => "lower left",
            HeadPoseDirection::LowerCentre => "lower centre",
            HeadPoseDirection::LowerRight => "lower right",
        }
    }

    /// Parse labels such as `"upper left"` or `"CENTRE_RIGHT"`.
    pub fn parse(label: &str) -> Self {
        let normalised = label.trim().to_lowercase().replace('_', " ");
        match normalised.as_str() {
            "upper left" => HeadPoseDirection::UpperLeft,
            "upper centre" => HeadPoseDirection::UpperCentre,
            "upper right" => HeadPoseDirection::UpperRight,
            "centre left" => HeadPoseDirection::CentreLeft,
            "centre" => HeadPoseDirection::Centre,
            "centre right" => HeadPoseDirection::CentreRight,
            "lower left" => HeadPoseDirection::LowerLeft,
            "lower centre" => HeadPoseDirection::LowerCentre,
            "lower right" => HeadPoseDirection::LowerRight,
            _ => HeadPoseDirection::NoType,
        }
    }

    /// Discretise yaw and pitch (degrees). Pitch picks the row and yaw the
    /// column, each with a centre band of +/-10 degrees.
    pub fn from_angles(yaw: f64, pitch: f64) -> Self {
        let band = Self::CENTRE_BAND;
        let row = if pitch.abs() <= band {
            0
        } else if pitch > band {
            1
        } else {
            -1
        };
        let col = if yaw.abs() <= band {
            0
        } else if yaw > band {
            1
        } else {
            -1
        };

        match (row, col) {
            (1, -1) => HeadPoseDirection::UpperLeft,
            (1, 0) => HeadPoseDirection::UpperCentre,
            (1, _) => HeadPoseDirection::UpperRight,
            (0, -1) => HeadPoseDirection::CentreLeft,
            (0, 0) => HeadPoseDirection::Centre,
            (0, _) => HeadPoseDirection::CentreRight,
            (_, -1) => HeadPoseDirection::LowerLeft,
            (_, 0) => HeadPoseDirection::LowerCentre,
            _ => HeadPoseDirection::LowerRight,
        }
    }
}

/// Median head orientation over the speaker clip, in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadPose {
    pub yaw: f64,
    pub pitch: f64,
    pub roll: f64,
    pub direction: HeadPoseDirection,
}

/// One forced-alignment triple plus its score. Serialized as
/// `[text, start, end, score]`, times in seconds from the segment start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "(String, f64, f64, f64)", into = "(String, f64, f64, f64)")]
pub struct AlignedWord {
    pub text: String,
    pub start: f64,
    pub end: f64,
    pub score: f64,
}

impl From<(String, f64, f64, f64)> for AlignedWord {
    fn from((text, start, end, score): (String, f64, f64, f64)) -> Self {
        Self {
            text,
            start,
            end,
            score,
        }
    }
}

impl From<AlignedWord> for (String, f64, f64, f64) {
    fn from(w: AlignedWord) -> Self {
        (w.text, w.start, w.end, w.score)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeakerSync {
    pub track_id: u32,
    pub offset: i32,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub id: i64,
    pub video_id: i64,
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
    pub state: SegmentState,
    pub frame_detections: Option<FrameTracks>,
    pub asr_text: Option<String>,
    pub asr_confidence: Option<f64>,
    pub speaker: Option<SpeakerSync>,
    pub head_pose: Option<HeadPose>,
    pub local_identity: LocalIdentity,
    pub fa_log_likelihood: Option<f64>,
    pub fa_alignment: Option<Vec<AlignedWord>>,
}

impl Segment {
    pub fn new(id: i64, video_id: i64, start_ms: u64, end_ms: u64, text: impl Into<String>) -> Self {
        Self {
            id,
            video_id,
            start_ms,
            end_ms,
            text: text.into(),
            state: SegmentState::Pending,
            frame_detections: None,
            asr_text: None,
            asr_confidence: None,
            speaker: None,
            head_pose: None,
            local_identity: LocalIdentity::Unassigned,
            fa_log_likelihood: None,
            fa_alignment: None,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }

    /// Whole-second bounds used for the video cut.
    pub fn whole_seconds(&self) -> (u64, u64) {
        (self.start_ms / 1000, self.end_ms / 1000)
    }

    pub fn paths(&self, root: &Path) -> SegmentPaths {
        SegmentPaths::new(self.media_dir(root))
    }
}

impl HasMediaPaths for Segment {
    fn media_dir(&self, root: &Path) -> PathBuf {
        segment_dir(root, self.video_id, self.id)
    }
}
