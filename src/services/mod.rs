//! Analysis services the pipeline consults.
//!
//! Each capability is a trait so the pipeline can run against the HTTP
//! services in production and against fakes in tests. Every call blocks and
//! returns a [`ServiceError`] on failure; the pipeline decides whether that
//! rejects a segment, a word or nothing at all.

pub mod client;
mod http;
pub mod retry;

use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

use crate::config::ServicesConfig;
use crate::error::ServiceError;
use crate::faces::{BoundingBox, FrameTracks, SyncResult};
use crate::models::{AlignedWord, HeadPose, HeadPoseDirection};

pub use client::{MediaPayload, ServiceClient};
pub use http::{
    HttpFaceDetector, HttpFaceEmbedder, HttpForcedAligner, HttpHeadPoseEstimator,
    HttpSpeechRecognizer, HttpSynchroniser, HttpVideoScraper,
};
pub use retry::{with_retry, RetryConfig};

/// Best recognition candidate for an audio clip.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Transcription {
    pub transcript: String,
    pub confidence: f64,
    #[serde(default)]
    pub words: Vec<RecognizedWord>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RecognizedWord {
    pub word: String,
    pub start_time: f64,
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Alignment {
    #[serde(rename = "av_log_likelihood_per_frame")]
    pub log_likelihood: f64,
    #[serde(rename = "alignment")]
    pub words: Vec<AlignedWord>,
}

/// Per-frame head angles as `[yaw, pitch, roll]` plus an optional label.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PoseEstimate {
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub angles: Vec<[f64; 3]>,
}

impl PoseEstimate {
    /// Median yaw, pitch and roll over all frames. The service label wins
    /// when it names a known direction.
    pub fn median_pose(&self) -> Option<HeadPose> {
        if self.angles.is_empty() {
            return None;
        }
        let yaw = median(self.angles.iter().map(|a| a[0]).collect());
        let pitch = median(self.angles.iter().map(|a| a[1]).collect());
        let roll = median(self.angles.iter().map(|a| a[2]).collect());

        let direction = match self.direction.as_deref().map(HeadPoseDirection::parse) {
            Some(d) if d != HeadPoseDirection::NoType => d,
            _ => HeadPoseDirection::from_angles(yaw, pitch),
        };

        Some(HeadPose {
            yaw,
            pitch,
            roll,
            direction,
        })
    }
}

fn median(mut values: Vec<f64>) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// Where a batch of video URLs comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoSource {
    Channel(String),
    User(String),
    Playlist(String),
}

impl VideoSource {
    pub fn kind(&self) -> &'static str {
        match self {
            VideoSource::Channel(_) => "channel",
            VideoSource::User(_) => "user",
            VideoSource::Playlist(_) => "playlist",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            VideoSource::Channel(id) | VideoSource::User(id) | VideoSource::Playlist(id) => id,
        }
    }
}

pub trait SpeechRecognizer: Send + Sync {
    fn transcribe(&self, audio: &Path) -> Result<Transcription, ServiceError>;
}

pub trait FaceDetector: Send + Sync {
    /// Track faces over every frame of `video`.
    fn detect(&self, video: &Path) -> Result<FrameTracks, ServiceError>;
}

pub trait Synchroniser: Send + Sync {
    /// Score audio-visual sync for one face track and save the face crop the
    /// service produced to `crop_dest`.
    fn synchronise(
        &self,
        video: &Path,
        track: &[BoundingBox],
        crop_dest: &Path,
    ) -> Result<SyncResult, ServiceError>;
}

pub trait ForcedAligner: Send + Sync {
    fn align(&self, audio: &Path, transcript: &str) -> Result<Alignment, ServiceError>;
}

pub trait HeadPoseEstimator: Send + Sync {
    fn estimate(&self, video: &Path) -> Result<PoseEstimate, ServiceError>;
}

pub trait FaceEmbedder: Send + Sync {
    fn embed_video(&self, video: &Path) -> Result<Vec<f32>, ServiceError>;
}

pub trait VideoScraper: Send + Sync {
    /// Download a video with its transcript and info file into `dest_dir`.
    fn download(&self, url: &str, dest_dir: &Path) -> Result<(), ServiceError>;

    fn list_urls(&self, source: &VideoSource) -> Result<Vec<String>, ServiceError>;
}

/// The full set of services a harvest needs.
#[derive(Clone)]
pub struct Services {
    pub scraper: Arc<dyn VideoScraper>,
    pub speech: Arc<dyn SpeechRecognizer>,
    pub detector: Arc<dyn FaceDetector>,
    pub sync: Arc<dyn Synchroniser>,
    pub aligner: Arc<dyn ForcedAligner>,
    pub head_pose: Arc<dyn HeadPoseEstimator>,
    pub embedder: Arc<dyn FaceEmbedder>,
}

impl Services {
    pub fn from_config(config: &ServicesConfig) -> Self {
        Self {
            scraper: Arc::new(HttpVideoScraper::new(&config.video_scraper)),
            speech: Arc::new(HttpSpeechRecognizer::new(&config.speech_recognition)),
            detector: Arc::new(HttpFaceDetector::new(&config.face_detection)),
            sync: Arc::new(HttpSynchroniser::new(&config.sync_net)),
            aligner: Arc::new(HttpForcedAligner::new(&config.forced_alignment)),
            head_pose: Arc::new(HttpHeadPoseEstimator::new(&config.head_pose)),
            embedder: Arc::new(HttpFaceEmbedder::new(&config.face_embedding)),
        }
    }
}
