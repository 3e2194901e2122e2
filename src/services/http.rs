use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

use super::client::{MediaPayload, ServiceClient};
use super::{
    Alignment, FaceDetector, FaceEmbedder, ForcedAligner, HeadPoseEstimator, PoseEstimate,
    SpeechRecognizer, Synchroniser, Transcription, VideoScraper, VideoSource,
};
use crate::config::ServiceEndpoint;
use crate::error::ServiceError;
use crate::faces::{BoundingBox, FrameTracks, SyncResult};

#[derive(Serialize)]
struct VideoRequest {
    video: MediaPayload,
}

impl VideoRequest {
    fn from_path(video: &Path) -> Result<Self, ServiceError> {
        Ok(Self {
            video: MediaPayload::from_path(video)?,
        })
    }
}

// ============================================================================
// Speech recognition
// ============================================================================

pub struct HttpSpeechRecognizer {
    client: ServiceClient,
}

impl HttpSpeechRecognizer {
    pub fn new(config: &ServiceEndpoint) -> Self {
        Self {
            client: ServiceClient::new("speech-recognition", config),
        }
    }
}

#[derive(Serialize)]
struct TranscribeRequest {
    audio: MediaPayload,
}

/// Either a single result or ranked candidates, best first.
#[derive(Deserialize)]
#[serde(untagged)]
enum TranscribeResponse {
    Single(Transcription),
    Candidates(Vec<Transcription>),
}

impl SpeechRecognizer for HttpSpeechRecognizer {
    fn transcribe(&self, audio: &Path) -> Result<Transcription, ServiceError> {
        let request = TranscribeRequest {
            audio: MediaPayload::from_path(audio)?,
        };
        let response: TranscribeResponse = self.client.post_json("/transcribe/", &request)?;
        match response {
            TranscribeResponse::Single(t) => Ok(t),
            TranscribeResponse::Candidates(candidates) => candidates
                .into_iter()
                .next()
                .ok_or_else(|| ServiceError::empty(self.client.service(), "no candidates")),
        }
    }
}

// ============================================================================
// Face detection
// ============================================================================

pub struct HttpFaceDetector {
    client: ServiceClient,
}

impl HttpFaceDetector {
    pub fn new(config: &ServiceEndpoint) -> Self {
        Self {
            client: ServiceClient::new("face-detection", config),
        }
    }
}

impl FaceDetector for HttpFaceDetector {
    fn detect(&self, video: &Path) -> Result<FrameTracks, ServiceError> {
        self.client
            .post_json("/detect/", &VideoRequest::from_path(video)?)
    }
}

// ============================================================================
// Audio-visual synchronisation
// ============================================================================

/// The sync service keeps the last crop it produced, so a synchronise
/// request and the crop download that follows must not interleave with
/// another pair.
pub struct HttpSynchroniser {
    client: ServiceClient,
    session: Mutex<()>,
}

impl HttpSynchroniser {
    pub fn new(config: &ServiceEndpoint) -> Self {
        Self {
            client: ServiceClient::new("sync-net", config),
            session: Mutex::new(()),
        }
    }
}

#[derive(Serialize)]
struct TrackBox {
    x1: i32,
    y1: i32,
    x2: i32,
    y2: i32,
}

#[derive(Serialize)]
struct SynchroniseRequest {
    video: MediaPayload,
    track: Vec<TrackBox>,
}

impl Synchroniser for HttpSynchroniser {
    fn synchronise(
        &self,
        video: &Path,
        track: &[BoundingBox],
        crop_dest: &Path,
    ) -> Result<SyncResult, ServiceError> {
        let request = SynchroniseRequest {
            video: MediaPayload::from_path(video)?,
            track: track
                .iter()
                .map(|b| TrackBox {
                    x1: b.x1,
                    y1: b.y1,
                    x2: b.x2,
                    y2: b.y2,
                })
                .collect(),
        };

        // A poisoned lock only means another pair failed midway; the
        // service state is replaced by the next request anyway.
        let _guard = self
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let result: SyncResult = self.client.post_json("/synchronise/", &request)?;
        self.client.get_to_file("/crop/", crop_dest)?;
        debug!(
            offset = result.offset,
            confidence = result.confidence,
            crop = %crop_dest.display(),
            "Synchronised track"
        );
        Ok(result)
    }
}

// ============================================================================
// Forced alignment
// ============================================================================

pub struct HttpForcedAligner {
    client: ServiceClient,
}

impl HttpForcedAligner {
    pub fn new(config: &ServiceEndpoint) -> Self {
        Self {
            client: ServiceClient::new("forced-alignment", config),
        }
    }
}

#[derive(Serialize)]
struct AlignRequest {
    audio: MediaPayload,
    transcript: MediaPayload,
}

impl ForcedAligner for HttpForcedAligner {
    fn align(&self, audio: &Path, transcript: &str) -> Result<Alignment, ServiceError> {
        let request = AlignRequest {
            audio: MediaPayload::from_path(audio)?,
            transcript: MediaPayload::from_text("transcript.txt", transcript),
        };
        self.client.post_json("/align/", &request)
    }
}

// ============================================================================
// Head pose
// ============================================================================

pub struct HttpHeadPoseEstimator {
    client: ServiceClient,
}

impl HttpHeadPoseEstimator {
    pub fn new(config: &ServiceEndpoint) -> Self {
        Self {
            client: ServiceClient::new("head-pose", config),
        }
    }
}

impl HeadPoseEstimator for HttpHeadPoseEstimator {
    fn estimate(&self, video: &Path) -> Result<PoseEstimate, ServiceError> {
        self.client
            .post_json("/estimate/", &VideoRequest::from_path(video)?)
    }
}

// ============================================================================
// Face embeddings
// ============================================================================

pub struct HttpFaceEmbedder {
    client: ServiceClient,
}

impl HttpFaceEmbedder {
    pub fn new(config: &ServiceEndpoint) -> Self {
        Self {
            client: ServiceClient::new("face-net", config),
        }
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    embeddings: Vec<f32>,
}

impl FaceEmbedder for HttpFaceEmbedder {
    fn embed_video(&self, video: &Path) -> Result<Vec<f32>, ServiceError> {
        let response: EmbeddingResponse = self
            .client
            .post_json("/embeddings/video", &VideoRequest::from_path(video)?)?;
        if response.embeddings.is_empty() {
            return Err(ServiceError::empty(self.client.service(), "no face found"));
        }
        Ok(response.embeddings)
    }
}

// ============================================================================
// Video scraper
// ============================================================================

pub struct HttpVideoScraper {
    client: ServiceClient,
}

impl HttpVideoScraper {
    pub fn new(config: &ServiceEndpoint) -> Self {
        Self {
            client: ServiceClient::new("video-scraper", config),
        }
    }
}

#[derive(Serialize)]
struct DownloadRequest<'a> {
    url: &'a str,
}

#[derive(Deserialize)]
struct DownloadManifest {
    files: Vec<DownloadedFile>,
}

#[derive(Deserialize)]
struct DownloadedFile {
    filename: String,
    data: String,
}

/// Map a scraper file name such as `abc123.en.vtt` onto the video layout.
fn canonical_name(filename: &str) -> Option<&'static str> {
    if filename.ends_with(".en.vtt") {
        Some("transcript.en.vtt")
    } else if filename.ends_with(".info.json") {
        Some("data.info.json")
    } else if filename.ends_with(".mp4") {
        Some("video.mp4")
    } else if filename.ends_with(".wav") {
        Some("audio.wav")
    } else {
        None
    }
}

impl VideoScraper for HttpVideoScraper {
    fn download(&self, url: &str, dest_dir: &Path) -> Result<(), ServiceError> {
        let manifest: DownloadManifest =
            self.client.post_json("/videos/download", &DownloadRequest { url })?;
        if manifest.files.is_empty() {
            return Err(ServiceError::empty(self.client.service(), "download returned no files"));
        }

        std::fs::create_dir_all(dest_dir)?;
        for file in manifest.files {
            let Some(name) = canonical_name(&file.filename) else {
                debug!(filename = %file.filename, "Ignoring unexpected download file");
                continue;
            };
            let bytes = BASE64
                .decode(file.data.as_bytes())
                .map_err(|e| ServiceError::decode(self.client.service(), e))?;
            std::fs::write(dest_dir.join(name), bytes)?;
        }
        info!(url = %url, dir = %dest_dir.display(), "Downloaded video");
        Ok(())
    }

    fn list_urls(&self, source: &VideoSource) -> Result<Vec<String>, ServiceError> {
        self.client
            .get_json(&format!("/urls/{}/{}", source.kind(), source.id()))
    }
}
