pub mod bbox;
pub mod clustering;
pub mod speaker;
pub mod tracker;
pub mod tracks;

pub use bbox::BoundingBox;
pub use clustering::{cluster_identities, IdentityClusteringResult};
pub use speaker::{audio_delay_secs, select_speaker, SpeakerSelection, SyncResult};
pub use tracker::{track_video, Detection, FaceTracker, FrameAnalyzer, TrackingDetector, VisualTracker};
pub use tracks::FrameTracks;
