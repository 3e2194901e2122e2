use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub media: MediaConfig,

    #[serde(default)]
    pub services: ServicesConfig,

    #[serde(default)]
    pub gates: GateConfig,

    #[serde(default)]
    pub tracking: TrackingConfig,

    #[serde(default)]
    pub crop: CropConfig,

    #[serde(default)]
    pub harvest: HarvestConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub sqlite_path: PathBuf,

    /// Milliseconds a writer waits on a locked database before failing.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("harvester")
        .join("harvester.db")
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            sqlite_path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root of the dataset: one directory per video, segments beneath it.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Scratch space for downloads before a video is accepted.
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from(".local/share"))
        .join("harvester/data")
}

fn default_staging_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("harvester/staging")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            staging_dir: default_staging_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg_path: PathBuf,

    #[serde(default = "default_ffprobe")]
    pub ffprobe_path: PathBuf,

    /// Frame rate of the synchronisation network.
    #[serde(default = "default_fps")]
    pub fps: u32,
}

fn default_ffmpeg() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_fps() -> u32 {
    25
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg(),
            ffprobe_path: default_ffprobe(),
            fps: default_fps(),
        }
    }
}

/// Connection settings for one analysis service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    pub endpoint: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    10_000
}

impl ServiceEndpoint {
    fn local(port: u16) -> Self {
        Self {
            endpoint: format!("http://127.0.0.1:{}", port),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesConfig {
    #[serde(default = "default_scraper")]
    pub video_scraper: ServiceEndpoint,

    #[serde(default = "default_speech")]
    pub speech_recognition: ServiceEndpoint,

    #[serde(default = "default_alignment")]
    pub forced_alignment: ServiceEndpoint,

    #[serde(default = "default_detection")]
    pub face_detection: ServiceEndpoint,

    #[serde(default = "default_sync")]
    pub sync_net: ServiceEndpoint,

    #[serde(default = "default_pose")]
    pub head_pose: ServiceEndpoint,

    #[serde(default = "default_embedding")]
    pub face_embedding: ServiceEndpoint,
}

fn default_scraper() -> ServiceEndpoint {
    ServiceEndpoint::local(8080)
}

fn default_speech() -> ServiceEndpoint {
    ServiceEndpoint::local(8081)
}

fn default_alignment() -> ServiceEndpoint {
    ServiceEndpoint::local(8082)
}

fn default_detection() -> ServiceEndpoint {
    ServiceEndpoint::local(8083)
}

fn default_sync() -> ServiceEndpoint {
    ServiceEndpoint::local(8084)
}

fn default_pose() -> ServiceEndpoint {
    ServiceEndpoint::local(8085)
}

fn default_embedding() -> ServiceEndpoint {
    ServiceEndpoint::local(8086)
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            video_scraper: default_scraper(),
            speech_recognition: default_speech(),
            forced_alignment: default_alignment(),
            face_detection: default_detection(),
            sync_net: default_sync(),
            head_pose: default_pose(),
            face_embedding: default_embedding(),
        }
    }
}

/// Thresholds applied at each quality gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    #[serde(default = "default_asr_confidence_floor")]
    pub asr_confidence_floor: f64,

    /// Minimum TF-IDF cosine similarity between caption and ASR text.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    #[serde(default = "default_sync_confidence_floor")]
    pub sync_confidence_floor: f64,

    /// Median embedding distance below which a segment joins an identity.
    #[serde(default = "default_identity_distance")]
    pub identity_distance_threshold: f32,
}

fn default_asr_confidence_floor() -> f64 {
    -10.0
}

fn default_similarity_threshold() -> f64 {
    0.1
}

fn default_sync_confidence_floor() -> f64 {
    5.0
}

fn default_identity_distance() -> f32 {
    1.0
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            asr_confidence_floor: default_asr_confidence_floor(),
            similarity_threshold: default_similarity_threshold(),
            sync_confidence_floor: default_sync_confidence_floor(),
            identity_distance_threshold: default_identity_distance(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    #[serde(default = "default_detect_every")]
    pub detect_every: usize,

    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f64,

    #[serde(default = "default_min_tracking_quality")]
    pub min_tracking_quality: f64,

    #[serde(default = "default_min_detection_confidence")]
    pub min_detection_confidence: f64,
}

fn default_detect_every() -> usize {
    10
}

fn default_iou_threshold() -> f64 {
    0.2
}

fn default_min_tracking_quality() -> f64 {
    7.0
}

fn default_min_detection_confidence() -> f64 {
    1.0
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            detect_every: default_detect_every(),
            iou_threshold: default_iou_threshold(),
            min_tracking_quality: default_min_tracking_quality(),
            min_detection_confidence: default_min_detection_confidence(),
        }
    }
}

/// Geometry of the wide speaker crop handed to pose and embedding services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CropConfig {
    #[serde(default = "default_crop_size")]
    pub width: u32,

    #[serde(default = "default_crop_size")]
    pub height: u32,

    #[serde(default = "default_x_pad")]
    pub x_pad: i32,

    #[serde(default = "default_y_pad")]
    pub y_pad: i32,

    #[serde(default = "default_crop_scale")]
    pub crop_scale: f64,

    /// Odd window length for the median filter over track boxes.
    #[serde(default = "default_smoothing_kernel")]
    pub smoothing_kernel: usize,
}

fn default_crop_size() -> u32 {
    250
}

fn default_x_pad() -> i32 {
    30
}

fn default_y_pad() -> i32 {
    50
}

fn default_crop_scale() -> f64 {
    0.4
}

fn default_smoothing_kernel() -> usize {
    13
}

impl Default for CropConfig {
    fn default() -> Self {
        Self {
            width: default_crop_size(),
            height: default_crop_size(),
            x_pad: default_x_pad(),
            y_pad: default_y_pad(),
            crop_scale: default_crop_scale(),
            smoothing_kernel: default_smoothing_kernel(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestConfig {
    #[serde(default)]
    pub manual_transcripts_only: bool,

    #[serde(default)]
    pub min_views: Option<u64>,

    /// Longest accepted video, in minutes.
    #[serde(default)]
    pub max_duration_mins: Option<u64>,

    /// Keep cropped clips of people who were not speaking.
    #[serde(default)]
    pub keep_non_speakers: bool,

    #[serde(default = "default_min_segment_ms")]
    pub min_segment_ms: u64,

    /// Videos harvested concurrently from a channel or playlist.
    #[serde(default = "default_jobs")]
    pub jobs: usize,
}

fn default_min_segment_ms() -> u64 {
    1_000
}

fn default_jobs() -> usize {
    1
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            manual_transcripts_only: false,
            min_views: None,
            max_duration_mins: None,
            keep_non_speakers: false,
            min_segment_ms: default_min_segment_ms(),
            jobs: default_jobs(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            storage: StorageConfig::default(),
            media: MediaConfig::default(),
            services: ServicesConfig::default(),
            gates: GateConfig::default(),
            tracking: TrackingConfig::default(),
            crop: CropConfig::default(),
            harvest: HarvestConfig::default(),
        }
    }
}

impl Config {
    /// Load from `HARVESTER_CONFIG` or the default location, writing defaults on first run.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("parsing config {}", path.display()))?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("harvester")
    }

    fn config_path() -> PathBuf {
        match std::env::var_os("HARVESTER_CONFIG") {
            Some(path) => PathBuf::from(path),
            None => Self::config_dir().join("config.toml"),
        }
    }
}
