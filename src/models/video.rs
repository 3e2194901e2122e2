use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::paths::{video_dir, HasMediaPaths, VideoPaths};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptType {
    #[default]
    None,
    Manual,
    Auto,
}

impl TranscriptType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranscriptType::None => "none",
            TranscriptType::Manual => "manual",
            TranscriptType::Auto => "auto",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "manual" => TranscriptType::Manual,
            "auto" => TranscriptType::Auto,
            _ => TranscriptType::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoStatus {
    #[default]
    Processing,
    Completed,
    Rejected,
}

impl VideoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Processing => "processing",
            VideoStatus::Completed => "completed",
            VideoStatus::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "completed" => VideoStatus::Completed,
            "rejected" => VideoStatus::Rejected,
            _ => VideoStatus::Processing,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Video {
    pub id: i64,
    pub url: String,
    pub title: Option<String>,
    pub transcript_type: TranscriptType,
    pub num_people: Option<u32>,
    pub status: VideoStatus,
    pub rejection_reason: Option<String>,
    pub duration_secs: Option<f64>,
    pub view_count: Option<u64>,
    pub created_at: String,
}

impl Video {
    pub fn paths(&self, root: &Path) -> VideoPaths {
        VideoPaths::new(self.media_dir(root))
    }
}

impl HasMediaPaths for Video {
    fn media_dir(&self, root: &Path) -> PathBuf {
        video_dir(root, self.id)
    }
}

/// Metadata the scraper stores next to the video (`data.info.json`).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct VideoInfo {
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub view_count: Option<u64>,
    #[serde(default)]
    pub title: Option<String>,
}

impl VideoInfo {
    /// Missing info files are allowed; the view and duration gates are then skipped.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let info = serde_json::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(Some(info))
    }
}
