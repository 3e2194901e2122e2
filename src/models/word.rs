use std::path::{Path, PathBuf};

use super::paths::{segment_dir, HasMediaPaths, WordPaths};

/// A single aligned word cut out of a speaker clip.
#[derive(Debug, Clone, PartialEq)]
pub struct Word {
    pub id: i64,
    pub segment_id: i64,
    pub video_id: i64,
    pub text: String,
    /// Seconds from the start of the segment.
    pub start: f64,
    pub end: f64,
    pub alignment_score: f64,
    pub asr_text: Option<String>,
    pub asr_confidence: Option<f64>,
}

impl Word {
    pub fn paths(&self, root: &Path) -> WordPaths {
        WordPaths::new(&self.media_dir(root), self.id)
    }
}

impl HasMediaPaths for Word {
    /// Words share their segment's `words/` directory, one file stem per word id.
    fn media_dir(&self, root: &Path) -> PathBuf {
        segment_dir(root, self.video_id, self.segment_id).join("words")
    }
}
