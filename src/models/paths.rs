//! On-disk layout of harvested media.
//!
//! ```text
//! <data_dir>/<video_id>/
//!     video.mp4 audio.wav transcript.en.vtt data.info.json
//!     segments/<segment_id>/
//!         video.mp4 audio.wav combined.mp4 transcript.txt
//!         cropped_speaker.{avi,mp4,wav} cropped_speaker_bigger.avi
//!         cropped_person_<track>.{avi,mp4}
//!         words/<word_id>.{avi,mp4,wav}
//! ```

use std::path::{Path, PathBuf};

/// An entity that owns a media directory under the data root.
///
/// Each implementation derives its directory from its own id and its
/// parent's id, so paths never depend on a parent object being loaded.
pub trait HasMediaPaths {
    fn media_dir(&self, root: &Path) -> PathBuf;

    fn media_path(&self, root: &Path, name: &str) -> PathBuf {
        self.media_dir(root).join(name)
    }
}

pub fn video_dir(root: &Path, video_id: i64) -> PathBuf {
    root.join(video_id.to_string())
}

pub fn segment_dir(root: &Path, video_id: i64, segment_id: i64) -> PathBuf {
    video_dir(root, video_id)
        .join("segments")
        .join(segment_id.to_string())
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoPaths {
    pub dir: PathBuf,
    pub video: PathBuf,
    pub audio: PathBuf,
    pub transcript: PathBuf,
    pub info: PathBuf,
    pub segments: PathBuf,
}

impl VideoPaths {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            video: dir.join("video.mp4"),
            audio: dir.join("audio.wav"),
            transcript: dir.join("transcript.en.vtt"),
            info: dir.join("data.info.json"),
            segments: dir.join("segments"),
            dir,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentPaths {
    pub dir: PathBuf,
    pub video: PathBuf,
    pub audio: PathBuf,
    pub combined: PathBuf,
    pub transcript: PathBuf,
    pub speaker_video: PathBuf,
    pub speaker_video_wide: PathBuf,
    pub speaker_video_mp4: PathBuf,
    pub speaker_audio: PathBuf,
    pub words: PathBuf,
}

impl SegmentPaths {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            video: dir.join("video.mp4"),
            audio: dir.join("audio.wav"),
            combined: dir.join("combined.mp4"),
            transcript: dir.join("transcript.txt"),
            speaker_video: dir.join("cropped_speaker.avi"),
            speaker_video_wide: dir.join("cropped_speaker_bigger.avi"),
            speaker_video_mp4: dir.join("cropped_speaker.mp4"),
            speaker_audio: dir.join("cropped_speaker.wav"),
            words: dir.join("words"),
            dir,
        }
    }

    /// Cropped clip returned by the sync service for one tracked person.
    pub fn person_clip(&self, track_id: u32, extension: &str) -> PathBuf {
        self.dir
            .join(format!("cropped_person_{}.{}", track_id, extension))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WordPaths {
    pub video: PathBuf,
    pub video_mp4: PathBuf,
    pub audio: PathBuf,
}

impl WordPaths {
    pub fn new(words_dir: &Path, word_id: i64) -> Self {
        Self {
            video: words_dir.join(format!("{}.avi", word_id)),
            video_mp4: words_dir.join(format!("{}.mp4", word_id)),
            audio: words_dir.join(format!("{}.wav", word_id)),
        }
    }
}
