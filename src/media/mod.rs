//! Media derivatives: slices, re-muxes, crops and audio extraction.
//!
//! Every file the pipeline derives goes through [`MediaToolkit`] so stages
//! can be tested without ffmpeg. Slices, re-muxes and crops are skipped when
//! their output already exists, which makes an interrupted harvest cheap to
//! resume.

pub mod crop;
pub mod ffmpeg;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::MediaConfig;

pub use crop::CropPlan;
pub use ffmpeg::{probe_frame_count, FfmpegCommand};

pub trait MediaToolkit: Send + Sync {
    /// Cut `[start_ms, end_ms)` out of an audio track.
    fn slice_audio(&self, source: &Path, start_ms: u64, end_ms: u64, dest: &Path) -> Result<()>;

    /// Cut a silent video clip between whole-second bounds.
    fn slice_video(&self, source: &Path, start_secs: u64, end_secs: u64, dest: &Path) -> Result<()>;

    /// Mux a video clip with an audio clip, copying the video stream.
    fn combine(&self, video: &Path, audio: &Path, dest: &Path) -> Result<()>;

    fn count_frames(&self, video: &Path) -> Result<usize>;

    /// Re-mux `video` with its own audio delayed by `delay_secs`.
    fn delay_audio(&self, video: &Path, delay_secs: f64, dest: &Path) -> Result<()>;

    /// Transcode into the container implied by `dest`.
    fn convert(&self, source: &Path, dest: &Path) -> Result<()>;

    /// Extract the audio track as 16-bit PCM.
    fn extract_audio(&self, video: &Path, dest: &Path) -> Result<()>;

    /// Frame-accurate cut between fractional-second bounds.
    fn precise_slice(&self, video: &Path, start_secs: f64, end_secs: f64, dest: &Path) -> Result<()>;

    /// Render the wide speaker clip following `plan`.
    fn crop(&self, video: &Path, plan: &CropPlan, dest: &Path) -> Result<()>;
}

/// [`MediaToolkit`] backed by the ffmpeg and ffprobe binaries.
pub struct Ffmpeg {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl Ffmpeg {
    pub fn new(config: &MediaConfig) -> Self {
        Self {
            ffmpeg: config.ffmpeg_path.clone(),
            ffprobe: config.ffprobe_path.clone(),
        }
    }

    fn run(&self, command: FfmpegCommand) -> Result<()> {
        if let Some(parent) = command.output().parent() {
            std::fs::create_dir_all(parent)?;
        }
        command.run(&self.ffmpeg)
    }
}

fn already_exists(dest: &Path) -> bool {
    let exists = dest.exists();
    if exists {
        debug!(path = %dest.display(), "Derivative exists, skipping");
    }
    exists
}

impl MediaToolkit for Ffmpeg {
    fn slice_audio(&self, source: &Path, start_ms: u64, end_ms: u64, dest: &Path) -> Result<()> {
        if already_exists(dest) {
            return Ok(());
        }
        self.run(
            FfmpegCommand::new(source, dest)
                .start(start_ms as f64 / 1000.0)
                .end(end_ms as f64 / 1000.0)
                .no_video(),
        )
    }

    fn slice_video(&self, source: &Path, start_secs: u64, end_secs: u64, dest: &Path) -> Result<()> {
        if already_exists(dest) {
            return Ok(());
        }
        self.run(
            FfmpegCommand::new(source, dest)
                .video_filter(format!(
                    "trim=start={}:end={},setpts=PTS-STARTPTS",
                    start_secs, end_secs
                ))
                .no_audio(),
        )
    }

    fn combine(&self, video: &Path, audio: &Path, dest: &Path) -> Result<()> {
        if already_exists(dest) {
            return Ok(());
        }
        self.run(
            FfmpegCommand::new(video, dest)
                .extra_input(audio)
                .video_codec("copy")
                .audio_codec("aac"),
        )
    }

    fn count_frames(&self, video: &Path) -> Result<usize> {
        probe_frame_count(&self.ffprobe, video)
    }

    fn delay_audio(&self, video: &Path, delay_secs: f64, dest: &Path) -> Result<()> {
        if already_exists(dest) {
            return Ok(());
        }
        self.run(
            FfmpegCommand::new(video, dest)
                .output_args(["-itsoffset".to_string(), format!("{:.3}", delay_secs)])
                .extra_input(video)
                .map("0:v")
                .map("1:a"),
        )
    }

    fn convert(&self, source: &Path, dest: &Path) -> Result<()> {
        self.run(FfmpegCommand::new(source, dest))
    }

    fn extract_audio(&self, video: &Path, dest: &Path) -> Result<()> {
        self.run(FfmpegCommand::new(video, dest).no_video().audio_codec("pcm_s16le"))
    }

    fn precise_slice(&self, video: &Path, start_secs: f64, end_secs: f64, dest: &Path) -> Result<()> {
        self.run(FfmpegCommand::new(video, dest).start(start_secs).end(end_secs))
    }

    fn crop(&self, video: &Path, plan: &CropPlan, dest: &Path) -> Result<()> {
        if already_exists(dest) {
            return Ok(());
        }
        let script = dest.with_extension("cmd");
        if let Some(parent) = script.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&script, plan.commands())
            .with_context(|| format!("writing {}", script.display()))?;
        let result = self.run(FfmpegCommand::new(video, dest).video_filter(plan.filter(&script)));
        let _ = std::fs::remove_file(&script);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn missing_binaries() -> Ffmpeg {
        Ffmpeg::new(&MediaConfig {
            ffmpeg_path: PathBuf::from("/nonexistent/ffmpeg"),
            ffprobe_path: PathBuf::from("/nonexistent/ffprobe"),
            ..MediaConfig::default()
        })
    }

    #[test]
    fn test_existing_derivative_is_not_rebuilt() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("video.mp4");
        let dest = dir.path().join("segments/1/video.mp4");
        std::fs::create_dir_all(dest.parent().unwrap()).unwrap();
        std::fs::write(&dest, b"sliced").unwrap();

        let media = missing_binaries();
        media.slice_video(&source, 1, 3, &dest).unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"sliced");
    }

    #[test]
    fn test_every_cached_derivative_is_skipped() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("video.mp4");
        let audio = dir.path().join("audio.wav");
        let media = missing_binaries();
        let existing = |name: &str| {
            let path = dir.path().join(name);
            std::fs::write(&path, b"cached").unwrap();
            path
        };

        let sliced = existing("audio_slice.wav");
        media.slice_audio(&audio, 1_000, 3_000, &sliced).unwrap();
        let combined = existing("combined.avi");
        media.combine(&source, &sliced, &combined).unwrap();
        let delayed = existing("cropped_speaker.avi");
        media.delay_audio(&combined, 0.08, &delayed).unwrap();

        let track = vec![crate::faces::BoundingBox::new(100, 100, 200, 200); 10];
        let plan = CropPlan::from_track(&track, &crate::config::CropConfig::default(), 25).unwrap();
        let wide = existing("cropped_speaker_bigger.avi");
        media.crop(&combined, &plan, &wide).unwrap();
        assert!(!wide.with_extension("cmd").exists());

        for path in [&sliced, &combined, &delayed, &wide] {
            assert_eq!(std::fs::read(path).unwrap(), b"cached");
        }
    }

    #[test]
    fn test_missing_crop_writes_script_and_cleans_up() {
        let dir = tempdir().unwrap();
        let track = vec![crate::faces::BoundingBox::new(100, 100, 200, 200); 10];
        let plan = CropPlan::from_track(&track, &crate::config::CropConfig::default(), 25).unwrap();
        let wide = dir.path().join("segments/1/cropped_speaker_bigger.avi");

        assert!(missing_binaries().crop(&dir.path().join("combined.avi"), &plan, &wide).is_err());
        assert!(!wide.exists());
        assert!(!wide.with_extension("cmd").exists());
    }

    #[test]
    fn test_missing_derivative_runs_ffmpeg() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("video.mp4");
        let dest = dir.path().join("segments/1/video.mp4");

        let media = missing_binaries();
        assert!(media.slice_video(&source, 1, 3, &dest).is_err());
        assert!(!dest.exists());
        assert!(dest.parent().unwrap().is_dir());
    }
}
