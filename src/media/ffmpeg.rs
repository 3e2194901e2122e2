//! FFmpeg command builder and blocking runner.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

/// Builder for one ffmpeg invocation.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    input: PathBuf,
    output: PathBuf,
    /// Arguments placed between the input and the output file.
    output_args: Vec<String>,
}

impl FfmpegCommand {
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            output_args: Vec::new(),
        }
    }

    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add a second input, e.g. a separate audio track.
    pub fn extra_input(self, path: impl AsRef<Path>) -> Self {
        self.output_arg("-i")
            .output_arg(path.as_ref().to_string_lossy().into_owned())
    }

    /// Start time as an output option, frame-accurate at the cost of decoding.
    pub fn start(self, seconds: f64) -> Self {
        self.output_arg("-ss").output_arg(format!("{:.3}", seconds))
    }

    pub fn end(self, seconds: f64) -> Self {
        self.output_arg("-to").output_arg(format!("{:.3}", seconds))
    }

    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    pub fn no_video(self) -> Self {
        self.output_arg("-vn")
    }

    pub fn no_audio(self) -> Self {
        self.output_arg("-an")
    }

    pub fn map(self, stream: impl Into<String>) -> Self {
        self.output_arg("-map").output_arg(stream)
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-y".to_string(),
            "-v".to_string(),
            "error".to_string(),
        ];
        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().into_owned());
        args.extend(self.output_args.iter().cloned());
        args.push(self.output.to_string_lossy().into_owned());
        args
    }

    /// Run to completion, failing with ffmpeg's stderr on a non-zero exit.
    pub fn run(&self, ffmpeg: &Path) -> Result<()> {
        let args = self.build_args();
        debug!("Running {} {}", ffmpeg.display(), args.join(" "));

        let output = Command::new(ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("spawning {}", ffmpeg.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "ffmpeg failed for {} ({}): {}",
                self.output.display(),
                output.status,
                stderr.trim()
            );
        }
        Ok(())
    }
}

/// Count decoded video frames with ffprobe.
pub fn probe_frame_count(ffprobe: &Path, video: &Path) -> Result<usize> {
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-count_packets",
            "-show_entries",
            "stream=nb_read_packets",
            "-of",
            "csv=p=0",
        ])
        .arg(video)
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("spawning {}", ffprobe.display()))?;

    if !output.status.success() {
        bail!(
            "ffprobe failed for {}: {}",
            video.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    parse_frame_count(&String::from_utf8_lossy(&output.stdout))
        .with_context(|| format!("reading frame count of {}", video.display()))
}

fn parse_frame_count(stdout: &str) -> Result<usize> {
    let value = stdout
        .lines()
        .map(|l| l.trim().trim_end_matches(','))
        .find(|l| !l.is_empty())
        .unwrap_or_default();
    Ok(value.parse()?)
}
