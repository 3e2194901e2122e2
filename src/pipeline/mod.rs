//! Segment curation: a video goes in, a filtered and enriched set of
//! speaking-face segments comes out.
//!
//! Stages run strictly in order. Each gate runs over every segment in
//! parallel, deletes the segments that fail it, and commits before the next
//! stage starts. A video whose segments all fail a stage is discarded; its
//! row stays behind as a marker so the URL is not harvested again.

mod enrich;
mod gates;
pub mod stage;
#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use rayon::prelude::*;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, info_span, warn};

use crate::config::Config;
use crate::db::Database;
use crate::error::{HarvestError, ServiceError, VideoRejection};
use crate::media::MediaToolkit;
use crate::models::{paths::video_dir, Segment, TranscriptType, VideoInfo, VideoPaths};
use crate::services::{Services, VideoSource};
use crate::transcript;

pub use stage::{run_segment_stage, StageName, Verdict};

/// Everything a harvest needs besides its database handle.
pub struct PipelineContext {
    pub config: Config,
    pub services: Services,
    pub media: Arc<dyn MediaToolkit>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HarvestOutcome {
    /// The URL was harvested before.
    Skipped,
    Rejected(VideoRejection),
    Completed { segments: usize, num_people: u32 },
}

/// Totals for a channel, user or playlist harvest.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HarvestSummary {
    pub urls: usize,
    pub completed: usize,
    pub rejected: usize,
    pub skipped: usize,
    pub failed: usize,
    pub segments: usize,
}

impl PipelineContext {
    pub fn new(config: Config, services: Services, media: Arc<dyn MediaToolkit>) -> Self {
        Self {
            config,
            services,
            media,
        }
    }

    pub fn open_database(&self) -> Result<Database> {
        let db = Database::open(
            &self.config.database.sqlite_path,
            self.config.database.busy_timeout_ms,
        )?;
        db.initialize()?;
        Ok(db)
    }

    fn data_root(&self) -> &Path {
        &self.config.storage.data_dir
    }
}

/// Harvest a single video URL.
///
/// The download and its audio are staged outside the data root, so nothing
/// is recorded until both exist. After that any error discards the row and
/// its media; only a rejection leaves a marker behind.
pub fn harvest_url(ctx: &PipelineContext, db: &Database, url: &str) -> Result<HarvestOutcome, HarvestError> {
    if db.video_exists(url)? {
        info!(url = %url, "Already processed, skipping");
        return Ok(HarvestOutcome::Skipped);
    }
    if let Some(stale) = db.get_video_by_url(url)? {
        warn!(url = %url, video_id = stale.id, "Discarding interrupted harvest");
        discard_video(ctx, db, stale.id)?;
    }

    let staging = ctx.config.storage.staging_dir.join(staging_name(url));
    if let Err(source) = acquire(ctx, url, &staging) {
        stage::remove_dir(&staging);
        return Err(HarvestError::Acquisition {
            url: url.to_string(),
            source,
        });
    }

    let video_id = db.create_video(url)?;
    let span = info_span!("video", video_id);
    let _enter = span.enter();

    let outcome = move_dir(&staging, &video_dir(ctx.data_root(), video_id))
        .and_then(|()| harvest_video(ctx, db, video_id, url));
    match outcome {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            error!(url = %url, "Harvest failed, discarding video: {:#}", e);
            stage::remove_dir(&staging);
            if let Err(cleanup) = discard_video(ctx, db, video_id) {
                warn!("Could not discard video: {:#}", cleanup);
            }
            Err(e.into())
        }
    }
}

/// Download into `staging` and make sure the audio track is there.
fn acquire(ctx: &PipelineContext, url: &str, staging: &Path) -> Result<(), ServiceError> {
    ctx.services.scraper.download(url, staging)?;
    let paths = VideoPaths::new(staging.to_path_buf());
    if !paths.audio.exists() {
        ctx.media
            .extract_audio(&paths.video, &paths.audio)
            .map_err(|e| ServiceError::Local {
                service: "ffmpeg",
                message: format!("extracting audio: {:#}", e),
            })?;
    }
    Ok(())
}

fn harvest_video(ctx: &PipelineContext, db: &Database, video_id: i64, url: &str) -> Result<HarvestOutcome> {
    let paths = VideoPaths::new(video_dir(ctx.data_root(), video_id));
    match run_video(ctx, db, video_id, &paths)? {
        Ok((segments, num_people)) => {
            info!(url = %url, segments, num_people, "Video completed");
            Ok(HarvestOutcome::Completed {
                segments,
                num_people,
            })
        }
        Err(reason) => {
            warn!(url = %url, "Video rejected: {}", reason);
            reject_video(ctx, db, video_id, &reason)?;
            Ok(HarvestOutcome::Rejected(reason))
        }
    }
}

/// Video-level gates followed by every segment stage. The inner `Err` is a
/// rejection of the whole video.
fn run_video(
    ctx: &PipelineContext,
    db: &Database,
    video_id: i64,
    paths: &VideoPaths,
) -> Result<Result<(usize, u32), VideoRejection>> {
    let harvest = &ctx.config.harvest;

    if let Some(info) = VideoInfo::load(&paths.info)? {
        db.update_video_info(video_id, &info)?;
        if let (Some(min), Some(views)) = (harvest.min_views, info.view_count) {
            if views < min {
                return Ok(Err(VideoRejection::TooFewViews { views, min }));
            }
        }
        if let (Some(max_mins), Some(duration_secs)) = (harvest.max_duration_mins, info.duration) {
            if duration_secs > (max_mins * 60) as f64 {
                return Ok(Err(VideoRejection::TooLong {
                    duration_secs,
                    max_secs: max_mins * 60,
                }));
            }
        }
    }

    if !paths.transcript.exists() {
        return Ok(Err(VideoRejection::NoTranscript));
    }

    let parsed = match transcript::parse_file(&paths.transcript, harvest.min_segment_ms) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("Unreadable transcript: {:#}", e);
            return Ok(Err(VideoRejection::NoTranscript));
        }
    };
    db.set_transcript_type(video_id, parsed.transcript_type)?;
    info!(transcript_type = parsed.transcript_type.as_str(), captions = parsed.captions.len(), "Transcript parsed");
    if harvest.manual_transcripts_only && parsed.transcript_type == TranscriptType::Auto {
        return Ok(Err(VideoRejection::AutoTranscript));
    }
    if parsed.captions.is_empty() {
        return Ok(Err(VideoRejection::NoSegments));
    }

    let segments = db.transaction(|db| db.insert_segments(video_id, &parsed.captions))?;
    run_segments(ctx, db, video_id, paths, segments)
}

fn run_segments(
    ctx: &PipelineContext,
    db: &Database,
    video_id: i64,
    paths: &VideoPaths,
    segments: Vec<Segment>,
) -> Result<Result<(usize, u32), VideoRejection>> {
    let root = ctx.data_root();

    macro_rules! gate {
        ($segments:expr, $stage:expr, $f:expr) => {{
            let kept = run_segment_stage(db, root, $stage, $segments, $f)?;
            info!(stage = %$stage, remaining = kept.len(), "Segments left");
            if kept.is_empty() {
                return Ok(Err(VideoRejection::Exhausted {
                    stage: $stage.label(),
                }));
            }
            kept
        }};
    }

    let segments = gate!(segments, StageName::Slicing, |s| gates::slice(ctx, paths, s));
    let segments = gate!(segments, StageName::AsrValidation, |s| gates::validate_asr(ctx, s));
    let segments = gate!(segments, StageName::FaceDetection, |s| gates::detect_faces(ctx, s));
    let segments = gate!(segments, StageName::SpeakerSync, |s| gates::synchronise(ctx, s));
    let segments = gate!(segments, StageName::ForcedAlignment, |s| gates::align(ctx, s));

    enrich::validate_words(ctx, db, &segments)?;
    let segments = enrich::estimate_head_pose(ctx, db, segments)?;
    let (segments, num_people) = enrich::assign_identities(ctx, db, video_id, segments)?;

    Ok(Ok((segments.len(), num_people)))
}

/// Delete a video's media and segments but keep its row.
pub fn remove_video(ctx: &PipelineContext, db: &Database, video_id: i64) -> Result<()> {
    stage::remove_dir(&video_dir(ctx.data_root(), video_id));
    let removed = db.delete_video_segments(video_id)?;
    if removed > 0 {
        info!(video_id, removed, "Removed video segments");
    }
    Ok(())
}

/// Delete a video's media and its row, as if it was never harvested.
fn discard_video(ctx: &PipelineContext, db: &Database, video_id: i64) -> Result<()> {
    stage::remove_dir(&video_dir(ctx.data_root(), video_id));
    db.delete_video(video_id)
}

fn reject_video(ctx: &PipelineContext, db: &Database, video_id: i64, reason: &VideoRejection) -> Result<()> {
    remove_video(ctx, db, video_id)?;
    db.mark_video_rejected(video_id, &reason.to_string())
}

/// Harvest every video a channel, user or playlist lists, `jobs` at a time.
/// Each worker opens its own database connection.
pub fn harvest_source(ctx: &PipelineContext, source: &VideoSource) -> Result<HarvestSummary> {
    let urls = ctx
        .services
        .scraper
        .list_urls(source)
        .with_context(|| format!("listing videos for {} {}", source.kind(), source.id()))?;
    info!(kind = source.kind(), id = source.id(), count = urls.len(), "Listed videos");

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(ctx.config.harvest.jobs.max(1))
        .build()
        .context("building harvest worker pool")?;

    let outcomes: Vec<Result<HarvestOutcome>> = pool.install(|| {
        urls.par_iter()
            .map(|url| {
                let db = ctx.open_database()?;
                Ok(harvest_url(ctx, &db, url)?)
            })
            .collect()
    });

    let mut summary = HarvestSummary {
        urls: urls.len(),
        ..HarvestSummary::default()
    };
    for (url, outcome) in urls.iter().zip(outcomes) {
        match outcome {
            Ok(HarvestOutcome::Completed { segments, .. }) => {
                summary.completed += 1;
                summary.segments += segments;
            }
            Ok(HarvestOutcome::Rejected(_)) => summary.rejected += 1,
            Ok(HarvestOutcome::Skipped) => summary.skipped += 1,
            Err(e) => {
                error!(url = %url, "Harvest failed: {:#}", e);
                summary.failed += 1;
            }
        }
    }
    Ok(summary)
}

fn staging_name(url: &str) -> String {
    url.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Move a directory, copying when source and destination are on different
/// filesystems.
fn move_dir(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }

    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from).with_context(|| format!("reading {}", from.display()))? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            move_dir(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)
                .with_context(|| format!("copying {}", entry.path().display()))?;
        }
    }
    std::fs::remove_dir_all(from)?;
    Ok(())
}
