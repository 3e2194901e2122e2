//! Segment gates. Each takes a segment and either returns it enriched and
//! advanced to the next state, or rejects it with the reason.

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use super::stage::{remove_file, Verdict};
use super::PipelineContext;
use crate::error::RejectReason;
use crate::faces::{audio_delay_secs, select_speaker, SpeakerSelection, SyncResult};
use crate::media::CropPlan;
use crate::models::{Segment, SegmentPaths, SegmentState, SpeakerSync, VideoPaths};
use crate::transcript::tfidf_similarity;

/// Cut the segment's audio, video, combined clip and transcript.
pub fn slice(ctx: &PipelineContext, video: &VideoPaths, segment: Segment) -> Verdict {
    match slice_media(ctx, video, &segment) {
        Ok(()) => Verdict::Keep(segment),
        Err(e) => Verdict::reject(segment, RejectReason::SliceFailed(format!("{:#}", e))),
    }
}

fn slice_media(ctx: &PipelineContext, video: &VideoPaths, segment: &Segment) -> Result<()> {
    let paths = segment.paths(&ctx.config.storage.data_dir);
    let (start_secs, end_secs) = segment.whole_seconds();
    if end_secs <= start_secs {
        bail!("segment is shorter than one whole second");
    }

    std::fs::create_dir_all(&paths.words)
        .with_context(|| format!("creating {}", paths.words.display()))?;

    let media = ctx.media.as_ref();
    media.slice_audio(&video.audio, segment.start_ms, segment.end_ms, &paths.audio)?;
    media.slice_video(&video.video, start_secs, end_secs, &paths.video)?;
    media.combine(&paths.video, &paths.audio, &paths.combined)?;
    std::fs::write(&paths.transcript, &segment.text)
        .with_context(|| format!("writing {}", paths.transcript.display()))?;
    Ok(())
}

/// Keep segments whose speech is recognised, confident and close to the caption.
pub fn validate_asr(ctx: &PipelineContext, mut segment: Segment) -> Verdict {
    let gates = &ctx.config.gates;
    let paths = segment.paths(&ctx.config.storage.data_dir);

    let transcription = match ctx.services.speech.transcribe(&paths.audio) {
        Ok(t) => t,
        Err(e) => {
            return Verdict::reject(segment, RejectReason::TranscriptionUnavailable(e.to_string()))
        }
    };

    let recognised = transcription.transcript.trim();
    if recognised.is_empty() {
        return Verdict::reject(segment, RejectReason::EmptyTranscription);
    }
    if transcription.confidence < gates.asr_confidence_floor {
        return Verdict::reject(
            segment,
            RejectReason::LowAsrConfidence {
                confidence: transcription.confidence,
                floor: gates.asr_confidence_floor,
            },
        );
    }

    let similarity = tfidf_similarity(&segment.text, recognised).unwrap_or(0.0);
    if similarity < gates.similarity_threshold {
        return Verdict::reject(
            segment,
            RejectReason::TranscriptMismatch {
                similarity,
                threshold: gates.similarity_threshold,
            },
        );
    }

    debug!(segment_id = segment.id, similarity, confidence = transcription.confidence, "ASR validated");
    segment.asr_text = Some(recognised.to_string());
    segment.asr_confidence = Some(transcription.confidence);
    segment.state = SegmentState::AsrValidated;
    Verdict::Keep(segment)
}

/// Keep segments where at least one face is tracked.
pub fn detect_faces(ctx: &PipelineContext, mut segment: Segment) -> Verdict {
    let paths = segment.paths(&ctx.config.storage.data_dir);

    let tracks = match ctx.services.detector.detect(&paths.combined) {
        Ok(tracks) => tracks,
        Err(e) => return Verdict::reject(segment, RejectReason::DetectionUnavailable(e.to_string())),
    };
    if tracks.num_people() == 0 {
        return Verdict::reject(segment, RejectReason::NoFacesDetected);
    }

    debug!(segment_id = segment.id, people = tracks.num_people(), "Faces tracked");
    segment.frame_detections = Some(tracks);
    segment.state = SegmentState::FaceDetected;
    Verdict::Keep(segment)
}

/// Find the speaking face and build the speaker clips from it.
pub fn synchronise(ctx: &PipelineContext, mut segment: Segment) -> Verdict {
    let paths = segment.paths(&ctx.config.storage.data_dir);
    let Some(tracks) = segment.frame_detections.clone() else {
        return Verdict::reject(segment, RejectReason::NoFacesDetected);
    };

    let total_frames = match ctx.media.count_frames(&paths.combined) {
        Ok(n) => n,
        Err(e) => {
            warn!(segment_id = segment.id, "Could not count frames, using detections: {:#}", e);
            tracks.num_frames()
        }
    };
    if total_frames != tracks.num_frames() {
        return Verdict::reject(
            segment,
            RejectReason::FrameCountMismatch {
                media: total_frames,
                detected: tracks.num_frames(),
            },
        );
    }

    let mut results: BTreeMap<u32, SyncResult> = BTreeMap::new();
    for track_id in tracks.full_coverage_tracks(total_frames) {
        let clip = paths.person_clip(track_id, "avi");
        match ctx
            .services
            .sync
            .synchronise(&paths.combined, &tracks.person_track(track_id), &clip)
        {
            Ok(result) => {
                results.insert(track_id, result);
            }
            Err(e) => warn!(segment_id = segment.id, track_id, "Synchronisation failed: {}", e),
        }
    }

    let floor = ctx.config.gates.sync_confidence_floor;
    let (track_id, offset, confidence) = match select_speaker(&results, floor) {
        SpeakerSelection::Speaker {
            track_id,
            offset,
            confidence,
        } => (track_id, offset, confidence),
        SpeakerSelection::NoCandidates => {
            return Verdict::reject(segment, RejectReason::NoSyncResults)
        }
        SpeakerSelection::BelowFloor { confidence, .. } => {
            return Verdict::reject(segment, RejectReason::LowSyncConfidence { confidence, floor })
        }
    };

    if let Err(e) = build_speaker_media(ctx, &segment, &paths, track_id, offset, &results) {
        return Verdict::reject(segment, RejectReason::SpeakerMediaFailed(format!("{:#}", e)));
    }

    debug!(segment_id = segment.id, track_id, offset, confidence, "Speaker selected");
    segment.speaker = Some(SpeakerSync {
        track_id,
        offset,
        confidence,
    });
    segment.state = SegmentState::Synchronized;
    Verdict::Keep(segment)
}

fn build_speaker_media(
    ctx: &PipelineContext,
    segment: &Segment,
    paths: &SegmentPaths,
    speaker: u32,
    offset: i32,
    results: &BTreeMap<u32, SyncResult>,
) -> Result<()> {
    let media = ctx.media.as_ref();
    let speaker_clip = paths.person_clip(speaker, "avi");

    let delay = audio_delay_secs(offset, ctx.config.media.fps);
    media.delay_audio(&speaker_clip, delay, &paths.speaker_video)?;
    remove_file(&speaker_clip);

    for &track_id in results.keys().filter(|&&id| id != speaker) {
        let clip = paths.person_clip(track_id, "avi");
        if ctx.config.harvest.keep_non_speakers {
            if let Err(e) = media.convert(&clip, &paths.person_clip(track_id, "mp4")) {
                warn!(segment_id = segment.id, track_id, "Could not keep non-speaker clip: {:#}", e);
            }
        }
        remove_file(&clip);
    }

    let track = segment
        .frame_detections
        .as_ref()
        .map(|t| t.person_track(speaker))
        .unwrap_or_default();
    let plan = CropPlan::from_track(&track, &ctx.config.crop, ctx.config.media.fps)?;
    media.crop(&paths.combined, &plan, &paths.speaker_video_wide)?;

    media.convert(&paths.speaker_video, &paths.speaker_video_mp4)?;
    media.extract_audio(&paths.speaker_video, &paths.speaker_audio)?;
    Ok(())
}

/// Align the caption against the speaker's audio.
pub fn align(ctx: &PipelineContext, mut segment: Segment) -> Verdict {
    let paths = segment.paths(&ctx.config.storage.data_dir);

    let alignment = match ctx.services.aligner.align(&paths.speaker_audio, &segment.text) {
        Ok(a) => a,
        Err(e) => return Verdict::reject(segment, RejectReason::AlignmentFailed(e.to_string())),
    };
    if alignment.words.is_empty() {
        return Verdict::reject(
            segment,
            RejectReason::AlignmentFailed("no words aligned".to_string()),
        );
    }

    segment.fa_log_likelihood = Some(alignment.log_likelihood);
    segment.fa_alignment = Some(alignment.words);
    segment.state = SegmentState::Aligned;
    Verdict::Keep(segment)
}
