//! Stages that enrich surviving segments without rejecting them.

use anyhow::Result;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use super::stage::{commit_segments, remove_file};
use super::PipelineContext;
use crate::db::Database;
use crate::faces::cluster_identities;
use crate::models::paths::segment_dir;
use crate::models::{LocalIdentity, Segment, SegmentPaths, SegmentState, Word};

enum WordOutcome {
    Validated { word: Word, text: String, confidence: f64 },
    Dropped { word: Word, reason: String },
}

/// Cut every aligned word out of the speaker clip and transcribe it. Words
/// that cannot be cut or recognised are deleted; the segment stays.
pub fn validate_words(ctx: &PipelineContext, db: &Database, segments: &[Segment]) -> Result<usize> {
    let words: Vec<Word> = db.transaction(|db| {
        let mut words = Vec::new();
        for segment in segments {
            for aligned in segment.fa_alignment.iter().flatten() {
                words.push(db.insert_word(segment.video_id, segment.id, aligned)?);
            }
        }
        Ok(words)
    })?;

    let outcomes: Vec<WordOutcome> = words
        .into_par_iter()
        .map(|word| match transcribe_word(ctx, &word) {
            Ok((text, confidence)) => WordOutcome::Validated {
                word,
                text,
                confidence,
            },
            Err(e) => WordOutcome::Dropped {
                word,
                reason: format!("{:#}", e),
            },
        })
        .collect();

    let kept = db.transaction(|db| {
        let mut kept = 0;
        for outcome in &outcomes {
            match outcome {
                WordOutcome::Validated {
                    word,
                    text,
                    confidence,
                } => {
                    db.update_word_asr(word.id, text, *confidence)?;
                    kept += 1;
                }
                WordOutcome::Dropped { word, .. } => db.delete_word(word.id)?,
            }
        }
        Ok(kept)
    })?;

    let root = &ctx.config.storage.data_dir;
    for outcome in &outcomes {
        match outcome {
            WordOutcome::Validated { word, .. } => {
                let paths = word.paths(root);
                remove_file(&paths.video);
                remove_file(&paths.audio);
            }
            WordOutcome::Dropped { word, reason } => {
                warn!(segment_id = word.segment_id, word = %word.text, "Word dropped: {}", reason);
                let paths = word.paths(root);
                remove_file(&paths.video);
                remove_file(&paths.video_mp4);
                remove_file(&paths.audio);
            }
        }
    }

    debug!(kept, total = outcomes.len(), "Words validated");
    Ok(kept)
}

fn transcribe_word(ctx: &PipelineContext, word: &Word) -> Result<(String, f64)> {
    let root = &ctx.config.storage.data_dir;
    let speaker_video =
        SegmentPaths::new(segment_dir(root, word.video_id, word.segment_id)).speaker_video;
    let paths = word.paths(root);
    let media = ctx.media.as_ref();

    media.precise_slice(&speaker_video, word.start, word.end, &paths.video)?;
    media.convert(&paths.video, &paths.video_mp4)?;
    media.extract_audio(&paths.video, &paths.audio)?;
    let transcription = ctx.services.speech.transcribe(&paths.audio)?;
    Ok((transcription.transcript.trim().to_string(), transcription.confidence))
}

/// Attach the median head pose of each speaker. Failures leave the fields unset.
pub fn estimate_head_pose(ctx: &PipelineContext, db: &Database, segments: Vec<Segment>) -> Result<Vec<Segment>> {
    let root = &ctx.config.storage.data_dir;
    let segments: Vec<Segment> = segments
        .into_par_iter()
        .map(|mut segment| {
            let wide = segment.paths(root).speaker_video_wide;
            match ctx.services.head_pose.estimate(&wide) {
                Ok(estimate) => segment.head_pose = estimate.median_pose(),
                Err(e) => warn!(segment_id = segment.id, "Head pose unavailable: {}", e),
            }
            segment
        })
        .collect();

    commit_segments(db, &segments)?;
    Ok(segments)
}

/// Group segments of one video by speaker identity and finalise them.
/// Returns the number of distinct people.
pub fn assign_identities(
    ctx: &PipelineContext,
    db: &Database,
    video_id: i64,
    segments: Vec<Segment>,
) -> Result<(Vec<Segment>, u32)> {
    let root = &ctx.config.storage.data_dir;
    let embeddings: Vec<Option<Vec<f32>>> = segments
        .par_iter()
        .map(|segment| {
            let wide = segment.paths(root).speaker_video_wide;
            match ctx.services.embedder.embed_video(&wide) {
                Ok(embedding) => Some(embedding),
                Err(e) => {
                    warn!(segment_id = segment.id, "No face embedding: {}", e);
                    None
                }
            }
        })
        .collect();

    let keyed: Vec<(i64, Vec<f32>)> = segments
        .iter()
        .zip(embeddings)
        .filter_map(|(segment, embedding)| embedding.map(|e| (segment.id, e)))
        .collect();
    let clusters = cluster_identities(&keyed, ctx.config.gates.identity_distance_threshold);

    let segments: Vec<Segment> = segments
        .into_iter()
        .map(|mut segment| {
            segment.local_identity = match clusters.identity_of(&segment.id) {
                Some(id) => LocalIdentity::Assigned(id),
                None => LocalIdentity::Unassigned,
            };
            segment.state = SegmentState::Finalized;
            segment
        })
        .collect();

    db.transaction(|db| {
        for segment in &segments {
            db.update_segment(segment)?;
        }
        db.complete_video(video_id, clusters.num_people)
    })?;

    info!(video_id, num_people = clusters.num_people, segments = segments.len(), "Identities assigned");
    Ok((segments, clusters.num_people))
}
