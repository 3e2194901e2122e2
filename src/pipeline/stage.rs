use anyhow::{bail, Result};
use rayon::prelude::*;
use std::fmt;
use std::path::Path;
use tracing::{debug, warn};

use crate::db::Database;
use crate::error::RejectReason;
use crate::models::{HasMediaPaths, Segment, SegmentState};

/// Named steps of a harvest, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageName {
    Slicing,
    AsrValidation,
    FaceDetection,
    SpeakerSync,
    ForcedAlignment,
    WordValidation,
    HeadPose,
    IdentityClustering,
}

impl StageName {
    pub const ALL: [StageName; 8] = [
        StageName::Slicing,
        StageName::AsrValidation,
        StageName::FaceDetection,
        StageName::SpeakerSync,
        StageName::ForcedAlignment,
        StageName::WordValidation,
        StageName::HeadPose,
        StageName::IdentityClustering,
    ];

    pub fn label(self) -> &'static str {
        match self {
            StageName::Slicing => "slicing",
            StageName::AsrValidation => "asr_validation",
            StageName::FaceDetection => "face_detection",
            StageName::SpeakerSync => "speaker_sync",
            StageName::ForcedAlignment => "forced_alignment",
            StageName::WordValidation => "word_validation",
            StageName::HeadPose => "head_pose",
            StageName::IdentityClustering => "identity_clustering",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of running one gate over one segment.
#[derive(Debug)]
pub enum Verdict {
    Keep(Segment),
    Reject(Segment, RejectReason),
}

impl Verdict {
    pub fn reject(segment: Segment, reason: RejectReason) -> Self {
        Verdict::Reject(segment, reason)
    }
}

/// Run a gate over every segment in parallel, then commit the outcome in
/// one transaction: survivors are updated, rejects are recorded and deleted.
/// Media of rejected segments is removed only after the commit succeeds.
///
/// A rejected segment ends in [`SegmentState::Rejected`]. A survivor whose
/// state moved backwards fails the stage before anything is written.
/// Survivors keep their input order.
pub fn run_segment_stage<F>(
    db: &Database,
    data_root: &Path,
    stage: StageName,
    segments: Vec<Segment>,
    gate: F,
) -> Result<Vec<Segment>>
where
    F: Fn(Segment) -> Verdict + Sync + Send,
{
    let total = segments.len();
    let verdicts: Vec<(SegmentState, Verdict)> = segments
        .into_par_iter()
        .map(|segment| (segment.state.clone(), gate(segment)))
        .collect();

    let mut kept = Vec::with_capacity(verdicts.len());
    let mut rejected = Vec::new();
    for (before, verdict) in verdicts {
        let segment = match verdict {
            Verdict::Keep(segment) => segment,
            Verdict::Reject(mut segment, reason) => {
                segment.state = SegmentState::Rejected(reason);
                segment
            }
        };
        if !before.can_advance_to(&segment.state) {
            bail!(
                "{} moved segment {} from {} to {}",
                stage,
                segment.id,
                before.label(),
                segment.state.label()
            );
        }
        match segment.state.rejection() {
            Some(_) => rejected.push(segment),
            None => kept.push(segment),
        }
    }

    db.transaction(|db| {
        for segment in &kept {
            db.update_segment(segment)?;
        }
        for segment in &rejected {
            if let Some(reason) = segment.state.rejection() {
                db.record_rejection(segment, stage.label(), reason)?;
            }
            db.delete_segment(segment.id)?;
        }
        Ok(())
    })?;

    for segment in &rejected {
        warn!(
            video_id = segment.video_id,
            segment_id = segment.id,
            stage = %stage,
            "Segment rejected: {}",
            segment.state.rejection().map(|r| r.to_string()).unwrap_or_default()
        );
        remove_dir(&segment.media_dir(data_root));
    }

    debug!(stage = %stage, kept = kept.len(), total, "Stage complete");
    Ok(kept)
}

/// Persist field-only changes for a stage that never rejects.
pub fn commit_segments(db: &Database, segments: &[Segment]) -> Result<()> {
    db.transaction(|db| {
        for segment in segments {
            db.update_segment(segment)?;
        }
        Ok(())
    })
}

pub(crate) fn remove_dir(dir: &Path) {
    if let Err(e) = std::fs::remove_dir_all(dir) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %dir.display(), "Failed to remove directory: {}", e);
        }
    }
}

pub(crate) fn remove_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), "Failed to remove file: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::Caption;
    use tempfile::tempdir;

    #[test]
    fn test_rejects_are_deleted_and_recorded() {
        let root = tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let video_id = db.create_video("https://example.com/v").unwrap();
        let captions: Vec<Caption> = (0..4)
            .map(|i| Caption {
                start_ms: i * 2_000,
                end_ms: i * 2_000 + 1_500,
                text: format!("caption {}", i),
            })
            .collect();
        let segments = db.insert_segments(video_id, &captions).unwrap();
        for segment in &segments {
            std::fs::create_dir_all(segment.media_dir(root.path())).unwrap();
        }

        let kept = run_segment_stage(&db, root.path(), StageName::FaceDetection, segments.clone(), |s| {
            if s.start_ms % 4_000 == 0 {
                Verdict::Keep(s)
            } else {
                Verdict::reject(s, RejectReason::NoFacesDetected)
            }
        })
        .unwrap();

        let kept_ids: Vec<i64> = kept.iter().map(|s| s.id).collect();
        assert_eq!(kept_ids, vec![segments[0].id, segments[2].id]);
        assert_eq!(db.count_segments(video_id).unwrap(), 2);
        assert!(!segments[1].media_dir(root.path()).exists());
        assert!(segments[2].media_dir(root.path()).exists());
        assert_eq!(
            db.rejection_counts().unwrap(),
            vec![("face_detection".to_string(), 2)]
        );
    }

    #[test]
    fn test_backward_state_fails_without_writing() {
        let root = tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let video_id = db.create_video("https://example.com/v").unwrap();
        let captions = vec![Caption {
            start_ms: 0,
            end_ms: 1_500,
            text: "caption".into(),
        }];
        let mut segments = db.insert_segments(video_id, &captions).unwrap();
        segments[0].state = SegmentState::Aligned;
        db.update_segment(&segments[0]).unwrap();

        let result = run_segment_stage(&db, root.path(), StageName::AsrValidation, segments.clone(), |mut s| {
            s.state = SegmentState::AsrValidated;
            Verdict::Keep(s)
        });
        assert!(result.is_err());
        let stored = db.get_segment(segments[0].id).unwrap().unwrap();
        assert_eq!(stored.state, SegmentState::Aligned);

        let kept = run_segment_stage(&db, root.path(), StageName::ForcedAlignment, segments, |s| {
            Verdict::reject(s, RejectReason::AlignmentFailed("no words aligned".into()))
        })
        .unwrap();
        assert!(kept.is_empty());
        assert_eq!(db.rejections_for_video(video_id).unwrap()[0].reason, "forced alignment failed: no words aligned");
    }

    #[test]
    fn test_stage_labels_are_unique() {
        let labels: std::collections::HashSet<&str> =
            StageName::ALL.iter().map(|s| s.label()).collect();
        assert_eq!(labels.len(), StageName::ALL.len());
    }
}
