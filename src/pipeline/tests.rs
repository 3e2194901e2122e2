//! End-to-end harvests against in-process fakes.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use super::*;
use crate::config::Config;
use crate::error::{RejectReason, ServiceError};
use crate::faces::{BoundingBox, FrameTracks, SyncResult};
use crate::media::CropPlan;
use crate::models::{AlignedWord, LocalIdentity, SegmentState, VideoStatus};
use crate::services::{
    Alignment, FaceDetector, FaceEmbedder, ForcedAligner, HeadPoseEstimator, PoseEstimate,
    SpeechRecognizer, Synchroniser, Transcription, VideoScraper,
};

const URL: &str = "https://example.com/watch?v=talk";

const VTT: &str = "WEBVTT

00:00:01.000 --> 00:00:03.000
hello world

00:00:04.000 --> 00:00:06.500
good morning everyone

00:00:07.000 --> 00:00:09.000
thanks for watching
";

fn touch(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, b"media")?;
    Ok(())
}

/// Segment id of a file inside `.../segments/<id>/...`.
fn segment_id_of(path: &Path) -> Option<i64> {
    let mut components = path.components().map(|c| c.as_os_str().to_string_lossy().into_owned());
    while let Some(c) = components.next() {
        if c == "segments" {
            return components.next()?.parse().ok();
        }
    }
    None
}

struct FakeScraper {
    transcript: Option<String>,
    info: Option<String>,
    audio: bool,
    fail: bool,
}

impl VideoScraper for FakeScraper {
    fn download(&self, _url: &str, dest_dir: &Path) -> Result<(), ServiceError> {
        if self.fail {
            return Err(ServiceError::Transport {
                service: "video-scraper",
                message: "connection refused".into(),
            });
        }
        std::fs::create_dir_all(dest_dir)?;
        std::fs::write(dest_dir.join("video.mp4"), b"video")?;
        if self.audio {
            std::fs::write(dest_dir.join("audio.wav"), b"audio")?;
        }
        if let Some(vtt) = &self.transcript {
            std::fs::write(dest_dir.join("transcript.en.vtt"), vtt)?;
        }
        if let Some(info) = &self.info {
            std::fs::write(dest_dir.join("data.info.json"), info)?;
        }
        Ok(())
    }

    fn list_urls(&self, _source: &VideoSource) -> Result<Vec<String>, ServiceError> {
        Ok(vec![URL.to_string()])
    }
}

/// Recognises whatever the caption said unless a segment is overridden.
struct FakeSpeech {
    captions: HashMap<i64, String>,
    overrides: HashMap<i64, Transcription>,
    word_text: String,
}

impl SpeechRecognizer for FakeSpeech {
    fn transcribe(&self, audio: &Path) -> Result<Transcription, ServiceError> {
        let id = segment_id_of(audio).unwrap_or_default();
        if audio.parent().and_then(|p| p.file_name()).is_some_and(|n| n == "words") {
            return Ok(Transcription {
                transcript: self.word_text.clone(),
                confidence: -2.0,
                words: Vec::new(),
            });
        }
        if let Some(t) = self.overrides.get(&id) {
            return Ok(t.clone());
        }
        Ok(Transcription {
            transcript: self.captions.get(&id).cloned().unwrap_or_default(),
            confidence: -1.0,
            words: Vec::new(),
        })
    }
}

struct FakeDetector {
    tracks: FrameTracks,
    calls: Mutex<Vec<PathBuf>>,
}

impl FaceDetector for FakeDetector {
    fn detect(&self, video: &Path) -> Result<FrameTracks, ServiceError> {
        self.calls.lock().unwrap().push(video.to_path_buf());
        Ok(self.tracks.clone())
    }
}

struct FakeSync {
    results: BTreeMap<u32, SyncResult>,
    failing_segments: Vec<i64>,
}

impl Synchroniser for FakeSync {
    fn synchronise(
        &self,
        _video: &Path,
        _track: &[BoundingBox],
        crop_dest: &Path,
    ) -> Result<SyncResult, ServiceError> {
        let track_id: u32 = crop_dest
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.rsplit('_').next())
            .and_then(|s| s.parse().ok())
            .unwrap_or_default();
        if segment_id_of(crop_dest).is_some_and(|id| self.failing_segments.contains(&id)) {
            return Err(ServiceError::empty("sync-net", "no faces in clip"));
        }
        let result = self
            .results
            .get(&track_id)
            .cloned()
            .ok_or_else(|| ServiceError::empty("sync-net", "no result for track"))?;
        std::fs::write(crop_dest, b"crop")?;
        Ok(result)
    }
}

struct FakeAligner {
    failing_segments: Vec<i64>,
    calls: Mutex<Vec<i64>>,
}

impl ForcedAligner for FakeAligner {
    fn align(&self, audio: &Path, transcript: &str) -> Result<Alignment, ServiceError> {
        let id = segment_id_of(audio).unwrap_or_default();
        self.calls.lock().unwrap().push(id);
        if self.failing_segments.contains(&id) {
            return Err(ServiceError::Local {
                service: "aligner",
                message: "audio too noisy".into(),
            });
        }
        let words = transcript
            .split_whitespace()
            .enumerate()
            .map(|(i, w)| AlignedWord {
                text: w.to_string(),
                start: i as f64 * 0.5,
                end: i as f64 * 0.5 + 0.4,
                score: 1.0,
            })
            .collect();
        Ok(Alignment {
            log_likelihood: -0.5,
            words,
        })
    }
}

struct FakePose;

impl HeadPoseEstimator for FakePose {
    fn estimate(&self, _video: &Path) -> Result<PoseEstimate, ServiceError> {
        Ok(PoseEstimate {
            direction: None,
            angles: vec![[2.0, 1.0, 0.0], [4.0, 3.0, 0.0], [3.0, 2.0, 0.0]],
        })
    }
}

/// Embeddings keyed by segment position in the video (0-based).
struct FakeEmbedder {
    by_index: Vec<Option<Vec<f32>>>,
    first_segment_id: i64,
}

impl FaceEmbedder for FakeEmbedder {
    fn embed_video(&self, video: &Path) -> Result<Vec<f32>, ServiceError> {
        let id = segment_id_of(video).unwrap_or_default();
        let index = (id - self.first_segment_id) as usize;
        self.by_index
            .get(index)
            .cloned()
            .flatten()
            .ok_or_else(|| ServiceError::empty("face-net", "no face found"))
    }
}

/// Writes placeholder files and counts the derivatives it actually made.
/// With `fail_audio`, extracting a whole video's audio fails.
#[derive(Default)]
struct FakeMedia {
    frames: usize,
    fail_audio: bool,
    writes: Mutex<usize>,
}

impl FakeMedia {
    fn write(&self, dest: &Path) -> anyhow::Result<()> {
        if dest.exists() {
            return Ok(());
        }
        *self.writes.lock().unwrap() += 1;
        touch(dest)
    }
}

impl MediaToolkit for FakeMedia {
    fn slice_audio(&self, _source: &Path, _start_ms: u64, _end_ms: u64, dest: &Path) -> anyhow::Result<()> {
        self.write(dest)
    }

    fn slice_video(&self, _source: &Path, _start: u64, _end: u64, dest: &Path) -> anyhow::Result<()> {
        self.write(dest)
    }

    fn combine(&self, _video: &Path, _audio: &Path, dest: &Path) -> anyhow::Result<()> {
        self.write(dest)
    }

    fn count_frames(&self, _video: &Path) -> anyhow::Result<usize> {
        Ok(self.frames)
    }

    fn delay_audio(&self, _video: &Path, _delay_secs: f64, dest: &Path) -> anyhow::Result<()> {
        self.write(dest)
    }

    fn convert(&self, _source: &Path, dest: &Path) -> anyhow::Result<()> {
        touch(dest)
    }

    fn extract_audio(&self, _video: &Path, dest: &Path) -> anyhow::Result<()> {
        if self.fail_audio && segment_id_of(dest).is_none() {
            anyhow::bail!("ffmpeg exited with status 1");
        }
        touch(dest)
    }

    fn precise_slice(&self, _video: &Path, _start: f64, _end: f64, dest: &Path) -> anyhow::Result<()> {
        touch(dest)
    }

    fn crop(&self, _video: &Path, _plan: &CropPlan, dest: &Path) -> anyhow::Result<()> {
        self.write(dest)
    }
}

fn single_face_tracks(frames: usize) -> FrameTracks {
    let mut tracks = FrameTracks::new();
    for frame in 0..frames {
        tracks.insert_frame(frame, BTreeMap::from([(0, BoundingBox::new(100, 100, 200, 200))]));
    }
    tracks
}

struct Harness {
    _dir: TempDir,
    ctx: PipelineContext,
    db: Database,
    detector: Arc<FakeDetector>,
    aligner: Arc<FakeAligner>,
    media: Arc<FakeMedia>,
}

struct Setup {
    transcript: Option<String>,
    info: Option<String>,
    scraper_fails: bool,
    scraper_audio: bool,
    audio_extraction_fails: bool,
    asr_overrides: HashMap<usize, Transcription>,
    tracks: FrameTracks,
    /// Frames the media reports, when it disagrees with `tracks`.
    media_frames: Option<usize>,
    sync: BTreeMap<u32, SyncResult>,
    /// Segment positions (0-based) the synchroniser or aligner fails on.
    sync_failures: Vec<usize>,
    alignment_failures: Vec<usize>,
    embeddings: Vec<Option<Vec<f32>>>,
    configure: fn(&mut Config),
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            transcript: Some(VTT.to_string()),
            info: None,
            scraper_fails: false,
            scraper_audio: true,
            audio_extraction_fails: false,
            asr_overrides: HashMap::new(),
            tracks: single_face_tracks(50),
            media_frames: None,
            sync: BTreeMap::from([(
                0,
                SyncResult {
                    offset: 2,
                    confidence: 8.0,
                    min_distance: 6.0,
                },
            )]),
            sync_failures: Vec::new(),
            alignment_failures: Vec::new(),
            embeddings: vec![Some(vec![0.0, 0.0]); 3],
            configure: |_| {},
        }
    }
}

/// The first database id handed to a segment of the first video.
const FIRST_SEGMENT_ID: i64 = 1;

fn harness(setup: Setup) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.database.sqlite_path = dir.path().join("harvester.db");
    config.storage.data_dir = dir.path().join("data");
    config.storage.staging_dir = dir.path().join("staging");
    (setup.configure)(&mut config);

    let parsed = crate::transcript::parse(VTT, config.harvest.min_segment_ms).unwrap();
    let captions: HashMap<i64, String> = parsed
        .captions
        .iter()
        .enumerate()
        .map(|(i, c)| (FIRST_SEGMENT_ID + i as i64, c.text.clone()))
        .collect();
    let overrides = setup
        .asr_overrides
        .into_iter()
        .map(|(i, t)| (FIRST_SEGMENT_ID + i as i64, t))
        .collect();

    let detector = Arc::new(FakeDetector {
        tracks: setup.tracks.clone(),
        calls: Mutex::new(Vec::new()),
    });
    let media = Arc::new(FakeMedia {
        frames: setup.media_frames.unwrap_or(setup.tracks.num_frames()),
        fail_audio: setup.audio_extraction_fails,
        writes: Mutex::new(0),
    });
    let segment_ids = |positions: Vec<usize>| -> Vec<i64> {
        positions.into_iter().map(|i| FIRST_SEGMENT_ID + i as i64).collect()
    };
    let aligner = Arc::new(FakeAligner {
        failing_segments: segment_ids(setup.alignment_failures),
        calls: Mutex::new(Vec::new()),
    });

    let services = Services {
        scraper: Arc::new(FakeScraper {
            transcript: setup.transcript,
            info: setup.info,
            audio: setup.scraper_audio,
            fail: setup.scraper_fails,
        }),
        speech: Arc::new(FakeSpeech {
            captions,
            overrides,
            word_text: "hello".into(),
        }),
        detector: detector.clone(),
        sync: Arc::new(FakeSync {
            results: setup.sync,
            failing_segments: segment_ids(setup.sync_failures),
        }),
        aligner: aligner.clone(),
        head_pose: Arc::new(FakePose),
        embedder: Arc::new(FakeEmbedder {
            by_index: setup.embeddings,
            first_segment_id: FIRST_SEGMENT_ID,
        }),
    };

    let ctx = PipelineContext::new(config, services, media.clone());
    let db = ctx.open_database().unwrap();
    Harness {
        _dir: dir,
        ctx,
        db,
        detector,
        aligner,
        media,
    }
}

#[test]
fn test_matching_speech_survives_every_stage() {
    let h = harness(Setup::default());

    let outcome = harvest_url(&h.ctx, &h.db, URL).unwrap();
    assert_eq!(
        outcome,
        HarvestOutcome::Completed {
            segments: 3,
            num_people: 1
        }
    );

    let video = h.db.get_video_by_url(URL).unwrap().unwrap();
    assert_eq!(video.status, VideoStatus::Completed);
    assert_eq!(video.num_people, Some(1));

    let segments = h.db.get_segments(video.id).unwrap();
    let first = &segments[0];
    assert_eq!(first.text, "hello world");
    assert_eq!(first.asr_text.as_deref(), Some("hello world"));
    assert_eq!(first.asr_confidence, Some(-1.0));
    assert_eq!(first.state, SegmentState::Finalized);
    assert_eq!(first.local_identity, LocalIdentity::Assigned(0));
    let speaker = first.speaker.unwrap();
    assert_eq!(speaker.track_id, 0);
    assert_eq!(speaker.confidence, 8.0);
    assert_eq!(first.head_pose.unwrap().yaw, 3.0);

    let words = h.db.get_words(first.id).unwrap();
    assert_eq!(words.len(), 2);
    assert_eq!(words[0].asr_text.as_deref(), Some("hello"));

    let paths = first.paths(&h.ctx.config.storage.data_dir);
    assert!(paths.speaker_video.exists());
    assert!(paths.speaker_video_wide.exists());
    assert!(paths.speaker_audio.exists());
    assert!(!paths.person_clip(0, "avi").exists());
    let word_paths = words[0].paths(&h.ctx.config.storage.data_dir);
    assert!(word_paths.video_mp4.exists());
    assert!(!word_paths.video.exists());
    assert!(!word_paths.audio.exists());
}

#[test]
fn test_weak_sync_rejects_segment_and_video() {
    // Track 0 is on screen throughout, track 1 only for the first frames.
    let mut tracks = single_face_tracks(50);
    for frame in 0..10 {
        let mut boxes = tracks.frame(frame).cloned().unwrap();
        boxes.insert(1, BoundingBox::new(400, 100, 500, 200));
        tracks.insert_frame(frame, boxes);
    }
    let h = harness(Setup {
        tracks,
        sync: BTreeMap::from([(
            0,
            SyncResult {
                offset: 0,
                confidence: 3.0,
                min_distance: 9.0,
            },
        )]),
        ..Setup::default()
    });

    let outcome = harvest_url(&h.ctx, &h.db, URL).unwrap();
    assert_eq!(
        outcome,
        HarvestOutcome::Rejected(VideoRejection::Exhausted {
            stage: "speaker_sync"
        })
    );

    let video = h.db.get_video_by_url(URL).unwrap().unwrap();
    assert_eq!(video.status, VideoStatus::Rejected);
    assert_eq!(h.db.count_segments(video.id).unwrap(), 0);
    assert!(!video.paths(&h.ctx.config.storage.data_dir).dir.exists());

    let rejections = h.db.rejections_for_video(video.id).unwrap();
    assert_eq!(rejections.len(), 3);
    assert!(rejections.iter().all(|r| r.stage == "speaker_sync"));
    let expected = RejectReason::LowSyncConfidence {
        confidence: 3.0,
        floor: 5.0,
    }
    .to_string();
    assert!(expected.starts_with("no speaker found"));
    assert_eq!(rejections[0].reason, expected);
}

#[test]
fn test_identities_follow_embedding_distance() {
    let h = harness(Setup {
        embeddings: vec![
            Some(vec![0.0, 0.0]),
            Some(vec![0.3, 0.0]),
            Some(vec![2.0, 0.0]),
        ],
        ..Setup::default()
    });

    let outcome = harvest_url(&h.ctx, &h.db, URL).unwrap();
    assert_eq!(
        outcome,
        HarvestOutcome::Completed {
            segments: 3,
            num_people: 2
        }
    );

    let video = h.db.get_video_by_url(URL).unwrap().unwrap();
    let identities: Vec<LocalIdentity> = h
        .db
        .get_segments(video.id)
        .unwrap()
        .iter()
        .map(|s| s.local_identity)
        .collect();
    assert_eq!(
        identities,
        vec![
            LocalIdentity::Assigned(0),
            LocalIdentity::Assigned(0),
            LocalIdentity::Assigned(1)
        ]
    );
}

#[test]
fn test_missing_embedding_leaves_segment_unassigned() {
    let h = harness(Setup {
        embeddings: vec![Some(vec![0.0, 0.0]), None, Some(vec![0.1, 0.0])],
        ..Setup::default()
    });

    harvest_url(&h.ctx, &h.db, URL).unwrap();
    let video = h.db.get_video_by_url(URL).unwrap().unwrap();
    let segments = h.db.get_segments(video.id).unwrap();
    assert_eq!(segments[1].local_identity, LocalIdentity::Unassigned);
    assert_eq!(segments[1].state, SegmentState::Finalized);
    assert_eq!(video.num_people, Some(1));
}

#[test]
fn test_rejected_segment_never_reaches_later_stages() {
    let h = harness(Setup {
        asr_overrides: HashMap::from([(
            1,
            Transcription {
                transcript: "completely unrelated speech".into(),
                confidence: -1.0,
                words: Vec::new(),
            },
        )]),
        ..Setup::default()
    });

    let outcome = harvest_url(&h.ctx, &h.db, URL).unwrap();
    assert!(matches!(outcome, HarvestOutcome::Completed { segments: 2, .. }));

    let rejected_id = FIRST_SEGMENT_ID + 1;
    let calls = h.detector.calls.lock().unwrap();
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().all(|p| segment_id_of(p) != Some(rejected_id)));
    assert!(h.db.get_segment(rejected_id).unwrap().is_none());

    let video = h.db.get_video_by_url(URL).unwrap().unwrap();
    let rejections = h.db.rejections_for_video(video.id).unwrap();
    assert_eq!(rejections.len(), 1);
    assert_eq!(rejections[0].stage, "asr_validation");
    assert_eq!(rejections[0].segment_id, rejected_id);
}

#[test]
fn test_low_asr_confidence_rejects() {
    let h = harness(Setup {
        asr_overrides: HashMap::from([(
            0,
            Transcription {
                transcript: "hello world".into(),
                confidence: -10.5,
                words: Vec::new(),
            },
        )]),
        ..Setup::default()
    });

    harvest_url(&h.ctx, &h.db, URL).unwrap();
    let video = h.db.get_video_by_url(URL).unwrap().unwrap();
    let rejections = h.db.rejections_for_video(video.id).unwrap();
    assert_eq!(rejections.len(), 1);
    assert!(rejections[0].reason.starts_with("ASR confidence"));
}

#[test]
fn test_harvested_url_is_skipped() {
    let h = harness(Setup::default());
    harvest_url(&h.ctx, &h.db, URL).unwrap();
    assert_eq!(harvest_url(&h.ctx, &h.db, URL).unwrap(), HarvestOutcome::Skipped);
}

#[test]
fn test_failed_download_leaves_no_row() {
    let h = harness(Setup {
        scraper_fails: true,
        ..Setup::default()
    });

    let err = harvest_url(&h.ctx, &h.db, URL).unwrap_err();
    assert!(matches!(err, HarvestError::Acquisition { .. }));
    assert!(h.db.get_video_by_url(URL).unwrap().is_none());
}

#[test]
fn test_failed_audio_extraction_leaves_nothing_behind() {
    let h = harness(Setup {
        scraper_audio: false,
        audio_extraction_fails: true,
        ..Setup::default()
    });

    let err = harvest_url(&h.ctx, &h.db, URL).unwrap_err();
    match err {
        HarvestError::Acquisition { source, .. } => {
            assert!(source.to_string().starts_with("ffmpeg failed: extracting audio"))
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(h.db.get_video_by_url(URL).unwrap().is_none());
    assert!(!h.ctx.config.storage.data_dir.join("1").exists());
    assert!(!h.ctx.config.storage.staging_dir.join(staging_name(URL)).exists());

    // Nothing marks the URL as done, so the next run tries again.
    assert!(harvest_url(&h.ctx, &h.db, URL).is_err());
}

#[test]
fn test_missing_audio_is_extracted_before_recording() {
    let h = harness(Setup {
        scraper_audio: false,
        ..Setup::default()
    });

    let outcome = harvest_url(&h.ctx, &h.db, URL).unwrap();
    assert!(matches!(outcome, HarvestOutcome::Completed { segments: 3, .. }));
    let video = h.db.get_video_by_url(URL).unwrap().unwrap();
    assert!(video.paths(&h.ctx.config.storage.data_dir).audio.exists());
}

#[test]
fn test_error_after_recording_discards_video() {
    let h = harness(Setup {
        info: Some("{ not json".into()),
        ..Setup::default()
    });

    let err = harvest_url(&h.ctx, &h.db, URL).unwrap_err();
    assert!(matches!(err, HarvestError::Other(_)));
    assert!(h.db.get_video_by_url(URL).unwrap().is_none());
    assert!(!h.ctx.config.storage.data_dir.join("1").exists());
    assert!(!matches!(
        harvest_url(&h.ctx, &h.db, URL),
        Ok(HarvestOutcome::Skipped)
    ));
}

#[test]
fn test_interrupted_harvest_is_redone() {
    let h = harness(Setup::default());
    let stale = h.db.create_video(URL).unwrap();
    let stale_dir = video_dir(&h.ctx.config.storage.data_dir, stale);
    touch(&stale_dir.join("video.mp4")).unwrap();

    let outcome = harvest_url(&h.ctx, &h.db, URL).unwrap();
    assert!(matches!(outcome, HarvestOutcome::Completed { segments: 3, .. }));

    assert!(!stale_dir.exists());
    let videos = h.db.list_videos(None).unwrap();
    assert_eq!(videos.len(), 1);
    assert_ne!(videos[0].id, stale);
    assert_eq!(videos[0].status, VideoStatus::Completed);
}

#[test]
fn test_frame_count_mismatch_rejects_segments() {
    let h = harness(Setup {
        media_frames: Some(40),
        ..Setup::default()
    });

    let outcome = harvest_url(&h.ctx, &h.db, URL).unwrap();
    assert_eq!(
        outcome,
        HarvestOutcome::Rejected(VideoRejection::Exhausted {
            stage: "speaker_sync"
        })
    );
    let video = h.db.get_video_by_url(URL).unwrap().unwrap();
    let rejections = h.db.rejections_for_video(video.id).unwrap();
    assert_eq!(rejections.len(), 3);
    assert_eq!(
        rejections[0].reason,
        "clip has 40 frames but detection covered 50"
    );
}

#[test]
fn test_keep_non_speakers_converts_other_faces() {
    let mut tracks = single_face_tracks(50);
    for frame in 0..50 {
        let mut boxes = tracks.frame(frame).cloned().unwrap();
        boxes.insert(1, BoundingBox::new(400, 100, 500, 200));
        tracks.insert_frame(frame, boxes);
    }
    let h = harness(Setup {
        tracks,
        sync: BTreeMap::from([
            (
                0,
                SyncResult {
                    offset: 2,
                    confidence: 8.0,
                    min_distance: 6.0,
                },
            ),
            (
                1,
                SyncResult {
                    offset: 0,
                    confidence: 6.0,
                    min_distance: 7.0,
                },
            ),
        ]),
        configure: |c| c.harvest.keep_non_speakers = true,
        ..Setup::default()
    });

    harvest_url(&h.ctx, &h.db, URL).unwrap();
    let video = h.db.get_video_by_url(URL).unwrap().unwrap();
    let segments = h.db.get_segments(video.id).unwrap();
    assert_eq!(segments.len(), 3);
    for segment in &segments {
        assert_eq!(segment.speaker.unwrap().track_id, 0);
        let paths = segment.paths(&h.ctx.config.storage.data_dir);
        assert!(paths.person_clip(1, "mp4").exists());
        assert!(!paths.person_clip(0, "mp4").exists());
        assert!(!paths.person_clip(0, "avi").exists());
        assert!(!paths.person_clip(1, "avi").exists());
    }
}

#[test]
fn test_failed_alignment_rejects_segment() {
    let h = harness(Setup {
        alignment_failures: vec![2],
        ..Setup::default()
    });

    let outcome = harvest_url(&h.ctx, &h.db, URL).unwrap();
    assert!(matches!(outcome, HarvestOutcome::Completed { segments: 2, .. }));

    let failed_id = FIRST_SEGMENT_ID + 2;
    assert!(h.db.get_segment(failed_id).unwrap().is_none());
    assert!(h.db.get_words(failed_id).unwrap().is_empty());

    let video = h.db.get_video_by_url(URL).unwrap().unwrap();
    let rejections = h.db.rejections_for_video(video.id).unwrap();
    assert_eq!(rejections.len(), 1);
    assert_eq!(rejections[0].stage, "forced_alignment");
    assert_eq!(rejections[0].segment_id, failed_id);
    assert!(rejections[0].reason.starts_with("forced alignment failed"));

    let data = &h.ctx.config.storage.data_dir;
    assert!(!crate::models::paths::segment_dir(data, video.id, failed_id).exists());
}

#[test]
fn test_sync_rejection_is_never_aligned() {
    let h = harness(Setup {
        sync_failures: vec![0],
        ..Setup::default()
    });

    let outcome = harvest_url(&h.ctx, &h.db, URL).unwrap();
    assert!(matches!(outcome, HarvestOutcome::Completed { segments: 2, .. }));

    let rejected_id = FIRST_SEGMENT_ID;
    assert_eq!(h.detector.calls.lock().unwrap().len(), 3);
    let aligned = h.aligner.calls.lock().unwrap().clone();
    assert_eq!(aligned.len(), 2);
    assert!(!aligned.contains(&rejected_id));

    let video = h.db.get_video_by_url(URL).unwrap().unwrap();
    let rejections = h.db.rejections_for_video(video.id).unwrap();
    assert_eq!(rejections.len(), 1);
    assert_eq!(rejections[0].stage, "speaker_sync");
    assert_eq!(rejections[0].reason, RejectReason::NoSyncResults.to_string());
}

#[test]
fn test_video_gates() {
    let h = harness(Setup {
        transcript: None,
        ..Setup::default()
    });
    assert_eq!(
        harvest_url(&h.ctx, &h.db, URL).unwrap(),
        HarvestOutcome::Rejected(VideoRejection::NoTranscript)
    );
    let video = h.db.get_video_by_url(URL).unwrap().unwrap();
    assert_eq!(video.status, VideoStatus::Rejected);
    assert_eq!(video.rejection_reason.as_deref(), Some("video has no transcript"));

    let h = harness(Setup {
        info: Some(r#"{"view_count": 50, "duration": 60.0}"#.into()),
        configure: |c| c.harvest.min_views = Some(100),
        ..Setup::default()
    });
    assert_eq!(
        harvest_url(&h.ctx, &h.db, URL).unwrap(),
        HarvestOutcome::Rejected(VideoRejection::TooFewViews { views: 50, min: 100 })
    );

    let h = harness(Setup {
        info: Some(r#"{"view_count": 5000, "duration": 900.0}"#.into()),
        configure: |c| c.harvest.max_duration_mins = Some(10),
        ..Setup::default()
    });
    assert!(matches!(
        harvest_url(&h.ctx, &h.db, URL).unwrap(),
        HarvestOutcome::Rejected(VideoRejection::TooLong { max_secs: 600, .. })
    ));
}

#[test]
fn test_manual_only_rejects_auto_transcript() {
    let h = harness(Setup {
        transcript: Some(
            "WEBVTT\n\n00:00:01.000 --> 00:00:03.000\nhello<00:00:01.500><c> world</c>\n".into(),
        ),
        configure: |c| c.harvest.manual_transcripts_only = true,
        ..Setup::default()
    });

    assert_eq!(
        harvest_url(&h.ctx, &h.db, URL).unwrap(),
        HarvestOutcome::Rejected(VideoRejection::AutoTranscript)
    );
    let video = h.db.get_video_by_url(URL).unwrap().unwrap();
    assert_eq!(video.transcript_type, TranscriptType::Auto);
}

#[test]
fn test_slicing_is_idempotent() {
    let h = harness(Setup::default());
    let video_id = h.db.create_video(URL).unwrap();
    let paths = VideoPaths::new(video_dir(&h.ctx.config.storage.data_dir, video_id));
    touch(&paths.video).unwrap();
    touch(&paths.audio).unwrap();
    let parsed = crate::transcript::parse(VTT, 1_000).unwrap();
    let segments = h.db.insert_segments(video_id, &parsed.captions).unwrap();

    let first = run_segment_stage(&h.db, &h.ctx.config.storage.data_dir, StageName::Slicing, segments.clone(), |s| {
        gates::slice(&h.ctx, &paths, s)
    })
    .unwrap();
    let writes = *h.media.writes.lock().unwrap();
    assert_eq!(writes, 9);

    let second = run_segment_stage(&h.db, &h.ctx.config.storage.data_dir, StageName::Slicing, segments, |s| {
        gates::slice(&h.ctx, &paths, s)
    })
    .unwrap();
    assert_eq!(first, second);
    assert_eq!(*h.media.writes.lock().unwrap(), writes);
}

#[test]
fn test_source_harvest_summary() {
    let h = harness(Setup::default());
    let summary = harvest_source(&h.ctx, &VideoSource::Channel("UC123".into())).unwrap();
    assert_eq!(summary.urls, 1);
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.segments, 3);

    let again = harvest_source(&h.ctx, &VideoSource::Channel("UC123".into())).unwrap();
    assert_eq!(again.skipped, 1);
}
