use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Audio-visual synchronisation result for one tracked person.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    /// Audio offset in video frames.
    pub offset: i32,
    pub confidence: f64,
    #[serde(default, alias = "minimum_distance")]
    pub min_distance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpeakerSelection {
    Speaker {
        track_id: u32,
        offset: i32,
        confidence: f64,
    },
    /// No full-coverage track produced a sync result.
    NoCandidates,
    /// The most confident track still fell below the floor.
    BelowFloor { track_id: u32, confidence: f64 },
}

/// Pick the track whose lips best match the audio.
///
/// Highest confidence wins; on a tie the lower track id is kept.
pub fn select_speaker(results: &BTreeMap<u32, SyncResult>, floor: f64) -> SpeakerSelection {
    let mut best: Option<(u32, &SyncResult)> = None;
    for (&track_id, result) in results {
        match best {
            Some((_, current)) if result.confidence <= current.confidence => {}
            _ => best = Some((track_id, result)),
        }
    }

    match best {
        None => SpeakerSelection::NoCandidates,
        Some((track_id, result)) if result.confidence >= floor => SpeakerSelection::Speaker {
            track_id,
            offset: result.offset,
            confidence: result.confidence,
        },
        Some((track_id, result)) => SpeakerSelection::BelowFloor {
            track_id,
            confidence: result.confidence,
        },
    }
}

/// Seconds to delay the audio stream for a frame offset.
pub fn audio_delay_secs(offset_frames: i32, fps: u32) -> f64 {
    if fps == 0 {
        return 0.0;
    }
    offset_frames as f64 / fps as f64
}
