use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::bbox::BoundingBox;

/// Per-frame face tracks: frame index -> {track id -> box}.
///
/// Every processed frame has an entry, so `num_frames` equals the number of
/// frames the tracker saw even when some of them contain nobody.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameTracks {
    frames: BTreeMap<usize, BTreeMap<u32, BoundingBox>>,
}

impl FrameTracks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_frame(&mut self, frame: usize, boxes: BTreeMap<u32, BoundingBox>) {
        self.frames.insert(frame, boxes);
    }

    pub fn frame(&self, frame: usize) -> Option<&BTreeMap<u32, BoundingBox>> {
        self.frames.get(&frame)
    }

    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    pub fn track_ids(&self) -> BTreeSet<u32> {
        self.frames
            .values()
            .flat_map(|boxes| boxes.keys().copied())
            .collect()
    }

    pub fn num_people(&self) -> usize {
        self.track_ids().len()
    }

    /// Boxes of one track in frame order, skipping frames it is absent from.
    pub fn person_track(&self, track_id: u32) -> Vec<BoundingBox> {
        self.frames
            .values()
            .filter_map(|boxes| boxes.get(&track_id).copied())
            .collect()
    }

    /// Fraction of `total_frames` in which the track appears.
    pub fn coverage(&self, track_id: u32, total_frames: usize) -> f64 {
        if total_frames == 0 {
            return 0.0;
        }
        let present = self
            .frames
            .values()
            .filter(|boxes| boxes.contains_key(&track_id))
            .count();
        present as f64 / total_frames as f64
    }

    /// Tracks present in exactly `total_frames` frames. A count that differs
    /// from the frames seen by the tracker matches nothing.
    pub fn full_coverage_tracks(&self, total_frames: usize) -> Vec<u32> {
        if total_frames == 0 || total_frames != self.num_frames() {
            return Vec::new();
        }
        self.track_ids()
            .into_iter()
            .filter(|id| self.frames.values().all(|boxes| boxes.contains_key(id)))
            .collect()
    }
}
