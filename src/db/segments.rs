use anyhow::Result;
use rusqlite::params;

use super::Database;
use crate::faces::FrameTracks;
use crate::models::{
    AlignedWord, HeadPose, HeadPoseDirection, LocalIdentity, Segment, SegmentState, SpeakerSync,
};
use crate::transcript::Caption;

const SEGMENT_COLUMNS: &str = r#"
    id, video_id, start_ms, end_ms, text, state, frame_detections,
    asr_text, asr_confidence, sync_confidence, speaker_track, av_offset,
    pitch, roll, yaw, direction, local_identity, fa_log_likelihood, fa_alignment
"#;

fn parse_json<T: serde::de::DeserializeOwned>(value: Option<String>) -> Option<T> {
    value.and_then(|s| serde_json::from_str(&s).ok())
}

fn segment_from_row(row: &rusqlite::Row) -> rusqlite::Result<Segment> {
    let state: String = row.get(5)?;

    let speaker = match (
        row.get::<_, Option<i64>>(10)?,
        row.get::<_, Option<i64>>(11)?,
        row.get::<_, Option<f64>>(9)?,
    ) {
        (Some(track_id), Some(offset), Some(confidence)) => Some(SpeakerSync {
            track_id: track_id as u32,
            offset: offset as i32,
            confidence,
        }),
        _ => None,
    };

    let head_pose = match (
        row.get::<_, Option<f64>>(12)?,
        row.get::<_, Option<f64>>(13)?,
        row.get::<_, Option<f64>>(14)?,
    ) {
        (Some(pitch), Some(roll), Some(yaw)) => Some(HeadPose {
            pitch,
            roll,
            yaw,
            direction: row
                .get::<_, Option<String>>(15)?
                .map(|d| HeadPoseDirection::parse(&d))
                .unwrap_or_default(),
        }),
        _ => None,
    };

    Ok(Segment {
        id: row.get(0)?,
        video_id: row.get(1)?,
        start_ms: row.get::<_, i64>(2)? as u64,
        end_ms: row.get::<_, i64>(3)? as u64,
        text: row.get(4)?,
        state: SegmentState::from_label(&state).unwrap_or(SegmentState::Pending),
        frame_detections: parse_json::<FrameTracks>(row.get(6)?),
        asr_text: row.get(7)?,
        asr_confidence: row.get(8)?,
        speaker,
        head_pose,
        local_identity: LocalIdentity::from_db(row.get(16)?),
        fa_log_likelihood: row.get(17)?,
        fa_alignment: parse_json::<Vec<AlignedWord>>(row.get(18)?),
    })
}

impl Database {
    /// Insert caption-derived segments in order and return them as `Pending`.
    pub fn insert_segments(&self, video_id: i64, captions: &[Caption]) -> Result<Vec<Segment>> {
        let mut stmt = self.conn.prepare(
            "INSERT INTO segments (video_id, start_ms, end_ms, text, state) VALUES (?, ?, ?, ?, 'pending')",
        )?;

        let mut segments = Vec::with_capacity(captions.len());
        for caption in captions {
            stmt.execute(params![
                video_id,
                caption.start_ms as i64,
                caption.end_ms as i64,
                caption.text
            ])?;
            segments.push(Segment::new(
                self.conn.last_insert_rowid(),
                video_id,
                caption.start_ms,
                caption.end_ms,
                caption.text.clone(),
            ));
        }
        Ok(segments)
    }

    /// Surviving segments of a video in timeline order.
    pub fn get_segments(&self, video_id: i64) -> Result<Vec<Segment>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM segments WHERE video_id = ? ORDER BY start_ms, id",
            SEGMENT_COLUMNS
        ))?;
        let segments = stmt
            .query_map([video_id], segment_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(segments)
    }

    pub fn get_segment(&self, id: i64) -> Result<Option<Segment>> {
        let result = self.conn.query_row(
            &format!("SELECT {} FROM segments WHERE id = ?", SEGMENT_COLUMNS),
            [id],
            segment_from_row,
        );
        match result {
            Ok(segment) => Ok(Some(segment)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist every enrichment field of a surviving segment.
    pub fn update_segment(&self, segment: &Segment) -> Result<()> {
        let frame_detections = segment
            .frame_detections
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let fa_alignment = segment
            .fa_alignment
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let speaker = segment.speaker.as_ref();
        let pose = segment.head_pose.as_ref();

        self.conn.execute(
            r#"
            UPDATE segments SET
                text = ?, state = ?, frame_detections = ?,
                asr_text = ?, asr_confidence = ?,
                sync_confidence = ?, speaker_track = ?, av_offset = ?,
                pitch = ?, roll = ?, yaw = ?, direction = ?,
                local_identity = ?, fa_log_likelihood = ?, fa_alignment = ?,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
            params![
                segment.text,
                segment.state.label(),
                frame_detections,
                segment.asr_text,
                segment.asr_confidence,
                speaker.map(|s| s.confidence),
                speaker.map(|s| s.track_id as i64),
                speaker.map(|s| s.offset as i64),
                pose.map(|p| p.pitch),
                pose.map(|p| p.roll),
                pose.map(|p| p.yaw),
                pose.map(|p| p.direction.as_str()),
                segment.local_identity.to_db(),
                segment.fa_log_likelihood,
                fa_alignment,
                segment.id,
            ],
        )?;
        Ok(())
    }

    pub fn delete_segment(&self, id: i64) -> Result<()> {
        self.conn.execute("DELETE FROM segments WHERE id = ?", [id])?;
        Ok(())
    }

    pub fn count_segments(&self, video_id: i64) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM segments WHERE video_id = ?",
            [video_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::faces::BoundingBox;
    use std::collections::BTreeMap;

    fn setup() -> (Database, i64) {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let video_id = db.create_video("https://example.com/v").unwrap();
        (db, video_id)
    }

    fn caption(start_ms: u64, end_ms: u64, text: &str) -> Caption {
        Caption {
            start_ms,
            end_ms,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_insert_and_order() {
        let (db, video_id) = setup();
        let inserted = db
            .insert_segments(
                video_id,
                &[caption(5_000, 7_000, "second"), caption(1_000, 3_000, "first")],
            )
            .unwrap();
        assert_eq!(inserted.len(), 2);
        assert!(inserted.iter().all(|s| s.state == SegmentState::Pending));

        let loaded = db.get_segments(video_id).unwrap();
        let texts: Vec<&str> = loaded.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second"]);
        assert_eq!(loaded[0].local_identity, LocalIdentity::Unassigned);
    }

    #[test]
    fn test_update_round_trips_enrichment() {
        let (db, video_id) = setup();
        let mut segment = db
            .insert_segments(video_id, &[caption(0, 2_000, "hello world")])
            .unwrap()
            .remove(0);

        let mut tracks = FrameTracks::new();
        tracks.insert_frame(0, BTreeMap::from([(0, BoundingBox::new(1, 2, 3, 4))]));

        segment.state = SegmentState::Finalized;
        segment.frame_detections = Some(tracks.clone());
        segment.asr_text = Some("hello world".into());
        segment.asr_confidence = Some(-1.0);
        segment.speaker = Some(SpeakerSync {
            track_id: 0,
            offset: 3,
            confidence: 7.5,
        });
        segment.head_pose = Some(HeadPose {
            yaw: 12.0,
            pitch: 0.0,
            roll: 1.0,
            direction: HeadPoseDirection::CentreRight,
        });
        segment.local_identity = LocalIdentity::Assigned(1);
        segment.fa_log_likelihood = Some(-0.4);
        segment.fa_alignment = Some(vec![AlignedWord {
            text: "hello".into(),
            start: 0.1,
            end: 0.4,
            score: 1.2,
        }]);
        db.update_segment(&segment).unwrap();

        let loaded = db.get_segment(segment.id).unwrap().unwrap();
        assert_eq!(loaded, segment);
    }

    #[test]
    fn test_delete_segment_and_video_segments() {
        let (db, video_id) = setup();
        let segments = db
            .insert_segments(
                video_id,
                &[caption(0, 2_000, "a"), caption(2_000, 4_000, "b"), caption(4_000, 6_000, "c")],
            )
            .unwrap();

        db.delete_segment(segments[1].id).unwrap();
        assert_eq!(db.count_segments(video_id).unwrap(), 2);
        assert!(db.get_segment(segments[1].id).unwrap().is_none());

        assert_eq!(db.delete_video_segments(video_id).unwrap(), 2);
        assert_eq!(db.count_segments(video_id).unwrap(), 0);
    }
}
