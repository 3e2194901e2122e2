use anyhow::Result;
use rusqlite::params;

use super::Database;
use crate::error::RejectReason;
use crate::models::Segment;

/// A segment removed at a gate. The segment row itself is gone; this is
/// what is left of it.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectionRecord {
    pub video_id: i64,
    pub segment_id: i64,
    pub start_ms: u64,
    pub end_ms: u64,
    pub stage: String,
    pub reason: String,
    pub rejected_at: String,
}

impl Database {
    pub fn record_rejection(&self, segment: &Segment, stage: &str, reason: &RejectReason) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO segment_rejections (video_id, segment_id, start_ms, end_ms, stage, reason)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
            params![
                segment.video_id,
                segment.id,
                segment.start_ms as i64,
                segment.end_ms as i64,
                stage,
                reason.to_string(),
            ],
        )?;
        Ok(())
    }

    /// Rejected segment counts per stage, largest first.
    pub fn rejection_counts(&self) -> Result<Vec<(String, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT stage, COUNT(*) AS n FROM segment_rejections GROUP BY stage ORDER BY n DESC, stage",
        )?;
        let counts = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(counts)
    }

    pub fn rejections_for_video(&self, video_id: i64) -> Result<Vec<RejectionRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT video_id, segment_id, start_ms, end_ms, stage, reason, rejected_at
            FROM segment_rejections
            WHERE video_id = ?
            ORDER BY id
            "#,
        )?;
        let records = stmt
            .query_map([video_id], |row| {
                Ok(RejectionRecord {
                    video_id: row.get(0)?,
                    segment_id: row.get(1)?,
                    start_ms: row.get::<_, i64>(2)? as u64,
                    end_ms: row.get::<_, i64>(3)? as u64,
                    stage: row.get(4)?,
                    reason: row.get(5)?,
                    rejected_at: row.get(6)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(records)
    }
}
