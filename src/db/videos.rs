use anyhow::Result;
use rusqlite::params;

use super::Database;
use crate::models::{TranscriptType, Video, VideoInfo, VideoStatus};

const VIDEO_COLUMNS: &str = r#"
    id, url, title, transcript_type, num_people, status, rejection_reason,
    duration_secs, view_count, created_at
"#;

fn video_from_row(row: &rusqlite::Row) -> rusqlite::Result<Video> {
    Ok(Video {
        id: row.get(0)?,
        url: row.get(1)?,
        title: row.get(2)?,
        transcript_type: TranscriptType::from_str(&row.get::<_, String>(3)?),
        num_people: row.get::<_, Option<i64>>(4)?.map(|n| n as u32),
        status: VideoStatus::from_str(&row.get::<_, String>(5)?),
        rejection_reason: row.get(6)?,
        duration_secs: row.get(7)?,
        view_count: row.get::<_, Option<i64>>(8)?.map(|n| n as u64),
        created_at: row.get(9)?,
    })
}

impl Database {
    /// Whether a URL has been harvested to an outcome, completed or rejected.
    /// A row still marked processing was left by an interrupted run.
    pub fn video_exists(&self, url: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM videos WHERE url = ? AND status IN ('completed', 'rejected')",
            [url],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn create_video(&self, url: &str) -> Result<i64> {
        self.conn.execute("INSERT INTO videos (url) VALUES (?)", [url])?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_video(&self, id: i64) -> Result<Option<Video>> {
        let result = self.conn.query_row(
            &format!("SELECT {} FROM videos WHERE id = ?", VIDEO_COLUMNS),
            [id],
            video_from_row,
        );
        match result {
            Ok(video) => Ok(Some(video)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_video_by_url(&self, url: &str) -> Result<Option<Video>> {
        let result = self.conn.query_row(
            &format!("SELECT {} FROM videos WHERE url = ?", VIDEO_COLUMNS),
            [url],
            video_from_row,
        );
        match result {
            Ok(video) => Ok(Some(video)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_videos(&self, status: Option<VideoStatus>) -> Result<Vec<Video>> {
        let sql = match status {
            Some(_) => format!("SELECT {} FROM videos WHERE status = ? ORDER BY id", VIDEO_COLUMNS),
            None => format!("SELECT {} FROM videos ORDER BY id", VIDEO_COLUMNS),
        };
        let mut stmt = self.conn.prepare(&sql)?;
        let videos: Vec<Video> = match status {
            Some(status) => stmt
                .query_map([status.as_str()], video_from_row)?
                .filter_map(|r| r.ok())
                .collect(),
            None => stmt
                .query_map([], video_from_row)?
                .filter_map(|r| r.ok())
                .collect(),
        };
        Ok(videos)
    }

    pub fn update_video_info(&self, id: i64, info: &VideoInfo) -> Result<()> {
        self.conn.execute(
            "UPDATE videos SET title = ?, duration_secs = ?, view_count = ? WHERE id = ?",
            params![info.title, info.duration, info.view_count.map(|v| v as i64), id],
        )?;
        Ok(())
    }

    pub fn set_transcript_type(&self, id: i64, transcript_type: TranscriptType) -> Result<()> {
        self.conn.execute(
            "UPDATE videos SET transcript_type = ? WHERE id = ?",
            params![transcript_type.as_str(), id],
        )?;
        Ok(())
    }

    /// Keep the row as a marker so the URL is not harvested again.
    pub fn mark_video_rejected(&self, id: i64, reason: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE videos SET status = 'rejected', rejection_reason = ? WHERE id = ?",
            params![reason, id],
        )?;
        Ok(())
    }

    pub fn complete_video(&self, id: i64, num_people: u32) -> Result<()> {
        self.conn.execute(
            r#"
            UPDATE videos
            SET status = 'completed', num_people = ?, completed_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
            params![num_people as i64, id],
        )?;
        Ok(())
    }

    /// Delete a video row with its segments, words and rejection records.
    pub fn delete_video(&self, id: i64) -> Result<()> {
        self.conn
            .execute("DELETE FROM segment_rejections WHERE video_id = ?", [id])?;
        self.conn.execute("DELETE FROM videos WHERE id = ?", [id])?;
        Ok(())
    }

    /// Remove every segment of a video; words go with them.
    pub fn delete_video_segments(&self, id: i64) -> Result<usize> {
        let removed = self
            .conn
            .execute("DELETE FROM segments WHERE video_id = ?", [id])?;
        Ok(removed)
    }
}
