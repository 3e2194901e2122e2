use anyhow::Result;
use rusqlite::params;

use super::Database;
use crate::models::{AlignedWord, Word};

fn word_from_row(row: &rusqlite::Row) -> rusqlite::Result<Word> {
    Ok(Word {
        id: row.get(0)?,
        segment_id: row.get(1)?,
        video_id: row.get(2)?,
        text: row.get(3)?,
        start: row.get(4)?,
        end: row.get(5)?,
        alignment_score: row.get(6)?,
        asr_text: row.get(7)?,
        asr_confidence: row.get(8)?,
    })
}

impl Database {
    pub fn insert_word(&self, video_id: i64, segment_id: i64, aligned: &AlignedWord) -> Result<Word> {
        self.conn.execute(
            "INSERT INTO words (segment_id, text, start_secs, end_secs, alignment_score) VALUES (?, ?, ?, ?, ?)",
            params![segment_id, aligned.text, aligned.start, aligned.end, aligned.score],
        )?;

        Ok(Word {
            id: self.conn.last_insert_rowid(),
            segment_id,
            video_id,
            text: aligned.text.clone(),
            start: aligned.start,
            end: aligned.end,
            alignment_score: aligned.score,
            asr_text: None,
            asr_confidence: None,
        })
    }

    pub fn update_word_asr(&self, id: i64, asr_text: &str, asr_confidence: f64) -> Result<()> {
        self.conn.execute(
            "UPDATE words SET asr_text = ?, asr_confidence = ? WHERE id = ?",
            params![asr_text, asr_confidence, id],
        )?;
        Ok(())
    }

    pub fn delete_word(&self, id: i64) -> Result<()> {
        self.conn.execute("DELETE FROM words WHERE id = ?", [id])?;
        Ok(())
    }

    pub fn get_words(&self, segment_id: i64) -> Result<Vec<Word>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT w.id, w.segment_id, s.video_id, w.text, w.start_secs, w.end_secs,
                   w.alignment_score, w.asr_text, w.asr_confidence
            FROM words w
            JOIN segments s ON s.id = w.segment_id
            WHERE w.segment_id = ?
            ORDER BY w.start_secs, w.id
            "#,
        )?;
        let words = stmt
            .query_map([segment_id], word_from_row)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(words)
    }
}
