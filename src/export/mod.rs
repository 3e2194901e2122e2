use anyhow::Result;
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::db::Database;
use crate::models::paths::segment_dir;

/// Export format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Some(ExportFormat::Json),
            "csv" => Some(ExportFormat::Csv),
            _ => None,
        }
    }
}

/// A finalised segment of a completed video.
#[derive(Debug, Serialize)]
pub struct ExportedSegment {
    pub video_id: i64,
    pub url: String,
    pub segment_id: i64,
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
    pub asr_text: Option<String>,
    pub asr_confidence: Option<f64>,
    pub speaker_track: Option<u32>,
    pub av_offset: Option<i32>,
    pub sync_confidence: Option<f64>,
    pub yaw: Option<f64>,
    pub pitch: Option<f64>,
    pub roll: Option<f64>,
    pub direction: Option<String>,
    pub local_identity: i64,
    pub fa_log_likelihood: Option<f64>,
    pub media_dir: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub words: Option<Vec<ExportedWord>>,
}

#[derive(Debug, Serialize)]
pub struct ExportedWord {
    pub word_id: i64,
    pub segment_id: i64,
    pub text: String,
    pub start: f64,
    pub end: f64,
    pub alignment_score: f64,
    pub asr_text: Option<String>,
    pub asr_confidence: Option<f64>,
}

/// Export the dataset to a file. With `include_words`, JSON nests the words
/// under each segment and CSV writes them to a sibling `<name>.words.csv`.
pub fn export_dataset(
    db: &Database,
    data_dir: &Path,
    output_path: &Path,
    format: ExportFormat,
    include_words: bool,
) -> Result<usize> {
    let mut segments = get_segments_for_export(db, data_dir)?;
    let count = segments.len();

    if include_words {
        for segment in &mut segments {
            segment.words = Some(get_words_for_export(db, segment.segment_id)?);
        }
    }

    match format {
        ExportFormat::Json => export_json(&segments, output_path)?,
        ExportFormat::Csv => {
            export_csv(&segments, output_path)?;
            if include_words {
                export_words_csv(&segments, &words_csv_path(output_path))?;
            }
        }
    }

    Ok(count)
}

pub fn words_csv_path(output_path: &Path) -> PathBuf {
    let stem = output_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "dataset".to_string());
    output_path.with_file_name(format!("{}.words.csv", stem))
}

fn get_segments_for_export(db: &Database, data_dir: &Path) -> Result<Vec<ExportedSegment>> {
    let mut stmt = db.conn.prepare(
        r#"
        SELECT
            s.video_id,
            v.url,
            s.id,
            s.start_ms,
            s.end_ms,
            s.text,
            s.asr_text,
            s.asr_confidence,
            s.speaker_track,
            s.av_offset,
            s.sync_confidence,
            s.yaw,
            s.pitch,
            s.roll,
            s.direction,
            s.local_identity,
            s.fa_log_likelihood
        FROM segments s
        JOIN videos v ON v.id = s.video_id
        WHERE v.status = 'completed' AND s.state = 'finalized'
        ORDER BY s.video_id, s.start_ms, s.id
        "#,
    )?;

    let segments = stmt
        .query_map([], |row| {
            let video_id: i64 = row.get(0)?;
            let segment_id: i64 = row.get(2)?;
            let media_dir = segment_dir(data_dir, video_id, segment_id)
                .to_string_lossy()
                .to_string();

            Ok(ExportedSegment {
                video_id,
                url: row.get(1)?,
                segment_id,
                start_ms: row.get(3)?,
                end_ms: row.get(4)?,
                text: row.get(5)?,
                asr_text: row.get(6)?,
                asr_confidence: row.get(7)?,
                speaker_track: row.get(8)?,
                av_offset: row.get(9)?,
                sync_confidence: row.get(10)?,
                yaw: row.get(11)?,
                pitch: row.get(12)?,
                roll: row.get(13)?,
                direction: row.get(14)?,
                local_identity: row.get(15)?,
                fa_log_likelihood: row.get(16)?,
                media_dir,
                words: None,
            })
        })?
        .filter_map(|r| r.ok())
        .collect();

    Ok(segments)
}

fn get_words_for_export(db: &Database, segment_id: i64) -> Result<Vec<ExportedWord>> {
    let words = db
        .get_words(segment_id)?
        .into_iter()
        .map(|w| ExportedWord {
            word_id: w.id,
            segment_id: w.segment_id,
            text: w.text,
            start: w.start,
            end: w.end,
            alignment_score: w.alignment_score,
            asr_text: w.asr_text,
            asr_confidence: w.asr_confidence,
        })
        .collect();
    Ok(words)
}

fn export_json(segments: &[ExportedSegment], output_path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(segments)?;
    let mut file = File::create(output_path)?;
    file.write_all(json.as_bytes())?;
    Ok(())
}

fn opt<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(|v| v.to_string()).unwrap_or_default()
}

fn export_csv(segments: &[ExportedSegment], output_path: &Path) -> Result<()> {
    let mut wtr = csv::Writer::from_path(output_path)?;

    wtr.write_record([
        "video_id",
        "url",
        "segment_id",
        "start_ms",
        "end_ms",
        "text",
        "asr_text",
        "asr_confidence",
        "speaker_track",
        "av_offset",
        "sync_confidence",
        "yaw",
        "pitch",
        "roll",
        "direction",
        "local_identity",
        "fa_log_likelihood",
        "media_dir",
    ])?;

    for s in segments {
        wtr.write_record([
            &s.video_id.to_string(),
            &s.url,
            &s.segment_id.to_string(),
            &s.start_ms.to_string(),
            &s.end_ms.to_string(),
            &s.text,
            s.asr_text.as_deref().unwrap_or(""),
            &opt(&s.asr_confidence),
            &opt(&s.speaker_track),
            &opt(&s.av_offset),
            &opt(&s.sync_confidence),
            &opt(&s.yaw),
            &opt(&s.pitch),
            &opt(&s.roll),
            s.direction.as_deref().unwrap_or(""),
            &s.local_identity.to_string(),
            &opt(&s.fa_log_likelihood),
            &s.media_dir,
        ])?;
    }

    wtr.flush()?;
    Ok(())
}

fn export_words_csv(segments: &[ExportedSegment], output_path: &Path) -> Result<()> {
    let mut wtr = csv::Writer::from_path(output_path)?;

    wtr.write_record([
        "word_id",
        "segment_id",
        "text",
        "start",
        "end",
        "alignment_score",
        "asr_text",
        "asr_confidence",
    ])?;

    for word in segments.iter().flat_map(|s| s.words.iter().flatten()) {
        wtr.write_record([
            &word.word_id.to_string(),
            &word.segment_id.to_string(),
            &word.text,
            &word.start.to_string(),
            &word.end.to_string(),
            &word.alignment_score.to_string(),
            word.asr_text.as_deref().unwrap_or(""),
            &opt(&word.asr_confidence),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}
