//! WebVTT caption parsing into segment candidates.

use anyhow::{anyhow, Context, Result};
use chrono::{NaiveTime, Timelike};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

use crate::models::TranscriptType;

/// One caption that survived cleanup, ready to become a segment.
#[derive(Debug, Clone, PartialEq)]
pub struct Caption {
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTranscript {
    pub captions: Vec<Caption>,
    pub transcript_type: TranscriptType,
}

struct Cue {
    start_ms: u64,
    end_ms: u64,
    lines: Vec<String>,
}

fn tag_pattern() -> &'static Regex {
    static TAGS: OnceLock<Regex> = OnceLock::new();
    TAGS.get_or_init(|| Regex::new(r"<[^>]*>").expect("valid tag pattern"))
}

fn punctuation_pattern() -> &'static Regex {
    static PUNCT: OnceLock<Regex> = OnceLock::new();
    PUNCT.get_or_init(|| Regex::new(r"[^\w\d'\s]+").expect("valid punctuation pattern"))
}

pub fn parse_file(path: &Path, min_duration_ms: u64) -> Result<ParsedTranscript> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading transcript {}", path.display()))?;
    parse(&content, min_duration_ms)
}

/// Parse WebVTT text into cleaned captions.
///
/// Captions shorter than `min_duration_ms` are dropped. A line repeated from
/// the previous caption (rolling auto-captions) is removed from the later one.
/// Punctuation other than apostrophes is stripped and captions left without
/// text are discarded.
pub fn parse(content: &str, min_duration_ms: u64) -> Result<ParsedTranscript> {
    let (cues, auto_generated) = read_cues(content)?;

    let mut kept: Vec<Cue> = cues
        .into_iter()
        .filter(|cue| cue.end_ms.saturating_sub(cue.start_ms) >= min_duration_ms)
        .collect();

    for i in 1..kept.len() {
        let (before, after) = kept.split_at_mut(i);
        let previous = &before[i - 1].lines;
        after[0].lines.retain(|line| !previous.contains(line));
    }

    let captions = kept
        .into_iter()
        .filter_map(|cue| {
            let joined = cue.lines.join(" ");
            let text = punctuation_pattern().replace_all(&joined, "").into_owned();
            if text.trim().is_empty() {
                None
            } else {
                Some(Caption {
                    start_ms: cue.start_ms,
                    end_ms: cue.end_ms,
                    text,
                })
            }
        })
        .collect();

    Ok(ParsedTranscript {
        captions,
        transcript_type: if auto_generated {
            TranscriptType::Auto
        } else {
            TranscriptType::Manual
        },
    })
}

fn read_cues(content: &str) -> Result<(Vec<Cue>, bool)> {
    let mut lines = content.lines().map(|l| l.trim_start_matches('\u{feff}'));
    match lines.next() {
        Some(header) if header.trim_start().starts_with("WEBVTT") => {}
        _ => return Err(anyhow!("missing WEBVTT header")),
    }

    let mut cues = Vec::new();
    let mut auto_generated = false;
    let mut current: Option<Cue> = None;

    for line in lines {
        if line.trim().is_empty() {
            if let Some(cue) = current.take() {
                cues.push(cue);
            }
            continue;
        }

        match current.as_mut() {
            Some(cue) => {
                if line.contains("<c>") {
                    auto_generated = true;
                }
                let text = decode_entities(&tag_pattern().replace_all(line, ""));
                if !text.trim().is_empty() {
                    cue.lines.push(text);
                }
            }
            None => {
                if let Some((start, end)) = line.split_once("-->") {
                    let end = end.split_whitespace().next().unwrap_or_default();
                    current = Some(Cue {
                        start_ms: parse_timestamp(start.trim())?,
                        end_ms: parse_timestamp(end)?,
                        lines: Vec::new(),
                    });
                }
                // Anything else outside a cue is a header, identifier, NOTE or STYLE line.
            }
        }
    }

    if let Some(cue) = current.take() {
        cues.push(cue);
    }

    Ok((cues, auto_generated))
}

/// Parse `HH:MM:SS.mmm` or `MM:SS.mmm` into milliseconds.
pub fn parse_timestamp(s: &str) -> Result<u64> {
    let full = if s.matches(':').count() == 1 {
        format!("00:{}", s)
    } else {
        s.to_string()
    };

    let time = NaiveTime::parse_from_str(&full, "%H:%M:%S%.f")
        .with_context(|| format!("invalid caption timestamp '{}'", s))?;

    Ok(time.num_seconds_from_midnight() as u64 * 1000 + (time.nanosecond() / 1_000_000) as u64)
}

fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
