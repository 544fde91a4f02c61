use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// One time-coded slice of a transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start_secs: f64,
    pub end_secs: f64,
    pub text: String,
}

impl Segment {
    pub fn mid_secs(&self) -> f64 {
        (self.start_secs + self.end_secs) / 2.0
    }
}

/// Immutable source text being queried, with optional time-coded segments.
/// The id participates in request fingerprints, so it must stay stable for
/// the lifetime of the corpus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Corpus {
    pub id: String,
    pub text: String,
    pub segments: Option<Vec<Segment>>,
    pub created_at: DateTime<Utc>,
}

impl Corpus {
    pub fn new(text: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), text)
    }

    pub fn with_id(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            segments: None,
            created_at: Utc::now(),
        }
    }

    /// Builds a corpus from time-coded segments. The corpus text is the
    /// segment texts joined by newlines, in order, so char offsets into the
    /// text can be mapped back to segments.
    pub fn from_segments(id: impl Into<String>, segments: Vec<Segment>) -> Self {
        let text = segments
            .iter()
            .map(|segment| segment.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        Self {
            id: id.into(),
            text,
            segments: Some(segments),
            created_at: Utc::now(),
        }
    }

    /// Parses a plain-text transcript where blocks are separated by blank
    /// lines and each block starts with a `HH:MM:SS - HH:MM:SS` header line.
    /// Blocks without a parsable header are folded into the previous segment.
    pub fn from_timed_transcript(
        id: impl Into<String>,
        transcript: &str,
    ) -> Result<Self, AppError> {
        let mut segments: Vec<Segment> = Vec::new();

        for block in transcript.split("\n\n") {
            let block = block.trim();
            if block.is_empty() {
                continue;
            }
            let (header, body) = match block.split_once('\n') {
                Some(parts) => parts,
                None => (block, ""),
            };
            match parse_time_range(header) {
                Some((start_secs, end_secs)) => segments.push(Segment {
                    start_secs,
                    end_secs,
                    text: normalize_text(body),
                }),
                None => match segments.last_mut() {
                    Some(last) => {
                        last.text.push(' ');
                        last.text.push_str(&normalize_text(block));
                    }
                    None => {
                        return Err(AppError::Validation(
                            "transcript does not start with a time-coded block".into(),
                        ))
                    }
                },
            }
        }

        if segments.is_empty() {
            return Err(AppError::Validation("transcript contains no text".into()));
        }

        Ok(Self::from_segments(id, segments))
    }

    pub fn len_chars(&self) -> usize {
        self.text.chars().count()
    }

    pub fn duration_secs(&self) -> Option<f64> {
        self.segments
            .as_ref()
            .and_then(|segments| segments.last())
            .map(|segment| segment.end_secs)
    }
}

/// Collapses whitespace runs and restores the space after sentence-ending
/// periods that raw transcripts often drop.
pub fn normalize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut last_was_space = true;

    while let Some(c) = chars.next() {
        if c.is_whitespace() {
            if !last_was_space {
                out.push(' ');
                last_was_space = true;
            }
            continue;
        }
        out.push(c);
        last_was_space = false;
        if c == '.' {
            if let Some(next) = chars.peek() {
                if next.is_ascii_uppercase() {
                    out.push(' ');
                    last_was_space = true;
                }
            }
        }
    }

    out.trim_end().to_owned()
}

fn parse_time_range(header: &str) -> Option<(f64, f64)> {
    let (start, end) = header.split_once('-')?;
    Some((parse_timestamp(start.trim())?, parse_timestamp(end.trim())?))
}

fn parse_timestamp(value: &str) -> Option<f64> {
    let mut total = 0.0;
    let parts: Vec<&str> = value.split(':').collect();
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }
    for part in &parts {
        let unit: f64 = part.trim().parse().ok()?;
        total = total * 60.0 + unit;
    }
    Some(total)
}
