use common::types::Corpus;

use crate::config::SelectionTuning;

const MIN_WINDOW_CHARS: usize = 200;

/// A scoreable region of the corpus. Offsets are char-based so they stay
/// meaningful across encodings; `lower` caches the lowercased text for
/// matching.
#[derive(Debug, Clone)]
pub struct CandidateSpan {
    pub start: usize,
    pub end: usize,
    pub lower: String,
    pub time_range: Option<(f64, f64)>,
}

impl CandidateSpan {
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Builds candidate spans: one per segment when the corpus is time-coded,
/// fixed overlapping windows over the raw text otherwise.
pub fn build_candidates(
    corpus: &Corpus,
    char_budget: usize,
    tuning: &SelectionTuning,
) -> Vec<CandidateSpan> {
    if let Some(segments) = corpus.segments.as_ref().filter(|s| !s.is_empty()) {
        let mut candidates = Vec::with_capacity(segments.len());
        let mut offset = 0usize;
        for segment in segments {
            let len = segment.text.chars().count();
            candidates.push(CandidateSpan {
                start: offset,
                end: offset + len,
                lower: segment.text.to_lowercase(),
                time_range: Some((segment.start_secs, segment.end_secs)),
            });
            // segments are newline-joined in the corpus text
            offset += len + 1;
        }
        return candidates;
    }

    let window = (char_budget / tuning.section_divisor.max(1)).max(MIN_WINDOW_CHARS);
    let step = (window / tuning.overlap_divisor.max(1)).max(1);
    let total = corpus.len_chars();

    let mut candidates = Vec::new();
    let mut start = 0usize;
    loop {
        let end = (start + window).min(total);
        candidates.push(CandidateSpan {
            start,
            end,
            lower: slice_chars(&corpus.text, start, end).to_lowercase(),
            time_range: None,
        });
        if end >= total {
            break;
        }
        start += step;
    }
    candidates
}

/// Slices by char offsets, clamped to the text length.
pub fn slice_chars(text: &str, start: usize, end: usize) -> &str {
    if end <= start {
        return "";
    }
    let mut byte_start = text.len();
    let mut byte_end = text.len();
    for (count, (byte, _)) in text.char_indices().enumerate() {
        if count == start {
            byte_start = byte;
        }
        if count == end {
            byte_end = byte;
            break;
        }
    }
    if byte_start >= byte_end {
        return "";
    }
    &text[byte_start..byte_end]
}
