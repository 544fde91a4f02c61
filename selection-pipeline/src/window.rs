use common::types::{ContextWindow, Corpus, WindowSpan};

use crate::candidates::{slice_chars, CandidateSpan};
use crate::config::SelectionTuning;

/// A candidate with its relevance score attached.
#[derive(Debug, Clone)]
pub struct ScoredSpan {
    pub span: CandidateSpan,
    pub score: f64,
}

/// Assembles the context window from scored candidates. Best-scoring spans
/// are taken greedily under the char budget, merged when contiguous, and
/// ordered by corpus position. Falls back to a corpus prefix when nothing
/// scores above the floor. Never exceeds the budget and never errors: an
/// oversized selection is cut and flagged instead.
pub fn assemble_window(
    corpus: &Corpus,
    mut scored: Vec<ScoredSpan>,
    char_budget: usize,
    tuning: &SelectionTuning,
) -> ContextWindow {
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.span.start.cmp(&b.span.start))
    });

    let best = scored.first().map_or(f64::MIN, |s| s.score);
    if best <= tuning.score_floor {
        return prefix_fallback(corpus, char_budget, tuning);
    }

    let mut selected: Vec<CandidateSpan> = Vec::new();
    let mut total = 0usize;
    let mut truncated = false;

    for candidate in scored {
        if candidate.score <= tuning.score_floor {
            break;
        }
        let separator = usize::from(!selected.is_empty());
        if total + separator + candidate.span.len() > char_budget {
            if selected.is_empty() {
                // Single best span larger than the whole budget: cut it down
                let mut span = candidate.span;
                span.end = snap_end(&corpus.text, span.start, span.start + char_budget, tuning);
                truncated = true;
                selected.push(span);
                break;
            }
            continue;
        }
        total += separator + candidate.span.len();
        selected.push(candidate.span);
    }

    let timestamp_secs = selected
        .iter()
        .filter_map(|span| span.time_range.map(|(start, _)| start))
        .min_by(f64::total_cmp);

    selected.sort_by_key(|span| span.start);
    let mut merged: Vec<WindowSpan> = Vec::new();
    for span in &selected {
        match merged.last_mut() {
            // Adjacent spans are one char apart (the segment join newline)
            Some(last) if span.start <= last.end + 1 => {
                last.end = last.end.max(span.end);
            }
            _ => merged.push(WindowSpan {
                start: span.start,
                end: span.end,
            }),
        }
    }

    let mut text = merged
        .iter()
        .map(|span| slice_chars(&corpus.text, span.start, span.end))
        .collect::<Vec<_>>()
        .join("\n");

    // Merging is length-reducing, but guard the invariant regardless
    if text.chars().count() > char_budget {
        text = text.chars().take(char_budget).collect();
        if let Some(last) = merged.last_mut() {
            last.end = last.end.min(last.start + char_budget);
        }
        truncated = true;
    }

    ContextWindow {
        spans: merged,
        text,
        truncated,
        fallback: false,
        timestamp_secs,
    }
}

/// Whole corpus as a single window, used when the text fits the budget.
pub fn whole_corpus_window(corpus: &Corpus) -> ContextWindow {
    ContextWindow {
        spans: vec![WindowSpan {
            start: 0,
            end: corpus.len_chars(),
        }],
        text: corpus.text.clone(),
        truncated: false,
        fallback: false,
        timestamp_secs: first_segment_start(corpus),
    }
}

fn first_segment_start(corpus: &Corpus) -> Option<f64> {
    corpus
        .segments
        .as_ref()
        .and_then(|segments| segments.first())
        .map(|segment| segment.start_secs)
}

fn prefix_fallback(corpus: &Corpus, char_budget: usize, tuning: &SelectionTuning) -> ContextWindow {
    let total = corpus.len_chars();
    let end = snap_end(&corpus.text, 0, char_budget.min(total), tuning);
    ContextWindow {
        spans: vec![WindowSpan { start: 0, end }],
        text: slice_chars(&corpus.text, 0, end).to_owned(),
        truncated: end < total,
        fallback: true,
        timestamp_secs: first_segment_start(corpus),
    }
}

/// Pulls a cut point back to the nearest sentence end within the snap
/// distance, so trimmed windows do not stop mid-sentence.
fn snap_end(text: &str, start: usize, end: usize, tuning: &SelectionTuning) -> usize {
    let slice: Vec<char> = slice_chars(text, start, end).chars().collect();
    if slice.len() < end.saturating_sub(start) {
        // end was past the text; nothing to snap
        return start + slice.len();
    }
    let lookback = tuning.sentence_snap_chars.min(slice.len());
    for back in 0..lookback {
        let i = slice.len() - 1 - back;
        if matches!(slice.get(i), Some('.' | '!' | '?')) {
            return start + i + 1;
        }
    }
    end
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidates::build_candidates;
    use crate::config::SelectionTuning;
    use crate::scoring::{extract_terms, LexicalProximityScorer, SpanScorer};

    fn score_all(corpus: &Corpus, question: &str, budget: usize) -> Vec<ScoredSpan> {
        let tuning = SelectionTuning::default();
        let terms = extract_terms(question, &tuning);
        build_candidates(corpus, budget, &tuning)
            .into_iter()
            .map(|span| {
                let score = LexicalProximityScorer.score(&span, &terms, None, &tuning);
                ScoredSpan { span, score }
            })
            .collect()
    }

    fn long_corpus() -> Corpus {
        let mut text = "Unrelated filler sentence about gardening. ".repeat(100);
        text.push_str("The term artificial intelligence was coined by John McCarthy in 1956. ");
        text.push_str(&"More filler about cooking and travel. ".repeat(100));
        Corpus::with_id("long", text)
    }

    #[test]
    fn window_never_exceeds_budget() {
        let corpus = long_corpus();
        let budget = 800;
        let scored = score_all(&corpus, "Who coined the term artificial intelligence?", budget);
        let window = assemble_window(&corpus, scored, budget, &SelectionTuning::default());
        assert!(window.char_len() <= budget);
        assert!(!window.fallback);
        assert!(window.text.contains("McCarthy"));
    }

    #[test]
    fn selection_is_deterministic() {
        let corpus = long_corpus();
        let question = "Who coined the term artificial intelligence?";
        let first = assemble_window(
            &corpus,
            score_all(&corpus, question, 800),
            800,
            &SelectionTuning::default(),
        );
        let second = assemble_window(
            &corpus,
            score_all(&corpus, question, 800),
            800,
            &SelectionTuning::default(),
        );
        assert_eq!(first, second);
    }

    #[test]
    fn unmatched_question_falls_back_to_prefix() {
        let corpus = long_corpus();
        let scored = score_all(&corpus, "zzz qqq xyzzy?", 600);
        let window = assemble_window(&corpus, scored, 600, &SelectionTuning::default());
        assert!(window.fallback);
        assert!(window.truncated);
        assert!(window.char_len() <= 600);
        assert_eq!(window.spans[0].start, 0);
        // prefix ends on a sentence boundary
        assert!(window.text.ends_with('.'));
    }

    #[test]
    fn whole_corpus_window_carries_the_first_segment_timestamp() {
        use common::types::Segment;

        let corpus = Corpus::from_segments(
            "timed",
            vec![
                Segment {
                    start_secs: 5.0,
                    end_secs: 30.0,
                    text: "The opening remarks cover the agenda.".into(),
                },
                Segment {
                    start_secs: 30.0,
                    end_secs: 60.0,
                    text: "The main topic is introduced.".into(),
                },
            ],
        );
        let window = whole_corpus_window(&corpus);
        assert_eq!(window.timestamp_secs, Some(5.0));
        assert_eq!(window.text, corpus.text);
    }

    #[test]
    fn spans_are_ordered_and_merged() {
        let corpus = long_corpus();
        let scored = score_all(&corpus, "Who coined the term artificial intelligence?", 2000);
        let window = assemble_window(&corpus, scored, 2000, &SelectionTuning::default());
        for pair in window.spans.windows(2) {
            assert!(pair[0].end < pair[1].start);
        }
    }
}
