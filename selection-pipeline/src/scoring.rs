use crate::candidates::CandidateSpan;
use crate::config::SelectionTuning;

const STOP_WORDS: &[&str] = &[
    "the", "and", "that", "this", "with", "from", "have", "has", "was", "were", "are", "is",
    "what", "when", "where", "which", "whose", "about", "does", "how", "why", "who", "did",
    "say", "says", "said", "tell", "into", "for", "not", "you", "your",
];

/// Search terms extracted from a question: lowercased keywords plus any
/// quoted phrases, which are matched verbatim.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuestionTerms {
    pub keywords: Vec<String>,
    pub quotes: Vec<String>,
}

impl QuestionTerms {
    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty() && self.quotes.is_empty()
    }
}

/// Pulls keywords and quoted phrases out of the question text. Capitalized
/// words mid-sentence are kept even when short, since names carry signal.
pub fn extract_terms(question: &str, tuning: &SelectionTuning) -> QuestionTerms {
    let mut quotes = Vec::new();
    let mut remainder = String::with_capacity(question.len());
    let mut in_quote = false;
    let mut current = String::new();

    for c in question.chars() {
        if c == '"' {
            if in_quote {
                let phrase = current.trim().to_lowercase();
                if !phrase.is_empty() {
                    quotes.push(phrase);
                }
                current.clear();
            }
            in_quote = !in_quote;
            continue;
        }
        if in_quote {
            current.push(c);
        } else {
            remainder.push(c);
        }
    }
    // Unterminated quote: treat its content as plain words
    if in_quote {
        remainder.push(' ');
        remainder.push_str(&current);
    }

    let mut keywords = Vec::new();
    let mut first_word = true;
    for word in remainder.split(|c: char| !c.is_alphanumeric() && c != '\'') {
        if word.is_empty() {
            continue;
        }
        let named = !first_word && word.chars().next().is_some_and(char::is_uppercase);
        first_word = false;
        let lower = word.trim_matches('\'').to_lowercase();
        if lower.is_empty() {
            continue;
        }
        let long_enough = lower.chars().count() > tuning.min_keyword_len;
        if (long_enough || named)
            && !STOP_WORDS.contains(&lower.as_str())
            && !keywords.contains(&lower)
        {
            keywords.push(lower);
        }
    }

    QuestionTerms { keywords, quotes }
}

/// Pluggable relevance heuristic over candidate spans. The batch pipeline
/// only depends on this seam, so alternative strategies can be swapped in.
pub trait SpanScorer: Send + Sync {
    fn score(
        &self,
        span: &CandidateSpan,
        terms: &QuestionTerms,
        time_hint_secs: Option<f64>,
        tuning: &SelectionTuning,
    ) -> f64;
}

/// Default scorer: keyword frequency with word boundaries, a bonus per
/// distinct keyword present, a pairwise proximity bonus, a quote-match
/// short-circuit, and an optional time-hint falloff.
#[derive(Debug, Default, Clone, Copy)]
pub struct LexicalProximityScorer;

impl SpanScorer for LexicalProximityScorer {
    fn score(
        &self,
        span: &CandidateSpan,
        terms: &QuestionTerms,
        time_hint_secs: Option<f64>,
        tuning: &SelectionTuning,
    ) -> f64 {
        for quote in &terms.quotes {
            if span.lower.contains(quote.as_str()) {
                return tuning.quote_match_score;
            }
        }

        let mut score = 0.0;
        let mut first_positions: Vec<usize> = Vec::new();

        for keyword in &terms.keywords {
            let occurrences = word_occurrences(&span.lower, keyword);
            if occurrences.is_empty() {
                continue;
            }
            score += occurrences.len() as f64;
            score += tuning.unique_keyword_bonus;
            first_positions.push(occurrences[0]);
        }

        // Distinct keywords landing near each other indicate a focused passage
        for (i, &a) in first_positions.iter().enumerate() {
            for &b in &first_positions[i + 1..] {
                let distance = a.abs_diff(b);
                if distance < tuning.proximity_radius_chars {
                    score +=
                        (tuning.proximity_radius_chars - distance) as f64 / tuning.proximity_divisor;
                }
            }
        }

        if score > 0.0 {
            if let (Some(hint), Some((start_secs, end_secs))) = (time_hint_secs, span.time_range) {
                let mid = (start_secs + end_secs) / 2.0;
                let falloff = 1.0 - ((hint - mid).abs() / tuning.time_hint_radius_secs).min(1.0);
                score += falloff * tuning.time_hint_weight;
            }
        }

        score
    }
}

/// Byte positions of whole-word occurrences of `needle` in `haystack`.
fn word_occurrences(haystack: &str, needle: &str) -> Vec<usize> {
    let mut positions = Vec::new();
    let mut from = 0;
    while let Some(found) = haystack[from..].find(needle) {
        let at = from + found;
        let end = at + needle.len();
        let before_ok = haystack[..at]
            .chars()
            .next_back()
            .is_none_or(|c| !c.is_alphanumeric());
        let after_ok = haystack[end..]
            .chars()
            .next()
            .is_none_or(|c| !c.is_alphanumeric());
        if before_ok && after_ok {
            positions.push(at);
        }
        from = end;
    }
    positions
}
