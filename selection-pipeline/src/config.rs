use serde::{Deserialize, Serialize};

/// Tunable parameters that govern candidate construction and scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionTuning {
    /// Candidate window size as a fraction of the char budget (budget / divisor).
    pub section_divisor: usize,
    /// Overlap between fixed windows as a fraction of window size (size / divisor).
    pub overlap_divisor: usize,
    /// Score awarded when a quoted phrase from the question appears verbatim.
    pub quote_match_score: f64,
    /// Multiplier on the count of distinct keywords present in a span.
    pub unique_keyword_bonus: f64,
    /// Two keywords closer than this many chars earn a proximity bonus.
    pub proximity_radius_chars: usize,
    /// Proximity bonus is (radius - distance) / this divisor.
    pub proximity_divisor: f64,
    /// Keywords shorter than or equal to this are discarded.
    pub min_keyword_len: usize,
    /// Look-back/look-ahead distance when snapping to a sentence boundary.
    pub sentence_snap_chars: usize,
    /// Spans scoring at or below this floor trigger the prefix fallback.
    pub score_floor: f64,
    /// Weight of the time-hint proximity signal.
    pub time_hint_weight: f64,
    /// Time-hint falloff radius in seconds.
    pub time_hint_radius_secs: f64,
}

impl Default for SelectionTuning {
    fn default() -> Self {
        Self {
            section_divisor: 4,
            overlap_divisor: 2,
            quote_match_score: 100.0,
            unique_keyword_bonus: 2.0,
            proximity_radius_chars: 100,
            proximity_divisor: 10.0,
            min_keyword_len: 3,
            sentence_snap_chars: 500,
            score_floor: 0.0,
            time_hint_weight: 5.0,
            time_hint_radius_secs: 120.0,
        }
    }
}
