pub mod candidates;
pub mod config;
pub mod scoring;
pub mod window;

use std::sync::Arc;
use std::time::Instant;

use common::error::AppError;
use common::types::{ContextWindow, Corpus, Question};
use common::utils::duration_millis;
use tracing::instrument;

pub use config::SelectionTuning;
pub use scoring::{LexicalProximityScorer, QuestionTerms, SpanScorer};

use crate::candidates::build_candidates;
use crate::scoring::extract_terms;
use crate::window::{assemble_window, whole_corpus_window, ScoredSpan};

/// Selected window plus how long selection took.
#[derive(Debug, Clone)]
pub struct SelectionOutput {
    pub window: ContextWindow,
    pub selection_ms: u64,
}

/// Deterministic, synchronous context selection: candidate spans are scored
/// by a pluggable `SpanScorer` and assembled into a window under the char
/// budget.
pub struct ContextSelector {
    char_budget: usize,
    tuning: SelectionTuning,
    scorer: Arc<dyn SpanScorer>,
}

impl ContextSelector {
    pub fn new(char_budget: usize) -> Self {
        Self::with_scorer(
            char_budget,
            SelectionTuning::default(),
            Arc::new(LexicalProximityScorer),
        )
    }

    pub fn with_scorer(
        char_budget: usize,
        tuning: SelectionTuning,
        scorer: Arc<dyn SpanScorer>,
    ) -> Self {
        Self {
            char_budget,
            tuning,
            scorer,
        }
    }

    pub const fn char_budget(&self) -> usize {
        self.char_budget
    }

    #[instrument(skip_all, fields(corpus_id = %corpus.id, corpus_chars = corpus.len_chars()))]
    pub fn select(
        &self,
        corpus: &Corpus,
        question: &Question,
    ) -> Result<SelectionOutput, AppError> {
        if question.text.trim().is_empty() {
            return Err(AppError::Validation("question text is empty".into()));
        }
        if corpus.text.trim().is_empty() {
            return Err(AppError::Validation("corpus text is empty".into()));
        }

        let started = Instant::now();
        let window = if corpus.len_chars() <= self.char_budget {
            whole_corpus_window(corpus)
        } else {
            let terms = extract_terms(&question.text, &self.tuning);
            let scored = build_candidates(corpus, self.char_budget, &self.tuning)
                .into_iter()
                .map(|span| {
                    let score =
                        self.scorer
                            .score(&span, &terms, question.time_hint_secs, &self.tuning);
                    ScoredSpan { span, score }
                })
                .collect();
            assemble_window(corpus, scored, self.char_budget, &self.tuning)
        };

        tracing::debug!(
            window_chars = window.char_len(),
            spans = window.spans.len(),
            truncated = window.truncated,
            fallback = window.fallback,
            "context window selected"
        );

        Ok(SelectionOutput {
            window,
            selection_ms: duration_millis(started.elapsed()),
        })
    }
}
