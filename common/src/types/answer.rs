use serde::{Deserialize, Serialize};

/// Terminal outcome of one question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerState {
    Answered,
    Failed,
    Cancelled,
}

/// A contiguous region of the corpus, in char offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSpan {
    pub start: usize,
    pub end: usize,
}

impl WindowSpan {
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// The slice of corpus handed to the model for one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextWindow {
    pub spans: Vec<WindowSpan>,
    pub text: String,
    /// Set when the selected text had to be cut to fit the char budget.
    pub truncated: bool,
    /// Set when no span scored above the floor and a corpus prefix was used.
    pub fallback: bool,
    /// Approximate timestamp of the window when the corpus is time-coded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_secs: Option<f64>,
}

impl ContextWindow {
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    /// Outermost char bounds across all spans, for fingerprinting.
    pub fn bounds(&self) -> (usize, usize) {
        let start = self.spans.iter().map(|s| s.start).min().unwrap_or(0);
        let end = self.spans.iter().map(|s| s.end).max().unwrap_or(0);
        (start, end)
    }
}

/// Wall-clock breakdown for one question, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerTimings {
    pub selection_ms: u64,
    pub call_ms: u64,
    pub total_ms: u64,
}

/// Per-question record emitted by the batch pipeline, at the question's
/// original index regardless of completion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerResult {
    pub index: usize,
    pub question: String,
    pub state: AnswerState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ContextWindow>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related: Vec<usize>,
    pub cache_hit: bool,
    pub timings: AnswerTimings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AnswerResult {
    pub fn is_answered(&self) -> bool {
        self.state == AnswerState::Answered
    }

    pub fn failed(index: usize, question: String, related: Vec<usize>, error: String) -> Self {
        Self {
            index,
            question,
            state: AnswerState::Failed,
            answer: None,
            context: None,
            related,
            cache_hit: false,
            timings: AnswerTimings::default(),
            model: None,
            attempts: 0,
            error: Some(error),
        }
    }

    pub fn cancelled(index: usize, question: String, related: Vec<usize>, reason: String) -> Self {
        Self {
            error: Some(reason),
            state: AnswerState::Cancelled,
            ..Self::failed(index, question, related, String::new())
        }
    }
}
