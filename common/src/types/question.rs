use serde::{Deserialize, Serialize};

/// A single question in a batch. `related` lists indices of earlier batch
/// entries whose answers should be threaded into this question's request as
/// conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_hint_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related: Vec<usize>,
}

impl Question {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            time_hint_secs: None,
            related: Vec::new(),
        }
    }

    pub fn with_time_hint(mut self, secs: f64) -> Self {
        self.time_hint_secs = Some(secs);
        self
    }

    pub fn with_related(mut self, related: Vec<usize>) -> Self {
        self.related = related;
        self
    }
}
