use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Rate limited: {0}")]
    RateLimited(String),
    #[error("Transient API error: {0}")]
    TransientApi(String),
    #[error("Permanent API error: {0}")]
    PermanentApi(String),
    #[error("Retries exhausted after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<AppError>,
    },
    #[error("Cancelled: {0}")]
    Cancelled(String),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

/// Retry classification of a failed generation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    RateLimited,
    Transient,
    Permanent,
}

impl AppError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            AppError::RateLimited(_) => FailureKind::RateLimited,
            AppError::TransientApi(_) => FailureKind::Transient,
            AppError::OpenAI(err) => classify_openai(err),
            _ => FailureKind::Permanent,
        }
    }
}

/// Resolves a loosely-typed API failure into an explicit retry class at the
/// service boundary. Unknown error shapes default to `Permanent`.
pub fn classify_openai(err: &OpenAIError) -> FailureKind {
    match err {
        OpenAIError::ApiError(api) => {
            let kind = api.r#type.as_deref().unwrap_or_default();
            let code = api
                .code
                .as_ref()
                .map(|code| code.to_string())
                .unwrap_or_default();

            if kind.contains("rate_limit")
                || kind.contains("quota")
                || code.contains("rate_limit")
                || code.contains("insufficient_quota")
            {
                FailureKind::RateLimited
            } else if kind.contains("server_error")
                || kind.contains("overloaded")
                || code.contains("server_error")
            {
                FailureKind::Transient
            } else {
                FailureKind::Permanent
            }
        }
        // Network-level failures and half-parsed responses are worth another attempt
        OpenAIError::Reqwest(_) | OpenAIError::JSONDeserialize(_) => FailureKind::Transient,
        _ => FailureKind::Permanent,
    }
}
