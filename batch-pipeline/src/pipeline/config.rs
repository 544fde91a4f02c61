use common::utils::config::AppConfig;
use tokio::time::Duration;

/// Tunable parameters of the batch pipeline.
#[derive(Debug, Clone)]
pub struct BatchTuning {
    pub max_concurrency: usize,
    pub requests_per_interval: u32,
    pub rate_interval: Duration,
    pub max_retry_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub retry_jitter: bool,
    /// Most recent related exchanges threaded into a follow-up request.
    pub history_limit: usize,
}

impl Default for BatchTuning {
    fn default() -> Self {
        Self {
            max_concurrency: 2,
            requests_per_interval: 10,
            rate_interval: Duration::from_secs(60),
            max_retry_attempts: 3,
            backoff_base: Duration::from_millis(1000),
            backoff_max: Duration::from_secs(30),
            retry_jitter: true,
            history_limit: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub cache_capacity: usize,
    pub cache_ttl: Duration,
    pub context_char_budget: usize,
    /// Whole-batch deadline; pending questions are cancelled when it passes.
    pub deadline: Option<Duration>,
    pub model: String,
    pub tuning: BatchTuning,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 200,
            cache_ttl: Duration::from_secs(7200),
            context_char_budget: 20000,
            deadline: None,
            model: "gpt-4o-mini".into(),
            tuning: BatchTuning::default(),
        }
    }
}

impl BatchConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            cache_capacity: config.cache_capacity,
            cache_ttl: Duration::from_secs(config.cache_ttl_secs),
            context_char_budget: config.context_char_budget,
            deadline: None,
            model: config.generation_model.clone(),
            tuning: BatchTuning {
                max_concurrency: config.max_concurrency,
                requests_per_interval: config.requests_per_interval,
                rate_interval: Duration::from_secs(config.rate_interval_secs),
                max_retry_attempts: config.max_retry_attempts,
                backoff_base: Duration::from_millis(config.backoff_base_ms),
                ..BatchTuning::default()
            },
        }
    }
}
