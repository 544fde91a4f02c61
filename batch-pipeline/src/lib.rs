pub mod cache;
pub mod fingerprint;
pub mod pipeline;
pub mod rate_limit;
pub mod report;
pub mod retry;

pub use cache::{CacheStats, CachedAnswer, ContentCache};
pub use fingerprint::{fingerprint, Fingerprint};
pub use pipeline::{BatchConfig, BatchPipeline, BatchTuning};
pub use rate_limit::RateLimiter;
pub use report::{aggregate, BatchReport};
pub use retry::{RetryOutcome, RetryPolicy};
