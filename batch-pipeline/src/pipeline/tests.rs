use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use common::error::AppError;
use common::llm::{GenerationRequest, GenerationResponse, GenerationService};
use common::types::{AnswerState, BatchJob, Corpus, Question};
use common::utils::duration_millis;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

use super::{BatchConfig, BatchPipeline, BatchTuning};
use crate::cache::ContentCache;

struct MockGeneration {
    default_delay: Duration,
    delays: HashMap<String, Duration>,
    permanent_failures: Vec<String>,
    transient_failures: AtomicU32,
    requests: Mutex<Vec<GenerationRequest>>,
    concurrent: AtomicUsize,
    max_concurrent: AtomicUsize,
}

impl MockGeneration {
    fn new() -> Self {
        Self {
            default_delay: Duration::from_millis(10),
            delays: HashMap::new(),
            permanent_failures: Vec::new(),
            transient_failures: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
            concurrent: AtomicUsize::new(0),
            max_concurrent: AtomicUsize::new(0),
        }
    }

    fn delay_for(mut self, question: &str, delay: Duration) -> Self {
        self.delays.insert(question.to_owned(), delay);
        self
    }

    fn failing(mut self, question: &str) -> Self {
        self.permanent_failures.push(question.to_owned());
        self
    }

    fn transient(self, failures: u32) -> Self {
        self.transient_failures.store(failures, Ordering::SeqCst);
        self
    }

    async fn call_count(&self) -> usize {
        self.requests.lock().await.len()
    }

    async fn request_for(&self, question: &str) -> Option<GenerationRequest> {
        self.requests
            .lock()
            .await
            .iter()
            .find(|r| r.question == question)
            .cloned()
    }
}

#[async_trait]
impl GenerationService for MockGeneration {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, AppError> {
        let live = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(live, Ordering::SeqCst);
        self.requests.lock().await.push(request.clone());

        let delay = self
            .delays
            .get(&request.question)
            .copied()
            .unwrap_or(self.default_delay);
        sleep(delay).await;
        self.concurrent.fetch_sub(1, Ordering::SeqCst);

        if self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(AppError::TransientApi("mock transient failure".into()));
        }
        if self.permanent_failures.contains(&request.question) {
            return Err(AppError::PermanentApi("mock permanent failure".into()));
        }

        Ok(GenerationResponse {
            answer: format!("answer to: {}", request.question),
            model: "mock-model".into(),
            prompt_tokens: Some(100),
            completion_tokens: Some(20),
            latency_ms: duration_millis(delay),
        })
    }
}

fn test_tuning(max_concurrency: usize) -> BatchTuning {
    BatchTuning {
        max_concurrency,
        requests_per_interval: u32::MAX,
        rate_interval: Duration::from_secs(1),
        max_retry_attempts: 3,
        backoff_base: Duration::from_millis(10),
        backoff_max: Duration::from_secs(1),
        retry_jitter: false,
        history_limit: 5,
    }
}

fn test_pipeline(
    services: Arc<MockGeneration>,
    tuning: BatchTuning,
) -> (BatchPipeline, Arc<ContentCache>) {
    let config = BatchConfig {
        cache_capacity: 200,
        cache_ttl: Duration::from_secs(7200),
        context_char_budget: 20000,
        deadline: None,
        model: "mock-model".into(),
        tuning,
    };
    let cache = Arc::new(ContentCache::new(config.cache_capacity, config.cache_ttl));
    let pipeline = BatchPipeline::new(services, Arc::clone(&cache), config);
    (pipeline, cache)
}

fn sample_corpus() -> Arc<Corpus> {
    let mut text = String::new();
    text.push_str("Welcome to this lecture on the history of computing. ");
    while text.chars().count() < 3000 {
        text.push_str("The lecture covers many topics in considerable detail. ");
    }
    text.push_str("The term artificial intelligence was coined by John McCarthy in 1956. ");
    while text.chars().count() < 6000 {
        text.push_str("Further sections discuss hardware, software, and networks. ");
    }
    text.push_str("Neural networks returned to prominence decades later. ");
    Arc::new(Corpus::with_id("lecture-1", text))
}

fn batch(corpus: &Arc<Corpus>, questions: Vec<Question>) -> BatchJob {
    BatchJob::new(Arc::clone(corpus), questions)
}

fn simple_questions(texts: &[&str]) -> Vec<Question> {
    texts.iter().map(|t| Question::new(*t)).collect()
}

#[tokio::test(start_paused = true)]
async fn results_come_back_in_question_order() {
    let services = Arc::new(
        MockGeneration::new()
            .delay_for("First question?", Duration::from_millis(100))
            .delay_for("Second question?", Duration::from_millis(10)),
    );
    let (pipeline, _cache) = test_pipeline(Arc::clone(&services), test_tuning(3));

    let job = batch(
        &sample_corpus(),
        simple_questions(&["First question?", "Second question?", "Third question?"]),
    );
    let results = pipeline.run(job).await.unwrap();

    assert_eq!(results.len(), 3);
    for (i, result) in results.iter().enumerate() {
        assert_eq!(result.index, i);
        assert_eq!(result.state, AnswerState::Answered);
    }
    assert_eq!(
        results[1].answer.as_deref(),
        Some("answer to: Second question?")
    );
}

#[tokio::test(start_paused = true)]
async fn concurrency_never_exceeds_the_limit() {
    let services = Arc::new(MockGeneration::new());
    let (pipeline, _cache) = test_pipeline(Arc::clone(&services), test_tuning(2));

    let job = batch(
        &sample_corpus(),
        simple_questions(&["q0?", "q1?", "q2?", "q3?", "q4?", "q5?"]),
    );
    let results = pipeline.run(job).await.unwrap();

    assert!(results.iter().all(|r| r.state == AnswerState::Answered));
    assert_eq!(services.max_concurrent.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn failed_question_does_not_poison_the_batch() {
    let services = Arc::new(MockGeneration::new().failing("Broken question?"));
    let (pipeline, _cache) = test_pipeline(Arc::clone(&services), test_tuning(2));

    let job = batch(
        &sample_corpus(),
        simple_questions(&["Fine question?", "Broken question?", "Another fine question?"]),
    );
    let results = pipeline.run(job).await.unwrap();

    assert_eq!(results[0].state, AnswerState::Answered);
    assert_eq!(results[1].state, AnswerState::Failed);
    assert!(results[1].answer.is_none());
    assert!(results[1]
        .error
        .as_deref()
        .is_some_and(|e| e.contains("mock permanent failure")));
    assert_eq!(results[2].state, AnswerState::Answered);
}

#[tokio::test(start_paused = true)]
async fn second_run_is_served_from_the_cache() {
    let services = Arc::new(MockGeneration::new());
    let (pipeline, cache) = test_pipeline(Arc::clone(&services), test_tuning(2));
    let corpus = sample_corpus();
    let questions = &["Who coined artificial intelligence?", "What about neural networks?"];

    let cold = pipeline
        .run(batch(&corpus, simple_questions(questions)))
        .await
        .unwrap();
    assert!(cold.iter().all(|r| !r.cache_hit));
    assert_eq!(services.call_count().await, 2);

    let warm = pipeline
        .run(batch(&corpus, simple_questions(questions)))
        .await
        .unwrap();
    assert!(warm.iter().all(|r| r.cache_hit));
    assert!(warm.iter().all(|r| r.state == AnswerState::Answered));
    // no further upstream calls
    assert_eq!(services.call_count().await, 2);
    assert_eq!(
        cold[0].answer, warm[0].answer,
        "cached answer matches the original"
    );

    let stats = cache.stats().await;
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.misses, 2);
}

#[tokio::test(start_paused = true)]
async fn duplicate_questions_share_one_upstream_call() {
    let services = Arc::new(MockGeneration::new().delay_for("Same question?", Duration::from_millis(50)));
    let (pipeline, _cache) = test_pipeline(Arc::clone(&services), test_tuning(2));

    let job = batch(
        &sample_corpus(),
        simple_questions(&["Same question?", "Same question?"]),
    );
    let results = pipeline.run(job).await.unwrap();

    assert_eq!(services.call_count().await, 1);
    assert_eq!(results[0].answer, results[1].answer);
    assert!(results.iter().all(|r| r.state == AnswerState::Answered));
}

#[tokio::test(start_paused = true)]
async fn related_question_receives_predecessor_history() {
    let services = Arc::new(MockGeneration::new());
    let (pipeline, _cache) = test_pipeline(Arc::clone(&services), test_tuning(2));

    let questions = vec![
        Question::new("What was coined in 1956?"),
        Question::new("Who coined it?").with_related(vec![0]),
    ];
    let results = pipeline.run(batch(&sample_corpus(), questions)).await.unwrap();

    assert!(results.iter().all(|r| r.state == AnswerState::Answered));
    let follow_up = services.request_for("Who coined it?").await.expect("recorded");
    assert_eq!(follow_up.history.len(), 1);
    assert_eq!(follow_up.history[0].question, "What was coined in 1956?");
    assert_eq!(
        follow_up.history[0].answer,
        "answer to: What was coined in 1956?"
    );
}

#[tokio::test(start_paused = true)]
async fn dependent_of_a_failed_question_still_runs() {
    let services = Arc::new(MockGeneration::new().failing("Doomed question?"));
    let (pipeline, _cache) = test_pipeline(Arc::clone(&services), test_tuning(2));

    let questions = vec![
        Question::new("Doomed question?"),
        Question::new("Dependent question?").with_related(vec![0]),
    ];
    let results = pipeline.run(batch(&sample_corpus(), questions)).await.unwrap();

    assert_eq!(results[0].state, AnswerState::Failed);
    assert_eq!(results[1].state, AnswerState::Answered);
    let dependent = services
        .request_for("Dependent question?")
        .await
        .expect("recorded");
    assert!(dependent.history.is_empty());
}

#[tokio::test]
async fn relation_cycle_is_rejected_before_any_work() {
    let services = Arc::new(MockGeneration::new());
    let (pipeline, _cache) = test_pipeline(Arc::clone(&services), test_tuning(2));

    let questions = vec![
        Question::new("First of a cycle?").with_related(vec![1]),
        Question::new("Second of a cycle?").with_related(vec![0]),
    ];
    let err = pipeline
        .run(batch(&sample_corpus(), questions))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Validation(_)));
    assert_eq!(services.call_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn deadline_cancels_pending_questions() {
    // the one in-flight call outlasts the deadline
    let services = Arc::new(
        MockGeneration::new().delay_for("Slow question?", Duration::from_millis(500)),
    );
    let config = BatchConfig {
        deadline: Some(Duration::from_millis(50)),
        model: "mock-model".into(),
        tuning: test_tuning(1),
        ..BatchConfig::default()
    };
    let cache = Arc::new(ContentCache::new(config.cache_capacity, config.cache_ttl));
    let pipeline = BatchPipeline::new(
        Arc::clone(&services) as Arc<dyn GenerationService>,
        cache,
        config,
    );

    let results = pipeline
        .run(batch(
            &sample_corpus(),
            simple_questions(&[
                "Slow question?",
                "Never scheduled?",
                "Also never scheduled?",
            ]),
        ))
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.state == AnswerState::Cancelled));
    assert!(services.call_count().await <= 1);
}

#[tokio::test]
async fn pre_cancelled_token_cancels_everything() {
    let services = Arc::new(MockGeneration::new());
    let (pipeline, _cache) = test_pipeline(Arc::clone(&services), test_tuning(2));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let results = pipeline
        .run_with_cancellation(
            batch(&sample_corpus(), simple_questions(&["q0?", "q1?"])),
            cancel,
        )
        .await
        .unwrap();

    assert!(results.iter().all(|r| r.state == AnswerState::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried_and_counted() {
    let services = Arc::new(MockGeneration::new().transient(2));
    let (pipeline, _cache) = test_pipeline(Arc::clone(&services), test_tuning(1));

    let results = pipeline
        .run(batch(&sample_corpus(), simple_questions(&["Flaky question?"])))
        .await
        .unwrap();

    assert_eq!(results[0].state, AnswerState::Answered);
    assert_eq!(results[0].attempts, 3);
    assert_eq!(services.call_count().await, 3);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_mark_the_question_failed() {
    let services = Arc::new(MockGeneration::new().transient(100));
    let mut tuning = test_tuning(1);
    tuning.max_retry_attempts = 1;
    let (pipeline, _cache) = test_pipeline(Arc::clone(&services), tuning);

    let results = pipeline
        .run(batch(&sample_corpus(), simple_questions(&["Hopeless question?"])))
        .await
        .unwrap();

    assert_eq!(results[0].state, AnswerState::Failed);
    assert!(results[0]
        .error
        .as_deref()
        .is_some_and(|e| e.contains("2 attempts")));
    assert_eq!(services.call_count().await, 2);
}

#[tokio::test(start_paused = true)]
async fn run_stream_yields_results_in_question_order() {
    let services = Arc::new(
        MockGeneration::new().delay_for("First question?", Duration::from_millis(100)),
    );
    let (pipeline, _cache) = test_pipeline(Arc::clone(&services), test_tuning(2));

    let stream = pipeline
        .run_stream(batch(
            &sample_corpus(),
            simple_questions(&["First question?", "Second question?"]),
        ))
        .unwrap();
    let results: Vec<_> = stream.collect().await;

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].index, 0);
    assert_eq!(results[1].index, 1);
    assert!(results.iter().all(|r| r.state == AnswerState::Answered));
}

#[tokio::test(start_paused = true)]
async fn answered_results_carry_context_and_metadata() {
    let services = Arc::new(MockGeneration::new());
    let (pipeline, _cache) = test_pipeline(Arc::clone(&services), test_tuning(1));

    let results = pipeline
        .run(batch(
            &sample_corpus(),
            simple_questions(&["Who coined artificial intelligence?"]),
        ))
        .await
        .unwrap();

    let result = &results[0];
    let context = result.context.as_ref().expect("context window");
    assert!(context.text.contains("McCarthy"));
    assert!(context.char_len() <= 20000);
    assert_eq!(result.model.as_deref(), Some("mock-model"));
    assert_eq!(result.attempts, 1);
    assert!(!result.cache_hit);
}
