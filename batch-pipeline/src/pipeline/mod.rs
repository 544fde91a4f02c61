mod config;
mod state;
#[cfg(test)]
mod tests;

pub use config::{BatchConfig, BatchTuning};

use std::sync::Arc;

use common::error::AppError;
use common::llm::{Exchange, GenerationRequest, GenerationService};
use common::types::{AnswerResult, AnswerState, AnswerTimings, BatchJob, Corpus, Question};
use common::utils::duration_millis;
use futures::Stream;
use selection_pipeline::ContextSelector;
use state_machines::core::GuardError;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::{CachedAnswer, ContentCache};
use crate::fingerprint::fingerprint;
use crate::pipeline::state::pending;
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;

/// Published on a question's watch channel when it reaches a terminal
/// state. `exchange` is present only for answered questions.
#[derive(Debug, Clone)]
struct Completion {
    exchange: Option<Exchange>,
}

type CompletionReceiver = watch::Receiver<Option<Completion>>;

struct WorkerContext {
    services: Arc<dyn GenerationService>,
    cache: Arc<ContentCache>,
    selector: Arc<ContextSelector>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    corpus: Arc<Corpus>,
    model: String,
    history_limit: usize,
}

struct QuestionTask {
    index: usize,
    question: Question,
    deps: Vec<(usize, CompletionReceiver)>,
    done: watch::Sender<Option<Completion>>,
}

/// Orchestrates one batch: bounded concurrency, shared rate limiting and
/// caching, relation ordering, and per-question failure isolation. Results
/// come back in question order regardless of completion order.
pub struct BatchPipeline {
    services: Arc<dyn GenerationService>,
    cache: Arc<ContentCache>,
    selector: Arc<ContextSelector>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    config: BatchConfig,
}

impl BatchPipeline {
    pub fn new(
        services: Arc<dyn GenerationService>,
        cache: Arc<ContentCache>,
        config: BatchConfig,
    ) -> Self {
        let selector = Arc::new(ContextSelector::new(config.context_char_budget));
        Self::with_selector(services, cache, selector, config)
    }

    pub fn with_selector(
        services: Arc<dyn GenerationService>,
        cache: Arc<ContentCache>,
        selector: Arc<ContextSelector>,
        config: BatchConfig,
    ) -> Self {
        let tuning = &config.tuning;
        let limiter = Arc::new(RateLimiter::new(
            tuning.requests_per_interval,
            tuning.rate_interval,
        ));
        let retry = RetryPolicy {
            max_retry_attempts: tuning.max_retry_attempts,
            backoff_base: tuning.backoff_base,
            backoff_max: tuning.backoff_max,
            use_jitter: tuning.retry_jitter,
        };
        Self {
            services,
            cache,
            selector,
            limiter,
            retry,
            config,
        }
    }

    pub async fn run(&self, job: BatchJob) -> Result<Vec<AnswerResult>, AppError> {
        self.run_with_cancellation(job, CancellationToken::new())
            .await
    }

    #[tracing::instrument(
        skip_all,
        fields(corpus_id = %job.corpus.id, questions = job.questions.len())
    )]
    pub async fn run_with_cancellation(
        &self,
        job: BatchJob,
        cancel: CancellationToken,
    ) -> Result<Vec<AnswerResult>, AppError> {
        let (handles, deadline_guard) = self.spawn_workers(job, &cancel)?;

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(handle.await?);
        }
        if let Some(guard) = deadline_guard {
            guard.abort();
        }

        let answered = results.iter().filter(|r| r.is_answered()).count();
        debug!(
            answered,
            failed = results.len() - answered,
            "batch finished"
        );
        Ok(results)
    }

    /// Lazy variant of `run`: yields each result as soon as it and all of
    /// its predecessors are done, still in question order.
    pub fn run_stream(
        &self,
        job: BatchJob,
    ) -> Result<impl Stream<Item = AnswerResult>, AppError> {
        let cancel = CancellationToken::new();
        let (handles, deadline_guard) = self.spawn_workers(job, &cancel)?;
        Ok(async_stream::stream! {
            for (index, handle) in handles.into_iter().enumerate() {
                match handle.await {
                    Ok(result) => yield result,
                    Err(err) => {
                        yield AnswerResult::failed(
                            index,
                            String::new(),
                            Vec::new(),
                            format!("worker task failed: {err}"),
                        );
                    }
                }
            }
            if let Some(guard) = deadline_guard {
                guard.abort();
            }
        })
    }

    fn spawn_workers(
        &self,
        job: BatchJob,
        cancel: &CancellationToken,
    ) -> Result<(Vec<JoinHandle<AnswerResult>>, Option<JoinHandle<()>>), AppError> {
        job.validate()?;

        let deadline_guard = self.config.deadline.map(|deadline| {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                warn!(
                    deadline_ms = duration_millis(deadline),
                    "batch deadline passed, cancelling pending questions"
                );
                cancel.cancel();
            })
        });

        let ctx = Arc::new(WorkerContext {
            services: Arc::clone(&self.services),
            cache: Arc::clone(&self.cache),
            selector: Arc::clone(&self.selector),
            limiter: Arc::clone(&self.limiter),
            retry: self.retry.clone(),
            semaphore: Arc::new(Semaphore::new(self.config.tuning.max_concurrency.max(1))),
            cancel: cancel.clone(),
            corpus: Arc::clone(&job.corpus),
            model: self.config.model.clone(),
            history_limit: self.config.tuning.history_limit,
        });

        let channels: Vec<_> = (0..job.questions.len())
            .map(|_| watch::channel(None))
            .collect();
        let receivers: Vec<CompletionReceiver> =
            channels.iter().map(|(_, rx)| rx.clone()).collect();

        let mut handles = Vec::with_capacity(job.questions.len());
        for ((index, question), (done, _)) in
            job.questions.into_iter().enumerate().zip(channels)
        {
            let deps = question
                .related
                .iter()
                .filter_map(|&dep| receivers.get(dep).map(|rx| (dep, rx.clone())))
                .collect();
            let task = QuestionTask {
                index,
                question,
                deps,
                done,
            };
            handles.push(tokio::spawn(process_question(Arc::clone(&ctx), task)));
        }
        Ok((handles, deadline_guard))
    }
}

async fn process_question(ctx: Arc<WorkerContext>, task: QuestionTask) -> AnswerResult {
    let QuestionTask {
        index,
        question,
        deps,
        done,
    } = task;
    let question_text = question.text.clone();
    let related = question.related.clone();

    let result = match drive_question(&ctx, index, question, deps).await {
        Ok(result) => result,
        Err(AppError::Cancelled(reason)) => {
            debug!(index, "question cancelled");
            AnswerResult::cancelled(index, question_text, related, reason)
        }
        Err(err) => {
            warn!(index, error = %err, "question failed");
            AnswerResult::failed(index, question_text, related, err.to_string())
        }
    };

    let exchange = result.answer.clone().map(|answer| Exchange {
        question: result.question.clone(),
        answer,
    });
    done.send_replace(Some(Completion { exchange }));
    result
}

async fn drive_question(
    ctx: &WorkerContext,
    index: usize,
    question: Question,
    deps: Vec<(usize, CompletionReceiver)>,
) -> Result<AnswerResult, AppError> {
    let total_started = Instant::now();
    let machine = pending();

    // Predecessors are awaited before the permit so a held permit can never
    // block the question it depends on.
    let mut history = Vec::new();
    for (dep_index, mut rx) in deps {
        let completion = tokio::select! {
            () = ctx.cancel.cancelled() => {
                return Err(AppError::Cancelled("batch cancelled".into()));
            }
            changed = rx.wait_for(|value| value.is_some()) => changed
                .map_err(|_| {
                    AppError::InternalError(format!(
                        "question {dep_index} finished without publishing a completion"
                    ))
                })?
                .clone(),
        };
        match completion.and_then(|c| c.exchange) {
            Some(exchange) => history.push(exchange),
            None => {
                debug!(
                    index,
                    dep = dep_index,
                    "related question produced no answer, continuing without it"
                );
            }
        }
    }
    if history.len() > ctx.history_limit {
        history.drain(..history.len() - ctx.history_limit);
    }

    let _permit = tokio::select! {
        () = ctx.cancel.cancelled() => {
            return Err(AppError::Cancelled("batch cancelled".into()));
        }
        permit = Arc::clone(&ctx.semaphore).acquire_owned() => permit
            .map_err(|_| AppError::InternalError("worker pool closed".into()))?,
    };

    let selection = ctx.selector.select(&ctx.corpus, &question)?;
    let machine = machine
        .select()
        .map_err(|(_, guard)| map_guard_error("select", &guard))?;

    let window = selection.window;
    let key = fingerprint(
        &ctx.corpus.id,
        &question.text,
        window.bounds(),
        &question.related,
    );
    let request = GenerationRequest {
        context: window.clone(),
        question: question.text.clone(),
        history,
        model: ctx.model.clone(),
    };

    let outcome = ctx
        .cache
        .get_or_compute(key.as_str(), || async {
            let call_started = Instant::now();
            let outcome = ctx
                .retry
                .execute(&ctx.limiter, &ctx.cancel, || ctx.services.generate(&request))
                .await?;
            Ok(CachedAnswer {
                answer: outcome.value.answer,
                model: outcome.value.model,
                call_ms: duration_millis(call_started.elapsed()),
                attempts: outcome.attempts,
            })
        })
        .await;

    match outcome {
        Ok((cached, cache_hit)) => {
            if cache_hit {
                machine
                    .hit()
                    .map_err(|(_, guard)| map_guard_error("hit", &guard))?;
            } else {
                let machine = machine
                    .request()
                    .map_err(|(_, guard)| map_guard_error("request", &guard))?;
                if cached.attempts > 1 {
                    machine
                        .retry()
                        .map_err(|(_, guard)| map_guard_error("retry", &guard))?
                        .resolve()
                        .map_err(|(_, guard)| map_guard_error("resolve", &guard))?;
                } else {
                    machine
                        .resolve()
                        .map_err(|(_, guard)| map_guard_error("resolve", &guard))?;
                }
            }

            Ok(AnswerResult {
                index,
                question: question.text,
                state: AnswerState::Answered,
                answer: Some(cached.answer),
                context: Some(window),
                related: question.related,
                cache_hit,
                timings: AnswerTimings {
                    selection_ms: selection.selection_ms,
                    call_ms: if cache_hit { 0 } else { cached.call_ms },
                    total_ms: duration_millis(total_started.elapsed()),
                },
                model: Some(cached.model),
                attempts: if cache_hit { 0 } else { cached.attempts },
                error: None,
            })
        }
        Err(err) => {
            let machine = machine
                .request()
                .map_err(|(_, guard)| map_guard_error("request", &guard))?;
            if matches!(err, AppError::Cancelled(_)) {
                machine
                    .cancel()
                    .map_err(|(_, guard)| map_guard_error("cancel", &guard))?;
            } else {
                machine
                    .fail()
                    .map_err(|(_, guard)| map_guard_error("fail", &guard))?;
            }
            Err(err)
        }
    }
}

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::InternalError(format!(
        "invalid question lifecycle transition during {event}: {guard:?}"
    ))
}
