use std::sync::Arc;

use batch_pipeline::{aggregate, BatchConfig, BatchPipeline, ContentCache};
use common::llm::OpenAiGeneration;
use common::types::{BatchJob, Corpus};
use common::utils::config::get_config;
use selection_pipeline::{ContextSelector, LexicalProximityScorer, SelectionTuning};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod sample;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;

    let openai_client = Arc::new(async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ));
    let services = Arc::new(OpenAiGeneration::new(openai_client));

    let pipeline_config = BatchConfig::from_app_config(&config);
    // The cache is owned here and injected, so a second run stays warm
    let cache = Arc::new(ContentCache::new(
        pipeline_config.cache_capacity,
        pipeline_config.cache_ttl,
    ));
    let selector = Arc::new(ContextSelector::with_scorer(
        pipeline_config.context_char_budget,
        SelectionTuning::default(),
        Arc::new(LexicalProximityScorer),
    ));
    let pipeline = BatchPipeline::with_selector(
        services,
        Arc::clone(&cache),
        selector,
        pipeline_config,
    );

    let corpus = Arc::new(Corpus::from_timed_transcript(
        "sample-lecture",
        include_str!("../assets/sample_transcript.txt"),
    )?);
    info!(
        corpus_id = %corpus.id,
        chars = corpus.len_chars(),
        segments = corpus.segments.as_ref().map_or(0, Vec::len),
        "loaded sample transcript"
    );

    let mut job = BatchJob::new(corpus, sample::questions());
    job.derive_relations();

    let results = pipeline.run(job).await?;
    let report = aggregate(results, cache.stats().await);
    info!(
        answered = report.answered,
        failed = report.failed,
        cache_hits = report.cache.hits,
        "batch complete"
    );

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
