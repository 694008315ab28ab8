use std::sync::Arc;
use tickerpulse_core::config::PipelineOptions;
use tickerpulse_core::cycle::{Orchestrator, TickerPipeline};
use tickerpulse_core::digest::{DigestGenerator, Summarizer};
use tickerpulse_core::news::content::{ArticleContentFetcher, PageFetcher};
use tickerpulse_core::news::{NewsAggregator, NewsSource};
use tickerpulse_core::notify::{Messenger, NotificationDispatcher};
use tickerpulse_core::sentiment::{SentimentModel, SentimentScorer};
use tickerpulse_core::state::AnalysisStore;

/// External services the pipeline talks to.
pub struct Collaborators {
    pub sources: Vec<Arc<dyn NewsSource>>,
    /// Article page downloads; unused when content fetching is disabled.
    pub pages: Option<Arc<dyn PageFetcher>>,
    pub model: Arc<dyn SentimentModel>,
    pub summarizer: Arc<dyn Summarizer>,
    pub messenger: Arc<dyn Messenger>,
}

pub fn build_orchestrator(
    store: Arc<dyn AnalysisStore>,
    collaborators: Collaborators,
    opts: &PipelineOptions,
) -> Orchestrator {
    let Collaborators {
        sources,
        pages,
        model,
        summarizer,
        messenger,
    } = collaborators;

    tracing::info!(
        sources = sources.len(),
        content_fetch = opts.content.is_some() && pages.is_some(),
        send_limit = opts.dispatch.max_concurrency,
        pool_size = opts.orchestrator.pool_size(),
        interval_secs = opts.cycle_interval.as_secs(),
        "pipeline configured"
    );

    let mut pipeline = TickerPipeline::new(
        NewsAggregator::new(sources, opts.aggregator.clone()),
        SentimentScorer::new(model, opts.scorer.clone()),
        DigestGenerator::new(summarizer, opts.digest.clone()),
        Arc::clone(&store),
        NotificationDispatcher::new(Arc::clone(&store), messenger, opts.dispatch.clone()),
    );
    if let (Some(content), Some(pages)) = (&opts.content, pages) {
        pipeline = pipeline.with_content_fetcher(ArticleContentFetcher::new(pages, content.clone()));
    }
    Orchestrator::new(pipeline, store, opts.orchestrator.clone())
}
