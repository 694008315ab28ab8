use crate::cycle::lease::CycleLease;
use crate::digest::DigestGenerator;
use crate::domain::analysis::{AnalysisResult, Decision, SentimentLabel};
use crate::domain::security::Security;
use crate::news::content::ArticleContentFetcher;
use crate::news::NewsAggregator;
use crate::notify::{DispatchReport, NotificationDispatcher};
use crate::sentiment::SentimentScorer;
use crate::state::AnalysisStore;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::Instrument;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub max_concurrency: usize,
    /// Most restrictive concurrent-request limit among collaborators, if any.
    pub rate_limit: Option<usize>,
    pub ticker_timeout: Duration,
    pub commit_timeout: Duration,
    pub list_timeout: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            rate_limit: None,
            ticker_timeout: Duration::from_secs(300),
            commit_timeout: Duration::from_secs(10),
            list_timeout: Duration::from_secs(30),
        }
    }
}

impl OrchestratorOptions {
    pub fn pool_size(&self) -> usize {
        let cap = match self.rate_limit {
            Some(limit) => self.max_concurrency.min(limit),
            None => self.max_concurrency,
        };
        cap.max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TickerOutcome {
    Succeeded {
        label: SentimentLabel,
        score: f64,
        notifications: DispatchReport,
    },
    /// Nothing could be scored; the timestamp was refreshed and the score kept.
    NoData,
    Failed {
        error: String,
    },
    TimedOut,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleSummary {
    pub cycle_id: Uuid,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub tickers: usize,
    pub succeeded: usize,
    pub no_data: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub cancelled: usize,
    pub notifications_delivered: usize,
    pub notifications_abandoned: usize,
    pub outcomes: BTreeMap<String, TickerOutcome>,
}

impl CycleSummary {
    fn new(cycle_id: Uuid, tickers: usize) -> Self {
        Self {
            cycle_id,
            started_at: Some(Utc::now()),
            tickers,
            ..Self::default()
        }
    }

    fn record(&mut self, ticker: String, outcome: TickerOutcome) {
        match &outcome {
            TickerOutcome::Succeeded { notifications, .. } => {
                self.succeeded += 1;
                self.notifications_delivered += notifications.delivered;
                self.notifications_abandoned += notifications.abandoned;
            }
            TickerOutcome::NoData => self.no_data += 1,
            TickerOutcome::Failed { .. } => self.failed += 1,
            TickerOutcome::TimedOut => self.timed_out += 1,
        }
        self.outcomes.insert(ticker, outcome);
    }

    /// Tickers that completed, with or without data.
    pub fn completed(&self) -> usize {
        self.succeeded + self.no_data
    }
}

#[derive(Debug, Clone)]
pub enum CycleReport {
    /// Another cycle held the lease; nothing ran.
    Skipped,
    Completed(CycleSummary),
}

/// A committed analysis and the decision the store made for it.
#[derive(Debug, Clone)]
pub struct CommittedAnalysis {
    pub result: AnalysisResult,
    pub decision: Decision,
}

/// The per-ticker stage sequence: news, optional page content, sentiment, digest, commit,
/// then dispatch.
///
/// [`TickerPipeline::analyze`] covers everything up to the commit; [`TickerPipeline::notify`]
/// runs after it and is never undone by a timeout.
pub struct TickerPipeline {
    aggregator: NewsAggregator,
    content: Option<ArticleContentFetcher>,
    scorer: SentimentScorer,
    digest: DigestGenerator,
    store: Arc<dyn AnalysisStore>,
    dispatcher: NotificationDispatcher,
    commit_timeout: Duration,
}

impl TickerPipeline {
    pub fn new(
        aggregator: NewsAggregator,
        scorer: SentimentScorer,
        digest: DigestGenerator,
        store: Arc<dyn AnalysisStore>,
        dispatcher: NotificationDispatcher,
    ) -> Self {
        Self {
            aggregator,
            content: None,
            scorer,
            digest,
            store,
            dispatcher,
            commit_timeout: OrchestratorOptions::default().commit_timeout,
        }
    }

    pub fn with_content_fetcher(mut self, content: ArticleContentFetcher) -> Self {
        self.content = Some(content);
        self
    }

    pub fn with_commit_timeout(mut self, commit_timeout: Duration) -> Self {
        self.commit_timeout = commit_timeout;
        self
    }

    pub async fn analyze(&self, security: &Security) -> anyhow::Result<CommittedAnalysis> {
        let ticker = security.ticker.as_str();
        let mut articles = self.aggregator.fetch(ticker).await;
        if let Some(content) = &self.content {
            articles = content.enrich(ticker, articles).await;
        }
        let sentiment = self.scorer.score(ticker, &articles).await;

        // No notification can go out without a score, so skip the summarizer.
        let digest = if sentiment.is_indeterminate() {
            self.digest.fallback_digest(&articles)
        } else {
            self.digest.summarize(ticker, &articles).await
        };

        let result = AnalysisResult {
            ticker: ticker.to_string(),
            score: sentiment.aggregate,
            scored_count: sentiment.scored,
            article_count: articles.len(),
            digest,
            analyzed_at: Utc::now(),
        };

        let decision = tokio::time::timeout(self.commit_timeout, self.store.commit(&result))
            .await
            .map_err(|_| anyhow::anyhow!("commit timed out after {:?}", self.commit_timeout))?
            .with_context(|| format!("failed to commit analysis for {ticker}"))?;

        tracing::info!(
            ticker,
            label = ?decision.label,
            score = ?decision.score,
            delta = ?decision.delta,
            notify = decision.notify,
            "committed analysis"
        );

        Ok(CommittedAnalysis { result, decision })
    }

    /// Dispatches whatever the commit decided. Each send is bounded by its own timeout.
    pub async fn notify(&self, security: &Security, committed: &CommittedAnalysis) -> TickerOutcome {
        let CommittedAnalysis { result, decision } = committed;
        let notifications = self.dispatcher.dispatch(security, result, decision).await;

        match (decision.label, decision.score) {
            (Some(label), Some(score)) => TickerOutcome::Succeeded {
                label,
                score,
                notifications,
            },
            _ => TickerOutcome::NoData,
        }
    }
}

/// Runs analysis cycles across every tracked ticker, one cycle at a time.
pub struct Orchestrator {
    pipeline: Arc<TickerPipeline>,
    store: Arc<dyn AnalysisStore>,
    lease: CycleLease,
    opts: OrchestratorOptions,
    shutdown: Option<watch::Receiver<bool>>,
}

impl Orchestrator {
    pub fn new(
        pipeline: TickerPipeline,
        store: Arc<dyn AnalysisStore>,
        opts: OrchestratorOptions,
    ) -> Self {
        let pipeline = pipeline.with_commit_timeout(opts.commit_timeout);
        Self {
            pipeline: Arc::new(pipeline),
            store,
            lease: CycleLease::new(),
            opts,
            shutdown: None,
        }
    }

    /// Sending `true` on the channel cancels in-flight tickers of the running cycle.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn is_running(&self) -> bool {
        self.lease.is_held()
    }

    /// Runs one cycle, or skips if one is already in progress.
    ///
    /// Errors only when the tracked ticker list cannot be read; per-ticker problems are
    /// reported in the summary.
    pub async fn run_cycle(&self) -> anyhow::Result<CycleReport> {
        let Some(_guard) = self.lease.try_acquire() else {
            tracing::warn!("previous cycle still running; skipping trigger");
            return Ok(CycleReport::Skipped);
        };

        let cycle_id = Uuid::new_v4();
        let summary = self
            .run_leased(cycle_id)
            .instrument(tracing::info_span!("cycle", %cycle_id))
            .await?;
        Ok(CycleReport::Completed(summary))
    }

    async fn run_leased(&self, cycle_id: Uuid) -> anyhow::Result<CycleSummary> {
        let started = tokio::time::Instant::now();
        let securities = tokio::time::timeout(self.opts.list_timeout, self.store.tracked_securities())
            .await
            .map_err(|_| anyhow::anyhow!("loading tracked securities timed out"))?
            .context("failed to load tracked securities")?;

        let mut summary = CycleSummary::new(cycle_id, securities.len());
        let pool_size = self.opts.pool_size();
        tracing::info!(tickers = securities.len(), pool_size, "cycle started");

        let permits = Arc::new(Semaphore::new(pool_size));
        let mut pending: HashSet<String> = HashSet::new();
        let mut set = JoinSet::new();
        for security in securities {
            pending.insert(security.ticker.clone());
            let pipeline = Arc::clone(&self.pipeline);
            let permits = Arc::clone(&permits);
            let ticker_timeout = self.opts.ticker_timeout;
            let span = tracing::info_span!("ticker", ticker = %security.ticker);
            set.spawn(
                async move {
                    let _permit = match permits.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            let error = "worker pool closed".to_string();
                            return (security.ticker, TickerOutcome::Failed { error });
                        }
                    };
                    // The timeout starts once a worker slot is held and ends at the commit.
                    let analyzed = tokio::time::timeout(ticker_timeout, pipeline.analyze(&security)).await;
                    let outcome = match analyzed {
                        Ok(Ok(committed)) => pipeline.notify(&security, &committed).await,
                        Ok(Err(err)) => {
                            let error = format!("{err:#}");
                            tracing::error!(%error, "ticker failed");
                            TickerOutcome::Failed { error }
                        }
                        Err(_) => {
                            tracing::warn!(?ticker_timeout, "ticker timed out");
                            TickerOutcome::TimedOut
                        }
                    };
                    (security.ticker, outcome)
                }
                .instrument(span),
            );
        }

        let (_idle_tx, idle_rx) = watch::channel(false);
        let mut shutdown = self.shutdown.clone().unwrap_or(idle_rx);
        let mut watching = true;
        let mut cancelled = *shutdown.borrow();

        while !cancelled {
            let next = tokio::select! {
                biased;
                changed = shutdown.changed(), if watching => {
                    match changed {
                        Ok(()) => cancelled = *shutdown.borrow(),
                        Err(_) => watching = false,
                    }
                    continue;
                }
                next = set.join_next() => next,
            };
            match next {
                Some(Ok((ticker, outcome))) => {
                    pending.remove(&ticker);
                    summary.record(ticker, outcome);
                }
                Some(Err(err)) => tracing::error!(error = %err, "ticker task panicked"),
                None => break,
            }
        }

        if cancelled {
            tracing::warn!(in_flight = pending.len(), "shutdown requested; cancelling in-flight tickers");
            set.abort_all();
            while let Some(joined) = set.join_next().await {
                if let Ok((ticker, outcome)) = joined {
                    pending.remove(&ticker);
                    summary.record(ticker, outcome);
                }
            }
            summary.cancelled = pending.len();
        } else {
            // Only panicked tasks are left unaccounted for.
            for ticker in pending {
                let error = "ticker task panicked".to_string();
                summary.record(ticker, TickerOutcome::Failed { error });
            }
        }

        summary.finished_at = Some(Utc::now());
        tracing::info!(
            tickers = summary.tickers,
            succeeded = summary.succeeded,
            no_data = summary.no_data,
            failed = summary.failed,
            timed_out = summary.timed_out,
            cancelled = summary.cancelled,
            delivered = summary.notifications_delivered,
            abandoned = summary.notifications_abandoned,
            elapsed_ms = started.elapsed().as_millis(),
            "cycle finished"
        );
        Ok(summary)
    }
}
