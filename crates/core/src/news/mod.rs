//! News aggregation across several sources for one ticker.

pub mod content;
pub mod http;

use crate::domain::article::{Article, DedupKey};
use crate::error::CollaboratorError;
use crate::retry::{retry_transient, with_timeout, RetryPolicy};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::Instrument;

const DEFAULT_MAX_ARTICLES: usize = 15;
const DEFAULT_LOOKBACK_HOURS: i64 = 12;
const DEFAULT_SOURCE_TIMEOUT_SECS: u64 = 15;

/// A news feed that can be queried for one ticker.
#[async_trait::async_trait]
pub trait NewsSource: Send + Sync {
    fn name(&self) -> &str;

    async fn query(
        &self,
        ticker: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Article>, CollaboratorError>;
}

#[derive(Debug, Clone)]
pub struct AggregatorOptions {
    pub lookback: chrono::Duration,
    pub source_timeout: Duration,
    pub retry: RetryPolicy,
    pub max_articles: usize,
}

impl Default for AggregatorOptions {
    fn default() -> Self {
        Self {
            lookback: chrono::Duration::hours(DEFAULT_LOOKBACK_HOURS),
            source_timeout: Duration::from_secs(DEFAULT_SOURCE_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
            max_articles: DEFAULT_MAX_ARTICLES,
        }
    }
}

/// Queries every source concurrently and merges the results.
///
/// Sources are kept in priority order: when two sources report the same story, the one
/// listed first wins.
pub struct NewsAggregator {
    sources: Vec<Arc<dyn NewsSource>>,
    opts: AggregatorOptions,
}

impl NewsAggregator {
    pub fn new(sources: Vec<Arc<dyn NewsSource>>, opts: AggregatorOptions) -> Self {
        Self { sources, opts }
    }

    pub async fn fetch(&self, ticker: &str) -> Vec<Article> {
        self.fetch_at(ticker, Utc::now()).await
    }

    pub async fn fetch_at(&self, ticker: &str, now: DateTime<Utc>) -> Vec<Article> {
        let since = now - self.opts.lookback;
        let mut batches: Vec<Vec<Article>> = vec![Vec::new(); self.sources.len()];

        // Dropping the set aborts in-flight queries when the ticker is cancelled.
        let mut set = JoinSet::new();
        for (idx, source) in self.sources.iter().enumerate() {
            let source = Arc::clone(source);
            let ticker = ticker.to_string();
            let timeout = self.opts.source_timeout;
            let retry = self.opts.retry;
            set.spawn(
                async move {
                    let res = retry_transient(&retry, source.name(), || {
                        with_timeout(timeout, source.name(), source.query(&ticker, since))
                    })
                    .await;
                    (idx, res)
                }
                .in_current_span(),
            );
        }

        while let Some(joined) = set.join_next().await {
            let (idx, res) = match joined {
                Ok(v) => v,
                Err(err) => {
                    tracing::error!(error = %err, "news source task panicked");
                    continue;
                }
            };
            let name = self.sources[idx].name();
            match res {
                Ok(articles) => {
                    tracing::debug!(source = name, count = articles.len(), "news source returned");
                    batches[idx] = articles;
                }
                Err(err) => {
                    tracing::warn!(source = name, error = %err, "news source contributed no articles");
                }
            }
        }

        let merged = merge_articles(batches, since, self.opts.max_articles);
        tracing::info!(ticker, count = merged.len(), "aggregated news");
        merged
    }
}

/// Merges per-source batches (highest priority first) into a deduplicated list, newest first,
/// holding at most `max_articles` entries.
pub fn merge_articles(
    batches: Vec<Vec<Article>>,
    since: DateTime<Utc>,
    max_articles: usize,
) -> Vec<Article> {
    let mut seen: HashSet<DedupKey> = HashSet::new();
    let mut out: Vec<Article> = batches
        .into_iter()
        .flatten()
        .filter(|a| !a.title.trim().is_empty() && a.published_at >= since)
        .filter(|a| seen.insert(a.dedup_key()))
        .collect();

    // Stable sort keeps priority order among equal timestamps.
    out.sort_by(|a, b| b.published_at.cmp(&a.published_at));
    out.truncate(max_articles);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{article_at, FakeSource};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 18, 0, 0).unwrap()
    }

    fn opts() -> AggregatorOptions {
        AggregatorOptions {
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(40),
                max_elapsed: None,
            },
            ..AggregatorOptions::default()
        }
    }

    #[test]
    fn merge_is_idempotent_on_duplicates() {
        let a = article_at("wire", "Nvidia beats estimates", now() - chrono::Duration::hours(1));
        let merged = merge_articles(vec![vec![a.clone(), a.clone()]], now() - chrono::Duration::hours(12), 15);
        assert_eq!(merged, vec![a]);
    }

    #[test]
    fn merge_prefers_higher_priority_source() {
        let t = now() - chrono::Duration::hours(2);
        let primary = article_at("primary", "Tesla Recalls Cars", t);
        let secondary = article_at("secondary", "tesla   recalls cars", t);
        let merged = merge_articles(vec![vec![primary], vec![secondary]], now() - chrono::Duration::hours(12), 15);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].source, "primary");
    }

    #[test]
    fn merge_sorts_newest_first_and_truncates_oldest() {
        let since = now() - chrono::Duration::hours(12);
        let batch: Vec<Article> = (1..=5)
            .map(|h| article_at("wire", &format!("story {h}"), now() - chrono::Duration::hours(h)))
            .collect();
        let merged = merge_articles(vec![batch], since, 3);
        let titles: Vec<_> = merged.iter().map(|a| a.title.as_str()).collect();
        assert_eq!(titles, vec!["story 1", "story 2", "story 3"]);
    }

    #[test]
    fn merge_drops_stale_and_untitled_articles() {
        let since = now() - chrono::Duration::hours(12);
        let stale = article_at("wire", "old news", now() - chrono::Duration::hours(30));
        let blank = article_at("wire", "   ", now());
        assert!(merge_articles(vec![vec![stale, blank]], since, 15).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failing_source_contributes_nothing() {
        let good = FakeSource::new("good")
            .with_articles("AAPL", vec![article_at("good", "Apple ships", now())]);
        let bad = FakeSource::new("bad").failing_with(CollaboratorError::Transient("503".into()));
        let bad_handle = bad.clone();
        let agg = NewsAggregator::new(vec![Arc::new(bad), Arc::new(good)], opts());

        let articles = agg.fetch_at("AAPL", now()).await;
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].source, "good");
        assert_eq!(bad_handle.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_error_is_not_retried() {
        let src = FakeSource::new("feed").failing_with(CollaboratorError::Permanent("unknown ticker".into()));
        let handle = src.clone();
        let agg = NewsAggregator::new(vec![Arc::new(src)], opts());
        assert!(agg.fetch_at("ZZZZ", now()).await.is_empty());
        assert_eq!(handle.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_source_times_out_without_failing_fetch() {
        let slow = FakeSource::new("slow")
            .with_articles("AAPL", vec![article_at("slow", "late story", now())])
            .with_delay(Duration::from_secs(60));
        let agg = NewsAggregator::new(
            vec![Arc::new(slow)],
            AggregatorOptions {
                source_timeout: Duration::from_secs(1),
                retry: RetryPolicy::no_retry(),
                ..AggregatorOptions::default()
            },
        );
        assert!(agg.fetch_at("AAPL", now()).await.is_empty());
    }

    #[tokio::test]
    async fn no_sources_yields_empty() {
        let agg = NewsAggregator::new(Vec::new(), AggregatorOptions::default());
        assert!(agg.fetch("AAPL").await.is_empty());
    }
}
