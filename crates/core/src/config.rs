use crate::cycle::OrchestratorOptions;
use crate::digest::DigestOptions;
use crate::news::content::ContentOptions;
use crate::news::AggregatorOptions;
use crate::notify::DispatchOptions;
use crate::sentiment::ScorerOptions;
use anyhow::Context;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_CYCLE_INTERVAL_SECS: u64 = 3600;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewsSourceConfig {
    pub name: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub sentry_dsn: Option<String>,
    pub news_sources: Vec<NewsSourceConfig>,
    pub news_source_api_key: Option<String>,
    pub messaging_webhook_url: Option<String>,
    pub messaging_api_key: Option<String>,
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        let news_sources = match std::env::var("NEWS_SOURCES") {
            Ok(raw) => parse_news_sources(&raw).context("invalid NEWS_SOURCES")?,
            Err(_) => Vec::new(),
        };

        Ok(Self {
            database_url: std::env::var("DATABASE_URL").ok(),
            anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
            sentry_dsn: std::env::var("SENTRY_DSN").ok(),
            news_sources,
            news_source_api_key: std::env::var("NEWS_SOURCE_API_KEY").ok(),
            messaging_webhook_url: std::env::var("MESSAGING_WEBHOOK_URL").ok(),
            messaging_api_key: std::env::var("MESSAGING_API_KEY").ok(),
        })
    }

    pub fn require_database_url(&self) -> anyhow::Result<&str> {
        self.database_url
            .as_deref()
            .context("DATABASE_URL is required")
    }

    pub fn require_anthropic_api_key(&self) -> anyhow::Result<&str> {
        self.anthropic_api_key
            .as_deref()
            .context("ANTHROPIC_API_KEY is required")
    }

    pub fn require_messaging_webhook_url(&self) -> anyhow::Result<&str> {
        self.messaging_webhook_url
            .as_deref()
            .context("MESSAGING_WEBHOOK_URL is required")
    }
}

/// Parses `name=url` pairs separated by commas, in priority order.
pub fn parse_news_sources(raw: &str) -> anyhow::Result<Vec<NewsSourceConfig>> {
    let mut out: Vec<NewsSourceConfig> = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (name, base_url) = entry
            .split_once('=')
            .with_context(|| format!("expected name=url, got {entry:?}"))?;
        let name = name.trim();
        let base_url = base_url.trim().trim_end_matches('/');
        anyhow::ensure!(!name.is_empty(), "news source name is empty in {entry:?}");
        anyhow::ensure!(
            base_url.starts_with("http://") || base_url.starts_with("https://"),
            "news source {name} has no http(s) url"
        );
        anyhow::ensure!(
            out.iter().all(|s| s.name != name),
            "news source {name} is listed twice"
        );
        out.push(NewsSourceConfig {
            name: name.to_string(),
            base_url: base_url.to_string(),
        });
    }
    Ok(out)
}

/// Tunables for every pipeline stage, defaulted and overridden from the environment.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub aggregator: AggregatorOptions,
    /// `None` leaves articles with their feed snippets.
    pub content: Option<ContentOptions>,
    pub scorer: ScorerOptions,
    pub digest: DigestOptions,
    pub dispatch: DispatchOptions,
    pub orchestrator: OrchestratorOptions,
    pub cycle_interval: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            aggregator: AggregatorOptions::default(),
            content: Some(ContentOptions::default()),
            scorer: ScorerOptions::default(),
            digest: DigestOptions::default(),
            dispatch: DispatchOptions::default(),
            orchestrator: OrchestratorOptions::default(),
            cycle_interval: Duration::from_secs(DEFAULT_CYCLE_INTERVAL_SECS),
        }
    }
}

impl PipelineOptions {
    pub fn from_env() -> Self {
        let mut out = Self::default();

        if let Some(hours) = env_parse::<i64>("NEWS_LOOKBACK_HOURS").filter(|h| *h > 0) {
            out.aggregator.lookback = chrono::Duration::hours(hours);
        }
        if let Some(n) = env_parse::<usize>("NEWS_MAX_ARTICLES").filter(|n| *n > 0) {
            out.aggregator.max_articles = n;
        }
        if let Some(secs) = env_secs("NEWS_SOURCE_TIMEOUT_SECS") {
            out.aggregator.source_timeout = secs;
        }
        if let Some(n) = env_parse::<u32>("NEWS_SOURCE_RETRIES") {
            out.aggregator.retry.max_attempts = n.saturating_add(1);
        }

        if env_parse::<bool>("CONTENT_FETCH_ENABLED") == Some(false) {
            out.content = None;
        }
        if let Some(content) = out.content.as_mut() {
            if let Some(n) = env_parse::<usize>("CONTENT_FETCH_MAX_CONCURRENCY").filter(|n| *n > 0) {
                content.max_concurrency = n;
            }
            if let Some(secs) = env_secs("CONTENT_FETCH_TIMEOUT_SECS") {
                content.timeout = secs;
            }
        }

        if let Some(secs) = env_secs("SENTIMENT_TIMEOUT_SECS") {
            out.scorer.call_timeout = secs;
        }
        if let Some(n) = env_parse::<usize>("SENTIMENT_MAX_TEXT_CHARS").filter(|n| *n > 0) {
            out.scorer.max_text_chars = n;
        }

        if let Some(n) = env_parse::<usize>("DIGEST_MAX_INPUT_CHARS").filter(|n| *n > 0) {
            out.digest.max_input_chars = n;
        }
        if let Some(n) = env_parse::<usize>("DIGEST_MAX_LENGTH").filter(|n| *n > 0) {
            out.digest.summary_max_length = n;
        }
        if let Some(secs) = env_secs("DIGEST_TIMEOUT_SECS") {
            out.digest.call_timeout = secs;
        }

        if let Some(secs) = env_secs("MESSAGING_SEND_TIMEOUT_SECS") {
            out.dispatch.send_timeout = secs;
        }
        if let Some(n) = env_parse::<usize>("MESSAGING_MAX_CONCURRENCY").filter(|n| *n > 0) {
            out.dispatch.max_concurrency = n;
        }
        if let Some(n) = env_parse::<u32>("MESSAGING_RETRIES") {
            out.dispatch.retry.max_attempts = n.saturating_add(1);
        }

        if let Some(n) = env_parse::<usize>("CYCLE_MAX_CONCURRENCY").filter(|n| *n > 0) {
            out.orchestrator.max_concurrency = n;
        }
        if let Some(secs) = env_secs("CYCLE_TICKER_TIMEOUT_SECS") {
            out.orchestrator.ticker_timeout = secs;
        }
        if let Some(secs) = env_secs("CYCLE_INTERVAL_SECS") {
            out.cycle_interval = secs;
        }

        out
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok())
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parse::<u64>(key)
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sources_in_priority_order() {
        let sources =
            parse_news_sources(" wire=https://wire.example.com/ , blog=http://blog.example.com")
                .unwrap();
        assert_eq!(
            sources,
            vec![
                NewsSourceConfig {
                    name: "wire".to_string(),
                    base_url: "https://wire.example.com".to_string(),
                },
                NewsSourceConfig {
                    name: "blog".to_string(),
                    base_url: "http://blog.example.com".to_string(),
                },
            ]
        );
    }

    #[test]
    fn empty_source_list_is_allowed() {
        assert!(parse_news_sources("").unwrap().is_empty());
        assert!(parse_news_sources(" , ").unwrap().is_empty());
    }

    #[test]
    fn rejects_malformed_entries() {
        assert!(parse_news_sources("wire").is_err());
        assert!(parse_news_sources("=https://x.example.com").is_err());
        assert!(parse_news_sources("wire=ftp://x.example.com").is_err());
        assert!(parse_news_sources("a=https://x.example.com,a=https://y.example.com").is_err());
    }

    #[test]
    fn default_interval_is_hourly() {
        assert_eq!(
            PipelineOptions::default().cycle_interval,
            Duration::from_secs(3600)
        );
    }

    #[test]
    fn page_content_and_send_limits_have_defaults() {
        let opts = PipelineOptions::default();
        assert_eq!(opts.content.map(|c| c.max_concurrency), Some(5));
        assert_eq!(opts.dispatch.max_concurrency, 8);
    }
}
