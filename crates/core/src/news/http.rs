use crate::config::{NewsSourceConfig, Settings};
use crate::domain::article::Article;
use crate::error::CollaboratorError;
use crate::news::NewsSource;
use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PATH: &str = "/v1/news";

/// Response body of a JSON news feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedResponse {
    pub articles: Vec<FeedArticle>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedArticle {
    pub title: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub snippet: Option<String>,
}

/// News source backed by an HTTP endpoint returning [`FeedResponse`] JSON.
#[derive(Debug, Clone)]
pub struct HttpJsonNewsSource {
    http: reqwest::Client,
    name: String,
    base_url: String,
    api_key: Option<String>,
    path: String,
}

impl HttpJsonNewsSource {
    pub fn new(config: &NewsSourceConfig, api_key: Option<String>) -> anyhow::Result<Self> {
        let timeout_secs = std::env::var("NEWS_SOURCE_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let path = std::env::var("NEWS_SOURCE_PATH")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PATH.to_string());

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build news source http client")?;

        Ok(Self {
            http,
            name: config.name.clone(),
            base_url: config.base_url.clone(),
            api_key,
            path,
        })
    }

    /// One client per configured source, in priority order.
    pub fn all_from_settings(settings: &Settings) -> anyhow::Result<Vec<Arc<dyn NewsSource>>> {
        anyhow::ensure!(
            !settings.news_sources.is_empty(),
            "NEWS_SOURCES must name at least one source"
        );
        settings
            .news_sources
            .iter()
            .map(|cfg| {
                let source = Self::new(cfg, settings.news_source_api_key.clone())?;
                Ok(Arc::new(source) as Arc<dyn NewsSource>)
            })
            .collect()
    }

    fn url(&self) -> String {
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };

        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn headers(&self) -> Result<HeaderMap, CollaboratorError> {
        let mut headers = HeaderMap::new();
        if let Some(api_key) = &self.api_key {
            let value = HeaderValue::from_str(api_key)
                .map_err(|e| CollaboratorError::Permanent(format!("invalid api key header: {e}")))?;
            headers.insert("x-api-key", value);
        }
        Ok(headers)
    }

    fn into_article(&self, item: FeedArticle) -> Article {
        Article {
            source: item
                .source
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| self.name.clone()),
            title: item.title.trim().to_string(),
            url: item.url,
            published_at: item.published_at,
            snippet: item.snippet,
            content: None,
        }
    }
}

#[async_trait::async_trait]
impl NewsSource for HttpJsonNewsSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query(
        &self,
        ticker: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Article>, CollaboratorError> {
        let res = self
            .http
            .get(self.url())
            .headers(self.headers()?)
            .query(&[
                ("ticker", ticker.to_string()),
                ("since", since.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ])
            .send()
            .await?;

        let status = res.status();
        let text = res.text().await?;
        if !status.is_success() {
            return Err(classify_status(status, text));
        }

        let parsed = parse_feed(&text)?;
        Ok(parsed.articles.into_iter().map(|a| self.into_article(a)).collect())
    }
}

// Feeds answer 400/404/422 for tickers they do not cover.
fn classify_status(status: StatusCode, body: String) -> CollaboratorError {
    match status {
        StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND | StatusCode::UNPROCESSABLE_ENTITY => {
            CollaboratorError::Permanent(format!("HTTP {status}: {body}"))
        }
        _ => CollaboratorError::from_status(status, body),
    }
}

fn parse_feed(text: &str) -> Result<FeedResponse, CollaboratorError> {
    serde_json::from_str::<FeedResponse>(text)
        .map_err(|e| CollaboratorError::Permanent(format!("news feed response is not valid JSON: {e}")))
}
