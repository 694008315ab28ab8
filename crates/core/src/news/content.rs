//! Optional enrichment that replaces feed snippets with the article page's body text.

use crate::domain::article::Article;
use crate::error::CollaboratorError;
use crate::retry::with_timeout;
use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use scraper::{Html, Selector};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::Instrument;

const DEFAULT_MAX_CONCURRENCY: usize = 5;
const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MIN_CHARS: usize = 100;
const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

// Narrowest container first; the bare `p` pass catches pages without semantic markup.
const PARAGRAPH_SELECTORS: [&str; 3] = ["article p", "main p", "p"];

/// Downloads the HTML of an article page.
#[async_trait::async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, CollaboratorError>;
}

#[derive(Debug, Clone)]
pub struct HttpPageFetcher {
    http: reqwest::Client,
}

impl HttpPageFetcher {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml;q=0.9,*/*;q=0.8"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .context("failed to build article page http client")?;
        Ok(Self { http })
    }
}

#[async_trait::async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str) -> Result<String, CollaboratorError> {
        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            return Err(CollaboratorError::from_status(status, url));
        }
        Ok(resp.text().await?)
    }
}

#[derive(Debug, Clone)]
pub struct ContentOptions {
    /// Pages downloaded at once, across all tickers sharing the fetcher.
    pub max_concurrency: usize,
    pub timeout: Duration,
    /// Extracted text must be longer than this to replace the snippet.
    pub min_chars: usize,
}

impl Default for ContentOptions {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            min_chars: DEFAULT_MIN_CHARS,
        }
    }
}

/// Fills [`Article::content`] from each article's page.
///
/// Every failure (bad URL, non-200 answer, timeout, page with too little text) leaves the
/// article as it came from the feed.
pub struct ArticleContentFetcher {
    fetcher: Arc<dyn PageFetcher>,
    limiter: Arc<Semaphore>,
    opts: ContentOptions,
}

impl ArticleContentFetcher {
    pub fn new(fetcher: Arc<dyn PageFetcher>, opts: ContentOptions) -> Self {
        let limiter = Arc::new(Semaphore::new(opts.max_concurrency.max(1)));
        Self {
            fetcher,
            limiter,
            opts,
        }
    }

    pub async fn enrich(&self, ticker: &str, mut articles: Vec<Article>) -> Vec<Article> {
        let mut set = JoinSet::new();
        for (idx, article) in articles.iter().enumerate() {
            if article.content.is_some() || !is_http_url(&article.url) {
                continue;
            }
            let fetcher = Arc::clone(&self.fetcher);
            let limiter = Arc::clone(&self.limiter);
            let url = article.url.clone();
            let timeout = self.opts.timeout;
            let min_chars = self.opts.min_chars;
            set.spawn(
                async move {
                    let _permit = match limiter.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => return (idx, None),
                    };
                    match with_timeout(timeout, "article page", fetcher.fetch(&url)).await {
                        Ok(html) => {
                            let text = extract_main_text(&html, min_chars);
                            if text.is_none() {
                                tracing::debug!(url, "article page had too little text");
                            }
                            (idx, text)
                        }
                        Err(err) => {
                            tracing::debug!(url, error = %err, "article page fetch failed");
                            (idx, None)
                        }
                    }
                }
                .in_current_span(),
            );
        }

        let mut filled = 0usize;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, Some(text))) => {
                    articles[idx].content = Some(text);
                    filled += 1;
                }
                Ok((_, None)) => {}
                Err(err) => tracing::error!(error = %err, "article page task panicked"),
            }
        }
        tracing::info!(ticker, filled, total = articles.len(), "fetched article content");
        articles
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Joins the paragraph text of the page's main content, whitespace collapsed.
///
/// Returns `None` when no selector yields more than `min_chars` characters.
pub fn extract_main_text(html: &str, min_chars: usize) -> Option<String> {
    let doc = Html::parse_document(html);
    PARAGRAPH_SELECTORS.iter().find_map(|css| {
        let selector = Selector::parse(css).ok()?;
        let raw = doc.select(&selector).flat_map(|p| p.text()).collect::<Vec<_>>().join(" ");
        let text = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        (text.chars().count() > min_chars).then_some(text)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{article, FakePageFetcher};

    fn long_paragraph(word: &str) -> String {
        vec![word; 30].join(" ")
    }

    #[test]
    fn prefers_article_paragraphs() {
        let html = format!(
            "<html><body><nav><p>menu menu</p></nav>\
             <article><p>{}</p><p>  second\n  paragraph </p></article>\
             <footer><p>footer</p></footer></body></html>",
            long_paragraph("body")
        );
        let text = extract_main_text(&html, 100).unwrap();
        assert!(text.starts_with("body body"));
        assert!(text.ends_with("second paragraph"));
        assert!(!text.contains("menu"));
        assert!(!text.contains("footer"));
    }

    #[test]
    fn falls_back_to_any_paragraph() {
        let html = format!("<div><p>{}</p></div>", long_paragraph("plain"));
        assert!(extract_main_text(&html, 100).unwrap().starts_with("plain"));
    }

    #[test]
    fn short_pages_yield_nothing() {
        assert_eq!(extract_main_text("<article><p>too short</p></article>", 100), None);
        assert_eq!(extract_main_text("<html><body>no paragraphs</body></html>", 1), None);
    }

    #[tokio::test]
    async fn fills_content_and_keeps_snippet_on_failure() {
        let mut found = article("found");
        found.snippet = Some("teaser".to_string());
        let mut missing = article("missing");
        missing.snippet = Some("kept teaser".to_string());
        let mut relative = article("relative");
        relative.url = "/news/relative".to_string();

        let page = format!("<article><p>{}</p></article>", long_paragraph("story"));
        let fetcher = FakePageFetcher::new().with_page(&found.url, &page);
        let handle = fetcher.clone();
        let content = ArticleContentFetcher::new(Arc::new(fetcher), ContentOptions::default());

        let out = content.enrich("NVDA", vec![found, missing, relative]).await;
        assert_eq!(out[0].title, "found");
        assert!(out[0].full_text().starts_with("found. story story"));
        assert_eq!(out[1].content, None);
        assert_eq!(out[1].full_text(), "missing. kept teaser");
        assert_eq!(out[2].content, None);
        // The relative URL is never requested.
        assert_eq!(handle.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_pages_time_out_without_content() {
        let a = article("slow");
        let page = format!("<p>{}</p>", long_paragraph("late"));
        let fetcher = FakePageFetcher::new()
            .with_page(&a.url, &page)
            .with_delay(Duration::from_secs(30));
        let content = ArticleContentFetcher::new(Arc::new(fetcher), ContentOptions::default());
        let out = content.enrich("NVDA", vec![a]).await;
        assert_eq!(out[0].content, None);
    }

    #[tokio::test(start_paused = true)]
    async fn page_downloads_are_bounded() {
        let articles: Vec<_> = (0..12).map(|i| article(&format!("story {i}"))).collect();
        let page = format!("<p>{}</p>", long_paragraph("text"));
        let mut fetcher = FakePageFetcher::new().with_delay(Duration::from_secs(1));
        for a in &articles {
            fetcher = fetcher.with_page(&a.url, &page);
        }
        let handle = fetcher.clone();
        let content = ArticleContentFetcher::new(
            Arc::new(fetcher),
            ContentOptions {
                max_concurrency: 3,
                ..ContentOptions::default()
            },
        );

        let out = content.enrich("NVDA", articles).await;
        assert!(out.iter().all(|a| a.content.is_some()));
        assert_eq!(handle.calls(), 12);
        assert_eq!(handle.peak_in_flight(), 3);
    }
}
