//! In-process fakes for every collaborator, shared by unit tests.

use crate::digest::Summarizer;
use crate::domain::article::Article;
use crate::error::CollaboratorError;
use crate::news::content::PageFetcher;
use crate::news::NewsSource;
use crate::notify::{Messenger, NotificationPayload};
use crate::sentiment::SentimentModel;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub fn article_at(source: &str, title: &str, published_at: DateTime<Utc>) -> Article {
    Article {
        source: source.to_string(),
        title: title.to_string(),
        url: format!("https://news.example.com/{}", title.replace(' ', "-")),
        published_at,
        snippet: None,
        content: None,
    }
}

/// Published "now"; the title doubles as the full text the model sees.
pub fn article(title: &str) -> Article {
    article_at("wire", title, Utc::now())
}

/// Counts concurrent calls and remembers the highest count seen.
#[derive(Clone, Default)]
pub struct InFlight {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

pub struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl InFlight {
    pub fn enter(&self) -> InFlightGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlightGuard(self.current.clone())
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct FakeSource {
    name: String,
    results: HashMap<String, Result<Vec<Article>, CollaboratorError>>,
    default: Result<Vec<Article>, CollaboratorError>,
    delays: HashMap<String, Duration>,
    calls: Arc<AtomicUsize>,
    in_flight: InFlight,
}

impl FakeSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            results: HashMap::new(),
            default: Ok(Vec::new()),
            delays: HashMap::new(),
            calls: Arc::new(AtomicUsize::new(0)),
            in_flight: InFlight::default(),
        }
    }

    pub fn with_articles(mut self, ticker: &str, articles: Vec<Article>) -> Self {
        self.results.insert(ticker.to_string(), Ok(articles));
        self
    }

    pub fn failing_for(mut self, ticker: &str, err: CollaboratorError) -> Self {
        self.results.insert(ticker.to_string(), Err(err));
        self
    }

    pub fn failing_with(mut self, err: CollaboratorError) -> Self {
        self.default = Err(err);
        self
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        self.with_delay_for("*", delay)
    }

    pub fn with_delay_for(mut self, ticker: &str, delay: Duration) -> Self {
        self.delays.insert(ticker.to_string(), delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most queries that were running at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.in_flight.peak()
    }
}

#[async_trait::async_trait]
impl NewsSource for FakeSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query(
        &self,
        ticker: &str,
        _since: DateTime<Utc>,
    ) -> Result<Vec<Article>, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _running = self.in_flight.enter();
        if let Some(delay) = self.delays.get(ticker).or_else(|| self.delays.get("*")) {
            tokio::time::sleep(*delay).await;
        }
        self.results.get(ticker).cloned().unwrap_or_else(|| self.default.clone())
    }
}

/// Scores by exact text match; unknown texts fail transiently.
#[derive(Clone, Default)]
pub struct FakeModel {
    scores: HashMap<String, f64>,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

impl FakeModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_score(mut self, text: &str, score: f64) -> Self {
        self.scores.insert(text.to_string(), score);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl SentimentModel for FakeModel {
    async fn score_text(&self, text: &str) -> Result<f64, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.scores
            .get(text)
            .copied()
            .ok_or_else(|| CollaboratorError::Transient(format!("no score for {text:?}")))
    }
}

#[derive(Clone)]
pub struct FakeSummarizer {
    output: Option<String>,
    calls: Arc<AtomicUsize>,
}

impl FakeSummarizer {
    pub fn ok(output: &str) -> Self {
        Self {
            output: Some(output.to_string()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing() -> Self {
        Self {
            output: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Summarizer for FakeSummarizer {
    async fn summarize(
        &self,
        _texts: &[String],
        _max_length: usize,
    ) -> Result<String, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.output
            .clone()
            .ok_or_else(|| CollaboratorError::Transient("summarizer unavailable".to_string()))
    }
}

#[derive(Clone, Default)]
pub struct RecordingMessenger {
    sent: Arc<Mutex<Vec<(String, NotificationPayload)>>>,
    attempts: Arc<Mutex<HashMap<String, usize>>>,
    failures: HashMap<String, CollaboratorError>,
    delay: Option<Duration>,
    in_flight: InFlight,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(mut self, recipient_id: &str, err: CollaboratorError) -> Self {
        self.failures.insert(recipient_id.to_string(), err);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn peak_in_flight(&self) -> usize {
        self.in_flight.peak()
    }

    pub fn sent(&self) -> Vec<(String, NotificationPayload)> {
        self.sent.lock().clone()
    }

    pub fn attempts_for(&self, recipient_id: &str) -> usize {
        self.attempts.lock().get(recipient_id).copied().unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl Messenger for RecordingMessenger {
    async fn send_direct_message(
        &self,
        recipient_id: &str,
        payload: &NotificationPayload,
    ) -> Result<(), CollaboratorError> {
        *self.attempts.lock().entry(recipient_id.to_string()).or_insert(0) += 1;
        let _running = self.in_flight.enter();
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.failures.get(recipient_id) {
            return Err(err.clone());
        }
        self.sent.lock().push((recipient_id.to_string(), payload.clone()));
        Ok(())
    }
}

/// Serves canned HTML per URL; unknown URLs answer 404.
#[derive(Clone, Default)]
pub struct FakePageFetcher {
    pages: HashMap<String, String>,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
    in_flight: InFlight,
}

impl FakePageFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(url.to_string(), html.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.in_flight.peak()
    }
}

#[async_trait::async_trait]
impl PageFetcher for FakePageFetcher {
    async fn fetch(&self, url: &str) -> Result<String, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _running = self.in_flight.enter();
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| CollaboratorError::Permanent(format!("HTTP 404 Not Found: {url}")))
    }
}
