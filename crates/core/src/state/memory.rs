use crate::domain::analysis::{decide, AnalysisResult, Decision};
use crate::domain::security::{normalize_ticker, Security, Subscription};
use crate::state::AnalysisStore;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};

/// Process-local store, used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    securities: BTreeMap<String, Security>,
    subscriptions: Vec<Subscription>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(securities: Vec<Security>, subscriptions: Vec<Subscription>) -> Self {
        let store = Self::new();
        {
            let mut inner = store.inner.lock();
            for security in securities {
                inner.securities.insert(security.ticker.clone(), security);
            }
            inner.subscriptions = subscriptions;
        }
        store
    }

    /// Upserts by subscription id, creating the security when missing.
    pub fn subscribe(&self, recipient_id: &str, ticker: &str, display_name: &str) -> Subscription {
        let sub = Subscription::new(recipient_id, ticker, display_name);
        let mut inner = self.inner.lock();
        inner
            .securities
            .entry(sub.ticker.clone())
            .or_insert_with(|| Security::new(&sub.ticker, display_name));
        match inner.subscriptions.iter_mut().find(|s| s.id == sub.id) {
            Some(existing) => {
                existing.display_name = sub.display_name.clone();
                existing.clone()
            }
            None => {
                inner.subscriptions.push(sub.clone());
                sub
            }
        }
    }

    /// Appends a subscription record as-is, even if one with the same recipient exists.
    pub fn insert_subscription_record(&self, sub: Subscription) {
        let mut inner = self.inner.lock();
        inner
            .securities
            .entry(sub.ticker.clone())
            .or_insert_with(|| Security::new(&sub.ticker, &sub.display_name));
        inner.subscriptions.push(sub);
    }

    pub fn security(&self, ticker: &str) -> Option<Security> {
        self.inner.lock().securities.get(&normalize_ticker(ticker)).cloned()
    }

    pub fn set_last_score(&self, ticker: &str, score: Option<f64>) {
        if let Some(sec) = self.inner.lock().securities.get_mut(&normalize_ticker(ticker)) {
            sec.last_sentiment_score = score;
        }
    }
}

#[async_trait::async_trait]
impl AnalysisStore for MemoryStore {
    async fn tracked_securities(&self) -> anyhow::Result<Vec<Security>> {
        let inner = self.inner.lock();
        let tickers: BTreeSet<&str> = inner.subscriptions.iter().map(|s| s.ticker.as_str()).collect();
        Ok(tickers
            .into_iter()
            .filter_map(|t| inner.securities.get(t).cloned())
            .collect())
    }

    async fn commit(&self, result: &AnalysisResult) -> anyhow::Result<Decision> {
        let mut inner = self.inner.lock();
        let security = inner
            .securities
            .get_mut(&result.ticker)
            .ok_or_else(|| anyhow::anyhow!("security {} not found", result.ticker))?;

        let decision = decide(security.last_sentiment_score, result);
        security.last_analysis_at = Some(result.analyzed_at);
        security.last_sentiment_score = decision.score;
        Ok(decision)
    }

    async fn subscribers(&self, ticker: &str) -> anyhow::Result<Vec<Subscription>> {
        let ticker = normalize_ticker(ticker);
        Ok(self
            .inner
            .lock()
            .subscriptions
            .iter()
            .filter(|s| s.ticker == ticker)
            .cloned()
            .collect())
    }
}
