//! Fan-out of analysis results to a ticker's subscribers.

pub mod webhook;

use crate::domain::analysis::{describe_sentiment, AnalysisResult, Decision, SentimentLabel};
use crate::domain::article::truncate_chars;
use crate::domain::security::Security;
use crate::error::CollaboratorError;
use crate::retry::{retry_transient, with_timeout, RetryPolicy};
use crate::state::AnalysisStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::Instrument;

const MAX_DIGEST_CHARS: usize = 1024;
const DEFAULT_MAX_CONCURRENT_SENDS: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub ticker: String,
    pub name: String,
    pub label: SentimentLabel,
    pub score: f64,
    pub delta: Option<f64>,
    pub digest: String,
    pub article_count: usize,
    pub analyzed_at: DateTime<Utc>,
}

impl NotificationPayload {
    /// `None` when the decision carries no label (indeterminate result).
    pub fn new(security: &Security, result: &AnalysisResult, decision: &Decision) -> Option<Self> {
        let label = decision.label?;
        let score = decision.score?;
        let digest = if result.digest.chars().count() > MAX_DIGEST_CHARS {
            format!("{}...", truncate_chars(&result.digest, MAX_DIGEST_CHARS - 3))
        } else {
            result.digest.clone()
        };
        Some(Self {
            ticker: result.ticker.clone(),
            name: security.name.clone(),
            label,
            score,
            delta: decision.delta,
            digest,
            article_count: result.article_count,
            analyzed_at: result.analyzed_at,
        })
    }

    pub fn render_text(&self) -> String {
        let marker = match self.label {
            SentimentLabel::Positive => "▲",
            SentimentLabel::Negative => "▼",
            SentimentLabel::Neutral => "■",
        };
        let delta = match self.delta {
            Some(d) => format!("{d:+.3}"),
            None => "n/a".to_string(),
        };
        format!(
            "{marker} {ticker} ({name}): {sentiment}\nScore: {score:.3} (change {delta})\nArticles analyzed: {count}\n\n{digest}\n\nAnalysis completed at {at}",
            ticker = self.ticker,
            name = self.name,
            sentiment = describe_sentiment(self.score),
            score = self.score,
            count = self.article_count,
            digest = self.digest,
            at = self.analyzed_at.format("%Y-%m-%d %H:%M UTC"),
        )
    }
}

/// Direct-message delivery to a single recipient.
#[async_trait::async_trait]
pub trait Messenger: Send + Sync {
    async fn send_direct_message(
        &self,
        recipient_id: &str,
        payload: &NotificationPayload,
    ) -> Result<(), CollaboratorError>;
}

/// Writes notifications to the log instead of delivering them.
#[derive(Debug, Clone, Default)]
pub struct LogMessenger;

#[async_trait::async_trait]
impl Messenger for LogMessenger {
    async fn send_direct_message(
        &self,
        recipient_id: &str,
        payload: &NotificationPayload,
    ) -> Result<(), CollaboratorError> {
        tracing::info!(
            recipient_id,
            ticker = %payload.ticker,
            label = %payload.label,
            score = payload.score,
            message = %payload.render_text(),
            "dry-run notification"
        );
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Sends in flight at once, shared by every ticker using the dispatcher.
    pub max_concurrency: usize,
    pub send_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENT_SENDS,
            send_timeout: Duration::from_secs(10),
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(250),
                max_delay: Duration::from_secs(2),
                max_elapsed: None,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub recipients: usize,
    pub delivered: usize,
    pub abandoned: usize,
}

pub struct NotificationDispatcher {
    store: Arc<dyn AnalysisStore>,
    messenger: Arc<dyn Messenger>,
    limiter: Arc<Semaphore>,
    opts: DispatchOptions,
}

impl NotificationDispatcher {
    pub fn new(
        store: Arc<dyn AnalysisStore>,
        messenger: Arc<dyn Messenger>,
        opts: DispatchOptions,
    ) -> Self {
        let limiter = Arc::new(Semaphore::new(opts.max_concurrency.max(1)));
        Self {
            store,
            messenger,
            limiter,
            opts,
        }
    }

    pub async fn dispatch(
        &self,
        security: &Security,
        result: &AnalysisResult,
        decision: &Decision,
    ) -> DispatchReport {
        if !decision.notify {
            return DispatchReport::default();
        }
        let Some(payload) = NotificationPayload::new(security, result, decision) else {
            return DispatchReport::default();
        };

        let subscriptions = match self.store.subscribers(&result.ticker).await {
            Ok(subs) => subs,
            Err(err) => {
                tracing::error!(ticker = %result.ticker, error = %err, "failed to load subscribers; no notifications sent");
                return DispatchReport::default();
            }
        };

        let mut seen = HashSet::new();
        let recipients: Vec<String> = subscriptions
            .into_iter()
            .map(|s| s.recipient_id)
            .filter(|r| seen.insert(r.clone()))
            .collect();

        let payload = Arc::new(payload);
        let mut report = DispatchReport {
            recipients: recipients.len(),
            ..DispatchReport::default()
        };

        let mut set = JoinSet::new();
        for recipient in recipients {
            let messenger = Arc::clone(&self.messenger);
            let limiter = Arc::clone(&self.limiter);
            let payload = Arc::clone(&payload);
            let retry = self.opts.retry;
            let send_timeout = self.opts.send_timeout;
            set.spawn(
                async move {
                    let (to, messenger, limiter, payload) = (&recipient, &messenger, &limiter, &payload);
                    // A permit covers one attempt. The send timeout starts once it is held.
                    let res = retry_transient(&retry, "direct message", move || async move {
                        let _permit = limiter.acquire().await.map_err(|_| {
                            CollaboratorError::Permanent("messaging limiter closed".to_string())
                        })?;
                        with_timeout(
                            send_timeout,
                            "direct message",
                            messenger.send_direct_message(to, payload),
                        )
                        .await
                    })
                    .await;
                    (recipient, res)
                }
                .in_current_span(),
            );
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, Ok(()))) => report.delivered += 1,
                Ok((recipient, Err(err))) => {
                    report.abandoned += 1;
                    tracing::warn!(ticker = %result.ticker, recipient_id = %recipient, error = %err, "notification abandoned");
                }
                Err(err) => {
                    report.abandoned += 1;
                    tracing::error!(ticker = %result.ticker, error = %err, "notification task panicked");
                }
            }
        }

        tracing::info!(
            ticker = %result.ticker,
            recipients = report.recipients,
            delivered = report.delivered,
            abandoned = report.abandoned,
            "dispatched notifications"
        );
        report
    }
}
