//! Per-article sentiment scoring and ticker-level aggregation.

use crate::domain::analysis::clamp_score;
use crate::domain::article::{truncate_chars, Article};
use crate::error::CollaboratorError;
use crate::retry::with_timeout;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_CALL_TIMEOUT_SECS: u64 = 20;
// Roughly the 512 tokens a financial sentiment model accepts.
const DEFAULT_MAX_TEXT_CHARS: usize = 2048;

/// Inference backend returning a score in [-1.0, 1.0] for one piece of text.
#[async_trait::async_trait]
pub trait SentimentModel: Send + Sync {
    async fn score_text(&self, text: &str) -> Result<f64, CollaboratorError>;
}

#[derive(Debug, Clone)]
pub struct ScorerOptions {
    pub call_timeout: Duration,
    pub max_text_chars: usize,
}

impl Default for ScorerOptions {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS),
            max_text_chars: DEFAULT_MAX_TEXT_CHARS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SentimentScore {
    /// Mean of the successfully scored articles; `None` when nothing scored.
    pub aggregate: Option<f64>,
    pub scored: usize,
    pub attempted: usize,
}

impl SentimentScore {
    pub fn indeterminate(attempted: usize) -> Self {
        Self {
            aggregate: None,
            scored: 0,
            attempted,
        }
    }

    pub fn is_indeterminate(&self) -> bool {
        self.aggregate.is_none()
    }
}

pub struct SentimentScorer {
    model: Arc<dyn SentimentModel>,
    opts: ScorerOptions,
}

impl SentimentScorer {
    pub fn new(model: Arc<dyn SentimentModel>, opts: ScorerOptions) -> Self {
        Self { model, opts }
    }

    pub async fn score(&self, ticker: &str, articles: &[Article]) -> SentimentScore {
        if articles.is_empty() {
            return SentimentScore::indeterminate(0);
        }

        let mut scores = Vec::with_capacity(articles.len());
        for article in articles {
            let text = article.full_text();
            let text = truncate_chars(&text, self.opts.max_text_chars);
            let res = with_timeout(
                self.opts.call_timeout,
                "sentiment inference",
                self.model.score_text(text),
            )
            .await;

            match res.and_then(|raw| {
                clamp_score(raw).ok_or_else(|| {
                    CollaboratorError::Permanent(format!("non-finite sentiment score {raw}"))
                })
            }) {
                Ok(score) => scores.push(score),
                Err(err) => {
                    tracing::warn!(ticker, url = %article.url, error = %err, "article dropped from sentiment aggregate");
                }
            }
        }

        let result = SentimentScore {
            aggregate: mean_score(&scores),
            scored: scores.len(),
            attempted: articles.len(),
        };
        tracing::info!(
            ticker,
            scored = result.scored,
            attempted = result.attempted,
            aggregate = ?result.aggregate,
            "scored sentiment"
        );
        result
    }
}

/// Arithmetic mean, clamped to the score range. `None` for an empty slice.
pub fn mean_score(scores: &[f64]) -> Option<f64> {
    if scores.is_empty() {
        return None;
    }
    let mean = scores.iter().sum::<f64>() / scores.len() as f64;
    clamp_score(mean)
}
