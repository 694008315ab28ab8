use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Scores at or above this are positive; at or below its negation, negative.
pub const SENTIMENT_THRESHOLD: f64 = 0.15;

/// Beyond this magnitude a non-neutral label reads as "strongly".
pub const STRONG_SENTIMENT: f64 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentimentLabel {
    Positive,
    Negative,
    Neutral,
}

impl SentimentLabel {
    pub fn classify(score: f64) -> Self {
        if score >= SENTIMENT_THRESHOLD {
            Self::Positive
        } else if score <= -SENTIMENT_THRESHOLD {
            Self::Negative
        } else {
            Self::Neutral
        }
    }

    /// Positive and negative results are worth telling subscribers about.
    pub fn is_actionable(self) -> bool {
        !matches!(self, Self::Neutral)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
            Self::Neutral => "neutral",
        }
    }
}

impl fmt::Display for SentimentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// "strongly positive", "moderately negative" or "neutral".
pub fn describe_sentiment(score: f64) -> String {
    let label = SentimentLabel::classify(score);
    if !label.is_actionable() {
        return label.to_string();
    }
    let intensity = if score.abs() > STRONG_SENTIMENT {
        "strongly"
    } else {
        "moderately"
    };
    format!("{intensity} {label}")
}

/// Maps any finite score into [-1.0, 1.0]. Non-finite input yields `None`.
pub fn clamp_score(score: f64) -> Option<f64> {
    score.is_finite().then(|| score.clamp(-1.0, 1.0))
}

/// Output of one ticker's pipeline run within a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub ticker: String,
    /// `None` when no score could be computed this cycle.
    pub score: Option<f64>,
    pub scored_count: usize,
    pub article_count: usize,
    pub digest: String,
    pub analyzed_at: DateTime<Utc>,
}

impl AnalysisResult {
    pub fn is_indeterminate(&self) -> bool {
        self.score.is_none()
    }
}

/// What the state store concluded after persisting a result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// `None` for indeterminate results.
    pub label: Option<SentimentLabel>,
    /// Score persisted by the commit. Equals `previous_score` for indeterminate results.
    pub score: Option<f64>,
    pub previous_score: Option<f64>,
    pub delta: Option<f64>,
    pub notify: bool,
}

/// Decides label, delta and notification for `result` against the previously persisted score.
///
/// Every store backend calls this with the previous score read inside the same transaction
/// that writes `Decision::score`.
pub fn decide(previous_score: Option<f64>, result: &AnalysisResult) -> Decision {
    match result.score.and_then(clamp_score) {
        None => Decision {
            label: None,
            score: previous_score,
            previous_score,
            delta: None,
            notify: false,
        },
        Some(score) => {
            let label = SentimentLabel::classify(score);
            Decision {
                label: Some(label),
                score: Some(score),
                previous_score,
                delta: previous_score.map(|prev| score - prev),
                notify: label.is_actionable(),
            }
        }
    }
}
