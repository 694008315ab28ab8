use anyhow::ensure;
use serde::{Deserialize, Serialize};

/// Structured sentiment as emitted by a language model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LlmSentiment {
    pub score: f64,
}

impl LlmSentiment {
    /// Rejects non-finite scores; range clamping happens when the score is aggregated.
    pub fn validate(self) -> anyhow::Result<f64> {
        ensure!(
            self.score.is_finite(),
            "sentiment score must be a finite number (got {})",
            self.score
        );
        Ok(self.score)
    }
}
