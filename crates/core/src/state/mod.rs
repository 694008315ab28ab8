//! Persistence seam for analysis state and subscriptions.

pub mod memory;

use crate::domain::analysis::{AnalysisResult, Decision};
use crate::domain::security::{Security, Subscription};

pub use crate::domain::analysis::decide;

#[async_trait::async_trait]
pub trait AnalysisStore: Send + Sync {
    /// Securities with at least one subscription, ordered by ticker.
    async fn tracked_securities(&self) -> anyhow::Result<Vec<Security>>;

    /// Atomically reads the previous score, writes the new analysis timestamp and score, and
    /// returns the decision computed from that same previous score. See [`decide`].
    async fn commit(&self, result: &AnalysisResult) -> anyhow::Result<Decision>;

    /// Every subscription record for `ticker`, duplicates included.
    async fn subscribers(&self, ticker: &str) -> anyhow::Result<Vec<Subscription>>;
}
