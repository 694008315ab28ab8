pub mod lock;
pub mod securities;
pub mod subscriptions;

use crate::domain::analysis::{AnalysisResult, Decision};
use crate::domain::security::{Security, Subscription};
use crate::state::AnalysisStore;
use anyhow::Context;

pub async fn migrate(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("sqlx migrations failed")?;
    Ok(())
}

/// Postgres-backed [`AnalysisStore`].
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: sqlx::PgPool,
}

impl PgStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    /// Every security and subscription, for seeding an in-memory store.
    pub async fn snapshot(&self) -> anyhow::Result<(Vec<Security>, Vec<Subscription>)> {
        let securities = securities::list_securities(&self.pool).await?;
        let subscriptions = subscriptions::list_subscriptions(&self.pool).await?;
        Ok((securities, subscriptions))
    }
}

#[async_trait::async_trait]
impl AnalysisStore for PgStore {
    async fn tracked_securities(&self) -> anyhow::Result<Vec<Security>> {
        securities::tracked_securities(&self.pool).await
    }

    async fn commit(&self, result: &AnalysisResult) -> anyhow::Result<Decision> {
        securities::commit_analysis(&self.pool, result).await
    }

    async fn subscribers(&self, ticker: &str) -> anyhow::Result<Vec<Subscription>> {
        subscriptions::subscribers(&self.pool, ticker).await
    }
}

#[cfg(test)]
mod tests {
    const INIT_SQL: &str = include_str!("../../migrations/0001_init.sql");

    #[test]
    fn securities_with_subscribers_cannot_be_deleted() {
        let fk = INIT_SQL
            .lines()
            .find(|l| l.contains("REFERENCES securities"))
            .unwrap();
        assert!(fk.contains("ON DELETE RESTRICT"));
        assert!(!INIT_SQL.contains("CASCADE"));
    }
}
