use crate::domain::analysis::{decide, AnalysisResult, Decision};
use crate::domain::security::{normalize_ticker, Security};
use anyhow::Context;

pub async fn list_securities(pool: &sqlx::PgPool) -> anyhow::Result<Vec<Security>> {
    sqlx::query_as::<_, Security>(
        "SELECT ticker, name, last_analysis_at, last_sentiment_score \
         FROM securities ORDER BY ticker",
    )
    .fetch_all(pool)
    .await
    .context("select securities failed")
}

pub async fn get_security(pool: &sqlx::PgPool, ticker: &str) -> anyhow::Result<Option<Security>> {
    let ticker = normalize_ticker(ticker);
    sqlx::query_as::<_, Security>(
        "SELECT ticker, name, last_analysis_at, last_sentiment_score \
         FROM securities WHERE ticker = $1",
    )
    .bind(&ticker)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("select security {ticker} failed"))
}

/// Securities with at least one subscription.
pub async fn tracked_securities(pool: &sqlx::PgPool) -> anyhow::Result<Vec<Security>> {
    sqlx::query_as::<_, Security>(
        "SELECT s.ticker, s.name, s.last_analysis_at, s.last_sentiment_score \
         FROM securities s \
         WHERE EXISTS (SELECT 1 FROM subscriptions sub WHERE sub.ticker = s.ticker) \
         ORDER BY s.ticker",
    )
    .persistent(false)
    .fetch_all(pool)
    .await
    .context("select tracked securities failed")
}

/// Reads the previous score under a row lock and writes the new state in the same
/// transaction, so the returned decision matches what was persisted.
pub async fn commit_analysis(
    pool: &sqlx::PgPool,
    result: &AnalysisResult,
) -> anyhow::Result<Decision> {
    let mut tx = pool.begin().await.context("begin transaction failed")?;

    let previous: Option<(Option<f64>,)> = sqlx::query_as(
        "SELECT last_sentiment_score FROM securities WHERE ticker = $1 FOR UPDATE",
    )
    .bind(&result.ticker)
    .fetch_optional(&mut *tx)
    .await
    .with_context(|| format!("select security {} for update failed", result.ticker))?;

    let Some((previous_score,)) = previous else {
        anyhow::bail!("security {} not found", result.ticker);
    };

    let decision = decide(previous_score, result);

    sqlx::query(
        "UPDATE securities SET last_analysis_at = $2, last_sentiment_score = $3 \
         WHERE ticker = $1",
    )
    .bind(&result.ticker)
    .bind(result.analyzed_at)
    .bind(decision.score)
    .execute(&mut *tx)
    .await
    .with_context(|| format!("update security {} failed", result.ticker))?;

    tx.commit().await.context("commit transaction failed")?;
    Ok(decision)
}
