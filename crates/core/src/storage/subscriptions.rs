use crate::domain::security::{normalize_ticker, subscription_id, Subscription};
use anyhow::Context;

pub async fn subscribers(pool: &sqlx::PgPool, ticker: &str) -> anyhow::Result<Vec<Subscription>> {
    let ticker = normalize_ticker(ticker);
    sqlx::query_as::<_, Subscription>(
        "SELECT id, recipient_id, ticker, display_name, subscribed_at \
         FROM subscriptions WHERE ticker = $1 ORDER BY subscribed_at",
    )
    .bind(&ticker)
    .fetch_all(pool)
    .await
    .with_context(|| format!("select subscribers of {ticker} failed"))
}

pub async fn list_subscriptions(pool: &sqlx::PgPool) -> anyhow::Result<Vec<Subscription>> {
    sqlx::query_as::<_, Subscription>(
        "SELECT id, recipient_id, ticker, display_name, subscribed_at \
         FROM subscriptions ORDER BY ticker, subscribed_at",
    )
    .fetch_all(pool)
    .await
    .context("select subscriptions failed")
}

/// Creates or refreshes the subscription for `(recipient_id, ticker)`, creating the security
/// when it is not tracked yet. Repeating the call returns the same subscription id.
pub async fn upsert_subscription(
    pool: &sqlx::PgPool,
    recipient_id: &str,
    ticker: &str,
    display_name: &str,
) -> anyhow::Result<Subscription> {
    let sub = Subscription::new(recipient_id, ticker, display_name);
    anyhow::ensure!(!sub.recipient_id.is_empty(), "recipient_id must be non-empty");
    anyhow::ensure!(!sub.ticker.is_empty(), "ticker must be non-empty");
    anyhow::ensure!(!sub.display_name.is_empty(), "display_name must be non-empty");

    let mut tx = pool.begin().await.context("begin transaction failed")?;

    sqlx::query("INSERT INTO securities (ticker, name) VALUES ($1, $2) ON CONFLICT (ticker) DO NOTHING")
        .bind(&sub.ticker)
        .bind(&sub.display_name)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("insert security {} failed", sub.ticker))?;

    let saved: Subscription = sqlx::query_as(
        "INSERT INTO subscriptions (id, recipient_id, ticker, display_name, subscribed_at) \
         VALUES ($1, $2, $3, $4, $5) \
         ON CONFLICT (id) DO UPDATE SET display_name = EXCLUDED.display_name \
         RETURNING id, recipient_id, ticker, display_name, subscribed_at",
    )
    .bind(sub.id)
    .bind(&sub.recipient_id)
    .bind(&sub.ticker)
    .bind(&sub.display_name)
    .bind(sub.subscribed_at)
    .fetch_one(&mut *tx)
    .await
    .with_context(|| format!("upsert subscription {} failed", sub.id))?;

    tx.commit().await.context("commit transaction failed")?;
    Ok(saved)
}

/// Removes every subscription record of `recipient_id` for `ticker`. Returns false when there
/// was none.
pub async fn unsubscribe(pool: &sqlx::PgPool, recipient_id: &str, ticker: &str) -> anyhow::Result<bool> {
    let ticker = normalize_ticker(ticker);
    let recipient_id = recipient_id.trim();
    let res = sqlx::query(
        "DELETE FROM subscriptions WHERE id = $1 OR (recipient_id = $2 AND ticker = $3)",
    )
    .bind(subscription_id(recipient_id, &ticker))
    .bind(recipient_id)
    .bind(&ticker)
    .execute(pool)
    .await
    .with_context(|| format!("delete subscription {recipient_id}:{ticker} failed"))?;
    Ok(res.rows_affected() > 0)
}
