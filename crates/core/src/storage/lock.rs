use anyhow::Context;
use sqlx::pool::PoolConnection;
use sqlx::Postgres;

// Advisory locks are scoped to the Postgres session, so the lock keeps its own connection
// rather than borrowing whichever pooled one is free.
const CYCLE_LOCK_KEY: i64 = 0x5449_434B_5055_4C53; // "TICKPULS"

/// Cross-process guard ensuring at most one worker runs an analysis cycle at a time.
pub struct CycleLock {
    conn: Option<PoolConnection<Postgres>>,
}

impl CycleLock {
    /// `None` when another session holds the lock.
    pub async fn try_acquire(pool: &sqlx::PgPool) -> anyhow::Result<Option<Self>> {
        let mut conn = pool
            .acquire()
            .await
            .context("failed to acquire connection for advisory lock")?;
        let acquired: (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
            .persistent(false)
            .bind(CYCLE_LOCK_KEY)
            .fetch_one(&mut *conn)
            .await
            .with_context(|| format!("failed to acquire advisory lock (key={CYCLE_LOCK_KEY})"))?;

        Ok(acquired.0.then(|| Self { conn: Some(conn) }))
    }

    pub async fn release(mut self) -> anyhow::Result<()> {
        if let Some(mut conn) = self.conn.take() {
            sqlx::query("SELECT pg_advisory_unlock($1)")
                .persistent(false)
                .bind(CYCLE_LOCK_KEY)
                .execute(&mut *conn)
                .await
                .with_context(|| format!("failed to release advisory lock (key={CYCLE_LOCK_KEY})"))?;
        }
        Ok(())
    }
}

impl Drop for CycleLock {
    fn drop(&mut self) {
        // Not released explicitly: close the session instead of returning a locked
        // connection to the pool.
        if let Some(conn) = self.conn.take() {
            tracing::warn!("advisory lock dropped without release; closing its session");
            drop(conn.detach());
        }
    }
}
