use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trigger {
    pub seq: u64,
    pub fired_at: DateTime<Utc>,
}

/// Emits a trigger every `period`, starting one period from now, until shutdown.
///
/// The channel holds one pending trigger; ticks that find it full are dropped.
pub fn spawn_trigger_timer(
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> mpsc::Receiver<Trigger> {
    let (tx, rx) = mpsc::channel(1);
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + period;
        let mut interval = tokio::time::interval_at(start, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut seq = 0u64;
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("trigger timer stopped");
                        return;
                    }
                }
                _ = interval.tick() => {
                    seq += 1;
                    let trigger = Trigger { seq, fired_at: Utc::now() };
                    match tx.try_send(trigger) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            tracing::warn!(seq, "trigger backlog full; dropping tick");
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => return,
                    }
                }
            }
        }
    });
    rx
}

/// Starts `handler` for every trigger without waiting on earlier ones, so overlap is decided
/// by the handler's own lease. Returns once the trigger stream ends and every handler finished.
pub async fn run_scheduled<F, Fut>(mut triggers: mpsc::Receiver<Trigger>, mut handler: F)
where
    F: FnMut(Trigger) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut running = JoinSet::new();
    loop {
        tokio::select! {
            trigger = triggers.recv() => match trigger {
                Some(trigger) => {
                    tracing::debug!(seq = trigger.seq, "trigger received");
                    running.spawn(handler(trigger));
                }
                None => break,
            },
            Some(joined) = running.join_next(), if !running.is_empty() => {
                if let Err(err) = joined {
                    tracing::error!(error = %err, "scheduled run panicked");
                }
            }
        }
    }
    while let Some(joined) = running.join_next().await {
        if let Err(err) = joined {
            tracing::error!(error = %err, "scheduled run panicked");
        }
    }
}
