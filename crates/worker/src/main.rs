use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tickerpulse_core::config::{PipelineOptions, Settings};
use tickerpulse_core::cycle::{run_scheduled, spawn_trigger_timer, CycleReport, Orchestrator};
use tickerpulse_core::llm::anthropic::AnthropicClient;
use tickerpulse_core::news::content::{HttpPageFetcher, PageFetcher};
use tickerpulse_core::news::http::HttpJsonNewsSource;
use tickerpulse_core::notify::webhook::WebhookMessenger;
use tickerpulse_core::notify::{LogMessenger, Messenger};
use tickerpulse_core::state::memory::MemoryStore;
use tickerpulse_core::state::AnalysisStore;
use tickerpulse_core::storage::lock::CycleLock;
use tickerpulse_core::storage::PgStore;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod pipeline;

#[derive(Debug, Parser)]
#[command(name = "tickerpulse_worker")]
struct Args {
    /// Run a single cycle and exit.
    #[arg(long)]
    once: bool,

    /// Analyze a copy of the database in memory and log notifications instead of sending them.
    #[arg(long)]
    dry_run: bool,

    /// Seconds between cycles. Overrides CYCLE_INTERVAL_SECS.
    #[arg(long)]
    interval_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let mut opts = PipelineOptions::from_env();
    if let Some(secs) = args.interval_secs {
        anyhow::ensure!(secs > 0, "--interval-secs must be positive");
        opts.cycle_interval = Duration::from_secs(secs);
    }

    let db_url = settings.require_database_url()?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .context("connect DATABASE_URL failed")?;

    let pg = PgStore::new(pool.clone());
    let store: Arc<dyn AnalysisStore>;
    let messenger: Arc<dyn Messenger>;
    let lock_pool: Option<sqlx::PgPool>;
    if args.dry_run {
        let (securities, subscriptions) = pg.snapshot().await?;
        tracing::info!(
            dry_run = true,
            securities = securities.len(),
            subscriptions = subscriptions.len(),
            "loaded database snapshot into memory"
        );
        store = Arc::new(MemoryStore::from_snapshot(securities, subscriptions));
        messenger = Arc::new(LogMessenger);
        lock_pool = None;
    } else {
        tickerpulse_core::storage::migrate(&pool).await?;
        store = Arc::new(pg);
        messenger = Arc::new(WebhookMessenger::from_settings(&settings)?);
        lock_pool = Some(pool);
    }

    let llm = Arc::new(AnthropicClient::from_settings(&settings)?);
    opts.orchestrator.rate_limit = Some(llm.max_concurrency());

    let pages = match &opts.content {
        Some(content) => Some(Arc::new(HttpPageFetcher::new(content.timeout)?) as Arc<dyn PageFetcher>),
        None => None,
    };

    let collaborators = pipeline::Collaborators {
        sources: HttpJsonNewsSource::all_from_settings(&settings)?,
        pages,
        model: llm.clone(),
        summarizer: llm,
        messenger,
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let orchestrator = Arc::new(
        pipeline::build_orchestrator(store, collaborators, &opts).with_shutdown(shutdown_rx.clone()),
    );

    if args.once {
        return match run_once(orchestrator, lock_pool).await {
            RunStatus::Failed => anyhow::bail!("cycle failed"),
            _ => Ok(()),
        };
    }

    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            return;
        }
        tracing::info!("shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    // First cycle runs immediately; later ones follow the interval.
    let first = tokio::spawn(run_once(Arc::clone(&orchestrator), lock_pool.clone()));
    let triggers = spawn_trigger_timer(opts.cycle_interval, shutdown_rx);
    run_scheduled(triggers, |trigger| {
        tracing::info!(seq = trigger.seq, fired_at = %trigger.fired_at, "cycle trigger");
        let run = run_once(Arc::clone(&orchestrator), lock_pool.clone());
        async move {
            let status = run.await;
            tracing::debug!(?status, "trigger handled");
        }
    })
    .await;
    if let Err(err) = first.await {
        tracing::error!(error = %err, "initial cycle panicked");
    }

    tracing::info!("worker stopped");
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunStatus {
    Completed,
    /// A cycle started by this process is still running.
    Busy,
    /// Another session holds the database cycle lock.
    Locked,
    Failed,
}

/// Runs one cycle under the cross-process lock (when backed by Postgres). Failures are
/// reported and left for the next trigger.
async fn run_once(orchestrator: Arc<Orchestrator>, lock_pool: Option<sqlx::PgPool>) -> RunStatus {
    // Checked first so a local overlap is not reported as another worker's lock.
    if orchestrator.is_running() {
        tracing::warn!("previous cycle still running in this process; skipping trigger");
        return RunStatus::Busy;
    }

    let lock = match &lock_pool {
        Some(pool) => match CycleLock::try_acquire(pool).await {
            Ok(Some(lock)) => Some(lock),
            Ok(None) => {
                tracing::warn!("cycle lock held by another session; skipping trigger");
                return RunStatus::Locked;
            }
            Err(err) => {
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(error = %format!("{err:#}"), "cycle lock unavailable");
                return RunStatus::Failed;
            }
        },
        None => None,
    };

    let status = match orchestrator.run_cycle().await {
        Ok(CycleReport::Completed(summary)) => {
            match serde_json::to_string(&summary) {
                Ok(json) => tracing::info!(cycle_id = %summary.cycle_id, summary = %json, "cycle summary"),
                Err(err) => tracing::warn!(error = %err, "failed to serialize cycle summary"),
            }
            RunStatus::Completed
        }
        Ok(CycleReport::Skipped) => RunStatus::Busy,
        Err(err) => {
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(error = %format!("{err:#}"), "cycle failed");
            RunStatus::Failed
        }
    };

    if let Some(lock) = lock {
        if let Err(err) = lock.release().await {
            tracing::warn!(error = %format!("{err:#}"), "failed to release cycle lock");
        }
    }
    status
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
