use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, put},
    Json, Router,
};
use serde::Deserialize;
use sqlx::PgPool;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tickerpulse_core::domain::security::{normalize_ticker, Security, Subscription};
use tickerpulse_core::storage::{securities, subscriptions};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = tickerpulse_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();
    let pool: Option<PgPool> = match settings.require_database_url() {
        Ok(db_url) => match sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
        {
            Ok(pool) => match tickerpulse_core::storage::migrate(&pool).await {
                Ok(()) => Some(pool),
                Err(e) => {
                    sentry_anyhow::capture_anyhow(&e);
                    tracing::error!(error = %e, "db migrations failed; starting API in degraded mode");
                    None
                }
            },
            Err(e) => {
                let err = anyhow::Error::new(e);
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(error = %err, "db connect failed; starting API in degraded mode");
                None
            }
        },
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "DATABASE_URL missing; starting API in degraded mode");
            None
        }
    };

    let state = AppState { pool };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/securities", get(list_securities))
        .route("/securities/:ticker", get(get_security))
        .route("/subscriptions", put(subscribe))
        .route("/subscriptions/:recipient_id/:ticker", delete(unsubscribe))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Clone)]
struct AppState {
    pool: Option<PgPool>,
}

impl AppState {
    fn pool(&self) -> Result<&PgPool, ApiError> {
        self.pool.as_ref().ok_or(ApiError::Unavailable)
    }
}

#[derive(Debug)]
enum ApiError {
    Unavailable,
    NotFound,
    BadRequest(String),
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        match self {
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE.into_response(),
            Self::NotFound => StatusCode::NOT_FOUND.into_response(),
            Self::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": msg })),
            )
                .into_response(),
            Self::Internal(err) => {
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(error = %format!("{err:#}"), "request failed");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

async fn list_securities(State(state): State<AppState>) -> Result<Json<Vec<Security>>, ApiError> {
    let pool = state.pool()?;
    Ok(Json(securities::list_securities(pool).await?))
}

async fn get_security(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
) -> Result<Json<Security>, ApiError> {
    let pool = state.pool()?;
    securities::get_security(pool, &ticker)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

#[derive(Debug, Deserialize)]
struct SubscribeRequest {
    recipient_id: String,
    ticker: String,
    display_name: String,
}

impl SubscribeRequest {
    fn validate(&self) -> Result<(), ApiError> {
        if self.recipient_id.trim().is_empty() {
            return Err(ApiError::BadRequest("recipient_id must be non-empty".to_string()));
        }
        let ticker = normalize_ticker(&self.ticker);
        if ticker.is_empty()
            || ticker.len() > 16
            || !ticker
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':'))
        {
            return Err(ApiError::BadRequest(format!("invalid ticker {:?}", self.ticker)));
        }
        if self.display_name.trim().is_empty() {
            return Err(ApiError::BadRequest("display_name must be non-empty".to_string()));
        }
        Ok(())
    }
}

async fn subscribe(
    State(state): State<AppState>,
    Json(req): Json<SubscribeRequest>,
) -> Result<Json<Subscription>, ApiError> {
    req.validate()?;
    let pool = state.pool()?;
    let sub =
        subscriptions::upsert_subscription(pool, &req.recipient_id, &req.ticker, &req.display_name)
            .await?;
    tracing::info!(subscription_id = %sub.id, ticker = %sub.ticker, "subscription saved");
    Ok(Json(sub))
}

async fn unsubscribe(
    State(state): State<AppState>,
    Path((recipient_id, ticker)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let pool = state.pool()?;
    if subscriptions::unsubscribe(pool, &recipient_id, &ticker).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound)
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &tickerpulse_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
