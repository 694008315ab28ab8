use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Fixed namespace so subscription ids stay stable across deployments.
const SUBSCRIPTION_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a7e_94b3_4d0e_8a51_3c7d_e2f4_b915);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Security {
    pub ticker: String,
    pub name: String,
    pub last_analysis_at: Option<DateTime<Utc>>,
    pub last_sentiment_score: Option<f64>,
}

impl Security {
    pub fn new(ticker: &str, name: &str) -> Self {
        Self {
            ticker: normalize_ticker(ticker),
            name: name.trim().to_string(),
            last_analysis_at: None,
            last_sentiment_score: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub recipient_id: String,
    pub ticker: String,
    pub display_name: String,
    pub subscribed_at: DateTime<Utc>,
}

impl Subscription {
    pub fn new(recipient_id: &str, ticker: &str, display_name: &str) -> Self {
        let ticker = normalize_ticker(ticker);
        Self {
            id: subscription_id(recipient_id, &ticker),
            recipient_id: recipient_id.trim().to_string(),
            ticker,
            display_name: display_name.trim().to_string(),
            subscribed_at: Utc::now(),
        }
    }
}

pub fn normalize_ticker(ticker: &str) -> String {
    ticker.trim().to_uppercase()
}

/// Deterministic key for a (recipient, ticker) pair, so repeated subscribes upsert.
pub fn subscription_id(recipient_id: &str, ticker: &str) -> Uuid {
    let key = format!("{}:{}", recipient_id.trim(), normalize_ticker(ticker));
    Uuid::new_v5(&SUBSCRIPTION_NAMESPACE, key.as_bytes())
}
