use crate::config::Settings;
use crate::error::CollaboratorError;
use crate::notify::{Messenger, NotificationPayload};
use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// Delivers direct messages by POSTing them to a messaging gateway.
#[derive(Debug, Clone)]
pub struct WebhookMessenger {
    http: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct DirectMessage<'a> {
    recipient_id: &'a str,
    text: String,
    payload: &'a NotificationPayload,
}

impl WebhookMessenger {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let url = settings.require_messaging_webhook_url()?.to_string();
        let timeout_secs = std::env::var("MESSAGING_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build messaging http client")?;

        Ok(Self {
            http,
            url,
            api_key: settings.messaging_api_key.clone(),
        })
    }

    fn headers(&self) -> Result<HeaderMap, CollaboratorError> {
        let mut headers = HeaderMap::new();
        if let Some(api_key) = &self.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {api_key}"))
                .map_err(|e| CollaboratorError::Permanent(format!("invalid messaging api key: {e}")))?;
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }
        Ok(headers)
    }
}

#[async_trait::async_trait]
impl Messenger for WebhookMessenger {
    async fn send_direct_message(
        &self,
        recipient_id: &str,
        payload: &NotificationPayload,
    ) -> Result<(), CollaboratorError> {
        let body = DirectMessage {
            recipient_id,
            text: payload.render_text(),
            payload,
        };
        let res = self
            .http
            .post(&self.url)
            .headers(self.headers()?)
            .json(&body)
            .send()
            .await?;

        let status = res.status();
        if status.is_success() {
            return Ok(());
        }
        let text = res.text().await.unwrap_or_default();
        Err(classify_delivery_status(status, text))
    }
}

// 403/404 mean the recipient blocked us or no longer exists; retrying cannot help.
fn classify_delivery_status(status: StatusCode, body: String) -> CollaboratorError {
    match status {
        StatusCode::FORBIDDEN | StatusCode::NOT_FOUND | StatusCode::GONE => {
            CollaboratorError::Permanent(format!("recipient unreachable (HTTP {status}): {body}"))
        }
        _ => CollaboratorError::from_status(status, body),
    }
}
