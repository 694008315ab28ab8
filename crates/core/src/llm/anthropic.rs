use crate::config::Settings;
use crate::digest::Summarizer;
use crate::domain::contract::LlmSentiment;
use crate::error::CollaboratorError;
use crate::llm::error::LlmDiagnosticsError;
use crate::llm::json;
use crate::llm::Provider;
use crate::sentiment::SentimentModel;
use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, SemaphorePermit};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-3-5-haiku-latest";
const DEFAULT_MAX_TOKENS: u32 = 1024;
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAX_CONCURRENCY: usize = 4;
const SENTIMENT_MAX_TOKENS: u32 = 128;

const TOOL_NAME_EMIT_SENTIMENT: &str = "emit_sentiment";

/// Messages API client used both for per-article sentiment and for digests.
///
/// Every request holds a permit from a shared limiter, so clones of the client together stay
/// under `ANTHROPIC_MAX_CONCURRENCY` in-flight calls.
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    limiter: Arc<Semaphore>,
    max_concurrency: usize,
}

impl AnthropicClient {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let api_key = settings.require_anthropic_api_key()?.to_string();
        let base_url =
            std::env::var("ANTHROPIC_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = std::env::var("ANTHROPIC_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let max_tokens = std::env::var("ANTHROPIC_MAX_TOKENS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_MAX_TOKENS);

        let timeout_secs = std::env::var("ANTHROPIC_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let max_concurrency = std::env::var("ANTHROPIC_MAX_CONCURRENCY")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_CONCURRENCY);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            http,
            api_key,
            base_url,
            model,
            max_tokens,
            limiter: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
        })
    }

    /// Upper bound on concurrent requests; the worker pool is sized against it.
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Waits for one of the `max_concurrency` request slots shared by every clone.
    async fn acquire_slot(&self, stage: &'static str) -> Result<SemaphorePermit<'_>, LlmDiagnosticsError> {
        self.limiter.acquire().await.map_err(|_| {
            LlmDiagnosticsError::new(Provider::Anthropic, stage, "request limiter closed")
        })
    }

    async fn create_message(
        &self,
        req: CreateMessageRequest,
        stage: &'static str,
    ) -> Result<CreateMessageResponse, LlmDiagnosticsError> {
        let diag = |detail: String| LlmDiagnosticsError::new(Provider::Anthropic, stage, detail);

        let _permit = self.acquire_slot(stage).await?;

        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.api_key).map_err(|e| diag(format!("invalid api key: {e}")))?,
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );

        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let res = self
            .http
            .post(url)
            .headers(headers)
            .json(&req)
            .send()
            .await
            .map_err(|e| LlmDiagnosticsError::new(Provider::Anthropic, "request", e.to_string()))?;

        let status = res.status();
        let text = res
            .text()
            .await
            .map_err(|e| LlmDiagnosticsError::new(Provider::Anthropic, "request", e.to_string()))?;
        if !status.is_success() {
            let raw_response_json = serde_json::from_str::<serde_json::Value>(&text).ok();
            return Err(LlmDiagnosticsError {
                provider: Provider::Anthropic,
                stage: "http",
                status: Some(status.as_u16()),
                detail: format!("status={status}"),
                raw_output: Some(text),
                raw_response_json,
            });
        }

        let parsed = serde_json::from_str::<CreateMessageResponse>(&text).map_err(|e| {
            diag(format!("failed to decode Anthropic response: {e}")).with_raw_output(text.clone())
        })?;
        Ok(parsed)
    }

    fn sentiment_tools() -> Vec<Tool> {
        let schema = serde_json::json!({
            "type": "object",
            "additionalProperties": false,
            "required": ["score"],
            "properties": {
                "score": {"type": "number", "minimum": -1.0, "maximum": 1.0}
            }
        });

        vec![Tool {
            name: TOOL_NAME_EMIT_SENTIMENT,
            description: "Emit the sentiment score of the news text",
            input_schema: schema,
        }]
    }

    fn tool_choice() -> ToolChoice {
        ToolChoice::Tool {
            name: TOOL_NAME_EMIT_SENTIMENT,
        }
    }

    fn sentiment_system_prompt() -> String {
        [
            "You are a financial news sentiment classifier.",
            "Rate how the text reads for the company's stock on a scale from -1.0 (very negative)",
            "through 0.0 (neutral) to 1.0 (very positive).",
            "Respond only with the emit_sentiment tool. If tools are unavailable, return ONLY",
            "a JSON object of the form {\"score\": 0.0} with no prose.",
        ]
        .join("\n")
    }

    fn summary_system_prompt(max_length: usize) -> String {
        [
            "You summarize recent financial news about a single company.".to_string(),
            format!("Write one plain-prose paragraph of at most {max_length} words."),
            "Do not use markdown, bullet points or headings. Do not speculate beyond the text."
                .to_string(),
        ]
        .join("\n")
    }

    fn sentiment_request(&self, text: &str) -> CreateMessageRequest {
        CreateMessageRequest {
            model: self.model.clone(),
            max_tokens: SENTIMENT_MAX_TOKENS,
            system: Some(Self::sentiment_system_prompt()),
            messages: vec![Message {
                role: "user",
                content: format!("News text:\n{text}"),
            }],
            tools: Some(Self::sentiment_tools()),
            tool_choice: Some(Self::tool_choice()),
        }
    }

    fn summary_request(&self, texts: &[String], max_length: usize) -> CreateMessageRequest {
        let words = u32::try_from(max_length).unwrap_or(u32::MAX);
        CreateMessageRequest {
            model: self.model.clone(),
            max_tokens: words.saturating_mul(2).max(256).min(self.max_tokens),
            system: Some(Self::summary_system_prompt(max_length)),
            messages: vec![Message {
                role: "user",
                content: format!("Articles, most recent first:\n\n{}", texts.join("\n\n")),
            }],
            tools: None,
            tool_choice: None,
        }
    }

    fn response_text(res: &CreateMessageResponse) -> String {
        let mut out = String::new();
        for block in &res.content {
            match block {
                ContentBlock::Text { text } => {
                    if !out.is_empty() {
                        out.push('\n');
                    }
                    out.push_str(text);
                }
                // Thinking and other block types carry no answer text.
                ContentBlock::ToolUse { .. } | ContentBlock::Unknown => {}
            }
        }
        out
    }

    fn response_tool_sentiment(
        res: &CreateMessageResponse,
    ) -> Result<Option<f64>, LlmDiagnosticsError> {
        for block in &res.content {
            if let ContentBlock::ToolUse { name, input } = block {
                if name == TOOL_NAME_EMIT_SENTIMENT {
                    let score = serde_json::from_value::<LlmSentiment>(input.clone())
                        .map_err(anyhow::Error::from)
                        .and_then(LlmSentiment::validate)
                        .map_err(|e| {
                            LlmDiagnosticsError::new(Provider::Anthropic, "tool_input", e.to_string())
                                .with_raw_output(input.to_string())
                        })?;
                    return Ok(Some(score));
                }
            }
        }
        Ok(None)
    }

    fn parse_sentiment_response(res: &CreateMessageResponse) -> Result<f64, LlmDiagnosticsError> {
        if let Some(score) = Self::response_tool_sentiment(res)? {
            return Ok(score);
        }

        // Fallback to text (should be rare).
        let text = Self::response_text(res);
        json::parse_sentiment(&text).map_err(|e| {
            LlmDiagnosticsError::new(Provider::Anthropic, "parse", format!("{e:#}"))
                .with_raw_output(text)
        })
    }
}

#[async_trait::async_trait]
impl SentimentModel for AnthropicClient {
    async fn score_text(&self, text: &str) -> Result<f64, CollaboratorError> {
        let res = self
            .create_message(self.sentiment_request(text), "sentiment")
            .await?;
        Ok(Self::parse_sentiment_response(&res)?)
    }
}

#[async_trait::async_trait]
impl Summarizer for AnthropicClient {
    async fn summarize(&self, texts: &[String], max_length: usize) -> Result<String, CollaboratorError> {
        let res = self
            .create_message(self.summary_request(texts, max_length), "summary")
            .await?;
        if matches!(res.stop_reason.as_deref(), Some("max_tokens")) {
            tracing::warn!("Anthropic stop_reason=max_tokens; summary may be cut short");
        }
        let text = Self::response_text(&res);
        if text.trim().is_empty() {
            return Err(LlmDiagnosticsError::new(Provider::Anthropic, "summary", "empty summary").into());
        }
        Ok(text)
    }
}

#[derive(Debug, Clone, Serialize)]
struct CreateMessageRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,

    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoice>,
}

#[derive(Debug, Clone, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CreateMessageResponse {
    content: Vec<ContentBlock>,

    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct Tool {
    name: &'static str,
    description: &'static str,
    input_schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
enum ToolChoice {
    #[serde(rename = "tool")]
    Tool { name: &'static str },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "tool_use")]
    ToolUse {
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },

    #[serde(other)]
    Unknown,
}
