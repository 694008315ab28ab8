use crate::error::CollaboratorError;
use crate::llm::Provider;
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone)]
pub struct LlmDiagnosticsError {
    pub provider: Provider,
    pub stage: &'static str,
    /// HTTP status when the provider answered with one.
    pub status: Option<u16>,
    pub detail: String,
    pub raw_output: Option<String>,
    pub raw_response_json: Option<Value>,
}

impl LlmDiagnosticsError {
    pub fn new(provider: Provider, stage: &'static str, detail: impl Into<String>) -> Self {
        Self {
            provider,
            stage,
            status: None,
            detail: detail.into(),
            raw_output: None,
            raw_response_json: None,
        }
    }

    pub fn with_raw_output(mut self, raw_output: impl Into<String>) -> Self {
        self.raw_output = Some(raw_output.into());
        self
    }

    /// Transport failures, rate limits and provider overload are worth retrying; malformed
    /// output and rejected requests are not.
    pub fn is_transient(&self) -> bool {
        match (self.stage, self.status) {
            ("request", _) => true,
            (_, Some(status)) => matches!(status, 408 | 429 | 500..=599),
            _ => false,
        }
    }
}

impl fmt::Display for LlmDiagnosticsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LLM error (provider={:?}, stage={}",
            self.provider, self.stage
        )?;
        if let Some(status) = self.status {
            write!(f, ", status={status}")?;
        }
        write!(f, "): {}", self.detail)
    }
}

impl std::error::Error for LlmDiagnosticsError {}

impl From<LlmDiagnosticsError> for CollaboratorError {
    fn from(err: LlmDiagnosticsError) -> Self {
        if let Some(raw) = err.raw_output.as_deref() {
            tracing::debug!(stage = err.stage, raw_output = raw, "LLM raw output");
        }
        if err.is_transient() {
            CollaboratorError::Transient(err.to_string())
        } else {
            CollaboratorError::Permanent(err.to_string())
        }
    }
}
