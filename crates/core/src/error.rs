use std::time::Duration;
use thiserror::Error;

/// Failure reported by an external collaborator (news source, inference, summarization,
/// messaging). Only transient failures are worth retrying.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl CollaboratorError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn timed_out(what: &str, after: Duration) -> Self {
        Self::Transient(format!("{what} timed out after {after:?}"))
    }

    /// Classifies an HTTP status. Rate limiting, request timeouts and server errors are
    /// transient; every other client error is permanent.
    pub fn from_status(status: reqwest::StatusCode, detail: impl Into<String>) -> Self {
        let detail = format!("HTTP {status}: {}", detail.into());
        if status.is_server_error()
            || status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || status == reqwest::StatusCode::REQUEST_TIMEOUT
        {
            Self::Transient(detail)
        } else {
            Self::Permanent(detail)
        }
    }
}

impl From<reqwest::Error> for CollaboratorError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::from_status(status, err.to_string()),
            None if err.is_decode() || err.is_builder() => Self::Permanent(err.to_string()),
            None => Self::Transient(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn status_classification() {
        assert!(CollaboratorError::from_status(StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(CollaboratorError::from_status(StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(!CollaboratorError::from_status(StatusCode::NOT_FOUND, "").is_transient());
        assert!(!CollaboratorError::from_status(StatusCode::FORBIDDEN, "").is_transient());
    }

    #[test]
    fn timeout_is_transient() {
        let err = CollaboratorError::timed_out("news source", Duration::from_secs(5));
        assert!(err.is_transient());
        assert!(err.to_string().contains("news source timed out"));
    }
}
