//! Error types for LLM clients.

use thiserror::Error;

/// Result type for LLM operations.
pub type Result<T> = std::result::Result<T, LlmError>;

/// Errors that can occur when invoking a structured LLM.
#[derive(Debug, Error)]
pub enum LlmError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Failed to serialize/deserialize data.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// API authentication failed.
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    /// API key not found in environment.
    #[error("API key not found: {0}")]
    ApiKeyNotFound(String),

    /// Provider service unavailable (5xx, overloaded).
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Rate limit exceeded.
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Invalid request parameters.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The provider answered, but not with a JSON payload.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The payload did not match the requested schema.
    #[error("Response for task '{task}' does not match its schema: {reason}")]
    SchemaMismatch { task: String, reason: String },

    /// Request timeout.
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// General provider error.
    #[error("Provider error: {0}")]
    ProviderError(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A scripted client has nothing for this task.
    #[error("No scripted response: {0}")]
    Unscripted(String),
}

impl LlmError {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::HttpError(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            LlmError::ServiceUnavailable(_)
            | LlmError::Timeout(_)
            | LlmError::RateLimitExceeded(_)
            | LlmError::InvalidResponse(_) => true,
            _ => false,
        }
    }

    /// Check if this error is due to authentication.
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            LlmError::AuthenticationError(_) | LlmError::ApiKeyNotFound(_)
        )
    }

    /// Map a non-success HTTP status to an error.
    pub(crate) fn from_status(provider: &str, status: reqwest::StatusCode, body: String) -> Self {
        match status.as_u16() {
            401 | 403 => LlmError::AuthenticationError(body),
            408 => LlmError::Timeout(body),
            429 => LlmError::RateLimitExceeded(body),
            400 | 422 => LlmError::InvalidRequest(body),
            code if code >= 500 => {
                LlmError::ServiceUnavailable(format!("{provider} API error {status}: {body}"))
            }
            _ => LlmError::ProviderError(format!("{provider} API error {status}: {body}")),
        }
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        LlmError::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(LlmError::RateLimitExceeded("slow down".into()).is_retryable());
        assert!(LlmError::Timeout("60s".into()).is_retryable());
        assert!(!LlmError::AuthenticationError("bad key".into()).is_retryable());
        assert!(!LlmError::SchemaMismatch {
            task: "grade".into(),
            reason: "missing field".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_status_mapping() {
        let err = LlmError::from_status("OpenAI", reqwest::StatusCode::TOO_MANY_REQUESTS, "later".into());
        assert!(matches!(err, LlmError::RateLimitExceeded(_)));
        let err = LlmError::from_status("Anthropic", reqwest::StatusCode::BAD_GATEWAY, String::new());
        assert!(err.is_retryable());
        assert!(LlmError::from_status("OpenAI", reqwest::StatusCode::UNAUTHORIZED, String::new()).is_auth_error());
    }
}
