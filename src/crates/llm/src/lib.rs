//! Structured-output LLM clients for FinRAG.
//!
//! The orchestration core never reads free text from a model. Every call asks
//! for a value conforming to a JSON schema derived from a Rust type, through the
//! [`StructuredLlm`] trait:
//!
//! - [`remote::ClaudeClient`] - Anthropic messages API, forced tool use
//! - [`remote::OpenAiClient`] - OpenAI-compatible chat completions
//! - [`RetryingLlm`] - exponential backoff on retryable failures
//! - [`ScriptedLlm`] - deterministic test double keyed by task name
//!
//! # Example
//!
//! ```rust,ignore
//! use llm::{build_client, ProviderKind, RemoteLlmConfig, StructuredLlmExt};
//!
//! #[derive(serde::Deserialize, schemars::JsonSchema)]
//! struct Verdict { safe: bool, reason: String }
//!
//! let config = RemoteLlmConfig::from_env("ANTHROPIC_API_KEY", "https://api.anthropic.com", "claude-sonnet-4-5")?;
//! let llm = build_client(ProviderKind::Anthropic, config)?;
//! let verdict: Verdict = llm.structured("safety_check", "Flag unsafe requests.", "hello").await?;
//! ```

pub mod config;
pub mod error;
pub mod retry;
pub mod scripted;
pub mod structured;

#[cfg(feature = "remote")]
pub mod remote;

pub use config::{ProviderKind, RemoteLlmConfig};
pub use error::{LlmError, Result};
pub use retry::{RetryingLlm, MAX_RETRIES_ANTHROPIC};
pub use scripted::{Responder, ScriptedLlm};
pub use structured::{invoke_structured, StructuredLlm, StructuredLlmExt, StructuredRequest};

use std::sync::Arc;

/// Client for `provider`, wrapped in a [`RetryingLlm`] using the config's retry budget
#[cfg(feature = "remote")]
pub fn build_client(provider: ProviderKind, config: RemoteLlmConfig) -> Result<Arc<dyn StructuredLlm>> {
    let max_retries = config.max_retries;
    let inner: Arc<dyn StructuredLlm> = match provider {
        ProviderKind::Anthropic => Arc::new(remote::ClaudeClient::new(config)?),
        ProviderKind::OpenAi => Arc::new(remote::OpenAiClient::new(config)?),
    };
    Ok(Arc::new(RetryingLlm::new(inner).with_max_retries(max_retries)))
}
