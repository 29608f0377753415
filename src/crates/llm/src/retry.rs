//! Retrying wrapper.

use crate::error::Result;
use crate::structured::{StructuredLlm, StructuredRequest};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

/// Retry budget for a structured call
pub const MAX_RETRIES_ANTHROPIC: u32 = 5;

/// Retries retryable failures of an inner client with exponential backoff.
///
/// Non-retryable errors (authentication, schema mismatch, bad request) are
/// returned immediately.
#[derive(Clone)]
pub struct RetryingLlm {
    inner: Arc<dyn StructuredLlm>,
    max_retries: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl RetryingLlm {
    pub fn new(inner: Arc<dyn StructuredLlm>) -> Self {
        Self {
            inner,
            max_retries: MAX_RETRIES_ANTHROPIC,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    fn delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

#[async_trait]
impl StructuredLlm for RetryingLlm {
    async fn invoke(&self, request: StructuredRequest) -> Result<Value> {
        let mut retry = 0;
        loop {
            match self.inner.invoke(request.clone()).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && retry < self.max_retries => {
                    let delay = self.delay(retry);
                    retry += 1;
                    warn!(
                        task = %request.task,
                        retry,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "LLM call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    error!(task = %request.task, retries = retry, error = %err, "LLM call failed");
                    return Err(err);
                }
            }
        }
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}
