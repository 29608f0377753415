//! Export of finished execution trees to an observability endpoint.

use async_trait::async_trait;
use finrag_graph::{GraphError, LogTreeEdge, TraceSink};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::config::ObservabilityConfig;
use crate::error::Result;

#[derive(Serialize)]
struct TracePayload<'a> {
    edges: &'a [LogTreeEdge],
}

/// POSTs `{"edges": [...]}` to a fixed URL
#[derive(Debug, Clone)]
pub struct HttpTraceSink {
    client: Client,
    endpoint: String,
}

impl HttpTraceSink {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            endpoint: endpoint.into(),
        })
    }

    /// Sink for the configured endpoint; `None` when export is off
    pub fn from_config(config: &ObservabilityConfig) -> Result<Option<Self>> {
        match config.endpoint.as_deref().map(str::trim).filter(|e| !e.is_empty()) {
            Some(endpoint) => Ok(Some(Self::new(endpoint, Duration::from_secs(config.timeout_secs))?)),
            None => Ok(None),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl TraceSink for HttpTraceSink {
    async fn export(&self, edges: &[LogTreeEdge]) -> finrag_graph::Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&TracePayload { edges })
            .send()
            .await
            .map_err(|e| GraphError::Trace(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(GraphError::Trace(format!("{} answered {status}", self.endpoint)));
        }
        debug!(edges = edges.len(), endpoint = %self.endpoint, "execution tree exported");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_endpoint_means_no_sink() {
        assert!(HttpTraceSink::from_config(&ObservabilityConfig::default()).unwrap().is_none());

        let blank = ObservabilityConfig {
            endpoint: Some("  ".into()),
            timeout_secs: 5,
        };
        assert!(HttpTraceSink::from_config(&blank).unwrap().is_none());

        let set = ObservabilityConfig {
            endpoint: Some("http://localhost:4318/trees".into()),
            timeout_secs: 5,
        };
        let sink = HttpTraceSink::from_config(&set).unwrap().unwrap();
        assert_eq!(sink.endpoint(), "http://localhost:4318/trees");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_trace_error() {
        let sink = HttpTraceSink::new("http://127.0.0.1:9/trees", Duration::from_millis(500)).unwrap();
        let result = sink.export(&[]).await;
        assert!(matches!(result, Err(GraphError::Trace(_))));
    }
}
