//! Retriever backed by a vector-store server.
//!
//! ```text
//! POST {base}/query       {"query": "...", "k": 5, "filter": "company_name == `Apple`"}
//!                      -> {"documents": [{"id": ..., "content": ..., "metadata": {...}, "score": 0.82}]}
//! GET  {base}/statistics  -> backend-defined object
//! ```

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::{MetadataFilter, Retriever};
use crate::document::Document;
use crate::error::{FinragError, Result};

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    query: &'a str,
    k: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    documents: Vec<Document>,
}

#[derive(Debug, Clone)]
pub struct HttpRetriever {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpRetriever {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn map_error(&self, err: reqwest::Error) -> FinragError {
        if err.is_timeout() {
            FinragError::RetrieverTimeout(self.timeout.as_secs())
        } else {
            FinragError::Retrieval(format!("{}: {err}", self.base_url))
        }
    }

    async fn check(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(FinragError::Retrieval(format!(
            "{} returned {status}: {body}",
            self.base_url
        )))
    }
}

#[async_trait]
impl Retriever for HttpRetriever {
    async fn query(&self, text: &str, k: usize, filter: Option<&MetadataFilter>) -> Result<Vec<Document>> {
        let request = QueryRequest {
            query: text,
            k,
            filter: filter.map(ToString::to_string),
        };
        debug!(url = %self.base_url, k, filter = ?request.filter, "vector store query");

        let response = self
            .client
            .post(format!("{}/query", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;
        let response = self.check(response).await?;
        let body: QueryResponse = response.json().await.map_err(|e| self.map_error(e))?;

        let mut documents = body.documents;
        documents.truncate(k);
        Ok(documents)
    }

    async fn statistics(&self) -> Result<Value> {
        let response = self
            .client
            .get(format!("{}/statistics", self.base_url))
            .send()
            .await
            .map_err(|e| self.map_error(e))?;
        let response = self.check(response).await?;
        response.json().await.map_err(|e| self.map_error(e))
    }
}
