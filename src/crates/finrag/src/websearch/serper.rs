//! Serper (Google search) API.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{web_document, with_retries, ProviderError, WebSearch};
use crate::document::Document;
use crate::error::{FinragError, Result};

const SERPER_URL: &str = "https://google.serper.dev/search";

#[derive(Debug, Serialize)]
struct SerperRequest<'a> {
    q: &'a str,
    num: usize,
}

#[derive(Debug, Deserialize)]
struct SerperResponse {
    #[serde(default)]
    organic: Vec<SerperResult>,
}

#[derive(Debug, Deserialize)]
struct SerperResult {
    #[serde(default)]
    title: String,
    link: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    position: Option<u32>,
}

pub struct SerperSearch {
    api_key: String,
    client: Client,
    endpoint: String,
}

impl SerperSearch {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            api_key: api_key.into(),
            client: Client::builder().timeout(timeout).build()?,
            endpoint: SERPER_URL.to_string(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn execute(&self, request: &SerperRequest<'_>) -> std::result::Result<SerperResponse, ProviderError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("X-API-KEY", &self.api_key)
            .json(request)
            .send()
            .await
            .map_err(ProviderError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), body));
        }
        response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))
    }
}

/// Serper has no relevance score; rank position stands in for it
fn to_documents(response: SerperResponse) -> Vec<Document> {
    response
        .organic
        .into_iter()
        .enumerate()
        .map(|(index, r)| {
            let rank = r.position.unwrap_or(index as u32 + 1).max(1);
            web_document(&r.link, &r.title, &r.snippet, 1.0 / rank as f32)
        })
        .collect()
}

#[async_trait]
impl WebSearch for SerperSearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<Document>> {
        let request = SerperRequest { q: query, num: max_results };
        let response = with_retries("serper", || self.execute(&request))
            .await
            .map_err(|e| FinragError::WebSearch(format!("serper: {e}")))?;
        let documents = to_documents(response);
        debug!(query, results = documents.len(), "serper search");
        Ok(documents)
    }

    fn name(&self) -> &str {
        "serper"
    }
}
