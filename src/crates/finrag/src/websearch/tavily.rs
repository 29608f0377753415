//! Tavily search API.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{web_document, with_retries, ProviderError, WebSearch};
use crate::document::Document;
use crate::error::{FinragError, Result};

const TAVILY_URL: &str = "https://api.tavily.com/search";

#[derive(Debug, Serialize)]
struct TavilyRequest<'a> {
    query: &'a str,
    max_results: usize,
    search_depth: &'static str,
    topic: &'static str,
    include_answer: bool,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    score: f32,
}

pub struct TavilySearch {
    api_key: String,
    client: Client,
    endpoint: String,
}

impl TavilySearch {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            api_key: api_key.into(),
            client: Client::builder().timeout(timeout).build()?,
            endpoint: TAVILY_URL.to_string(),
        })
    }

    /// Point at another endpoint, e.g. a proxy
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn execute(&self, request: &TavilyRequest<'_>) -> std::result::Result<TavilyResponse, ProviderError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
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

fn to_documents(response: TavilyResponse) -> Vec<Document> {
    response
        .results
        .into_iter()
        .map(|r| web_document(&r.url, &r.title, &r.content, r.score))
        .collect()
}

#[async_trait]
impl WebSearch for TavilySearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<Document>> {
        let request = TavilyRequest {
            query,
            max_results,
            search_depth: "basic",
            topic: "general",
            include_answer: false,
        };
        let response = with_retries("tavily", || self.execute(&request))
            .await
            .map_err(|e| FinragError::WebSearch(format!("tavily: {e}")))?;
        let documents = to_documents(response);
        debug!(query, results = documents.len(), "tavily search");
        Ok(documents)
    }

    fn name(&self) -> &str {
        "tavily"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_to_documents() {
        let response: TavilyResponse = serde_json::from_value(json!({
            "query": "apple revenue 2022",
            "results": [
                {"title": "Apple 10-K", "url": "https://sec.example/aapl", "content": "Net sales $394.3B", "score": 0.93},
                {"url": "https://news.example/aapl", "content": "Revenue rose"}
            ]
        }))
        .unwrap();
        let docs = to_documents(response);
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].id, "web:https://sec.example/aapl");
        assert_eq!(docs[0].content, "Apple 10-K\nNet sales $394.3B");
        assert_eq!(docs[0].metadata.source.as_deref(), Some("https://sec.example/aapl"));
        assert_eq!(docs[1].content, "Revenue rose");
    }

    #[test]
    fn test_request_shape() {
        let request = TavilyRequest {
            query: "q",
            max_results: 5,
            search_depth: "basic",
            topic: "general",
            include_answer: false,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["max_results"], 5);
        assert!(value.get("api_key").is_none());
    }
}
