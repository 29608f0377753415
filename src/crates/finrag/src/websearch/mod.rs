//! Web search with provider fallback.
//!
//! The RAG graph falls back to the web when the filings cannot answer. Up to
//! three providers are tried in order; the first non-empty result wins and
//! every failure is logged.

pub mod serper;
pub mod tavily;

pub use serper::SerperSearch;
pub use tavily::TavilySearch;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{WebProviderKind, WebSearchConfig};
use crate::document::{Document, DocumentMetadata, WEB_ID_PREFIX};
use crate::error::{FinragError, Result};

/// Providers consulted per search
pub const MAX_WEB_PROVIDERS: usize = 3;

/// Retry attempts per provider for transient failures
const MAX_PROVIDER_RETRIES: u32 = 2;

const RETRY_BASE_DELAY_MS: u64 = 500;

/// A web search backend
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<Document>>;

    /// Provider name, for logs
    fn name(&self) -> &str;
}

/// Typed provider failures
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid API key")]
    Unauthorized,

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("server error ({0}): {1}")]
    ServerError(u16, String),

    #[error("HTTP {0}: {1}")]
    Http(u16, String),

    #[error("failed to parse response: {0}")]
    Parse(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Timeout
                | ProviderError::Network(_)
                | ProviderError::RateLimited
                | ProviderError::ServerError(_, _)
        )
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else if err.is_decode() {
            ProviderError::Parse(err.to_string())
        } else {
            ProviderError::Network(err.to_string())
        }
    }

    pub(crate) fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => ProviderError::Unauthorized,
            429 => ProviderError::RateLimited,
            400 => ProviderError::BadRequest(body),
            500..=599 => ProviderError::ServerError(status, body),
            _ => ProviderError::Http(status, body),
        }
    }
}

/// Run `attempt` with exponential backoff on retryable failures
pub(crate) async fn with_retries<T, F, Fut>(provider: &str, mut attempt: F) -> std::result::Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, ProviderError>>,
{
    let mut retry = 0;
    loop {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && retry < MAX_PROVIDER_RETRIES => {
                let delay = Duration::from_millis(RETRY_BASE_DELAY_MS * 2u64.pow(retry));
                retry += 1;
                warn!(provider, retry, delay_ms = delay.as_millis() as u64, error = %err, "web search failed, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Build the [`Document`] for one web hit
pub fn web_document(url: &str, title: &str, snippet: &str, score: f32) -> Document {
    let content = if title.is_empty() {
        snippet.to_string()
    } else {
        format!("{title}\n{snippet}")
    };
    Document::new(format!("{WEB_ID_PREFIX}{url}"), content)
        .with_metadata(DocumentMetadata {
            source: Some(url.to_string()),
            ..Default::default()
        })
        .with_score(score)
}

/// Tries providers in order
#[derive(Clone, Default)]
pub struct FallbackWebSearch {
    providers: Vec<Arc<dyn WebSearch>>,
}

impl FallbackWebSearch {
    /// Keeps the first [`MAX_WEB_PROVIDERS`] providers
    pub fn new(mut providers: Vec<Arc<dyn WebSearch>>) -> Self {
        if providers.len() > MAX_WEB_PROVIDERS {
            warn!(
                configured = providers.len(),
                used = MAX_WEB_PROVIDERS,
                "too many web search providers, ignoring the rest"
            );
            providers.truncate(MAX_WEB_PROVIDERS);
        }
        Self { providers }
    }

    /// Providers from config; entries without a resolvable key are skipped
    pub fn from_config(config: &WebSearchConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let mut providers: Vec<Arc<dyn WebSearch>> = Vec::new();
        for provider in &config.providers {
            let Some(key) = provider.resolve_key() else {
                warn!(provider = ?provider.kind, "no API key for web search provider, skipping");
                continue;
            };
            let search: Arc<dyn WebSearch> = match provider.kind {
                WebProviderKind::Tavily => Arc::new(TavilySearch::new(key, timeout)?),
                WebProviderKind::Serper => Arc::new(SerperSearch::new(key, timeout)?),
            };
            providers.push(search);
        }
        Ok(Self::new(providers))
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }
}

#[async_trait]
impl WebSearch for FallbackWebSearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<Document>> {
        let mut last_error: Option<FinragError> = None;
        let mut answered = false;
        for provider in &self.providers {
            match provider.search(query, max_results).await {
                Ok(documents) if !documents.is_empty() => {
                    debug!(provider = provider.name(), results = documents.len(), "web search answered");
                    let mut documents = documents;
                    documents.truncate(max_results);
                    return Ok(documents);
                }
                Ok(_) => {
                    answered = true;
                    warn!(provider = provider.name(), "web search returned nothing, trying next provider");
                }
                Err(err) => {
                    warn!(provider = provider.name(), error = %err, "web search failed, trying next provider");
                    last_error = Some(err);
                }
            }
        }
        match last_error {
            Some(err) if !answered => Err(err),
            _ => Ok(Vec::new()),
        }
    }

    fn name(&self) -> &str {
        "fallback"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        name: &'static str,
        results: Vec<Document>,
        fail: bool,
        calls: AtomicUsize,
    }

    impl Fixed {
        fn new(name: &'static str, results: Vec<Document>, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                results,
                fail,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl WebSearch for Fixed {
        async fn search(&self, _query: &str, _max: usize) -> Result<Vec<Document>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(FinragError::WebSearch(format!("{} down", self.name)))
            } else {
                Ok(self.results.clone())
            }
        }

        fn name(&self) -> &str {
            self.name
        }
    }

    #[tokio::test]
    async fn test_first_non_empty_wins() {
        let broken = Fixed::new("broken", vec![], true);
        let empty = Fixed::new("empty", vec![], false);
        let good = Fixed::new("good", vec![web_document("https://a.example", "A", "alpha", 0.9)], false);
        let unused = Fixed::new("unused", vec![web_document("https://b.example", "B", "beta", 0.9)], false);

        let providers: Vec<Arc<dyn WebSearch>> = vec![broken, empty, good, unused.clone()];
        let search = FallbackWebSearch::new(providers);
        assert_eq!(search.provider_names(), vec!["broken", "empty", "good"]);

        let docs = search.search("apple revenue", 5).await.unwrap();
        assert_eq!(docs[0].id, "web:https://a.example");
        assert!(docs[0].is_web());
        assert_eq!(unused.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_all_empty_is_empty() {
        let providers: Vec<Arc<dyn WebSearch>> =
            vec![Fixed::new("broken", vec![], true), Fixed::new("empty", vec![], false)];
        let search = FallbackWebSearch::new(providers);
        assert!(search.search("q", 3).await.unwrap().is_empty());

        let only_broken: Vec<Arc<dyn WebSearch>> = vec![Fixed::new("broken", vec![], true)];
        assert!(FallbackWebSearch::new(only_broken).search("q", 3).await.is_err());
        assert!(FallbackWebSearch::default().search("q", 3).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_only_transient_errors() {
        let calls = AtomicUsize::new(0);
        let result: std::result::Result<(), ProviderError> = with_retries("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ProviderError::RateLimited) }
        })
        .await;
        assert!(matches!(result, Err(ProviderError::RateLimited)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let calls = AtomicUsize::new(0);
        let result: std::result::Result<(), ProviderError> = with_retries("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ProviderError::Unauthorized) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(ProviderError::from_status(401, String::new()), ProviderError::Unauthorized));
        assert!(ProviderError::from_status(503, String::new()).is_retryable());
        assert!(!ProviderError::from_status(400, "bad".into()).is_retryable());
    }
}
