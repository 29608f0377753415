//! Error types for the FinRAG workflows

use finrag_graph::GraphError;
use llm::LlmError;
use thiserror::Error;

/// Result type for FinRAG operations
pub type Result<T> = std::result::Result<T, FinragError>;

/// Errors raised by nodes, collaborators and the session driver
#[derive(Error, Debug)]
pub enum FinragError {
    /// Configuration could not be loaded or is inconsistent
    #[error("Configuration error: {0}")]
    Config(String),

    /// Structured LLM call failed after its retry budget
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// Graph construction or execution failed
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// The vector store did not answer in time
    #[error("Retriever timed out after {0}s")]
    RetrieverTimeout(u64),

    #[error("Retrieval error: {0}")]
    Retrieval(String),

    /// A metadata filter expression did not parse
    #[error("Invalid metadata filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("Web search error: {0}")]
    WebSearch(String),

    /// Report catalog or download failure
    #[error("Report error: {0}")]
    Report(String),

    /// KPI catalog or formula failure
    #[error("KPI error: {0}")]
    Kpi(String),

    /// Session driver misuse, e.g. responding to a finished session
    #[error("Session error: {0}")]
    Session(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FinragError {
    /// Whether the failure is a retriever timeout, which the RAG graph retries
    pub fn is_timeout(&self) -> bool {
        match self {
            FinragError::RetrieverTimeout(_) => true,
            FinragError::Http(err) => err.is_timeout(),
            _ => false,
        }
    }
}

impl From<toml::de::Error> for FinragError {
    fn from(err: toml::de::Error) -> Self {
        FinragError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_classification() {
        assert!(FinragError::RetrieverTimeout(30).is_timeout());
        assert!(!FinragError::Retrieval("down".into()).is_timeout());
    }

    #[test]
    fn test_llm_error_converts() {
        let err: FinragError = LlmError::Timeout("slow".into()).into();
        assert!(err.to_string().starts_with("LLM error"));
    }
}
