//! Configuration schema for FinRAG

use llm::ProviderKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{FinragError, Result};

/// Main FinRAG configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct FinragConfig {
    /// Stage toggles
    #[serde(default)]
    pub workflow: WorkflowSettings,

    /// Retry budgets and fan-out caps
    #[serde(default)]
    pub limits: Limits,

    /// Vector store connection
    #[serde(default)]
    pub retriever: RetrieverConfig,

    /// In-process answer cache
    #[serde(default)]
    pub cache: CacheConfig,

    /// LLM provider
    #[serde(default)]
    pub llm: LlmSettings,

    /// Web search providers, tried in order
    #[serde(default)]
    pub web_search: WebSearchConfig,

    /// Execution-tree export
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Filesystem locations
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Stage toggles threaded into the graph builders
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkflowSettings {
    pub metadata_filtering: bool,
    pub reranking: bool,
    pub document_grading: bool,
    pub hyde: bool,
    pub hallucination_check: bool,
    pub answer_grading: bool,
    pub web_fallback: bool,
    /// Fold the attached image description into the query
    pub vision: bool,
    pub question_expansion: bool,
    pub clarification: bool,
    pub safety_check: bool,
    pub follow_ups: bool,
    /// Persona/analysis paths and the analysis-selection interrupt
    pub analysis: bool,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            metadata_filtering: true,
            reranking: false,
            document_grading: true,
            hyde: true,
            hallucination_check: true,
            answer_grading: true,
            web_fallback: true,
            vision: true,
            question_expansion: false,
            clarification: true,
            safety_check: true,
            follow_ups: true,
            analysis: true,
        }
    }
}

/// Retry budgets, thresholds and fan-out caps
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Limits {
    /// Relevant documents needed before generating
    pub docs_relevance_threshold: usize,
    pub max_doc_grading_retries: u32,
    pub max_metadata_filtering_retries: u32,
    pub max_hallucination_retries: u32,
    pub max_answer_generation_retries: u32,
    pub max_retriever_retries: u32,
    pub max_web_search_results: usize,
    /// Clarifier entries per session, the terminating `none` included
    pub max_clarifying_questions: usize,
    pub max_decomposition_critiques: u32,
    pub max_repeater_passes: u32,
    pub max_personas: usize,
    pub max_questions_per_persona: usize,
    pub max_supervisor_questions: usize,
    pub max_follow_ups: usize,
    /// Session-level retries after a node escalates
    pub max_session_retries: u32,
    /// Worker pool width for document grading and KPI lookups
    pub grading_concurrency: usize,
    /// Executor-level re-runs of a failing node
    pub node_retries: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            docs_relevance_threshold: 1,
            max_doc_grading_retries: 2,
            max_metadata_filtering_retries: 2,
            max_hallucination_retries: 1,
            max_answer_generation_retries: 1,
            max_retriever_retries: 2,
            max_web_search_results: 5,
            max_clarifying_questions: 3,
            max_decomposition_critiques: 3,
            max_repeater_passes: 3,
            max_personas: 4,
            max_questions_per_persona: 3,
            max_supervisor_questions: 5,
            max_follow_ups: 3,
            max_session_retries: 2,
            grading_concurrency: 4,
            node_retries: 0,
        }
    }
}

/// Address of one vector-store server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
}

impl ServerAddress {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Vector store connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrieverConfig {
    #[serde(default = "default_retriever_host")]
    pub host: String,

    #[serde(default = "default_retriever_port")]
    pub port: u16,

    /// Extra servers queried alongside the primary one
    #[serde(default)]
    pub servers: Vec<ServerAddress>,

    /// Per-call budget (VECTOR_STORE_TIMEOUT)
    #[serde(default = "default_retriever_timeout")]
    pub timeout_secs: u64,

    /// Documents per query (NUM_DOCS_TO_RETRIEVE)
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_retriever_host() -> String {
    "127.0.0.1".to_string()
}

fn default_retriever_port() -> u16 {
    8001
}

fn default_retriever_timeout() -> u64 {
    30
}

fn default_top_k() -> usize {
    5
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            host: default_retriever_host(),
            port: default_retriever_port(),
            servers: Vec::new(),
            timeout_secs: default_retriever_timeout(),
            top_k: default_top_k(),
        }
    }
}

impl RetrieverConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Primary server followed by the extra ones
    pub fn addresses(&self) -> Vec<ServerAddress> {
        let mut addresses = vec![ServerAddress {
            host: self.host.clone(),
            port: self.port,
        }];
        addresses.extend(self.servers.iter().cloned());
        addresses
    }
}

/// Answer cache
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 256,
        }
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmSettings {
    pub provider: ProviderKind,
    pub model: String,

    /// Custom endpoint, provider default when unset
    pub base_url: Option<String>,

    /// Inline key, supports `${VAR}`
    pub api_key: Option<String>,

    /// Environment variable read when `api_key` is unset
    pub api_key_env: String,

    pub timeout_secs: u64,
    pub max_retries: u32,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Anthropic,
            model: "claude-sonnet-4-5".to_string(),
            base_url: None,
            api_key: None,
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            timeout_secs: 120,
            max_retries: llm::MAX_RETRIES_ANTHROPIC,
            max_tokens: 4096,
            temperature: 0.0,
        }
    }
}

/// Supported web search backends
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WebProviderKind {
    Tavily,
    Serper,
}

impl WebProviderKind {
    pub fn default_key_env(&self) -> &'static str {
        match self {
            WebProviderKind::Tavily => "TAVILY_API_KEY",
            WebProviderKind::Serper => "SERPER_API_KEY",
        }
    }
}

/// One web search provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebProviderConfig {
    pub kind: WebProviderKind,

    /// Inline key, supports `${VAR}`
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable read when `api_key` is unset
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl WebProviderConfig {
    /// Resolved key, `None` when neither the inline key nor the variable is set
    pub fn resolve_key(&self) -> Option<String> {
        if let Some(key) = self.api_key.as_ref().filter(|k| !k.is_empty() && !k.starts_with("${")) {
            return Some(key.clone());
        }
        let var = self
            .api_key_env
            .clone()
            .unwrap_or_else(|| self.kind.default_key_env().to_string());
        std::env::var(var).ok().filter(|k| !k.is_empty())
    }
}

/// Web search configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WebSearchConfig {
    /// Providers in fallback order, at most three are used
    pub providers: Vec<WebProviderConfig>,
    pub timeout_secs: u64,
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            providers: vec![WebProviderConfig {
                kind: WebProviderKind::Tavily,
                api_key: None,
                api_key_env: None,
            }],
            timeout_secs: 20,
        }
    }
}

/// Execution-tree export
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// POST target for finished execution trees, export is off when unset
    pub endpoint: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: 10,
        }
    }
}

/// Filesystem locations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Local filings, one file per report
    pub data_dir: PathBuf,

    /// JSONL chat logs, relative paths live under ~/.finrag
    pub chat_log_dir: PathBuf,

    /// KPI catalog overriding the built-in one
    pub kpi_catalog: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            chat_log_dir: PathBuf::from("chats"),
            kpi_catalog: None,
        }
    }
}

/// Log line format
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter, `RUST_LOG` wins when set
    pub level: String,
    pub format: LogFormat,
    /// Append logs to this file instead of stderr
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
            file: None,
        }
    }
}

/// Home of user-level files
pub fn finrag_home() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".finrag"))
        .ok_or_else(|| FinragError::Config("cannot determine home directory".to_string()))
}

impl FinragConfig {
    /// Resolve `${VAR}` references in secrets and endpoints
    pub fn resolve_env_vars(&mut self) {
        if let Some(key) = &self.llm.api_key {
            self.llm.api_key = Some(expand_env_var(key));
        }
        if let Some(url) = &self.llm.base_url {
            self.llm.base_url = Some(expand_env_var(url));
        }
        for provider in &mut self.web_search.providers {
            if let Some(key) = &provider.api_key {
                provider.api_key = Some(expand_env_var(key));
            }
        }
        if let Some(endpoint) = &self.observability.endpoint {
            self.observability.endpoint = Some(expand_env_var(endpoint));
        }
    }

    /// Chat log directory; relative paths resolve under ~/.finrag
    pub fn chat_log_dir(&self) -> Result<PathBuf> {
        let path = &self.storage.chat_log_dir;
        if path.is_absolute() {
            Ok(path.clone())
        } else {
            Ok(finrag_home()?.join(path))
        }
    }
}

/// Expand every `${VAR}` in `value`; unknown variables are left as written
pub fn expand_env_var(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match std::env::var(name) {
                    Ok(resolved) => out.push_str(&resolved),
                    Err(_) => {
                        out.push_str("${");
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FinragConfig::default();
        assert_eq!(config.retriever.top_k, 5);
        assert_eq!(config.retriever.timeout(), Duration::from_secs(30));
        assert_eq!(config.limits.max_retriever_retries, 2);
        assert_eq!(config.limits.max_hallucination_retries, 1);
        assert_eq!(config.llm.max_retries, 5);
        assert!(config.workflow.clarification);
        assert!(config.observability.endpoint.is_none());
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let toml_str = r#"
            [workflow]
            hyde = false

            [limits]
            max_repeater_passes = 2

            [retriever]
            port = 9000
        "#;
        let config: FinragConfig = toml::from_str(toml_str).unwrap();
        assert!(!config.workflow.hyde);
        assert!(config.workflow.document_grading);
        assert_eq!(config.limits.max_repeater_passes, 2);
        assert_eq!(config.limits.max_personas, 4);
        assert_eq!(config.retriever.port, 9000);
        assert_eq!(config.retriever.host, "127.0.0.1");
    }

    #[test]
    fn test_web_providers_deserialize() {
        let toml_str = r#"
            [web_search]
            providers = [
                { kind = "serper", api_key = "abc" },
                { kind = "tavily", api_key_env = "MY_TAVILY" },
            ]
        "#;
        let config: FinragConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.web_search.providers.len(), 2);
        assert_eq!(config.web_search.providers[0].kind, WebProviderKind::Serper);
        assert_eq!(config.web_search.providers[0].resolve_key().as_deref(), Some("abc"));
        assert_eq!(config.web_search.timeout_secs, 20);
    }

    #[test]
    fn test_env_var_expansion() {
        std::env::set_var("FINRAG_TEST_KEY", "sk-test");
        assert_eq!(expand_env_var("${FINRAG_TEST_KEY}"), "sk-test");
        assert_eq!(expand_env_var("Bearer ${FINRAG_TEST_KEY}!"), "Bearer sk-test!");
        assert_eq!(expand_env_var("${FINRAG_UNSET_VARIABLE}"), "${FINRAG_UNSET_VARIABLE}");
        assert_eq!(expand_env_var("plain"), "plain");
        assert_eq!(expand_env_var("${unterminated"), "${unterminated");
    }

    #[test]
    fn test_retriever_addresses() {
        let config = RetrieverConfig {
            servers: vec![ServerAddress {
                host: "10.0.0.2".into(),
                port: 8002,
            }],
            ..Default::default()
        };
        let urls: Vec<String> = config.addresses().iter().map(ServerAddress::base_url).collect();
        assert_eq!(urls, vec!["http://127.0.0.1:8001", "http://10.0.0.2:8002"]);
    }

    #[test]
    fn test_absolute_chat_dir_is_kept() {
        let mut config = FinragConfig::default();
        config.storage.chat_log_dir = PathBuf::from("/var/lib/finrag/chats");
        assert_eq!(
            config.chat_log_dir().unwrap(),
            PathBuf::from("/var/lib/finrag/chats")
        );
    }
}
