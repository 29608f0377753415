//! Configuration management for FinRAG.
//!
//! `finrag.toml` is read from `~/.finrag/` and `./.finrag/`, merged, and
//! resolved against the environment. Settings are passed to the graph
//! builders explicitly; nothing here is process-global.

pub mod loader;
pub mod mode;
pub mod schema;

pub use loader::ConfigLoader;
pub use mode::{Depth, RunMode, Speed};
pub use schema::{
    finrag_home, CacheConfig, FinragConfig, Limits, LlmSettings, LogFormat, LoggingConfig,
    ObservabilityConfig, RetrieverConfig, ServerAddress, StorageConfig, WebProviderConfig,
    WebProviderKind, WebSearchConfig, WorkflowSettings,
};
