//! Remote LLM provider implementations.
//!
//! - **Claude** - Anthropic messages API, forced tool use
//! - **OpenAI** - chat completions with a `json_schema` response format

pub mod claude;
pub mod openai;

pub use claude::ClaudeClient;
pub use openai::OpenAiClient;
