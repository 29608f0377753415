//! The structured-output contract.
//!
//! Every LLM call in FinRAG asks for a JSON value conforming to a schema. The
//! schema is derived from a Rust type with `schemars`, so the type that
//! deserializes the answer is also the contract sent to the model:
//!
//! ```rust,ignore
//! #[derive(Deserialize, JsonSchema)]
//! struct Verdict { safe: bool, reason: String }
//!
//! let verdict: Verdict = llm.structured("safety_check", SYSTEM, &query).await?;
//! ```

use crate::error::{LlmError, Result};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// One structured-output call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructuredRequest {
    /// Short task name, e.g. `grade_document`. Used for logging and scripting.
    pub task: String,
    /// System instruction
    pub system: String,
    /// User content
    pub prompt: String,
    /// Name of the output type, sanitized for provider tool/schema names
    pub schema_name: String,
    /// JSON schema of the expected value
    pub schema: Value,
}

impl StructuredRequest {
    /// Request whose schema is derived from `T`
    pub fn for_type<T: JsonSchema>(
        task: impl Into<String>,
        system: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        let mut schema = serde_json::to_value(schemars::schema_for!(T)).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut schema {
            map.remove("$schema");
        }
        Self {
            task: task.into(),
            system: system.into(),
            prompt: prompt.into(),
            schema_name: sanitize_name(&T::schema_name()),
            schema,
        }
    }
}

/// A model that returns a value conforming to the requested schema, or fails.
#[async_trait]
pub trait StructuredLlm: Send + Sync {
    async fn invoke(&self, request: StructuredRequest) -> Result<Value>;

    /// Model identifier, for logs
    fn model_name(&self) -> &str;
}

/// Typed calls on any [`StructuredLlm`]
#[async_trait]
pub trait StructuredLlmExt: StructuredLlm {
    /// Invoke with the schema of `T` and deserialize the answer
    async fn structured<T>(&self, task: &str, system: &str, prompt: &str) -> Result<T>
    where
        T: JsonSchema + DeserializeOwned + Send + 'static,
    {
        let request = StructuredRequest::for_type::<T>(task, system, prompt);
        let value = self.invoke(request).await?;
        decode(task, value)
    }
}

impl<L: StructuredLlm + ?Sized> StructuredLlmExt for L {}

/// Free-function form of [`StructuredLlmExt::structured`]
pub async fn invoke_structured<T>(llm: &dyn StructuredLlm, task: &str, system: &str, prompt: &str) -> Result<T>
where
    T: JsonSchema + DeserializeOwned + Send + 'static,
{
    llm.structured::<T>(task, system, prompt).await
}

fn decode<T: DeserializeOwned>(task: &str, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| LlmError::SchemaMismatch {
        task: task.to_string(),
        reason: e.to_string(),
    })
}

/// Tool and schema names: `[A-Za-z0-9_-]{1,64}`
fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .take(64)
        .collect();
    if cleaned.is_empty() {
        "response".to_string()
    } else {
        cleaned
    }
}

/// Parse a JSON object out of free text, tolerating code fences.
pub(crate) fn extract_json(text: &str) -> Result<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }
    let start = trimmed.find('{');
    let end = trimmed.rfind('}');
    match (start, end) {
        (Some(start), Some(end)) if end > start => serde_json::from_str(&trimmed[start..=end])
            .map_err(|e| LlmError::InvalidResponse(format!("malformed JSON: {e}"))),
        _ => Err(LlmError::InvalidResponse(format!(
            "expected a JSON object, got: {}",
            trimmed.chars().take(120).collect::<String>()
        ))),
    }
}
