//! Anthropic Claude client.
//!
//! Structured output is obtained by declaring a single tool whose
//! `input_schema` is the requested schema and forcing the model to call it.
//! The tool input is the answer.

use crate::config::RemoteLlmConfig;
use crate::error::{LlmError, Result};
use crate::structured::{StructuredLlm, StructuredRequest};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Claude API client.
#[derive(Clone)]
pub struct ClaudeClient {
    config: RemoteLlmConfig,
    client: Client,
}

impl std::fmt::Debug for ClaudeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaudeClient")
            .field("base_url", &self.config.base_url)
            .field("model", &self.config.model)
            .finish()
    }
}

impl ClaudeClient {
    /// Create a new Claude client with the given configuration.
    pub fn new(config: RemoteLlmConfig) -> Result<Self> {
        let client = config.http_client()?;
        Ok(Self { config, client })
    }

    fn build_request(&self, request: &StructuredRequest) -> ClaudeRequest {
        let mut input_schema = request.schema.clone();
        if input_schema.get("type").is_none() {
            input_schema = json!({"type": "object", "properties": {"value": input_schema}});
        }
        ClaudeRequest {
            model: self.config.model.clone(),
            system: request.system.clone(),
            messages: vec![ClaudeMessage {
                role: "user".to_string(),
                content: request.prompt.clone(),
            }],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            tools: vec![ClaudeTool {
                name: request.schema_name.clone(),
                description: format!("Record the result of the '{}' task.", request.task),
                input_schema,
            }],
            tool_choice: json!({"type": "tool", "name": request.schema_name}),
        }
    }

    fn parse_response(resp: ClaudeResponse, tool_name: &str) -> Result<Value> {
        resp.content
            .into_iter()
            .find(|block| block.content_type == "tool_use" && block.name.as_deref() == Some(tool_name))
            .and_then(|block| block.input)
            .ok_or_else(|| {
                LlmError::InvalidResponse(format!(
                    "no '{tool_name}' tool call in response (stop_reason: {})",
                    resp.stop_reason.unwrap_or_default()
                ))
            })
    }
}

#[async_trait]
impl StructuredLlm for ClaudeClient {
    async fn invoke(&self, request: StructuredRequest) -> Result<Value> {
        let url = format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'));
        let body = self.build_request(&request);
        debug!(task = %request.task, model = %self.config.model, "claude structured call");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(e.to_string())
                } else {
                    LlmError::HttpError(e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            // 529: overloaded
            if status.as_u16() == 529 {
                return Err(LlmError::ServiceUnavailable(error_text));
            }
            return Err(LlmError::from_status("Claude", status, error_text));
        }

        let claude_resp: ClaudeResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let value = Self::parse_response(claude_resp, &request.schema_name)?;
        if request.schema.get("type").is_none() {
            return Ok(value.get("value").cloned().unwrap_or(Value::Null));
        }
        Ok(value)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

// Claude API types
#[derive(Debug, Serialize)]
struct ClaudeRequest {
    model: String,
    system: String,
    messages: Vec<ClaudeMessage>,
    max_tokens: u32,
    temperature: f32,
    tools: Vec<ClaudeTool>,
    tool_choice: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct ClaudeMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ClaudeTool {
    name: String,
    description: String,
    input_schema: Value,
}

#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    content: Vec<ClaudeContent>,
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClaudeContent {
    #[serde(rename = "type")]
    content_type: String,
    name: Option<String>,
    input: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ClaudeClient {
        ClaudeClient::new(RemoteLlmConfig::new(
            "test-key",
            "https://api.anthropic.com",
            "claude-sonnet-4-5",
        ))
        .unwrap()
    }

    fn request(schema: Value) -> StructuredRequest {
        StructuredRequest {
            task: "path_decider".into(),
            system: "Pick a path.".into(),
            prompt: "What is 2+2?".into(),
            schema_name: "PathDecision".into(),
            schema,
        }
    }

    #[test]
    fn test_tool_use_is_forced() {
        let body = serde_json::to_value(client().build_request(&request(json!({"type": "object"})))).unwrap();
        assert_eq!(body["tool_choice"]["type"], "tool");
        assert_eq!(body["tool_choice"]["name"], "PathDecision");
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
        assert_eq!(body["system"], "Pick a path.");
    }

    #[test]
    fn test_parse_tool_input() {
        let resp: ClaudeResponse = serde_json::from_value(json!({
            "content": [
                {"type": "text", "text": "thinking"},
                {"type": "tool_use", "name": "PathDecision", "input": {"path": "general"}}
            ],
            "stop_reason": "tool_use"
        }))
        .unwrap();
        let value = ClaudeClient::parse_response(resp, "PathDecision").unwrap();
        assert_eq!(value["path"], "general");
    }

    #[test]
    fn test_missing_tool_call() {
        let resp: ClaudeResponse = serde_json::from_value(json!({
            "content": [{"type": "text", "text": "I won't"}],
            "stop_reason": "end_turn"
        }))
        .unwrap();
        let err = ClaudeClient::parse_response(resp, "PathDecision").unwrap_err();
        assert!(err.to_string().contains("end_turn"));
    }
}
