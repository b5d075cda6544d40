//! Minimal Anthropic Messages API client with tool-forced structured output.
//!
//! `extract` defines a single `structured_response` tool whose input schema
//! is derived from the target type, forces the model to call it, and
//! deserializes the tool input. Schema mismatches surface as
//! `LlmError::Parse` so callers can distinguish "model answered badly" from
//! "API unreachable".

pub mod error;
mod types;

pub use error::{LlmError, Result};

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use tracing::debug;

use types::{ChatRequest, ContentBlock, ToolDefinitionWire, WireMessage};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Clone)]
pub struct Claude {
    api_key: String,
    model: String,
    http: reqwest::Client,
    base_url: String,
}

impl Claude {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            http: reqwest::Client::new(),
            base_url: ANTHROPIC_API_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Structured extraction: force a tool call shaped like `T` and
    /// deserialize its input.
    pub async fn extract<T: JsonSchema + DeserializeOwned>(
        &self,
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
    ) -> Result<T> {
        let schema = serde_json::to_value(schemars::schema_for!(T))
            .map_err(|e| LlmError::Parse(format!("schema serialization failed: {e}")))?;

        let tool_name = "structured_response";
        let mut request = ChatRequest::new(&self.model)
            .system(system_prompt)
            .temperature(0.0)
            .message(WireMessage::user(user_prompt))
            .tool(ToolDefinitionWire {
                name: tool_name.to_string(),
                description: "Report the structured analysis of the input.".to_string(),
                input_schema: schema,
            });
        request.tool_choice = Some(serde_json::json!({
            "type": "tool",
            "name": tool_name,
        }));

        let response = self.chat(&request).await?;

        for block in &response.content {
            if let ContentBlock::ToolUse { name, input, .. } = block {
                if name == tool_name {
                    return serde_json::from_value(input.clone())
                        .map_err(|e| LlmError::Parse(format!("tool input did not match schema: {e}")));
                }
            }
        }

        Err(LlmError::Parse("no structured output in response".to_string()))
    }

    async fn chat(&self, request: &ChatRequest) -> Result<types::ChatResponse> {
        let url = format!("{}/messages", self.base_url);
        debug!(model = %request.model, "Claude chat request");

        let response = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json()
            .await
            .map_err(|e| LlmError::Parse(format!("malformed API response: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_tool_choice() {
        let mut request = ChatRequest::new("claude-haiku-4-5-20251001")
            .system("sys")
            .message(WireMessage::user("hello"))
            .tool(ToolDefinitionWire {
                name: "structured_response".to_string(),
                description: "d".to_string(),
                input_schema: serde_json::json!({"type": "object"}),
            });
        request.tool_choice = Some(serde_json::json!({"type": "tool", "name": "structured_response"}));

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["tool_choice"]["name"], "structured_response");
        assert_eq!(value["tools"][0]["name"], "structured_response");
        assert_eq!(value["messages"][0]["role"], "user");
        assert!(value.get("temperature").is_none());
    }

    #[test]
    fn response_tool_use_block_parses() {
        let json = r#"{
            "content": [
                {"type": "text", "text": "Here is the analysis."},
                {"type": "tool_use", "id": "tu_1", "name": "structured_response",
                 "input": {"relevance_score": 85}}
            ]
        }"#;
        let response: types::ChatResponse = serde_json::from_str(json).unwrap();
        assert!(matches!(
            &response.content[0],
            ContentBlock::Text { text } if text == "Here is the analysis."
        ));
        let tool_input = response.content.iter().find_map(|b| match b {
            ContentBlock::ToolUse { input, .. } => Some(input.clone()),
            _ => None,
        });
        assert_eq!(tool_input.unwrap()["relevance_score"], 85);
    }
}
