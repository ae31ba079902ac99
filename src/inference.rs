use crate::config::Config;
use crate::errors::InferenceError;
use crate::schema::ToolSchema;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

pub const STRUCTURED_OUTPUT_TOOL: &str = "structured_output";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Status the provider uses for "overloaded, try again later".
const OVERLOADED: u16 = 529;

/// A function from (prompt, schema) to a schema-checked key/value map.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn run_inference(
        &self,
        prompt: &str,
        schema: &ToolSchema,
    ) -> Result<Map<String, Value>, InferenceError>;
}

#[derive(Debug, Clone)]
pub struct InferenceSettings {
    pub api_key: String,
    pub api_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub overload_retries: u32,
    pub retry_delay: Duration,
}

impl InferenceSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            api_key: config.anthropic_api_key.clone(),
            api_url: config.anthropic_api_url.clone(),
            model: config.anthropic_model.clone(),
            max_tokens: config.max_tokens,
            overload_retries: config.overload_retries,
            retry_delay: Duration::from_secs(config.retry_delay_secs),
        }
    }
}

#[derive(Debug, Serialize)]
struct ToolDefinition<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a ToolSchema,
}

#[derive(Debug, Serialize)]
struct ToolChoice<'a> {
    #[serde(rename = "type")]
    choice_type: &'a str,
    name: &'a str,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    tools: Vec<ToolDefinition<'a>>,
    tool_choice: ToolChoice<'a>,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    input: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<Value>,
}

/// Client for the Anthropic messages API in forced tool-use mode.
#[derive(Clone)]
pub struct AnthropicClient {
    client: Client,
    settings: InferenceSettings,
}

impl AnthropicClient {
    /// Creates a new `AnthropicClient`.
    ///
    /// # Arguments
    ///
    /// * `settings` - Endpoint, credentials, and overload retry policy.
    pub fn new(settings: InferenceSettings) -> Result<Self, InferenceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| {
                InferenceError::Transport(format!("failed to create inference client: {}", e))
            })?;

        Ok(Self { client, settings })
    }

    /// Sends one request and returns the raw response body of a 2xx answer.
    async fn send_once(&self, body: &MessagesRequest<'_>) -> Result<String, InferenceError> {
        let response = self
            .client
            .post(&self.settings.api_url)
            .header("x-api-key", &self.settings.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| InferenceError::Transport(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == OVERLOADED {
            return Err(InferenceError::Overloaded { attempts: 1 });
        }
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(InferenceError::Status {
                status: status.as_u16(),
                body: error_text,
            });
        }

        response
            .text()
            .await
            .map_err(|e| InferenceError::Transport(e.to_string()))
    }
}

#[async_trait]
impl InferenceClient for AnthropicClient {
    async fn run_inference(
        &self,
        prompt: &str,
        schema: &ToolSchema,
    ) -> Result<Map<String, Value>, InferenceError> {
        let request = MessagesRequest {
            model: &self.settings.model,
            max_tokens: self.settings.max_tokens,
            tools: vec![ToolDefinition {
                name: STRUCTURED_OUTPUT_TOOL,
                description: "Output should conform to the provided JSON schema",
                input_schema: schema,
            }],
            tool_choice: ToolChoice {
                choice_type: "tool",
                name: STRUCTURED_OUTPUT_TOOL,
            },
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        let max_attempts = self.settings.overload_retries + 1;
        let mut attempt = 0;
        let body = loop {
            attempt += 1;
            match self.send_once(&request).await {
                Ok(body) => break body,
                Err(InferenceError::Overloaded { .. }) if attempt < max_attempts => {
                    tracing::warn!(
                        "Inference provider overloaded (attempt {}/{}), retrying in {:?}",
                        attempt,
                        max_attempts,
                        self.settings.retry_delay
                    );
                    tokio::time::sleep(self.settings.retry_delay).await;
                }
                Err(InferenceError::Overloaded { .. }) => {
                    tracing::error!(
                        "Inference provider still overloaded after {} attempts",
                        attempt
                    );
                    return Err(InferenceError::Overloaded { attempts: attempt });
                }
                Err(e) => return Err(e),
            }
        };

        let fields = extract_tool_input(&body)?;
        schema.validate(&fields)?;
        Ok(fields)
    }
}

/// Pull the `input` of the first `tool_use` block out of a messages API response body.
pub fn extract_tool_input(body: &str) -> Result<Map<String, Value>, InferenceError> {
    let parsed: MessagesResponse =
        serde_json::from_str(body).map_err(|e| InferenceError::MalformedJson(e.to_string()))?;

    tracing::debug!(
        "Inference response: stop_reason={:?}, usage={}",
        parsed.stop_reason,
        parsed.usage.as_ref().map(|u| u.to_string()).unwrap_or_default()
    );

    let block = parsed
        .content
        .into_iter()
        .find(|b| b.block_type == "tool_use")
        .ok_or(InferenceError::NoStructuredOutput)?;

    match block.input {
        Some(Value::Object(map)) => Ok(map),
        Some(other) => Err(InferenceError::MalformedJson(format!(
            "tool input is not an object: {}",
            other
        ))),
        None => Err(InferenceError::NoStructuredOutput),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_first_tool_use_block() {
        let body = json!({
            "content": [
                {"type": "text", "text": "thinking"},
                {"type": "tool_use", "id": "t1", "name": "structured_output", "input": {"a": 1}},
                {"type": "tool_use", "id": "t2", "name": "structured_output", "input": {"a": 2}}
            ],
            "stop_reason": "tool_use"
        })
        .to_string();

        let fields = extract_tool_input(&body).unwrap();
        assert_eq!(fields["a"], 1);
    }

    #[test]
    fn test_text_only_response_has_no_structured_output() {
        let body = json!({"content": [{"type": "text", "text": "hi"}]}).to_string();
        assert!(matches!(
            extract_tool_input(&body),
            Err(InferenceError::NoStructuredOutput)
        ));
    }

    #[test]
    fn test_garbage_body_is_malformed_json() {
        assert!(matches!(
            extract_tool_input("{not json"),
            Err(InferenceError::MalformedJson(_))
        ));
    }

    #[test]
    fn test_request_shape() {
        let schema = ToolSchema::object(Default::default(), &[]);
        let request = MessagesRequest {
            model: "m",
            max_tokens: 1500,
            tools: vec![ToolDefinition {
                name: STRUCTURED_OUTPUT_TOOL,
                description: "d",
                input_schema: &schema,
            }],
            tool_choice: ToolChoice {
                choice_type: "tool",
                name: STRUCTURED_OUTPUT_TOOL,
            },
            messages: vec![Message {
                role: "user",
                content: "p",
            }],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["tools"][0]["name"], "structured_output");
        assert_eq!(json["tools"][0]["input_schema"]["type"], "object");
        assert_eq!(json["tool_choice"]["type"], "tool");
        assert_eq!(json["messages"][0]["role"], "user");
    }
}
