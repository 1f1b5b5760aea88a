//! Chat-completion client
//!
//! OpenAI-compatible wire format with tool calling. Stateless and safe to
//! share; a semaphore bounds caller-side concurrency per client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;

use helmsman_core::{
    Error as CoreError, LanguageModel, LlmMessage, Message, Result as CoreResult, Role,
    TokenUsage, ToolDefinition, ToolInvocation,
};

use crate::normalize::normalize_content;
use crate::LlmError;

/// Chat client configuration
#[derive(Debug, Clone)]
pub struct ChatClientConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: usize,
    pub temperature: f32,
    pub timeout: Duration,
    pub max_retries: u32,
    /// Initial backoff duration (doubles each retry, with jitter)
    pub initial_backoff: Duration,
    pub max_concurrency: usize,
}

impl Default for ChatClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            max_tokens: 1024,
            temperature: 0.4,
            timeout: Duration::from_secs(60),
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_concurrency: 16,
        }
    }
}

impl From<&helmsman_config::LlmSettings> for ChatClientConfig {
    fn from(s: &helmsman_config::LlmSettings) -> Self {
        Self {
            endpoint: s.endpoint.clone(),
            api_key: s.api_key.clone(),
            model: s.model.clone(),
            max_tokens: s.max_tokens,
            temperature: s.temperature,
            timeout: Duration::from_secs(s.timeout_secs),
            max_concurrency: s.max_concurrency.max(1),
            ..Self::default()
        }
    }
}

/// OpenAI-compatible chat client
pub struct ChatClient {
    client: Client,
    config: ChatClientConfig,
    permits: Arc<Semaphore>,
}

impl ChatClient {
    pub fn new(config: ChatClientConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::InvalidRequest(format!("failed to build HTTP client: {e}")))?;

        let permits = Arc::new(Semaphore::new(config.max_concurrency));
        Ok(Self {
            client,
            config,
            permits,
        })
    }

    fn api_url(&self) -> String {
        format!("{}/chat/completions", self.config.endpoint.trim_end_matches('/'))
    }

    async fn chat_inner(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<LlmMessage, LlmError> {
        let request = WireRequest::build(&self.config, messages, tools);

        // Retry loop with exponential backoff and jitter
        let mut last_error = None;
        let mut backoff = self.config.initial_backoff;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let jitter_ms = rand::thread_rng().gen_range(0..=backoff.as_millis() as u64 / 2);
                let delay = backoff + Duration::from_millis(jitter_ms);
                tracing::warn!(
                    attempt,
                    max = self.config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "LLM request failed, retrying"
                );
                tokio::time::sleep(delay).await;
                backoff *= 2;
            }

            match self.execute_request(&request).await {
                Ok(message) => return Ok(message),
                Err(e) if e.is_retryable() => last_error = Some(e),
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| LlmError::Network("max retries exceeded".to_string())))
    }

    async fn execute_request(&self, request: &WireRequest) -> Result<LlmMessage, LlmError> {
        let mut builder = self.client.post(self.api_url()).json(request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(LlmError::Auth(message));
            }
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: WireResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Parse("no choices in response".to_string()))?;

        let (thinking, text) = normalize_content(&choice.message.content);

        let tool_calls = choice
            .message
            .tool_calls
            .into_iter()
            .map(|tc| {
                let arguments = match &tc.function.arguments {
                    Value::String(s) => serde_json::from_str(s)
                        .unwrap_or_else(|_| Value::String(s.clone())),
                    other => other.clone(),
                };
                ToolInvocation {
                    id: tc.id,
                    name: tc.function.name,
                    arguments,
                }
            })
            .collect();

        Ok(LlmMessage {
            thinking,
            text,
            tool_calls,
            usage: TokenUsage {
                prompt_tokens: body.usage.as_ref().map(|u| u.prompt_tokens).unwrap_or(0),
                completion_tokens: body
                    .usage
                    .as_ref()
                    .map(|u| u.completion_tokens)
                    .unwrap_or(0),
            },
        })
    }
}

#[async_trait]
impl LanguageModel for ChatClient {
    async fn chat(&self, messages: &[Message], tools: &[ToolDefinition]) -> CoreResult<LlmMessage> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| CoreError::Internal("LLM semaphore closed".into()))?;

        self.chat_inner(messages, tools).await.map_err(Into::into)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

// Wire types

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: usize,
    temperature: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
}

impl WireRequest {
    fn build(config: &ChatClientConfig, messages: &[Message], tools: &[ToolDefinition]) -> Self {
        Self {
            model: config.model.clone(),
            messages: messages.iter().map(WireMessage::from).collect(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            tools: tools.iter().map(WireTool::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl From<&Message> for WireMessage {
    fn from(m: &Message) -> Self {
        Self {
            role: match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            },
            content: m.content.clone(),
            tool_calls: m.tool_calls.iter().map(WireToolCall::from).collect(),
            tool_call_id: m.tool_call_id.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct WireTool {
    r#type: &'static str,
    function: WireFunctionDef,
}

#[derive(Debug, Serialize)]
struct WireFunctionDef {
    name: String,
    description: String,
    parameters: Value,
}

impl From<&ToolDefinition> for WireTool {
    fn from(t: &ToolDefinition) -> Self {
        Self {
            r#type: "function",
            function: WireFunctionDef {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.parameters.clone(),
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    r#type: String,
    function: WireFunctionCall,
}

impl From<&ToolInvocation> for WireToolCall {
    fn from(t: &ToolInvocation) -> Self {
        Self {
            id: t.id.clone(),
            r#type: "function".to_string(),
            function: WireFunctionCall {
                name: t.name.clone(),
                arguments: Value::String(t.arguments.to_string()),
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
}

#[derive(Debug, Deserialize)]
struct WireResponseMessage {
    #[serde(default)]
    content: Value,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_request_shape() {
        let config = ChatClientConfig::default();
        let messages = vec![Message::system("hệ thống"), Message::user("điều 15?")];
        let tools = vec![ToolDefinition {
            name: "search_regulations".into(),
            description: "tìm điều luật".into(),
            parameters: serde_json::json!({"type": "object"}),
        }];

        let request = WireRequest::build(&config, &messages, &tools);
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "điều 15?");
        assert_eq!(json["tools"][0]["function"]["name"], "search_regulations");
    }

    #[test]
    fn test_tool_arguments_parsed_from_string() {
        let raw = serde_json::json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {
                            "name": "search_regulations",
                            "arguments": "{\"query\": \"rule 15\"}"
                        }
                    }]
                }
            }]
        });

        let parsed: WireResponse = serde_json::from_value(raw).unwrap();
        let call = &parsed.choices[0].message.tool_calls[0];
        assert_eq!(call.function.name, "search_regulations");
    }

    #[test]
    fn test_empty_tools_omitted_from_wire() {
        let config = ChatClientConfig::default();
        let request = WireRequest::build(&config, &[Message::user("hi")], &[]);
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("tools").is_none());
    }
}
