//! LLM and embedding abstractions
//!
//! Providers return content either as a plain string or as a list of typed
//! blocks; both are normalized at the client boundary into [`LlmMessage`]
//! so callers never see the raw shape.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use unicode_segmentation::UnicodeSegmentation;

use crate::error::Result;

/// Conversation role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One turn in a model conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Tool calls the assistant issued on this turn
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolInvocation>,
    /// For `Role::Tool`: which call this result answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant_tool_calls(calls: Vec<ToolInvocation>) -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            tool_calls: calls,
            tool_call_id: None,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// Tool exposed to the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object
    pub parameters: Value,
}

/// A tool call requested by the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Token accounting reported by the provider
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// Normalized model output: optional reasoning prefix, answer text, and
/// any tool calls. Exactly one of `text`/`tool_calls` is usually non-empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolInvocation>,
    #[serde(default)]
    pub usage: TokenUsage,
}

impl LlmMessage {
    pub fn is_final(&self) -> bool {
        self.tool_calls.is_empty()
    }

    /// Answer with the `<thinking>` block re-attached as a prefix, the
    /// shape the LMS contract expects.
    pub fn answer_with_thinking(&self) -> String {
        match &self.thinking {
            Some(t) if !t.trim().is_empty() => {
                format!("<thinking>{}</thinking>{}", t, self.text)
            }
            _ => self.text.clone(),
        }
    }
}

/// Which side of retrieval a text is embedded for; steers the upstream model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingTask {
    Query,
    Document,
}

/// Chat-completion model abstraction
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Run one model turn. `tools` may be empty for plain generation.
    async fn chat(&self, messages: &[Message], tools: &[ToolDefinition]) -> Result<LlmMessage>;

    fn model_name(&self) -> &str;

    /// Rough token estimate used for summarization thresholds.
    /// Vietnamese averages closer to 3 characters per token than English's 4.
    fn estimate_tokens(&self, text: &str) -> usize {
        let graphemes = text.graphemes(true).count();
        graphemes.max(1) / 3
    }
}

/// Text-embedding model abstraction. Implementations return unit-norm
/// vectors in input order.
#[async_trait]
pub trait TextEmbedder: Send + Sync {
    async fn embed(&self, task: EmbeddingTask, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn dimension(&self) -> usize;

    /// Convenience for the single-text case
    async fn embed_one(&self, task: EmbeddingTask, text: &str) -> Result<Vec<f32>> {
        let mut out = self.embed(task, &[text.to_string()]).await?;
        out.pop()
            .ok_or_else(|| crate::error::Error::Permanent("embedder returned no vector".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_answer_with_thinking_prefix() {
        let msg = LlmMessage {
            thinking: Some("cân nhắc điều 15".into()),
            text: "Tàu bên phải được nhường đường.".into(),
            ..Default::default()
        };
        let s = msg.answer_with_thinking();
        assert!(s.starts_with("<thinking>"));
        assert!(s.ends_with("Tàu bên phải được nhường đường."));
    }

    #[test]
    fn test_answer_without_thinking_is_plain() {
        let msg = LlmMessage {
            text: "ok".into(),
            ..Default::default()
        };
        assert_eq!(msg.answer_with_thinking(), "ok");
    }

    #[test]
    fn test_is_final() {
        let mut msg = LlmMessage::default();
        assert!(msg.is_final());
        msg.tool_calls.push(ToolInvocation {
            id: "t1".into(),
            name: "search_regulations".into(),
            arguments: serde_json::json!({"query": "rule 15"}),
        });
        assert!(!msg.is_final());
    }
}
