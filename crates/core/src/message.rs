//! Persisted conversation messages

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(MessageRole::User),
            "assistant" => Some(MessageRole::Assistant),
            _ => None,
        }
    }
}

/// One stored chat turn. Blocked messages stay in history but are excluded
/// from context-building.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub session_id: String,
    pub user_id: String,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_blocked: bool,
    #[serde(default)]
    pub block_reason: Option<String>,
}

impl ChatMessage {
    pub fn new(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        role: MessageRole,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: session_id.into(),
            user_id: user_id.into(),
            role,
            content: content.into(),
            created_at: Utc::now(),
            is_blocked: false,
            block_reason: None,
        }
    }

    pub fn blocked(mut self, reason: impl Into<String>) -> Self {
        self.is_blocked = true;
        self.block_reason = Some(reason.into());
        self
    }
}
