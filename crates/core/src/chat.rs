//! Chat request/response contracts

use serde::{Deserialize, Serialize};

use crate::chunk::BoundingBox;
use crate::error::Error;

/// Maximum accepted message length in characters
pub const MAX_MESSAGE_CHARS: usize = 4000;

/// Caller role, as asserted by the LMS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[default]
    Student,
    Teacher,
    Admin,
}

impl UserRole {
    /// Parse a role string leniently (trimmed, case-insensitive).
    /// Unknown values are rejected rather than defaulted.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "student" => Some(UserRole::Student),
            "teacher" => Some(UserRole::Teacher),
            "admin" => Some(UserRole::Admin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Student => "student",
            UserRole::Teacher => "teacher",
            UserRole::Admin => "admin",
        }
    }
}

/// Optional LMS-provided context about the user
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserContext {
    pub display_name: Option<String>,
    pub course_id: Option<String>,
    pub module_id: Option<String>,
    /// Course progress in [0, 1]
    pub progress: Option<f32>,
    pub language: Option<String>,
}

/// Inbound chat request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub user_id: String,
    pub message: String,
    #[serde(default)]
    pub role: UserRole,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_context: Option<UserContext>,
}

impl ChatRequest {
    /// Validate request shape. Returns every violation, not just the first.
    pub fn validate(&self) -> Result<(), Error> {
        let mut details = Vec::new();

        if self.user_id.trim().is_empty() {
            details.push("user_id must not be empty".to_string());
        }
        if self.message.trim().is_empty() {
            details.push("message must not be empty".to_string());
        }
        if self.message.chars().count() > MAX_MESSAGE_CHARS {
            details.push(format!(
                "message exceeds {} characters",
                MAX_MESSAGE_CHARS
            ));
        }

        if details.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation { details })
        }
    }
}

/// Query classification produced by the analyzer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Factual,
    Conceptual,
    Procedural,
    Greeting,
    Personal,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Factual => "factual",
            QueryType::Conceptual => "conceptual",
            QueryType::Procedural => "procedural",
            QueryType::Greeting => "greeting",
            QueryType::Personal => "personal",
        }
    }
}

/// A citation pointing back into the regulation corpus
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    pub chunk_id: String,
    pub document_id: String,
    pub page_number: u32,
    pub snippet: String,
    #[serde(default)]
    pub bounding_boxes: Vec<BoundingBox>,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// Response metadata surfaced to the LMS
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseMetadata {
    /// Which agent path answered (e.g. "react", "supervisor", "guardian")
    pub agent: String,
    /// Server-generated session id the LMS should send on the next turn
    #[serde(default)]
    pub session_id: String,
    pub processing_time_ms: u64,
    pub confidence_score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_type: Option<QueryType>,
    #[serde(default)]
    pub topics_accessed: Vec<String>,
    #[serde(default)]
    pub tools_used: Vec<String>,
    #[serde(default)]
    pub reasoning_trace: Vec<String>,
    #[serde(default)]
    pub document_ids_used: Vec<String>,
    #[serde(default)]
    pub from_cache: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Outbound chat response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Answer text; may carry a `<thinking>…</thinking>` prefix block
    pub answer: String,
    pub sources: Vec<Citation>,
    pub suggested_questions: Vec<String>,
    pub metadata: ResponseMetadata,
}
