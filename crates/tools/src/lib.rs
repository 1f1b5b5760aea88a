//! Typed tools for the agents
//!
//! A tool is a named, schema-validated operation bound to a backing
//! component (CRAG, memory store, tutor). Tools carry a category and an
//! access tag so agent configurations can pick safe subsets.

pub mod control_tools;
pub mod memory_tools;
pub mod rag_tools;
pub mod registry;
pub mod tutor_tools;

pub use control_tools::EscalateTool;
pub use memory_tools::{RecallMemoryTool, RememberFactTool};
pub use rag_tools::{LookupEntitiesTool, SearchRegulationsTool};
pub use registry::ToolRegistry;
pub use tutor_tools::{ExplainSimplyTool, PracticeQuestionTool};

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use helmsman_core::{Citation, ToolDefinition, UserRole};

/// Default timeout for tool execution
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Tool grouping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolCategory {
    Rag,
    Memory,
    Tutor,
    Control,
}

/// Side-effect class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolAccess {
    Read,
    Write,
}

/// Tool descriptor
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object
    pub input_schema: Value,
    pub category: ToolCategory,
    pub access: ToolAccess,
}

impl ToolSchema {
    /// Definition shape handed to the LLM
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.input_schema.clone(),
        }
    }
}

/// Request-scoped context passed to every tool call
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub user_id: String,
    pub session_id: String,
    pub role: UserRole,
}

/// Tool output: text for the model plus structured extras for the pipeline
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub content: String,
    pub citations: Vec<Citation>,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            is_error: true,
            ..Default::default()
        }
    }
}

/// Tool errors
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("execution failed: {0}")]
    Execution(String),

    #[error("tool {0} timed out after {1}s")]
    Timeout(String, u64),
}

impl ToolError {
    /// TRANSIENT failures are retried once inside the registry
    pub fn is_transient(&self) -> bool {
        matches!(self, ToolError::Execution(_) | ToolError::Timeout(_, _))
    }
}

/// A callable tool
#[async_trait]
pub trait Tool: Send + Sync {
    fn schema(&self) -> ToolSchema;

    async fn execute(&self, arguments: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError>;

    /// Per-tool execution timeout
    fn timeout(&self) -> Duration {
        DEFAULT_TOOL_TIMEOUT
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn ctx() -> ToolContext {
        ToolContext {
            user_id: "u1".into(),
            session_id: "s1".into(),
            role: UserRole::Student,
        }
    }
}
