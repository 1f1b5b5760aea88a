//! LLM and embedding clients
//!
//! Features:
//! - OpenAI-compatible chat completions with tool calling
//! - Content-block normalization into a single `LlmMessage` shape
//! - `<think>`/`<thinking>` prefix extraction
//! - Retry with exponential backoff and jitter on transient failures
//! - Caller-side concurrency caps (semaphore per client)
//! - Task-steered, batched, L2-normalized embeddings
//! - System-prompt assembly (persona + role + memory + tools + pronoun rule)

pub mod client;
pub mod embeddings;
pub mod normalize;
pub mod prompt;

pub use client::{ChatClient, ChatClientConfig};
pub use embeddings::{EmbeddingClient, EmbeddingClientConfig};
pub use normalize::{extract_thinking, normalize_content};
pub use prompt::{MemorySnippet, PromptBuilder, PromptContext};

use thiserror::Error;

/// LLM client errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("network error: {0}")]
    Network(String),

    #[error("upstream returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("response parse error: {0}")]
    Parse(String),

    #[error("request timed out")]
    Timeout,
}

impl LlmError {
    /// 5xx, 429 and transport failures are worth retrying
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Network(_) | LlmError::Timeout => true,
            LlmError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<LlmError> for helmsman_core::Error {
    fn from(err: LlmError) -> Self {
        if err.is_retryable() {
            helmsman_core::Error::Transient(err.to_string())
        } else {
            helmsman_core::Error::Permanent(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(LlmError::Network("reset".into()).is_retryable());
        assert!(LlmError::Timeout.is_retryable());
        assert!(LlmError::Api {
            status: 429,
            message: "slow down".into()
        }
        .is_retryable());
        assert!(LlmError::Api {
            status: 503,
            message: "overloaded".into()
        }
        .is_retryable());
        assert!(!LlmError::Api {
            status: 400,
            message: "bad".into()
        }
        .is_retryable());
        assert!(!LlmError::Auth("bad key".into()).is_retryable());
    }

    #[test]
    fn test_core_error_mapping() {
        let transient: helmsman_core::Error = LlmError::Timeout.into();
        assert!(transient.is_transient());
        let permanent: helmsman_core::Error = LlmError::Auth("x".into()).into();
        assert!(!permanent.is_transient());
    }
}
