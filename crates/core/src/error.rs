//! Error taxonomy shared across the engine
//!
//! Components return typed errors; the server maps them onto the uniform
//! HTTP envelope. Transient upstream failures are retried by callers with
//! exponential backoff, permanent ones are not.

use thiserror::Error;

/// Engine-wide error type
#[derive(Error, Debug)]
pub enum Error {
    /// Request shape errors (empty message, bad role, oversize input)
    #[error("validation failed: {}", details.join("; "))]
    Validation { details: Vec<String> },

    /// Missing or invalid API key
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Role denied or cross-user access attempt
    #[error("permission denied: {0}")]
    Permission(String),

    /// Request-boundary rate limit exceeded
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Upstream failure that is expected to be recoverable (5xx, timeout,
    /// rate-limit from a provider, pool exhaustion)
    #[error("transient upstream failure: {0}")]
    Transient(String),

    /// Upstream failure that will not recover on retry (auth, schema)
    #[error("permanent upstream failure: {0}")]
    Permanent(String),

    /// Per-request deadline fired
    #[error("request deadline exceeded")]
    DeadlineExceeded,

    /// Logic bug; never leaks detail to callers
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether a caller-side retry with backoff is worthwhile
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_))
    }

    pub fn validation(detail: impl Into<String>) -> Self {
        Error::Validation {
            details: vec![detail.into()],
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::Transient("503".into()).is_transient());
        assert!(!Error::Permanent("bad key".into()).is_transient());
        assert!(!Error::DeadlineExceeded.is_transient());
    }

    #[test]
    fn test_validation_message_joins_details() {
        let err = Error::Validation {
            details: vec!["message is empty".into(), "role invalid".into()],
        };
        assert!(err.to_string().contains("message is empty; role invalid"));
    }
}
