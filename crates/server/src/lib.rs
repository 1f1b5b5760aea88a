//! HTTP server for the helmsman chat engine
//!
//! axum router implementing the LMS-facing API: chat (plain and SSE),
//! user memory reads, history, source detail and health, behind API-key
//! auth and per-key/per-user rate limiting.

pub mod auth;
pub mod error;
pub mod http;
pub mod rate_limit;
pub mod sse;
pub mod state;

pub use error::ApiError;
pub use http::create_router;
pub use rate_limit::RateLimiter;
pub use state::AppState;
