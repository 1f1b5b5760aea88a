//! API-key authentication and caller identity
//!
//! `X-API-Key` is required (unless no keys are configured, the dev mode).
//! `X-User-ID` and `X-Role` identify the caller for scoped access checks.

use axum::extract::Request;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;

use helmsman_core::{Error as CoreError, UserRole};

use crate::error::ApiError;
use crate::state::AppState;

/// Caller identity attached to every authenticated request
#[derive(Debug, Clone)]
pub struct RequestIdentity {
    pub api_key: String,
    pub user_id: Option<String>,
    pub role: UserRole,
}

impl RequestIdentity {
    /// May the caller read/write data scoped to `user_id`?
    pub fn may_access(&self, user_id: &str) -> bool {
        match self.role {
            UserRole::Admin => true,
            _ => self.user_id.as_deref() == Some(user_id),
        }
    }
}

fn header<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Auth middleware: validates the API key, applies the per-key rate
/// limit, and attaches [`RequestIdentity`].
/// Paths reachable without an API key (probes and scrapers)
fn is_public_path(path: &str) -> bool {
    path == "/api/v1/health" || path == "/metrics"
}

pub async fn auth_middleware(
    state: AppState,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if is_public_path(request.uri().path()) {
        return Ok(next.run(request).await);
    }

    let headers = request.headers();

    let api_key = header(headers, "X-API-Key").unwrap_or("").to_string();
    let configured = &state.settings.server.api_keys;
    if !configured.is_empty() && !configured.iter().any(|k| k == &api_key) {
        return Err(ApiError(CoreError::Auth("invalid API key".into())));
    }

    if let Err(retry_after_secs) = state.rate_limiter.check_api_key(&api_key) {
        return Err(ApiError(CoreError::RateLimited { retry_after_secs }));
    }

    let role = header(headers, "X-Role")
        .and_then(UserRole::parse)
        .unwrap_or_default();
    let user_id = header(headers, "X-User-ID").map(String::from);

    request.extensions_mut().insert(RequestIdentity {
        api_key,
        user_id,
        role,
    });

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(role: UserRole, user_id: Option<&str>) -> RequestIdentity {
        RequestIdentity {
            api_key: "k".into(),
            user_id: user_id.map(String::from),
            role,
        }
    }

    #[test]
    fn test_self_access_only_for_non_admin() {
        let student = identity(UserRole::Student, Some("u1"));
        assert!(student.may_access("u1"));
        assert!(!student.may_access("u2"));

        let teacher = identity(UserRole::Teacher, Some("t1"));
        assert!(!teacher.may_access("u1"));
    }

    #[test]
    fn test_admin_accesses_anyone() {
        let admin = identity(UserRole::Admin, Some("a1"));
        assert!(admin.may_access("u1"));
        assert!(admin.may_access("a1"));
    }

    #[test]
    fn test_missing_user_header_denies_scoped_access() {
        let anonymous = identity(UserRole::Student, None);
        assert!(!anonymous.may_access("u1"));
    }
}
