//! HTTP endpoints
//!
//! LMS-facing REST API under /api/v1.

use axum::{
    extract::{Json, Path, Query, State},
    http::{HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post},
    Extension, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use helmsman_core::{ChatRequest, Error as CoreError};
use helmsman_persistence::MessageRepository;
use helmsman_rag::DenseSearcher;

use crate::auth::{auth_middleware, RequestIdentity};
use crate::error::ApiError;
use crate::sse::chat_stream;
use crate::state::AppState;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let cors_layer = build_cors_layer(
        &state.settings.server.cors_origins,
        state.settings.server.cors_enabled,
    );

    let auth_state = state.clone();

    Router::new()
        // Chat
        .route("/api/v1/chat", post(chat))
        .route("/api/v1/chat/stream", post(chat_stream))
        // Memory reads
        .route("/api/v1/memories/:user_id", get(get_memories))
        .route("/api/v1/insights/:user_id", get(get_insights))
        // History
        .route("/api/v1/history/:user_id", get(get_history))
        .route("/api/v1/history/:user_id", delete(delete_history))
        // Source detail
        .route("/api/v1/sources/:id", get(get_source))
        // Health
        .route("/api/v1/health", get(health))
        .route("/api/v1/health/db", get(health_db))
        // Prometheus metrics
        .route("/metrics", get(metrics_handler))
        // Middleware (auth runs after CORS, before handlers)
        .layer(axum::middleware::from_fn(
            move |req: axum::extract::Request, next: axum::middleware::Next| {
                let state = auth_state.clone();
                async move { auth_middleware(state, req, next).await }
            },
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
}

/// Build CORS from configured origins; permissive only when disabled
fn build_cors_layer(origins: &[String], enabled: bool) -> CorsLayer {
    if !enabled {
        tracing::warn!("CORS is disabled - allowing all origins (NOT FOR PRODUCTION)");
        return CorsLayer::permissive();
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin, "invalid CORS origin, skipping");
                None
            }
        })
        .collect();

    if parsed.is_empty() {
        tracing::info!("No CORS origins configured, defaulting to localhost:3000");
        return CorsLayer::new()
            .allow_origin("http://localhost:3000".parse::<HeaderValue>().expect("static origin"))
            .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
            .allow_headers(Any);
    }

    CorsLayer::new()
        .allow_origin(parsed)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
}

/// POST /api/v1/chat
async fn chat(
    State(state): State<AppState>,
    Extension(identity): Extension<RequestIdentity>,
    Json(mut request): Json<ChatRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    // The identity header wins over the body when both are present
    if let Some(user_id) = &identity.user_id {
        request.user_id = user_id.clone();
    }
    request.role = identity.role;

    if let Err(retry_after_secs) = state.rate_limiter.check_user(&request.user_id) {
        return Err(ApiError(CoreError::RateLimited { retry_after_secs }));
    }

    let response = state.orchestrator.handle(request).await?;

    let evidence_images: Vec<String> = response
        .sources
        .iter()
        .filter_map(|c| c.image_url.clone())
        .collect();

    Ok(Json(json!({
        "status": "success",
        "data": {
            "answer": response.answer,
            "sources": response.sources,
            "suggested_questions": response.suggested_questions,
            "evidence_images": evidence_images,
        },
        "metadata": response.metadata,
    })))
}

/// GET /api/v1/memories/{user_id}
async fn get_memories(
    State(state): State<AppState>,
    Extension(identity): Extension<RequestIdentity>,
    Path(user_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_access(&identity, &user_id)?;

    let facts = state
        .facts
        .get_facts(&user_id)
        .await
        .map_err(CoreError::from)?;

    let data: Vec<serde_json::Value> = facts
        .iter()
        .map(|f| {
            json!({
                "id": f.id,
                "type": f.fact_type.as_str(),
                "value": f.value,
                "created_at": f.created_at,
            })
        })
        .collect();

    Ok(Json(json!({ "total": data.len(), "data": data })))
}

/// GET /api/v1/insights/{user_id}
async fn get_insights(
    State(state): State<AppState>,
    Extension(identity): Extension<RequestIdentity>,
    Path(user_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_access(&identity, &user_id)?;

    let insights = state
        .insights
        .list(&user_id)
        .await
        .map_err(CoreError::from)?;

    let data: Vec<serde_json::Value> = insights
        .iter()
        .map(|i| {
            json!({
                "id": i.id,
                "category": i.category.as_str(),
                "content": i.content,
                "sub_topic": i.sub_topic,
                "confidence": i.confidence,
                "created_at": i.created_at,
                "last_accessed": i.last_accessed,
            })
        })
        .collect();

    Ok(Json(json!({ "total": data.len(), "data": data })))
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

fn default_limit() -> usize {
    50
}

/// GET /api/v1/history/{user_id}?limit&offset
async fn get_history(
    State(state): State<AppState>,
    Extension(identity): Extension<RequestIdentity>,
    Path(user_id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_access(&identity, &user_id)?;

    let limit = params.limit.min(200);
    let messages = state
        .messages
        .history(&user_id, limit, params.offset)
        .await
        .map_err(CoreError::from)?;
    let total = state
        .messages
        .count_for_user(&user_id)
        .await
        .map_err(CoreError::from)?;

    Ok(Json(json!({
        "total": total,
        "limit": limit,
        "offset": params.offset,
        "data": messages,
    })))
}

/// DELETE /api/v1/history/{user_id}, self or admin only
async fn delete_history(
    State(state): State<AppState>,
    Extension(identity): Extension<RequestIdentity>,
    Path(user_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    require_access(&identity, &user_id)?;

    state
        .messages
        .delete_user_history(&user_id)
        .await
        .map_err(CoreError::from)?;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/sources/{id}
async fn get_source(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let chunk = state
        .chunks
        .get(&id)
        .await
        .map_err(CoreError::from)?
        .ok_or_else(|| {
            ApiError(CoreError::Validation {
                details: vec![format!("unknown source id: {id}")],
            })
        })?;

    Ok(Json(json!({
        "id": chunk.id,
        "document_id": chunk.document_id,
        "page_number": chunk.page_number,
        "content": chunk.content,
        "content_type": chunk.content_type.as_str(),
        "bounding_boxes": chunk.bounding_boxes,
        "image_url": chunk.image_url,
    })))
}

/// GET /api/v1/health: shallow liveness, no backend calls
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /api/v1/health/db: one cheap read against each backend
async fn health_db(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let probe = tokio::time::timeout(
        std::time::Duration::from_secs(2),
        state.messages.count_for_user("health-probe"),
    )
    .await;

    let store_status = match probe {
        Ok(Ok(_)) => "ok",
        Ok(Err(_)) => "error",
        Err(_) => "timeout",
    };

    let healthy = store_status == "ok";
    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(json!({
            "status": if healthy { "ok" } else { "degraded" },
            "checks": { "message_store": store_status },
        })),
    )
}

/// GET /metrics
async fn metrics_handler() -> impl IntoResponse {
    crate::state::render_metrics()
}

fn require_access(identity: &RequestIdentity, user_id: &str) -> Result<(), ApiError> {
    if identity.may_access(user_id) {
        Ok(())
    } else {
        Err(ApiError(CoreError::Permission(format!(
            "role {} may not access user {user_id}",
            identity.role.as_str()
        ))))
    }
}
