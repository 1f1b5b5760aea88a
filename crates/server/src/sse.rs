//! Server-Sent-Events chat endpoint
//!
//! Event order per contract: thinking_start, thinking*, thinking_end,
//! answer*, sources, suggested_questions?, metadata, done. Errors emit an
//! `error` event and close the stream.

use axum::extract::{Json, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Extension;
use futures::Stream;
use serde_json::json;
use std::convert::Infallible;

use helmsman_core::{ChatRequest, Error as CoreError};
use helmsman_pipeline::PipelineEvent;

use crate::auth::RequestIdentity;
use crate::state::AppState;

/// POST /api/v1/chat/stream
pub async fn chat_stream(
    State(state): State<AppState>,
    Extension(identity): Extension<RequestIdentity>,
    Json(mut request): Json<ChatRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    if let Some(user_id) = &identity.user_id {
        request.user_id = user_id.clone();
    }
    request.role = identity.role;

    let rate_limit_error = state
        .rate_limiter
        .check_user(&request.user_id)
        .err()
        .map(|retry_after_secs| CoreError::RateLimited { retry_after_secs });

    let stream = async_stream::stream! {
        if let Some(err) = rate_limit_error {
            yield Ok(error_event(&err.to_string()));
            return;
        }

        let mut rx = state.orchestrator.clone().handle_stream(request);
        while let Some(event) = rx.recv().await {
            yield Ok(to_sse_event(event));
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn error_event(message: &str) -> Event {
    Event::default()
        .event("error")
        .data(json!({ "message": message }).to_string())
}

fn to_sse_event(event: PipelineEvent) -> Event {
    match event {
        PipelineEvent::ThinkingStart { estimated_time_ms } => Event::default()
            .event("thinking_start")
            .data(json!({ "estimated_time": estimated_time_ms }).to_string()),
        PipelineEvent::Thinking { content } => Event::default()
            .event("thinking")
            .data(json!({ "content": content }).to_string()),
        PipelineEvent::ThinkingEnd { duration_ms } => Event::default()
            .event("thinking_end")
            .data(json!({ "duration_ms": duration_ms }).to_string()),
        PipelineEvent::Answer { content } => Event::default()
            .event("answer")
            .data(json!({ "content": content }).to_string()),
        PipelineEvent::Sources { sources } => Event::default()
            .event("sources")
            .data(json!({ "sources": sources }).to_string()),
        PipelineEvent::SuggestedQuestions { questions } => Event::default()
            .event("suggested_questions")
            .data(json!({ "questions": questions }).to_string()),
        PipelineEvent::Metadata { metadata } => Event::default()
            .event("metadata")
            .data(serde_json::to_string(&metadata).unwrap_or_else(|_| "{}".to_string())),
        PipelineEvent::Error { message } => error_event(&message),
        PipelineEvent::Done => Event::default()
            .event("done")
            .data(json!({ "status": "complete" }).to_string()),
    }
}
