//! The 6-stage request orchestrator
//!
//! 1. Session: load or create session state, arm the request deadline
//! 2. Validate: guardian check, role normalization, pronoun hints
//! 3. Context: memory reads + persona-driven system prompt
//! 4. Agent: dispatch to ReAct or the supervisor graph under the deadline
//! 5. Output: validation, citation merging, suggestions, analytics
//! 6. Background: persist, extract, summarize, notify (never awaited)
//!
//! Stages 1-5 are serialized per request; stage-6 jobs run concurrently
//! and independently.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use helmsman_agent::{AgentContext, AgentDispatcher, Guardian, GuardianDecision, BLOCKED_RESPONSE};
use helmsman_core::{
    ChatMessage, ChatRequest, ChatResponse, Error as CoreError, LanguageModel, MessageRole,
    ResponseMetadata, Result as CoreResult, SessionState, TextEmbedder,
};
use helmsman_memory::{InsightStore, MemoryExtractor, SessionRegistry, Summarizer};
use helmsman_persistence::{MessageRepository, SessionRecord, SessionRepository};
use helmsman_rag::QueryAnalyzer;

use crate::background::{BackgroundScheduler, Job};
use crate::context::ContextBuilder;
use crate::events::{AiEvent, LmsEventPublisher};
use crate::output::OutputStage;

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub request_deadline: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            request_deadline: Duration::from_secs(
                helmsman_config::constants::agent::REQUEST_DEADLINE_SECONDS,
            ),
        }
    }
}

/// Server-Sent-Events payloads for the streaming endpoint. Thinking is
/// status-only: events are emitted from stage transitions and the trace,
/// not from token streaming.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    ThinkingStart { estimated_time_ms: Option<u64> },
    Thinking { content: String },
    ThinkingEnd { duration_ms: u64 },
    Answer { content: String },
    Sources { sources: Vec<helmsman_core::Citation> },
    SuggestedQuestions { questions: Vec<String> },
    Metadata { metadata: ResponseMetadata },
    Error { message: String },
    Done,
}

pub struct Orchestrator {
    guardian: Arc<Guardian>,
    sessions: Arc<SessionRegistry>,
    session_repo: Arc<dyn SessionRepository>,
    messages: Arc<dyn MessageRepository>,
    context_builder: Arc<ContextBuilder>,
    dispatcher: Arc<AgentDispatcher>,
    output: Arc<OutputStage>,
    extractor: Arc<MemoryExtractor>,
    insights: Arc<InsightStore>,
    summarizer: Arc<Summarizer>,
    scheduler: Arc<BackgroundScheduler>,
    events: Arc<LmsEventPublisher>,
    analyzer: Arc<QueryAnalyzer>,
    llm: Arc<dyn LanguageModel>,
    #[allow(dead_code)]
    embedder: Arc<dyn TextEmbedder>,
    tool_definitions: Vec<helmsman_core::ToolDefinition>,
    config: PipelineConfig,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        guardian: Arc<Guardian>,
        sessions: Arc<SessionRegistry>,
        session_repo: Arc<dyn SessionRepository>,
        messages: Arc<dyn MessageRepository>,
        context_builder: Arc<ContextBuilder>,
        dispatcher: Arc<AgentDispatcher>,
        output: Arc<OutputStage>,
        extractor: Arc<MemoryExtractor>,
        insights: Arc<InsightStore>,
        summarizer: Arc<Summarizer>,
        scheduler: Arc<BackgroundScheduler>,
        events: Arc<LmsEventPublisher>,
        analyzer: Arc<QueryAnalyzer>,
        llm: Arc<dyn LanguageModel>,
        embedder: Arc<dyn TextEmbedder>,
        tool_definitions: Vec<helmsman_core::ToolDefinition>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            guardian,
            sessions,
            session_repo,
            messages,
            context_builder,
            dispatcher,
            output,
            extractor,
            insights,
            summarizer,
            scheduler,
            events,
            analyzer,
            llm,
            embedder,
            tool_definitions,
            config,
        }
    }

    /// Serve one chat request through stages 1-6
    pub async fn handle(&self, request: ChatRequest) -> CoreResult<ChatResponse> {
        let started = std::time::Instant::now();
        request.validate()?;

        // Stage 1: session + deadline
        let deadline = Instant::now() + self.config.request_deadline;
        let session = self
            .sessions
            .load_or_create(request.session_id.as_deref(), &request.user_id);
        self.ensure_session_row(&session).await;

        // Stage 2: guardian + pronoun hints
        let verdict = self.guardian.check(&request.message, &request.user_id).await;
        self.sessions
            .observe_user_message(&session.session_id, &request.message);

        if verdict.decision == GuardianDecision::Block {
            let reason = verdict
                .reason
                .unwrap_or_else(|| "safety policy".to_string());
            metrics::counter!("helmsman_requests_total", "status" => "blocked").increment(1);
            self.schedule_blocked_persistence(&request, &session, &reason);

            return Ok(ChatResponse {
                answer: BLOCKED_RESPONSE.to_string(),
                sources: Vec::new(),
                suggested_questions: Vec::new(),
                metadata: ResponseMetadata {
                    agent: "guardian".to_string(),
                    session_id: session.session_id.clone(),
                    processing_time_ms: started.elapsed().as_millis() as u64,
                    confidence_score: 1.0,
                    block_reason: Some(reason),
                    ..Default::default()
                },
            });
        }

        let flagged_reason = (verdict.decision == GuardianDecision::Flag)
            .then_some(verdict.reason)
            .flatten();

        // Stage 3: context
        let session = self
            .sessions
            .get(&session.session_id)
            .unwrap_or(session);
        let built = self
            .context_builder
            .build(
                &session,
                request.role,
                request.user_context.as_ref(),
                &request.message,
                &self.tool_definitions,
            )
            .await;

        // Stage 4: agent under deadline
        let agent_ctx = AgentContext {
            system_prompt: built.system_prompt,
            history: built.history,
            user_message: request.message.clone(),
            user_id: request.user_id.clone(),
            session_id: session.session_id.clone(),
            role: request.role,
            deadline,
        };

        let run = match tokio::time::timeout_at(deadline, self.dispatcher.run(agent_ctx)).await {
            Ok(Ok(run)) => run,
            Ok(Err(e)) => {
                metrics::counter!("helmsman_requests_total", "status" => "error").increment(1);
                return Err(e);
            }
            Err(_elapsed) => {
                metrics::counter!("helmsman_requests_total", "status" => "timeout").increment(1);
                return Err(CoreError::DeadlineExceeded);
            }
        };

        // Stage 5: output
        let query_type = Some(self.analyzer.classify(&request.message).await.query_type);
        let mut response = self
            .output
            .finalize(
                run,
                self.dispatcher.kind().label(),
                query_type,
                started.elapsed().as_millis() as u64,
            )
            .await;
        response.metadata.session_id = session.session_id.clone();
        if let Some(reason) = flagged_reason {
            response.metadata.block_reason = Some(reason);
        }

        self.sessions.record_assistant_turn(
            &session.session_id,
            &response.answer,
            &response.metadata.agent,
            response.metadata.topics_accessed.clone(),
        );

        // Stage 6: schedule, do not await
        self.schedule_post_turn(&request, &session, &response);

        metrics::counter!("helmsman_requests_total", "status" => "ok").increment(1);
        metrics::histogram!("helmsman_request_duration_ms")
            .record(started.elapsed().as_millis() as f64);

        Ok(response)
    }

    /// Streaming variant: the same pipeline with status events around it.
    /// Events arrive in contract order; errors emit an error event then
    /// close.
    pub fn handle_stream(self: Arc<Self>, request: ChatRequest) -> mpsc::Receiver<PipelineEvent> {
        let (tx, rx) = mpsc::channel(32);
        let orchestrator = self;

        tokio::spawn(async move {
            let started = std::time::Instant::now();
            let _ = tx
                .send(PipelineEvent::ThinkingStart {
                    estimated_time_ms: Some(3000),
                })
                .await;
            let _ = tx
                .send(PipelineEvent::Thinking {
                    content: "Đang phân tích câu hỏi...".to_string(),
                })
                .await;

            match orchestrator.handle(request).await {
                Ok(response) => {
                    for line in &response.metadata.reasoning_trace {
                        let _ = tx
                            .send(PipelineEvent::Thinking {
                                content: line.clone(),
                            })
                            .await;
                    }
                    let _ = tx
                        .send(PipelineEvent::ThinkingEnd {
                            duration_ms: started.elapsed().as_millis() as u64,
                        })
                        .await;

                    // Answer chunks: concatenation equals the full answer
                    // minus the thinking block
                    let answer = strip_thinking_block(&response.answer);
                    for chunk in chunk_answer(&answer, 400) {
                        let _ = tx.send(PipelineEvent::Answer { content: chunk }).await;
                    }

                    let _ = tx
                        .send(PipelineEvent::Sources {
                            sources: response.sources.clone(),
                        })
                        .await;
                    if !response.suggested_questions.is_empty() {
                        let _ = tx
                            .send(PipelineEvent::SuggestedQuestions {
                                questions: response.suggested_questions.clone(),
                            })
                            .await;
                    }
                    let _ = tx
                        .send(PipelineEvent::Metadata {
                            metadata: response.metadata,
                        })
                        .await;
                    let _ = tx.send(PipelineEvent::Done).await;
                }
                Err(e) => {
                    let _ = tx
                        .send(PipelineEvent::Error {
                            message: e.to_string(),
                        })
                        .await;
                }
            }
        });

        rx
    }

    async fn ensure_session_row(&self, session: &SessionState) {
        let record = SessionRecord {
            id: session.session_id.clone(),
            user_id: session.user_id.clone(),
            started_at: chrono::Utc::now(),
        };
        match self.session_repo.get(&record.id).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                if let Err(e) = self.session_repo.create(&record).await {
                    tracing::warn!(error = %e, "session row write failed");
                }
            }
            Err(e) => tracing::warn!(error = %e, "session row read failed"),
        }
    }

    /// Blocked turn: the message is stored (flagged) so history is
    /// complete, but no extraction or summarization runs.
    fn schedule_blocked_persistence(
        &self,
        request: &ChatRequest,
        session: &SessionState,
        reason: &str,
    ) {
        let messages = self.messages.clone();
        let user_message = ChatMessage::new(
            session.session_id.clone(),
            request.user_id.clone(),
            MessageRole::User,
            request.message.clone(),
        )
        .blocked(reason);
        let assistant_message = ChatMessage::new(
            session.session_id.clone(),
            request.user_id.clone(),
            MessageRole::Assistant,
            BLOCKED_RESPONSE,
        );

        self.scheduler.schedule(Job::new("persist_blocked", move || {
            let messages = messages.clone();
            let user_message = user_message.clone();
            let assistant_message = assistant_message.clone();
            async move {
                messages.append(&user_message).await?;
                messages.append(&assistant_message).await?;
                Ok(())
            }
        }));
    }

    /// Stage-6 jobs. Each is idempotent: messages are keyed by their
    /// request-generated ids, fact upserts and insight merges are stable
    /// under replay.
    fn schedule_post_turn(
        &self,
        request: &ChatRequest,
        session: &SessionState,
        response: &ChatResponse,
    ) {
        let user_message = ChatMessage::new(
            session.session_id.clone(),
            request.user_id.clone(),
            MessageRole::User,
            request.message.clone(),
        );
        let assistant_message = ChatMessage::new(
            session.session_id.clone(),
            request.user_id.clone(),
            MessageRole::Assistant,
            response.answer.clone(),
        );

        {
            let messages = self.messages.clone();
            let user_message = user_message.clone();
            let assistant_message = assistant_message.clone();
            self.scheduler.schedule(Job::new("persist_messages", move || {
                let messages = messages.clone();
                let user_message = user_message.clone();
                let assistant_message = assistant_message.clone();
                async move {
                    messages.append(&user_message).await?;
                    messages.append(&assistant_message).await?;
                    Ok(())
                }
            }));
        }

        {
            let extractor = self.extractor.clone();
            let user_id = request.user_id.clone();
            let user_text = request.message.clone();
            let answer = response.answer.clone();
            self.scheduler.schedule(Job::new("extract_facts", move || {
                let extractor = extractor.clone();
                let user_id = user_id.clone();
                let user_text = user_text.clone();
                let answer = answer.clone();
                async move {
                    extractor
                        .extract_facts(&user_id, &user_text, &answer)
                        .await
                        .map(|_| ())
                        .map_err(Into::into)
                }
            }));
        }

        {
            let extractor = self.extractor.clone();
            let insights = self.insights.clone();
            let events = self.events.clone();
            let user_id = request.user_id.clone();
            let user_text = request.message.clone();
            let answer = response.answer.clone();
            self.scheduler.schedule(Job::new("extract_insights", move || {
                let extractor = extractor.clone();
                let insights = insights.clone();
                let events = events.clone();
                let user_id = user_id.clone();
                let user_text = user_text.clone();
                let answer = answer.clone();
                async move {
                    let outcome = extractor
                        .extract_insights(&user_id, &user_text, &answer)
                        .await
                        .map_err(helmsman_core::Error::from)?;

                    for written in &outcome.written {
                        if written.category == "knowledge_gap" && events.is_enabled() {
                            let event = AiEvent::KnowledgeGapDetected {
                                user_id: user_id.clone(),
                                topic: written
                                    .sub_topic
                                    .clone()
                                    .unwrap_or_else(|| written.content.clone()),
                            };
                            if let Err(e) = events.publish(&event).await {
                                tracing::warn!(error = %e, "LMS event delivery failed");
                            }
                        }
                        if written.category == "goal_evolution" && events.is_enabled() {
                            let event = AiEvent::GoalEvolution {
                                user_id: user_id.clone(),
                                description: written.content.clone(),
                            };
                            if let Err(e) = events.publish(&event).await {
                                tracing::warn!(error = %e, "LMS event delivery failed");
                            }
                        }
                    }

                    if outcome.consolidation_due {
                        insights.consolidate(&user_id).await.map_err(
                            helmsman_core::Error::from,
                        )?;
                    }
                    Ok(())
                }
            }));
        }

        // Signals the LMS cares about beyond memory extraction
        if self.events.is_enabled() {
            let mut signals: Vec<AiEvent> = Vec::new();
            if response
                .metadata
                .warning
                .as_deref()
                .map(|w| w.contains("low confidence"))
                .unwrap_or(false)
            {
                signals.push(AiEvent::StuckDetected {
                    user_id: request.user_id.clone(),
                    session_id: session.session_id.clone(),
                    reason: "answers below confidence threshold after retries".to_string(),
                });
            }
            if let Some(uc) = &request.user_context {
                if let (Some(module_id), Some(progress)) = (&uc.module_id, uc.progress) {
                    if progress >= 1.0 {
                        signals.push(AiEvent::ModuleCompletedConfidence {
                            user_id: request.user_id.clone(),
                            module_id: module_id.clone(),
                            confidence: response.metadata.confidence_score,
                        });
                    }
                }
            }
            if !signals.is_empty() {
                let events = self.events.clone();
                self.scheduler.schedule(Job::new("lms_events", move || {
                    let events = events.clone();
                    let signals = signals.clone();
                    async move {
                        for event in &signals {
                            events.publish(event).await?;
                        }
                        Ok(())
                    }
                }));
            }
        }

        {
            let summarizer = self.summarizer.clone();
            let user_id = request.user_id.clone();
            let session_id = session.session_id.clone();
            self.scheduler.schedule(Job::new("summarize", move || {
                let summarizer = summarizer.clone();
                let user_id = user_id.clone();
                let session_id = session_id.clone();
                async move {
                    summarizer
                        .maybe_summarize(&user_id, &session_id)
                        .await
                        .map(|_| ())
                        .map_err(Into::into)
                }
            }));
        }
    }

    /// Access to the underlying model (health checks, suggestions)
    pub fn model_name(&self) -> &str {
        self.llm.model_name()
    }

    /// Test support: wait for stage-6 jobs to settle
    pub async fn quiesce_background(&self) {
        self.scheduler.quiesce().await;
    }

    /// Graceful shutdown: drain background work with a deadline
    pub async fn shutdown(&self, drain_timeout: Duration) {
        self.scheduler.shutdown(drain_timeout).await;
    }
}

/// Drop a leading `<thinking>…</thinking>` block
fn strip_thinking_block(answer: &str) -> String {
    let trimmed = answer.trim_start();
    if let Some(rest) = trimmed.strip_prefix("<thinking>") {
        if let Some(end) = rest.find("</thinking>") {
            return rest[end + "</thinking>".len()..].trim_start().to_string();
        }
    }
    answer.to_string()
}

/// Split an answer into chunks of at most `max_chars` characters on
/// whitespace boundaries where possible
fn chunk_answer(answer: &str, max_chars: usize) -> Vec<String> {
    if answer.is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut current = String::new();

    for word in answer.split_inclusive(char::is_whitespace) {
        if current.chars().count() + word.chars().count() > max_chars && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_answer_concatenation_identity() {
        let answer = "Điều 15 quy định rằng ".repeat(100);
        let chunks = chunk_answer(&answer, 400);
        assert!(chunks.len() > 1);
        assert_eq!(chunks.concat(), answer);
        assert!(chunks.iter().all(|c| c.chars().count() <= 401));
    }

    #[test]
    fn test_strip_thinking_block() {
        assert_eq!(
            strip_thinking_block("<thinking>suy nghĩ</thinking>Đáp án."),
            "Đáp án."
        );
        assert_eq!(strip_thinking_block("Đáp án."), "Đáp án.");
    }

}
