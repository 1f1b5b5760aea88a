//! Stage-3 context building
//!
//! Pulls facts, top-k insights, the session summary and the recent
//! message window (blocked messages excluded, summarized span replaced),
//! then assembles the system prompt through the persona loader.

use std::sync::Arc;

use helmsman_core::{
    EmbeddingTask, Message, SessionState, TextEmbedder, ToolDefinition, UserContext, UserRole,
};
use helmsman_config::PersonaLibrary;
use helmsman_llm::{MemorySnippet, PromptBuilder, PromptContext};
use helmsman_memory::{FactStore, InsightStore, MemoryConfig, Summarizer};
use helmsman_persistence::MessageRepository;

/// Built per-request context
pub struct BuiltContext {
    pub system_prompt: String,
    /// Windowed prior conversation as model messages
    pub history: Vec<Message>,
    pub memory: MemorySnippet,
}

pub struct ContextBuilder {
    facts: Arc<FactStore>,
    insights: Arc<InsightStore>,
    summarizer: Arc<Summarizer>,
    messages: Arc<dyn MessageRepository>,
    embedder: Arc<dyn TextEmbedder>,
    personas: Arc<PersonaLibrary>,
    config: MemoryConfig,
}

impl ContextBuilder {
    pub fn new(
        facts: Arc<FactStore>,
        insights: Arc<InsightStore>,
        summarizer: Arc<Summarizer>,
        messages: Arc<dyn MessageRepository>,
        embedder: Arc<dyn TextEmbedder>,
        personas: Arc<PersonaLibrary>,
        config: MemoryConfig,
    ) -> Self {
        Self {
            facts,
            insights,
            summarizer,
            messages,
            embedder,
            personas,
            config,
        }
    }

    /// Build the stage-3 context. Memory reads degrade to empty on
    /// failure; context building never fails a request.
    pub async fn build(
        &self,
        session: &SessionState,
        role: UserRole,
        user_context: Option<&UserContext>,
        user_message: &str,
        tools: &[ToolDefinition],
    ) -> BuiltContext {
        let user_id = session.user_id.as_str();

        let facts = self.facts.get_facts(user_id).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "fact read failed, continuing without");
            Vec::new()
        });

        let query_embedding = self
            .embedder
            .embed_one(EmbeddingTask::Query, user_message)
            .await
            .unwrap_or_default();
        let insights = self
            .insights
            .get_insights(user_id, &query_embedding, self.config.insight_context_top_k)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "insight read failed, continuing without");
                Vec::new()
            });

        let summary = self
            .summarizer
            .get_summary(user_id, &session.session_id)
            .await
            .unwrap_or(None);

        let memory = MemorySnippet {
            facts,
            insights,
            summary,
        };

        let history = self.window(session, &memory).await;

        let persona = self
            .personas
            .for_role(role.as_str())
            .cloned()
            .unwrap_or_else(|| {
                PersonaLibrary::builtin()
                    .get("base")
                    .cloned()
                    .expect("builtin base persona")
            });

        let ctx = PromptContext {
            persona: &persona,
            role,
            user_context,
            memory: &memory,
            pronoun_style: session.pronoun_style,
            recent_openers: session.recent_openers.iter().cloned().collect(),
            tools,
        };
        let system_prompt = PromptBuilder::build_system_prompt(&ctx);

        BuiltContext {
            system_prompt,
            history,
            memory,
        }
    }

    /// Sliding message window: blocked messages excluded, messages already
    /// covered by the summary omitted (the summary stands in for them).
    async fn window(&self, session: &SessionState, memory: &MemorySnippet) -> Vec<Message> {
        let recent = match self
            .messages
            .recent_in_session(&session.session_id, self.config.context_window_size)
            .await
        {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!(error = %e, "message window read failed, continuing without");
                return Vec::new();
            }
        };

        let covered_until = memory.summary.as_ref().map(|s| s.covers_until);

        recent
            .into_iter()
            .filter(|m| !m.is_blocked)
            .filter(|m| covered_until.map(|t| m.created_at > t).unwrap_or(true))
            .map(|m| match m.role {
                helmsman_core::MessageRole::User => Message::user(m.content),
                helmsman_core::MessageRole::Assistant => Message::assistant(m.content),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use helmsman_core::{ChatMessage, LanguageModel, MessageRole};
    use helmsman_persistence::{
        InMemoryFactRepository, InMemoryInsightRepository, InMemoryMessageRepository,
        InMemorySummaryRepository,
    };

    struct NoopModel;

    #[async_trait]
    impl LanguageModel for NoopModel {
        async fn chat(
            &self,
            _messages: &[Message],
            _tools: &[ToolDefinition],
        ) -> helmsman_core::Result<helmsman_core::LlmMessage> {
            Ok(helmsman_core::LlmMessage::default())
        }

        fn model_name(&self) -> &str {
            "noop"
        }
    }

    struct NoopEmbedder;

    #[async_trait]
    impl TextEmbedder for NoopEmbedder {
        async fn embed(
            &self,
            _task: EmbeddingTask,
            texts: &[String],
        ) -> helmsman_core::Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0]).collect())
        }

        fn dimension(&self) -> usize {
            1
        }
    }

    fn builder(messages: Arc<InMemoryMessageRepository>) -> ContextBuilder {
        let llm = Arc::new(NoopModel);
        let config = MemoryConfig::default();
        ContextBuilder::new(
            Arc::new(FactStore::new(
                Arc::new(InMemoryFactRepository::new()),
                config.clone(),
            )),
            Arc::new(InsightStore::new(
                Arc::new(InMemoryInsightRepository::new()),
                llm.clone(),
                config.clone(),
            )),
            Arc::new(Summarizer::new(
                Arc::new(InMemorySummaryRepository::new()),
                messages.clone(),
                llm,
                config.clone(),
            )),
            messages,
            Arc::new(NoopEmbedder),
            Arc::new(PersonaLibrary::builtin()),
            config,
        )
    }

    #[tokio::test]
    async fn test_blocked_messages_excluded_from_window() {
        let messages = Arc::new(InMemoryMessageRepository::new());
        let session = SessionState::new("s1", "u1");

        let mut ok = ChatMessage::new("s1", "u1", MessageRole::User, "câu hợp lệ");
        ok.created_at = Utc::now() - chrono::Duration::seconds(10);
        messages.append(&ok).await.unwrap();
        messages
            .append(&ChatMessage::new("s1", "u1", MessageRole::User, "câu bị chặn").blocked("x"))
            .await
            .unwrap();

        let built = builder(messages)
            .build(&session, UserRole::Student, None, "câu hỏi", &[])
            .await;

        assert_eq!(built.history.len(), 1);
        assert_eq!(built.history[0].content, "câu hợp lệ");
    }

    #[tokio::test]
    async fn test_system_prompt_contains_persona_and_pronoun_rule() {
        let messages = Arc::new(InMemoryMessageRepository::new());
        let mut session = SessionState::new("s1", "u1");
        session.observe_user_message("cậu giúp mình nhé");

        let built = builder(messages)
            .build(&session, UserRole::Student, None, "câu hỏi", &[])
            .await;

        assert!(built.system_prompt.contains("trợ giảng hàng hải")
            || built.system_prompt.contains("Trợ giảng")
            || built.system_prompt.to_lowercase().contains("hàng hải"));
        assert!(built.system_prompt.contains("mình"));
    }
}
