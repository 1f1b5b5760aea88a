//! Session summarization
//!
//! When the messages since the last summary exceed the token threshold, an
//! LLM condenses them into a summary row. Context builders use the summary
//! in place of the covered messages.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use helmsman_core::{ChatMessage, LanguageModel, Message, Summary};
use helmsman_persistence::{MessageRepository, SummaryRepository};

use crate::{MemoryConfig, MemoryError};

pub struct Summarizer {
    summaries: Arc<dyn SummaryRepository>,
    messages: Arc<dyn MessageRepository>,
    llm: Arc<dyn LanguageModel>,
    config: MemoryConfig,
}

impl Summarizer {
    pub fn new(
        summaries: Arc<dyn SummaryRepository>,
        messages: Arc<dyn MessageRepository>,
        llm: Arc<dyn LanguageModel>,
        config: MemoryConfig,
    ) -> Self {
        Self {
            summaries,
            messages,
            llm,
            config,
        }
    }

    pub async fn get_summary(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<Summary>, MemoryError> {
        Ok(self.summaries.latest(user_id, session_id).await?)
    }

    /// Summarize when the un-summarized span crosses the token threshold.
    /// Returns the new summary if one was produced.
    pub async fn maybe_summarize(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<Summary>, MemoryError> {
        let last = self.summaries.latest(user_id, session_id).await?;
        let after = last
            .as_ref()
            .map(|s| s.covers_until)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let pending: Vec<ChatMessage> = self
            .messages
            .since(session_id, after)
            .await?
            .into_iter()
            .filter(|m| !m.is_blocked)
            .collect();

        if pending.is_empty() {
            return Ok(None);
        }

        let token_estimate: usize = pending
            .iter()
            .map(|m| self.llm.estimate_tokens(&m.content))
            .sum();
        if token_estimate < self.config.summarization_token_threshold {
            return Ok(None);
        }

        let covers_until = pending
            .iter()
            .map(|m| m.created_at)
            .max()
            .unwrap_or_else(Utc::now);

        let mut transcript = String::new();
        if let Some(previous) = &last {
            transcript.push_str(&format!("Tóm tắt trước đó: {}\n\n", previous.content));
        }
        for message in &pending {
            transcript.push_str(&format!("{}: {}\n", message.role.as_str(), message.content));
        }

        let prompt = format!(
            "Tóm tắt đoạn hội thoại dạy học hàng hải dưới đây trong 5-8 câu, \
             giữ lại: chủ đề đã học, điểm học viên còn yếu, và các mốc đã thống nhất.\n\n{transcript}"
        );

        let msg = self
            .llm
            .chat(&[Message::user(prompt)], &[])
            .await
            .map_err(|e| MemoryError::Extraction(e.to_string()))?;

        if msg.text.trim().is_empty() {
            return Err(MemoryError::Extraction("empty summary".into()));
        }

        let summary = Summary {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            content: msg.text.trim().to_string(),
            embedding: Vec::new(),
            covers_until,
            created_at: Utc::now(),
        };
        self.summaries.put(&summary).await?;

        tracing::info!(
            user_id,
            session_id,
            tokens = token_estimate,
            "session summarized"
        );
        Ok(Some(summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use helmsman_core::{LlmMessage, MessageRole, Result as CoreResult, ToolDefinition};
    use helmsman_persistence::{InMemoryMessageRepository, InMemorySummaryRepository};

    struct FixedModel;

    #[async_trait]
    impl LanguageModel for FixedModel {
        async fn chat(
            &self,
            _messages: &[Message],
            _tools: &[ToolDefinition],
        ) -> CoreResult<LlmMessage> {
            Ok(LlmMessage {
                text: "Học viên ôn COLREG, còn yếu về đèn hiệu ban đêm.".into(),
                ..Default::default()
            })
        }

        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    fn summarizer(
        messages: Arc<InMemoryMessageRepository>,
        summaries: Arc<InMemorySummaryRepository>,
    ) -> Summarizer {
        Summarizer::new(summaries, messages, Arc::new(FixedModel), MemoryConfig::default())
    }

    #[tokio::test]
    async fn test_below_threshold_no_summary() {
        let messages = Arc::new(InMemoryMessageRepository::new());
        let summaries = Arc::new(InMemorySummaryRepository::new());
        use helmsman_persistence::MessageRepository;
        messages
            .append(&ChatMessage::new("s1", "u1", MessageRole::User, "câu ngắn"))
            .await
            .unwrap();

        let s = summarizer(messages, summaries);
        assert!(s.maybe_summarize("u1", "s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_threshold_crossed_produces_summary_and_advances_cover() {
        let messages = Arc::new(InMemoryMessageRepository::new());
        let summaries = Arc::new(InMemorySummaryRepository::new());
        use helmsman_persistence::MessageRepository;

        // ~4500 tokens at the 3-chars-per-token estimate
        let long = "từ ".repeat(4500);
        for i in 0..3 {
            let mut msg = ChatMessage::new("s1", "u1", MessageRole::User, long.clone());
            msg.created_at = Utc::now() + chrono::Duration::seconds(i);
            messages.append(&msg).await.unwrap();
        }

        let s = summarizer(messages.clone(), summaries.clone());
        let summary = s.maybe_summarize("u1", "s1").await.unwrap().unwrap();
        assert!(summary.content.contains("COLREG"));

        // A second pass has nothing new to cover
        assert!(s.maybe_summarize("u1", "s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_blocked_messages_excluded_from_summary_input() {
        let messages = Arc::new(InMemoryMessageRepository::new());
        let summaries = Arc::new(InMemorySummaryRepository::new());
        use helmsman_persistence::MessageRepository;

        let long = "từ ".repeat(5000);
        messages
            .append(&ChatMessage::new("s1", "u1", MessageRole::User, long).blocked("policy"))
            .await
            .unwrap();

        // The only pending message is blocked: below threshold, no summary
        let s = summarizer(messages, summaries);
        assert!(s.maybe_summarize("u1", "s1").await.unwrap().is_none());
    }
}
