//! Memory extraction
//!
//! After each user/assistant pair, two strict-JSON prompts pull facts and
//! behavioral insights out of the exchange. All writes flow through the
//! fact/insight stores, so validation, dedup and caps apply uniformly.

use std::sync::Arc;

use serde::Deserialize;

use helmsman_core::{EmbeddingTask, LanguageModel, Message, TextEmbedder};

use crate::facts::FactStore;
use crate::insights::InsightStore;
use crate::MemoryError;

/// Fact candidate from the extractor
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedFact {
    pub fact_type: String,
    pub value: String,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
}

/// Insight candidate from the extractor
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedInsight {
    pub category: String,
    pub content: String,
    #[serde(default)]
    pub sub_topic: Option<String>,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
}

fn default_confidence() -> f32 {
    0.7
}

/// What an insight-extraction pass wrote
#[derive(Debug, Clone, Default)]
pub struct InsightExtractionOutcome {
    /// Candidates that were accepted (inserted or merged)
    pub written: Vec<ExtractedInsight>,
    /// The user's set crossed the consolidation threshold
    pub consolidation_due: bool,
}

/// LLM-driven extractor writing through the memory stores
pub struct MemoryExtractor {
    llm: Arc<dyn LanguageModel>,
    embedder: Arc<dyn TextEmbedder>,
    facts: Arc<FactStore>,
    insights: Arc<InsightStore>,
}

impl MemoryExtractor {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        embedder: Arc<dyn TextEmbedder>,
        facts: Arc<FactStore>,
        insights: Arc<InsightStore>,
    ) -> Self {
        Self {
            llm,
            embedder,
            facts,
            insights,
        }
    }

    /// Extract and persist facts for one exchange. Returns how many facts
    /// were written; extraction failures are logged, never propagated.
    pub async fn extract_facts(
        &self,
        user_id: &str,
        user_message: &str,
        assistant_message: &str,
    ) -> Result<usize, MemoryError> {
        let prompt = format!(
            "Trích xuất thông tin cá nhân bền vững về học viên từ lượt hội thoại.\n\
             Chỉ các loại: name, role, level, goal, preference, weakness.\n\
             Không suy diễn; bỏ qua nếu không có gì.\n\
             Học viên: {user_message}\n\
             Trợ giảng: {assistant_message}\n\
             Trả lời JSON: [{{\"fact_type\": \"name\", \"value\": \"...\", \"confidence\": 0.9}}]"
        );

        let candidates: Vec<ExtractedFact> = self.extract_json(&prompt).await?;
        let mut written = 0usize;

        for candidate in candidates {
            if candidate.value.trim().is_empty() {
                continue;
            }
            let embedding = self
                .embedder
                .embed_one(EmbeddingTask::Document, &candidate.value)
                .await
                .unwrap_or_default();
            match self
                .facts
                .upsert_fact(
                    user_id,
                    &candidate.fact_type,
                    &candidate.value,
                    embedding,
                    candidate.confidence,
                )
                .await
            {
                Ok(Some(_)) => written += 1,
                Ok(None) => {}
                Err(MemoryError::Rejected(reason)) => {
                    tracing::debug!(reason, "fact candidate rejected");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(written)
    }

    /// Extract and persist behavioral insights for one exchange
    pub async fn extract_insights(
        &self,
        user_id: &str,
        user_message: &str,
        assistant_message: &str,
    ) -> Result<InsightExtractionOutcome, MemoryError> {
        let prompt = format!(
            "Quan sát hành vi học tập của học viên từ lượt hội thoại (không phải nội dung kiến thức).\n\
             Nhóm: learning_style, knowledge_gap, goal_evolution, habit, preference.\n\
             Mỗi quan sát là một câu khẳng định đầy đủ, tối thiểu 20 ký tự.\n\
             Học viên: {user_message}\n\
             Trợ giảng: {assistant_message}\n\
             Trả lời JSON: [{{\"category\": \"knowledge_gap\", \"content\": \"...\", \
             \"sub_topic\": null, \"confidence\": 0.8}}]"
        );

        let candidates: Vec<ExtractedInsight> = self.extract_json(&prompt).await?;
        let mut outcome = InsightExtractionOutcome::default();

        for candidate in candidates {
            let embedding = self
                .embedder
                .embed_one(EmbeddingTask::Document, &candidate.content)
                .await
                .unwrap_or_default();
            match self
                .insights
                .add_insight(
                    user_id,
                    &candidate.category,
                    &candidate.content,
                    candidate.sub_topic.clone(),
                    embedding,
                    candidate.confidence,
                )
                .await
            {
                Ok(write) => {
                    outcome.consolidation_due |= write.consolidation_due;
                    outcome.written.push(candidate);
                }
                Err(MemoryError::Rejected(reason)) => {
                    tracing::debug!(reason, "insight candidate rejected");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(outcome)
    }

    async fn extract_json<T: serde::de::DeserializeOwned>(
        &self,
        prompt: &str,
    ) -> Result<Vec<T>, MemoryError> {
        let msg = self
            .llm
            .chat(&[Message::user(prompt.to_string())], &[])
            .await
            .map_err(|e| MemoryError::Extraction(e.to_string()))?;

        let Some(start) = msg.text.find('[') else {
            return Ok(Vec::new());
        };
        let Some(end) = msg.text.rfind(']') else {
            return Ok(Vec::new());
        };

        serde_json::from_str(&msg.text[start..=end])
            .map_err(|e| MemoryError::Extraction(format!("bad extraction JSON: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use helmsman_core::{LlmMessage, Result as CoreResult, ToolDefinition};
    use helmsman_persistence::{InMemoryFactRepository, InMemoryInsightRepository};
    use parking_lot::Mutex;

    struct ScriptedModel {
        replies: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn new(replies: Vec<&str>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().rev().map(String::from).collect()),
            })
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn chat(
            &self,
            _messages: &[Message],
            _tools: &[ToolDefinition],
        ) -> CoreResult<LlmMessage> {
            Ok(LlmMessage {
                text: self.replies.lock().pop().unwrap_or_else(|| "[]".into()),
                ..Default::default()
            })
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    struct ZeroEmbedder;

    #[async_trait]
    impl TextEmbedder for ZeroEmbedder {
        async fn embed(
            &self,
            _task: EmbeddingTask,
            texts: &[String],
        ) -> CoreResult<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    fn extractor(llm: Arc<ScriptedModel>) -> (MemoryExtractor, Arc<FactStore>) {
        let facts = Arc::new(FactStore::new(
            Arc::new(InMemoryFactRepository::new()),
            crate::MemoryConfig::default(),
        ));
        let insights = Arc::new(InsightStore::new(
            Arc::new(InMemoryInsightRepository::new()),
            llm.clone(),
            crate::MemoryConfig::default(),
        ));
        (
            MemoryExtractor::new(llm, Arc::new(ZeroEmbedder), facts.clone(), insights),
            facts,
        )
    }

    #[tokio::test]
    async fn test_name_introduction_writes_fact() {
        let llm = ScriptedModel::new(vec![
            r#"[{"fact_type": "name", "value": "Minh", "confidence": 0.95}]"#,
        ]);
        let (extractor, facts) = extractor(llm);

        let written = extractor
            .extract_facts("u2", "Xin chào, tôi là Minh", "Chào Minh!")
            .await
            .unwrap();
        assert_eq!(written, 1);

        let stored = facts.get_facts("u2").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].value, "Minh");
    }

    #[tokio::test]
    async fn test_no_personal_data_writes_nothing() {
        let llm = ScriptedModel::new(vec!["[]"]);
        let (extractor, facts) = extractor(llm);

        let written = extractor
            .extract_facts("u1", "Quy tắc 15 là gì?", "Quy tắc 15 quy định...")
            .await
            .unwrap();
        assert_eq!(written, 0);
        assert!(facts.get_facts("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_candidates_skipped_not_fatal() {
        let llm = ScriptedModel::new(vec![
            r#"[{"fact_type": "favorite_ship", "value": "container"}, {"fact_type": "goal", "value": "thi OOW"}]"#,
        ]);
        let (extractor, facts) = extractor(llm);

        let written = extractor.extract_facts("u1", "…", "…").await.unwrap();
        assert_eq!(written, 1);
        let stored = facts.get_facts("u1").await.unwrap();
        assert_eq!(stored[0].value, "thi OOW");
    }

    #[tokio::test]
    async fn test_insight_extraction_reports_consolidation_due() {
        let llm = ScriptedModel::new(vec![
            r#"[{"category": "knowledge_gap", "content": "Học viên chưa phân biệt được đèn mạn và đèn cột khi quan sát ban đêm.", "sub_topic": "đèn hiệu", "confidence": 0.8}]"#,
        ]);
        let (extractor, _) = extractor(llm);

        let outcome = extractor
            .extract_insights("u1", "Đèn nào là đèn mạn?", "Đèn mạn là...")
            .await
            .unwrap();
        // Far below the threshold, but the candidate was written
        assert!(!outcome.consolidation_due);
        assert_eq!(outcome.written.len(), 1);
        assert_eq!(outcome.written[0].category, "knowledge_gap");
    }
}
