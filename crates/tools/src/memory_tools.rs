//! Memory tools: recall and explicit remember

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use helmsman_core::{EmbeddingTask, TextEmbedder};
use helmsman_memory::{FactStore, InsightStore};

use crate::{Tool, ToolAccess, ToolCategory, ToolContext, ToolError, ToolOutput, ToolSchema};

/// Reads the user's facts and most relevant insights
pub struct RecallMemoryTool {
    facts: Arc<FactStore>,
    insights: Arc<InsightStore>,
    embedder: Arc<dyn TextEmbedder>,
}

impl RecallMemoryTool {
    pub fn new(
        facts: Arc<FactStore>,
        insights: Arc<InsightStore>,
        embedder: Arc<dyn TextEmbedder>,
    ) -> Self {
        Self {
            facts,
            insights,
            embedder,
        }
    }
}

#[async_trait]
impl Tool for RecallMemoryTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "recall_memory".into(),
            description: "Xem lại những gì đã biết về người học: tên, mục tiêu, \
                          điểm yếu, thói quen học."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Chủ đề đang quan tâm, để chọn quan sát phù hợp"
                    }
                },
                "required": []
            }),
            category: ToolCategory::Memory,
            access: ToolAccess::Read,
        }
    }

    async fn execute(&self, arguments: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let facts = self
            .facts
            .get_facts(&ctx.user_id)
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;

        let query = arguments.get("query").and_then(Value::as_str).unwrap_or("");
        let query_embedding = if query.is_empty() {
            Vec::new()
        } else {
            self.embedder
                .embed_one(EmbeddingTask::Query, query)
                .await
                .unwrap_or_default()
        };

        let insights = self
            .insights
            .get_insights(&ctx.user_id, &query_embedding, 5)
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;

        if facts.is_empty() && insights.is_empty() {
            return Ok(ToolOutput::text("Chưa có ghi nhớ nào về người học này."));
        }

        let mut content = String::new();
        if !facts.is_empty() {
            content.push_str("Thông tin:\n");
            for fact in &facts {
                content.push_str(&format!("- {}: {}\n", fact.fact_type.as_str(), fact.value));
            }
        }
        if !insights.is_empty() {
            content.push_str("Quan sát:\n");
            for insight in &insights {
                content.push_str(&format!(
                    "- [{}] {}\n",
                    insight.category.as_str(),
                    insight.content
                ));
            }
        }

        Ok(ToolOutput::text(content))
    }
}

/// Explicitly stores a fact the user asked to be remembered
pub struct RememberFactTool {
    facts: Arc<FactStore>,
    embedder: Arc<dyn TextEmbedder>,
}

impl RememberFactTool {
    pub fn new(facts: Arc<FactStore>, embedder: Arc<dyn TextEmbedder>) -> Self {
        Self { facts, embedder }
    }
}

#[async_trait]
impl Tool for RememberFactTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "remember_fact".into(),
            description: "Ghi nhớ một thông tin bền vững về người học khi họ yêu cầu \
                          (tên, mục tiêu, sở thích...)."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "fact_type": {
                        "type": "string",
                        "enum": ["name", "role", "level", "goal", "preference", "weakness"]
                    },
                    "value": {"type": "string"}
                },
                "required": ["fact_type", "value"]
            }),
            category: ToolCategory::Memory,
            access: ToolAccess::Write,
        }
    }

    async fn execute(&self, arguments: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let fact_type = arguments
            .get("fact_type")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidInput("fact_type is required".into()))?;
        let value = arguments
            .get("value")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidInput("value is required".into()))?;

        let embedding = self
            .embedder
            .embed_one(EmbeddingTask::Document, value)
            .await
            .unwrap_or_default();

        let written = self
            .facts
            .upsert_fact(&ctx.user_id, fact_type, value, embedding, 0.95)
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;

        Ok(match written {
            Some(fact) => ToolOutput::text(format!(
                "Đã ghi nhớ {}: {}",
                fact.fact_type.as_str(),
                fact.value
            )),
            None => ToolOutput::error("Loại thông tin không được hỗ trợ."),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ctx;
    use helmsman_memory::MemoryConfig;
    use helmsman_persistence::{InMemoryFactRepository, InMemoryInsightRepository};

    struct NoopEmbedder;

    #[async_trait]
    impl TextEmbedder for NoopEmbedder {
        async fn embed(
            &self,
            _task: EmbeddingTask,
            texts: &[String],
        ) -> helmsman_core::Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    struct NoopModel;

    #[async_trait]
    impl helmsman_core::LanguageModel for NoopModel {
        async fn chat(
            &self,
            _messages: &[helmsman_core::Message],
            _tools: &[helmsman_core::ToolDefinition],
        ) -> helmsman_core::Result<helmsman_core::LlmMessage> {
            Ok(helmsman_core::LlmMessage::default())
        }

        fn model_name(&self) -> &str {
            "noop"
        }
    }

    fn stores() -> (Arc<FactStore>, Arc<InsightStore>) {
        (
            Arc::new(FactStore::new(
                Arc::new(InMemoryFactRepository::new()),
                MemoryConfig::default(),
            )),
            Arc::new(InsightStore::new(
                Arc::new(InMemoryInsightRepository::new()),
                Arc::new(NoopModel),
                MemoryConfig::default(),
            )),
        )
    }

    #[tokio::test]
    async fn test_remember_then_recall() {
        let (facts, insights) = stores();
        let embedder = Arc::new(NoopEmbedder);

        let remember = RememberFactTool::new(facts.clone(), embedder.clone());
        remember
            .execute(json!({"fact_type": "name", "value": "Minh"}), &ctx())
            .await
            .unwrap();

        let recall = RecallMemoryTool::new(facts, insights, embedder);
        let output = recall.execute(json!({}), &ctx()).await.unwrap();
        assert!(output.content.contains("name: Minh"));
    }

    #[tokio::test]
    async fn test_recall_empty_memory() {
        let (facts, insights) = stores();
        let recall = RecallMemoryTool::new(facts, insights, Arc::new(NoopEmbedder));
        let output = recall.execute(json!({}), &ctx()).await.unwrap();
        assert!(output.content.contains("Chưa có ghi nhớ"));
    }

    #[tokio::test]
    async fn test_remember_unknown_type_reports_error_output() {
        let (facts, _) = stores();
        let remember = RememberFactTool::new(facts, Arc::new(NoopEmbedder));
        // Bypasses schema validation by calling execute directly
        let output = remember
            .execute(json!({"fact_type": "mood", "value": "vui"}), &ctx())
            .await
            .unwrap();
        assert!(output.is_error);
    }
}
