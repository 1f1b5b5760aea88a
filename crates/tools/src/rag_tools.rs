//! RAG tools: regulation search and entity lookup

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use helmsman_rag::{ChunkFilter, CorrectiveRag, EntityLookup};

use crate::{Tool, ToolAccess, ToolCategory, ToolContext, ToolError, ToolOutput, ToolSchema};

/// Answers a question against the regulation corpus through the full CRAG
/// pipeline and returns the cited result.
pub struct SearchRegulationsTool {
    crag: Arc<CorrectiveRag>,
}

impl SearchRegulationsTool {
    pub fn new(crag: Arc<CorrectiveRag>) -> Self {
        Self { crag }
    }
}

#[async_trait]
impl Tool for SearchRegulationsTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "search_regulations".into(),
            description: "Tra cứu điều luật hàng hải (COLREG, SOLAS...) và trả về \
                          câu trả lời có trích dẫn."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Câu hỏi hoặc tình huống cần tra cứu"
                    },
                    "document_id": {
                        "type": "string",
                        "description": "Giới hạn trong một tài liệu (tùy chọn)"
                    }
                },
                "required": ["query"]
            }),
            category: ToolCategory::Rag,
            access: ToolAccess::Read,
        }
    }

    async fn execute(&self, arguments: Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let query = arguments
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidInput("query is required".into()))?;

        let filter = arguments
            .get("document_id")
            .and_then(Value::as_str)
            .map(|doc| ChunkFilter {
                document_id: Some(doc.to_string()),
                ..Default::default()
            });

        let result = self
            .crag
            .answer(query, filter, None)
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;

        let mut content = result.answer.clone();
        if !result.citations.is_empty() {
            content.push_str("\n\nNguồn: ");
            content.push_str(
                &result
                    .citations
                    .iter()
                    .map(|c| format!("{} (trang {})", c.document_id, c.page_number))
                    .collect::<Vec<_>>()
                    .join(", "),
            );
        }

        Ok(ToolOutput {
            content,
            citations: result.citations,
            is_error: false,
        })
    }
}

/// Looks up graph entities related to a query or to chunk ids
pub struct LookupEntitiesTool {
    entities: Arc<EntityLookup>,
}

impl LookupEntitiesTool {
    pub fn new(entities: Arc<EntityLookup>) -> Self {
        Self { entities }
    }
}

#[async_trait]
impl Tool for LookupEntitiesTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "lookup_entities".into(),
            description: "Tìm các khái niệm liên quan (điều luật, loại tàu, thao tác, \
                          thiết bị) trong đồ thị tri thức."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Thuật ngữ hoặc câu hỏi"
                    },
                    "chunk_ids": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Các đoạn trích đã có (tùy chọn)"
                    }
                },
                "required": ["query"]
            }),
            category: ToolCategory::Rag,
            access: ToolAccess::Read,
        }
    }

    async fn execute(&self, arguments: Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let query = arguments
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidInput("query is required".into()))?;

        let chunk_ids: Vec<String> = arguments
            .get("chunk_ids")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let related = self.entities.related(&chunk_ids, query).await;

        if related.is_empty() {
            return Ok(ToolOutput::text("Không tìm thấy khái niệm liên quan."));
        }

        let listing = related
            .iter()
            .map(|r| {
                format!(
                    "- {} ({}, quan hệ {}, khoảng cách {})",
                    r.entity.name,
                    r.entity.entity_type.as_str(),
                    r.relation.as_str(),
                    r.distance
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        Ok(ToolOutput::text(format!("Khái niệm liên quan:\n{listing}")))
    }
}
