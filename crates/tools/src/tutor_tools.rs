//! Tutor tools: practice questions and simplified explanations

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use helmsman_core::{LanguageModel, Message};

use crate::{Tool, ToolAccess, ToolCategory, ToolContext, ToolError, ToolOutput, ToolSchema};

/// Generates one practice question on a topic, tuned to the user's level
pub struct PracticeQuestionTool {
    llm: Arc<dyn LanguageModel>,
}

impl PracticeQuestionTool {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Tool for PracticeQuestionTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "practice_question".into(),
            description: "Tạo một câu hỏi luyện tập về chủ đề hàng hải, kèm đáp án \
                          và giải thích."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "topic": {"type": "string", "description": "Chủ đề, ví dụ: COLREG Quy tắc 15"},
                    "difficulty": {
                        "type": "string",
                        "enum": ["easy", "medium", "hard"],
                        "description": "Độ khó mong muốn"
                    }
                },
                "required": ["topic"]
            }),
            category: ToolCategory::Tutor,
            access: ToolAccess::Read,
        }
    }

    async fn execute(&self, arguments: Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let topic = arguments
            .get("topic")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidInput("topic is required".into()))?;
        let difficulty = arguments
            .get("difficulty")
            .and_then(Value::as_str)
            .unwrap_or("medium");

        let prompt = format!(
            "Soạn một câu hỏi trắc nghiệm ({difficulty}) cho học viên hàng hải về: {topic}.\n\
             Gồm 4 phương án A-D, chỉ rõ đáp án đúng và giải thích ngắn."
        );

        let msg = self
            .llm
            .chat(&[Message::user(prompt)], &[])
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;

        Ok(ToolOutput::text(msg.text))
    }
}

/// Re-explains a concept in simpler terms
pub struct ExplainSimplyTool {
    llm: Arc<dyn LanguageModel>,
}

impl ExplainSimplyTool {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Tool for ExplainSimplyTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "explain_simply".into(),
            description: "Giải thích lại một khái niệm hàng hải bằng ngôn ngữ đơn giản \
                          và một ví dụ đời thường."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "concept": {"type": "string"}
                },
                "required": ["concept"]
            }),
            category: ToolCategory::Tutor,
            access: ToolAccess::Read,
        }
    }

    async fn execute(&self, arguments: Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let concept = arguments
            .get("concept")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidInput("concept is required".into()))?;

        let prompt = format!(
            "Giải thích khái niệm sau cho người mới bắt đầu, dùng một ví dụ giao thông \
             đường bộ quen thuộc nếu phù hợp: {concept}"
        );

        let msg = self
            .llm
            .chat(&[Message::user(prompt)], &[])
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;

        Ok(ToolOutput::text(msg.text))
    }
}
