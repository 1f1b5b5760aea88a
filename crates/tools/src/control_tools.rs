//! Control tools

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{Tool, ToolAccess, ToolCategory, ToolContext, ToolError, ToolOutput, ToolSchema};

/// Flags the conversation for human teacher follow-up. The flag lands in
/// response metadata; the LMS decides what to do with it.
#[derive(Default)]
pub struct EscalateTool;

impl EscalateTool {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for EscalateTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "escalate_to_teacher".into(),
            description: "Đánh dấu cuộc hội thoại cần giảng viên theo dõi (học viên \
                          bế tắc, câu hỏi vượt phạm vi trợ giảng)."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "reason": {"type": "string"}
                },
                "required": ["reason"]
            }),
            category: ToolCategory::Control,
            access: ToolAccess::Write,
        }
    }

    async fn execute(&self, arguments: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let reason = arguments
            .get("reason")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidInput("reason is required".into()))?;

        tracing::info!(
            user_id = %ctx.user_id,
            session_id = %ctx.session_id,
            reason,
            "conversation escalated to teacher"
        );

        Ok(ToolOutput::text(
            "Đã ghi nhận; giảng viên sẽ được thông báo về cuộc hội thoại này.",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ctx;

    #[tokio::test]
    async fn test_escalate_requires_reason() {
        let tool = EscalateTool::new();
        let err = tool.execute(json!({}), &ctx()).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));

        let ok = tool
            .execute(json!({"reason": "học viên bế tắc"}), &ctx())
            .await
            .unwrap();
        assert!(!ok.is_error);
    }
}
