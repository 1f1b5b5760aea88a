//! Unified ReAct agent
//!
//! Drives one LLM with tool bindings through a bounded loop. Tool calls
//! within a turn execute sequentially; failures surface to the model as
//! tool-error observations. The request deadline is enforced around every
//! model and tool call; hitting the iteration cap synthesizes a
//! best-effort answer from the scratchpad.

use std::sync::Arc;

use tokio::time::Instant;

use helmsman_core::{
    Citation, Error as CoreError, LanguageModel, Message, Result as CoreResult, UserRole,
};
use helmsman_tools::{ToolContext, ToolRegistry};

/// ReAct configuration
#[derive(Debug, Clone)]
pub struct ReactConfig {
    pub max_iterations: usize,
}

impl Default for ReactConfig {
    fn default() -> Self {
        Self {
            max_iterations: helmsman_config::constants::agent::REACT_MAX_ITERATIONS,
        }
    }
}

/// Per-request agent input
#[derive(Clone)]
pub struct AgentContext {
    pub system_prompt: String,
    /// Prior conversation (windowed, blocked messages excluded)
    pub history: Vec<Message>,
    pub user_message: String,
    pub user_id: String,
    pub session_id: String,
    pub role: UserRole,
    pub deadline: Instant,
}

impl AgentContext {
    fn tool_ctx(&self) -> ToolContext {
        ToolContext {
            user_id: self.user_id.clone(),
            session_id: self.session_id.clone(),
            role: self.role,
        }
    }
}

/// Agent output, identical across both agent paths
#[derive(Debug, Clone, Default)]
pub struct AgentRun {
    pub answer: String,
    pub thinking: Option<String>,
    pub tools_used: Vec<String>,
    pub citations: Vec<Citation>,
    pub trace: Vec<String>,
    pub iterations: usize,
    /// Verifier confidence when the path produced one
    pub confidence: Option<f32>,
    /// Answer served from the semantic cache
    pub from_cache: bool,
    /// Quality warning raised by the retrieval pipeline
    pub warning: Option<String>,
}

/// LLM-driven tool-calling loop
pub struct ReactAgent {
    llm: Arc<dyn LanguageModel>,
    registry: Arc<ToolRegistry>,
    config: ReactConfig,
}

impl ReactAgent {
    pub fn new(llm: Arc<dyn LanguageModel>, registry: Arc<ToolRegistry>, config: ReactConfig) -> Self {
        Self {
            llm,
            registry,
            config,
        }
    }

    pub async fn run(&self, ctx: AgentContext) -> CoreResult<AgentRun> {
        let definitions = self.registry.definitions();
        let tool_ctx = ctx.tool_ctx();

        let mut messages = Vec::with_capacity(ctx.history.len() + 2);
        messages.push(Message::system(ctx.system_prompt.clone()));
        messages.extend(ctx.history.iter().cloned());
        messages.push(Message::user(ctx.user_message.clone()));

        let mut run = AgentRun::default();

        for iteration in 1..=self.config.max_iterations {
            run.iterations = iteration;

            let msg = self
                .call_with_deadline(ctx.deadline, &messages, &definitions)
                .await?;

            if msg.is_final() {
                run.trace.push(format!("iteration {iteration}: final answer"));
                run.thinking = msg.thinking;
                run.answer = msg.text;
                return Ok(run);
            }

            run.trace.push(format!(
                "iteration {iteration}: {} tool call(s): {}",
                msg.tool_calls.len(),
                msg.tool_calls
                    .iter()
                    .map(|c| c.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
            messages.push(Message::assistant_tool_calls(msg.tool_calls.clone()));

            // Tool calls within one turn are independent; executed in order
            for call in msg.tool_calls {
                if Instant::now() >= ctx.deadline {
                    return Err(CoreError::DeadlineExceeded);
                }

                run.tools_used.push(call.name.clone());
                match self
                    .registry
                    .execute(&call.name, call.arguments.clone(), &tool_ctx)
                    .await
                {
                    Ok(output) => {
                        for citation in output.citations {
                            if !run.citations.iter().any(|c| c.chunk_id == citation.chunk_id)
                            {
                                run.citations.push(citation);
                            }
                        }
                        messages.push(Message::tool_result(call.id, output.content));
                    }
                    Err(e) => {
                        // Surfaced as an observation; the model may recover
                        run.trace
                            .push(format!("tool {} failed: {e}", call.name));
                        messages.push(Message::tool_result(
                            call.id,
                            format!("Lỗi công cụ: {e}"),
                        ));
                    }
                }
            }
        }

        // Iteration cap reached: synthesize from the scratchpad
        run.trace
            .push("iteration cap reached, synthesizing from scratchpad".to_string());
        messages.push(Message::user(
            "Dừng dùng công cụ. Tổng hợp câu trả lời tốt nhất có thể từ các kết quả đã có."
                .to_string(),
        ));

        match self.call_with_deadline(ctx.deadline, &messages, &[]).await {
            Ok(msg) => {
                run.thinking = msg.thinking;
                run.answer = msg.text;
            }
            Err(_) => {
                // Last resort: stitch tool observations together
                run.answer = messages
                    .iter()
                    .rev()
                    .find(|m| {
                        matches!(m.role, helmsman_core::Role::Tool) && !m.content.is_empty()
                    })
                    .map(|m| m.content.clone())
                    .unwrap_or_else(|| {
                        "Mình chưa đưa ra được câu trả lời hoàn chỉnh, bạn hỏi lại giúp mình nhé."
                            .to_string()
                    });
            }
        }

        Ok(run)
    }

    async fn call_with_deadline(
        &self,
        deadline: Instant,
        messages: &[Message],
        tools: &[helmsman_core::ToolDefinition],
    ) -> CoreResult<helmsman_core::LlmMessage> {
        if Instant::now() >= deadline {
            return Err(CoreError::DeadlineExceeded);
        }
        match tokio::time::timeout_at(deadline, self.llm.chat(messages, tools)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(CoreError::DeadlineExceeded),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use helmsman_core::{LlmMessage, ToolDefinition, ToolInvocation};
    use helmsman_tools::{Tool, ToolAccess, ToolCategory, ToolError, ToolOutput, ToolSchema};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;

    struct ScriptedModel {
        replies: Mutex<Vec<LlmMessage>>,
    }

    impl ScriptedModel {
        fn new(replies: Vec<LlmMessage>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().rev().collect()),
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
            Ok(self.replies.lock().pop().unwrap_or_else(|| LlmMessage {
                text: "hết kịch bản".into(),
                ..Default::default()
            }))
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    fn tool_call(name: &str) -> LlmMessage {
        LlmMessage {
            tool_calls: vec![ToolInvocation {
                id: "call_1".into(),
                name: name.into(),
                arguments: json!({"query": "điều 15"}),
            }],
            ..Default::default()
        }
    }

    fn final_answer(text: &str) -> LlmMessage {
        LlmMessage {
            text: text.into(),
            ..Default::default()
        }
    }

    struct EchoTool {
        fail: bool,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn schema(&self) -> ToolSchema {
            ToolSchema {
                name: "echo".into(),
                description: "echo".into(),
                input_schema: json!({"type": "object"}),
                category: ToolCategory::Rag,
                access: ToolAccess::Read,
            }
        }

        async fn execute(
            &self,
            _arguments: serde_json::Value,
            _ctx: &ToolContext,
        ) -> Result<ToolOutput, ToolError> {
            if self.fail {
                Err(ToolError::InvalidInput("hỏng".into()))
            } else {
                Ok(ToolOutput::text("kết quả tra cứu"))
            }
        }
    }

    fn agent(llm: Arc<ScriptedModel>, fail_tool: bool) -> ReactAgent {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool { fail: fail_tool });
        ReactAgent::new(llm, Arc::new(registry), ReactConfig::default())
    }

    fn ctx() -> AgentContext {
        AgentContext {
            system_prompt: "trợ giảng".into(),
            history: vec![],
            user_message: "Quy tắc 15?".into(),
            user_id: "u1".into(),
            session_id: "s1".into(),
            role: UserRole::Student,
            deadline: Instant::now() + Duration::from_secs(30),
        }
    }

    #[tokio::test]
    async fn test_tool_then_answer() {
        let llm = ScriptedModel::new(vec![
            tool_call("echo"),
            final_answer("Đáp án dựa trên kết quả."),
        ]);
        let run = agent(llm, false).run(ctx()).await.unwrap();

        assert_eq!(run.answer, "Đáp án dựa trên kết quả.");
        assert_eq!(run.tools_used, vec!["echo".to_string()]);
        assert_eq!(run.iterations, 2);
    }

    #[tokio::test]
    async fn test_tool_error_surfaced_and_model_recovers() {
        let llm = ScriptedModel::new(vec![
            tool_call("echo"),
            final_answer("Trả lời không cần công cụ."),
        ]);
        let run = agent(llm, true).run(ctx()).await.unwrap();

        assert_eq!(run.answer, "Trả lời không cần công cụ.");
        assert!(run.trace.iter().any(|t| t.contains("failed")));
    }

    #[tokio::test]
    async fn test_iteration_cap_synthesizes() {
        // Five rounds of tool calls, then the synthesis reply
        let mut replies: Vec<LlmMessage> = (0..5).map(|_| tool_call("echo")).collect();
        replies.push(final_answer("Tổng hợp từ scratchpad."));
        let llm = ScriptedModel::new(replies);

        let run = agent(llm, false).run(ctx()).await.unwrap();
        assert_eq!(run.iterations, 5);
        assert_eq!(run.answer, "Tổng hợp từ scratchpad.");
        assert!(run
            .trace
            .iter()
            .any(|t| t.contains("iteration cap reached")));
    }

    #[tokio::test]
    async fn test_expired_deadline_errors() {
        let llm = ScriptedModel::new(vec![final_answer("quá muộn")]);
        let mut context = ctx();
        context.deadline = Instant::now() - Duration::from_secs(1);

        let err = agent(llm, false).run(context).await.unwrap_err();
        assert!(matches!(err, CoreError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_unknown_tool_becomes_observation() {
        let llm = ScriptedModel::new(vec![
            tool_call("ghost"),
            final_answer("Vẫn trả lời được."),
        ]);
        let run = agent(llm, false).run(ctx()).await.unwrap();
        assert_eq!(run.answer, "Vẫn trả lời được.");
        assert!(run.trace.iter().any(|t| t.contains("ghost")));
    }
}
