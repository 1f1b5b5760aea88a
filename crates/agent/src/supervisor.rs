//! Supervisor multi-agent graph
//!
//! A state machine over specialist nodes. The supervisor classifies
//! intent and routes to exactly one specialist; a grader scores the
//! candidate answer and a failed grade buys one re-route; the
//! synthesizer formats the final output. Consumes the same tools and
//! produces the same response shape as the ReAct agent.

use std::sync::Arc;

use serde_json::json;
use tokio::time::Instant;

use helmsman_core::{
    Citation, Error as CoreError, LanguageModel, Message, Result as CoreResult,
};
use helmsman_rag::CorrectiveRag;
use helmsman_tools::ToolRegistry;

use crate::react::{AgentContext, AgentRun};

/// Grade a candidate must reach (out of 10)
const GRADE_PASS: f32 = 6.0;

/// Specialist nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorNode {
    Rag,
    Tutor,
    Memory,
}

impl SupervisorNode {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "rag" => Some(SupervisorNode::Rag),
            "tutor" => Some(SupervisorNode::Tutor),
            "memory" => Some(SupervisorNode::Memory),
            _ => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            SupervisorNode::Rag => "rag",
            SupervisorNode::Tutor => "tutor",
            SupervisorNode::Memory => "memory",
        }
    }

    /// Fallback route when this one fails its grade
    fn reroute(&self) -> Self {
        match self {
            SupervisorNode::Rag => SupervisorNode::Tutor,
            SupervisorNode::Tutor => SupervisorNode::Rag,
            SupervisorNode::Memory => SupervisorNode::Tutor,
        }
    }
}

struct Candidate {
    answer: String,
    citations: Vec<Citation>,
    tools_used: Vec<String>,
    confidence: Option<f32>,
}

/// Router + specialists + grader + synthesizer
pub struct Supervisor {
    llm: Arc<dyn LanguageModel>,
    crag: Arc<CorrectiveRag>,
    registry: Arc<ToolRegistry>,
}

impl Supervisor {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        crag: Arc<CorrectiveRag>,
        registry: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            llm,
            crag,
            registry,
        }
    }

    pub async fn run(&self, ctx: AgentContext) -> CoreResult<AgentRun> {
        let mut run = AgentRun::default();

        let route = self.classify(&ctx.user_message).await;
        run.trace.push(format!("supervisor: route={}", route.label()));

        // First specialist attempt
        let candidate = self.dispatch(route, &ctx, &mut run).await?;
        let score = self.grade(&ctx.user_message, &candidate.answer).await;
        run.trace.push(format!("grader: {:.1}/10", score));

        let winner = if score >= GRADE_PASS {
            candidate
        } else {
            // One re-route retry
            let retry_route = route.reroute();
            run.trace
                .push(format!("supervisor: re-route={}", retry_route.label()));
            let retry = self.dispatch(retry_route, &ctx, &mut run).await?;
            let retry_score = self.grade(&ctx.user_message, &retry.answer).await;
            run.trace.push(format!("grader (retry): {:.1}/10", retry_score));

            if retry_score >= score {
                retry
            } else {
                candidate
            }
        };

        run.citations = winner.citations;
        run.tools_used = winner.tools_used;
        run.confidence = winner.confidence;
        run.answer = self
            .synthesize(&ctx, &winner.answer)
            .await
            .unwrap_or(winner.answer);
        run.trace.push("synthesizer: formatted final output".to_string());
        run.iterations = 1;

        Ok(run)
    }

    /// LLM-based intent routing with regex fast paths
    async fn classify(&self, message: &str) -> SupervisorNode {
        if let Some(analysis) = helmsman_rag::QueryAnalyzer::fast_path(message) {
            return match analysis.query_type {
                helmsman_core::QueryType::Personal => SupervisorNode::Memory,
                helmsman_core::QueryType::Greeting => SupervisorNode::Tutor,
                _ => SupervisorNode::Rag,
            };
        }

        let prompt = format!(
            "Chọn chuyên gia xử lý tin nhắn của học viên hàng hải.\n\
             - rag: câu hỏi kiến thức cần tra cứu điều luật\n\
             - tutor: giải thích, luyện tập, trò chuyện học thuật\n\
             - memory: câu hỏi về chính học viên (tên, mục tiêu, tiến độ)\n\
             Tin nhắn: {message}\n\
             Trả lời JSON: {{\"route\": \"rag|tutor|memory\"}}"
        );

        match self.llm.chat(&[Message::user(prompt)], &[]).await {
            Ok(msg) => {
                let parsed = msg
                    .text
                    .find('{')
                    .zip(msg.text.rfind('}'))
                    .and_then(|(start, end)| {
                        serde_json::from_str::<serde_json::Value>(&msg.text[start..=end]).ok()
                    })
                    .and_then(|json| {
                        json.get("route")
                            .and_then(|v| v.as_str())
                            .and_then(SupervisorNode::parse)
                    });
                parsed.unwrap_or(SupervisorNode::Rag)
            }
            Err(e) => {
                tracing::warn!(error = %e, "routing failed, defaulting to rag");
                SupervisorNode::Rag
            }
        }
    }

    async fn dispatch(
        &self,
        node: SupervisorNode,
        ctx: &AgentContext,
        run: &mut AgentRun,
    ) -> CoreResult<Candidate> {
        if Instant::now() >= ctx.deadline {
            return Err(CoreError::DeadlineExceeded);
        }

        match node {
            SupervisorNode::Rag => {
                let result = self
                    .crag
                    .answer(&ctx.user_message, None, None)
                    .await
                    .map_err(helmsman_core::Error::from)?;
                run.trace.extend(
                    result
                        .reasoning_trace
                        .iter()
                        .map(|line| format!("rag: {line}")),
                );
                run.from_cache = result.from_cache;
                run.warning = result.warning.clone();
                Ok(Candidate {
                    answer: result.answer,
                    citations: result.citations,
                    tools_used: vec!["search_regulations".to_string()],
                    confidence: Some(result.confidence),
                })
            }
            SupervisorNode::Tutor => {
                let messages = vec![
                    Message::system(ctx.system_prompt.clone()),
                    Message::user(ctx.user_message.clone()),
                ];
                let msg = self.llm.chat(&messages, &[]).await?;
                Ok(Candidate {
                    answer: msg.text,
                    citations: Vec::new(),
                    tools_used: Vec::new(),
                    confidence: None,
                })
            }
            SupervisorNode::Memory => {
                let tool_ctx = helmsman_tools::ToolContext {
                    user_id: ctx.user_id.clone(),
                    session_id: ctx.session_id.clone(),
                    role: ctx.role,
                };
                let recall = self
                    .registry
                    .execute("recall_memory", json!({"query": ctx.user_message}), &tool_ctx)
                    .await
                    .map(|output| output.content)
                    .unwrap_or_else(|e| format!("Không đọc được ghi nhớ: {e}"));

                let messages = vec![
                    Message::system(ctx.system_prompt.clone()),
                    Message::user(format!(
                        "Ghi nhớ về học viên:\n{recall}\n\nCâu hỏi: {}",
                        ctx.user_message
                    )),
                ];
                let msg = self.llm.chat(&messages, &[]).await?;
                Ok(Candidate {
                    answer: msg.text,
                    citations: Vec::new(),
                    tools_used: vec!["recall_memory".to_string()],
                    confidence: None,
                })
            }
        }
    }

    /// Score a candidate 0-10; unparseable or failed grading passes the
    /// candidate through rather than discarding work
    async fn grade(&self, question: &str, answer: &str) -> f32 {
        let prompt = format!(
            "Chấm câu trả lời cho học viên hàng hải, thang 0-10 \
             (đúng nội dung, có căn cứ, dễ hiểu).\n\
             Câu hỏi: {question}\nCâu trả lời: {answer}\n\
             Trả lời JSON: {{\"score\": 7.5}}"
        );

        match self.llm.chat(&[Message::user(prompt)], &[]).await {
            Ok(msg) => msg
                .text
                .find('{')
                .zip(msg.text.rfind('}'))
                .and_then(|(start, end)| {
                    serde_json::from_str::<serde_json::Value>(&msg.text[start..=end]).ok()
                })
                .and_then(|json| json.get("score").and_then(|v| v.as_f64()))
                .map(|score| score.clamp(0.0, 10.0) as f32)
                .unwrap_or(GRADE_PASS),
            Err(_) => GRADE_PASS,
        }
    }

    /// Light formatting pass; failure keeps the candidate text
    async fn synthesize(&self, ctx: &AgentContext, answer: &str) -> Option<String> {
        let prompt = format!(
            "Biên tập câu trả lời dưới đây cho học viên: giữ nguyên nội dung và trích dẫn, \
             chỉnh giọng điệu theo hướng dẫn hệ thống, không thêm thông tin mới.\n\
             Hướng dẫn: {}\nCâu trả lời: {answer}",
            ctx.system_prompt
        );

        match self.llm.chat(&[Message::user(prompt)], &[]).await {
            Ok(msg) if !msg.text.trim().is_empty() => Some(msg.text),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_parse_and_reroute() {
        assert_eq!(SupervisorNode::parse("RAG"), Some(SupervisorNode::Rag));
        assert_eq!(SupervisorNode::parse("tutor"), Some(SupervisorNode::Tutor));
        assert_eq!(SupervisorNode::parse("???"), None);

        // Re-route never loops back to itself
        for node in [SupervisorNode::Rag, SupervisorNode::Tutor, SupervisorNode::Memory] {
            assert_ne!(node.reroute(), node);
        }
    }
}
