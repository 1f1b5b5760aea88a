//! Stage-5 output formatting
//!
//! Validates the answer, merges citations referring to the same document
//! page, generates up to three suggested questions and assembles the
//! response analytics.

use std::sync::Arc;

use helmsman_core::{
    Citation, ChatResponse, LanguageModel, Message, QueryType, ResponseMetadata,
};
use helmsman_agent::AgentRun;

/// Fallback when an agent produced an empty answer
const EMPTY_ANSWER_FALLBACK: &str =
    "Xin lỗi, mình chưa đưa ra được câu trả lời. Bạn diễn đạt lại câu hỏi giúp mình nhé.";

pub struct OutputStage {
    llm: Arc<dyn LanguageModel>,
}

impl OutputStage {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }

    /// Finalize a response from an agent run
    pub async fn finalize(
        &self,
        run: AgentRun,
        agent_label: &str,
        query_type: Option<QueryType>,
        processing_time_ms: u64,
    ) -> ChatResponse {
        let mut warning = None;
        let answer_body = if run.answer.trim().is_empty() {
            warning = Some("empty agent answer".to_string());
            EMPTY_ANSWER_FALLBACK.to_string()
        } else {
            run.answer.clone()
        };

        // Re-attach the thinking block as the contract's prefix form
        let answer = match &run.thinking {
            Some(thinking) if !thinking.trim().is_empty() => {
                format!("<thinking>{}</thinking>{}", thinking, answer_body)
            }
            _ => answer_body,
        };

        let sources = Self::merge_citations(run.citations.clone());
        let document_ids_used: Vec<String> = sources
            .iter()
            .map(|c| c.document_id.clone())
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();

        let suggested_questions = self.suggest_questions(&run.answer).await;

        let confidence_score = run
            .confidence
            .unwrap_or(if sources.is_empty() { 0.6 } else { 0.75 });

        let mut topics_accessed = run
            .trace
            .iter()
            .filter_map(|line| line.strip_prefix("entities: "))
            .flat_map(|names| names.split(", ").map(String::from))
            .collect::<Vec<_>>();
        topics_accessed.dedup();
        if topics_accessed.is_empty() {
            topics_accessed = document_ids_used.clone();
        }

        ChatResponse {
            answer,
            sources,
            suggested_questions,
            metadata: ResponseMetadata {
                agent: agent_label.to_string(),
                // Filled by the orchestrator, which owns session identity
                session_id: String::new(),
                processing_time_ms,
                confidence_score,
                query_type,
                topics_accessed,
                tools_used: run.tools_used,
                reasoning_trace: run.trace,
                document_ids_used,
                from_cache: run.from_cache,
                block_reason: None,
                warning: warning.or(run.warning),
            },
        }
    }

    /// Merge citations that refer to the same (document, page): union of
    /// bounding boxes, first snippet wins.
    pub fn merge_citations(citations: Vec<Citation>) -> Vec<Citation> {
        let mut merged: Vec<Citation> = Vec::new();

        for citation in citations {
            if let Some(existing) = merged.iter_mut().find(|c| {
                c.document_id == citation.document_id && c.page_number == citation.page_number
            }) {
                for bbox in citation.bounding_boxes {
                    if !existing.bounding_boxes.contains(&bbox) {
                        existing.bounding_boxes.push(bbox);
                    }
                }
                if existing.image_url.is_none() {
                    existing.image_url = citation.image_url;
                }
            } else {
                merged.push(citation);
            }
        }

        merged
    }

    /// Up to three follow-up questions grounded in the answer topic;
    /// failure degrades to none
    async fn suggest_questions(&self, answer: &str) -> Vec<String> {
        if answer.trim().is_empty() {
            return Vec::new();
        }

        let prompt = format!(
            "Dựa trên câu trả lời cho học viên hàng hải dưới đây, đề xuất tối đa 3 câu hỏi \
             tiếp theo ngắn gọn giúp học sâu hơn.\n\
             Câu trả lời: {answer}\n\
             Trả lời JSON: [\"...\", \"...\"]"
        );

        let Ok(msg) = self.llm.chat(&[Message::user(prompt)], &[]).await else {
            return Vec::new();
        };

        let Some(start) = msg.text.find('[') else {
            return Vec::new();
        };
        let Some(end) = msg.text.rfind(']') else {
            return Vec::new();
        };

        serde_json::from_str::<Vec<String>>(&msg.text[start..=end])
            .unwrap_or_default()
            .into_iter()
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .take(3)
            .collect()
    }
}
