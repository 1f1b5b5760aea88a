//! Answer verification
//!
//! Checks a draft answer for groundedness against the chunks it was
//! generated from and scores confidence. An answer is grounded iff every
//! factual claim maps to at least one provided chunk.

use std::sync::Arc;

use helmsman_core::{LanguageModel, Message};

use crate::grader::GradedChunk;

/// Confidence band
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceBand {
    /// >= 0.85: re-verification skipped on retries
    High,
    /// [0.6, 0.85)
    Medium,
    /// < 0.6: triggers a rewrite or a warning badge
    Low,
}

impl ConfidenceBand {
    pub fn from_confidence(confidence: f32) -> Self {
        if confidence >= 0.85 {
            ConfidenceBand::High
        } else if confidence >= 0.6 {
            ConfidenceBand::Medium
        } else {
            ConfidenceBand::Low
        }
    }
}

/// Verification outcome
#[derive(Debug, Clone)]
pub struct Verification {
    pub confidence: f32,
    pub grounded: bool,
    pub issues: Vec<String>,
    /// Chunk ids the verifier judged actually supported; used to prune
    /// unfounded citations. None means no pruning information.
    pub supported_chunk_ids: Option<Vec<String>>,
}

impl Verification {
    pub fn band(&self) -> ConfidenceBand {
        ConfidenceBand::from_confidence(self.confidence)
    }
}

/// LLM-backed groundedness verifier
pub struct AnswerVerifier {
    llm: Arc<dyn LanguageModel>,
}

impl AnswerVerifier {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }

    /// Verify a draft answer. On LLM failure the result is ungrounded with
    /// medium confidence, so the pipeline attaches a caveat without
    /// caching or looping.
    pub async fn verify(
        &self,
        question: &str,
        context: &[GradedChunk],
        answer: &str,
    ) -> Verification {
        let mut passages = String::new();
        for graded in context {
            passages.push_str(&format!(
                "[{}] {}\n",
                graded.scored.chunk.id,
                graded.scored.chunk.snippet()
            ));
        }

        let prompt = format!(
            "Kiểm tra câu trả lời dựa trên các đoạn trích.\n\
             Mọi khẳng định thực tế phải có ít nhất một đoạn trích chống lưng.\n\
             Câu hỏi: {question}\n\
             Các đoạn trích:\n{passages}\n\
             Câu trả lời: {answer}\n\
             Trả lời JSON: {{\"confidence\": 0.0-1.0, \"grounded\": true|false, \
             \"issues\": [\"...\"], \"supported_chunk_ids\": [\"...\"]}}"
        );

        match self.llm.chat(&[Message::user(prompt)], &[]).await {
            Ok(msg) => Self::parse_verification(&msg.text),
            Err(e) => {
                tracing::warn!(error = %e, "verifier unavailable");
                Verification {
                    confidence: 0.6,
                    grounded: false,
                    issues: vec!["verifier unavailable".to_string()],
                    supported_chunk_ids: None,
                }
            }
        }
    }

    fn parse_verification(text: &str) -> Verification {
        let fallback = Verification {
            confidence: 0.6,
            grounded: false,
            issues: vec!["unparseable verifier output".to_string()],
            supported_chunk_ids: None,
        };

        let Some(start) = text.find('{') else {
            return fallback;
        };
        let Some(end) = text.rfind('}') else {
            return fallback;
        };
        let Ok(json) = serde_json::from_str::<serde_json::Value>(&text[start..=end]) else {
            return fallback;
        };

        let confidence = json
            .get("confidence")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.6)
            .clamp(0.0, 1.0) as f32;
        let grounded = json
            .get("grounded")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let issues = json
            .get("issues")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        let supported_chunk_ids = json
            .get("supported_chunk_ids")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str())
                    .map(String::from)
                    .collect()
            });

        Verification {
            confidence,
            grounded,
            issues,
            supported_chunk_ids,
        }
    }
}
