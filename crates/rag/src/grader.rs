//! Tiered retrieval grading
//!
//! Tier 1 is a zero-cost pre-filter over hybrid scores. Tier 2 fans out a
//! light mini-judge prompt over the remaining chunks. Tier 3, the batched
//! full grader, only runs when fewer than two relevant chunks survive
//! Tier 2.

use std::sync::Arc;

use futures::stream::{self, StreamExt};

use helmsman_core::{LanguageModel, Message};

use crate::hybrid::ScoredChunk;

async fn mini_judge_one(llm: Arc<dyn LanguageModel>, prompt: String) -> Verdict {
    match llm.chat(&[Message::user(prompt)], &[]).await {
        Ok(msg) => Verdict::parse(&msg.text),
        Err(e) => {
            tracing::warn!(error = %e, "mini-judge failed, treating as irrelevant");
            Verdict::Irrelevant
        }
    }
}

/// Grader configuration
#[derive(Debug, Clone)]
pub struct GraderConfig {
    pub pass_threshold: f32,
    pub prefilter_pass: f32,
    pub prefilter_fail: f32,
    pub parallel_judges: usize,
    pub full_grader_batch: usize,
    pub early_exit_min_relevant: usize,
}

impl Default for GraderConfig {
    fn default() -> Self {
        use helmsman_config::constants::grader;
        Self {
            pass_threshold: grader::PASS_THRESHOLD,
            prefilter_pass: grader::PREFILTER_PASS,
            prefilter_fail: grader::PREFILTER_FAIL,
            parallel_judges: grader::PARALLEL_JUDGES,
            full_grader_batch: grader::FULL_GRADER_BATCH,
            early_exit_min_relevant: grader::EARLY_EXIT_MIN_RELEVANT,
        }
    }
}

impl From<&helmsman_config::GraderSettings> for GraderConfig {
    fn from(s: &helmsman_config::GraderSettings) -> Self {
        Self {
            pass_threshold: s.pass_threshold,
            prefilter_pass: s.prefilter_pass,
            prefilter_fail: s.prefilter_fail,
            parallel_judges: s.parallel_judges,
            full_grader_batch: s.full_grader_batch,
            early_exit_min_relevant: s.early_exit_min_relevant,
        }
    }
}

/// Mini-judge verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Relevant,
    Partial,
    Irrelevant,
}

impl Verdict {
    fn parse(text: &str) -> Self {
        let upper = text.to_uppercase();
        if upper.contains("IRRELEVANT") {
            Verdict::Irrelevant
        } else if upper.contains("PARTIAL") {
            Verdict::Partial
        } else if upper.contains("RELEVANT") {
            Verdict::Relevant
        } else {
            Verdict::Irrelevant
        }
    }

    fn score(self) -> f32 {
        match self {
            Verdict::Relevant => 8.0,
            Verdict::Partial => 5.0,
            Verdict::Irrelevant => 1.5,
        }
    }
}

/// One graded chunk
#[derive(Debug, Clone)]
pub struct GradedChunk {
    pub scored: ScoredChunk,
    /// 0-10 relevance
    pub score: f32,
    pub reason: String,
}

/// Grading outcome
#[derive(Debug, Clone)]
pub struct GradeReport {
    pub graded: Vec<GradedChunk>,
    pub avg_score: f32,
    pub passed: bool,
    /// The threshold this report was graded against
    pub pass_threshold: f32,
    pub tier2_used: bool,
    pub tier3_used: bool,
}

impl GradeReport {
    /// Chunks at or above the pass threshold, best first
    pub fn passing(&self) -> Vec<&GradedChunk> {
        self.graded
            .iter()
            .filter(|g| g.score >= self.pass_threshold)
            .collect()
    }
}

/// Tier-1 grade constants; auto-passed and auto-failed chunks join the
/// same 0-10 average as the judged tiers.
const AUTO_PASS_SCORE: f32 = 8.5;
const AUTO_FAIL_SCORE: f32 = 1.0;

/// Tiered relevance grader
pub struct RetrievalGrader {
    llm: Arc<dyn LanguageModel>,
    config: GraderConfig,
}

impl RetrievalGrader {
    pub fn new(llm: Arc<dyn LanguageModel>, config: GraderConfig) -> Self {
        Self { llm, config }
    }

    /// Hybrid-evidence signal in [0,1] used by the Tier-1 pre-filter:
    /// the stronger of normalized dense cosine and normalized sparse BM25.
    pub fn prefilter_signal(scored: &ScoredChunk) -> f32 {
        let dense = scored
            .dense_score
            .map(|s| ((s + 1.0) / 2.0).clamp(0.0, 1.0))
            .unwrap_or(0.0);
        let sparse = scored
            .sparse_score
            .map(|s| (s / 20.0).clamp(0.0, 1.0))
            .unwrap_or(0.0);
        dense.max(sparse)
    }

    /// Grade candidates against the query
    pub async fn grade(&self, query: &str, candidates: Vec<ScoredChunk>) -> GradeReport {
        let mut graded: Vec<GradedChunk> = Vec::with_capacity(candidates.len());
        let mut uncertain: Vec<ScoredChunk> = Vec::new();
        let mut relevant_count = 0usize;

        // Tier 1: pre-filter on hybrid evidence alone
        for scored in candidates {
            let signal = Self::prefilter_signal(&scored);
            if signal >= self.config.prefilter_pass {
                relevant_count += 1;
                graded.push(GradedChunk {
                    scored,
                    score: AUTO_PASS_SCORE,
                    reason: format!("hybrid signal {signal:.2} above pre-filter pass"),
                });
            } else if signal <= self.config.prefilter_fail {
                graded.push(GradedChunk {
                    scored,
                    score: AUTO_FAIL_SCORE,
                    reason: format!("hybrid signal {signal:.2} below pre-filter fail"),
                });
            } else {
                uncertain.push(scored);
            }
        }

        let mut tier2_used = false;
        let mut tier3_used = false;

        if !uncertain.is_empty() && relevant_count >= self.config.early_exit_min_relevant {
            // Tier-1 evidence alone suffices: the uncertain chunks keep
            // their hybrid-signal grade and no judge runs at all
            for scored in uncertain.drain(..) {
                let signal = Self::prefilter_signal(&scored);
                graded.push(GradedChunk {
                    score: (signal * 10.0).clamp(0.0, 10.0),
                    reason: format!("ungraded, hybrid signal {signal:.2} (tier-1 early exit)"),
                    scored,
                });
            }
        }

        if !uncertain.is_empty() {
            // Tier 2: parallel mini-judges over the uncertain chunks
            tier2_used = true;
            let verdicts = self.mini_judge(query, &uncertain).await;
            relevant_count += verdicts
                .iter()
                .filter(|v| **v == Verdict::Relevant)
                .count();

            if relevant_count >= self.config.early_exit_min_relevant {
                // Early exit: Tier-2 verdicts are final
                for (scored, verdict) in uncertain.into_iter().zip(verdicts) {
                    graded.push(GradedChunk {
                        scored,
                        score: verdict.score(),
                        reason: format!("mini-judge: {verdict:?}"),
                    });
                }
            } else {
                // Tier 3: batched full grader over the uncertain chunks
                tier3_used = true;
                let scores = self.full_grade(query, &uncertain).await;
                for (scored, (score, reason)) in uncertain.into_iter().zip(scores) {
                    graded.push(GradedChunk {
                        scored,
                        score,
                        reason,
                    });
                }
            }
        }

        // Ties broken by hybrid RRF
        graded.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(
                    b.scored
                        .rrf
                        .partial_cmp(&a.scored.rrf)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
        });

        let avg_score = if graded.is_empty() {
            0.0
        } else {
            graded.iter().map(|g| g.score).sum::<f32>() / graded.len() as f32
        };

        GradeReport {
            passed: avg_score >= self.config.pass_threshold,
            avg_score,
            graded,
            pass_threshold: self.config.pass_threshold,
            tier2_used,
            tier3_used,
        }
    }

    /// Tier 2: one light prompt per chunk, fanned out with a concurrency cap.
    /// A failed judgment is treated as IRRELEVANT.
    async fn mini_judge(&self, query: &str, chunks: &[ScoredChunk]) -> Vec<Verdict> {
        let cap = self.config.parallel_judges.min(chunks.len()).max(1);

        let prompts: Vec<String> = chunks
            .iter()
            .map(|scored| {
                format!(
                    "Đoạn trích có giúp trả lời câu hỏi không?\n\
                     Câu hỏi: {query}\n\
                     Đoạn trích: {}\n\
                     Trả lời đúng một từ: RELEVANT, PARTIAL hoặc IRRELEVANT.",
                    scored.chunk.snippet()
                )
            })
            .collect();

        stream::iter(prompts.into_iter())
            .map(|prompt| {
                let llm = self.llm.clone();
                mini_judge_one(llm, prompt)
            })
            .buffered(cap)
            .collect()
            .await
    }

    /// Tier 3: batches of chunks with a richer prompt returning 0-10 scores
    async fn full_grade(&self, query: &str, chunks: &[ScoredChunk]) -> Vec<(f32, String)> {
        let mut out: Vec<(f32, String)> = Vec::with_capacity(chunks.len());

        for batch in chunks.chunks(self.config.full_grader_batch) {
            let mut passages = String::new();
            for (i, scored) in batch.iter().enumerate() {
                passages.push_str(&format!("[{}] {}\n", i, scored.chunk.snippet()));
            }

            let prompt = format!(
                "Chấm mức độ liên quan của từng đoạn trích với câu hỏi, thang 0-10.\n\
                 Cân nhắc: đoạn có nêu đúng điều luật, đúng tình huống, đủ chi tiết không.\n\
                 Câu hỏi: {query}\n\
                 Các đoạn:\n{passages}\n\
                 Trả lời JSON: [{{\"index\": 0, \"score\": 7, \"reason\": \"...\"}}]",
            );

            match self.llm.chat(&[Message::user(prompt)], &[]).await {
                Ok(msg) => {
                    let parsed = parse_batch_scores(&msg.text, batch.len());
                    out.extend(parsed);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "full grader batch failed, using neutral scores");
                    out.extend(
                        std::iter::repeat((5.0, "grader unavailable".to_string()))
                            .take(batch.len()),
                    );
                }
            }
        }

        out
    }
}

/// Parse the full grader's JSON array leniently; missing entries fall back
/// to a neutral score.
fn parse_batch_scores(text: &str, expected: usize) -> Vec<(f32, String)> {
    let mut scores = vec![(5.0f32, "unparsed grade".to_string()); expected];

    let json_start = text.find('[');
    let json_end = text.rfind(']');
    if let (Some(start), Some(end)) = (json_start, json_end) {
        if start < end {
            if let Ok(entries) =
                serde_json::from_str::<Vec<serde_json::Value>>(&text[start..=end])
            {
                for entry in entries {
                    let Some(index) = entry.get("index").and_then(|v| v.as_u64()) else {
                        continue;
                    };
                    let index = index as usize;
                    if index >= expected {
                        continue;
                    }
                    let score = entry
                        .get("score")
                        .and_then(|v| v.as_f64())
                        .unwrap_or(5.0)
                        .clamp(0.0, 10.0) as f32;
                    let reason = entry
                        .get("reason")
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                        .to_string();
                    scores[index] = (score, reason);
                }
            }
        }
    }

    scores
}
