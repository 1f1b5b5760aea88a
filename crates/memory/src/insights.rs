//! Insight store
//!
//! Behavioral observations per user, bounded at 50. Near-duplicates merge
//! instead of inserting; reaching the consolidation threshold schedules an
//! LLM-driven rewrite of the whole set down to the target count, guarded
//! by a per-user advisory lock.

use std::sync::Arc;

use chrono::{Duration, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use helmsman_core::{
    cosine_similarity, EvolutionNote, Insight, InsightCategory, LanguageModel, Message,
};
use helmsman_persistence::InsightRepository;

use crate::{MemoryConfig, MemoryError};

/// Minimum declarative content length
const MIN_CONTENT_CHARS: usize = helmsman_config::constants::memory::MIN_INSIGHT_CONTENT_CHARS;
/// Merge confidence ceiling
const CONFIDENCE_CAP: f32 = 0.99;

/// What an add did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsightWrite {
    Inserted,
    Merged,
}

/// Result of an add, with a consolidation hint for the background runner
#[derive(Debug, Clone, Copy)]
pub struct AddOutcome {
    pub write: InsightWrite,
    pub id: Uuid,
    /// Caller should schedule [`InsightStore::consolidate`]
    pub consolidation_due: bool,
}

pub struct InsightStore {
    repo: Arc<dyn InsightRepository>,
    llm: Arc<dyn LanguageModel>,
    config: MemoryConfig,
    /// Advisory per-user lock: one consolidation per user at a time
    consolidating: DashMap<String, ()>,
}

impl InsightStore {
    pub fn new(
        repo: Arc<dyn InsightRepository>,
        llm: Arc<dyn LanguageModel>,
        config: MemoryConfig,
    ) -> Self {
        Self {
            repo,
            llm,
            config,
            consolidating: DashMap::new(),
        }
    }

    /// Add or merge an insight
    pub async fn add_insight(
        &self,
        user_id: &str,
        category: &str,
        content: &str,
        sub_topic: Option<String>,
        embedding: Vec<f32>,
        confidence: f32,
    ) -> Result<AddOutcome, MemoryError> {
        let content = content.trim();
        if content.chars().count() < MIN_CONTENT_CHARS {
            return Err(MemoryError::Rejected(format!(
                "insight content under {MIN_CONTENT_CHARS} characters"
            )));
        }
        let Some(category) = InsightCategory::parse(category) else {
            return Err(MemoryError::Rejected(format!(
                "unknown insight category: {category}"
            )));
        };

        let existing = self.repo.list(user_id).await?;
        let now = Utc::now();

        // Merge on embedding similarity or identical (category, sub_topic)
        let merge_target = existing.iter().find(|insight| {
            let similar = !embedding.is_empty()
                && cosine_similarity(&embedding, &insight.embedding)
                    >= self.config.duplicate_threshold;
            let same_slot = insight.category == category
                && insight.sub_topic.is_some()
                && insight.sub_topic == sub_topic;
            similar || same_slot
        });

        if let Some(target) = merge_target {
            let mut merged = target.clone();
            let note = format!(
                "updated: \"{}\" -> \"{}\"",
                truncate(&merged.content, 60),
                truncate(content, 60)
            );
            merged.content = content.to_string();
            merged.confidence = merged.confidence.max(confidence).min(CONFIDENCE_CAP);
            merged.embedding = if embedding.is_empty() {
                merged.embedding
            } else {
                embedding
            };
            merged.last_accessed = now;
            merged.evolution_notes.push(EvolutionNote { at: now, note });
            self.repo.put(&merged).await?;

            return Ok(AddOutcome {
                write: InsightWrite::Merged,
                id: merged.id,
                consolidation_due: false,
            });
        }

        let insight = Insight {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            category,
            content: content.to_string(),
            sub_topic,
            embedding,
            confidence: confidence.clamp(0.0, CONFIDENCE_CAP),
            created_at: now,
            last_accessed: now,
            evolution_notes: Vec::new(),
        };
        self.repo.put(&insight).await?;

        let count = existing.len() + 1;
        // Hard cap: drop oldest-accessed beyond max_insights
        if count > self.config.max_insights {
            self.evict_to(user_id, self.config.max_insights).await?;
        }

        Ok(AddOutcome {
            write: InsightWrite::Inserted,
            id: insight.id,
            consolidation_due: count >= self.config.consolidation_threshold,
        })
    }

    /// Category-prioritized retrieval: knowledge gaps and learning style
    /// first, then similarity to the query, then recency.
    pub async fn get_insights(
        &self,
        user_id: &str,
        query_embedding: &[f32],
        k: usize,
    ) -> Result<Vec<Insight>, MemoryError> {
        let mut insights = self.repo.list(user_id).await?;

        insights.sort_by(|a, b| {
            b.category
                .is_priority()
                .cmp(&a.category.is_priority())
                .then_with(|| {
                    let sim_a = cosine_similarity(query_embedding, &a.embedding);
                    let sim_b = cosine_similarity(query_embedding, &b.embedding);
                    sim_b
                        .partial_cmp(&sim_a)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| b.last_accessed.cmp(&a.last_accessed))
        });

        insights.truncate(k);
        Ok(insights)
    }

    pub async fn count(&self, user_id: &str) -> Result<usize, MemoryError> {
        Ok(self.repo.list(user_id).await?.len())
    }

    pub async fn list(&self, user_id: &str) -> Result<Vec<Insight>, MemoryError> {
        Ok(self.repo.list(user_id).await?)
    }

    /// Consolidate a user's insights down to the target count. No-op when
    /// another consolidation for this user is in flight or the set is
    /// below the threshold. Returns whether a consolidation ran.
    pub async fn consolidate(&self, user_id: &str) -> Result<bool, MemoryError> {
        // Advisory lock
        if self
            .consolidating
            .insert(user_id.to_string(), ())
            .is_some()
        {
            tracing::debug!(user_id, "consolidation already running, skipping");
            return Ok(false);
        }
        let result = self.consolidate_locked(user_id).await;
        self.consolidating.remove(user_id);
        result
    }

    async fn consolidate_locked(&self, user_id: &str) -> Result<bool, MemoryError> {
        let insights = self.repo.list(user_id).await?;
        if insights.len() < self.config.consolidation_threshold {
            return Ok(false);
        }

        let cutoff = Utc::now() - Duration::days(self.config.preserve_days);
        let (recent, older): (Vec<Insight>, Vec<Insight>) = insights
            .into_iter()
            .partition(|insight| insight.last_accessed >= cutoff);

        let budget = self
            .config
            .target_insight_count
            .saturating_sub(recent.len());

        let merged = match self.llm_consolidate(user_id, &older, budget).await {
            Ok(merged) if !merged.is_empty() || older.is_empty() => merged,
            Ok(_) | Err(_) => {
                tracing::warn!(user_id, "LLM consolidation failed, falling back to FIFO eviction");
                Self::fifo_evict(older, budget)
            }
        };

        let mut replacement = recent;
        replacement.extend(merged);
        // Recency preservation is best-effort: the target count wins when
        // the preserve window alone overflows it
        if replacement.len() > self.config.target_insight_count {
            replacement = Self::fifo_evict(replacement, self.config.target_insight_count);
        }
        self.repo.replace_all(user_id, &replacement).await?;

        tracing::info!(
            user_id,
            count = replacement.len(),
            "insight consolidation complete"
        );
        Ok(true)
    }

    /// Ask the model to merge semantically similar insights, preserving
    /// category diversity
    async fn llm_consolidate(
        &self,
        user_id: &str,
        older: &[Insight],
        budget: usize,
    ) -> Result<Vec<Insight>, MemoryError> {
        if older.is_empty() || budget == 0 {
            return Ok(Vec::new());
        }

        let listing: Vec<serde_json::Value> = older
            .iter()
            .map(|insight| {
                serde_json::json!({
                    "category": insight.category.as_str(),
                    "sub_topic": insight.sub_topic,
                    "content": insight.content,
                    "confidence": insight.confidence,
                })
            })
            .collect();

        let prompt = format!(
            "Hợp nhất các quan sát về một học viên thành tối đa {budget} mục.\n\
             Gộp các mục trùng ý, giữ đủ các nhóm (category) đang có, giữ câu khẳng định rõ ràng.\n\
             Danh sách: {}\n\
             Trả lời JSON: [{{\"category\": \"...\", \"sub_topic\": null, \
             \"content\": \"...\", \"confidence\": 0.8}}]",
            serde_json::to_string(&listing).map_err(|e| MemoryError::Extraction(e.to_string()))?
        );

        let msg = self
            .llm
            .chat(&[Message::user(prompt)], &[])
            .await
            .map_err(|e| MemoryError::Extraction(e.to_string()))?;

        let Some(start) = msg.text.find('[') else {
            return Err(MemoryError::Extraction("no JSON array in output".into()));
        };
        let Some(end) = msg.text.rfind(']') else {
            return Err(MemoryError::Extraction("no JSON array in output".into()));
        };
        let entries: Vec<serde_json::Value> = serde_json::from_str(&msg.text[start..=end])
            .map_err(|e| MemoryError::Extraction(e.to_string()))?;

        let now = Utc::now();
        let mut merged = Vec::new();
        for entry in entries.into_iter().take(budget) {
            let Some(category) = entry
                .get("category")
                .and_then(|v| v.as_str())
                .and_then(InsightCategory::parse)
            else {
                continue;
            };
            let Some(content) = entry.get("content").and_then(|v| v.as_str()) else {
                continue;
            };
            if content.chars().count() < MIN_CONTENT_CHARS {
                continue;
            }
            merged.push(Insight {
                id: Uuid::new_v4(),
                user_id: user_id.to_string(),
                category,
                content: content.to_string(),
                sub_topic: entry
                    .get("sub_topic")
                    .and_then(|v| v.as_str())
                    .map(String::from),
                embedding: Vec::new(),
                confidence: entry
                    .get("confidence")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(0.7)
                    .clamp(0.0, CONFIDENCE_CAP as f64) as f32,
                created_at: now,
                last_accessed: now,
                evolution_notes: vec![EvolutionNote {
                    at: now,
                    note: "consolidated".to_string(),
                }],
            });
        }

        Ok(merged)
    }

    /// Keep the most recently accessed `budget` entries
    fn fifo_evict(mut older: Vec<Insight>, budget: usize) -> Vec<Insight> {
        older.sort_by(|a, b| b.last_accessed.cmp(&a.last_accessed));
        older.truncate(budget);
        older
    }

    async fn evict_to(&self, user_id: &str, target: usize) -> Result<(), MemoryError> {
        let mut insights = self.repo.list(user_id).await?;
        if insights.len() <= target {
            return Ok(());
        }
        insights.sort_by(|a, b| a.last_accessed.cmp(&b.last_accessed));
        let excess = insights.len() - target;
        for insight in insights.into_iter().take(excess) {
            self.repo.delete(user_id, insight.id).await?;
        }
        Ok(())
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect::<String>() + "…"
    }
}
