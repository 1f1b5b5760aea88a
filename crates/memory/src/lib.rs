//! Managed per-user memory
//!
//! - Facts: capped, typed, upserted (one per type per user)
//! - Insights: capped at 50, merged on similarity, consolidated at 40
//! - Summaries: token-threshold session summarization
//! - Extraction: strict-JSON LLM prompts feeding the stores
//! - Session registry: process-local pronoun style and anti-repetition

pub mod extraction;
pub mod facts;
pub mod insights;
pub mod session;
pub mod summaries;

pub use extraction::{
    ExtractedFact, ExtractedInsight, InsightExtractionOutcome, MemoryExtractor,
};
pub use facts::FactStore;
pub use insights::{AddOutcome, InsightStore, InsightWrite};
pub use session::SessionRegistry;
pub use summaries::Summarizer;

use thiserror::Error;

/// Memory configuration
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    pub max_user_facts: usize,
    pub max_insights: usize,
    pub consolidation_threshold: usize,
    pub target_insight_count: usize,
    pub preserve_days: i64,
    pub fact_similarity_threshold: f32,
    pub duplicate_threshold: f32,
    pub context_window_size: usize,
    pub summarization_token_threshold: usize,
    pub insight_context_top_k: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        use helmsman_config::constants::memory;
        Self {
            max_user_facts: memory::MAX_USER_FACTS,
            max_insights: memory::MAX_INSIGHTS,
            consolidation_threshold: memory::CONSOLIDATION_THRESHOLD,
            target_insight_count: memory::TARGET_INSIGHT_COUNT,
            preserve_days: memory::PRESERVE_DAYS,
            fact_similarity_threshold: memory::FACT_SIMILARITY_THRESHOLD,
            duplicate_threshold: memory::DUPLICATE_THRESHOLD,
            context_window_size: memory::CONTEXT_WINDOW_SIZE,
            summarization_token_threshold: memory::SUMMARIZATION_TOKEN_THRESHOLD,
            insight_context_top_k: memory::INSIGHT_CONTEXT_TOP_K,
        }
    }
}

impl From<&helmsman_config::MemorySettings> for MemoryConfig {
    fn from(s: &helmsman_config::MemorySettings) -> Self {
        Self {
            max_user_facts: s.max_user_facts,
            max_insights: s.max_insights,
            consolidation_threshold: s.consolidation_threshold,
            target_insight_count: s.target_insight_count,
            preserve_days: s.preserve_days,
            fact_similarity_threshold: s.fact_similarity_threshold,
            duplicate_threshold: s.duplicate_threshold,
            context_window_size: s.context_window_size,
            summarization_token_threshold: s.summarization_token_threshold,
            insight_context_top_k: helmsman_config::constants::memory::INSIGHT_CONTEXT_TOP_K,
        }
    }
}

/// Memory errors
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("store error: {0}")]
    Store(#[from] helmsman_persistence::PersistenceError),

    #[error("extraction error: {0}")]
    Extraction(String),
}

impl From<MemoryError> for helmsman_core::Error {
    fn from(err: MemoryError) -> Self {
        match err {
            MemoryError::Rejected(msg) => helmsman_core::Error::Permanent(msg),
            MemoryError::Store(e) => e.into(),
            MemoryError::Extraction(msg) => helmsman_core::Error::Transient(msg),
        }
    }
}
