//! Centralized default values
//!
//! Single source of truth for tunables referenced by both `Settings`
//! defaults and component-level config structs.

/// Retrieval defaults
pub mod retrieval {
    /// Final results returned by hybrid search
    pub const DEFAULT_TOP_K: usize = 10;
    /// Candidates taken from dense search before fusion
    pub const DENSE_TOP_K: usize = 20;
    /// Candidates taken from sparse search before fusion
    pub const SPARSE_TOP_K: usize = 20;
    /// RRF k parameter
    pub const RRF_K: f32 = 60.0;
    /// Boost for chunks whose heading matches a numeric identifier or
    /// domain proper noun in the query
    pub const TITLE_BOOST: f32 = 3.0;
    /// Boost applied when the sparse score clears the priority floor
    pub const SPARSE_PRIORITY_BOOST: f32 = 1.5;
    /// Sparse score at which the priority boost kicks in
    pub const SPARSE_PRIORITY_MIN_SCORE: f32 = 15.0;
    /// Dense similarity floor for standalone thresholding
    pub const SIMILARITY_THRESHOLD: f32 = 0.7;
}

/// Tiered grader defaults
pub mod grader {
    /// Average score (0-10) a retrieval set must reach to pass
    pub const PASS_THRESHOLD: f32 = 6.0;
    /// Tier-1 hybrid signal at or above which a chunk auto-passes
    pub const PREFILTER_PASS: f32 = 0.8;
    /// Tier-1 hybrid signal at or below which a chunk auto-fails
    pub const PREFILTER_FAIL: f32 = 0.3;
    /// Concurrent mini-judge calls in Tier 2
    pub const PARALLEL_JUDGES: usize = 10;
    /// Chunks per Tier-3 batch
    pub const FULL_GRADER_BATCH: usize = 3;
    /// Relevant chunks needed to skip Tier 3
    pub const EARLY_EXIT_MIN_RELEVANT: usize = 2;
}

/// Semantic cache defaults
pub mod cache {
    pub const TTL_SECONDS: u64 = 7200;
    pub const SIMILARITY: f32 = 0.99;
    pub const CAPACITY: usize = 10_000;
}

/// Memory subsystem defaults
pub mod memory {
    pub const MAX_USER_FACTS: usize = 50;
    pub const MAX_INSIGHTS: usize = 50;
    pub const CONSOLIDATION_THRESHOLD: usize = 40;
    pub const TARGET_INSIGHT_COUNT: usize = 30;
    pub const PRESERVE_DAYS: i64 = 7;
    pub const FACT_SIMILARITY_THRESHOLD: f32 = 0.90;
    pub const DUPLICATE_THRESHOLD: f32 = 0.85;
    pub const CONTEXT_WINDOW_SIZE: usize = 50;
    pub const SUMMARIZATION_TOKEN_THRESHOLD: usize = 4000;
    pub const MIN_INSIGHT_CONTENT_CHARS: usize = 20;
    pub const INSIGHT_CONTEXT_TOP_K: usize = 5;
}

/// Agent defaults
pub mod agent {
    pub const REACT_MAX_ITERATIONS: usize = 5;
    pub const CRAG_MAX_ATTEMPTS: usize = 2;
    pub const REQUEST_DEADLINE_SECONDS: u64 = 90;
}

/// Rate limiting defaults
pub mod limits {
    pub const CHAT_PER_MIN: u32 = 30;
    pub const API_PER_MIN: u32 = 100;
}

/// Guardian defaults
pub mod guardian {
    pub const CACHE_TTL_SECONDS: u64 = 3600;
}

/// Embedding defaults
pub mod embedding {
    pub const DIMENSIONS: usize = 768;
    pub const MAX_BATCH: usize = 100;
}

/// Upstream retry defaults
pub mod retry {
    pub const MAX_ATTEMPTS: u32 = 3;
    pub const INITIAL_BACKOFF_MS: u64 = 100;
}

/// External endpoints
pub mod endpoints {
    pub const QDRANT_DEFAULT: &str = "http://localhost:6334";
    pub const SCYLLA_DEFAULT: &str = "127.0.0.1:9042";
}
