//! Corrective RAG over the maritime-regulation corpus
//!
//! Features:
//! - Dense vector search via Qdrant
//! - Sparse BM25 search via Tantivy over content and contextual content
//! - Hybrid fusion with RRF, title/number and sparse-priority boosts
//! - Semantic response cache with TTL and single-flight coalescing
//! - Tiered retrieval grading (pre-filter, mini-judge, full grader)
//! - Query analysis and rewrite-on-poor-retrieval
//! - Groundedness verification with confidence bands
//! - Knowledge-graph entity decoration (bounded depth)

pub mod cache;
pub mod crag;
pub mod entity_lookup;
pub mod grader;
pub mod hybrid;
pub mod query;
pub mod sparse_search;
pub mod vector_store;
pub mod verifier;

pub use cache::{CacheConfig, CachedResponse, SemanticCache};
pub use crag::{CorrectiveRag, CragConfig, CragResult, GradeDecision, VerifyDecision};
pub use entity_lookup::EntityLookup;
pub use grader::{GradeReport, GradedChunk, GraderConfig, RetrievalGrader, Verdict};
pub use hybrid::{HybridConfig, HybridResults, HybridSearcher, ScoredChunk};
pub use query::{Complexity, QueryAnalysis, QueryAnalyzer, QueryRewriter};
pub use sparse_search::{SparseConfig, SparseIndex, SparseResult};
pub use vector_store::{ChunkFilter, ChunkVectorStore, DenseSearcher, InMemoryDenseSearcher, VectorStoreConfig};
pub use verifier::{AnswerVerifier, ConfidenceBand, Verification};

use thiserror::Error;

/// RAG errors
#[derive(Error, Debug)]
pub enum RagError {
    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("vector store error: {0}")]
    VectorStore(String),

    #[error("search error: {0}")]
    Search(String),

    #[error("index error: {0}")]
    Index(String),

    #[error("graph error: {0}")]
    Graph(String),

    #[error("generation error: {0}")]
    Generation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("connection error: {0}")]
    Connection(String),
}

impl From<helmsman_core::Error> for RagError {
    fn from(err: helmsman_core::Error) -> Self {
        RagError::Generation(err.to_string())
    }
}

impl From<RagError> for helmsman_core::Error {
    fn from(err: RagError) -> Self {
        match err {
            RagError::NotFound(msg) => helmsman_core::Error::Permanent(msg),
            other => helmsman_core::Error::Transient(other.to_string()),
        }
    }
}
