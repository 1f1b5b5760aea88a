//! Hybrid retrieval
//!
//! Runs dense and sparse search in parallel, fuses with Reciprocal Rank
//! Fusion, then applies the title/number boost and the sparse-priority
//! boost. Degrades to single-list results when one side fails and never
//! raises to the caller.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use helmsman_core::{Chunk, ContentType, EmbeddingTask, TextEmbedder};

use crate::sparse_search::SparseIndex;
use crate::vector_store::{ChunkFilter, DenseSearcher};
use crate::RagError;

/// Hybrid search configuration
#[derive(Debug, Clone)]
pub struct HybridConfig {
    pub top_k: usize,
    pub dense_top_k: usize,
    pub sparse_top_k: usize,
    pub rrf_k: f32,
    pub title_boost: f32,
    pub sparse_priority_boost: f32,
    pub sparse_priority_min_score: f32,
}

impl Default for HybridConfig {
    fn default() -> Self {
        use helmsman_config::constants::retrieval;
        Self {
            top_k: retrieval::DEFAULT_TOP_K,
            dense_top_k: retrieval::DENSE_TOP_K,
            sparse_top_k: retrieval::SPARSE_TOP_K,
            rrf_k: retrieval::RRF_K,
            title_boost: retrieval::TITLE_BOOST,
            sparse_priority_boost: retrieval::SPARSE_PRIORITY_BOOST,
            sparse_priority_min_score: retrieval::SPARSE_PRIORITY_MIN_SCORE,
        }
    }
}

impl From<&helmsman_config::RetrievalSettings> for HybridConfig {
    fn from(s: &helmsman_config::RetrievalSettings) -> Self {
        Self {
            top_k: s.top_k,
            dense_top_k: s.dense_top_k,
            sparse_top_k: s.sparse_top_k,
            rrf_k: s.rrf_k,
            title_boost: s.title_boost,
            sparse_priority_boost: s.sparse_priority_boost,
            sparse_priority_min_score: s.sparse_priority_min_score,
        }
    }
}

/// One fused result with its per-list evidence
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub dense_score: Option<f32>,
    pub sparse_score: Option<f32>,
    pub rrf: f32,
    pub boosted: f32,
}

/// Hybrid search output; `degraded` marks single-list fallbacks
#[derive(Debug, Clone, Default)]
pub struct HybridResults {
    pub results: Vec<ScoredChunk>,
    pub degraded: bool,
    pub error: Option<String>,
}

/// Hybrid retriever combining dense and sparse search
pub struct HybridSearcher {
    config: HybridConfig,
    embedder: Arc<dyn TextEmbedder>,
    dense: Arc<dyn DenseSearcher>,
    sparse: Option<Arc<SparseIndex>>,
}

static NUMERIC_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:rule|quy\s*tắc|điều|chương|phần|annex|phụ\s*lục)\s*(\d+[a-z]?)\b")
        .expect("static regex")
});

static PROPER_NOUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(COLREG|SOLAS|MARPOL|STCW|IMO|IALA|ISM|ISPS)S?\b").expect("static regex"));

impl HybridSearcher {
    pub fn new(
        config: HybridConfig,
        embedder: Arc<dyn TextEmbedder>,
        dense: Arc<dyn DenseSearcher>,
    ) -> Self {
        Self {
            config,
            embedder,
            dense,
            sparse: None,
        }
    }

    pub fn with_sparse_index(mut self, index: Arc<SparseIndex>) -> Self {
        self.sparse = Some(index);
        self
    }

    /// Hybrid search with RRF fusion and boosts
    pub async fn search(
        &self,
        query: &str,
        top_k: Option<usize>,
        filter: Option<ChunkFilter>,
    ) -> HybridResults {
        let k = top_k.unwrap_or(self.config.top_k);

        // Dense leg: embed then vector search
        let dense_future = async {
            let embedding = self
                .embedder
                .embed_one(EmbeddingTask::Query, query)
                .await
                .map_err(|e| RagError::Embedding(e.to_string()))?;
            self.dense
                .search(&embedding, self.config.dense_top_k, filter.clone())
                .await
        };

        // Sparse leg: tantivy is CPU-bound, keep it off the async executor
        let sparse_future = async {
            match self.sparse.clone() {
                Some(sparse) => {
                    let query = query.to_string();
                    let top_k = self.config.sparse_top_k;
                    tokio::task::spawn_blocking(move || sparse.search(&query, Some(top_k)))
                        .await
                        .map_err(|e| RagError::Search(format!("sparse task failed: {e}")))?
                }
                None => Ok(Vec::new()),
            }
        };

        let (dense_result, sparse_result) = tokio::join!(dense_future, sparse_future);

        match (dense_result, sparse_result) {
            (Ok(dense), Ok(sparse)) => {
                let sparse: Vec<(Chunk, f32)> =
                    sparse.into_iter().map(|r| (r.chunk, r.score)).collect();
                let mut results = self.fuse(query, &dense, &sparse);
                results.truncate(k);
                HybridResults {
                    results,
                    degraded: false,
                    error: None,
                }
            }
            (Err(dense_err), Ok(sparse)) => {
                tracing::warn!(error = %dense_err, "dense search failed, sparse-only fallback");
                let mut results: Vec<ScoredChunk> = sparse
                    .into_iter()
                    .map(|r| ScoredChunk {
                        chunk: r.chunk,
                        dense_score: None,
                        sparse_score: Some(r.score),
                        rrf: 0.0,
                        boosted: r.score,
                    })
                    .collect();
                results.truncate(k);
                HybridResults {
                    results,
                    degraded: true,
                    error: Some(dense_err.to_string()),
                }
            }
            (Ok(dense), Err(sparse_err)) => {
                tracing::warn!(error = %sparse_err, "sparse search failed, dense-only fallback");
                let mut results: Vec<ScoredChunk> = dense
                    .into_iter()
                    .map(|(chunk, score)| ScoredChunk {
                        chunk,
                        dense_score: Some(score),
                        sparse_score: None,
                        rrf: 0.0,
                        boosted: score,
                    })
                    .collect();
                results.truncate(k);
                HybridResults {
                    results,
                    degraded: true,
                    error: Some(sparse_err.to_string()),
                }
            }
            (Err(dense_err), Err(sparse_err)) => {
                tracing::error!(
                    dense = %dense_err,
                    sparse = %sparse_err,
                    "both retrieval legs failed"
                );
                HybridResults {
                    results: Vec::new(),
                    degraded: true,
                    error: Some(format!("dense: {dense_err}; sparse: {sparse_err}")),
                }
            }
        }
    }

    /// Reciprocal Rank Fusion with boosts, sorted by boosted score
    fn fuse(
        &self,
        query: &str,
        dense: &[(Chunk, f32)],
        sparse: &[(Chunk, f32)],
    ) -> Vec<ScoredChunk> {
        let mut fused: HashMap<String, ScoredChunk> = HashMap::new();

        for (rank, (chunk, score)) in dense.iter().enumerate() {
            let rrf = 1.0 / (self.config.rrf_k + rank as f32 + 1.0);
            fused
                .entry(chunk.id.clone())
                .and_modify(|sc| {
                    sc.rrf += rrf;
                    sc.dense_score = Some(*score);
                })
                .or_insert_with(|| ScoredChunk {
                    chunk: chunk.clone(),
                    dense_score: Some(*score),
                    sparse_score: None,
                    rrf,
                    boosted: 0.0,
                });
        }

        for (rank, (chunk, score)) in sparse.iter().enumerate() {
            let rrf = 1.0 / (self.config.rrf_k + rank as f32 + 1.0);
            fused
                .entry(chunk.id.clone())
                .and_modify(|sc| {
                    sc.rrf += rrf;
                    sc.sparse_score = Some(*score);
                })
                .or_insert_with(|| ScoredChunk {
                    chunk: chunk.clone(),
                    dense_score: None,
                    sparse_score: Some(*score),
                    rrf,
                    boosted: 0.0,
                });
        }

        let identifiers = query_identifiers(query);

        let mut results: Vec<ScoredChunk> = fused
            .into_values()
            .map(|mut sc| {
                sc.boosted = sc.rrf;
                if !identifiers.is_empty() && title_matches(&sc.chunk, &identifiers) {
                    sc.boosted *= self.config.title_boost;
                }
                if sc
                    .sparse_score
                    .map(|s| s >= self.config.sparse_priority_min_score)
                    .unwrap_or(false)
                {
                    sc.boosted *= self.config.sparse_priority_boost;
                }
                sc
            })
            .collect();

        results.sort_by(|a, b| {
            b.boosted
                .partial_cmp(&a.boosted)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results
    }
}

/// Numeric identifiers and domain proper nouns present in the query
pub fn query_identifiers(query: &str) -> Vec<String> {
    let mut identifiers = Vec::new();

    for cap in NUMERIC_ID.captures_iter(query) {
        if let Some(num) = cap.get(1) {
            identifiers.push(num.as_str().to_lowercase());
        }
    }
    for m in PROPER_NOUN.find_iter(&query.to_uppercase()) {
        identifiers.push(m.as_str().trim_end_matches('S').to_lowercase());
    }

    identifiers.sort();
    identifiers.dedup();
    identifiers
}

/// The chunk's "title" is its heading line: the first line of the
/// contextual content when present, else of the raw content. Heading
/// chunks are their own title.
fn title_matches(chunk: &Chunk, identifiers: &[String]) -> bool {
    let title_line = match chunk.content_type {
        ContentType::Heading => chunk.content.as_str(),
        _ => chunk.embedding_text().lines().next().unwrap_or(""),
    };
    let title = title_line.to_lowercase();

    identifiers.iter().any(|id| {
        if id.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false) {
            // Numeric identifiers must match a whole token
            title
                .split(|c: char| !c.is_alphanumeric())
                .any(|tok| tok == id)
        } else {
            title.contains(id.as_str())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sparse_search::SparseConfig;
    use crate::vector_store::InMemoryDenseSearcher;
    use async_trait::async_trait;
    use helmsman_core::Result as CoreResult;

    fn chunk(id: &str, content: &str) -> Chunk {
        Chunk {
            id: id.into(),
            document_id: "colreg".into(),
            page_number: 1,
            chunk_index: 0,
            content: content.into(),
            contextual_content: None,
            content_type: ContentType::Text,
            confidence: 0.9,
            image_url: None,
            bounding_boxes: vec![],
        }
    }

    struct FixedEmbedder;

    #[async_trait]
    impl TextEmbedder for FixedEmbedder {
        async fn embed(
            &self,
            _task: EmbeddingTask,
            texts: &[String],
        ) -> CoreResult<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    fn searcher() -> HybridSearcher {
        HybridSearcher::new(
            HybridConfig::default(),
            Arc::new(FixedEmbedder),
            Arc::new(InMemoryDenseSearcher::new()),
        )
    }

    #[test]
    fn test_query_identifiers() {
        let ids = query_identifiers("Quy tắc 15 COLREG nói gì về tàu cắt hướng?");
        assert!(ids.contains(&"15".to_string()));
        assert!(ids.contains(&"colreg".to_string()));

        assert!(query_identifiers("tàu là gì?").is_empty());
    }

    #[test]
    fn test_rrf_fusion_rewards_presence_in_both_lists() {
        let s = searcher();
        let dense = vec![(chunk("a", "x"), 0.9), (chunk("b", "y"), 0.8)];
        let sparse = vec![(chunk("b", "y"), 12.0), (chunk("c", "z"), 10.0)];

        let fused = s.fuse("câu hỏi", &dense, &sparse);
        assert_eq!(fused.len(), 3);
        // b appears in both lists, so it outranks a and c
        assert_eq!(fused[0].chunk.id, "b");
        assert!(fused[0].dense_score.is_some() && fused[0].sparse_score.is_some());
    }

    #[test]
    fn test_adding_to_sparse_list_never_decreases_score() {
        let s = searcher();
        let dense = vec![(chunk("a", "x"), 0.9)];

        let without = s.fuse("câu hỏi", &dense, &[]);
        let with = s.fuse("câu hỏi", &dense, &[(chunk("a", "x"), 5.0)]);

        let before = without.iter().find(|c| c.chunk.id == "a").unwrap().boosted;
        let after = with.iter().find(|c| c.chunk.id == "a").unwrap().boosted;
        assert!(after >= before);
    }

    #[test]
    fn test_title_boost_applied() {
        let s = searcher();
        let rule15 = chunk("r15", "Quy tắc 15 - Tàu thuyền cắt hướng nhau\nKhi hai tàu...");
        let other = chunk("r5", "Quy tắc 5 - Cảnh giới\nMọi tàu phải...");

        // Same ranks on the dense side only
        let fused = s.fuse(
            "Quy tắc 15 nói gì?",
            &[(other.clone(), 0.9), (rule15.clone(), 0.8)],
            &[],
        );

        // The boost flips the order in favor of the title match
        assert_eq!(fused[0].chunk.id, "r15");
    }

    #[test]
    fn test_sparse_priority_boost() {
        let s = searcher();

        // "low" outranks "high" on the sparse list, but only "high" clears
        // the priority floor of 15
        let fused = s.fuse(
            "không có định danh",
            &[],
            &[(chunk("low", "x"), 14.0), (chunk("high", "y"), 20.0)],
        );

        let high = fused.iter().find(|c| c.chunk.id == "high").unwrap();
        let low = fused.iter().find(|c| c.chunk.id == "low").unwrap();
        assert!((high.boosted - high.rrf * 1.5).abs() < 1e-6);
        assert!((low.boosted - low.rrf).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_sparse_only_fallback_when_no_dense_hits() {
        let sparse = Arc::new(SparseIndex::new(SparseConfig::default()).unwrap());
        sparse
            .index_chunks(&[chunk("1", "quy tắc nhường đường cho tàu bên phải")])
            .unwrap();

        // Dense store is empty; both legs succeed but dense returns nothing
        let s = HybridSearcher::new(
            HybridConfig::default(),
            Arc::new(FixedEmbedder),
            Arc::new(InMemoryDenseSearcher::new()),
        )
        .with_sparse_index(sparse);

        let results = s.search("nhường đường", None, None).await;
        assert!(!results.degraded);
        assert_eq!(results.results.len(), 1);
    }
}
