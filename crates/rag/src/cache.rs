//! Semantic response cache
//!
//! Keyed by query embedding: any stored entry with cosine similarity at or
//! above the threshold and within TTL is a hit. Concurrent misses for the
//! same fingerprint coalesce through a single-flight map so only one
//! generation runs per distinct query shape.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::OnceCell;

use helmsman_core::{cosine_similarity, Citation, QueryType};

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub similarity: f32,
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        use helmsman_config::constants::cache;
        Self {
            ttl: Duration::from_secs(cache::TTL_SECONDS),
            similarity: cache::SIMILARITY,
            capacity: cache::CAPACITY,
        }
    }
}

impl From<&helmsman_config::CacheSettings> for CacheConfig {
    fn from(s: &helmsman_config::CacheSettings) -> Self {
        Self {
            ttl: Duration::from_secs(s.ttl_seconds),
            similarity: s.similarity,
            capacity: s.capacity,
        }
    }
}

/// Response payload stored in the cache and shared between coalesced callers
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub confidence: f32,
    pub query_type: Option<QueryType>,
    pub grounded: bool,
}

struct CacheEntry {
    embedding: Vec<f32>,
    response: CachedResponse,
    created_at: Instant,
    last_access: Instant,
}

/// Thread-safe semantic cache with single-flight coalescing
pub struct SemanticCache {
    entries: RwLock<Vec<CacheEntry>>,
    in_flight: DashMap<u64, Arc<OnceCell<CachedResponse>>>,
    config: CacheConfig,
}

impl SemanticCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            in_flight: DashMap::new(),
            config,
        }
    }

    /// Stable fingerprint of an embedding: the sign bits of the first 64
    /// dimensions. Near-identical queries quantize to the same key, which
    /// is all single-flight needs.
    pub fn fingerprint(embedding: &[f32]) -> u64 {
        let mut bits = 0u64;
        for (i, v) in embedding.iter().take(64).enumerate() {
            if *v >= 0.0 {
                bits |= 1 << i;
            }
        }
        bits
    }

    /// Similarity lookup. A hit refreshes `last_access`.
    pub fn lookup(&self, embedding: &[f32]) -> Option<CachedResponse> {
        let mut entries = self.entries.write();
        let now = Instant::now();

        // Drop expired entries opportunistically
        entries.retain(|e| now.duration_since(e.created_at) < self.config.ttl);

        let best = entries
            .iter_mut()
            .map(|e| (cosine_similarity(embedding, &e.embedding), e))
            .filter(|(sim, _)| *sim >= self.config.similarity)
            .max_by(|(a, _), (b, _)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        best.map(|(_, entry)| {
            entry.last_access = now;
            entry.response.clone()
        })
    }

    /// Store a response, evicting the oldest entry at capacity
    pub fn store(&self, embedding: Vec<f32>, response: CachedResponse) {
        let mut entries = self.entries.write();
        let now = Instant::now();

        if entries.len() >= self.config.capacity {
            if let Some(oldest) = entries
                .iter()
                .enumerate()
                .min_by_key(|(_, e)| e.created_at)
                .map(|(i, _)| i)
            {
                entries.swap_remove(oldest);
            }
        }

        entries.push(CacheEntry {
            embedding,
            response,
            created_at: now,
            last_access: now,
        });
    }

    /// Single-flight cell for a fingerprint. All concurrent callers get
    /// the same cell; exactly one will run the generation closure.
    pub fn flight(&self, fingerprint: u64) -> Arc<OnceCell<CachedResponse>> {
        self.in_flight
            .entry(fingerprint)
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    /// Drop a completed (or failed) flight so later requests re-enter
    pub fn finish_flight(&self, fingerprint: u64) {
        self.in_flight.remove(&fingerprint);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn response(answer: &str) -> CachedResponse {
        CachedResponse {
            answer: answer.into(),
            citations: vec![],
            confidence: 0.9,
            query_type: Some(QueryType::Factual),
            grounded: true,
        }
    }

    fn cache() -> SemanticCache {
        SemanticCache::new(CacheConfig {
            ttl: Duration::from_secs(60),
            similarity: 0.99,
            capacity: 3,
        })
    }

    #[test]
    fn test_hit_requires_high_similarity() {
        let cache = cache();
        cache.store(vec![1.0, 0.0], response("a"));

        assert!(cache.lookup(&[1.0, 0.0]).is_some());
        // 45 degrees away: cosine ~0.707, well below 0.99
        assert!(cache.lookup(&[0.7, 0.7]).is_none());
    }

    #[test]
    fn test_hit_returns_stored_response_unchanged() {
        let cache = cache();
        cache.store(vec![0.0, 1.0], response("đáp án gốc"));
        let hit = cache.lookup(&[0.0, 1.0]).unwrap();
        assert_eq!(hit.answer, "đáp án gốc");
        assert!(hit.grounded);
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = SemanticCache::new(CacheConfig {
            ttl: Duration::from_millis(0),
            similarity: 0.99,
            capacity: 10,
        });
        cache.store(vec![1.0], response("x"));
        assert!(cache.lookup(&[1.0]).is_none());
    }

    #[test]
    fn test_capacity_eviction_drops_oldest() {
        let cache = cache();
        cache.store(vec![1.0, 0.0, 0.0], response("first"));
        cache.store(vec![0.0, 1.0, 0.0], response("second"));
        cache.store(vec![0.0, 0.0, 1.0], response("third"));
        cache.store(vec![-1.0, 0.0, 0.0], response("fourth"));

        assert_eq!(cache.len(), 3);
        assert!(cache.lookup(&[1.0, 0.0, 0.0]).is_none());
        assert!(cache.lookup(&[-1.0, 0.0, 0.0]).is_some());
    }

    #[test]
    fn test_fingerprint_stable_for_near_identical_embeddings() {
        let a: Vec<f32> = (0..768).map(|i| ((i % 7) as f32 - 3.0) / 3.0).collect();
        let mut b = a.clone();
        b[10] += 1e-4;
        assert_eq!(SemanticCache::fingerprint(&a), SemanticCache::fingerprint(&b));
    }

    #[tokio::test]
    async fn test_single_flight_runs_generator_once() {
        let cache = Arc::new(cache());
        let calls = Arc::new(AtomicUsize::new(0));
        let fp = SemanticCache::fingerprint(&[1.0, 0.5, -0.2]);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                let cell = cache.flight(fp);
                cell.get_or_init(|| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    response("generated")
                })
                .await
                .clone()
            }));
        }

        for handle in handles {
            let result = handle.await.unwrap();
            assert_eq!(result.answer, "generated");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        cache.finish_flight(fp);
        assert!(cache.in_flight.is_empty());
    }
}
