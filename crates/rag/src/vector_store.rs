//! Dense chunk search
//!
//! Qdrant-backed vector store over regulation chunks. Payload carries the
//! full chunk JSON plus filterable fields. An in-memory implementation
//! backs `persistence.enabled=false` and tests.

use async_trait::async_trait;
use parking_lot::RwLock;
use qdrant_client::{
    qdrant::{
        value::Kind, Condition, CreateCollectionBuilder, Distance, GetPointsBuilder, PointId,
        PointStruct, Range, SearchPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder,
    },
    Qdrant,
};
use std::collections::HashMap;

use helmsman_core::{cosine_similarity, Chunk, ContentType};

use crate::RagError;

/// Vector store configuration
#[derive(Debug, Clone)]
pub struct VectorStoreConfig {
    pub endpoint: String,
    pub collection: String,
    pub vector_dim: usize,
    pub api_key: Option<String>,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            endpoint: helmsman_config::constants::endpoints::QDRANT_DEFAULT.to_string(),
            collection: "maritime_regulations".to_string(),
            vector_dim: helmsman_config::constants::embedding::DIMENSIONS,
            api_key: None,
        }
    }
}

/// Search-time filters over the corpus
#[derive(Debug, Clone, Default)]
pub struct ChunkFilter {
    pub document_id: Option<String>,
    pub content_type: Option<ContentType>,
    pub min_confidence: Option<f32>,
}

impl ChunkFilter {
    pub fn is_empty(&self) -> bool {
        self.document_id.is_none() && self.content_type.is_none() && self.min_confidence.is_none()
    }

    /// Local predicate, used by the in-memory store and result checks
    pub fn accepts(&self, chunk: &Chunk) -> bool {
        if let Some(doc) = &self.document_id {
            if &chunk.document_id != doc {
                return false;
            }
        }
        if let Some(ct) = self.content_type {
            if chunk.content_type != ct {
                return false;
            }
        }
        if let Some(min) = self.min_confidence {
            if chunk.confidence < min {
                return false;
            }
        }
        true
    }

    fn into_qdrant(self) -> qdrant_client::qdrant::Filter {
        let mut conditions = Vec::new();

        if let Some(doc) = self.document_id {
            conditions.push(Condition::matches("document_id", doc));
        }
        if let Some(ct) = self.content_type {
            conditions.push(Condition::matches("content_type", ct.as_str().to_string()));
        }
        if let Some(min) = self.min_confidence {
            conditions.push(Condition::range(
                "confidence",
                Range {
                    gte: Some(min as f64),
                    ..Default::default()
                },
            ));
        }

        qdrant_client::qdrant::Filter {
            must: conditions,
            ..Default::default()
        }
    }
}

/// Dense search abstraction so the hybrid layer can run against Qdrant
/// or an in-process store interchangeably.
#[async_trait]
pub trait DenseSearcher: Send + Sync {
    async fn search(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: Option<ChunkFilter>,
    ) -> Result<Vec<(Chunk, f32)>, RagError>;

    /// Fetch one chunk by id (source detail endpoint)
    async fn get(&self, id: &str) -> Result<Option<Chunk>, RagError>;
}

/// Qdrant-backed chunk store
pub struct ChunkVectorStore {
    client: Qdrant,
    config: VectorStoreConfig,
}

impl ChunkVectorStore {
    pub async fn new(config: VectorStoreConfig) -> Result<Self, RagError> {
        let mut builder = Qdrant::from_url(&config.endpoint);

        if let Some(ref api_key) = config.api_key {
            builder = builder.api_key(api_key.clone());
            tracing::info!("Qdrant connection using API key authentication");
        }

        let client = builder
            .build()
            .map_err(|e| RagError::Connection(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// Create collection if not exists
    pub async fn ensure_collection(&self) -> Result<(), RagError> {
        let exists = self
            .client
            .collection_exists(&self.config.collection)
            .await
            .map_err(|e| RagError::VectorStore(e.to_string()))?;

        if !exists {
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(&self.config.collection).vectors_config(
                        VectorParamsBuilder::new(self.config.vector_dim as u64, Distance::Cosine),
                    ),
                )
                .await
                .map_err(|e| RagError::VectorStore(e.to_string()))?;
        }

        Ok(())
    }

    /// Shallow connectivity probe for deep health checks
    pub async fn ping(&self) -> Result<(), RagError> {
        self.client
            .collection_exists(&self.config.collection)
            .await
            .map(|_| ())
            .map_err(|e| RagError::Connection(e.to_string()))
    }

    /// Write chunks (ingestion runs elsewhere; this backs seeding and tests)
    pub async fn upsert(&self, chunks: &[Chunk], embeddings: &[Vec<f32>]) -> Result<(), RagError> {
        if chunks.len() != embeddings.len() {
            return Err(RagError::VectorStore(
                "chunk and embedding count mismatch".to_string(),
            ));
        }

        let points: Result<Vec<PointStruct>, RagError> = chunks
            .iter()
            .zip(embeddings.iter())
            .map(|(chunk, emb)| {
                let chunk_json = serde_json::to_string(chunk)
                    .map_err(|e| RagError::VectorStore(e.to_string()))?;

                let mut payload: HashMap<String, qdrant_client::qdrant::Value> = HashMap::new();
                payload.insert("chunk_json".to_string(), chunk_json.into());
                payload.insert("document_id".to_string(), chunk.document_id.clone().into());
                payload.insert(
                    "content_type".to_string(),
                    chunk.content_type.as_str().to_string().into(),
                );
                payload.insert("confidence".to_string(), (chunk.confidence as f64).into());

                Ok(PointStruct::new(chunk.id.clone(), emb.clone(), payload))
            })
            .collect();

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.config.collection, points?))
            .await
            .map_err(|e| RagError::VectorStore(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl DenseSearcher for ChunkVectorStore {
    async fn search(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: Option<ChunkFilter>,
    ) -> Result<Vec<(Chunk, f32)>, RagError> {
        let mut search_builder = SearchPointsBuilder::new(
            &self.config.collection,
            embedding.to_vec(),
            top_k as u64,
        )
        .with_payload(true);

        if let Some(f) = filter.filter(|f| !f.is_empty()) {
            search_builder = search_builder.filter(f.into_qdrant());
        }

        let results = self
            .client
            .search_points(search_builder)
            .await
            .map_err(|e| RagError::Search(e.to_string()))?;

        let mut out = Vec::with_capacity(results.result.len());
        for point in results.result {
            let Some(Kind::StringValue(chunk_json)) = point
                .payload
                .get("chunk_json")
                .and_then(|v| v.kind.clone())
            else {
                tracing::warn!("point without chunk_json payload, skipping");
                continue;
            };

            match serde_json::from_str::<Chunk>(&chunk_json) {
                Ok(chunk) => out.push((chunk, point.score)),
                Err(e) => tracing::warn!(error = %e, "undecodable chunk payload, skipping"),
            }
        }

        Ok(out)
    }

    async fn get(&self, id: &str) -> Result<Option<Chunk>, RagError> {
        let points = self
            .client
            .get_points(
                GetPointsBuilder::new(
                    &self.config.collection,
                    vec![PointId::from(id.to_string())],
                )
                .with_payload(true),
            )
            .await
            .map_err(|e| RagError::VectorStore(e.to_string()))?;

        let Some(point) = points.result.into_iter().next() else {
            return Ok(None);
        };
        let Some(Kind::StringValue(chunk_json)) = point
            .payload
            .get("chunk_json")
            .and_then(|v| v.kind.clone())
        else {
            return Ok(None);
        };

        serde_json::from_str::<Chunk>(&chunk_json)
            .map(Some)
            .map_err(|e| RagError::VectorStore(e.to_string()))
    }
}

/// In-process dense search over seeded chunks (dev mode and tests)
#[derive(Default)]
pub struct InMemoryDenseSearcher {
    chunks: RwLock<Vec<(Chunk, Vec<f32>)>>,
}

impl InMemoryDenseSearcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, chunk: Chunk, embedding: Vec<f32>) {
        self.chunks.write().push((chunk, embedding));
    }

    pub fn len(&self) -> usize {
        self.chunks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.read().is_empty()
    }
}

#[async_trait]
impl DenseSearcher for InMemoryDenseSearcher {
    async fn search(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: Option<ChunkFilter>,
    ) -> Result<Vec<(Chunk, f32)>, RagError> {
        let chunks = self.chunks.read();
        let mut scored: Vec<(Chunk, f32)> = chunks
            .iter()
            .filter(|(chunk, _)| filter.as_ref().map(|f| f.accepts(chunk)).unwrap_or(true))
            .map(|(chunk, emb)| (chunk.clone(), cosine_similarity(embedding, emb)))
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn get(&self, id: &str) -> Result<Option<Chunk>, RagError> {
        Ok(self
            .chunks
            .read()
            .iter()
            .find(|(chunk, _)| chunk.id == id)
            .map(|(chunk, _)| chunk.clone()))
    }
}
