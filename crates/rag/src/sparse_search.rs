//! Sparse search using Tantivy (BM25)
//!
//! Indexes both `content` and `contextual_content` so context-enriched
//! phrasing is matchable. The full chunk travels in a stored field, so
//! sparse hits need no second lookup.

use parking_lot::RwLock;
use std::path::Path;
use tantivy::{
    collector::TopDocs,
    query::QueryParser,
    schema::{Field, OwnedValue, Schema, TextFieldIndexing, TextOptions, STORED, STRING},
    tokenizer::{LowerCaser, RemoveLongFilter, SimpleTokenizer, TextAnalyzer},
    Index, IndexReader, IndexWriter, TantivyDocument,
};

use helmsman_core::Chunk;

use crate::RagError;

/// Sparse search configuration
#[derive(Debug, Clone)]
pub struct SparseConfig {
    /// Index path (RAM when None)
    pub index_path: Option<String>,
    /// Default number of results
    pub top_k: usize,
}

impl Default for SparseConfig {
    fn default() -> Self {
        Self {
            index_path: None,
            top_k: helmsman_config::constants::retrieval::SPARSE_TOP_K,
        }
    }
}

/// Sparse search result
#[derive(Debug, Clone)]
pub struct SparseResult {
    pub chunk: Chunk,
    /// BM25 score
    pub score: f32,
}

/// BM25 index over regulation chunks
pub struct SparseIndex {
    index: Index,
    reader: IndexReader,
    writer: RwLock<Option<IndexWriter>>,
    id_field: Field,
    content_field: Field,
    contextual_field: Field,
    chunk_field: Field,
    config: SparseConfig,
}

impl SparseIndex {
    pub fn new(config: SparseConfig) -> Result<Self, RagError> {
        let mut schema_builder = Schema::builder();

        let text_options = TextOptions::default().set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer("multilingual")
                .set_index_option(tantivy::schema::IndexRecordOption::WithFreqsAndPositions),
        );

        let id_field = schema_builder.add_text_field("id", STRING | STORED);
        let content_field = schema_builder.add_text_field("content", text_options.clone());
        let contextual_field = schema_builder.add_text_field("contextual", text_options);
        let chunk_field = schema_builder.add_text_field("chunk_json", STORED);

        let schema = schema_builder.build();

        let index = if let Some(ref path) = config.index_path {
            let dir = tantivy::directory::MmapDirectory::open(Path::new(path))
                .map_err(|e| RagError::Index(e.to_string()))?;
            Index::open_or_create(dir, schema.clone())
                .map_err(|e| RagError::Index(e.to_string()))?
        } else {
            Index::create_in_ram(schema.clone())
        };

        // SimpleTokenizer handles Unicode properly, Vietnamese included.
        // No stemmer: Vietnamese is isolating, stemming buys nothing.
        let tokenizer = TextAnalyzer::builder(SimpleTokenizer::default())
            .filter(RemoveLongFilter::limit(100))
            .filter(LowerCaser)
            .build();
        index.tokenizers().register("multilingual", tokenizer);

        let reader = index.reader().map_err(|e| RagError::Index(e.to_string()))?;

        let writer = index
            .writer(50_000_000) // 50MB buffer
            .map_err(|e| RagError::Index(e.to_string()))?;

        Ok(Self {
            index,
            reader,
            writer: RwLock::new(Some(writer)),
            id_field,
            content_field,
            contextual_field,
            chunk_field,
            config,
        })
    }

    /// Index chunks (ingestion runs elsewhere; this backs seeding and tests)
    pub fn index_chunks(&self, chunks: &[Chunk]) -> Result<(), RagError> {
        let mut writer = self.writer.write();
        let writer = writer
            .as_mut()
            .ok_or_else(|| RagError::Index("writer not available".to_string()))?;

        for chunk in chunks {
            let chunk_json =
                serde_json::to_string(chunk).map_err(|e| RagError::Index(e.to_string()))?;

            let mut doc = TantivyDocument::default();
            doc.add_text(self.id_field, &chunk.id);
            doc.add_text(self.content_field, &chunk.content);
            if let Some(ctx) = &chunk.contextual_content {
                doc.add_text(self.contextual_field, ctx);
            }
            doc.add_text(self.chunk_field, &chunk_json);

            writer
                .add_document(doc)
                .map_err(|e| RagError::Index(e.to_string()))?;
        }

        writer.commit().map_err(|e| RagError::Index(e.to_string()))?;

        self.reader
            .reload()
            .map_err(|e| RagError::Index(e.to_string()))?;

        Ok(())
    }

    /// Search using BM25 over content and contextual content
    pub fn search(&self, query: &str, top_k: Option<usize>) -> Result<Vec<SparseResult>, RagError> {
        let k = top_k.unwrap_or(self.config.top_k);

        let searcher = self.reader.searcher();
        let query_parser = QueryParser::for_index(
            &self.index,
            vec![self.content_field, self.contextual_field],
        );

        // Lenient parsing: user text is not a query language
        let (query, _errors) = query_parser.parse_query_lenient(query);

        let top_docs = searcher
            .search(&query, &TopDocs::with_limit(k))
            .map_err(|e| RagError::Search(e.to_string()))?;

        let mut results = Vec::with_capacity(top_docs.len());

        for (score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher
                .doc(doc_address)
                .map_err(|e| RagError::Search(e.to_string()))?;

            let Some(OwnedValue::Str(chunk_json)) = doc.get_first(self.chunk_field) else {
                continue;
            };

            match serde_json::from_str::<Chunk>(chunk_json) {
                Ok(chunk) => results.push(SparseResult { chunk, score }),
                Err(e) => tracing::warn!(error = %e, "undecodable stored chunk, skipping"),
            }
        }

        Ok(results)
    }

    /// Delete chunks by id
    pub fn delete(&self, ids: &[String]) -> Result<(), RagError> {
        let mut writer = self.writer.write();
        let writer = writer
            .as_mut()
            .ok_or_else(|| RagError::Index("writer not available".to_string()))?;

        for id in ids {
            let term = tantivy::Term::from_field_text(self.id_field, id);
            writer.delete_term(term);
        }

        writer.commit().map_err(|e| RagError::Index(e.to_string()))?;
        self.reader
            .reload()
            .map_err(|e| RagError::Index(e.to_string()))?;

        Ok(())
    }

    pub fn doc_count(&self) -> u64 {
        self.reader.searcher().num_docs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helmsman_core::ContentType;

    fn chunk(id: &str, content: &str, contextual: Option<&str>) -> Chunk {
        Chunk {
            id: id.into(),
            document_id: "colreg".into(),
            page_number: 1,
            chunk_index: 0,
            content: content.into(),
            contextual_content: contextual.map(String::from),
            content_type: ContentType::Text,
            confidence: 0.9,
            image_url: None,
            bounding_boxes: vec![],
        }
    }

    #[test]
    fn test_sparse_index_create() {
        let index = SparseIndex::new(SparseConfig::default()).unwrap();
        assert_eq!(index.doc_count(), 0);
    }

    #[test]
    fn test_index_and_search() {
        let index = SparseIndex::new(SparseConfig::default()).unwrap();

        index
            .index_chunks(&[
                chunk(
                    "1",
                    "Quy tắc 15: khi hai tàu cắt hướng nhau có nguy cơ va chạm",
                    None,
                ),
                chunk("2", "Quy tắc 5: cảnh giới bằng mắt nhìn và tai nghe", None),
            ])
            .unwrap();
        assert_eq!(index.doc_count(), 2);

        let results = index.search("tàu cắt hướng va chạm", None).unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].chunk.id, "1");
    }

    #[test]
    fn test_contextual_content_is_searchable() {
        let index = SparseIndex::new(SparseConfig::default()).unwrap();

        index
            .index_chunks(&[chunk(
                "1",
                "nội dung gốc ngắn",
                Some("COLREG crossing situation give-way vessel"),
            )])
            .unwrap();

        let results = index.search("crossing give-way", None).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.id, "1");
    }

    #[test]
    fn test_on_disk_index_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = SparseConfig {
            index_path: Some(dir.path().to_string_lossy().to_string()),
            ..Default::default()
        };
        let index = SparseIndex::new(config).unwrap();
        index.index_chunks(&[chunk("1", "hành trình an toàn", None)]).unwrap();
        assert_eq!(index.doc_count(), 1);
    }
}
