//! Knowledge-graph entity decoration
//!
//! Bounded breadth-first traversal (depth <= 2) from entities referenced
//! by retrieved chunks or named in the query. Failure degrades to an
//! empty list; retrieval never depends on the graph.

use std::collections::HashSet;
use std::sync::Arc;

use helmsman_core::RelatedEntity;
use helmsman_persistence::GraphRepository;

use crate::hybrid::query_identifiers;

/// Traversal depth cap
const MAX_DEPTH: u8 = 2;
/// Upper bound on decorations returned
const MAX_RELATED: usize = 10;

/// Graph read path
pub struct EntityLookup {
    graph: Arc<dyn GraphRepository>,
}

impl EntityLookup {
    pub fn new(graph: Arc<dyn GraphRepository>) -> Self {
        Self { graph }
    }

    /// Related entities for a set of retrieved chunks plus the query text.
    /// Seeds come from chunk references and query-identifier name matches;
    /// traversal stops at distance 2.
    pub async fn related(&self, chunk_ids: &[String], query: &str) -> Vec<RelatedEntity> {
        match self.related_inner(chunk_ids, query).await {
            Ok(entities) => entities,
            Err(e) => {
                tracing::warn!(error = %e, "entity lookup failed, continuing without graph context");
                Vec::new()
            }
        }
    }

    async fn related_inner(
        &self,
        chunk_ids: &[String],
        query: &str,
    ) -> Result<Vec<RelatedEntity>, helmsman_persistence::PersistenceError> {
        let mut seeds = self.graph.entities_for_chunks(chunk_ids).await?;

        for identifier in query_identifiers(query) {
            let matched = self.graph.find_by_name(&identifier).await?;
            seeds.extend(matched);
        }

        let mut visited: HashSet<String> = seeds.iter().map(|e| e.id.clone()).collect();
        let mut related: Vec<RelatedEntity> = Vec::new();
        let mut frontier: Vec<String> = seeds.into_iter().map(|e| e.id).collect();

        for depth in 1..=MAX_DEPTH {
            let mut next_frontier = Vec::new();

            for entity_id in &frontier {
                for (entity, relation) in self.graph.neighbors(entity_id).await? {
                    if !visited.insert(entity.id.clone()) {
                        continue;
                    }
                    next_frontier.push(entity.id.clone());
                    related.push(RelatedEntity {
                        entity,
                        relation,
                        distance: depth,
                    });
                    if related.len() >= MAX_RELATED {
                        return Ok(related);
                    }
                }
            }

            frontier = next_frontier;
            if frontier.is_empty() {
                break;
            }
        }

        Ok(related)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helmsman_core::{EdgeType, Entity, EntityType};
    use helmsman_persistence::InMemoryGraphRepository;

    fn entity(id: &str, name: &str) -> Entity {
        Entity {
            id: id.into(),
            entity_type: EntityType::Article,
            name: name.into(),
            aliases: vec![],
        }
    }

    fn graph() -> Arc<InMemoryGraphRepository> {
        let graph = Arc::new(InMemoryGraphRepository::new());
        graph.insert_entity(entity("r15", "Rule 15"));
        graph.insert_entity(entity("r16", "Rule 16"));
        graph.insert_entity(entity("r17", "Rule 17"));
        graph.insert_entity(entity("colreg", "COLREG"));
        graph.insert_edge("r15", EdgeType::References, "r16");
        graph.insert_edge("r16", EdgeType::References, "r17");
        graph.insert_edge("r17", EdgeType::PartOf, "colreg");
        graph.link_chunk("chunk-1", "r15");
        graph
    }

    #[tokio::test]
    async fn test_traversal_stops_at_depth_two() {
        let lookup = EntityLookup::new(graph());

        let related = lookup.related(&["chunk-1".to_string()], "không có định danh").await;

        // r16 at distance 1, r17 at distance 2; colreg is at distance 3 and
        // must not appear
        let ids: Vec<&str> = related.iter().map(|r| r.entity.id.as_str()).collect();
        assert!(ids.contains(&"r16"));
        assert!(ids.contains(&"r17"));
        assert!(!ids.contains(&"colreg"));

        let r17 = related.iter().find(|r| r.entity.id == "r17").unwrap();
        assert_eq!(r17.distance, 2);
    }

    #[tokio::test]
    async fn test_query_identifier_seeds() {
        let lookup = EntityLookup::new(graph());

        // No chunks, but "COLREG" in the query matches an entity by name;
        // it has no outgoing edges so nothing related is found
        let related = lookup.related(&[], "COLREG nói gì?").await;
        assert!(related.is_empty());

        // "Quy tắc 16" does not name-match (entity names are "Rule 16"),
        // still fine: empty, not an error
        let related = lookup.related(&[], "Quy tắc 99").await;
        assert!(related.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_chunks_degrade_to_empty() {
        let lookup = EntityLookup::new(graph());
        let related = lookup.related(&["ghost".to_string()], "q").await;
        assert!(related.is_empty());
    }
}
