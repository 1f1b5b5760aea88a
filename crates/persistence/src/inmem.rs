//! In-memory repository implementations
//!
//! Used when `persistence.enabled=false` and throughout the test suites.
//! Semantics match the ScyllaDB implementations, including LWW upserts
//! keyed the same way the tables are keyed.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use helmsman_core::{ChatMessage, EdgeType, Entity, Fact, FactType, Insight, Summary};

use crate::error::PersistenceError;
use crate::repos::{
    FactRepository, GraphRepository, InsightRepository, MessageRepository, SessionRecord,
    SessionRepository, SummaryRepository,
};

type Result<T> = std::result::Result<T, PersistenceError>;

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryMessageRepository {
    messages: RwLock<Vec<ChatMessage>>,
}

impl InMemoryMessageRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn append(&self, message: &ChatMessage) -> Result<()> {
        let mut messages = self.messages.write();
        // Idempotent per message id, matching the keyed INSERT
        if let Some(existing) = messages.iter_mut().find(|m| m.id == message.id) {
            *existing = message.clone();
        } else {
            messages.push(message.clone());
        }
        Ok(())
    }

    async fn recent_in_session(&self, session_id: &str, limit: usize) -> Result<Vec<ChatMessage>> {
        let messages = self.messages.read();
        let mut in_session: Vec<ChatMessage> = messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect();
        in_session.sort_by_key(|m| m.created_at);
        let skip = in_session.len().saturating_sub(limit);
        Ok(in_session.into_iter().skip(skip).collect())
    }

    async fn since(&self, session_id: &str, after: DateTime<Utc>) -> Result<Vec<ChatMessage>> {
        let messages = self.messages.read();
        let mut out: Vec<ChatMessage> = messages
            .iter()
            .filter(|m| m.session_id == session_id && m.created_at > after)
            .cloned()
            .collect();
        out.sort_by_key(|m| m.created_at);
        Ok(out)
    }

    async fn history(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ChatMessage>> {
        let messages = self.messages.read();
        let mut for_user: Vec<ChatMessage> = messages
            .iter()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect();
        for_user.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(for_user.into_iter().skip(offset).take(limit).collect())
    }

    async fn count_for_user(&self, user_id: &str) -> Result<u64> {
        Ok(self
            .messages
            .read()
            .iter()
            .filter(|m| m.user_id == user_id)
            .count() as u64)
    }

    async fn delete_user_history(&self, user_id: &str) -> Result<()> {
        self.messages.write().retain(|m| m.user_id != user_id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemorySessionRepository {
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn create(&self, record: &SessionRecord) -> Result<()> {
        self.sessions
            .write()
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<SessionRecord>> {
        Ok(self.sessions.read().get(id).cloned())
    }
}

// ---------------------------------------------------------------------------
// Facts
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryFactRepository {
    facts: RwLock<HashMap<(String, FactType), Fact>>,
}

impl InMemoryFactRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FactRepository for InMemoryFactRepository {
    async fn get_all(&self, user_id: &str) -> Result<Vec<Fact>> {
        let mut facts: Vec<Fact> = self
            .facts
            .read()
            .values()
            .filter(|f| f.user_id == user_id)
            .cloned()
            .collect();
        facts.sort_by_key(|f| f.created_at);
        Ok(facts)
    }

    async fn put(&self, fact: &Fact) -> Result<()> {
        self.facts
            .write()
            .insert((fact.user_id.clone(), fact.fact_type), fact.clone());
        Ok(())
    }

    async fn delete(&self, user_id: &str, fact_type: FactType) -> Result<()> {
        self.facts
            .write()
            .remove(&(user_id.to_string(), fact_type));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Insights
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryInsightRepository {
    insights: RwLock<HashMap<(String, Uuid), Insight>>,
}

impl InMemoryInsightRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InsightRepository for InMemoryInsightRepository {
    async fn list(&self, user_id: &str) -> Result<Vec<Insight>> {
        let mut insights: Vec<Insight> = self
            .insights
            .read()
            .values()
            .filter(|i| i.user_id == user_id)
            .cloned()
            .collect();
        insights.sort_by_key(|i| i.created_at);
        Ok(insights)
    }

    async fn put(&self, insight: &Insight) -> Result<()> {
        self.insights
            .write()
            .insert((insight.user_id.clone(), insight.id), insight.clone());
        Ok(())
    }

    async fn delete(&self, user_id: &str, id: Uuid) -> Result<()> {
        self.insights.write().remove(&(user_id.to_string(), id));
        Ok(())
    }

    async fn replace_all(&self, user_id: &str, insights: &[Insight]) -> Result<()> {
        let mut map = self.insights.write();
        map.retain(|(uid, _), _| uid != user_id);
        for insight in insights {
            map.insert((insight.user_id.clone(), insight.id), insight.clone());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Summaries
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemorySummaryRepository {
    summaries: RwLock<Vec<Summary>>,
}

impl InMemorySummaryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SummaryRepository for InMemorySummaryRepository {
    async fn latest(&self, user_id: &str, session_id: &str) -> Result<Option<Summary>> {
        Ok(self
            .summaries
            .read()
            .iter()
            .filter(|s| s.user_id == user_id && s.session_id == session_id)
            .max_by_key(|s| s.created_at)
            .cloned())
    }

    async fn put(&self, summary: &Summary) -> Result<()> {
        self.summaries.write().push(summary.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryGraphRepository {
    entities: RwLock<HashMap<String, Entity>>,
    edges: RwLock<Vec<(String, EdgeType, String)>>,
    chunk_entities: RwLock<HashMap<String, Vec<String>>>,
}

impl InMemoryGraphRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test/dev seeding
    pub fn insert_entity(&self, entity: Entity) {
        self.entities.write().insert(entity.id.clone(), entity);
    }

    pub fn insert_edge(&self, src: &str, edge: EdgeType, dst: &str) {
        self.edges
            .write()
            .push((src.to_string(), edge, dst.to_string()));
    }

    pub fn link_chunk(&self, chunk_id: &str, entity_id: &str) {
        self.chunk_entities
            .write()
            .entry(chunk_id.to_string())
            .or_default()
            .push(entity_id.to_string());
    }
}

#[async_trait]
impl GraphRepository for InMemoryGraphRepository {
    async fn entity(&self, id: &str) -> Result<Option<Entity>> {
        Ok(self.entities.read().get(id).cloned())
    }

    async fn find_by_name(&self, term: &str) -> Result<Vec<Entity>> {
        Ok(self
            .entities
            .read()
            .values()
            .filter(|e| e.matches(term))
            .cloned()
            .collect())
    }

    async fn neighbors(&self, entity_id: &str) -> Result<Vec<(Entity, EdgeType)>> {
        let entities = self.entities.read();
        Ok(self
            .edges
            .read()
            .iter()
            .filter(|(src, _, _)| src == entity_id)
            .filter_map(|(_, edge, dst)| entities.get(dst).map(|e| (e.clone(), *edge)))
            .collect())
    }

    async fn entities_for_chunks(&self, chunk_ids: &[String]) -> Result<Vec<Entity>> {
        let entities = self.entities.read();
        let links = self.chunk_entities.read();
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for chunk_id in chunk_ids {
            for entity_id in links.get(chunk_id).into_iter().flatten() {
                if seen.insert(entity_id.clone()) {
                    if let Some(entity) = entities.get(entity_id) {
                        out.push(entity.clone());
                    }
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helmsman_core::{EntityType, MessageRole};

    #[tokio::test]
    async fn test_message_append_is_idempotent_per_id() {
        let repo = InMemoryMessageRepository::new();
        let msg = ChatMessage::new("s1", "u1", MessageRole::User, "xin chào");
        repo.append(&msg).await.unwrap();
        repo.append(&msg).await.unwrap();
        assert_eq!(repo.count_for_user("u1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_message_round_trip_preserves_blocked_flag() {
        let repo = InMemoryMessageRepository::new();
        let msg =
            ChatMessage::new("s1", "u1", MessageRole::User, "nội dung xấu").blocked("policy");
        repo.append(&msg).await.unwrap();

        let loaded = repo.recent_in_session("s1", 10).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded[0].is_blocked);
        assert_eq!(loaded[0].content, "nội dung xấu");
        assert_eq!(loaded[0].block_reason.as_deref(), Some("policy"));
    }

    #[tokio::test]
    async fn test_history_pagination_newest_first() {
        let repo = InMemoryMessageRepository::new();
        for i in 0..5 {
            let mut msg = ChatMessage::new("s1", "u1", MessageRole::User, format!("m{i}"));
            msg.created_at = Utc::now() + chrono::Duration::seconds(i);
            repo.append(&msg).await.unwrap();
        }

        let page = repo.history("u1", 2, 1).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].content, "m3");
        assert_eq!(page[1].content, "m2");
    }

    #[tokio::test]
    async fn test_fact_upsert_keyed_by_type() {
        let repo = InMemoryFactRepository::new();
        let mut fact = Fact {
            id: Uuid::new_v4(),
            user_id: "u1".into(),
            fact_type: FactType::Name,
            value: "Minh".into(),
            embedding: vec![],
            confidence: 0.9,
            created_at: Utc::now(),
        };
        repo.put(&fact).await.unwrap();
        fact.value = "Minh Anh".into();
        repo.put(&fact).await.unwrap();

        let facts = repo.get_all("u1").await.unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].value, "Minh Anh");
    }

    #[tokio::test]
    async fn test_graph_neighbors() {
        let repo = InMemoryGraphRepository::new();
        repo.insert_entity(Entity {
            id: "r15".into(),
            entity_type: EntityType::Article,
            name: "Rule 15".into(),
            aliases: vec![],
        });
        repo.insert_entity(Entity {
            id: "colreg".into(),
            entity_type: EntityType::Regulation,
            name: "COLREG".into(),
            aliases: vec![],
        });
        repo.insert_edge("r15", EdgeType::PartOf, "colreg");

        let neighbors = repo.neighbors("r15").await.unwrap();
        assert_eq!(neighbors.len(), 1);
        assert_eq!(neighbors[0].0.id, "colreg");
        assert_eq!(neighbors[0].1, EdgeType::PartOf);
    }
}
