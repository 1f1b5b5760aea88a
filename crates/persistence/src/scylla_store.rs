//! ScyllaDB repository implementations

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use helmsman_core::{
    ChatMessage, EdgeType, Entity, EntityType, EvolutionNote, Fact, FactType, Insight,
    InsightCategory, MessageRole, Summary,
};

use crate::client::ScyllaClient;
use crate::error::PersistenceError;
use crate::repos::{
    FactRepository, GraphRepository, InsightRepository, MessageRepository, SessionRecord,
    SessionRepository, SummaryRepository,
};

type Result<T> = std::result::Result<T, PersistenceError>;

fn decode<T>(value: std::result::Result<T, impl std::fmt::Display>) -> Result<T> {
    value.map_err(|e| PersistenceError::Decode(e.to_string()))
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

pub struct ScyllaMessageRepository {
    client: ScyllaClient,
}

impl ScyllaMessageRepository {
    pub fn new(client: ScyllaClient) -> Self {
        Self { client }
    }

    fn row_to_message(
        row: (
            Uuid,
            String,
            String,
            String,
            String,
            DateTime<Utc>,
            Option<bool>,
            Option<String>,
        ),
    ) -> Result<ChatMessage> {
        let (id, session_id, user_id, role, content, created_at, is_blocked, block_reason) = row;
        let role = MessageRole::parse(&role)
            .ok_or_else(|| PersistenceError::Decode(format!("unknown message role {role}")))?;
        Ok(ChatMessage {
            id,
            session_id,
            user_id,
            role,
            content,
            created_at,
            is_blocked: is_blocked.unwrap_or(false),
            block_reason,
        })
    }
}

#[async_trait]
impl MessageRepository for ScyllaMessageRepository {
    async fn append(&self, m: &ChatMessage) -> Result<()> {
        let ks = self.client.keyspace();

        let q = format!(
            "INSERT INTO {ks}.chat_messages \
             (session_id, created_at, id, user_id, role, content, is_blocked, block_reason) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
        );
        self.client
            .session()
            .query_unpaged(
                q,
                (
                    &m.session_id,
                    m.created_at,
                    m.id,
                    &m.user_id,
                    m.role.as_str(),
                    &m.content,
                    m.is_blocked,
                    &m.block_reason,
                ),
            )
            .await?;

        let q = format!(
            "INSERT INTO {ks}.messages_by_user \
             (user_id, created_at, id, session_id, role, content, is_blocked, block_reason) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
        );
        self.client
            .session()
            .query_unpaged(
                q,
                (
                    &m.user_id,
                    m.created_at,
                    m.id,
                    &m.session_id,
                    m.role.as_str(),
                    &m.content,
                    m.is_blocked,
                    &m.block_reason,
                ),
            )
            .await?;

        Ok(())
    }

    async fn recent_in_session(&self, session_id: &str, limit: usize) -> Result<Vec<ChatMessage>> {
        let q = format!(
            "SELECT id, session_id, user_id, role, content, created_at, is_blocked, block_reason \
             FROM {}.chat_messages WHERE session_id = ? LIMIT ?",
            self.client.keyspace()
        );
        let result = self
            .client
            .session()
            .query_unpaged(q, (session_id, limit as i32))
            .await?;

        let mut messages = Vec::new();
        for row in decode(result.rows_typed())? {
            messages.push(Self::row_to_message(decode(row)?)?);
        }
        // Clustered newest-first; callers want chronological order
        messages.reverse();
        Ok(messages)
    }

    async fn since(&self, session_id: &str, after: DateTime<Utc>) -> Result<Vec<ChatMessage>> {
        let q = format!(
            "SELECT id, session_id, user_id, role, content, created_at, is_blocked, block_reason \
             FROM {}.chat_messages WHERE session_id = ? AND created_at > ?",
            self.client.keyspace()
        );
        let result = self
            .client
            .session()
            .query_unpaged(q, (session_id, after))
            .await?;

        let mut messages = Vec::new();
        for row in decode(result.rows_typed())? {
            messages.push(Self::row_to_message(decode(row)?)?);
        }
        messages.reverse();
        Ok(messages)
    }

    async fn history(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ChatMessage>> {
        // ScyllaDB has no OFFSET; fetch offset+limit and skip client-side.
        let q = format!(
            "SELECT id, session_id, user_id, role, content, created_at, is_blocked, block_reason \
             FROM {}.messages_by_user WHERE user_id = ? LIMIT ?",
            self.client.keyspace()
        );
        let result = self
            .client
            .session()
            .query_unpaged(q, (user_id, (limit + offset) as i32))
            .await?;

        let mut messages = Vec::new();
        for row in decode(result.rows_typed())? {
            messages.push(Self::row_to_message(decode(row)?)?);
        }
        Ok(messages.into_iter().skip(offset).collect())
    }

    async fn count_for_user(&self, user_id: &str) -> Result<u64> {
        let q = format!(
            "SELECT COUNT(*) FROM {}.messages_by_user WHERE user_id = ?",
            self.client.keyspace()
        );
        let result = self.client.session().query_unpaged(q, (user_id,)).await?;
        let (count,): (i64,) = decode(result.first_row_typed())?;
        Ok(count as u64)
    }

    async fn delete_user_history(&self, user_id: &str) -> Result<()> {
        let ks = self.client.keyspace();

        // Collect row keys so the session-partitioned table can be cleaned too
        let q = format!(
            "SELECT session_id, created_at, id FROM {ks}.messages_by_user WHERE user_id = ?"
        );
        let result = self.client.session().query_unpaged(q, (user_id,)).await?;

        for row in decode(result.rows_typed::<(String, DateTime<Utc>, Uuid)>())? {
            let (session_id, created_at, id) = decode(row)?;
            let q = format!(
                "DELETE FROM {ks}.chat_messages WHERE session_id = ? AND created_at = ? AND id = ?"
            );
            self.client
                .session()
                .query_unpaged(q, (session_id, created_at, id))
                .await?;
        }

        let q = format!("DELETE FROM {ks}.messages_by_user WHERE user_id = ?");
        self.client.session().query_unpaged(q, (user_id,)).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

pub struct ScyllaSessionRepository {
    client: ScyllaClient,
}

impl ScyllaSessionRepository {
    pub fn new(client: ScyllaClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SessionRepository for ScyllaSessionRepository {
    async fn create(&self, record: &SessionRecord) -> Result<()> {
        let q = format!(
            "INSERT INTO {}.sessions (id, user_id, started_at) VALUES (?, ?, ?)",
            self.client.keyspace()
        );
        self.client
            .session()
            .query_unpaged(q, (&record.id, &record.user_id, record.started_at))
            .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<SessionRecord>> {
        let q = format!(
            "SELECT id, user_id, started_at FROM {}.sessions WHERE id = ?",
            self.client.keyspace()
        );
        let result = self.client.session().query_unpaged(q, (id,)).await?;
        let row: Option<(String, String, DateTime<Utc>)> = decode(result.maybe_first_row_typed())?;
        Ok(row.map(|(id, user_id, started_at)| SessionRecord {
            id,
            user_id,
            started_at,
        }))
    }
}

// ---------------------------------------------------------------------------
// Facts
// ---------------------------------------------------------------------------

pub struct ScyllaFactRepository {
    client: ScyllaClient,
}

impl ScyllaFactRepository {
    pub fn new(client: ScyllaClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FactRepository for ScyllaFactRepository {
    async fn get_all(&self, user_id: &str) -> Result<Vec<Fact>> {
        let q = format!(
            "SELECT fact_type, id, value, embedding, confidence, created_at \
             FROM {}.facts WHERE user_id = ?",
            self.client.keyspace()
        );
        let result = self.client.session().query_unpaged(q, (user_id,)).await?;

        let mut facts = Vec::new();
        for row in decode(
            result.rows_typed::<(String, Uuid, String, Option<Vec<f32>>, f32, DateTime<Utc>)>(),
        )? {
            let (fact_type, id, value, embedding, confidence, created_at) = decode(row)?;
            let Some(fact_type) = FactType::parse(&fact_type) else {
                tracing::warn!(fact_type, "skipping fact row with unknown type");
                continue;
            };
            facts.push(Fact {
                id,
                user_id: user_id.to_string(),
                fact_type,
                value,
                embedding: embedding.unwrap_or_default(),
                confidence,
                created_at,
            });
        }
        facts.sort_by_key(|f| f.created_at);
        Ok(facts)
    }

    async fn put(&self, fact: &Fact) -> Result<()> {
        let q = format!(
            "INSERT INTO {}.facts \
             (user_id, fact_type, id, value, embedding, confidence, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            self.client.keyspace()
        );
        self.client
            .session()
            .query_unpaged(
                q,
                (
                    &fact.user_id,
                    fact.fact_type.as_str(),
                    fact.id,
                    &fact.value,
                    &fact.embedding,
                    fact.confidence,
                    fact.created_at,
                ),
            )
            .await?;
        Ok(())
    }

    async fn delete(&self, user_id: &str, fact_type: FactType) -> Result<()> {
        let q = format!(
            "DELETE FROM {}.facts WHERE user_id = ? AND fact_type = ?",
            self.client.keyspace()
        );
        self.client
            .session()
            .query_unpaged(q, (user_id, fact_type.as_str()))
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Insights
// ---------------------------------------------------------------------------

pub struct ScyllaInsightRepository {
    client: ScyllaClient,
}

impl ScyllaInsightRepository {
    pub fn new(client: ScyllaClient) -> Self {
        Self { client }
    }

    #[allow(clippy::type_complexity)]
    fn row_to_insight(
        user_id: &str,
        row: (
            Uuid,
            String,
            String,
            Option<String>,
            Option<Vec<f32>>,
            f32,
            DateTime<Utc>,
            DateTime<Utc>,
            Option<String>,
        ),
    ) -> Result<Insight> {
        let (id, category, content, sub_topic, embedding, confidence, created_at, last_accessed, notes) =
            row;
        let category = InsightCategory::parse(&category)
            .ok_or_else(|| PersistenceError::Decode(format!("unknown insight category {category}")))?;
        let evolution_notes: Vec<EvolutionNote> = notes
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| PersistenceError::Decode(e.to_string()))?
            .unwrap_or_default();
        Ok(Insight {
            id,
            user_id: user_id.to_string(),
            category,
            content,
            sub_topic,
            embedding: embedding.unwrap_or_default(),
            confidence,
            created_at,
            last_accessed,
            evolution_notes,
        })
    }
}

#[async_trait]
impl InsightRepository for ScyllaInsightRepository {
    async fn list(&self, user_id: &str) -> Result<Vec<Insight>> {
        let q = format!(
            "SELECT id, category, content, sub_topic, embedding, confidence, \
             created_at, last_accessed, evolution_notes \
             FROM {}.insights WHERE user_id = ?",
            self.client.keyspace()
        );
        let result = self.client.session().query_unpaged(q, (user_id,)).await?;

        let mut insights = Vec::new();
        for row in decode(result.rows_typed())? {
            insights.push(Self::row_to_insight(user_id, decode(row)?)?);
        }
        insights.sort_by_key(|i| i.created_at);
        Ok(insights)
    }

    async fn put(&self, insight: &Insight) -> Result<()> {
        let notes = serde_json::to_string(&insight.evolution_notes)
            .map_err(|e| PersistenceError::Decode(e.to_string()))?;
        let q = format!(
            "INSERT INTO {}.insights \
             (user_id, id, category, content, sub_topic, embedding, confidence, \
              created_at, last_accessed, evolution_notes) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.client.keyspace()
        );
        self.client
            .session()
            .query_unpaged(
                q,
                (
                    &insight.user_id,
                    insight.id,
                    insight.category.as_str(),
                    &insight.content,
                    &insight.sub_topic,
                    &insight.embedding,
                    insight.confidence,
                    insight.created_at,
                    insight.last_accessed,
                    notes,
                ),
            )
            .await?;
        Ok(())
    }

    async fn delete(&self, user_id: &str, id: Uuid) -> Result<()> {
        let q = format!(
            "DELETE FROM {}.insights WHERE user_id = ? AND id = ?",
            self.client.keyspace()
        );
        self.client.session().query_unpaged(q, (user_id, id)).await?;
        Ok(())
    }

    async fn replace_all(&self, user_id: &str, insights: &[Insight]) -> Result<()> {
        let q = format!(
            "DELETE FROM {}.insights WHERE user_id = ?",
            self.client.keyspace()
        );
        self.client.session().query_unpaged(q, (user_id,)).await?;

        for insight in insights {
            self.put(insight).await?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Summaries
// ---------------------------------------------------------------------------

pub struct ScyllaSummaryRepository {
    client: ScyllaClient,
}

impl ScyllaSummaryRepository {
    pub fn new(client: ScyllaClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SummaryRepository for ScyllaSummaryRepository {
    async fn latest(&self, user_id: &str, session_id: &str) -> Result<Option<Summary>> {
        let q = format!(
            "SELECT id, content, embedding, covers_until, created_at \
             FROM {}.summaries WHERE user_id = ? AND session_id = ? LIMIT 1",
            self.client.keyspace()
        );
        let result = self
            .client
            .session()
            .query_unpaged(q, (user_id, session_id))
            .await?;

        let row: Option<(Uuid, String, Option<Vec<f32>>, DateTime<Utc>, DateTime<Utc>)> =
            decode(result.maybe_first_row_typed())?;

        Ok(row.map(|(id, content, embedding, covers_until, created_at)| Summary {
            id,
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            content,
            embedding: embedding.unwrap_or_default(),
            covers_until,
            created_at,
        }))
    }

    async fn put(&self, summary: &Summary) -> Result<()> {
        let q = format!(
            "INSERT INTO {}.summaries \
             (user_id, session_id, created_at, id, content, embedding, covers_until) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            self.client.keyspace()
        );
        self.client
            .session()
            .query_unpaged(
                q,
                (
                    &summary.user_id,
                    &summary.session_id,
                    summary.created_at,
                    summary.id,
                    &summary.content,
                    &summary.embedding,
                    summary.covers_until,
                ),
            )
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

pub struct ScyllaGraphRepository {
    client: ScyllaClient,
}

impl ScyllaGraphRepository {
    pub fn new(client: ScyllaClient) -> Self {
        Self { client }
    }

    fn row_to_entity(row: (String, String, String, Option<Vec<String>>)) -> Result<Entity> {
        let (id, entity_type, name, aliases) = row;
        let entity_type = EntityType::parse(&entity_type)
            .ok_or_else(|| PersistenceError::Decode(format!("unknown entity type {entity_type}")))?;
        Ok(Entity {
            id,
            entity_type,
            name,
            aliases: aliases.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl GraphRepository for ScyllaGraphRepository {
    async fn entity(&self, id: &str) -> Result<Option<Entity>> {
        let q = format!(
            "SELECT id, entity_type, name, aliases FROM {}.entities WHERE id = ?",
            self.client.keyspace()
        );
        let result = self.client.session().query_unpaged(q, (id,)).await?;
        let row: Option<(String, String, String, Option<Vec<String>>)> =
            decode(result.maybe_first_row_typed())?;
        row.map(Self::row_to_entity).transpose()
    }

    async fn find_by_name(&self, term: &str) -> Result<Vec<Entity>> {
        let q = format!(
            "SELECT entity_id FROM {}.entity_names WHERE name_lower = ?",
            self.client.keyspace()
        );
        let result = self
            .client
            .session()
            .query_unpaged(q, (term.to_lowercase(),))
            .await?;

        let mut entities = Vec::new();
        for row in decode(result.rows_typed::<(String,)>())? {
            let (entity_id,) = decode(row)?;
            if let Some(entity) = self.entity(&entity_id).await? {
                entities.push(entity);
            }
        }
        Ok(entities)
    }

    async fn neighbors(&self, entity_id: &str) -> Result<Vec<(Entity, EdgeType)>> {
        let q = format!(
            "SELECT edge_type, dst_id FROM {}.entity_edges WHERE src_id = ?",
            self.client.keyspace()
        );
        let result = self.client.session().query_unpaged(q, (entity_id,)).await?;

        let mut neighbors = Vec::new();
        for row in decode(result.rows_typed::<(String, String)>())? {
            let (edge_type, dst_id) = decode(row)?;
            let Some(edge_type) = EdgeType::parse(&edge_type) else {
                tracing::warn!(edge_type, "skipping edge with unknown type");
                continue;
            };
            if let Some(entity) = self.entity(&dst_id).await? {
                neighbors.push((entity, edge_type));
            }
        }
        Ok(neighbors)
    }

    async fn entities_for_chunks(&self, chunk_ids: &[String]) -> Result<Vec<Entity>> {
        let mut seen = std::collections::HashSet::new();
        let mut entities = Vec::new();

        for chunk_id in chunk_ids {
            let q = format!(
                "SELECT entity_id FROM {}.chunk_entities WHERE chunk_id = ?",
                self.client.keyspace()
            );
            let result = self.client.session().query_unpaged(q, (chunk_id,)).await?;
            for row in decode(result.rows_typed::<(String,)>())? {
                let (entity_id,) = decode(row)?;
                if seen.insert(entity_id.clone()) {
                    if let Some(entity) = self.entity(&entity_id).await? {
                        entities.push(entity);
                    }
                }
            }
        }
        Ok(entities)
    }
}
