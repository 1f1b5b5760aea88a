//! Repository traits
//!
//! Logic (caps, merges, consolidation) lives in the memory crate; these
//! traits are plain row-level stores so ScyllaDB and in-memory variants
//! stay interchangeable.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use helmsman_core::{ChatMessage, EdgeType, Entity, Fact, FactType, Insight, Summary};

use crate::error::PersistenceError;

type Result<T> = std::result::Result<T, PersistenceError>;

/// Stored session row
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub id: String,
    pub user_id: String,
    pub started_at: DateTime<Utc>,
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Append (or overwrite, for an idempotent retry keyed by message id)
    async fn append(&self, message: &ChatMessage) -> Result<()>;

    /// Most recent messages in a session, oldest-first, blocked included
    async fn recent_in_session(&self, session_id: &str, limit: usize) -> Result<Vec<ChatMessage>>;

    /// Messages in a session created strictly after `after`, oldest-first
    async fn since(&self, session_id: &str, after: DateTime<Utc>) -> Result<Vec<ChatMessage>>;

    /// Paginated per-user history, newest-first
    async fn history(&self, user_id: &str, limit: usize, offset: usize)
        -> Result<Vec<ChatMessage>>;

    async fn count_for_user(&self, user_id: &str) -> Result<u64>;

    async fn delete_user_history(&self, user_id: &str) -> Result<()>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create(&self, record: &SessionRecord) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<SessionRecord>>;
}

#[async_trait]
pub trait FactRepository: Send + Sync {
    async fn get_all(&self, user_id: &str) -> Result<Vec<Fact>>;
    /// Last-write-wins row write keyed by (user_id, fact_type)
    async fn put(&self, fact: &Fact) -> Result<()>;
    async fn delete(&self, user_id: &str, fact_type: FactType) -> Result<()>;
}

#[async_trait]
pub trait InsightRepository: Send + Sync {
    async fn list(&self, user_id: &str) -> Result<Vec<Insight>>;
    async fn put(&self, insight: &Insight) -> Result<()>;
    async fn delete(&self, user_id: &str, id: Uuid) -> Result<()>;
    /// Swap the full per-user set (consolidation output)
    async fn replace_all(&self, user_id: &str, insights: &[Insight]) -> Result<()>;
}

#[async_trait]
pub trait SummaryRepository: Send + Sync {
    async fn latest(&self, user_id: &str, session_id: &str) -> Result<Option<Summary>>;
    async fn put(&self, summary: &Summary) -> Result<()>;
}

#[async_trait]
pub trait GraphRepository: Send + Sync {
    async fn entity(&self, id: &str) -> Result<Option<Entity>>;

    /// Entities whose name or alias matches the lowered term exactly
    async fn find_by_name(&self, term: &str) -> Result<Vec<Entity>>;

    /// Outgoing typed edges of one entity
    async fn neighbors(&self, entity_id: &str) -> Result<Vec<(Entity, EdgeType)>>;

    /// Entities referenced by the given chunks
    async fn entities_for_chunks(&self, chunk_ids: &[String]) -> Result<Vec<Entity>>;
}
