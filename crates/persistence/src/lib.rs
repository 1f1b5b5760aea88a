//! Persistence layer
//!
//! Provides durable storage for:
//! - Chat messages and sessions
//! - Per-user facts, insights and summaries
//! - The knowledge-graph read path (entities and typed edges)
//!
//! Every store is defined as a trait with a ScyllaDB implementation and an
//! in-memory implementation; `persistence.enabled=false` swaps the whole
//! layer for the in-memory variant (development and tests).

pub mod client;
pub mod error;
pub mod inmem;
pub mod repos;
pub mod schema;
pub mod scylla_store;

pub use client::{ScyllaClient, ScyllaConfig};
pub use error::PersistenceError;
pub use inmem::{
    InMemoryFactRepository, InMemoryGraphRepository, InMemoryInsightRepository,
    InMemoryMessageRepository, InMemorySessionRepository, InMemorySummaryRepository,
};
pub use repos::{
    FactRepository, GraphRepository, InsightRepository, MessageRepository, SessionRecord,
    SessionRepository, SummaryRepository,
};
pub use scylla_store::{
    ScyllaFactRepository, ScyllaGraphRepository, ScyllaInsightRepository,
    ScyllaMessageRepository, ScyllaSessionRepository, ScyllaSummaryRepository,
};

use std::sync::Arc;

/// Bundle of every repository the engine needs
#[derive(Clone)]
pub struct PersistenceLayer {
    pub messages: Arc<dyn MessageRepository>,
    pub sessions: Arc<dyn SessionRepository>,
    pub facts: Arc<dyn FactRepository>,
    pub insights: Arc<dyn InsightRepository>,
    pub summaries: Arc<dyn SummaryRepository>,
    pub graph: Arc<dyn GraphRepository>,
}

impl PersistenceLayer {
    /// Connect to ScyllaDB, ensure schema, and build all repositories
    pub async fn connect(config: ScyllaConfig) -> Result<Self, PersistenceError> {
        let client = ScyllaClient::connect(config).await?;
        client.ensure_schema().await?;

        Ok(Self {
            messages: Arc::new(ScyllaMessageRepository::new(client.clone())),
            sessions: Arc::new(ScyllaSessionRepository::new(client.clone())),
            facts: Arc::new(ScyllaFactRepository::new(client.clone())),
            insights: Arc::new(ScyllaInsightRepository::new(client.clone())),
            summaries: Arc::new(ScyllaSummaryRepository::new(client.clone())),
            graph: Arc::new(ScyllaGraphRepository::new(client)),
        })
    }

    /// All-in-process layer for development and tests
    pub fn in_memory() -> Self {
        Self {
            messages: Arc::new(InMemoryMessageRepository::new()),
            sessions: Arc::new(InMemorySessionRepository::new()),
            facts: Arc::new(InMemoryFactRepository::new()),
            insights: Arc::new(InMemoryInsightRepository::new()),
            summaries: Arc::new(InMemorySummaryRepository::new()),
            graph: Arc::new(InMemoryGraphRepository::new()),
        }
    }
}
