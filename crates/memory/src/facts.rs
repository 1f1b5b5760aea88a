//! Fact store
//!
//! At most one fact per (user, type); writes upsert and keep the original
//! `created_at`. The per-user count is capped by deleting oldest facts.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use helmsman_core::{Fact, FactType};
use helmsman_persistence::FactRepository;

use crate::{MemoryConfig, MemoryError};

pub struct FactStore {
    repo: Arc<dyn FactRepository>,
    config: MemoryConfig,
}

impl FactStore {
    pub fn new(repo: Arc<dyn FactRepository>, config: MemoryConfig) -> Self {
        Self { repo, config }
    }

    /// Upsert a fact. The type string is validated against the closed set
    /// with deprecated names remapped; unknown types are dropped silently.
    pub async fn upsert_fact(
        &self,
        user_id: &str,
        fact_type: &str,
        value: &str,
        embedding: Vec<f32>,
        confidence: f32,
    ) -> Result<Option<Fact>, MemoryError> {
        let Some(fact_type) = FactType::parse(fact_type) else {
            tracing::debug!(fact_type, "dropping fact with unknown type");
            return Ok(None);
        };

        let value = value.trim();
        if value.is_empty() {
            return Err(MemoryError::Rejected("fact value is empty".into()));
        }

        let existing = self.repo.get_all(user_id).await?;
        let previous = existing.iter().find(|f| f.fact_type == fact_type);

        let fact = Fact {
            // Update in place: keep identity and created_at of the old row
            id: previous.map(|f| f.id).unwrap_or_else(Uuid::new_v4),
            user_id: user_id.to_string(),
            fact_type,
            value: value.to_string(),
            embedding,
            confidence: confidence.clamp(0.0, 1.0),
            created_at: previous.map(|f| f.created_at).unwrap_or_else(Utc::now),
        };
        let inserted = previous.is_none();
        self.repo.put(&fact).await?;

        if inserted {
            self.enforce_cap(user_id).await?;
        }

        Ok(Some(fact))
    }

    /// Delete oldest facts until the per-user count is within the cap
    async fn enforce_cap(&self, user_id: &str) -> Result<(), MemoryError> {
        let facts = self.repo.get_all(user_id).await?;
        if facts.len() <= self.config.max_user_facts {
            return Ok(());
        }

        let mut by_age = facts;
        by_age.sort_by_key(|f| f.created_at);
        let excess = by_age.len() - self.config.max_user_facts;
        for fact in by_age.into_iter().take(excess) {
            tracing::debug!(user_id, fact_type = fact.fact_type.as_str(), "evicting oldest fact");
            self.repo.delete(user_id, fact.fact_type).await?;
        }
        Ok(())
    }

    /// Ordered facts for context building
    pub async fn get_facts(&self, user_id: &str) -> Result<Vec<Fact>, MemoryError> {
        Ok(self.repo.get_all(user_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helmsman_persistence::InMemoryFactRepository;

    fn store() -> FactStore {
        FactStore::new(Arc::new(InMemoryFactRepository::new()), MemoryConfig::default())
    }

    #[tokio::test]
    async fn test_upsert_keeps_created_at() {
        let store = store();
        let first = store
            .upsert_fact("u1", "name", "Minh", vec![], 0.9)
            .await
            .unwrap()
            .unwrap();

        let second = store
            .upsert_fact("u1", "name", "Minh Anh", vec![], 0.95)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(first.created_at, second.created_at);
        assert_eq!(first.id, second.id);

        let facts = store.get_facts("u1").await.unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].value, "Minh Anh");
    }

    #[tokio::test]
    async fn test_idempotent_upsert_same_value() {
        let store = store();
        store.upsert_fact("u1", "goal", "thi chứng chỉ OOW", vec![], 0.8).await.unwrap();
        store.upsert_fact("u1", "goal", "thi chứng chỉ OOW", vec![], 0.8).await.unwrap();

        let facts = store.get_facts("u1").await.unwrap();
        assert_eq!(facts.len(), 1);
    }

    #[tokio::test]
    async fn test_deprecated_type_remapped() {
        let store = store();
        let fact = store
            .upsert_fact("u1", "weak_area", "đèn hiệu ban đêm", vec![], 0.7)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fact.fact_type, FactType::Weakness);
    }

    #[tokio::test]
    async fn test_unknown_type_dropped_silently() {
        let store = store();
        let result = store
            .upsert_fact("u1", "favorite_ship", "container", vec![], 0.7)
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(store.get_facts("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cap_deletes_exactly_the_oldest() {
        let config = MemoryConfig {
            max_user_facts: 2,
            ..MemoryConfig::default()
        };
        let store = FactStore::new(Arc::new(InMemoryFactRepository::new()), config);

        store.upsert_fact("u1", "name", "Minh", vec![], 0.9).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        store.upsert_fact("u1", "role", "sinh viên", vec![], 0.9).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        store.upsert_fact("u1", "goal", "thi OOW", vec![], 0.9).await.unwrap();

        let facts = store.get_facts("u1").await.unwrap();
        assert_eq!(facts.len(), 2);
        // The oldest (name) went; the two newer types remain
        assert!(!facts.iter().any(|f| f.fact_type == FactType::Name));
        assert!(facts.iter().any(|f| f.fact_type == FactType::Role));
        assert!(facts.iter().any(|f| f.fact_type == FactType::Goal));
    }

    #[tokio::test]
    async fn test_one_fact_per_type_invariant() {
        let store = store();
        for value in ["sinh viên", "thuyền phó", "thực tập sinh"] {
            store.upsert_fact("u1", "role", value, vec![], 0.8).await.unwrap();
        }
        let facts = store.get_facts("u1").await.unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].value, "thực tập sinh");
    }
}
