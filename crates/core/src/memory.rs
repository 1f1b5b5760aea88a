//! Durable per-user memory types
//!
//! Facts are atomic typed attributes (at most one per type per user).
//! Insights are behavioral observations, capped and consolidated.
//! Summaries replace ranges of session messages for context-building.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Closed set of fact types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactType {
    Name,
    Role,
    Level,
    Goal,
    Preference,
    Weakness,
}

impl FactType {
    /// Parse a fact type, remapping deprecated names. Unknown types yield
    /// `None` and are rejected silently by the store.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "name" => Some(FactType::Name),
            "role" | "background" => Some(FactType::Role),
            "level" => Some(FactType::Level),
            "goal" => Some(FactType::Goal),
            "preference" | "interest" | "learning_style" => Some(FactType::Preference),
            "weakness" | "weak_area" => Some(FactType::Weakness),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FactType::Name => "name",
            FactType::Role => "role",
            FactType::Level => "level",
            FactType::Goal => "goal",
            FactType::Preference => "preference",
            FactType::Weakness => "weakness",
        }
    }
}

/// Atomic user attribute; at most one per (user_id, fact_type)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    pub id: Uuid,
    pub user_id: String,
    pub fact_type: FactType,
    pub value: String,
    #[serde(default)]
    pub embedding: Vec<f32>,
    pub confidence: f32,
    pub created_at: DateTime<Utc>,
}

/// Closed set of insight categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightCategory {
    LearningStyle,
    KnowledgeGap,
    GoalEvolution,
    Habit,
    Preference,
}

impl InsightCategory {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "learning_style" => Some(InsightCategory::LearningStyle),
            "knowledge_gap" => Some(InsightCategory::KnowledgeGap),
            "goal_evolution" => Some(InsightCategory::GoalEvolution),
            "habit" => Some(InsightCategory::Habit),
            "preference" => Some(InsightCategory::Preference),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InsightCategory::LearningStyle => "learning_style",
            InsightCategory::KnowledgeGap => "knowledge_gap",
            InsightCategory::GoalEvolution => "goal_evolution",
            InsightCategory::Habit => "habit",
            InsightCategory::Preference => "preference",
        }
    }

    /// Categories ranked above others when building context
    pub fn is_priority(&self) -> bool {
        matches!(
            self,
            InsightCategory::KnowledgeGap | InsightCategory::LearningStyle
        )
    }
}

/// Append-only record of how an insight evolved
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionNote {
    pub at: DateTime<Utc>,
    pub note: String,
}

/// Behavioral observation about a user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insight {
    pub id: Uuid,
    pub user_id: String,
    pub category: InsightCategory,
    /// Declarative statement, at least 20 characters
    pub content: String,
    #[serde(default)]
    pub sub_topic: Option<String>,
    #[serde(default)]
    pub embedding: Vec<f32>,
    pub confidence: f32,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    #[serde(default)]
    pub evolution_notes: Vec<EvolutionNote>,
}

/// Condensed replacement for a contiguous range of session messages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub id: Uuid,
    pub user_id: String,
    pub session_id: String,
    pub content: String,
    #[serde(default)]
    pub embedding: Vec<f32>,
    /// Timestamp of the last message this summary covers
    pub covers_until: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fact_type_remaps_deprecated_names() {
        assert_eq!(FactType::parse("background"), Some(FactType::Role));
        assert_eq!(FactType::parse("weak_area"), Some(FactType::Weakness));
        assert_eq!(FactType::parse("interest"), Some(FactType::Preference));
        assert_eq!(FactType::parse("learning_style"), Some(FactType::Preference));
    }

    #[test]
    fn test_fact_type_rejects_unknown() {
        assert_eq!(FactType::parse("favorite_ship"), None);
        assert_eq!(FactType::parse(""), None);
    }

    #[test]
    fn test_insight_priority_categories() {
        assert!(InsightCategory::KnowledgeGap.is_priority());
        assert!(InsightCategory::LearningStyle.is_priority());
        assert!(!InsightCategory::Habit.is_priority());
    }
}
