//! Knowledge-graph entities referenced by corpus chunks
//!
//! The graph is written by ingestion; the engine only queries it, with
//! traversal bounded at distance 2.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Article,
    Regulation,
    VesselType,
    Maneuver,
    Equipment,
}

impl EntityType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ARTICLE" => Some(EntityType::Article),
            "REGULATION" => Some(EntityType::Regulation),
            "VESSEL_TYPE" => Some(EntityType::VesselType),
            "MANEUVER" => Some(EntityType::Maneuver),
            "EQUIPMENT" => Some(EntityType::Equipment),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Article => "ARTICLE",
            EntityType::Regulation => "REGULATION",
            EntityType::VesselType => "VESSEL_TYPE",
            EntityType::Maneuver => "MANEUVER",
            EntityType::Equipment => "EQUIPMENT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeType {
    References,
    AppliesTo,
    Requires,
    Defines,
    PartOf,
}

impl EdgeType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "REFERENCES" => Some(EdgeType::References),
            "APPLIES_TO" => Some(EdgeType::AppliesTo),
            "REQUIRES" => Some(EdgeType::Requires),
            "DEFINES" => Some(EdgeType::Defines),
            "PART_OF" => Some(EdgeType::PartOf),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::References => "REFERENCES",
            EdgeType::AppliesTo => "APPLIES_TO",
            EdgeType::Requires => "REQUIRES",
            EdgeType::Defines => "DEFINES",
            EdgeType::PartOf => "PART_OF",
        }
    }
}

/// Graph node
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entity {
    pub id: String,
    pub entity_type: EntityType,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl Entity {
    /// Case-insensitive match against name or any alias
    pub fn matches(&self, term: &str) -> bool {
        let term = term.to_lowercase();
        self.name.to_lowercase() == term
            || self.aliases.iter().any(|a| a.to_lowercase() == term)
    }
}

/// Entity found during a bounded traversal from a seed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedEntity {
    pub entity: Entity,
    pub relation: EdgeType,
    /// Hop count from the seed, 1 or 2
    pub distance: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_alias_match() {
        let e = Entity {
            id: "e1".into(),
            entity_type: EntityType::Regulation,
            name: "COLREG Rule 15".into(),
            aliases: vec!["Điều 15".into(), "Crossing situation".into()],
        };
        assert!(e.matches("điều 15"));
        assert!(e.matches("colreg rule 15"));
        assert!(!e.matches("rule 16"));
    }

    #[test]
    fn test_wire_names_round_trip() {
        assert_eq!(EntityType::parse("VESSEL_TYPE"), Some(EntityType::VesselType));
        assert_eq!(EdgeType::AppliesTo.as_str(), "APPLIES_TO");
        assert_eq!(EdgeType::parse(EdgeType::PartOf.as_str()), Some(EdgeType::PartOf));
    }
}
