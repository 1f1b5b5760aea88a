//! Indexed corpus units
//!
//! Chunks are produced by the ingestion service and are read-only here.

use serde::{Deserialize, Serialize};

/// Region on a page, in page-percent coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

/// Structural kind of a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    #[default]
    Text,
    Heading,
    Table,
    DiagramReference,
    Formula,
}

impl ContentType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(ContentType::Text),
            "heading" => Some(ContentType::Heading),
            "table" => Some(ContentType::Table),
            "diagram_reference" => Some(ContentType::DiagramReference),
            "formula" => Some(ContentType::Formula),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::Heading => "heading",
            ContentType::Table => "table",
            ContentType::DiagramReference => "diagram_reference",
            ContentType::Formula => "formula",
        }
    }
}

/// One indexed unit of the regulation corpus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub page_number: u32,
    pub chunk_index: u32,
    pub content: String,
    /// Context-enriched variant; embedded instead of `content` when present
    #[serde(default)]
    pub contextual_content: Option<String>,
    #[serde(default)]
    pub content_type: ContentType,
    /// Extraction confidence in [0, 1]
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub bounding_boxes: Vec<BoundingBox>,
}

impl Chunk {
    /// Text that was embedded for this chunk: `contextual_content` when
    /// present and non-empty, else `content`.
    pub fn embedding_text(&self) -> &str {
        match &self.contextual_content {
            Some(ctx) if !ctx.trim().is_empty() => ctx,
            _ => &self.content,
        }
    }

    /// Short snippet for citations (first 300 chars of the raw content)
    pub fn snippet(&self) -> String {
        let mut s: String = self.content.chars().take(300).collect();
        if self.content.chars().count() > 300 {
            s.push('…');
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(content: &str, contextual: Option<&str>) -> Chunk {
        Chunk {
            id: "c1".into(),
            document_id: "colreg".into(),
            page_number: 12,
            chunk_index: 3,
            content: content.into(),
            contextual_content: contextual.map(String::from),
            content_type: ContentType::Text,
            confidence: 0.9,
            image_url: None,
            bounding_boxes: vec![],
        }
    }

    #[test]
    fn test_embedding_text_prefers_contextual() {
        let c = chunk("raw", Some("enriched"));
        assert_eq!(c.embedding_text(), "enriched");
    }

    #[test]
    fn test_embedding_text_falls_back_when_empty() {
        let c = chunk("raw", Some("   "));
        assert_eq!(c.embedding_text(), "raw");
        let c = chunk("raw", None);
        assert_eq!(c.embedding_text(), "raw");
    }

    #[test]
    fn test_snippet_truncates() {
        let c = chunk(&"a".repeat(400), None);
        assert!(c.snippet().chars().count() <= 301);
        assert!(c.snippet().ends_with('…'));
    }
}
