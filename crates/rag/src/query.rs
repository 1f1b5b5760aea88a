//! Query analysis and rewriting
//!
//! The analyzer classifies a query cheaply (regex fast paths, LLM for the
//! rest). The rewriter only runs when CRAG decides retrieval was poor and
//! produces up to three alternative phrasings.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use helmsman_core::{LanguageModel, Message, QueryType};

/// Query complexity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

/// Analyzer output
#[derive(Debug, Clone)]
pub struct QueryAnalysis {
    pub query_type: QueryType,
    pub complexity: Complexity,
}

static GREETING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(xin\s+chào|chào\s+(bạn|thầy|cô|em|anh|chị)|hello|hi|hey|chào)\b[\s!.,?]*")
        .expect("static regex")
});

static PERSONAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(tôi\s+là|tên\s+(tôi|mình|em)|của\s+(tôi|mình|em)\s+là|mình\s+là|nhớ\s+(tôi|mình|em))\b")
        .expect("static regex")
});

/// Classifies queries
pub struct QueryAnalyzer {
    llm: Arc<dyn LanguageModel>,
}

impl QueryAnalyzer {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }

    /// Regex fast paths first; the LLM only sees ambiguous queries.
    /// LLM failure degrades to a factual/simple default.
    pub async fn classify(&self, query: &str) -> QueryAnalysis {
        if let Some(analysis) = Self::fast_path(query) {
            return analysis;
        }

        let prompt = format!(
            "Phân loại câu hỏi của học viên hàng hải.\n\
             Câu hỏi: {query}\n\
             Trả lời JSON: {{\"type\": \"factual|conceptual|procedural|greeting|personal\", \
             \"complexity\": \"simple|moderate|complex\"}}"
        );

        match self.llm.chat(&[Message::user(prompt)], &[]).await {
            Ok(msg) => Self::parse_classification(&msg.text),
            Err(e) => {
                tracing::warn!(error = %e, "query classification failed, defaulting to factual");
                QueryAnalysis {
                    query_type: QueryType::Factual,
                    complexity: Complexity::Simple,
                }
            }
        }
    }

    /// Unambiguous shapes skip the LLM entirely
    pub fn fast_path(query: &str) -> Option<QueryAnalysis> {
        let trimmed = query.trim();
        let word_count = trimmed.split_whitespace().count();

        if GREETING.is_match(trimmed) && word_count <= 6 {
            return Some(QueryAnalysis {
                query_type: QueryType::Greeting,
                complexity: Complexity::Simple,
            });
        }
        if PERSONAL.is_match(trimmed) {
            return Some(QueryAnalysis {
                query_type: QueryType::Personal,
                complexity: Complexity::Simple,
            });
        }
        None
    }

    fn parse_classification(text: &str) -> QueryAnalysis {
        let fallback = QueryAnalysis {
            query_type: QueryType::Factual,
            complexity: Complexity::Simple,
        };

        let Some(start) = text.find('{') else {
            return fallback;
        };
        let Some(end) = text.rfind('}') else {
            return fallback;
        };
        let Ok(json) = serde_json::from_str::<serde_json::Value>(&text[start..=end]) else {
            return fallback;
        };

        let query_type = match json.get("type").and_then(|v| v.as_str()) {
            Some("conceptual") => QueryType::Conceptual,
            Some("procedural") => QueryType::Procedural,
            Some("greeting") => QueryType::Greeting,
            Some("personal") => QueryType::Personal,
            _ => QueryType::Factual,
        };
        let complexity = match json.get("complexity").and_then(|v| v.as_str()) {
            Some("complex") => Complexity::Complex,
            Some("moderate") => Complexity::Moderate,
            _ => Complexity::Simple,
        };

        QueryAnalysis {
            query_type,
            complexity,
        }
    }
}

/// Produces alternative phrasings when retrieval scores poorly
pub struct QueryRewriter {
    llm: Arc<dyn LanguageModel>,
}

impl QueryRewriter {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self { llm }
    }

    /// Up to three rewrites: each non-empty and distinct from the original.
    /// Uses synonym expansion, domain-term substitution and sub-question
    /// decomposition. Failure yields an empty list (caller keeps the
    /// original query).
    pub async fn rewrite(&self, query: &str, reason: &str) -> Vec<String> {
        let prompt = format!(
            "Truy vấn sau tìm được ít tài liệu phù hợp ({reason}).\n\
             Viết lại tối đa 3 cách diễn đạt khác: dùng từ đồng nghĩa, thay bằng \
             thuật ngữ hàng hải chuẩn (COLREG, SOLAS...), hoặc tách thành câu hỏi con.\n\
             Truy vấn: {query}\n\
             Trả lời JSON: [\"...\", \"...\"]"
        );

        let text = match self.llm.chat(&[Message::user(prompt)], &[]).await {
            Ok(msg) => msg.text,
            Err(e) => {
                tracing::warn!(error = %e, "query rewrite failed");
                return Vec::new();
            }
        };

        Self::parse_rewrites(query, &text)
    }

    fn parse_rewrites(original: &str, text: &str) -> Vec<String> {
        let Some(start) = text.find('[') else {
            return Vec::new();
        };
        let Some(end) = text.rfind(']') else {
            return Vec::new();
        };
        let Ok(candidates) = serde_json::from_str::<Vec<String>>(&text[start..=end]) else {
            return Vec::new();
        };

        let original_lower = original.trim().to_lowercase();
        let mut rewrites: Vec<String> = Vec::new();
        for candidate in candidates {
            let trimmed = candidate.trim();
            if trimmed.is_empty() || trimmed.to_lowercase() == original_lower {
                continue;
            }
            if rewrites.iter().any(|r| r.eq_ignore_ascii_case(trimmed)) {
                continue;
            }
            rewrites.push(trimmed.to_string());
            if rewrites.len() == 3 {
                break;
            }
        }
        rewrites
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greeting_fast_path() {
        let analysis = QueryAnalyzer::fast_path("Xin chào!").unwrap();
        assert_eq!(analysis.query_type, QueryType::Greeting);

        // Long questions that merely start politely are not greetings
        assert!(QueryAnalyzer::fast_path(
            "Chào bạn, cho mình hỏi chi tiết về quy tắc tránh va khi hành trình trong luồng hẹp"
        )
        .is_none());
    }

    #[test]
    fn test_personal_fast_path() {
        let analysis = QueryAnalyzer::fast_path("Tôi là Minh, sinh viên năm hai").unwrap();
        assert_eq!(analysis.query_type, QueryType::Personal);
    }

    #[test]
    fn test_parse_classification() {
        let analysis = QueryAnalyzer::parse_classification(
            r#"{"type": "procedural", "complexity": "complex"}"#,
        );
        assert_eq!(analysis.query_type, QueryType::Procedural);
        assert_eq!(analysis.complexity, Complexity::Complex);

        let fallback = QueryAnalyzer::parse_classification("not json");
        assert_eq!(fallback.query_type, QueryType::Factual);
    }

    #[test]
    fn test_parse_rewrites_filters_empty_and_duplicates() {
        let rewrites = QueryRewriter::parse_rewrites(
            "điều 15 là gì",
            r#"["Quy tắc 15 COLREG quy định gì?", "", "điều 15 là gì", "Quy tắc 15 COLREG quy định gì?", "Tình huống cắt hướng xử lý ra sao?"]"#,
        );
        assert_eq!(rewrites.len(), 2);
        assert!(rewrites.iter().all(|r| !r.is_empty()));
        assert!(!rewrites.iter().any(|r| r == "điều 15 là gì"));
    }

    #[test]
    fn test_parse_rewrites_caps_at_three() {
        let rewrites =
            QueryRewriter::parse_rewrites("q", r#"["a", "b", "c", "d", "e"]"#);
        assert_eq!(rewrites.len(), 3);
    }
}
