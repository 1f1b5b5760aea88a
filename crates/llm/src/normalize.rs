//! Content normalization at the client boundary
//!
//! Providers return `message.content` either as a plain string or as a
//! list of typed blocks (`{"type": "text" | "thinking", ...}`). Callers
//! only ever see the normalized `(thinking, text)` pair.

use serde_json::Value;

/// Collapse a raw `content` value into `(thinking, text)`
pub fn normalize_content(content: &Value) -> (Option<String>, String) {
    match content {
        Value::String(s) => extract_thinking(s),
        Value::Array(blocks) => {
            let mut thinking = String::new();
            let mut text = String::new();
            for block in blocks {
                let kind = block.get("type").and_then(Value::as_str).unwrap_or("text");
                let body = block
                    .get("text")
                    .or_else(|| block.get("content"))
                    .and_then(Value::as_str)
                    .unwrap_or("");
                match kind {
                    "thinking" | "reasoning" => {
                        if !thinking.is_empty() {
                            thinking.push('\n');
                        }
                        thinking.push_str(body);
                    }
                    _ => {
                        if !text.is_empty() {
                            text.push('\n');
                        }
                        text.push_str(body);
                    }
                }
            }
            let (inline_thinking, text) = extract_thinking(&text);
            let combined = match (thinking.is_empty(), inline_thinking) {
                (true, inline) => inline,
                (false, None) => Some(thinking),
                (false, Some(inline)) => Some(format!("{}\n{}", thinking, inline)),
            };
            (combined, text)
        }
        Value::Null => (None, String::new()),
        other => (None, other.to_string()),
    }
}

/// Split a leading `<think>…</think>` or `<thinking>…</thinking>` block
/// off a text response.
pub fn extract_thinking(text: &str) -> (Option<String>, String) {
    let trimmed = text.trim_start();
    for (open, close) in [("<think>", "</think>"), ("<thinking>", "</thinking>")] {
        if let Some(rest) = trimmed.strip_prefix(open) {
            if let Some(end) = rest.find(close) {
                let thinking = rest[..end].trim().to_string();
                let answer = rest[end + close.len()..].trim_start().to_string();
                let thinking = (!thinking.is_empty()).then_some(thinking);
                return (thinking, answer);
            }
        }
    }
    (None, text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_string_content() {
        let (thinking, text) = normalize_content(&json!("xin chào"));
        assert_eq!(thinking, None);
        assert_eq!(text, "xin chào");
    }

    #[test]
    fn test_think_prefix_extracted() {
        let (thinking, text) =
            normalize_content(&json!("<think>điều 15 áp dụng</think>Tàu phải nhường đường."));
        assert_eq!(thinking.as_deref(), Some("điều 15 áp dụng"));
        assert_eq!(text, "Tàu phải nhường đường.");
    }

    #[test]
    fn test_block_list_content() {
        let (thinking, text) = normalize_content(&json!([
            {"type": "thinking", "text": "so sánh điều 15 và 16"},
            {"type": "text", "text": "Điều 15 áp dụng khi hai tàu cắt hướng."}
        ]));
        assert_eq!(thinking.as_deref(), Some("so sánh điều 15 và 16"));
        assert_eq!(text, "Điều 15 áp dụng khi hai tàu cắt hướng.");
    }

    #[test]
    fn test_multiple_text_blocks_joined() {
        let (_, text) = normalize_content(&json!([
            {"type": "text", "text": "a"},
            {"type": "text", "text": "b"}
        ]));
        assert_eq!(text, "a\nb");
    }

    #[test]
    fn test_null_content() {
        let (thinking, text) = normalize_content(&Value::Null);
        assert_eq!(thinking, None);
        assert!(text.is_empty());
    }

    #[test]
    fn test_unclosed_think_left_intact() {
        let (thinking, text) = extract_thinking("<think>never closed");
        assert_eq!(thinking, None);
        assert_eq!(text, "<think>never closed");
    }
}
