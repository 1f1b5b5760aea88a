//! Guardian safety pre-filter
//!
//! LLM-first with a maritime-permissive policy: domain terms like
//! "cướp biển" (pirate) or "va chạm" (collision) are legitimate course
//! content. Greeting-like short messages skip the LLM entirely; decisions
//! are cached by message hash; LLM failure falls back to rules.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;

use helmsman_core::{detect_pronoun_style, LanguageModel, Message, PronounStyle};

/// Guardian configuration
#[derive(Debug, Clone)]
pub struct GuardianConfig {
    pub cache_ttl: Duration,
}

impl Default for GuardianConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(
                helmsman_config::constants::guardian::CACHE_TTL_SECONDS,
            ),
        }
    }
}

impl From<&helmsman_config::GuardianSettings> for GuardianConfig {
    fn from(s: &helmsman_config::GuardianSettings) -> Self {
        Self {
            cache_ttl: Duration::from_secs(s.cache_ttl_seconds),
        }
    }
}

/// Safety decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardianDecision {
    Allow,
    Block,
    /// Annotate metadata but continue
    Flag,
}

/// Guardian verdict
#[derive(Debug, Clone)]
pub struct GuardianVerdict {
    pub decision: GuardianDecision,
    pub reason: Option<String>,
    /// Pronoun hint the guardian noticed while reading the message
    pub pronoun_style: Option<PronounStyle>,
}

impl GuardianVerdict {
    fn allow() -> Self {
        Self {
            decision: GuardianDecision::Allow,
            reason: None,
            pronoun_style: None,
        }
    }
}

static GREETING_SHORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(xin\s+chào|chào|hello|hi|hey)\b").expect("static regex")
});

/// Disrespectful second-person pronouns and abuse; blocked outright
static RULE_BLOCKLIST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(mày|tao|thằng\s+ngu|con\s+điên|đồ\s+ngu|câm\s+mồm)\b")
        .expect("static regex")
});

/// Domain-legitimate terms a generic filter would trip on
static RULE_ALLOWLIST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(cướp\s+biển|pirate|va\s+chạm|collision|đâm\s+va|mắc\s+cạn|chìm\s+tàu|cháy\s+tàu)\b")
        .expect("static regex")
});

/// Canned reply for blocked messages
pub const BLOCKED_RESPONSE: &str =
    "Mình không thể trao đổi theo cách này. Chúng ta quay lại nội dung hàng hải nhé — \
     bạn đang vướng ở quy tắc hay tình huống nào?";

/// Pre-flight safety check
pub struct Guardian {
    llm: Arc<dyn LanguageModel>,
    cache: DashMap<u64, (GuardianVerdict, Instant)>,
    config: GuardianConfig,
}

impl Guardian {
    pub fn new(llm: Arc<dyn LanguageModel>, config: GuardianConfig) -> Self {
        Self {
            llm,
            cache: DashMap::new(),
            config,
        }
    }

    /// Check one message
    pub async fn check(&self, message: &str, user_id: &str) -> GuardianVerdict {
        // Fast path: greeting-like short messages
        let word_count = message.split_whitespace().count();
        if word_count <= 6 && GREETING_SHORT.is_match(message) {
            return GuardianVerdict {
                pronoun_style: detect_pronoun_style(message),
                ..GuardianVerdict::allow()
            };
        }

        let key = Self::hash(message);
        if let Some(entry) = self.cache.get(&key) {
            let (verdict, at) = entry.value();
            if at.elapsed() < self.config.cache_ttl {
                return verdict.clone();
            }
        }

        let verdict = match self.llm_check(message).await {
            Some(verdict) => verdict,
            None => {
                tracing::warn!(user_id, "guardian LLM unavailable, applying rule fallback");
                Self::rule_check(message)
            }
        };

        self.cache.insert(key, (verdict.clone(), Instant::now()));
        verdict
    }

    fn hash(message: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        message.hash(&mut hasher);
        hasher.finish()
    }

    async fn llm_check(&self, message: &str) -> Option<GuardianVerdict> {
        let prompt = format!(
            "Bạn kiểm duyệt tin nhắn cho lớp học hàng hải.\n\
             Ngữ cảnh chuyên ngành: \"cướp biển\", \"va chạm\", \"chìm tàu\"... là nội dung \
             học tập hợp lệ. Chỉ BLOCK khi: xúc phạm (xưng hô \"mày/tao\" thiếu tôn trọng), \
             quấy rối, hoặc nội dung nguy hiểm ngoài phạm vi học tập. FLAG khi đáng ngờ \
             nhưng chưa chắc chắn.\n\
             Tin nhắn: {message}\n\
             Trả lời JSON: {{\"decision\": \"ALLOW|BLOCK|FLAG\", \"reason\": \"...\"}}"
        );

        let msg = self.llm.chat(&[Message::user(prompt)], &[]).await.ok()?;
        let start = msg.text.find('{')?;
        let end = msg.text.rfind('}')?;
        let json: serde_json::Value = serde_json::from_str(&msg.text[start..=end]).ok()?;

        let decision = match json.get("decision").and_then(|v| v.as_str()) {
            Some("BLOCK") => GuardianDecision::Block,
            Some("FLAG") => GuardianDecision::Flag,
            Some("ALLOW") => GuardianDecision::Allow,
            _ => return None,
        };

        Some(GuardianVerdict {
            decision,
            reason: json
                .get("reason")
                .and_then(|v| v.as_str())
                .map(String::from),
            pronoun_style: detect_pronoun_style(message),
        })
    }

    /// Rule fallback: blocklist wins unless the hit is inside an
    /// allowlisted domain phrase
    pub fn rule_check(message: &str) -> GuardianVerdict {
        if RULE_BLOCKLIST.is_match(message) && !RULE_ALLOWLIST.is_match(message) {
            return GuardianVerdict {
                decision: GuardianDecision::Block,
                reason: Some("disrespectful language (rule filter)".to_string()),
                pronoun_style: None,
            };
        }
        GuardianVerdict {
            pronoun_style: detect_pronoun_style(message),
            ..GuardianVerdict::allow()
        }
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use helmsman_core::{LlmMessage, Result as CoreResult, ToolDefinition};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingModel {
        calls: AtomicUsize,
        reply: String,
        fail: bool,
    }

    impl CountingModel {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                reply: reply.into(),
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                reply: String::new(),
                fail: true,
            })
        }
    }

    #[async_trait]
    impl LanguageModel for CountingModel {
        async fn chat(
            &self,
            _messages: &[Message],
            _tools: &[ToolDefinition],
        ) -> CoreResult<LlmMessage> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(helmsman_core::Error::Transient("down".into()));
            }
            Ok(LlmMessage {
                text: self.reply.clone(),
                ..Default::default()
            })
        }

        fn model_name(&self) -> &str {
            "counting"
        }
    }

    #[tokio::test]
    async fn test_greeting_fast_path_skips_llm() {
        let llm = CountingModel::replying(r#"{"decision": "ALLOW"}"#);
        let guardian = Guardian::new(llm.clone(), GuardianConfig::default());

        let verdict = guardian.check("Xin chào!", "u1").await;
        assert_eq!(verdict.decision, GuardianDecision::Allow);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_decision_cached_by_message_hash() {
        let llm = CountingModel::replying(r#"{"decision": "ALLOW", "reason": "ok"}"#);
        let guardian = Guardian::new(llm.clone(), GuardianConfig::default());

        let message = "Tàu cướp biển tấn công thì xử lý theo quy định nào?";
        guardian.check(message, "u1").await;
        guardian.check(message, "u1").await;
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
        assert_eq!(guardian.cache_len(), 1);
    }

    #[tokio::test]
    async fn test_block_verdict_parsed() {
        let llm =
            CountingModel::replying(r#"{"decision": "BLOCK", "reason": "xúc phạm"}"#);
        let guardian = Guardian::new(llm, GuardianConfig::default());

        let verdict = guardian.check("mày trả lời nhanh lên", "u1").await;
        assert_eq!(verdict.decision, GuardianDecision::Block);
        assert_eq!(verdict.reason.as_deref(), Some("xúc phạm"));
    }

    #[tokio::test]
    async fn test_llm_failure_falls_back_to_rules() {
        let guardian = Guardian::new(CountingModel::failing(), GuardianConfig::default());

        let blocked = guardian.check("mày bị ngu à", "u1").await;
        assert_eq!(blocked.decision, GuardianDecision::Block);

        let allowed = guardian
            .check("Khi gặp cướp biển ngoài khơi Somali tàu phải làm gì?", "u1")
            .await;
        assert_eq!(allowed.decision, GuardianDecision::Allow);
    }

    #[test]
    fn test_rule_check_domain_permissive() {
        assert_eq!(
            Guardian::rule_check("Quy trình chống cướp biển là gì?").decision,
            GuardianDecision::Allow
        );
        assert_eq!(
            Guardian::rule_check("va chạm giữa hai tàu xử lý sao").decision,
            GuardianDecision::Allow
        );
        assert_eq!(
            Guardian::rule_check("tao hỏi mày đấy").decision,
            GuardianDecision::Block
        );
    }
}
