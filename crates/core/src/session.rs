//! Per-session ephemeral state
//!
//! Carries the detected Vietnamese pronoun style and a bounded ring of
//! recent answer openers so prompts can steer the model away from
//! repeating itself. Keyed strictly by server-generated session id.

use std::collections::VecDeque;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// How many recent openers to remember per session
pub const RECENT_OPENER_CAP: usize = 5;

/// Vietnamese address style between the assistant and the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PronounStyle {
    /// Neutral tôi/bạn
    #[default]
    Default,
    /// Friendly peer style: mình/cậu
    MinhCau,
    /// User is senior: em (assistant) / anh (user)
    EmAnh,
    /// Formal plural: anh-chị/em
    AnhChiEm,
}

impl PronounStyle {
    /// Instruction fragment injected into the system prompt
    pub fn rule(&self) -> &'static str {
        match self {
            PronounStyle::Default => "Xưng hô trung lập: \"tôi\" và \"bạn\".",
            PronounStyle::MinhCau => "Xưng \"mình\", gọi người học là \"cậu\".",
            PronounStyle::EmAnh => "Xưng \"em\", gọi người học là \"anh\".",
            PronounStyle::AnhChiEm => "Xưng \"em\", gọi người học là \"anh/chị\".",
        }
    }
}

static MINH_CAU: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(mình|cậu|tớ)\b").expect("static regex"));
static EM_ANH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bgọi\s+(tôi|mình)\s+là\s+anh\b|\bxưng\s+anh\b").expect("static regex"));
static ANH_CHI: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\banh[\s/-]chị\b").expect("static regex"));

/// Detect a pronoun style from a user message. Returns `None` unless the
/// message clearly signals a style, so noise never flips an established one.
pub fn detect_pronoun_style(message: &str) -> Option<PronounStyle> {
    if ANH_CHI.is_match(message) {
        return Some(PronounStyle::AnhChiEm);
    }
    if EM_ANH.is_match(message) {
        return Some(PronounStyle::EmAnh);
    }
    if MINH_CAU.is_match(message) {
        return Some(PronounStyle::MinhCau);
    }
    None
}

/// Ephemeral, process-local state for one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub user_id: String,
    pub pronoun_style: PronounStyle,
    /// Ring of recent answer openers, newest last
    pub recent_openers: VecDeque<String>,
    pub last_agent: Option<String>,
    pub last_topics: Vec<String>,
}

impl SessionState {
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            pronoun_style: PronounStyle::default(),
            recent_openers: VecDeque::with_capacity(RECENT_OPENER_CAP),
            last_agent: None,
            last_topics: Vec::new(),
        }
    }

    /// Record the opener of an assistant answer (first ~6 words)
    pub fn record_opener(&mut self, answer: &str) {
        let opener: String = answer
            .split_whitespace()
            .take(6)
            .collect::<Vec<_>>()
            .join(" ");
        if opener.is_empty() {
            return;
        }
        if self.recent_openers.len() >= RECENT_OPENER_CAP {
            self.recent_openers.pop_front();
        }
        self.recent_openers.push_back(opener);
    }

    /// Update style only when the user message clearly uses a new one
    pub fn observe_user_message(&mut self, message: &str) {
        if let Some(style) = detect_pronoun_style(message) {
            self.pronoun_style = style;
        }
    }

    pub fn record_turn(&mut self, agent: &str, topics: Vec<String>) {
        self.last_agent = Some(agent.to_string());
        self.last_topics = topics;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opener_ring_bounded() {
        let mut s = SessionState::new("s1", "u1");
        for i in 0..10 {
            s.record_opener(&format!("À, câu hỏi hay đấy số {i} nhé bạn"));
        }
        assert_eq!(s.recent_openers.len(), RECENT_OPENER_CAP);
        // Oldest entries were evicted
        assert!(s.recent_openers.iter().all(|o| !o.contains("số 0")));
    }

    #[test]
    fn test_pronoun_detection_minh_cau() {
        assert_eq!(
            detect_pronoun_style("Cậu giải thích giúp mình điều 15 nhé"),
            Some(PronounStyle::MinhCau)
        );
    }

    #[test]
    fn test_pronoun_detection_none_on_neutral() {
        assert_eq!(detect_pronoun_style("Quy tắc 15 là gì?"), None);
    }

    #[test]
    fn test_style_not_flipped_by_neutral_message() {
        let mut s = SessionState::new("s1", "u1");
        s.observe_user_message("mình muốn hỏi cậu một chút");
        assert_eq!(s.pronoun_style, PronounStyle::MinhCau);
        s.observe_user_message("Quy tắc 15 là gì?");
        assert_eq!(s.pronoun_style, PronounStyle::MinhCau);
    }
}
