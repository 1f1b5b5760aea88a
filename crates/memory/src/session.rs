//! Process-local session registry
//!
//! Holds ephemeral per-session state (pronoun style, recent openers, last
//! agent and topics). Keyed strictly by server-generated session id, so
//! state can never leak across users.

use dashmap::DashMap;
use uuid::Uuid;

use helmsman_core::SessionState;

#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, SessionState>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load an existing session or create a fresh one. A missing or
    /// foreign-user session id yields a new server-generated id.
    pub fn load_or_create(&self, session_id: Option<&str>, user_id: &str) -> SessionState {
        if let Some(id) = session_id {
            if let Some(state) = self.sessions.get(id) {
                if state.user_id == user_id {
                    return state.clone();
                }
                tracing::warn!(
                    session_id = id,
                    "session does not belong to requesting user, issuing a new one"
                );
            }
        }

        let state = SessionState::new(Uuid::new_v4().to_string(), user_id);
        self.sessions
            .insert(state.session_id.clone(), state.clone());
        state
    }

    pub fn get(&self, session_id: &str) -> Option<SessionState> {
        self.sessions.get(session_id).map(|s| s.clone())
    }

    /// Observe the user message before prompt assembly (pronoun detection)
    pub fn observe_user_message(&self, session_id: &str, message: &str) {
        if let Some(mut state) = self.sessions.get_mut(session_id) {
            state.observe_user_message(message);
        }
    }

    /// Record the assistant turn after stage 5
    pub fn record_assistant_turn(
        &self,
        session_id: &str,
        answer: &str,
        agent: &str,
        topics: Vec<String>,
    ) {
        if let Some(mut state) = self.sessions.get_mut(session_id) {
            state.record_opener(answer);
            state.record_turn(agent, topics);
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helmsman_core::PronounStyle;

    #[test]
    fn test_load_or_create_round_trip() {
        let registry = SessionRegistry::new();
        let created = registry.load_or_create(None, "u1");
        let loaded = registry.load_or_create(Some(&created.session_id), "u1");
        assert_eq!(created.session_id, loaded.session_id);
    }

    #[test]
    fn test_foreign_user_session_not_shared() {
        let registry = SessionRegistry::new();
        let created = registry.load_or_create(None, "u1");

        // Another user presenting the same session id gets a fresh session
        let other = registry.load_or_create(Some(&created.session_id), "u2");
        assert_ne!(created.session_id, other.session_id);
        assert_eq!(other.user_id, "u2");
    }

    #[test]
    fn test_pronoun_style_sticks_across_turns() {
        let registry = SessionRegistry::new();
        let state = registry.load_or_create(None, "u1");

        registry.observe_user_message(&state.session_id, "cậu giúp mình nhé");
        registry.observe_user_message(&state.session_id, "Quy tắc 15?");

        let state = registry.get(&state.session_id).unwrap();
        assert_eq!(state.pronoun_style, PronounStyle::MinhCau);
    }

    #[test]
    fn test_assistant_turn_updates_openers_and_agent() {
        let registry = SessionRegistry::new();
        let state = registry.load_or_create(None, "u1");

        registry.record_assistant_turn(
            &state.session_id,
            "À, câu này liên quan Quy tắc 15 đấy",
            "react",
            vec!["COLREG".into()],
        );

        let state = registry.get(&state.session_id).unwrap();
        assert_eq!(state.recent_openers.len(), 1);
        assert_eq!(state.last_agent.as_deref(), Some("react"));
        assert_eq!(state.last_topics, vec!["COLREG".to_string()]);
    }
}
