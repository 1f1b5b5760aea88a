//! Outbound LMS event callback
//!
//! Optional fire-and-forget notifications to the LMS when the memory
//! subsystem observes something actionable. Disabled when no callback URL
//! is configured.

use serde::Serialize;

/// Event types the LMS understands
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AiEvent {
    KnowledgeGapDetected {
        user_id: String,
        topic: String,
    },
    GoalEvolution {
        user_id: String,
        description: String,
    },
    ModuleCompletedConfidence {
        user_id: String,
        module_id: String,
        confidence: f32,
    },
    StuckDetected {
        user_id: String,
        session_id: String,
        reason: String,
    },
}

/// Posts events to `{callback_url}/api/v1/ai-events`
pub struct LmsEventPublisher {
    client: reqwest::Client,
    callback_url: Option<String>,
    secret: Option<String>,
}

impl LmsEventPublisher {
    pub fn new(callback_url: Option<String>, secret: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            callback_url,
            secret,
        }
    }

    pub fn from_settings(settings: &helmsman_config::LmsSettings) -> Self {
        Self::new(settings.callback_url.clone(), settings.callback_secret.clone())
    }

    pub fn is_enabled(&self) -> bool {
        self.callback_url.is_some()
    }

    /// Deliver one event; one retry on 5xx/transport failure
    pub async fn publish(&self, event: &AiEvent) -> Result<(), helmsman_core::Error> {
        let Some(base) = &self.callback_url else {
            return Ok(());
        };
        let url = format!("{}/api/v1/ai-events", base.trim_end_matches('/'));

        for attempt in 0..2 {
            let mut request = self.client.post(&url).json(event);
            if let Some(secret) = &self.secret {
                request = request.header("X-Callback-Secret", secret);
            }

            match request.send().await {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) if response.status().is_server_error() && attempt == 0 => {
                    tracing::warn!(status = %response.status(), "LMS callback 5xx, retrying once");
                }
                Ok(response) => {
                    return Err(helmsman_core::Error::Permanent(format!(
                        "LMS callback rejected: {}",
                        response.status()
                    )));
                }
                Err(e) if attempt == 0 => {
                    tracing::warn!(error = %e, "LMS callback failed, retrying once");
                }
                Err(e) => return Err(helmsman_core::Error::Transient(e.to_string())),
            }
        }

        Err(helmsman_core::Error::Transient("LMS callback retries exhausted".into()))
    }
}
