//! Configuration for the helmsman chat engine
//!
//! Settings are layered: defaults < config/default.yaml < config/{env}.yaml
//! < environment variables. The documented flat environment keys
//! (`LLM_API_KEY`, `RRF_K`, …) are also honored.

pub mod constants;
pub mod persona;
pub mod settings;

pub use persona::{Persona, PersonaError, PersonaLibrary};
pub use settings::{
    load_settings, AgentSettings, CacheSettings, CragSettings, EmbeddingSettings,
    GraderSettings, GuardianSettings, LlmSettings, LmsSettings, MemorySettings,
    ObservabilitySettings, PersistenceSettings, RateLimitSettings, RetrievalSettings,
    RuntimeEnvironment, ServerSettings, Settings, VectorSettings,
};

use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("persona error: {0}")]
    Persona(#[from] PersonaError),
}
