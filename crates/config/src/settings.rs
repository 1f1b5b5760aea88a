//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::constants::{agent, cache, embedding, endpoints, grader, guardian, limits, memory, retrieval};
use crate::ConfigError;

/// Runtime environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    /// Development mode - relaxed validation, warnings only
    #[default]
    Development,
    /// Staging mode - stricter validation
    Staging,
    /// Production mode - all validations enforced
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    pub fn is_strict(&self) -> bool {
        matches!(self, Self::Production | Self::Staging)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub llm: LlmSettings,

    #[serde(default)]
    pub embedding: EmbeddingSettings,

    #[serde(default)]
    pub retrieval: RetrievalSettings,

    #[serde(default)]
    pub grader: GraderSettings,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub crag: CragSettings,

    #[serde(default)]
    pub agent: AgentSettings,

    #[serde(default)]
    pub memory: MemorySettings,

    #[serde(default)]
    pub guardian: GuardianSettings,

    #[serde(default)]
    pub limits: RateLimitSettings,

    #[serde(default)]
    pub persistence: PersistenceSettings,

    #[serde(default)]
    pub vector: VectorSettings,

    #[serde(default)]
    pub lms: LmsSettings,

    #[serde(default)]
    pub observability: ObservabilitySettings,

    /// Directory of persona YAML files
    #[serde(default = "default_persona_dir")]
    pub persona_dir: String,
}

fn default_persona_dir() -> String {
    "config/personas".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub cors_enabled: bool,
    pub cors_origins: Vec<String>,
    /// Accepted API keys; empty disables auth (development only)
    pub api_keys: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8088,
            cors_enabled: true,
            cors_origins: Vec::new(),
            api_keys: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    pub provider: String,
    pub model: String,
    pub api_key: Option<String>,
    pub endpoint: String,
    pub max_tokens: usize,
    pub temperature: f32,
    pub timeout_secs: u64,
    /// Caller-side concurrency cap (semaphore around the client)
    pub max_concurrency: usize,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            endpoint: "https://api.openai.com/v1".to_string(),
            max_tokens: 1024,
            temperature: 0.4,
            timeout_secs: 60,
            max_concurrency: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    pub model: String,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub dimensions: usize,
    pub max_concurrency: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            model: "text-embedding-004".to_string(),
            endpoint: "https://api.openai.com/v1".to_string(),
            api_key: None,
            dimensions: embedding::DIMENSIONS,
            max_concurrency: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalSettings {
    pub top_k: usize,
    pub dense_top_k: usize,
    pub sparse_top_k: usize,
    pub rrf_k: f32,
    pub title_boost: f32,
    pub sparse_priority_boost: f32,
    pub sparse_priority_min_score: f32,
    pub similarity_threshold: f32,
    pub contextual_rag_enabled: bool,
    /// On-disk tantivy index; in-RAM when unset
    pub sparse_index_path: Option<String>,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            top_k: retrieval::DEFAULT_TOP_K,
            dense_top_k: retrieval::DENSE_TOP_K,
            sparse_top_k: retrieval::SPARSE_TOP_K,
            rrf_k: retrieval::RRF_K,
            title_boost: retrieval::TITLE_BOOST,
            sparse_priority_boost: retrieval::SPARSE_PRIORITY_BOOST,
            sparse_priority_min_score: retrieval::SPARSE_PRIORITY_MIN_SCORE,
            similarity_threshold: retrieval::SIMILARITY_THRESHOLD,
            contextual_rag_enabled: true,
            sparse_index_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraderSettings {
    pub pass_threshold: f32,
    pub prefilter_pass: f32,
    pub prefilter_fail: f32,
    pub parallel_judges: usize,
    pub full_grader_batch: usize,
    pub early_exit_min_relevant: usize,
}

impl Default for GraderSettings {
    fn default() -> Self {
        Self {
            pass_threshold: grader::PASS_THRESHOLD,
            prefilter_pass: grader::PREFILTER_PASS,
            prefilter_fail: grader::PREFILTER_FAIL,
            parallel_judges: grader::PARALLEL_JUDGES,
            full_grader_batch: grader::FULL_GRADER_BATCH,
            early_exit_min_relevant: grader::EARLY_EXIT_MIN_RELEVANT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    pub ttl_seconds: u64,
    pub similarity: f32,
    pub capacity: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_seconds: cache::TTL_SECONDS,
            similarity: cache::SIMILARITY,
            capacity: cache::CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CragSettings {
    pub enabled: bool,
    pub max_attempts: usize,
}

impl Default for CragSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: agent::CRAG_MAX_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// true: unified ReAct agent; false: supervisor multi-agent graph
    pub use_unified_agent: bool,
    pub react_max_iterations: usize,
    pub deep_reasoning_enabled: bool,
    pub request_deadline_seconds: u64,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            use_unified_agent: true,
            react_max_iterations: agent::REACT_MAX_ITERATIONS,
            deep_reasoning_enabled: false,
            request_deadline_seconds: agent::REQUEST_DEADLINE_SECONDS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySettings {
    pub max_user_facts: usize,
    pub max_insights: usize,
    pub consolidation_threshold: usize,
    pub target_insight_count: usize,
    pub preserve_days: i64,
    pub fact_similarity_threshold: f32,
    pub duplicate_threshold: f32,
    pub context_window_size: usize,
    pub summarization_token_threshold: usize,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            max_user_facts: memory::MAX_USER_FACTS,
            max_insights: memory::MAX_INSIGHTS,
            consolidation_threshold: memory::CONSOLIDATION_THRESHOLD,
            target_insight_count: memory::TARGET_INSIGHT_COUNT,
            preserve_days: memory::PRESERVE_DAYS,
            fact_similarity_threshold: memory::FACT_SIMILARITY_THRESHOLD,
            duplicate_threshold: memory::DUPLICATE_THRESHOLD,
            context_window_size: memory::CONTEXT_WINDOW_SIZE,
            summarization_token_threshold: memory::SUMMARIZATION_TOKEN_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardianSettings {
    pub cache_ttl_seconds: u64,
}

impl Default for GuardianSettings {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: guardian::CACHE_TTL_SECONDS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    pub chat_rate_limit_per_min: u32,
    pub api_rate_limit_per_min: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            chat_rate_limit_per_min: limits::CHAT_PER_MIN,
            api_rate_limit_per_min: limits::API_PER_MIN,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceSettings {
    /// false = in-memory repositories (development/tests)
    pub enabled: bool,
    pub scylla_hosts: Vec<String>,
    pub keyspace: String,
    pub replication_factor: u8,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            scylla_hosts: vec![endpoints::SCYLLA_DEFAULT.to_string()],
            keyspace: "helmsman".to_string(),
            replication_factor: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorSettings {
    pub qdrant_endpoint: String,
    pub collection: String,
    pub api_key: Option<String>,
}

impl Default for VectorSettings {
    fn default() -> Self {
        Self {
            qdrant_endpoint: endpoints::QDRANT_DEFAULT.to_string(),
            collection: "maritime_regulations".to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LmsSettings {
    pub callback_url: Option<String>,
    pub callback_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilitySettings {
    pub log_level: String,
    pub log_json: bool,
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings ranges. Called once at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_retrieval()?;
        self.validate_grader()?;
        self.validate_cache()?;
        self.validate_memory()?;
        self.validate_server()?;
        Ok(())
    }

    fn validate_retrieval(&self) -> Result<(), ConfigError> {
        let r = &self.retrieval;

        if r.rrf_k <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "retrieval.rrf_k".to_string(),
                message: format!("must be positive, got {}", r.rrf_k),
            });
        }
        if r.top_k == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retrieval.top_k".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&r.similarity_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "retrieval.similarity_threshold".to_string(),
                message: format!("must be in [0,1], got {}", r.similarity_threshold),
            });
        }
        if r.title_boost < 1.0 || r.sparse_priority_boost < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "retrieval.boosts".to_string(),
                message: "boost multipliers must be >= 1.0".to_string(),
            });
        }
        if r.top_k > r.dense_top_k && r.top_k > r.sparse_top_k {
            tracing::warn!(
                "retrieval.top_k ({}) is larger than both dense_top_k ({}) and sparse_top_k ({}), \
                 results will be limited by retrieval",
                r.top_k,
                r.dense_top_k,
                r.sparse_top_k
            );
        }
        Ok(())
    }

    fn validate_grader(&self) -> Result<(), ConfigError> {
        let g = &self.grader;

        if !(0.0..=10.0).contains(&g.pass_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "grader.pass_threshold".to_string(),
                message: format!("must be in [0,10], got {}", g.pass_threshold),
            });
        }
        if g.prefilter_fail >= g.prefilter_pass {
            return Err(ConfigError::InvalidValue {
                field: "grader.prefilter_fail".to_string(),
                message: "must be below prefilter_pass".to_string(),
            });
        }
        if g.parallel_judges == 0 || g.full_grader_batch == 0 {
            return Err(ConfigError::InvalidValue {
                field: "grader.parallel_judges".to_string(),
                message: "judge counts must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    fn validate_cache(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.cache.similarity) {
            return Err(ConfigError::InvalidValue {
                field: "cache.similarity".to_string(),
                message: format!("must be in [0,1], got {}", self.cache.similarity),
            });
        }
        if self.cache.capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache.capacity".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    fn validate_memory(&self) -> Result<(), ConfigError> {
        let m = &self.memory;

        if m.target_insight_count > m.consolidation_threshold
            || m.consolidation_threshold > m.max_insights
        {
            return Err(ConfigError::InvalidValue {
                field: "memory.consolidation_threshold".to_string(),
                message: format!(
                    "require target ({}) <= threshold ({}) <= max ({})",
                    m.target_insight_count, m.consolidation_threshold, m.max_insights
                ),
            });
        }
        if !(0.0..=1.0).contains(&m.duplicate_threshold)
            || !(0.0..=1.0).contains(&m.fact_similarity_threshold)
        {
            return Err(ConfigError::InvalidValue {
                field: "memory.duplicate_threshold".to_string(),
                message: "similarity thresholds must be in [0,1]".to_string(),
            });
        }
        Ok(())
    }

    fn validate_server(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.port".to_string(),
                message: "port cannot be 0".to_string(),
            });
        }
        if self.environment.is_strict() && self.server.api_keys.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "server.api_keys".to_string(),
                message: "at least one API key is required outside development".to_string(),
            });
        }
        if self.environment.is_production() && self.llm.api_key.is_none() {
            return Err(ConfigError::InvalidValue {
                field: "llm.api_key".to_string(),
                message: "LLM API key must be set in production".to_string(),
            });
        }
        Ok(())
    }
}

/// Load settings with layered sources.
/// Priority: flat env keys > HELMSMAN__ env vars > config/{env}.yaml >
/// config/default.yaml > defaults.
pub fn load_settings(env_name: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    if Path::new("config/default.yaml").exists() {
        builder = builder.add_source(File::with_name("config/default"));
    }
    if let Some(env) = env_name {
        let env_file = format!("config/{}", env);
        if Path::new(&format!("{}.yaml", env_file)).exists() {
            builder = builder.add_source(File::with_name(&env_file));
        }
    }

    builder = builder.add_source(Environment::with_prefix("HELMSMAN").separator("__"));

    let mut settings: Settings = builder
        .build()
        .map_err(|e| ConfigError::Load(e.to_string()))?
        .try_deserialize()
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    apply_flat_env_overrides(&mut settings);
    Ok(settings)
}

/// Honor the documented flat environment keys
fn apply_flat_env_overrides(s: &mut Settings) {
    fn var(key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.is_empty())
    }
    fn parse<T: std::str::FromStr>(key: &str) -> Option<T> {
        var(key).and_then(|v| v.parse().ok())
    }

    if let Some(v) = var("LLM_PROVIDER") {
        s.llm.provider = v;
    }
    if let Some(v) = var("LLM_MODEL") {
        s.llm.model = v;
    }
    if let Some(v) = var("LLM_API_KEY") {
        s.llm.api_key = Some(v);
    }
    if let Some(v) = var("EMBEDDING_MODEL") {
        s.embedding.model = v;
    }
    if let Some(v) = parse("EMBEDDING_DIMENSIONS") {
        s.embedding.dimensions = v;
    }
    if let Some(v) = parse("SIMILARITY_THRESHOLD") {
        s.retrieval.similarity_threshold = v;
    }
    if let Some(v) = parse("FACT_SIMILARITY_THRESHOLD") {
        s.memory.fact_similarity_threshold = v;
    }
    if let Some(v) = parse("MEMORY_DUPLICATE_THRESHOLD") {
        s.memory.duplicate_threshold = v;
    }
    if let Some(v) = parse("MAX_USER_FACTS") {
        s.memory.max_user_facts = v;
    }
    if let Some(v) = parse("MAX_INSIGHTS") {
        s.memory.max_insights = v;
    }
    if let Some(v) = parse("CONSOLIDATION_THRESHOLD") {
        s.memory.consolidation_threshold = v;
    }
    if let Some(v) = parse("TARGET_INSIGHT_COUNT") {
        s.memory.target_insight_count = v;
    }
    if let Some(v) = parse("PRESERVE_DAYS") {
        s.memory.preserve_days = v;
    }
    if let Some(v) = parse("CONTEXT_WINDOW_SIZE") {
        s.memory.context_window_size = v;
    }
    if let Some(v) = parse("SUMMARIZATION_TOKEN_THRESHOLD") {
        s.memory.summarization_token_threshold = v;
    }
    if let Some(v) = parse("CACHE_TTL_SECONDS") {
        s.cache.ttl_seconds = v;
    }
    if let Some(v) = parse("CACHE_SIMILARITY") {
        s.cache.similarity = v;
    }
    if let Some(v) = parse("RRF_K") {
        s.retrieval.rrf_k = v;
    }
    if let Some(v) = parse("RRF_TITLE_BOOST") {
        s.retrieval.title_boost = v;
    }
    if let Some(v) = parse("RRF_SPARSE_PRIORITY") {
        s.retrieval.sparse_priority_boost = v;
    }
    if let Some(v) = parse("GRADER_PASS_THRESHOLD") {
        s.grader.pass_threshold = v;
    }
    if let Some(v) = parse("REACT_MAX_ITERATIONS") {
        s.agent.react_max_iterations = v;
    }
    if let Some(v) = parse("CRAG_MAX_ATTEMPTS") {
        s.crag.max_attempts = v;
    }
    if let Some(v) = parse("REQUEST_DEADLINE_SECONDS") {
        s.agent.request_deadline_seconds = v;
    }
    if let Some(v) = parse("CHAT_RATE_LIMIT_PER_MIN") {
        s.limits.chat_rate_limit_per_min = v;
    }
    if let Some(v) = parse("API_RATE_LIMIT_PER_MIN") {
        s.limits.api_rate_limit_per_min = v;
    }
    if let Some(v) = parse("USE_UNIFIED_AGENT") {
        s.agent.use_unified_agent = v;
    }
    if let Some(v) = parse("ENABLE_CORRECTIVE_RAG") {
        s.crag.enabled = v;
    }
    if let Some(v) = parse("DEEP_REASONING_ENABLED") {
        s.agent.deep_reasoning_enabled = v;
    }
    if let Some(v) = parse("CONTEXTUAL_RAG_ENABLED") {
        s.retrieval.contextual_rag_enabled = v;
    }
    if let Some(v) = parse("GUARDIAN_CACHE_TTL") {
        s.guardian.cache_ttl_seconds = v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.retrieval.rrf_k, 60.0);
        assert_eq!(settings.grader.pass_threshold, 6.0);
        assert_eq!(settings.memory.max_user_facts, 50);
        assert_eq!(settings.cache.similarity, 0.99);
        assert_eq!(settings.agent.request_deadline_seconds, 90);
    }

    #[test]
    fn test_invalid_rrf_k_rejected() {
        let mut settings = Settings::default();
        settings.retrieval.rrf_k = 0.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_prefilter_band_order_enforced() {
        let mut settings = Settings::default();
        settings.grader.prefilter_fail = 0.9;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_consolidation_ordering_enforced() {
        let mut settings = Settings::default();
        settings.memory.target_insight_count = 45;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_strict_env_requires_api_keys() {
        let mut settings = Settings::default();
        settings.environment = RuntimeEnvironment::Staging;
        assert!(settings.validate().is_err());
        settings.server.api_keys = vec!["k1".into()];
        assert!(settings.validate().is_ok());
    }
}
