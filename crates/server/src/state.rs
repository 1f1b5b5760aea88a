//! Shared application state and metrics plumbing

use std::sync::{Arc, OnceLock};

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use helmsman_config::Settings;
use helmsman_memory::{FactStore, InsightStore};
use helmsman_persistence::MessageRepository;
use helmsman_pipeline::Orchestrator;
use helmsman_rag::DenseSearcher;

use crate::rate_limit::RateLimiter;

/// Everything the handlers need
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub orchestrator: Arc<Orchestrator>,
    pub facts: Arc<FactStore>,
    pub insights: Arc<InsightStore>,
    pub messages: Arc<dyn MessageRepository>,
    pub chunks: Arc<dyn DenseSearcher>,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: Arc<Settings>,
        orchestrator: Arc<Orchestrator>,
        facts: Arc<FactStore>,
        insights: Arc<InsightStore>,
        messages: Arc<dyn MessageRepository>,
        chunks: Arc<dyn DenseSearcher>,
    ) -> Self {
        let rate_limiter = Arc::new(RateLimiter::from_settings(&settings.limits));
        Self {
            settings,
            orchestrator,
            facts,
            insights,
            messages,
            chunks,
            rate_limiter,
        }
    }
}

static METRICS: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder once at startup
pub fn init_metrics() -> &'static PrometheusHandle {
    METRICS.get_or_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install Prometheus recorder")
    })
}

/// Rendered metrics for the /metrics endpoint
pub fn render_metrics() -> String {
    METRICS.get().map(|h| h.render()).unwrap_or_default()
}
