//! Router construction over a fully in-memory engine

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use helmsman_agent::{
    AgentDispatcher, AgentKind, Guardian, GuardianConfig, ReactAgent, ReactConfig, Supervisor,
};
use helmsman_config::{PersonaLibrary, Settings};
use helmsman_core::{
    EmbeddingTask, LanguageModel, LlmMessage, Message, Result as CoreResult, TextEmbedder,
    ToolDefinition,
};
use helmsman_memory::{
    FactStore, InsightStore, MemoryConfig, MemoryExtractor, SessionRegistry, Summarizer,
};
use helmsman_persistence::PersistenceLayer;
use helmsman_pipeline::{
    BackgroundScheduler, ContextBuilder, LmsEventPublisher, Orchestrator, OutputStage,
    PipelineConfig,
};
use helmsman_rag::{
    AnswerVerifier, CacheConfig, CorrectiveRag, CragConfig, EntityLookup, GraderConfig,
    HybridConfig, HybridSearcher, InMemoryDenseSearcher, QueryAnalyzer, QueryRewriter,
    RetrievalGrader, SemanticCache,
};
use helmsman_server::{create_router, AppState};
use helmsman_tools::{RecallMemoryTool, SearchRegulationsTool, ToolRegistry};

struct StubModel;

#[async_trait]
impl LanguageModel for StubModel {
    async fn chat(&self, _messages: &[Message], _tools: &[ToolDefinition]) -> CoreResult<LlmMessage> {
        Ok(LlmMessage {
            text: "ok".into(),
            ..Default::default()
        })
    }

    fn model_name(&self) -> &str {
        "stub"
    }
}

struct StubEmbedder;

#[async_trait]
impl TextEmbedder for StubEmbedder {
    async fn embed(&self, _task: EmbeddingTask, texts: &[String]) -> CoreResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
    }

    fn dimension(&self) -> usize {
        2
    }
}

fn build_state() -> AppState {
    let llm: Arc<dyn LanguageModel> = Arc::new(StubModel);
    let embedder: Arc<dyn TextEmbedder> = Arc::new(StubEmbedder);
    let persistence = PersistenceLayer::in_memory();
    let memory_config = MemoryConfig::default();

    let dense = Arc::new(InMemoryDenseSearcher::new());
    let hybrid = Arc::new(HybridSearcher::new(
        HybridConfig::default(),
        embedder.clone(),
        dense.clone(),
    ));
    let entities = Arc::new(EntityLookup::new(persistence.graph.clone()));
    let crag = Arc::new(CorrectiveRag::new(
        embedder.clone(),
        hybrid,
        Arc::new(SemanticCache::new(CacheConfig::default())),
        Arc::new(RetrievalGrader::new(llm.clone(), GraderConfig::default())),
        Arc::new(QueryAnalyzer::new(llm.clone())),
        Arc::new(QueryRewriter::new(llm.clone())),
        Arc::new(AnswerVerifier::new(llm.clone())),
        entities,
        llm.clone(),
        CragConfig::default(),
    ));

    let facts = Arc::new(FactStore::new(persistence.facts.clone(), memory_config.clone()));
    let insights = Arc::new(InsightStore::new(
        persistence.insights.clone(),
        llm.clone(),
        memory_config.clone(),
    ));
    let summarizer = Arc::new(Summarizer::new(
        persistence.summaries.clone(),
        persistence.messages.clone(),
        llm.clone(),
        memory_config.clone(),
    ));
    let extractor = Arc::new(MemoryExtractor::new(
        llm.clone(),
        embedder.clone(),
        facts.clone(),
        insights.clone(),
    ));

    let mut registry = ToolRegistry::new();
    registry.register(SearchRegulationsTool::new(crag.clone()));
    registry.register(RecallMemoryTool::new(
        facts.clone(),
        insights.clone(),
        embedder.clone(),
    ));
    let registry = Arc::new(registry);
    let tool_definitions = registry.definitions();

    let dispatcher = Arc::new(AgentDispatcher::new(
        AgentKind::React,
        Arc::new(ReactAgent::new(
            llm.clone(),
            registry.clone(),
            ReactConfig::default(),
        )),
        Arc::new(Supervisor::new(llm.clone(), crag, registry)),
    ));

    let context_builder = Arc::new(ContextBuilder::new(
        facts.clone(),
        insights.clone(),
        summarizer.clone(),
        persistence.messages.clone(),
        embedder.clone(),
        Arc::new(PersonaLibrary::builtin()),
        memory_config,
    ));

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(Guardian::new(llm.clone(), GuardianConfig::default())),
        Arc::new(SessionRegistry::new()),
        persistence.sessions.clone(),
        persistence.messages.clone(),
        context_builder,
        dispatcher,
        Arc::new(OutputStage::new(llm.clone())),
        extractor,
        insights.clone(),
        summarizer,
        Arc::new(BackgroundScheduler::start(16)),
        Arc::new(LmsEventPublisher::new(None, None)),
        Arc::new(QueryAnalyzer::new(llm.clone())),
        llm,
        embedder,
        tool_definitions,
        PipelineConfig {
            request_deadline: Duration::from_secs(30),
        },
    ));

    AppState::new(
        Arc::new(Settings::default()),
        orchestrator,
        facts,
        insights,
        persistence.messages.clone(),
        dense,
    )
}

#[tokio::test]
async fn test_router_creation() {
    let state = build_state();
    let _ = create_router(state);
}

#[tokio::test]
async fn test_rate_limiter_wired_from_settings() {
    let state = build_state();
    // Defaults: 100/min per key, 30/min per user
    for _ in 0..30 {
        assert!(state.rate_limiter.check_user("u1").is_ok());
    }
    assert!(state.rate_limiter.check_user("u1").is_err());
}
