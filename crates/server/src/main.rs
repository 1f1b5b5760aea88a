//! Helmsman server entry point

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use helmsman_agent::{
    AgentDispatcher, AgentKind, Guardian, GuardianConfig, ReactAgent, ReactConfig, Supervisor,
};
use helmsman_config::{load_settings, PersonaLibrary, Settings};
use helmsman_core::{LanguageModel, TextEmbedder};
use helmsman_llm::{ChatClient, ChatClientConfig, EmbeddingClient, EmbeddingClientConfig};
use helmsman_memory::{
    FactStore, InsightStore, MemoryConfig, MemoryExtractor, SessionRegistry, Summarizer,
};
use helmsman_persistence::{PersistenceLayer, ScyllaConfig};
use helmsman_pipeline::{
    BackgroundScheduler, ContextBuilder, LmsEventPublisher, Orchestrator, OutputStage,
    PipelineConfig,
};
use helmsman_rag::{
    AnswerVerifier, CacheConfig, ChunkVectorStore, CorrectiveRag, CragConfig, DenseSearcher,
    EntityLookup, GraderConfig, HybridConfig, HybridSearcher, InMemoryDenseSearcher,
    QueryAnalyzer, QueryRewriter, RetrievalGrader, SemanticCache, SparseConfig, SparseIndex,
    VectorStoreConfig,
};
use helmsman_server::{create_router, AppState};
use helmsman_tools::{
    EscalateTool, ExplainSimplyTool, LookupEntitiesTool, PracticeQuestionTool, RecallMemoryTool,
    RememberFactTool, SearchRegulationsTool, ToolRegistry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Priority: env vars > config/{env}.yaml > config/default.yaml > defaults
    let env = std::env::var("HELMSMAN_ENV").ok();
    let settings = match load_settings(env.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            // Tracing not yet initialized
            eprintln!("Warning: failed to load config: {e}. Using defaults.");
            Settings::default()
        }
    };

    init_tracing(&settings);
    settings.validate()?;

    tracing::info!("Starting helmsman server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        environment = ?settings.environment,
        config = env.as_deref().unwrap_or("default"),
        "Configuration loaded"
    );

    helmsman_server::state::init_metrics();
    tracing::info!("Prometheus metrics exposed at /metrics");

    // Upstream model clients; stateless, shared across the whole engine
    let llm: Arc<dyn LanguageModel> =
        Arc::new(ChatClient::new(ChatClientConfig::from(&settings.llm))?);
    let embedder: Arc<dyn TextEmbedder> = Arc::new(EmbeddingClient::new(
        EmbeddingClientConfig::from(&settings.embedding),
    )?);

    // Durable stores: ScyllaDB, or all-in-process when disabled/unreachable
    let persistence = if settings.persistence.enabled {
        let scylla_config = ScyllaConfig {
            hosts: settings.persistence.scylla_hosts.clone(),
            keyspace: settings.persistence.keyspace.clone(),
            replication_factor: settings.persistence.replication_factor,
            ..ScyllaConfig::default()
        };
        match PersistenceLayer::connect(scylla_config).await {
            Ok(layer) => {
                tracing::info!(
                    hosts = ?settings.persistence.scylla_hosts,
                    keyspace = %settings.persistence.keyspace,
                    "ScyllaDB persistence initialized"
                );
                layer
            }
            Err(e) => {
                tracing::error!("Failed to initialize ScyllaDB: {e}. Falling back to in-memory.");
                PersistenceLayer::in_memory()
            }
        }
    } else {
        tracing::info!("Persistence disabled, using in-memory repositories");
        PersistenceLayer::in_memory()
    };

    // Corpus stores: Qdrant + Tantivy, in-memory dense fallback for dev
    let dense: Arc<dyn DenseSearcher> = match init_vector_store(&settings).await {
        Ok(store) => {
            tracing::info!(
                endpoint = %settings.vector.qdrant_endpoint,
                collection = %settings.vector.collection,
                "Qdrant vector store initialized"
            );
            Arc::new(store)
        }
        Err(e) => {
            tracing::warn!("Failed to initialize Qdrant: {e}. Dense search runs in-memory.");
            Arc::new(InMemoryDenseSearcher::new())
        }
    };
    let sparse = Arc::new(SparseIndex::new(SparseConfig {
        index_path: settings.retrieval.sparse_index_path.clone(),
        top_k: settings.retrieval.sparse_top_k,
    })?);

    // Retrieval stack
    let hybrid = Arc::new(
        HybridSearcher::new(
            HybridConfig::from(&settings.retrieval),
            embedder.clone(),
            dense.clone(),
        )
        .with_sparse_index(sparse),
    );
    let entities = Arc::new(EntityLookup::new(persistence.graph.clone()));
    let crag = Arc::new(CorrectiveRag::new(
        embedder.clone(),
        hybrid,
        Arc::new(SemanticCache::new(CacheConfig::from(&settings.cache))),
        Arc::new(RetrievalGrader::new(
            llm.clone(),
            GraderConfig::from(&settings.grader),
        )),
        Arc::new(QueryAnalyzer::new(llm.clone())),
        Arc::new(QueryRewriter::new(llm.clone())),
        Arc::new(AnswerVerifier::new(llm.clone())),
        entities.clone(),
        llm.clone(),
        CragConfig::from(&settings.crag),
    ));

    // Memory stack
    let memory_config = MemoryConfig::from(&settings.memory);
    let facts = Arc::new(FactStore::new(
        persistence.facts.clone(),
        memory_config.clone(),
    ));
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

    // Tools, bound once at startup to their backing components
    let mut registry = ToolRegistry::new();
    registry.register(SearchRegulationsTool::new(crag.clone()));
    registry.register(LookupEntitiesTool::new(entities));
    registry.register(RecallMemoryTool::new(
        facts.clone(),
        insights.clone(),
        embedder.clone(),
    ));
    registry.register(RememberFactTool::new(facts.clone(), embedder.clone()));
    registry.register(PracticeQuestionTool::new(llm.clone()));
    registry.register(ExplainSimplyTool::new(llm.clone()));
    registry.register(EscalateTool::new());
    let registry = Arc::new(registry);
    let tool_definitions = registry.definitions();
    tracing::info!(tools = registry.len(), "Tool registry created");

    // Agent paths; configuration picks one at dispatch
    let react = Arc::new(ReactAgent::new(
        llm.clone(),
        registry.clone(),
        ReactConfig {
            max_iterations: settings.agent.react_max_iterations,
        },
    ));
    let supervisor = Arc::new(Supervisor::new(llm.clone(), crag.clone(), registry));
    let agent_kind = if settings.agent.use_unified_agent {
        AgentKind::React
    } else {
        AgentKind::Supervisor
    };
    let dispatcher = Arc::new(AgentDispatcher::new(agent_kind, react, supervisor));
    tracing::info!(agent = agent_kind.label(), "Agent path selected");

    // Personas
    let personas = match PersonaLibrary::load_dir(&settings.persona_dir) {
        Ok(library) if !library.is_empty() => Arc::new(library),
        Ok(_) | Err(_) => {
            tracing::warn!(
                dir = %settings.persona_dir,
                "No persona files loaded, using built-in persona"
            );
            Arc::new(PersonaLibrary::builtin())
        }
    };

    let context_builder = Arc::new(ContextBuilder::new(
        facts.clone(),
        insights.clone(),
        summarizer.clone(),
        persistence.messages.clone(),
        embedder.clone(),
        personas,
        memory_config,
    ));

    let scheduler = Arc::new(BackgroundScheduler::start(256));
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(Guardian::new(
            llm.clone(),
            GuardianConfig::from(&settings.guardian),
        )),
        Arc::new(SessionRegistry::new()),
        persistence.sessions.clone(),
        persistence.messages.clone(),
        context_builder,
        dispatcher,
        Arc::new(OutputStage::new(llm.clone())),
        extractor,
        insights.clone(),
        summarizer,
        scheduler,
        Arc::new(LmsEventPublisher::from_settings(&settings.lms)),
        Arc::new(QueryAnalyzer::new(llm.clone())),
        llm,
        embedder,
        tool_definitions,
        PipelineConfig {
            request_deadline: Duration::from_secs(settings.agent.request_deadline_seconds),
        },
    ));

    let settings = Arc::new(settings);
    let state = AppState::new(
        settings.clone(),
        orchestrator.clone(),
        facts,
        insights,
        persistence.messages.clone(),
        dense,
    );
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port).parse()?;
    tracing::info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain background work before exiting
    orchestrator.shutdown(Duration::from_secs(10)).await;
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}

fn init_tracing(settings: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "helmsman={},tower_http=info",
            settings.observability.log_level
        )
        .into()
    });

    let subscriber = tracing_subscriber::registry().with(env_filter);
    let fmt_layer = if settings.observability.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };
    subscriber.with(fmt_layer).init();
}

async fn init_vector_store(
    settings: &Settings,
) -> Result<ChunkVectorStore, helmsman_rag::RagError> {
    let store = ChunkVectorStore::new(VectorStoreConfig {
        endpoint: settings.vector.qdrant_endpoint.clone(),
        collection: settings.vector.collection.clone(),
        vector_dim: settings.embedding.dimensions,
        api_key: settings.vector.api_key.clone(),
    })
    .await?;
    store.ensure_collection().await?;
    Ok(store)
}
