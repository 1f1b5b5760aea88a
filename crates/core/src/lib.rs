//! Core traits and types for the helmsman chat engine
//!
//! This crate provides foundational types used across all other crates:
//! - Chat request/response contracts
//! - Corpus types (chunks, entities, citations)
//! - Per-user memory types (facts, insights, summaries)
//! - Session state (pronoun style, anti-repetition)
//! - LLM and embedding traits with a normalized message shape
//! - Error taxonomy

pub mod chat;
pub mod chunk;
pub mod entity;
pub mod error;
pub mod llm;
pub mod memory;
pub mod message;
pub mod session;
pub mod vector;

pub use chat::{
    ChatRequest, ChatResponse, Citation, QueryType, ResponseMetadata, UserContext, UserRole,
};
pub use chunk::{BoundingBox, Chunk, ContentType};
pub use entity::{EdgeType, Entity, EntityType, RelatedEntity};
pub use error::{Error, Result};
pub use llm::{
    EmbeddingTask, LanguageModel, LlmMessage, Message, Role, TextEmbedder, TokenUsage,
    ToolDefinition, ToolInvocation,
};
pub use memory::{EvolutionNote, Fact, FactType, Insight, InsightCategory, Summary};
pub use message::{ChatMessage, MessageRole};
pub use session::{detect_pronoun_style, PronounStyle, SessionState, RECENT_OPENER_CAP};
pub use vector::{cosine_similarity, l2_normalize};
