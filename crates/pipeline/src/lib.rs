//! Request pipeline
//!
//! The 6-stage orchestrator (session, validate, context, agent, output,
//! background), the context builder, the output stage, the bounded
//! background scheduler and the outbound LMS event callback.

pub mod background;
pub mod context;
pub mod events;
pub mod orchestrator;
pub mod output;

pub use background::{BackgroundScheduler, Job};
pub use context::{BuiltContext, ContextBuilder};
pub use events::{AiEvent, LmsEventPublisher};
pub use orchestrator::{Orchestrator, PipelineConfig, PipelineEvent};
pub use output::OutputStage;
