//! Agents
//!
//! Two interchangeable agent paths over the same tools and output shape:
//! the unified ReAct loop and the supervisor multi-agent graph. The
//! guardian safety pre-filter lives here too.

pub mod guardian;
pub mod react;
pub mod supervisor;

pub use guardian::{
    Guardian, GuardianConfig, GuardianDecision, GuardianVerdict, BLOCKED_RESPONSE,
};
pub use react::{AgentContext, AgentRun, ReactAgent, ReactConfig};
pub use supervisor::{Supervisor, SupervisorNode};

use std::sync::Arc;

use helmsman_core::Result as CoreResult;

/// Which agent path serves requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentKind {
    React,
    Supervisor,
}

impl AgentKind {
    pub fn label(&self) -> &'static str {
        match self {
            AgentKind::React => "react",
            AgentKind::Supervisor => "supervisor",
        }
    }
}

/// Configuration-driven dispatcher over the two agent paths
pub struct AgentDispatcher {
    kind: AgentKind,
    react: Arc<ReactAgent>,
    supervisor: Arc<Supervisor>,
}

impl AgentDispatcher {
    pub fn new(kind: AgentKind, react: Arc<ReactAgent>, supervisor: Arc<Supervisor>) -> Self {
        Self {
            kind,
            react,
            supervisor,
        }
    }

    pub fn kind(&self) -> AgentKind {
        self.kind
    }

    pub async fn run(&self, ctx: AgentContext) -> CoreResult<AgentRun> {
        match self.kind {
            AgentKind::React => self.react.run(ctx).await,
            AgentKind::Supervisor => self.supervisor.run(ctx).await,
        }
    }
}
