pub mod loop_engine;
pub mod research;
pub mod types;

pub use loop_engine::AgenticLoop;
pub use research::{ResearchRequest, ResearchService};
pub use types::{LoopOutcome, LoopRequest, StopReason};

use crate::ai::LlmProvider;
use crate::config::Config;
use crate::mcp::SessionConnector;
use std::sync::Arc;

/// Collaborators and settings shared by every task and research run
pub struct AgentRuntime {
    pub connector: Arc<dyn SessionConnector>,
    pub provider: Arc<dyn LlmProvider>,
    pub mcp_address: String,
    pub max_iterations: usize,
    pub default_graphs: Vec<String>,
    pub bookkeeping_graph: String,
    pub default_model: String,
}

impl AgentRuntime {
    pub fn from_config(
        config: &Config,
        connector: Arc<dyn SessionConnector>,
        provider: Arc<dyn LlmProvider>,
    ) -> Self {
        Self {
            connector,
            provider,
            mcp_address: config.mcp_server_url.clone(),
            max_iterations: config.max_iterations,
            default_graphs: config.default_graphs.clone(),
            bookkeeping_graph: config.bookkeeping_graph.clone(),
            default_model: config.default_model.clone(),
        }
    }

    pub fn agent_loop(&self) -> AgenticLoop {
        AgenticLoop::new(self.provider.clone(), self.max_iterations)
    }

    /// Requested model, or the configured default when absent or blank
    pub fn resolve_model(&self, requested: Option<String>) -> String {
        requested
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| self.default_model.clone())
    }
}
