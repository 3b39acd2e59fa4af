//! Drives one task from connection to its single terminal write

use super::types::TaskOutcome;
use super::TaskTable;
use crate::agent::{AgentRuntime, LoopRequest, StopReason};
use crate::error::{catch_panic, describe_error, panic_message, OrchestratorError, Result};
use crate::graph::{GraphStore, RemoteGraphStore, QUERY_GRAPH};
use crate::mcp::ToolSession;
use crate::tasks::capture::emit;
use chrono::Utc;
use futures_util::FutureExt;
use serde_json::{json, Map, Value};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct TaskExecutor {
    pub runtime: Arc<AgentRuntime>,
    pub table: Arc<TaskTable>,
    pub task_id: String,
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub model: String,
    pub cancel: CancellationToken,
}

impl TaskExecutor {
    pub async fn run(self) {
        emit(format!("[TASK] Task {} started with model {}", self.task_id, self.model));

        let outcome = match AssertUnwindSafe(self.execute()).catch_unwind().await {
            Ok(Ok(text)) => TaskOutcome::Completed(text),
            Ok(Err(OrchestratorError::Cancelled)) => TaskOutcome::Cancelled,
            Ok(Err(e)) => TaskOutcome::Failed(describe_error(&e)),
            Err(panic) => TaskOutcome::Failed(format!("task panicked: {}", panic_message(panic.as_ref()))),
        };

        // Anything computed after a cancel request is discarded
        let outcome = if self.cancel.is_cancelled() {
            TaskOutcome::Cancelled
        } else {
            outcome
        };

        match &outcome {
            TaskOutcome::Completed(text) => emit(format!("[TASK] Completed ({} chars)", text.len())),
            TaskOutcome::Failed(error) => emit(format!("[TASK] Failed: {}", error)),
            TaskOutcome::Cancelled => emit("[TASK] Cancelled by caller"),
        }

        if !self.table.finish(&self.task_id, outcome) {
            log::warn!("[TASK] Task {} already finished, outcome discarded", self.task_id);
        }
    }

    /// Resolve `future` unless the task is cancelled first
    async fn cancellable<T>(&self, future: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(OrchestratorError::Cancelled),
            result = future => result,
        }
    }

    async fn execute(&self) -> Result<String> {
        self.runtime.provider.validate_model(&self.model)?;

        emit(format!("[TASK] Connecting to tool session at {}", self.runtime.mcp_address));
        let session = self
            .cancellable(self.runtime.connector.connect(&self.runtime.mcp_address))
            .await?;

        // A panic below must not skip the teardown
        let result = catch_panic(self.with_session(session.as_ref())).await;

        session.close().await;
        emit("[TASK] Tool session closed");
        result
    }

    async fn with_session(&self, session: &dyn ToolSession) -> Result<String> {
        let server = self.cancellable(session.initialize()).await?;
        emit(format!("[TASK] Session initialized ({} {})", server.name, server.version));

        let capabilities = self.cancellable(session.list_capabilities()).await?;
        let names: Vec<&str> = capabilities.iter().map(|c| c.name.as_str()).collect();
        emit(format!("[TASK] Capabilities: {}", names.join(", ")));
        if !names.contains(&QUERY_GRAPH) {
            emit(format!("[TASK] Warning: remote side does not advertise '{}'", QUERY_GRAPH));
        }

        self.record_bookkeeping(session).await?;

        let outcome = self
            .cancellable(self.runtime.agent_loop().run(
                session,
                LoopRequest {
                    prompt: self.prompt.clone(),
                    system_prompt: self.system_prompt.clone(),
                    model: self.model.clone(),
                    default_graphs: self.runtime.default_graphs.clone(),
                },
            ))
            .await?;

        emit(format!(
            "[TASK] Loop finished after {} iteration(s), {} query(ies) on {:?}",
            outcome.iterations,
            outcome.queries_executed.len(),
            outcome.graphs_touched
        ));

        match outcome.stop_reason {
            StopReason::NoCandidates { reason } => {
                emit(format!("[TASK] Provider returned no candidates: {}", reason));
                Ok(outcome.text)
            }
            StopReason::Completed | StopReason::IterationLimit => Ok(outcome.text),
        }
    }

    /// Best effort: only cancellation propagates
    async fn record_bookkeeping(&self, session: &dyn ToolSession) -> Result<()> {
        let mut properties = Map::new();
        properties.insert("id".to_string(), json!(self.task_id));
        properties.insert("prompt".to_string(), json!(self.prompt));
        properties.insert("model".to_string(), json!(self.model));
        properties.insert("started_at".to_string(), Value::String(Utc::now().to_rfc3339()));

        let store = RemoteGraphStore::new(session);
        match self
            .cancellable(store.add_node(&self.runtime.bookkeeping_graph, "AgentTask", properties))
            .await
        {
            Ok(id) => {
                emit(format!("[TASK] Recorded task node {} in {}", id, self.runtime.bookkeeping_graph));
                Ok(())
            }
            Err(OrchestratorError::Cancelled) => Err(OrchestratorError::Cancelled),
            Err(e) => {
                emit(format!("[TASK] Bookkeeping write failed (continuing): {}", e));
                Ok(())
            }
        }
    }
}
