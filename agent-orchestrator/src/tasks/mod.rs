//! Background task registry
//!
//! `start` inserts a running task and spawns its executor without waiting on
//! it. The executor is the only writer of the terminal fields; `cancel` just
//! trips the task's cancellation token. The table and the log path are the
//! only state shared between tasks, both behind one mutex.

pub mod capture;
pub mod executor;
pub mod types;

pub use executor::TaskExecutor;
pub use types::{TaskOutcome, TaskSnapshot, TaskState, TaskStatus, TaskSummary};

use crate::agent::AgentRuntime;
use crate::error::{OrchestratorError, Result};
use capture::TaskLogContext;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub struct TaskTable {
    tasks: Mutex<HashMap<String, TaskState>>,
    max_log_lines: usize,
}

impl TaskTable {
    pub fn new(max_log_lines: usize) -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            max_log_lines,
        }
    }

    pub fn insert(&self, state: TaskState) {
        self.tasks.lock().insert(state.id.clone(), state);
    }

    /// Append a timestamped line; unknown ids are ignored
    pub fn append_log(&self, task_id: &str, message: &str) {
        let line = capture::timestamped(message);
        if let Some(state) = self.tasks.lock().get_mut(task_id) {
            state.push_log(line, self.max_log_lines);
        }
    }

    pub fn snapshot(&self, task_id: &str) -> Option<TaskSnapshot> {
        let (lines, dropped, status, result, error) = {
            let tasks = self.tasks.lock();
            let state = tasks.get(task_id)?;
            (
                state.logs.iter().cloned().collect::<Vec<_>>(),
                state.dropped_lines,
                state.status,
                state.result.clone(),
                state.error.clone(),
            )
        };

        let mut logs = String::new();
        if dropped > 0 {
            logs.push_str(&format!("... {} earlier lines dropped\n", dropped));
        }
        logs.push_str(&lines.join("\n"));

        Some(TaskSnapshot {
            task_id: task_id.to_string(),
            status,
            logs,
            result,
            error,
        })
    }

    /// Flag a running task for cancellation
    pub fn request_cancel(&self, task_id: &str) -> Result<()> {
        let tasks = self.tasks.lock();
        let state = tasks
            .get(task_id)
            .ok_or_else(|| OrchestratorError::NotFound(task_id.to_string()))?;
        if state.status.is_terminal() {
            return Err(OrchestratorError::InvalidState(format!(
                "task '{}' is already {}",
                task_id, state.status
            )));
        }
        state.cancel.cancel();
        Ok(())
    }

    /// Write the terminal fields. Only a running task accepts an outcome;
    /// returns whether the write happened.
    pub fn finish(&self, task_id: &str, outcome: TaskOutcome) -> bool {
        let mut tasks = self.tasks.lock();
        let Some(state) = tasks.get_mut(task_id) else {
            return false;
        };
        if state.status.is_terminal() {
            return false;
        }

        state.status = outcome.status();
        match outcome {
            TaskOutcome::Completed(text) => state.result = Some(text),
            TaskOutcome::Failed(error) => state.error = Some(error),
            TaskOutcome::Cancelled => state.error = Some(OrchestratorError::Cancelled.to_string()),
        }
        state.finished_at = Some(Utc::now());
        true
    }

    pub fn list(&self) -> Vec<TaskSummary> {
        let mut summaries: Vec<TaskSummary> = self.tasks.lock().values().map(TaskState::summary).collect();
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        summaries
    }

    /// Drop terminal tasks that finished at least `max_age` ago
    pub fn remove_finished_older_than(&self, max_age: Duration) -> usize {
        let now = Utc::now();
        let mut tasks = self.tasks.lock();
        let before = tasks.len();
        tasks.retain(|_, state| match state.finished_at {
            Some(finished) if state.status.is_terminal() => (now - finished)
                .to_std()
                .map(|age| age < max_age)
                .unwrap_or(true),
            _ => true,
        });
        before - tasks.len()
    }
}

pub struct TaskRegistry {
    table: Arc<TaskTable>,
    runtime: Arc<AgentRuntime>,
}

impl TaskRegistry {
    pub fn new(runtime: Arc<AgentRuntime>, max_log_lines: usize) -> Self {
        Self {
            table: Arc::new(TaskTable::new(max_log_lines)),
            runtime,
        }
    }

    /// Schedule a new task and return its id without waiting for it
    pub fn start(&self, prompt: String, system_prompt: Option<String>, model: Option<String>) -> String {
        let task_id = Uuid::new_v4().to_string();
        let state = TaskState::new(task_id.clone());
        let cancel = state.cancel.clone();
        self.table.insert(state);

        let model = self.runtime.resolve_model(model);
        log::info!("[TASK] Scheduling task {} (model {})", task_id, model);

        let executor = TaskExecutor {
            runtime: self.runtime.clone(),
            table: self.table.clone(),
            task_id: task_id.clone(),
            prompt,
            system_prompt,
            model,
            cancel,
        };
        let ctx = TaskLogContext {
            task_id: task_id.clone(),
            table: self.table.clone(),
        };
        tokio::spawn(capture::scope(ctx, executor.run()));

        task_id
    }

    /// Request cooperative cancellation; the transition is observed later
    pub fn cancel(&self, task_id: &str) -> Result<()> {
        self.table.request_cancel(task_id)?;
        log::info!("[TASK] Cancellation requested for {}", task_id);
        Ok(())
    }

    pub fn status(&self, task_id: &str) -> Result<TaskSnapshot> {
        self.table
            .snapshot(task_id)
            .ok_or_else(|| OrchestratorError::NotFound(task_id.to_string()))
    }

    pub fn list(&self) -> Vec<TaskSummary> {
        self.table.list()
    }

    pub fn reap_finished(&self, max_age: Duration) -> usize {
        let removed = self.table.remove_finished_older_than(max_age);
        if removed > 0 {
            log::info!("[TASK] Reaped {} finished task(s)", removed);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{GenerateResponse, LlmProvider};
    use crate::testing::{query_call, tool_calls, ScriptedProvider, StubConnector, StubSession};

    fn registry(provider: Arc<dyn LlmProvider>, session: StubSession) -> TaskRegistry {
        let runtime = AgentRuntime {
            connector: Arc::new(StubConnector::new(session)),
            provider,
            mcp_address: "http://stub/mcp".to_string(),
            max_iterations: 10,
            default_graphs: vec!["Grynya".to_string()],
            bookkeeping_graph: "Grynya".to_string(),
            default_model: "gemini-test".to_string(),
        };
        TaskRegistry::new(Arc::new(runtime), 500)
    }

    async fn wait_terminal(registry: &TaskRegistry, id: &str) -> TaskSnapshot {
        for _ in 0..500 {
            let snapshot = registry.status(id).unwrap();
            if snapshot.status.is_terminal() {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {} never finished", id);
    }

    #[tokio::test]
    async fn test_unknown_task_is_not_found() {
        let registry = registry(Arc::new(ScriptedProvider::text("OK")), StubSession::new());
        assert!(matches!(registry.status("nope"), Err(OrchestratorError::NotFound(_))));
        assert!(matches!(registry.cancel("nope"), Err(OrchestratorError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_start_returns_before_work_runs() {
        let provider = Arc::new(ScriptedProvider::text("OK"));
        let registry = registry(provider.clone(), StubSession::new());

        let id = registry.start("hello".to_string(), None, None);
        let snapshot = registry.status(&id).unwrap();

        assert_eq!(snapshot.status, TaskStatus::Running);
        assert!(snapshot.result.is_none());
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_end_to_end_completion() {
        let session = StubSession::new();
        let provider = Arc::new(ScriptedProvider::text("OK"));
        let registry = registry(provider.clone(), session.clone());

        let id = registry.start(
            "summarize last session".to_string(),
            None,
            Some("gemini-test".to_string()),
        );
        let snapshot = wait_terminal(&registry, &id).await;

        assert_eq!(snapshot.status, TaskStatus::Completed);
        assert_eq!(snapshot.result.as_deref(), Some("OK"));
        assert!(snapshot.error.is_none());
        assert!(session.is_closed());
        assert_eq!(provider.requests()[0].model, "gemini-test");

        let bookkeeping = session.calls_named("add_node");
        assert_eq!(bookkeeping.len(), 1);
        assert_eq!(bookkeeping[0]["label"], "AgentTask");
        assert_eq!(bookkeeping[0]["properties"]["id"], id.as_str());
        assert_eq!(bookkeeping[0]["properties"]["prompt"], "summarize last session");
    }

    #[tokio::test]
    async fn test_cancel_after_terminal_is_invalid_state() {
        let registry = registry(Arc::new(ScriptedProvider::text("OK")), StubSession::new());
        let id = registry.start("p".to_string(), None, None);
        wait_terminal(&registry, &id).await;

        assert!(matches!(registry.cancel(&id), Err(OrchestratorError::InvalidState(_))));
        // Terminal state is sticky
        assert_eq!(registry.status(&id).unwrap().status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_cancel_during_slow_remote_call() {
        let session = StubSession::slow(Duration::from_secs(30));
        let provider = Arc::new(ScriptedProvider::always(tool_calls(vec![query_call(
            "c1",
            "MATCH (n) RETURN n",
            None,
        )])));
        let registry = registry(provider, session.clone());

        let id = registry.start("long job".to_string(), None, None);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(registry.status(&id).unwrap().status, TaskStatus::Running);

        registry.cancel(&id).unwrap();
        // Repeated requests while still running are accepted
        let _ = registry.cancel(&id);

        let snapshot = wait_terminal(&registry, &id).await;
        assert_eq!(snapshot.status, TaskStatus::Cancelled);
        assert_eq!(snapshot.error.as_deref(), Some("cancelled by caller"));
        assert!(snapshot.result.is_none());
        assert!(session.is_closed());

        tokio::time::sleep(Duration::from_millis(50)).await;
        let later = registry.status(&id).unwrap();
        assert_eq!(later.status, TaskStatus::Cancelled);
        assert!(later.result.is_none());
    }

    #[tokio::test]
    async fn test_logs_are_isolated_per_task() {
        let provider = Arc::new(ScriptedProvider::text("OK").with_delay(Duration::from_millis(20)));
        let registry = registry(provider, StubSession::new());

        let a = registry.start("alpha".to_string(), None, None);
        let b = registry.start("beta".to_string(), None, None);
        let log_a = wait_terminal(&registry, &a).await.logs;
        let log_b = wait_terminal(&registry, &b).await.logs;

        assert!(log_a.contains("provider saw prompt 'alpha'"));
        assert!(!log_a.contains("provider saw prompt 'beta'"));
        assert!(log_b.contains("provider saw prompt 'beta'"));
        assert!(!log_b.contains("provider saw prompt 'alpha'"));
    }

    #[tokio::test]
    async fn test_bookkeeping_failure_is_not_fatal() {
        let session = StubSession::with_responder(|name, _| {
            if name == "add_node" {
                Err(OrchestratorError::TransportFailure("graph offline".to_string()))
            } else {
                Ok("[]".to_string())
            }
        });
        let registry = registry(Arc::new(ScriptedProvider::text("OK")), session);

        let id = registry.start("p".to_string(), None, None);
        let snapshot = wait_terminal(&registry, &id).await;

        assert_eq!(snapshot.status, TaskStatus::Completed);
        assert_eq!(snapshot.result.as_deref(), Some("OK"));
        assert!(snapshot.logs.contains("Bookkeeping write failed"));
    }

    #[tokio::test]
    async fn test_session_setup_failure_is_recorded() {
        let session = StubSession::failing_initialize();
        let provider = Arc::new(ScriptedProvider::text("OK"));
        let registry = registry(provider.clone(), session.clone());

        let id = registry.start("p".to_string(), None, None);
        let snapshot = wait_terminal(&registry, &id).await;

        assert_eq!(snapshot.status, TaskStatus::Failed);
        assert!(snapshot.error.unwrap().contains("connection refused"));
        assert!(session.is_closed());
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_blocked_prompt_completes_empty() {
        let provider = Arc::new(ScriptedProvider::always(GenerateResponse::NoCandidates {
            reason: "prompt blocked: SAFETY".to_string(),
        }));
        let registry = registry(provider, StubSession::new());

        let id = registry.start("p".to_string(), None, None);
        let snapshot = wait_terminal(&registry, &id).await;

        assert_eq!(snapshot.status, TaskStatus::Completed);
        assert_eq!(snapshot.result.as_deref(), Some(""));
        assert!(snapshot.error.is_none());
        assert!(snapshot.logs.contains("SAFETY"));
    }

    #[tokio::test]
    async fn test_capability_panic_still_closes_session() {
        let session = StubSession::with_responder(|name, _| {
            if name == crate::graph::QUERY_GRAPH {
                panic!("capability exploded");
            }
            Ok("{}".to_string())
        });
        let provider = Arc::new(ScriptedProvider::always(tool_calls(vec![query_call(
            "c1",
            "MATCH (n) RETURN n",
            None,
        )])));
        let registry = registry(provider, session.clone());

        let id = registry.start("p".to_string(), None, None);
        let snapshot = wait_terminal(&registry, &id).await;

        assert_eq!(snapshot.status, TaskStatus::Failed);
        assert!(snapshot.error.unwrap().contains("capability exploded"));
        assert!(session.is_closed());
        assert!(snapshot.logs.contains("Tool session closed"));
    }

    #[tokio::test]
    async fn test_reap_only_removes_finished_tasks() {
        let provider = Arc::new(ScriptedProvider::text("OK"));
        let registry = registry(provider, StubSession::slow(Duration::from_secs(30)));

        let done = registry.start("quick".to_string(), None, None);
        let running = registry.start("slow".to_string(), None, None);
        registry
            .table
            .finish(&done, TaskOutcome::Completed("early".to_string()));

        assert_eq!(registry.list().len(), 2);
        assert_eq!(registry.reap_finished(Duration::from_secs(3600)), 0);
        assert_eq!(registry.reap_finished(Duration::ZERO), 1);

        assert!(matches!(registry.status(&done), Err(OrchestratorError::NotFound(_))));
        assert_eq!(registry.status(&running).unwrap().status, TaskStatus::Running);
    }

    #[test]
    fn test_finish_writes_once() {
        let table = TaskTable::new(10);
        table.insert(TaskState::new("t".to_string()));

        assert!(table.finish("t", TaskOutcome::Completed("first".to_string())));
        assert!(!table.finish("t", TaskOutcome::Failed("second".to_string())));
        assert!(!table.finish("missing", TaskOutcome::Cancelled));

        let snapshot = table.snapshot("t").unwrap();
        assert_eq!(snapshot.status, TaskStatus::Completed);
        assert_eq!(snapshot.result.as_deref(), Some("first"));
        assert!(snapshot.error.is_none());
    }

    #[test]
    fn test_snapshot_serialization_omits_absent_fields() {
        let table = TaskTable::new(10);
        table.insert(TaskState::new("t".to_string()));
        let json = serde_json::to_value(table.snapshot("t").unwrap()).unwrap();
        assert_eq!(json["status"], "running");
        assert!(json.get("result").is_none());
        assert!(json.get("error").is_none());
    }
}
