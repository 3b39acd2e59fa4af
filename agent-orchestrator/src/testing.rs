//! Scripted collaborators for unit tests

use crate::ai::{GenerateRequest, GenerateResponse, LlmProvider, ToolCall, Turn};
use crate::error::{OrchestratorError, Result};
use crate::mcp::{CapabilityDescriptor, ServerInfo, SessionConnector, ToolSession};
use crate::tasks::capture;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

type Responder = dyn Fn(&str, &Value) -> Result<String> + Send + Sync;

struct StubState {
    calls: Mutex<Vec<(String, Value)>>,
    responder: Box<Responder>,
    delay: Option<Duration>,
    closed: AtomicBool,
    fail_initialize: bool,
}

/// Tool session that records every call and answers through a closure
#[derive(Clone)]
pub struct StubSession {
    state: Arc<StubState>,
}

impl StubSession {
    pub fn new() -> Self {
        Self::with_responder(|_, _| Ok("[]".to_string()))
    }

    pub fn with_responder(
        responder: impl Fn(&str, &Value) -> Result<String> + Send + Sync + 'static,
    ) -> Self {
        Self::build(Box::new(responder), None, false)
    }

    /// Every call sleeps for `delay` before answering
    pub fn slow(delay: Duration) -> Self {
        Self::build(Box::new(|_, _| Ok("[]".to_string())), Some(delay), false)
    }

    pub fn failing_initialize() -> Self {
        Self::build(Box::new(|_, _| Ok("[]".to_string())), None, true)
    }

    fn build(responder: Box<Responder>, delay: Option<Duration>, fail_initialize: bool) -> Self {
        Self {
            state: Arc::new(StubState {
                calls: Mutex::new(Vec::new()),
                responder,
                delay,
                closed: AtomicBool::new(false),
                fail_initialize,
            }),
        }
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.state.calls.lock().clone()
    }

    pub fn calls_named(&self, name: &str) -> Vec<Value> {
        self.calls()
            .into_iter()
            .filter(|(n, _)| n == name)
            .map(|(_, args)| args)
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolSession for StubSession {
    async fn initialize(&self) -> Result<ServerInfo> {
        if self.state.fail_initialize {
            return Err(OrchestratorError::TransportFailure("connection refused".to_string()));
        }
        Ok(ServerInfo {
            name: "stub".to_string(),
            version: "0".to_string(),
        })
    }

    async fn list_capabilities(&self) -> Result<Vec<CapabilityDescriptor>> {
        Ok(vec![CapabilityDescriptor {
            name: "query_graph".to_string(),
            description: String::new(),
            input_schema: json!({"type": "object"}),
        }])
    }

    async fn call(&self, name: &str, arguments: Value) -> Result<String> {
        self.state.calls.lock().push((name.to_string(), arguments.clone()));
        if let Some(delay) = self.state.delay {
            tokio::time::sleep(delay).await;
        }
        (self.state.responder)(name, &arguments)
    }

    async fn close(&self) {
        self.state.closed.store(true, Ordering::SeqCst);
    }
}

pub struct StubConnector {
    session: StubSession,
}

impl StubConnector {
    pub fn new(session: StubSession) -> Self {
        Self { session }
    }
}

#[async_trait]
impl SessionConnector for StubConnector {
    async fn connect(&self, _address: &str) -> Result<Box<dyn ToolSession>> {
        Ok(Box::new(self.session.clone()))
    }
}

/// Provider that replays a script of responses and records each request.
/// Every call emits a line naming the first user turn, so tests can check
/// which task a provider round-trip was attributed to.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<GenerateResponse>>,
    repeat: Option<GenerateResponse>,
    requests: Mutex<Vec<GenerateRequest>>,
    delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn sequence(responses: Vec<GenerateResponse>) -> Self {
        Self {
            script: Mutex::new(responses.into()),
            repeat: None,
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn always(response: GenerateResponse) -> Self {
        Self {
            repeat: Some(response),
            ..Self::sequence(vec![])
        }
    }

    pub fn text(text: &str) -> Self {
        Self::always(GenerateResponse::Text(text.to_string()))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse> {
        let first_user = request
            .transcript
            .iter()
            .find_map(|t| match t {
                Turn::User { text } => Some(text.clone()),
                _ => None,
            })
            .unwrap_or_default();
        capture::emit(format!("provider saw prompt '{}'", first_user));

        self.requests.lock().push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.script.lock().pop_front();
        next.or_else(|| self.repeat.clone())
            .ok_or_else(|| OrchestratorError::Internal("provider script exhausted".to_string()))
    }
}

/// A `query_graph` request with an optional graph list
pub fn query_call(id: &str, query: &str, graphs: Option<&[&str]>) -> ToolCall {
    let mut arguments = json!({ "query": query });
    if let Some(graphs) = graphs {
        arguments["graphs"] = json!(graphs);
    }
    ToolCall {
        id: id.to_string(),
        name: "query_graph".to_string(),
        arguments,
    }
}

pub fn tool_calls(calls: Vec<ToolCall>) -> GenerateResponse {
    GenerateResponse::ToolCalls {
        text: String::new(),
        calls,
    }
}

/// Application state wired to stubs, for handler tests
pub fn app_state(
    provider: ScriptedProvider,
    session: StubSession,
    skills_dir: impl Into<std::path::PathBuf>,
) -> actix_web::web::Data<crate::AppState> {
    let config = crate::config::Config::from_env();
    let runtime = Arc::new(crate::agent::AgentRuntime {
        connector: Arc::new(StubConnector::new(session)),
        provider: Arc::new(provider),
        mcp_address: "http://stub/mcp".to_string(),
        max_iterations: 5,
        default_graphs: vec!["Grynya".to_string()],
        bookkeeping_graph: "Grynya".to_string(),
        default_model: "gemini-test".to_string(),
    });
    actix_web::web::Data::new(crate::AppState {
        registry: Arc::new(crate::tasks::TaskRegistry::new(runtime.clone(), 500)),
        research: Arc::new(crate::agent::ResearchService::new(runtime, skills_dir)),
        config,
    })
}
