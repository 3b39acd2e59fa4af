//! Bounded multi-turn exchange between the provider and a tool session

use super::types::{InvocationRecord, LoopOutcome, LoopRequest, LoopState, StopReason};
use crate::ai::{GenerateRequest, GenerateResponse, LlmProvider, ToolCall, Turn};
use crate::error::{OrchestratorError, Result};
use crate::graph::{query_graph_declaration, QUERY_GRAPH};
use crate::mcp::ToolSession;
use crate::tasks::capture;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::task::AbortOnDropHandle;

pub const DEFAULT_MAX_ITERATIONS: usize = 10;

pub struct AgenticLoop {
    provider: Arc<dyn LlmProvider>,
    max_iterations: usize,
}

impl AgenticLoop {
    pub fn new(provider: Arc<dyn LlmProvider>, max_iterations: usize) -> Self {
        Self {
            provider,
            max_iterations: max_iterations.max(1),
        }
    }

    pub async fn run(&self, session: &dyn ToolSession, request: LoopRequest) -> Result<LoopOutcome> {
        let tools = vec![query_graph_declaration()];
        let mut state = LoopState::new(&request);

        while state.iteration < self.max_iterations {
            state.iteration += 1;
            capture::emit(format!(
                "[AGENT_LOOP] Iteration {}/{} ({} turns)",
                state.iteration,
                self.max_iterations,
                state.transcript.len()
            ));

            let response = self
                .generate(GenerateRequest {
                    model: request.model.clone(),
                    system_prompt: request.system_prompt.clone(),
                    transcript: state.transcript.clone(),
                    tools: tools.clone(),
                })
                .await?;

            match response {
                GenerateResponse::NoCandidates { reason } => {
                    capture::emit(format!("[AGENT_LOOP] Provider returned no candidates: {}", reason));
                    return Ok(state.finish(String::new(), StopReason::NoCandidates { reason }));
                }
                GenerateResponse::Text(text) => {
                    capture::emit(format!(
                        "[AGENT_LOOP] Final answer after {} iteration(s), {} invocation(s)",
                        state.iteration,
                        state.invocations.len()
                    ));
                    return Ok(state.finish(text, StopReason::Completed));
                }
                GenerateResponse::ToolCalls { text, calls } => {
                    capture::emit(format!(
                        "[AGENT_LOOP] Model requested {} invocation(s): {:?}",
                        calls.len(),
                        calls.iter().map(|c| &c.name).collect::<Vec<_>>()
                    ));

                    // Strictly in response order, one at a time
                    let mut responses = Vec::with_capacity(calls.len());
                    for call in &calls {
                        responses.push(self.invoke(session, call, &mut state).await);
                    }

                    state.transcript.push(Turn::Model {
                        text,
                        tool_calls: calls,
                    });
                    state.transcript.extend(responses);
                }
            }
        }

        capture::emit(format!(
            "[AGENT_LOOP] Iteration limit ({}) reached without a final answer",
            self.max_iterations
        ));
        let summary = format!(
            "Iteration limit reached after {} iterations without a final answer. \
             Partial results were retained: {} capability invocation(s), {} query(ies) executed.",
            self.max_iterations,
            state.invocations.len(),
            state.queries.len()
        );
        Ok(state.finish(summary, StopReason::IterationLimit))
    }

    /// Provider round-trip on its own tokio task so the calling unit only
    /// waits at an await point. Dropping the returned future aborts it.
    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse> {
        let provider = self.provider.clone();
        let handle = AbortOnDropHandle::new(capture::spawn_in_context(async move {
            provider.generate(request).await
        }));

        handle
            .await
            .map_err(|e| OrchestratorError::Internal(format!("provider task failed: {}", e)))?
    }

    /// Execute one invocation. Failures become a structured error payload
    /// in the transcript instead of aborting the loop.
    async fn invoke(&self, session: &dyn ToolSession, call: &ToolCall, state: &mut LoopState) -> Turn {
        let mut arguments = match &call.arguments {
            Value::Object(_) => call.arguments.clone(),
            other => {
                // Kept verbatim for the audit record and quoted back to the model
                let raw = match other {
                    Value::String(text) => text.clone(),
                    value => value.to_string(),
                };
                let err = OrchestratorError::CapabilityFailure {
                    name: call.name.clone(),
                    message: format!("malformed arguments, expected a JSON object: {}", raw),
                };
                return record(state, call, Some(raw), Vec::new(), Err(err));
            }
        };

        let query = match arguments.get("query") {
            Some(Value::String(q)) => Some(q.clone()),
            Some(_) | None if call.name != QUERY_GRAPH => Some(call.arguments.to_string()),
            _ => None,
        };

        let named: Vec<String> = arguments
            .get("graphs")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|g| g.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default();
        let graphs = if named.is_empty() {
            let defaults = state.default_graphs().to_vec();
            if call.name == QUERY_GRAPH {
                arguments["graphs"] = Value::from(defaults.clone());
            }
            defaults
        } else {
            named
        };

        let result = if call.name == QUERY_GRAPH && query.is_none() {
            Err(OrchestratorError::CapabilityFailure {
                name: call.name.clone(),
                message: "missing required argument 'query'".to_string(),
            })
        } else {
            if let Some(q) = &query {
                state.queries.push(q.clone());
            }
            state.touch_graphs(&graphs);
            session.call(&call.name, arguments).await
        };

        record(state, call, query, graphs, result)
    }
}

/// Append the audit record for one invocation and build its transcript turn
fn record(
    state: &mut LoopState,
    call: &ToolCall,
    query: Option<String>,
    graphs: Vec<String>,
    result: Result<String>,
) -> Turn {
    let (content, succeeded, output) = match result {
        Ok(output) => {
            capture::emit(format!(
                "[AGENT_LOOP] {} on {:?} returned {} bytes",
                call.name,
                graphs,
                output.len()
            ));
            (Value::String(output.clone()), true, output)
        }
        Err(e) => {
            capture::emit(format!("[AGENT_LOOP] {} failed: {}", call.name, e));
            (e.to_tool_payload(), false, e.to_string())
        }
    };

    state.invocations.push(InvocationRecord {
        call_id: call.id.clone(),
        name: call.name.clone(),
        query,
        graphs,
        succeeded,
        output,
    });

    Turn::ToolResponse {
        call_id: call.id.clone(),
        name: call.name.clone(),
        content,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{query_call, tool_calls, ScriptedProvider, StubSession};
    use serde_json::json;

    fn request(defaults: &[&str]) -> LoopRequest {
        LoopRequest {
            prompt: "summarize last session".to_string(),
            system_prompt: Some("You are a graph analyst".to_string()),
            model: "gemini-test".to_string(),
            default_graphs: defaults.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_plain_text_ends_after_one_call() {
        let provider = Arc::new(ScriptedProvider::text("OK"));
        let session = StubSession::new();
        let engine = AgenticLoop::new(provider.clone(), DEFAULT_MAX_ITERATIONS);

        let outcome = engine.run(&session, request(&["G"])).await.unwrap();

        assert_eq!(outcome.text, "OK");
        assert_eq!(outcome.stop_reason, StopReason::Completed);
        assert_eq!(provider.call_count(), 1);
        assert!(outcome.invocations.is_empty());
        assert!(session.calls().is_empty());
    }

    #[tokio::test]
    async fn test_iteration_limit_bounds_the_loop() {
        let provider = Arc::new(ScriptedProvider::always(tool_calls(vec![query_call(
            "c",
            "MATCH (n) RETURN n",
            None,
        )])));
        let session = StubSession::new();
        let engine = AgenticLoop::new(provider.clone(), 4);

        let outcome = engine.run(&session, request(&["G"])).await.unwrap();

        assert_eq!(outcome.stop_reason, StopReason::IterationLimit);
        assert!(outcome.text.contains("Iteration limit"));
        assert_eq!(outcome.iterations, 4);
        assert_eq!(provider.call_count(), 4);
        assert_eq!(outcome.invocations.len(), 4);
        assert_eq!(session.calls().len(), 4);
    }

    #[tokio::test]
    async fn test_default_graphs_when_none_named() {
        let provider = Arc::new(ScriptedProvider::sequence(vec![
            tool_calls(vec![query_call("a", "MATCH (a) RETURN a", None)]),
            GenerateResponse::Text("done".to_string()),
        ]));
        let session = StubSession::new();
        let engine = AgenticLoop::new(provider, DEFAULT_MAX_ITERATIONS);

        let outcome = engine.run(&session, request(&["Grynya", "Archive"])).await.unwrap();

        assert_eq!(outcome.graphs_touched, vec!["Grynya", "Archive"]);
        // Defaults are forwarded to the remote call as well
        assert_eq!(session.calls()[0].1["graphs"], json!(["Grynya", "Archive"]));
    }

    #[tokio::test]
    async fn test_no_invocations_still_reports_defaults() {
        let engine = AgenticLoop::new(Arc::new(ScriptedProvider::text("nothing to do")), 3);
        let outcome = engine.run(&StubSession::new(), request(&["G1"])).await.unwrap();
        assert_eq!(outcome.graphs_touched, vec!["G1"]);
    }

    #[tokio::test]
    async fn test_queries_recorded_in_invocation_order() {
        let provider = Arc::new(ScriptedProvider::sequence(vec![
            tool_calls(vec![
                query_call("1", "MATCH (r:Request) RETURN r.id", Some(&["A"])),
                query_call("2", "MATCH (s:Session {id: 'session_002'}) RETURN s", None),
            ]),
            tool_calls(vec![query_call("3", "MATCH (e:Entity) RETURN toLower(e.name)", Some(&["B", "A"]))]),
            GenerateResponse::Text("summary".to_string()),
        ]));
        let session = StubSession::new();
        let engine = AgenticLoop::new(provider.clone(), DEFAULT_MAX_ITERATIONS);

        let outcome = engine.run(&session, request(&["D"])).await.unwrap();

        assert_eq!(
            outcome.queries_executed,
            vec![
                "MATCH (r:Request) RETURN r.id",
                "MATCH (s:Session {id: 'session_002'}) RETURN s",
                "MATCH (e:Entity) RETURN toLower(e.name)",
            ]
        );
        assert_eq!(outcome.graphs_touched, vec!["A", "D", "B"]);
        let executed: Vec<_> = session
            .calls_named("query_graph")
            .iter()
            .map(|args| args["query"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(executed, outcome.queries_executed);

        // Model turn and both tool responses are fed back on the next call
        let second = &provider.requests()[1];
        assert_eq!(second.transcript.len(), 4);
        assert!(matches!(&second.transcript[2], Turn::ToolResponse { call_id, .. } if call_id == "1"));
        assert!(matches!(&second.transcript[3], Turn::ToolResponse { call_id, .. } if call_id == "2"));
    }

    #[tokio::test]
    async fn test_invocation_failure_is_fed_back() {
        let provider = Arc::new(ScriptedProvider::sequence(vec![
            tool_calls(vec![
                query_call("bad", "MATCH broken", None),
                query_call("good", "MATCH (n) RETURN n", None),
            ]),
            GenerateResponse::Text("recovered".to_string()),
        ]));
        let session = StubSession::with_responder(|_, args| {
            if args["query"] == "MATCH broken" {
                Err(OrchestratorError::TransportFailure("syntax error".to_string()))
            } else {
                Ok("[]".to_string())
            }
        });
        let engine = AgenticLoop::new(provider.clone(), DEFAULT_MAX_ITERATIONS);

        let outcome = engine.run(&session, request(&["G"])).await.unwrap();

        assert_eq!(outcome.text, "recovered");
        assert!(!outcome.invocations[0].succeeded);
        assert!(outcome.invocations[1].succeeded);
        match &provider.requests()[1].transcript[2] {
            Turn::ToolResponse { content, .. } => {
                assert_eq!(content["error"]["kind"], "transport_failure");
            }
            other => panic!("unexpected turn: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_query_argument_is_not_sent() {
        let provider = Arc::new(ScriptedProvider::sequence(vec![
            tool_calls(vec![ToolCall {
                id: "x".to_string(),
                name: "query_graph".to_string(),
                arguments: json!({"graphs": ["G"]}),
            }]),
            GenerateResponse::Text("ok".to_string()),
        ]));
        let session = StubSession::new();
        let outcome = AgenticLoop::new(provider, 5)
            .run(&session, request(&["G"]))
            .await
            .unwrap();

        assert!(session.calls().is_empty());
        assert!(outcome.queries_executed.is_empty());
        assert!(!outcome.invocations[0].succeeded);
    }

    #[tokio::test]
    async fn test_malformed_arguments_are_audited_and_reported() {
        let provider = Arc::new(ScriptedProvider::sequence(vec![
            tool_calls(vec![ToolCall {
                id: "m".to_string(),
                name: "query_graph".to_string(),
                arguments: Value::String("{not json".to_string()),
            }]),
            GenerateResponse::Text("gave up".to_string()),
        ]));
        let session = StubSession::new();
        let outcome = AgenticLoop::new(provider.clone(), 5)
            .run(&session, request(&["G"]))
            .await
            .unwrap();

        assert!(session.calls().is_empty());
        assert!(outcome.queries_executed.is_empty());
        let record = &outcome.invocations[0];
        assert!(!record.succeeded);
        assert_eq!(record.query.as_deref(), Some("{not json"));

        match &provider.requests()[1].transcript[2] {
            Turn::ToolResponse { content, .. } => {
                assert_eq!(content["error"]["kind"], "capability_failure");
                assert!(content["error"]["message"].as_str().unwrap().contains("{not json"));
            }
            other => panic!("unexpected turn: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_no_candidates_is_a_terminal_outcome() {
        let provider = Arc::new(ScriptedProvider::always(GenerateResponse::NoCandidates {
            reason: "prompt blocked: SAFETY".to_string(),
        }));
        let outcome = AgenticLoop::new(provider.clone(), 5)
            .run(&StubSession::new(), request(&["G"]))
            .await
            .unwrap();

        assert_eq!(outcome.text, "");
        assert_eq!(
            outcome.stop_reason,
            StopReason::NoCandidates {
                reason: "prompt blocked: SAFETY".to_string()
            }
        );
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_provider_error_aborts_the_loop() {
        let provider = Arc::new(ScriptedProvider::sequence(vec![]));
        let result = AgenticLoop::new(provider, 5)
            .run(&StubSession::new(), request(&["G"]))
            .await;
        assert!(matches!(result, Err(OrchestratorError::Internal(_))));
    }
}
