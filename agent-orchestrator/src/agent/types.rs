use crate::ai::Turn;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct LoopRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub model: String,
    /// Graphs used for any invocation that does not name its own
    pub default_graphs: Vec<String>,
}

/// Why the loop stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StopReason {
    /// Model answered with plain text
    Completed,
    /// Provider returned no candidate (e.g. safety block)
    NoCandidates { reason: String },
    /// Iteration bound reached without a final text answer
    IterationLimit,
}

/// Audit record of one capability invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRecord {
    pub call_id: String,
    pub name: String,
    /// Literal query (or argument) text as supplied by the model
    pub query: Option<String>,
    /// Graphs the invocation ran against after default fallback
    pub graphs: Vec<String>,
    pub succeeded: bool,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopOutcome {
    pub text: String,
    pub stop_reason: StopReason,
    /// Provider round-trips performed
    pub iterations: usize,
    pub queries_executed: Vec<String>,
    pub graphs_touched: Vec<String>,
    pub invocations: Vec<InvocationRecord>,
}

/// Mutable state of one loop invocation
#[derive(Debug)]
pub(crate) struct LoopState {
    pub transcript: Vec<Turn>,
    pub queries: Vec<String>,
    pub graphs_touched: Vec<String>,
    pub invocations: Vec<InvocationRecord>,
    pub iteration: usize,
    default_graphs: Vec<String>,
}

impl LoopState {
    pub fn new(request: &LoopRequest) -> Self {
        Self {
            transcript: vec![Turn::user(request.prompt.clone())],
            queries: Vec::new(),
            graphs_touched: Vec::new(),
            invocations: Vec::new(),
            iteration: 0,
            default_graphs: request.default_graphs.clone(),
        }
    }

    pub fn default_graphs(&self) -> &[String] {
        &self.default_graphs
    }

    /// Accumulate graphs across the whole loop, keeping first-seen order
    pub fn touch_graphs(&mut self, graphs: &[String]) {
        for graph in graphs {
            if !self.graphs_touched.contains(graph) {
                self.graphs_touched.push(graph.clone());
            }
        }
    }

    pub fn finish(self, text: String, stop_reason: StopReason) -> LoopOutcome {
        let graphs_touched = if self.graphs_touched.is_empty() {
            self.default_graphs
        } else {
            self.graphs_touched
        };

        LoopOutcome {
            text,
            stop_reason,
            iterations: self.iteration,
            queries_executed: self.queries,
            graphs_touched,
            invocations: self.invocations,
        }
    }
}
