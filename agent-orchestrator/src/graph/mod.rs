//! Graph store contract and its implementation over a remote tool session

use crate::ai::ToolDeclaration;
use crate::error::Result;
use crate::mcp::ToolSession;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

pub const QUERY_GRAPH: &str = "query_graph";
pub const ADD_NODE: &str = "add_node";
pub const LINK_NODES: &str = "link_nodes";

/// The single capability the model may invoke
pub fn query_graph_declaration() -> ToolDeclaration {
    ToolDeclaration {
        name: QUERY_GRAPH.to_string(),
        description: "Run a read-only Cypher query against one or more knowledge graphs and return the result rows as JSON.".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Cypher query to execute"
                },
                "graphs": {
                    "type": "array",
                    "description": "Names of the graphs to query; defaults apply when omitted",
                    "items": { "type": "string" }
                }
            },
            "required": ["query"]
        }),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeLink {
    pub from: String,
    pub to: String,
    pub relation: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
}

impl NodeLink {
    pub fn new(from: impl Into<String>, to: impl Into<String>, relation: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            relation: relation.into(),
            properties: Map::new(),
        }
    }
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Add a typed node, returning its id
    async fn add_node(&self, graph: &str, label: &str, properties: Map<String, Value>) -> Result<String>;

    /// Create several relationships at once, returning how many were sent
    async fn link_nodes(&self, graph: &str, links: Vec<NodeLink>) -> Result<usize>;

    async fn query(&self, graph: &str, cypher: &str) -> Result<String>;
}

/// Graph store backed by the capabilities of an open tool session
pub struct RemoteGraphStore<'a> {
    session: &'a dyn ToolSession,
}

impl<'a> RemoteGraphStore<'a> {
    pub fn new(session: &'a dyn ToolSession) -> Self {
        Self { session }
    }
}

#[async_trait]
impl GraphStore for RemoteGraphStore<'_> {
    async fn add_node(&self, graph: &str, label: &str, mut properties: Map<String, Value>) -> Result<String> {
        let id = match properties.get("id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => {
                let id = format!("{}_{}", label.to_lowercase(), Uuid::new_v4().simple());
                properties.insert("id".to_string(), Value::String(id.clone()));
                id
            }
        };

        self.session
            .call(
                ADD_NODE,
                json!({"graph": graph, "label": label, "properties": properties}),
            )
            .await?;
        Ok(id)
    }

    async fn link_nodes(&self, graph: &str, links: Vec<NodeLink>) -> Result<usize> {
        if links.is_empty() {
            return Ok(0);
        }
        let count = links.len();
        self.session
            .call(LINK_NODES, json!({"graph": graph, "links": links}))
            .await?;
        Ok(count)
    }

    async fn query(&self, graph: &str, cypher: &str) -> Result<String> {
        self.session
            .call(QUERY_GRAPH, json!({"query": cypher, "graphs": [graph]}))
            .await
    }
}

/// Node ids found in a query result: every string under an `id` key, in
/// first-seen order, without duplicates. Non-JSON output yields nothing.
pub fn extract_node_ids(output: &str) -> Vec<String> {
    fn walk(value: &Value, out: &mut Vec<String>) {
        match value {
            Value::Object(map) => {
                for (key, v) in map {
                    if key == "id" {
                        if let Some(id) = v.as_str() {
                            if !out.iter().any(|seen| seen == id) {
                                out.push(id.to_string());
                            }
                            continue;
                        }
                    }
                    walk(v, out);
                }
            }
            Value::Array(items) => items.iter().for_each(|v| walk(v, out)),
            _ => {}
        }
    }

    let mut ids = Vec::new();
    if let Ok(value) = serde_json::from_str::<Value>(output) {
        walk(&value, &mut ids);
    }
    ids
}
