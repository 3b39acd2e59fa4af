//! Synchronous research run: skill-driven loop plus provenance write-back

use super::{AgentRuntime, LoopOutcome, LoopRequest, StopReason};
use crate::error::{catch_panic, Result};
use crate::graph::{extract_node_ids, GraphStore, NodeLink, RemoteGraphStore};
use crate::mcp::ToolSession;
use crate::skills::find_skill;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map};
use std::path::PathBuf;
use std::sync::Arc;

pub const DERIVED_FROM: &str = "DERIVED_FROM";
pub const DEFAULT_SKILL: &str = "graph-research";

#[derive(Debug, Clone, Deserialize)]
pub struct ResearchRequest {
    pub query: String,
    #[serde(default)]
    pub graphs: Option<Vec<String>>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub skill: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResearchResponse {
    pub status: String,
    pub research_node_id: String,
    pub summary: String,
    pub graphs_searched: Vec<String>,
    pub queries_executed_count: usize,
    pub source_nodes_found: usize,
    pub is_empty: bool,
}

pub struct ResearchService {
    runtime: Arc<AgentRuntime>,
    skills_dir: PathBuf,
}

impl ResearchService {
    pub fn new(runtime: Arc<AgentRuntime>, skills_dir: impl Into<PathBuf>) -> Self {
        Self {
            runtime,
            skills_dir: skills_dir.into(),
        }
    }

    pub async fn run(&self, request: ResearchRequest) -> Result<ResearchResponse> {
        let skill_name = request.skill.clone().unwrap_or_else(|| DEFAULT_SKILL.to_string());
        let skill = find_skill(&self.skills_dir, &skill_name).await?;
        let model = self.runtime.resolve_model(request.model.clone());
        self.runtime.provider.validate_model(&model)?;

        let graphs = match &request.graphs {
            Some(graphs) if !graphs.is_empty() => graphs.clone(),
            _ => self.runtime.default_graphs.clone(),
        };

        log::info!(
            "[RESEARCH] '{}' with skill {} on {:?} (model {})",
            request.query,
            skill.metadata.name,
            graphs,
            model
        );

        let session = self.runtime.connector.connect(&self.runtime.mcp_address).await?;
        let result = catch_panic(self.with_session(
            session.as_ref(),
            &request,
            &skill.metadata.name,
            skill.prompt,
            model,
            graphs,
        ))
        .await;
        session.close().await;
        result
    }

    async fn with_session(
        &self,
        session: &dyn ToolSession,
        request: &ResearchRequest,
        skill_name: &str,
        system_prompt: String,
        model: String,
        graphs: Vec<String>,
    ) -> Result<ResearchResponse> {
        session.initialize().await?;

        let outcome = self
            .runtime
            .agent_loop()
            .run(
                session,
                LoopRequest {
                    prompt: request.query.clone(),
                    system_prompt: Some(system_prompt),
                    model: model.clone(),
                    default_graphs: graphs,
                },
            )
            .await?;

        if let StopReason::NoCandidates { reason } = &outcome.stop_reason {
            log::warn!("[RESEARCH] Provider returned no candidates: {}", reason);
        }

        let sources = source_node_ids(&outcome);
        let store = RemoteGraphStore::new(session);
        let research_node_id = self
            .persist(&store, request, skill_name, &model, &outcome, &sources)
            .await?;

        log::info!(
            "[RESEARCH] Stored {} with {} source link(s) after {} query(ies)",
            research_node_id,
            sources.len(),
            outcome.queries_executed.len()
        );

        Ok(ResearchResponse {
            status: "success".to_string(),
            research_node_id,
            summary: outcome.text,
            graphs_searched: outcome.graphs_touched,
            queries_executed_count: outcome.queries_executed.len(),
            source_nodes_found: sources.len(),
            is_empty: sources.is_empty(),
        })
    }

    async fn persist(
        &self,
        store: &dyn GraphStore,
        request: &ResearchRequest,
        skill_name: &str,
        model: &str,
        outcome: &LoopOutcome,
        sources: &[String],
    ) -> Result<String> {
        let graph = &self.runtime.bookkeeping_graph;

        let mut properties = Map::new();
        properties.insert("query".to_string(), json!(request.query));
        properties.insert("summary".to_string(), json!(outcome.text));
        properties.insert("skill".to_string(), json!(skill_name));
        properties.insert("model".to_string(), json!(model));
        properties.insert("graphs".to_string(), json!(outcome.graphs_touched));
        properties.insert("queries".to_string(), json!(outcome.queries_executed));
        properties.insert("created_at".to_string(), json!(Utc::now().to_rfc3339()));

        let node_id = store.add_node(graph, "Research", properties).await?;

        let links = sources
            .iter()
            .map(|source| NodeLink::new(&node_id, source, DERIVED_FROM))
            .collect();
        store.link_nodes(graph, links).await?;

        Ok(node_id)
    }
}

/// Ids referenced by successful invocations, first-seen order, unique
fn source_node_ids(outcome: &LoopOutcome) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for invocation in outcome.invocations.iter().filter(|i| i.succeeded) {
        for id in extract_node_ids(&invocation.output) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    ids
}
