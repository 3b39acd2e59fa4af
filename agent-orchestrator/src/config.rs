use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::agent::loop_engine::DEFAULT_MAX_ITERATIONS;
use crate::ai::models::Backend;

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub mcp_server_url: String,
    pub gemini_token_path: String,
    pub gemini_endpoint: String,
    pub openai_api_key: Option<String>,
    pub openai_endpoint: String,
    pub default_model: String,
    /// Exact model ids mapped to a backend, checked before the family rules
    pub model_backends: Vec<(String, Backend)>,
    pub llm_request_timeout: Duration,
    pub mcp_request_timeout: Duration,
    pub max_iterations: usize,
    pub default_graphs: Vec<String>,
    pub bookkeeping_graph: String,
    pub skills_dir: String,
    pub task_retention: Duration,
    pub task_reap_interval: Duration,
    pub task_max_log_lines: usize,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: parse_or("PORT", 8080),
            mcp_server_url: env::var("MCP_SERVER_URL")
                .unwrap_or_else(|_| "http://localhost:8000/mcp".to_string()),
            gemini_token_path: env::var("GEMINI_TOKEN_PATH")
                .unwrap_or_else(|_| "credentials/token.json".to_string()),
            gemini_endpoint: env::var("GEMINI_ENDPOINT")
                .unwrap_or_else(|_| "https://generativelanguage.googleapis.com/v1beta".to_string()),
            openai_api_key: env::var("OPENAI_API_KEY").ok().filter(|k| !k.trim().is_empty()),
            openai_endpoint: env::var("OPENAI_ENDPOINT")
                .unwrap_or_else(|_| "https://api.openai.com/v1/chat/completions".to_string()),
            default_model: env::var("DEFAULT_MODEL")
                .unwrap_or_else(|_| "gemini-2.5-flash-thinking-exp".to_string()),
            model_backends: parse_model_backends(&env::var("MODEL_BACKENDS").unwrap_or_default()),
            llm_request_timeout: Duration::from_secs(parse_or("LLM_REQUEST_TIMEOUT_SECS", 120)),
            mcp_request_timeout: Duration::from_secs(parse_or("MCP_REQUEST_TIMEOUT_SECS", 60)),
            max_iterations: parse_or("AGENT_MAX_ITERATIONS", DEFAULT_MAX_ITERATIONS),
            default_graphs: parse_list(&env::var("DEFAULT_GRAPHS").unwrap_or_else(|_| "Grynya".to_string())),
            bookkeeping_graph: env::var("BOOKKEEPING_GRAPH").unwrap_or_else(|_| "Grynya".to_string()),
            skills_dir: env::var("SKILLS_DIR").unwrap_or_else(|_| "./skills".to_string()),
            task_retention: Duration::from_secs(parse_or("TASK_RETENTION_SECS", 3600)),
            task_reap_interval: Duration::from_secs(parse_or("TASK_REAP_INTERVAL_SECS", 300)),
            task_max_log_lines: parse_or("TASK_MAX_LOG_LINES", 2000),
        }
    }
}

fn parse_or<T: FromStr + Copy + std::fmt::Display>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            log::warn!("{}='{}' is not valid, using default {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}

/// Comma-separated list, blanks dropped
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// Parse `model=backend` pairs, e.g. `my-tuned-model=openai,gemini-exp=gemini`
pub fn parse_model_backends(raw: &str) -> Vec<(String, Backend)> {
    parse_list(raw)
        .into_iter()
        .filter_map(|entry| {
            let (model, backend) = entry.split_once('=')?;
            match backend.trim().parse::<Backend>() {
                Ok(b) => Some((model.trim().to_lowercase(), b)),
                Err(e) => {
                    log::warn!("Ignoring MODEL_BACKENDS entry '{}': {}", entry, e);
                    None
                }
            }
        })
        .collect()
}
