//! MCP client over the streamable HTTP transport
//!
//! Every JSON-RPC request is POSTed on its own; the server answers either with
//! a plain JSON body or with an event stream whose `data:` events carry the
//! response. Responses are correlated with requests by id.

use super::{CapabilityDescriptor, ServerInfo, SessionConnector, ToolSession};
use crate::error::{OrchestratorError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{header, Client, Url};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub const PROTOCOL_VERSION: &str = "2025-03-26";
const SESSION_HEADER: &str = "Mcp-Session-Id";

pub struct McpHttpConnector {
    client: Client,
}

impl McpHttpConnector {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OrchestratorError::Internal(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SessionConnector for McpHttpConnector {
    async fn connect(&self, address: &str) -> Result<Box<dyn ToolSession>> {
        let url = Url::parse(address).map_err(|e| {
            OrchestratorError::TransportFailure(format!("Invalid MCP address '{}': {}", address, e))
        })?;
        log::info!("[MCP] Opening session to {}", url);
        Ok(Box::new(McpHttpSession::new(self.client.clone(), url)))
    }
}

pub struct McpHttpSession {
    client: Client,
    url: Url,
    session_id: Mutex<Option<String>>,
    next_id: AtomicU64,
}

impl McpHttpSession {
    pub fn new(client: Client, url: Url) -> Self {
        Self {
            client,
            url,
            session_id: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    fn post(&self, body: &Value) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(self.url.clone())
            .header(header::ACCEPT, "application/json, text/event-stream")
            .json(body);
        if let Some(id) = self.session_id.lock().clone() {
            builder = builder.header(SESSION_HEADER, id);
        }
        builder
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut body = json!({"jsonrpc": "2.0", "id": id, "method": method});
        if let Some(p) = params {
            body["params"] = p;
        }

        log::debug!("[MCP] → {} (id {})", method, id);
        let response = self.post(&body).send().await?;

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.lock() = Some(session.to_string());
        }

        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(OrchestratorError::TransportFailure(format!(
                "{} returned status {}: {}",
                method, status, text
            )));
        }

        let messages = if content_type.starts_with("text/event-stream") {
            parse_sse_messages(&text)
        } else {
            parse_json_messages(&text)?
        };
        match_response(&messages, id, method)
    }

    async fn notify(&self, method: &str) -> Result<()> {
        let body = json!({"jsonrpc": "2.0", "method": method});
        let response = self.post(&body).send().await?;
        if !response.status().is_success() {
            return Err(OrchestratorError::TransportFailure(format!(
                "{} notification rejected with status {}",
                method,
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ToolSession for McpHttpSession {
    async fn initialize(&self) -> Result<ServerInfo> {
        let result = self
            .request(
                "initialize",
                Some(json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": "agent-orchestrator",
                        "version": env!("CARGO_PKG_VERSION")
                    }
                })),
            )
            .await?;

        self.notify("notifications/initialized").await?;

        let info: ServerInfo = serde_json::from_value(result["serverInfo"].clone()).unwrap_or_default();
        log::info!("[MCP] Session initialized with server '{}' {}", info.name, info.version);
        Ok(info)
    }

    async fn list_capabilities(&self) -> Result<Vec<CapabilityDescriptor>> {
        let result = self.request("tools/list", None).await?;
        serde_json::from_value(result["tools"].clone())
            .map_err(|e| OrchestratorError::TransportFailure(format!("Malformed tools/list result: {}", e)))
    }

    async fn call(&self, name: &str, arguments: Value) -> Result<String> {
        let result = self
            .request("tools/call", Some(json!({"name": name, "arguments": arguments})))
            .await?;
        tool_result_text(name, &result)
    }

    async fn close(&self) {
        let Some(session) = self.session_id.lock().take() else {
            return;
        };
        match self
            .client
            .delete(self.url.clone())
            .header(SESSION_HEADER, &session)
            .send()
            .await
        {
            Ok(_) => log::debug!("[MCP] Session {} closed", session),
            Err(e) => log::warn!("[MCP] Failed to close session {}: {}", session, e),
        }
    }
}

/// Collect the JSON payloads of every `data:` event in an SSE body
pub fn parse_sse_messages(body: &str) -> Vec<Value> {
    let mut messages = Vec::new();
    let mut data = String::new();

    let mut flush = |data: &mut String| {
        if !data.is_empty() {
            if let Ok(value) = serde_json::from_str::<Value>(data) {
                messages.push(value);
            }
            data.clear();
        }
    };

    for line in body.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            flush(&mut data);
        } else if let Some(rest) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    flush(&mut data);
    messages
}

fn parse_json_messages(body: &str) -> Result<Vec<Value>> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| OrchestratorError::TransportFailure(format!("Malformed JSON-RPC body: {}", e)))?;
    Ok(match value {
        Value::Array(batch) => batch,
        single => vec![single],
    })
}

/// Find the response for `id`, turning JSON-RPC errors into transport failures
pub fn match_response(messages: &[Value], id: u64, method: &str) -> Result<Value> {
    let response = messages
        .iter()
        .find(|m| m.get("id").and_then(Value::as_u64) == Some(id))
        .ok_or_else(|| {
            OrchestratorError::TransportFailure(format!("No response to {} (id {})", method, id))
        })?;

    if let Some(error) = response.get("error") {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
        let message = error.get("message").and_then(Value::as_str).unwrap_or("unknown error");
        return Err(OrchestratorError::TransportFailure(format!(
            "{} failed with JSON-RPC error {}: {}",
            method, code, message
        )));
    }

    Ok(response.get("result").cloned().unwrap_or(Value::Null))
}

/// Text items of a `tools/call` result joined with newlines
pub fn tool_result_text(name: &str, result: &Value) -> Result<String> {
    let text = match result.get("content").and_then(Value::as_array) {
        Some(items) => items
            .iter()
            .filter_map(|item| item.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        None => String::new(),
    };
    let text = if text.is_empty() {
        result
            .get("structuredContent")
            .map(|v| v.to_string())
            .unwrap_or_default()
    } else {
        text
    };

    if result.get("isError").and_then(Value::as_bool).unwrap_or(false) {
        return Err(OrchestratorError::CapabilityFailure {
            name: name.to_string(),
            message: text,
        });
    }
    Ok(text)
}
