//! Remote tool session: a live connection to an MCP capability provider
//!
//! `SessionConnector::connect` opens a session; the caller must `close()` it
//! on every exit path. Each `call` is a single attempt, retries are left to
//! the caller.

pub mod client;

pub use client::McpHttpConnector;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A capability advertised by the remote side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
}

#[async_trait]
pub trait ToolSession: Send + Sync {
    /// Protocol handshake; must complete before any other request
    async fn initialize(&self) -> Result<ServerInfo>;

    async fn list_capabilities(&self) -> Result<Vec<CapabilityDescriptor>>;

    /// Invoke a capability, returning its text output
    async fn call(&self, name: &str, arguments: Value) -> Result<String>;

    /// Tear the session down (best effort, never fails)
    async fn close(&self);
}

#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(&self, address: &str) -> Result<Box<dyn ToolSession>>;
}
