//! Error taxonomy shared by the task registry, the agent loop, the provider
//! adapter and the remote tool session.

use futures_util::FutureExt;
use serde_json::{json, Value};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Task '{0}' not found")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Transport failure: {0}")]
    TransportFailure(String),

    #[error("Authentication failure: {0}")]
    AuthFailure(String),

    #[error("Provider rejected the request: {0}")]
    ProviderRejection(String),

    #[error("Unsupported model identifier '{0}'")]
    UnsupportedModel(String),

    #[error("Capability '{name}' failed: {message}")]
    CapabilityFailure { name: String, message: String },

    #[error("cancelled by caller")]
    Cancelled,

    #[error("Skill error: {0}")]
    Skill(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

impl OrchestratorError {
    /// Stable identifier used in JSON payloads
    pub fn kind(&self) -> &'static str {
        match self {
            OrchestratorError::NotFound(_) => "not_found",
            OrchestratorError::InvalidState(_) => "invalid_state",
            OrchestratorError::TransportFailure(_) => "transport_failure",
            OrchestratorError::AuthFailure(_) => "auth_failure",
            OrchestratorError::ProviderRejection(_) => "provider_rejection",
            OrchestratorError::UnsupportedModel(_) => "unsupported_model",
            OrchestratorError::CapabilityFailure { .. } => "capability_failure",
            OrchestratorError::Cancelled => "cancelled",
            OrchestratorError::Skill(_) => "skill",
            OrchestratorError::Internal(_) => "internal",
        }
    }

    /// Structured payload fed back to the model as a tool-response turn
    pub fn to_tool_payload(&self) -> Value {
        json!({
            "error": {
                "kind": self.kind(),
                "message": self.to_string(),
            }
        })
    }
}

impl From<reqwest::Error> for OrchestratorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            OrchestratorError::TransportFailure(format!("request timed out: {}", describe_error(&err)))
        } else {
            OrchestratorError::TransportFailure(describe_error(&err))
        }
    }
}

/// Render an error together with its whole source chain.
pub fn describe_error(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !out.contains(&text) {
            out.push_str(": caused by: ");
            out.push_str(&text);
        }
        source = cause.source();
    }
    out
}

/// Await `future`, turning a panic inside it into `Internal` so the caller
/// still reaches its teardown
pub async fn catch_panic<T>(future: impl Future<Output = Result<T>>) -> Result<T> {
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(OrchestratorError::Internal(format!(
            "panicked: {}",
            panic_message(panic.as_ref())
        ))),
    }
}

pub fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
