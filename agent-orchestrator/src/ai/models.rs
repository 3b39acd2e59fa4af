//! Model identifier → backend dispatch table
//!
//! Model ids are resolved against an explicit table instead of substring
//! matching: exact entries first (configured allow-list), then family rules
//! that match either the whole id or a `<family>-` prefix.

use crate::error::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Token-based Google backend (backend A)
    Gemini,
    /// API-key OpenAI backend (backend B)
    OpenAI,
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gemini" | "google" => Ok(Backend::Gemini),
            "openai" => Ok(Backend::OpenAI),
            other => Err(format!("unknown backend '{}'", other)),
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Gemini => write!(f, "gemini"),
            Backend::OpenAI => write!(f, "openai"),
        }
    }
}

const FAMILIES: &[(&str, Backend)] = &[
    ("gemini", Backend::Gemini),
    ("gpt", Backend::OpenAI),
    ("o1", Backend::OpenAI),
    ("o3", Backend::OpenAI),
];

#[derive(Debug, Clone, Default)]
pub struct ModelTable {
    exact: Vec<(String, Backend)>,
}

impl ModelTable {
    pub fn new(exact: Vec<(String, Backend)>) -> Self {
        Self {
            exact: exact
                .into_iter()
                .map(|(id, backend)| (id.to_lowercase(), backend))
                .collect(),
        }
    }

    /// Resolve a model id, failing with `UnsupportedModel` when nothing matches
    pub fn resolve(&self, model: &str) -> Result<Backend> {
        let id = model.trim().to_lowercase();
        if let Some((_, backend)) = self.exact.iter().find(|(m, _)| *m == id) {
            return Ok(*backend);
        }

        FAMILIES
            .iter()
            .find(|(family, _)| {
                id == *family
                    || id
                        .strip_prefix(family)
                        .is_some_and(|rest| rest.starts_with('-'))
            })
            .map(|(_, backend)| *backend)
            .ok_or_else(|| OrchestratorError::UnsupportedModel(model.to_string()))
    }
}
