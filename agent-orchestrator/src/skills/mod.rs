//! Research skills: markdown files whose body is a system prompt

pub mod loader;

pub use loader::find_skill;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkillMetadata {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skill {
    pub metadata: SkillMetadata,
    /// Markdown body, used verbatim as the system prompt
    pub prompt: String,
    pub path: String,
}
