use super::{Skill, SkillMetadata};
use crate::error::{OrchestratorError, Result};
use std::path::{Path, PathBuf};

/// Parse a skill file: frontmatter between `---` lines, then the prompt body
pub fn parse_skill_file(content: &str, path: &str) -> Result<Skill> {
    let content = content.trim();

    if !content.starts_with("---") {
        return Err(OrchestratorError::Skill(format!(
            "{} must start with frontmatter (---)",
            path
        )));
    }

    let rest = &content[3..];
    let end_idx = rest.find("\n---").ok_or_else(|| {
        OrchestratorError::Skill(format!("{}: missing closing --- for frontmatter", path))
    })?;

    let frontmatter = rest[..end_idx].trim();
    let prompt = rest[end_idx + 4..].trim().to_string();

    let metadata = parse_frontmatter(frontmatter);

    if metadata.name.is_empty() {
        return Err(OrchestratorError::Skill(format!("{}: skill name is required", path)));
    }
    if prompt.is_empty() {
        return Err(OrchestratorError::Skill(format!("{}: skill has no prompt body", path)));
    }

    Ok(Skill {
        metadata,
        prompt,
        path: path.to_string(),
    })
}

pub async fn load_skill_from_file(path: &Path) -> Result<Skill> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| OrchestratorError::Skill(format!("Failed to read {}: {}", path.display(), e)))?;

    parse_skill_file(&content, &path.to_string_lossy())
}

/// Locate a skill by name: `<dir>/<name>.md`, then `<dir>/<name>/SKILL.md`,
/// then any skill in the directory whose frontmatter name matches
pub async fn find_skill(dir: &Path, name: &str) -> Result<Skill> {
    if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
        return Err(OrchestratorError::Skill(format!("Invalid skill name '{}'", name)));
    }

    let candidates: [PathBuf; 2] = [dir.join(format!("{}.md", name)), dir.join(name).join("SKILL.md")];
    for candidate in &candidates {
        if tokio::fs::metadata(candidate).await.is_ok() {
            return load_skill_from_file(candidate).await;
        }
    }

    load_skills_from_directory(dir)
        .await?
        .into_iter()
        .find(|skill| skill.metadata.name == name)
        .ok_or_else(|| {
            OrchestratorError::Skill(format!("Skill '{}' not found in {}", name, dir.display()))
        })
}

/// Load every skill in a directory; files that fail to parse are skipped
pub async fn load_skills_from_directory(dir: &Path) -> Result<Vec<Skill>> {
    let mut skills = Vec::new();

    if tokio::fs::metadata(dir).await.is_err() {
        return Ok(skills);
    }

    let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| {
        OrchestratorError::Skill(format!("Failed to read directory {}: {}", dir.display(), e))
    })?;

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| OrchestratorError::Skill(e.to_string()))?
    {
        let path = entry.path();

        let skill_file = if path.is_dir() {
            let dir_name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
            if dir_name == "inactive" || dir_name == "disabled" || dir_name.starts_with('_') {
                log::debug!("Skipping inactive skills directory: {}", path.display());
                continue;
            }
            path.join("SKILL.md")
        } else if path.extension().map(|e| e == "md").unwrap_or(false) {
            path
        } else {
            continue;
        };

        if !skill_file.is_file() {
            continue;
        }
        match load_skill_from_file(&skill_file).await {
            Ok(skill) => {
                log::debug!("Loaded skill '{}' from {}", skill.metadata.name, skill_file.display());
                skills.push(skill);
            }
            Err(e) => log::debug!("Skipping {}: {}", skill_file.display(), e),
        }
    }

    skills.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
    Ok(skills)
}

/// Minimal frontmatter reader for the flat keys a skill uses
fn parse_frontmatter(yaml: &str) -> SkillMetadata {
    let mut metadata = SkillMetadata::default();
    let mut current_key = String::new();

    for line in yaml.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        if let Some(item) = trimmed.strip_prefix("- ") {
            if current_key == "tags" {
                metadata.tags.push(unquote(item));
            }
            continue;
        }

        if let Some((key, value)) = trimmed.split_once(':') {
            let key = key.trim();
            let value = value.trim();
            current_key = key.to_string();

            match key {
                "name" => metadata.name = unquote(value),
                "description" => metadata.description = unquote(value),
                "version" => metadata.version = unquote(value),
                "tags" if value.starts_with('[') => metadata.tags = parse_inline_list(value),
                _ => {}
            }
        }
    }

    metadata
}

fn unquote(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')))
    {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}

fn parse_inline_list(s: &str) -> Vec<String> {
    let s = s.trim();
    if s.starts_with('[') && s.ends_with(']') {
        s[1..s.len() - 1]
            .split(',')
            .map(unquote)
            .filter(|item| !item.is_empty())
            .collect()
    } else {
        vec![]
    }
}
