//! Filesystem tools — read, write, edit, list directory.
//!
//! Path scoping has two modes plus a blacklist that applies on top of both:
//! - standard: optionally restricted to the workspace;
//! - evolutionary: restricted to an explicit whitelist of paths;
//! - protected paths (e.g. the config file) are always denied.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::base::{optional_i64, require_string, Tool};

// ─────────────────────────────────────────────
// Path policy
// ─────────────────────────────────────────────

/// Shared path-scoping rules for filesystem and shell tools.
#[derive(Clone, Debug, Default)]
pub struct PathPolicy {
    pub workspace: PathBuf,
    /// Standard mode: confine to the workspace.
    pub restrict_to_workspace: bool,
    /// Evolutionary mode: non-empty means only these roots are touchable.
    pub allowed_paths: Vec<PathBuf>,
    /// Always denied, whatever the mode.
    pub protected_paths: Vec<PathBuf>,
}

impl PathPolicy {
    pub fn workspace_only(workspace: PathBuf) -> Self {
        Self {
            workspace,
            restrict_to_workspace: true,
            allowed_paths: Vec::new(),
            protected_paths: Vec::new(),
        }
    }

    pub fn unrestricted(workspace: PathBuf) -> Self {
        Self {
            workspace,
            restrict_to_workspace: false,
            allowed_paths: Vec::new(),
            protected_paths: Vec::new(),
        }
    }

    pub fn with_protected(mut self, paths: Vec<PathBuf>) -> Self {
        self.protected_paths = paths;
        self
    }

    pub fn with_allowed(mut self, paths: Vec<PathBuf>) -> Self {
        self.allowed_paths = paths;
        self
    }

    /// Resolve a user-supplied path against the policy.
    pub fn resolve(&self, path: &str) -> anyhow::Result<PathBuf> {
        let expanded = crewgate_core::utils::expand_home(path);
        let expanded = if expanded.is_relative() {
            self.workspace.join(expanded)
        } else {
            expanded
        };
        let resolved = normalize(&expanded);

        // Blacklist first: protected paths are denied in every mode.
        for protected in &self.protected_paths {
            let protected = normalize(protected);
            if resolved == protected || resolved.starts_with(&protected) {
                anyhow::bail!("Access denied: '{}' is a protected path", resolved.display());
            }
        }

        if !self.allowed_paths.is_empty() {
            let permitted = self.allowed_paths.iter().any(|allowed| {
                let allowed = normalize(allowed);
                resolved == allowed || resolved.starts_with(&allowed)
            });
            if !permitted {
                anyhow::bail!(
                    "Access denied: '{}' is outside the allowed paths",
                    resolved.display()
                );
            }
        } else if self.restrict_to_workspace {
            let workspace = normalize(&self.workspace);
            if !resolved.starts_with(&workspace) {
                anyhow::bail!(
                    "Access denied: '{}' is outside the workspace '{}'",
                    resolved.display(),
                    workspace.display()
                );
            }
        }

        Ok(resolved)
    }
}

/// Canonicalize when possible; for not-yet-existing files canonicalize the
/// parent so `..` segments can't escape the scope.
fn normalize(path: &Path) -> PathBuf {
    if let Ok(canon) = path.canonicalize() {
        return canon;
    }
    if let (Some(parent), Some(name)) = (path.parent(), path.file_name()) {
        if let Ok(canon_parent) = parent.canonicalize() {
            return canon_parent.join(name);
        }
    }
    // Fall back to lexical normalization.
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other),
        }
    }
    out
}

// ─────────────────────────────────────────────
// ReadFileTool
// ─────────────────────────────────────────────

pub struct ReadFileTool {
    policy: Arc<PathPolicy>,
}

impl ReadFileTool {
    pub fn new(policy: Arc<PathPolicy>) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file at the given path. Returns the full text content."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path to the file to read" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let path = self.policy.resolve(&require_string(&params, "path")?)?;
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read '{}': {e}", path.display()))?;
        Ok(content)
    }
}

// ─────────────────────────────────────────────
// WriteFileTool
// ─────────────────────────────────────────────

pub struct WriteFileTool {
    policy: Arc<PathPolicy>,
}

impl WriteFileTool {
    pub fn new(policy: Arc<PathPolicy>) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating parent directories as needed. Overwrites existing content."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path to write" },
                "content": { "type": "string", "description": "Content to write" }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let path = self.policy.resolve(&require_string(&params, "path")?)?;
        let content = require_string(&params, "content")?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &content)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to write '{}': {e}", path.display()))?;
        Ok(format!("Wrote {} bytes to {}", content.len(), path.display()))
    }
}

// ─────────────────────────────────────────────
// EditFileTool
// ─────────────────────────────────────────────

pub struct EditFileTool {
    policy: Arc<PathPolicy>,
}

impl EditFileTool {
    pub fn new(policy: Arc<PathPolicy>) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Replace an exact text snippet in a file. The snippet must appear exactly once."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path to the file to edit" },
                "old_text": { "type": "string", "description": "Exact text to replace" },
                "new_text": { "type": "string", "description": "Replacement text" }
            },
            "required": ["path", "old_text", "new_text"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let path = self.policy.resolve(&require_string(&params, "path")?)?;
        let old_text = require_string(&params, "old_text")?;
        let new_text = require_string(&params, "new_text")?;

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read '{}': {e}", path.display()))?;

        let occurrences = content.matches(&old_text).count();
        if occurrences == 0 {
            anyhow::bail!("old_text not found in {}", path.display());
        }
        if occurrences > 1 {
            anyhow::bail!(
                "old_text appears {occurrences} times in {}; provide a unique snippet",
                path.display()
            );
        }

        let updated = content.replacen(&old_text, &new_text, 1);
        tokio::fs::write(&path, updated).await?;
        Ok(format!("Edited {}", path.display()))
    }
}

// ─────────────────────────────────────────────
// ListDirTool
// ─────────────────────────────────────────────

pub struct ListDirTool {
    policy: Arc<PathPolicy>,
}

impl ListDirTool {
    pub fn new(policy: Arc<PathPolicy>) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List the entries of a directory with sizes. Directories end with '/'."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory to list" },
                "limit": { "type": "integer", "description": "Max entries (default 200)" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let path = self.policy.resolve(&require_string(&params, "path")?)?;
        let limit = optional_i64(&params, "limit").unwrap_or(200).max(1) as usize;

        let mut entries = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to list '{}': {e}", path.display()))?;

        let mut lines: Vec<String> = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if meta.is_dir() {
                lines.push(format!("{name}/"));
            } else {
                lines.push(format!("{name} ({} bytes)", meta.len()));
            }
            if lines.len() >= limit {
                break;
            }
        }
        lines.sort();

        if lines.is_empty() {
            Ok("(empty directory)".into())
        } else {
            Ok(lines.join("\n"))
        }
    }
}
