//! Path & workspace resolver.
//!
//! Every core entry point receives an explicit `workspace_path`; there is
//! no cwd/env-var auto-detection fallback.

use std::path::{Path, PathBuf};
use std::process::Command;

use sha2::{Digest, Sha256};

use crate::error::{CoreError, CoreResult};

/// Where the master DB and per-workspace DBs live on disk.
///
/// Deliberately a plain value injected by the caller rather than global
/// mutable state (DESIGN NOTES §9 "Global per-process state") — tests
/// construct one per `tempdir`, production wires one from `~/.task-mcp`.
#[derive(Debug, Clone)]
pub struct DataRoot {
    root: PathBuf,
}

impl DataRoot {
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Conventional default: `<user-home>/.task-mcp`.
    pub fn default_location() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            root: home.join(".task-mcp"),
        }
    }

    pub fn master_db_path(&self) -> PathBuf {
        self.root.join("master.db")
    }

    pub fn workspace_db_path(&self, workspace_id: &str) -> PathBuf {
        self.root
            .join("databases")
            .join(format!("project_{workspace_id}.db"))
    }
}

/// A resolved, validated workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedWorkspace {
    pub absolute_path: String,
    pub workspace_id: String,
    pub git_root: Option<String>,
}

/// Validate and resolve a caller-supplied workspace path.
///
/// Fails with `CoreError::WorkspaceMissing` if the path is absent or
/// empty. Normalizes to an absolute, symlink-resolved path when possible
/// so the same workspace always maps to the same id regardless of how it
/// was spelled.
pub fn resolve(workspace_path: &str) -> CoreResult<ResolvedWorkspace> {
    if workspace_path.trim().is_empty() {
        return Err(CoreError::WorkspaceMissing);
    }

    let path = Path::new(workspace_path);
    let absolute = normalize_absolute(path)?;
    let workspace_id = workspace_id_for(&absolute);
    let git_root = detect_git_root(&absolute);

    Ok(ResolvedWorkspace {
        absolute_path: absolute,
        workspace_id,
        git_root,
    })
}

/// `hex(sha256(absolute_path))[:8]`, lowercase.
pub fn workspace_id_for(absolute_path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(absolute_path.as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)[..8].to_string()
}

fn normalize_absolute(path: &Path) -> CoreResult<String> {
    // canonicalize() resolves symlinks and requires the path to exist;
    // fall back to a lexical absolutization for paths that don't exist yet
    // (the workspace directory itself is never created by this crate).
    if let Ok(canon) = path.canonicalize() {
        return Ok(canon.to_string_lossy().to_string());
    }

    let abs = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| CoreError::Internal(format!("cannot resolve cwd: {e}")))?
            .join(path)
    };

    Ok(lexically_normalize(&abs).to_string_lossy().to_string())
}

fn lexically_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Best-effort git root detection, used by the audit component. Absence of
/// a git binary or a non-repo workspace is not an error, just `None`.
fn detect_git_root(workspace_path: &str) -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--show-toplevel"])
        .current_dir(workspace_path)
        .output()
        .ok()?;
    if output.status.success() {
        let root = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if root.is_empty() {
            None
        } else {
            Some(root)
        }
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_path_is_missing() {
        assert!(matches!(resolve(""), Err(CoreError::WorkspaceMissing)));
        assert!(matches!(resolve("   "), Err(CoreError::WorkspaceMissing)));
    }

    #[test]
    fn same_path_always_same_id() {
        let a = workspace_id_for("/home/dev/project");
        let b = workspace_id_for("/home/dev/project");
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
    }

    #[test]
    fn different_paths_differ() {
        let a = workspace_id_for("/home/dev/project-a");
        let b = workspace_id_for("/home/dev/project-b");
        assert_ne!(a, b);
    }

    #[test]
    fn db_paths_are_scoped_to_data_root() {
        let root = DataRoot::at("/tmp/example-root");
        assert_eq!(
            root.master_db_path(),
            PathBuf::from("/tmp/example-root/master.db")
        );
        assert_eq!(
            root.workspace_db_path("deadbeef"),
            PathBuf::from("/tmp/example-root/databases/project_deadbeef.db")
        );
    }
}
