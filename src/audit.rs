//! Cross-workspace contamination audit.
//!
//! Every heuristic here reads rows already at rest in the workspace DB
//! (plus the master registry, for the basenames of other known
//! workspaces) — there is no new persistent state, just derived
//! diagnostics.

use std::path::Path;

use serde_json::{json, Value};

use crate::db::Database;
use crate::error::CoreResult;
use crate::models::entity::EntityType;
use crate::models::task::Task;
use crate::resolver::ResolvedWorkspace;
use crate::store::{entity_store, master_store, task_store};
use crate::util::now_iso;

pub async fn validate_task_workspace(
    workspace_db: &Database,
    resolved: &ResolvedWorkspace,
    task_id: i64,
) -> CoreResult<Value> {
    let task = workspace_db
        .with_conn_async(move |conn| task_store::get_by_id(conn, task_id))
        .await?
        .ok_or_else(|| crate::error::CoreError::NotFound(format!("task {task_id}")))?;

    let mut warnings = Vec::new();
    let (task_workspace, valid, workspace_match) = match &task.workspace_metadata {
        Some(meta) => {
            let matches = meta.workspace_path == resolved.absolute_path;
            if !matches {
                warnings.push(format!(
                    "task was created in {:?} but is being read from {:?}",
                    meta.workspace_path, resolved.absolute_path
                ));
            }
            (Some(meta.workspace_path.clone()), matches, matches)
        }
        None => {
            warnings.push("task has no recorded workspace_metadata (created before this field existed)".into());
            (None, true, true)
        }
    };

    Ok(json!({
        "valid": valid,
        "task_id": task_id,
        "current_workspace": resolved.absolute_path,
        "task_workspace": task_workspace,
        "workspace_match": workspace_match,
        "warnings": warnings,
        "metadata": task.workspace_metadata,
    }))
}

pub struct AuditOptions {
    pub include_deleted: bool,
    pub check_git_repo: bool,
}

impl Default for AuditOptions {
    fn default() -> Self {
        Self {
            include_deleted: false,
            check_git_repo: true,
        }
    }
}

pub async fn audit_workspace_integrity(
    workspace_db: &Database,
    master_db: &Database,
    resolved: &ResolvedWorkspace,
    options: AuditOptions,
) -> CoreResult<Value> {
    let workspace_root = resolved.absolute_path.clone();
    let include_deleted = options.include_deleted;

    let tasks: Vec<Task> = workspace_db
        .with_conn_async(move |conn| {
            if include_deleted {
                task_store::all_rows(conn)
            } else {
                task_store::all_live(conn)
            }
        })
        .await?;

    let entities = workspace_db
        .with_conn_async(move |conn| {
            if include_deleted {
                entity_store::all_rows(conn)
            } else {
                entity_store::all_live(conn)
            }
        })
        .await?;

    let other_workspace_basenames: Vec<String> = master_db
        .with_conn_async(master_store::list)
        .await?
        .into_iter()
        .filter(|w| w.workspace_path != workspace_root)
        .filter_map(|w| {
            Path::new(&w.workspace_path)
                .file_name()
                .map(|n| n.to_string_lossy().to_lowercase())
        })
        .filter(|b| !b.is_empty())
        .collect();

    let mut file_reference_mismatches = Vec::new();
    let mut suspicious_tags = Vec::new();
    let mut git_repo_mismatches = Vec::new();
    let mut entity_identifier_mismatches = Vec::new();
    let mut description_path_references = Vec::new();

    let mut contaminated_task_ids = std::collections::HashSet::new();

    for task in &tasks {
        let mut task_flagged = false;

        for reference in &task.file_references {
            if !path_is_under(reference, &workspace_root) {
                file_reference_mismatches.push(json!({ "task_id": task.id, "file_reference": reference }));
                task_flagged = true;
            }
        }

        for tag in &task.tags {
            let lower = tag.to_lowercase();
            if other_workspace_basenames.iter().any(|b| lower.contains(b.as_str())) {
                suspicious_tags.push(json!({ "task_id": task.id, "tag": tag }));
                task_flagged = true;
            }
        }

        if options.check_git_repo {
            if let Some(meta) = &task.workspace_metadata {
                if meta.git_root.is_some() && meta.git_root != resolved.git_root {
                    git_repo_mismatches.push(json!({
                        "task_id": task.id,
                        "stored_git_root": meta.git_root,
                        "current_git_root": resolved.git_root,
                    }));
                    task_flagged = true;
                }
            }
        }

        if let Some(desc) = &task.description {
            for token in desc.split_whitespace() {
                if looks_like_absolute_path(token) && !path_is_under(token, &workspace_root) {
                    description_path_references.push(json!({ "task_id": task.id, "path": token }));
                    task_flagged = true;
                }
            }
        }

        if task_flagged {
            contaminated_task_ids.insert(task.id);
        }
    }

    let mut contaminated_entity_ids = std::collections::HashSet::new();
    for entity in &entities {
        if entity.entity_type == EntityType::File {
            if let Some(identifier) = &entity.identifier {
                if !path_is_under(identifier, &workspace_root) {
                    entity_identifier_mismatches.push(json!({ "entity_id": entity.id, "identifier": identifier }));
                    contaminated_entity_ids.insert(entity.id);
                }
            }
        }
    }

    let contamination_found = !file_reference_mismatches.is_empty()
        || !suspicious_tags.is_empty()
        || !git_repo_mismatches.is_empty()
        || !entity_identifier_mismatches.is_empty()
        || !description_path_references.is_empty();

    let mut recommendations = Vec::new();
    if !file_reference_mismatches.is_empty() || !description_path_references.is_empty() {
        recommendations.push("review tasks referencing paths outside this workspace; they may belong to a different project".to_string());
    }
    if !suspicious_tags.is_empty() {
        recommendations.push("review tags that name other known workspaces".to_string());
    }
    if !git_repo_mismatches.is_empty() {
        recommendations.push("this workspace's git root has changed since some tasks were created".to_string());
    }
    if !entity_identifier_mismatches.is_empty() {
        recommendations.push("review file entities whose identifier path lies outside this workspace".to_string());
    }

    Ok(json!({
        "workspace_path": workspace_root,
        "audit_timestamp": now_iso(),
        "contamination_found": contamination_found,
        "issues": {
            "file_reference_mismatches": file_reference_mismatches,
            "suspicious_tags": suspicious_tags,
            "git_repo_mismatches": git_repo_mismatches,
            "entity_identifier_mismatches": entity_identifier_mismatches,
            "description_path_references": description_path_references,
        },
        "statistics": {
            "contaminated_tasks": contaminated_task_ids.len(),
            "contaminated_entities": contaminated_entity_ids.len(),
        },
        "recommendations": recommendations,
    }))
}

fn path_is_under(candidate: &str, root: &str) -> bool {
    if !looks_like_absolute_path(candidate) {
        return true; // relative references can't be judged, don't flag them
    }
    Path::new(candidate).starts_with(Path::new(root))
}

fn looks_like_absolute_path(s: &str) -> bool {
    s.starts_with('/') || (s.len() > 2 && s.as_bytes()[1] == b':' && s.as_bytes()[0].is_ascii_alphabetic())
}
