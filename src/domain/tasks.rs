//! Domain engine — task operations.
//!
//! Every public function here runs inside a single transaction so that validation reads
//! and the eventual write observe the same snapshot.

use std::collections::HashSet;

use rusqlite::Connection;

use crate::db::Database;
use crate::error::{CoreError, CoreResult};
use crate::models::task::{NewTask, Priority, Task, TaskStatus, TaskTreeNode, TaskUpdate, WorkspaceMetadata};
use crate::models::{self};
use crate::store::task_store::{self, TaskFilters};
use crate::util::{now_iso, MAX_DESCRIPTION_LEN};

pub struct CreateTaskInput {
    pub new_task: NewTask,
    pub workspace_path: String,
    pub git_root: Option<String>,
    pub project_name: String,
}

pub async fn create_task(db: &Database, input: CreateTaskInput) -> CoreResult<Task> {
    db.with_tx_async(move |tx| create_task_tx(tx, &input)).await
}

fn create_task_tx(conn: &Connection, input: &CreateTaskInput) -> CoreResult<Task> {
    let n = &input.new_task;

    if n.title.trim().is_empty() {
        return Err(CoreError::InvalidInput("title must not be empty".into()));
    }
    validate_description(&n.description)?;

    let status = match &n.status {
        Some(s) => TaskStatus::parse(s)
            .ok_or_else(|| CoreError::InvalidInput(format!("invalid status: {s}")))?,
        None => TaskStatus::default(),
    };
    let priority = match &n.priority {
        Some(p) => Priority::parse(p)
            .ok_or_else(|| CoreError::InvalidInput(format!("invalid priority: {p}")))?,
        None => Priority::default(),
    };

    let blocker_reason = n.blocker_reason.clone().unwrap_or_default();
    validate_blocker_consistency(status, &blocker_reason)?;

    if let Some(parent_id) = n.parent_task_id {
        if !task_store::exists_live(conn, parent_id)? {
            return Err(CoreError::InvalidInput(format!(
                "parent_task_id {parent_id} does not exist or is deleted"
            )));
        }
    }

    let depends_on = n.depends_on.clone().unwrap_or_default();
    for dep_id in &depends_on {
        if !task_store::exists_live(conn, *dep_id)? {
            return Err(CoreError::InvalidInput(format!(
                "depends_on task {dep_id} does not exist or is deleted"
            )));
        }
    }

    if matches!(status, TaskStatus::InProgress | TaskStatus::Done) {
        ensure_dependencies_done(conn, &depends_on)?;
    }

    let tags = models::normalize_tags(&n.tags.clone().unwrap_or_default());
    let now = now_iso();
    let completed_at = if status == TaskStatus::Done { Some(now.clone()) } else { None };

    let workspace_metadata = WorkspaceMetadata {
        workspace_path: input.workspace_path.clone(),
        git_root: input.git_root.clone(),
        cwd_at_creation: n
            .cwd_at_creation
            .clone()
            .unwrap_or_else(|| input.workspace_path.clone()),
        project_name: input.project_name.clone(),
    };

    let row = task_store::NewTaskRow {
        title: n.title.trim(),
        description: n.description.as_deref(),
        status,
        priority,
        parent_task_id: n.parent_task_id,
        depends_on: &depends_on,
        tags: &tags,
        blocker_reason: &blocker_reason,
        file_references: &n.file_references.clone().unwrap_or_default(),
        created_by: n.created_by.as_deref(),
        created_at: &now,
        updated_at: &now,
        completed_at: completed_at.as_deref(),
        workspace_metadata: &workspace_metadata,
    };

    let id = task_store::insert(conn, &row)?;
    task_store::get_by_id(conn, id)?
        .ok_or_else(|| CoreError::Internal("task vanished immediately after insert".into()))
}

pub async fn get_task(db: &Database, id: i64) -> CoreResult<Task> {
    db.with_conn_async(move |conn| task_store::get_live_by_id(conn, id))
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("task {id}")))
}

pub async fn update_task(db: &Database, id: i64, update: TaskUpdate) -> CoreResult<Task> {
    db.with_tx_async(move |tx| update_task_tx(tx, id, &update)).await
}

fn update_task_tx(conn: &Connection, id: i64, update: &TaskUpdate) -> CoreResult<Task> {
    let current = task_store::get_by_id(conn, id)?
        .filter(|t| !t.is_deleted())
        .ok_or_else(|| CoreError::NotFound(format!("task {id}")))?;

    if let Some(title) = &update.title {
        if title.trim().is_empty() {
            return Err(CoreError::InvalidInput("title must not be empty".into()));
        }
    }
    if let Some(Some(desc)) = &update.description {
        if desc.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(CoreError::InvalidInput("description exceeds 10,000 chars".into()));
        }
    }

    let new_status = match &update.status {
        Some(s) => Some(
            TaskStatus::parse(s).ok_or_else(|| CoreError::InvalidInput(format!("invalid status: {s}")))?,
        ),
        None => None,
    };
    let new_priority = match &update.priority {
        Some(p) => Some(
            Priority::parse(p).ok_or_else(|| CoreError::InvalidInput(format!("invalid priority: {p}")))?,
        ),
        None => None,
    };

    let effective_status = new_status.unwrap_or(current.status);

    // status = blocked iff blocker_reason is non-empty, enforced on every
    // write regardless of which field actually changed this call.
    let blocker_reason: Option<String> = if effective_status == TaskStatus::Blocked {
        let reason = update
            .blocker_reason
            .clone()
            .filter(|r| !r.trim().is_empty())
            .or_else(|| {
                if current.status == TaskStatus::Blocked {
                    Some(current.blocker_reason.clone())
                } else {
                    None
                }
            });
        match reason {
            Some(r) => Some(r),
            None => return Err(CoreError::BlockerReasonMissing),
        }
    } else if current.status == TaskStatus::Blocked || update.blocker_reason.is_some() {
        Some(String::new())
    } else {
        None
    };

    let depends_on: Option<Vec<i64>> = if let Some(deps) = &update.depends_on {
        for dep_id in deps {
            if *dep_id == id {
                return Err(CoreError::InvalidInput("a task cannot depend on itself".into()));
            }
            if !task_store::exists_live(conn, *dep_id)? {
                return Err(CoreError::InvalidInput(format!(
                    "depends_on task {dep_id} does not exist or is deleted"
                )));
            }
        }
        ensure_no_dependency_cycle(conn, id, deps)?;
        Some(deps.clone())
    } else {
        None
    };

    let effective_depends_on: Vec<i64> = depends_on.clone().unwrap_or_else(|| current.depends_on.clone());
    if matches!(effective_status, TaskStatus::InProgress | TaskStatus::Done) {
        ensure_dependencies_done(conn, &effective_depends_on)?;
    }

    let parent_task_id: Option<Option<i64>> = if let Some(new_parent) = &update.parent_task_id {
        match new_parent {
            Some(parent_id) => {
                if *parent_id == id {
                    return Err(CoreError::Cycle("a task cannot be its own parent".into()));
                }
                if !task_store::exists_live(conn, *parent_id)? {
                    return Err(CoreError::InvalidInput(format!(
                        "parent_task_id {parent_id} does not exist or is deleted"
                    )));
                }
                ensure_no_parent_cycle(conn, id, *parent_id)?;
                Some(Some(*parent_id))
            }
            None => Some(None),
        }
    } else {
        None
    };

    let tags = update.tags.as_ref().map(|t| models::normalize_tags(t));

    let now = now_iso();
    let completed_at: Option<Option<String>> = match new_status {
        Some(TaskStatus::Done) => Some(Some(now.clone())),
        Some(_) => Some(None),
        None => None,
    };

    task_store::apply_update(
        conn,
        id,
        update.title.as_deref(),
        update.description.as_ref().map(|o| o.as_deref()),
        new_status,
        new_priority,
        parent_task_id,
        depends_on.as_deref(),
        tags.as_deref(),
        blocker_reason.as_deref(),
        update.file_references.as_deref(),
        completed_at.as_ref().map(|o| o.as_deref()),
        &now,
    )?;

    task_store::get_by_id(conn, id)?
        .ok_or_else(|| CoreError::Internal("task vanished immediately after update".into()))
}

pub struct DeleteTaskResult {
    pub deleted_task_ids: Vec<i64>,
    pub deleted_links: usize,
}

pub async fn delete_task(db: &Database, id: i64, cascade: bool) -> CoreResult<DeleteTaskResult> {
    db.with_tx_async(move |tx| delete_task_tx(tx, id, cascade)).await
}

fn delete_task_tx(conn: &Connection, id: i64, cascade: bool) -> CoreResult<DeleteTaskResult> {
    task_store::get_by_id(conn, id)?
        .filter(|t| !t.is_deleted())
        .ok_or_else(|| CoreError::NotFound(format!("task {id}")))?;

    let now = now_iso();
    let mut affected = vec![id];
    if cascade {
        let mut frontier = vec![id];
        while let Some(parent) = frontier.pop() {
            for child in crate::store::task_store::children_of(conn, parent)? {
                affected.push(child.id);
                frontier.push(child.id);
            }
        }
    }

    let mut deleted_links = 0usize;
    for task_id in &affected {
        task_store::soft_delete(conn, *task_id, &now)?;
        deleted_links += crate::store::link_store::soft_delete_for_task(conn, *task_id, &now)?;
    }

    Ok(DeleteTaskResult {
        deleted_task_ids: affected,
        deleted_links,
    })
}

pub async fn list_tasks(
    db: &Database,
    filters: TaskFilters,
    limit: i64,
    offset: i64,
) -> CoreResult<(Vec<Task>, i64)> {
    Ok(db
        .with_conn_async(move |conn| task_store::list(conn, &filters, limit, offset))
        .await?)
}

pub async fn search_tasks(
    db: &Database,
    term: String,
    mut filters: TaskFilters,
    limit: i64,
    offset: i64,
) -> CoreResult<(Vec<Task>, i64)> {
    filters.search_term = Some(term);
    list_tasks(db, filters, limit, offset).await
}

pub async fn get_task_tree(db: &Database, root_id: i64) -> CoreResult<TaskTreeNode> {
    db.with_conn_async(move |conn| build_tree(conn, root_id, &mut HashSet::new()))
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("task {root_id}")))
}

fn build_tree(
    conn: &Connection,
    root_id: i64,
    visited: &mut HashSet<i64>,
) -> rusqlite::Result<Option<TaskTreeNode>> {
    // An explicit visited set defends against a structurally-corrupt
    // parent chain producing an unbounded walk (DESIGN NOTES §9 "Tree
    // expansion").
    if !visited.insert(root_id) {
        return Ok(None);
    }
    let Some(task) = task_store::get_live_by_id(conn, root_id)? else {
        return Ok(None);
    };
    let mut children = Vec::new();
    for child in task_store::children_of(conn, root_id)? {
        if let Some(node) = build_tree(conn, child.id, visited)? {
            children.push(node);
        }
    }
    Ok(Some(TaskTreeNode { task, children }))
}

pub async fn get_blocked_tasks(db: &Database) -> CoreResult<Vec<Task>> {
    Ok(db.with_conn_async(task_store::get_blocked).await?)
}

pub async fn get_next_tasks(db: &Database) -> CoreResult<Vec<Task>> {
    db.with_conn_async(move |conn| {
        let candidates = task_store::get_next_candidates(conn)?;
        let mut ready = Vec::new();
        for t in candidates {
            if t.depends_on.is_empty() {
                ready.push(t);
                continue;
            }
            let mut all_done = true;
            for dep in &t.depends_on {
                if task_store::status_of(conn, *dep)?.map(|s| s == TaskStatus::Done) != Some(true) {
                    all_done = false;
                    break;
                }
            }
            if all_done {
                ready.push(t);
            }
        }
        Ok(ready)
    })
    .await
}

pub async fn cleanup_deleted_tasks(db: &Database, retention_days: u32) -> CoreResult<usize> {
    let cutoff = (chrono::Utc::now() - chrono::Duration::days(retention_days as i64)).to_rfc3339();
    db.with_tx_async(move |tx| {
        let purged = task_store::purge_deleted_before(tx, &cutoff)?;
        crate::store::link_store::purge_referencing(tx, &purged)?;
        Ok(purged.len())
    })
    .await
}

fn validate_description(desc: &Option<String>) -> CoreResult<()> {
    if let Some(d) = desc {
        if d.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(CoreError::InvalidInput("description exceeds 10,000 chars".into()));
        }
    }
    Ok(())
}

fn validate_blocker_consistency(status: TaskStatus, blocker_reason: &str) -> CoreResult<()> {
    match status {
        TaskStatus::Blocked if blocker_reason.trim().is_empty() => Err(CoreError::BlockerReasonMissing),
        TaskStatus::Blocked => Ok(()),
        _ if !blocker_reason.trim().is_empty() => Err(CoreError::InvalidInput(
            "blocker_reason must be empty unless status = blocked".into(),
        )),
        _ => Ok(()),
    }
}

fn ensure_dependencies_done(conn: &Connection, depends_on: &[i64]) -> CoreResult<()> {
    for dep_id in depends_on {
        let status = task_store::status_of(conn, *dep_id)?;
        if status != Some(TaskStatus::Done) {
            return Err(CoreError::DependencyNotSatisfied(format!(
                "dependency {dep_id} is not done"
            )));
        }
    }
    Ok(())
}

/// Walk the parent chain starting at `new_parent`; fail if `task_id`
/// appears in it.
fn ensure_no_parent_cycle(conn: &Connection, task_id: i64, new_parent: i64) -> CoreResult<()> {
    let mut current = Some(new_parent);
    let mut visited = HashSet::new();
    while let Some(cur) = current {
        if cur == task_id {
            return Err(CoreError::Cycle("parent_task_id change would create a cycle".into()));
        }
        if !visited.insert(cur) {
            break; // pre-existing corruption elsewhere; don't loop forever
        }
        current = task_store::get_by_id(conn, cur)?.and_then(|t| t.parent_task_id);
    }
    Ok(())
}

/// Walk the transitive dependency DAG from each proposed dependency; fail
/// if `task_id` is reachable.
fn ensure_no_dependency_cycle(conn: &Connection, task_id: i64, new_deps: &[i64]) -> CoreResult<()> {
    let mut stack: Vec<i64> = new_deps.to_vec();
    let mut visited = HashSet::new();
    while let Some(cur) = stack.pop() {
        if cur == task_id {
            return Err(CoreError::Cycle("depends_on change would create a cycle".into()));
        }
        if !visited.insert(cur) {
            continue;
        }
        if let Some(t) = task_store::get_by_id(conn, cur)? {
            stack.extend(t.depends_on);
        }
    }
    Ok(())
}
