//! Row-level operations on the `tasks` table.

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::models::task::{Priority, Task, TaskStatus, WorkspaceMetadata};

pub struct NewTaskRow<'a> {
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub status: TaskStatus,
    pub priority: Priority,
    pub parent_task_id: Option<i64>,
    pub depends_on: &'a [i64],
    pub tags: &'a [String],
    pub blocker_reason: &'a str,
    pub file_references: &'a [String],
    pub created_by: Option<&'a str>,
    pub created_at: &'a str,
    pub updated_at: &'a str,
    pub completed_at: Option<&'a str>,
    pub workspace_metadata: &'a WorkspaceMetadata,
}

pub fn insert(conn: &Connection, row: &NewTaskRow<'_>) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO tasks (
            title, description, status, priority, parent_task_id, depends_on, tags,
            blocker_reason, file_references, created_by, created_at, updated_at,
            completed_at, workspace_metadata
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            row.title,
            row.description,
            row.status.as_str(),
            row.priority.as_str(),
            row.parent_task_id,
            serde_json::to_string(row.depends_on).unwrap_or_else(|_| "[]".into()),
            serde_json::to_string(row.tags).unwrap_or_else(|_| "[]".into()),
            row.blocker_reason,
            serde_json::to_string(row.file_references).unwrap_or_else(|_| "[]".into()),
            row.created_by,
            row.created_at,
            row.updated_at,
            row.completed_at,
            serde_json::to_string(row.workspace_metadata).unwrap_or_default(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

const SELECT_COLUMNS: &str = "id, title, description, status, priority, parent_task_id, \
     depends_on, tags, blocker_reason, file_references, created_by, created_at, updated_at, \
     completed_at, deleted_at, workspace_metadata";

pub fn get_by_id(conn: &Connection, id: i64) -> rusqlite::Result<Option<Task>> {
    conn.query_row(
        &format!("SELECT {SELECT_COLUMNS} FROM tasks WHERE id = ?1"),
        params![id],
        row_to_task,
    )
    .optional()
}

pub fn get_live_by_id(conn: &Connection, id: i64) -> rusqlite::Result<Option<Task>> {
    Ok(get_by_id(conn, id)?.filter(|t| !t.is_deleted()))
}

pub fn exists_live(conn: &Connection, id: i64) -> rusqlite::Result<bool> {
    Ok(get_live_by_id(conn, id)?.is_some())
}

pub fn children_of(conn: &Connection, parent_id: i64) -> rusqlite::Result<Vec<Task>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SELECT_COLUMNS} FROM tasks WHERE parent_task_id = ?1 AND deleted_at IS NULL"
    ))?;
    stmt.query_map(params![parent_id], row_to_task)?
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct TaskFilters {
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub parent_task_id: Option<i64>,
    pub tags_substring: Option<String>,
    pub search_term: Option<String>,
}

/// List live tasks matching `filters`, ordered by priority desc then
/// `created_at` asc, returning both the page and the total
/// count before pagination.
pub fn list(
    conn: &Connection,
    filters: &TaskFilters,
    limit: i64,
    offset: i64,
) -> rusqlite::Result<(Vec<Task>, i64)> {
    let (where_clause, args) = build_where(filters);
    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM tasks WHERE {where_clause}"),
        rusqlite::params_from_iter(args.iter()),
        |r| r.get(0),
    )?;

    let mut all_args = args.clone();
    all_args.push(SqlValue::Integer(limit));
    all_args.push(SqlValue::Integer(offset));
    let sql = format!(
        "SELECT {SELECT_COLUMNS} FROM tasks WHERE {where_clause} \
         ORDER BY CASE priority WHEN 'high' THEN 0 WHEN 'medium' THEN 1 ELSE 2 END, created_at ASC \
         LIMIT ?{a} OFFSET ?{b}",
        a = args.len() + 1,
        b = args.len() + 2,
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(all_args.iter()), row_to_task)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok((rows, total))
}

fn build_where(filters: &TaskFilters) -> (String, Vec<SqlValue>) {
    let mut clauses = vec!["deleted_at IS NULL".to_string()];
    let mut args = Vec::new();

    if let Some(status) = filters.status {
        clauses.push(format!("status = ?{}", args.len() + 1));
        args.push(SqlValue::Text(status.as_str().to_string()));
    }
    if let Some(priority) = filters.priority {
        clauses.push(format!("priority = ?{}", args.len() + 1));
        args.push(SqlValue::Text(priority.as_str().to_string()));
    }
    if let Some(parent_id) = filters.parent_task_id {
        clauses.push(format!("parent_task_id = ?{}", args.len() + 1));
        args.push(SqlValue::Integer(parent_id));
    }
    if let Some(tag) = &filters.tags_substring {
        clauses.push(format!("tags LIKE ?{}", args.len() + 1));
        args.push(SqlValue::Text(format!("%{}%", tag.to_lowercase())));
    }
    if let Some(term) = &filters.search_term {
        let idx = args.len() + 1;
        clauses.push(format!(
            "(LOWER(title) LIKE ?{idx} OR LOWER(COALESCE(description, '')) LIKE ?{idx})"
        ));
        args.push(SqlValue::Text(format!("%{}%", term.to_lowercase())));
    }

    (clauses.join(" AND "), args)
}

pub fn get_blocked(conn: &Connection) -> rusqlite::Result<Vec<Task>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SELECT_COLUMNS} FROM tasks WHERE status = 'blocked' AND deleted_at IS NULL \
         ORDER BY created_at DESC"
    ))?;
    stmt.query_map([], row_to_task)?.collect()
}

/// `todo` tasks whose dependencies are each empty or all `done`. Filtered in Rust after a bulk fetch since SQLite
/// can't cheaply join against a JSON array per row at scale; acceptable
/// for the workspace-local row counts this crate targets.
pub fn get_next_candidates(conn: &Connection) -> rusqlite::Result<Vec<Task>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SELECT_COLUMNS} FROM tasks WHERE status = 'todo' AND deleted_at IS NULL \
         ORDER BY CASE priority WHEN 'high' THEN 0 WHEN 'medium' THEN 1 ELSE 2 END, created_at ASC"
    ))?;
    stmt.query_map([], row_to_task)?.collect()
}

pub fn status_of(conn: &Connection, id: i64) -> rusqlite::Result<Option<TaskStatus>> {
    Ok(get_by_id(conn, id)?.map(|t| t.status))
}

#[allow(clippy::too_many_arguments)]
pub fn apply_update(
    conn: &Connection,
    id: i64,
    title: Option<&str>,
    description: Option<Option<&str>>,
    status: Option<TaskStatus>,
    priority: Option<Priority>,
    parent_task_id: Option<Option<i64>>,
    depends_on: Option<&[i64]>,
    tags: Option<&[String]>,
    blocker_reason: Option<&str>,
    file_references: Option<&[String]>,
    completed_at: Option<Option<&str>>,
    updated_at: &str,
) -> rusqlite::Result<()> {
    let mut sets = vec!["updated_at = ?1".to_string()];
    let mut args: Vec<SqlValue> = vec![SqlValue::Text(updated_at.to_string())];

    macro_rules! push {
        ($col:literal, $val:expr) => {{
            sets.push(format!("{} = ?{}", $col, args.len() + 1));
            args.push($val);
        }};
    }

    if let Some(v) = title {
        push!("title", SqlValue::Text(v.to_string()));
    }
    if let Some(v) = description {
        push!(
            "description",
            v.map(|s| SqlValue::Text(s.to_string())).unwrap_or(SqlValue::Null)
        );
    }
    if let Some(v) = status {
        push!("status", SqlValue::Text(v.as_str().to_string()));
    }
    if let Some(v) = priority {
        push!("priority", SqlValue::Text(v.as_str().to_string()));
    }
    if let Some(v) = parent_task_id {
        push!("parent_task_id", v.map(SqlValue::Integer).unwrap_or(SqlValue::Null));
    }
    if let Some(v) = depends_on {
        push!(
            "depends_on",
            SqlValue::Text(serde_json::to_string(v).unwrap_or_else(|_| "[]".into()))
        );
    }
    if let Some(v) = tags {
        push!(
            "tags",
            SqlValue::Text(serde_json::to_string(v).unwrap_or_else(|_| "[]".into()))
        );
    }
    if let Some(v) = blocker_reason {
        push!("blocker_reason", SqlValue::Text(v.to_string()));
    }
    if let Some(v) = file_references {
        push!(
            "file_references",
            SqlValue::Text(serde_json::to_string(v).unwrap_or_else(|_| "[]".into()))
        );
    }
    if let Some(v) = completed_at {
        push!(
            "completed_at",
            v.map(|s| SqlValue::Text(s.to_string())).unwrap_or(SqlValue::Null)
        );
    }

    args.push(SqlValue::Integer(id));
    let sql = format!(
        "UPDATE tasks SET {} WHERE id = ?{}",
        sets.join(", "),
        args.len()
    );
    conn.execute(&sql, rusqlite::params_from_iter(args.iter()))?;
    Ok(())
}

pub fn soft_delete(conn: &Connection, id: i64, deleted_at: &str) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE tasks SET deleted_at = ?1 WHERE id = ?2",
        params![deleted_at, id],
    )?;
    Ok(())
}

pub fn purge_deleted_before(conn: &Connection, cutoff: &str) -> rusqlite::Result<Vec<i64>> {
    let ids: Vec<i64> = {
        let mut stmt =
            conn.prepare("SELECT id FROM tasks WHERE deleted_at IS NOT NULL AND deleted_at < ?1")?;
        stmt.query_map(params![cutoff], |r| r.get(0))?
            .collect::<rusqlite::Result<_>>()?
    };
    conn.execute(
        "DELETE FROM tasks WHERE deleted_at IS NOT NULL AND deleted_at < ?1",
        params![cutoff],
    )?;
    Ok(ids)
}

pub fn all_live(conn: &Connection) -> rusqlite::Result<Vec<Task>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SELECT_COLUMNS} FROM tasks WHERE deleted_at IS NULL"
    ))?;
    stmt.query_map([], row_to_task)?.collect()
}

/// Every task row regardless of soft-delete state, used by the audit
/// component's `include_deleted` option.
pub fn all_rows(conn: &Connection) -> rusqlite::Result<Vec<Task>> {
    let mut stmt = conn.prepare(&format!("SELECT {SELECT_COLUMNS} FROM tasks"))?;
    stmt.query_map([], row_to_task)?.collect()
}

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<Task> {
    let depends_on_str: String = row.get(6)?;
    let tags_str: String = row.get(7)?;
    let file_refs_str: String = row.get(9)?;
    let metadata_str: Option<String> = row.get(15)?;

    Ok(Task {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        status: TaskStatus::parse(&row.get::<_, String>(3)?).unwrap_or_default(),
        priority: Priority::parse(&row.get::<_, String>(4)?).unwrap_or_default(),
        parent_task_id: row.get(5)?,
        depends_on: serde_json::from_str(&depends_on_str).unwrap_or_default(),
        tags: serde_json::from_str(&tags_str).unwrap_or_default(),
        blocker_reason: row.get(8)?,
        file_references: serde_json::from_str(&file_refs_str).unwrap_or_default(),
        created_by: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
        completed_at: row.get(13)?,
        deleted_at: row.get(14)?,
        workspace_metadata: metadata_str.and_then(|s| serde_json::from_str(&s).ok()),
    })
}
