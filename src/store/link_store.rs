//! Row-level operations on the `task_entity_links` table.

use rusqlite::{params, Connection, OptionalExtension, Row};

pub fn insert(
    conn: &Connection,
    task_id: i64,
    entity_id: i64,
    created_by: Option<&str>,
    created_at: &str,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO task_entity_links (task_id, entity_id, created_by, created_at) \
         VALUES (?1, ?2, ?3, ?4)",
        params![task_id, entity_id, created_by, created_at],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn exists_live(conn: &Connection, task_id: i64, entity_id: i64) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT 1 FROM task_entity_links WHERE task_id = ?1 AND entity_id = ?2 \
         AND deleted_at IS NULL",
        params![task_id, entity_id],
        |_| Ok(true),
    )
    .optional()
    .map(|r| r.unwrap_or(false))
}

pub fn soft_delete_for_task(conn: &Connection, task_id: i64, deleted_at: &str) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE task_entity_links SET deleted_at = ?1 \
         WHERE task_id = ?2 AND deleted_at IS NULL",
        params![deleted_at, task_id],
    )
}

pub fn soft_delete_for_entity(
    conn: &Connection,
    entity_id: i64,
    deleted_at: &str,
) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE task_entity_links SET deleted_at = ?1 \
         WHERE entity_id = ?2 AND deleted_at IS NULL",
        params![deleted_at, entity_id],
    )
}

pub fn purge_referencing(conn: &Connection, task_ids: &[i64]) -> rusqlite::Result<()> {
    for id in task_ids {
        conn.execute("DELETE FROM task_entity_links WHERE task_id = ?1", params![id])?;
    }
    Ok(())
}

/// Entities linked to a task, newest link first, joined with link metadata.
pub fn entities_for_task(
    conn: &Connection,
    task_id: i64,
    limit: i64,
    offset: i64,
) -> rusqlite::Result<(Vec<(crate::models::entity::Entity, String, Option<String>)>, i64)> {
    let total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM task_entity_links l \
         JOIN entities e ON e.id = l.entity_id \
         WHERE l.task_id = ?1 AND l.deleted_at IS NULL AND e.deleted_at IS NULL",
        params![task_id],
        |r| r.get(0),
    )?;

    let mut stmt = conn.prepare(
        "SELECT e.id, e.entity_type, e.name, e.identifier, e.description, e.metadata, e.tags, \
                e.created_by, e.created_at, e.updated_at, e.deleted_at, \
                l.created_at, l.created_by \
         FROM task_entity_links l \
         JOIN entities e ON e.id = l.entity_id \
         WHERE l.task_id = ?1 AND l.deleted_at IS NULL AND e.deleted_at IS NULL \
         ORDER BY l.created_at DESC LIMIT ?2 OFFSET ?3",
    )?;
    let rows = stmt
        .query_map(params![task_id, limit, offset], row_to_entity_with_link)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok((rows, total))
}

/// The reverse lookup: tasks linked to an entity, optionally filtered by status/priority.
pub fn tasks_for_entity(
    conn: &Connection,
    entity_id: i64,
    status: Option<&str>,
    priority: Option<&str>,
    limit: i64,
    offset: i64,
) -> rusqlite::Result<(Vec<(crate::models::task::Task, String, Option<String>)>, i64)> {
    let mut clauses = vec![
        "l.entity_id = ?1".to_string(),
        "l.deleted_at IS NULL".to_string(),
        "t.deleted_at IS NULL".to_string(),
    ];
    let mut args: Vec<rusqlite::types::Value> = vec![rusqlite::types::Value::Integer(entity_id)];
    if let Some(s) = status {
        clauses.push(format!("t.status = ?{}", args.len() + 1));
        args.push(rusqlite::types::Value::Text(s.to_string()));
    }
    if let Some(p) = priority {
        clauses.push(format!("t.priority = ?{}", args.len() + 1));
        args.push(rusqlite::types::Value::Text(p.to_string()));
    }
    let where_clause = clauses.join(" AND ");

    let total: i64 = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM task_entity_links l JOIN tasks t ON t.id = l.task_id \
             WHERE {where_clause}"
        ),
        rusqlite::params_from_iter(args.iter()),
        |r| r.get(0),
    )?;

    let mut all_args = args.clone();
    all_args.push(rusqlite::types::Value::Integer(limit));
    all_args.push(rusqlite::types::Value::Integer(offset));
    let sql = format!(
        "SELECT t.id, t.title, t.description, t.status, t.priority, t.parent_task_id, \
                t.depends_on, t.tags, t.blocker_reason, t.file_references, t.created_by, \
                t.created_at, t.updated_at, t.completed_at, t.deleted_at, t.workspace_metadata, \
                l.created_at, l.created_by \
         FROM task_entity_links l JOIN tasks t ON t.id = l.task_id \
         WHERE {where_clause} ORDER BY l.created_at DESC LIMIT ?{a} OFFSET ?{b}",
        a = args.len() + 1,
        b = args.len() + 2,
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(all_args.iter()), row_to_task_with_link)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok((rows, total))
}

fn row_to_entity_with_link(
    row: &Row<'_>,
) -> rusqlite::Result<(crate::models::entity::Entity, String, Option<String>)> {
    use crate::models::entity::{Entity, EntityType};
    let tags_str: String = row.get(6)?;
    let entity = Entity {
        id: row.get(0)?,
        entity_type: EntityType::parse(&row.get::<_, String>(1)?).unwrap_or(EntityType::Other),
        name: row.get(2)?,
        identifier: row.get(3)?,
        description: row.get(4)?,
        metadata: row.get(5)?,
        tags: serde_json::from_str(&tags_str).unwrap_or_default(),
        created_by: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
        deleted_at: row.get(10)?,
    };
    Ok((entity, row.get(11)?, row.get(12)?))
}

fn row_to_task_with_link(
    row: &Row<'_>,
) -> rusqlite::Result<(crate::models::task::Task, String, Option<String>)> {
    use crate::models::task::{Priority, Task, TaskStatus};
    let depends_on_str: String = row.get(6)?;
    let tags_str: String = row.get(7)?;
    let file_refs_str: String = row.get(9)?;
    let metadata_str: Option<String> = row.get(15)?;
    let task = Task {
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
    };
    Ok((task, row.get(16)?, row.get(17)?))
}
