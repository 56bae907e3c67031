//! Row-level operations on the `entities` table.

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::models::entity::{Entity, EntityType};

pub struct NewEntityRow<'a> {
    pub entity_type: EntityType,
    pub name: &'a str,
    pub identifier: Option<&'a str>,
    pub description: Option<&'a str>,
    pub metadata: Option<&'a str>,
    pub tags: &'a [String],
    pub created_by: Option<&'a str>,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

pub fn insert(conn: &Connection, row: &NewEntityRow<'_>) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO entities (
            entity_type, name, identifier, description, metadata, tags,
            created_by, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            row.entity_type.as_str(),
            row.name,
            row.identifier,
            row.description,
            row.metadata,
            serde_json::to_string(row.tags).unwrap_or_else(|_| "[]".into()),
            row.created_by,
            row.created_at,
            row.updated_at,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

const SELECT_COLUMNS: &str = "id, entity_type, name, identifier, description, metadata, tags, \
     created_by, created_at, updated_at, deleted_at";

pub fn get_by_id(conn: &Connection, id: i64) -> rusqlite::Result<Option<Entity>> {
    conn.query_row(
        &format!("SELECT {SELECT_COLUMNS} FROM entities WHERE id = ?1"),
        params![id],
        row_to_entity,
    )
    .optional()
}

pub fn get_live_by_id(conn: &Connection, id: i64) -> rusqlite::Result<Option<Entity>> {
    Ok(get_by_id(conn, id)?.filter(|e| !e.is_deleted()))
}

pub fn exists_live(conn: &Connection, id: i64) -> rusqlite::Result<bool> {
    Ok(get_live_by_id(conn, id)?.is_some())
}

/// Is there a live entity with the same `(entity_type, identifier)`?
/// A null identifier never collides.
pub fn conflicts_on_identifier(
    conn: &Connection,
    entity_type: EntityType,
    identifier: &str,
    exclude_id: Option<i64>,
) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM entities WHERE entity_type = ?1 AND identifier = ?2 \
         AND deleted_at IS NULL AND id != COALESCE(?3, -1)",
        params![entity_type.as_str(), identifier, exclude_id],
        |r| r.get(0),
    )?;
    Ok(count > 0)
}

#[derive(Debug, Clone, Default)]
pub struct EntityFilters {
    pub entity_type: Option<EntityType>,
    pub tags_substring: Option<String>,
    pub search_term: Option<String>,
}

pub fn list(
    conn: &Connection,
    filters: &EntityFilters,
    limit: i64,
    offset: i64,
) -> rusqlite::Result<(Vec<Entity>, i64)> {
    let (where_clause, args) = build_where(filters);
    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM entities WHERE {where_clause}"),
        rusqlite::params_from_iter(args.iter()),
        |r| r.get(0),
    )?;

    let mut all_args = args.clone();
    all_args.push(SqlValue::Integer(limit));
    all_args.push(SqlValue::Integer(offset));
    let sql = format!(
        "SELECT {SELECT_COLUMNS} FROM entities WHERE {where_clause} \
         ORDER BY created_at DESC LIMIT ?{a} OFFSET ?{b}",
        a = args.len() + 1,
        b = args.len() + 2,
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(all_args.iter()), row_to_entity)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok((rows, total))
}

fn build_where(filters: &EntityFilters) -> (String, Vec<SqlValue>) {
    let mut clauses = vec!["deleted_at IS NULL".to_string()];
    let mut args = Vec::new();

    if let Some(t) = filters.entity_type {
        clauses.push(format!("entity_type = ?{}", args.len() + 1));
        args.push(SqlValue::Text(t.as_str().to_string()));
    }
    if let Some(tag) = &filters.tags_substring {
        clauses.push(format!("tags LIKE ?{}", args.len() + 1));
        args.push(SqlValue::Text(format!("%{}%", tag.to_lowercase())));
    }
    if let Some(term) = &filters.search_term {
        let idx = args.len() + 1;
        clauses.push(format!(
            "(LOWER(name) LIKE ?{idx} OR LOWER(COALESCE(identifier, '')) LIKE ?{idx})"
        ));
        args.push(SqlValue::Text(format!("%{}%", term.to_lowercase())));
    }

    (clauses.join(" AND "), args)
}

#[allow(clippy::too_many_arguments)]
pub fn apply_update(
    conn: &Connection,
    id: i64,
    name: Option<&str>,
    identifier: Option<Option<&str>>,
    description: Option<Option<&str>>,
    metadata: Option<&str>,
    tags: Option<&[String]>,
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

    if let Some(v) = name {
        push!("name", SqlValue::Text(v.to_string()));
    }
    if let Some(v) = identifier {
        push!("identifier", v.map(|s| SqlValue::Text(s.to_string())).unwrap_or(SqlValue::Null));
    }
    if let Some(v) = description {
        push!("description", v.map(|s| SqlValue::Text(s.to_string())).unwrap_or(SqlValue::Null));
    }
    if let Some(v) = metadata {
        push!("metadata", SqlValue::Text(v.to_string()));
    }
    if let Some(v) = tags {
        push!("tags", SqlValue::Text(serde_json::to_string(v).unwrap_or_else(|_| "[]".into())));
    }

    args.push(SqlValue::Integer(id));
    let sql = format!("UPDATE entities SET {} WHERE id = ?{}", sets.join(", "), args.len());
    conn.execute(&sql, rusqlite::params_from_iter(args.iter()))?;
    Ok(())
}

pub fn soft_delete(conn: &Connection, id: i64, deleted_at: &str) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE entities SET deleted_at = ?1 WHERE id = ?2",
        params![deleted_at, id],
    )?;
    Ok(())
}

pub fn all_live(conn: &Connection) -> rusqlite::Result<Vec<Entity>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SELECT_COLUMNS} FROM entities WHERE deleted_at IS NULL"
    ))?;
    stmt.query_map([], row_to_entity)?.collect()
}

/// Every entity row regardless of soft-delete state, used by the audit
/// component's `include_deleted` option.
pub fn all_rows(conn: &Connection) -> rusqlite::Result<Vec<Entity>> {
    let mut stmt = conn.prepare(&format!("SELECT {SELECT_COLUMNS} FROM entities"))?;
    stmt.query_map([], row_to_entity)?.collect()
}

fn row_to_entity(row: &Row<'_>) -> rusqlite::Result<Entity> {
    let tags_str: String = row.get(6)?;
    Ok(Entity {
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
    })
}
