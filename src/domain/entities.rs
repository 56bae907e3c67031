//! Domain engine — entity operations and task-entity linking.

use rusqlite::Connection;

use crate::db::Database;
use crate::error::{CoreError, CoreResult};
use crate::models::entity::{Entity, EntityType, EntityUpdate, NewEntity};
use crate::models::task::{Priority, Task, TaskStatus};
use crate::models::{self};
use crate::store::entity_store::{self, EntityFilters};
use crate::store::{link_store, task_store};
use crate::util::{now_iso, MAX_DESCRIPTION_LEN};

pub async fn create_entity(db: &Database, new_entity: NewEntity) -> CoreResult<Entity> {
    db.with_tx_async(move |tx| create_entity_tx(tx, &new_entity)).await
}

fn create_entity_tx(conn: &Connection, n: &NewEntity) -> CoreResult<Entity> {
    let entity_type = EntityType::parse(&n.entity_type)
        .ok_or_else(|| CoreError::InvalidInput(format!("invalid entity_type: {}", n.entity_type)))?;

    if n.name.trim().is_empty() {
        return Err(CoreError::InvalidInput("name must not be empty".into()));
    }
    validate_description(&n.description)?;

    if let Some(id) = &n.identifier {
        if entity_store::conflicts_on_identifier(conn, entity_type, id, None)? {
            return Err(CoreError::Conflict(format!(
                "an entity of type {} with identifier {id:?} already exists",
                entity_type.as_str()
            )));
        }
    }

    let metadata = canonicalize_metadata(&n.metadata)?;
    let tags = models::normalize_tags(&n.tags.clone().unwrap_or_default());
    let now = now_iso();

    let row = entity_store::NewEntityRow {
        entity_type,
        name: n.name.trim(),
        identifier: n.identifier.as_deref(),
        description: n.description.as_deref(),
        metadata: metadata.as_deref(),
        tags: &tags,
        created_by: n.created_by.as_deref(),
        created_at: &now,
        updated_at: &now,
    };

    let id = entity_store::insert(conn, &row)?;
    entity_store::get_by_id(conn, id)?
        .ok_or_else(|| CoreError::Internal("entity vanished immediately after insert".into()))
}

/// Returns the entity even when soft-deleted.
pub async fn get_entity(db: &Database, id: i64) -> CoreResult<Entity> {
    db.with_conn_async(move |conn| entity_store::get_by_id(conn, id))
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("entity {id}")))
}

pub async fn update_entity(db: &Database, id: i64, update: EntityUpdate) -> CoreResult<Entity> {
    db.with_tx_async(move |tx| update_entity_tx(tx, id, &update)).await
}

fn update_entity_tx(conn: &Connection, id: i64, update: &EntityUpdate) -> CoreResult<Entity> {
    let current = entity_store::get_by_id(conn, id)?
        .filter(|e| !e.is_deleted())
        .ok_or_else(|| CoreError::NotFound(format!("entity {id}")))?;

    if let Some(name) = &update.name {
        if name.trim().is_empty() {
            return Err(CoreError::InvalidInput("name must not be empty".into()));
        }
    }
    if let Some(Some(desc)) = &update.description {
        if desc.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(CoreError::InvalidInput("description exceeds 10,000 chars".into()));
        }
    }

    if let Some(Some(new_id)) = &update.identifier {
        if entity_store::conflicts_on_identifier(conn, current.entity_type, new_id, Some(id))? {
            return Err(CoreError::Conflict(format!(
                "an entity of type {} with identifier {new_id:?} already exists",
                current.entity_type.as_str()
            )));
        }
    }

    let metadata = match &update.metadata {
        Some(v) => Some(canonicalize_metadata(&Some(v.clone()))?.unwrap_or_default()),
        None => None,
    };
    let tags = update.tags.as_ref().map(|t| models::normalize_tags(t));
    let now = now_iso();

    entity_store::apply_update(
        conn,
        id,
        update.name.as_deref(),
        update.identifier.as_ref().map(|o| o.as_deref()),
        update.description.as_ref().map(|o| o.as_deref()),
        metadata.as_deref(),
        tags.as_deref(),
        &now,
    )?;

    entity_store::get_by_id(conn, id)?
        .ok_or_else(|| CoreError::Internal("entity vanished immediately after update".into()))
}

pub async fn list_entities(
    db: &Database,
    filters: EntityFilters,
    limit: i64,
    offset: i64,
) -> CoreResult<(Vec<Entity>, i64)> {
    Ok(db
        .with_conn_async(move |conn| entity_store::list(conn, &filters, limit, offset))
        .await?)
}

pub async fn search_entities(
    db: &Database,
    term: String,
    mut filters: EntityFilters,
    limit: i64,
    offset: i64,
) -> CoreResult<(Vec<Entity>, i64)> {
    filters.search_term = Some(term);
    list_entities(db, filters, limit, offset).await
}

pub struct DeleteEntityResult {
    pub deleted_links: usize,
}

pub async fn delete_entity(db: &Database, id: i64) -> CoreResult<DeleteEntityResult> {
    db.with_tx_async(move |tx| delete_entity_tx(tx, id)).await
}

fn delete_entity_tx(conn: &Connection, id: i64) -> CoreResult<DeleteEntityResult> {
    entity_store::get_by_id(conn, id)?
        .filter(|e| !e.is_deleted())
        .ok_or_else(|| CoreError::NotFound(format!("entity {id}")))?;

    let now = now_iso();
    entity_store::soft_delete(conn, id, &now)?;
    let deleted_links = link_store::soft_delete_for_entity(conn, id, &now)?;
    Ok(DeleteEntityResult { deleted_links })
}

pub async fn link_entity_to_task(
    db: &Database,
    task_id: i64,
    entity_id: i64,
    created_by: Option<String>,
) -> CoreResult<()> {
    db.with_tx_async(move |tx| link_entity_to_task_tx(tx, task_id, entity_id, created_by.as_deref()))
        .await
}

fn link_entity_to_task_tx(
    conn: &Connection,
    task_id: i64,
    entity_id: i64,
    created_by: Option<&str>,
) -> CoreResult<()> {
    if !task_store::exists_live(conn, task_id)? {
        return Err(CoreError::NotFound(format!("task {task_id}")));
    }
    if !entity_store::exists_live(conn, entity_id)? {
        return Err(CoreError::NotFound(format!("entity {entity_id}")));
    }
    if link_store::exists_live(conn, task_id, entity_id)? {
        return Err(CoreError::Conflict(format!(
            "task {task_id} is already linked to entity {entity_id}"
        )));
    }

    let now = now_iso();
    link_store::insert(conn, task_id, entity_id, created_by, &now)?;
    Ok(())
}

pub async fn get_task_entities(
    db: &Database,
    task_id: i64,
    limit: i64,
    offset: i64,
) -> CoreResult<(Vec<(Entity, String, Option<String>)>, i64)> {
    db.with_conn_async(move |conn| {
        if !task_store::exists_live(conn, task_id)? {
            return Ok((Vec::new(), 0));
        }
        link_store::entities_for_task(conn, task_id, limit, offset)
    })
    .await
}

pub async fn get_entity_tasks(
    db: &Database,
    entity_id: i64,
    status: Option<String>,
    priority: Option<String>,
    limit: i64,
    offset: i64,
) -> CoreResult<(Vec<(Task, String, Option<String>)>, i64)> {
    if let Some(s) = &status {
        TaskStatus::parse(s).ok_or_else(|| CoreError::InvalidInput(format!("invalid status: {s}")))?;
    }
    if let Some(p) = &priority {
        Priority::parse(p).ok_or_else(|| CoreError::InvalidInput(format!("invalid priority: {p}")))?;
    }
    db.with_conn_async(move |conn| {
        link_store::tasks_for_entity(
            conn,
            entity_id,
            status.as_deref(),
            priority.as_deref(),
            limit,
            offset,
        )
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

/// Metadata arrives as arbitrary JSON and is stored as its canonical
/// string form.
fn canonicalize_metadata(value: &Option<serde_json::Value>) -> CoreResult<Option<String>> {
    match value {
        None => Ok(None),
        Some(serde_json::Value::Null) => Ok(None),
        Some(v) => Ok(Some(
            serde_json::to_string(v).map_err(|e| CoreError::InvalidInput(format!("invalid metadata: {e}")))?,
        )),
    }
}
