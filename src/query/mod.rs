//! Query & projection layer: mode projection, pagination envelopes, and
//! the response-size budget. Nothing below this module knows about any
//! of the three — domain functions return full rows, and everything
//! here is a pure transformation over already-fetched data.

use serde::Serialize;
use serde_json::{json, Value};

use crate::error::{CoreError, CoreResult};
use crate::models::entity::Entity;
use crate::models::task::{Task, TaskTreeNode};

pub const DEFAULT_LIMIT: i64 = 100;
pub const MIN_LIMIT: i64 = 1;
pub const MAX_LIMIT: i64 = 1000;

const TOKEN_WARN_THRESHOLD: usize = 12_000;
const TOKEN_HARD_CEILING: usize = 15_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Summary,
    Details,
}

impl Mode {
    pub fn parse(s: Option<&str>) -> CoreResult<Self> {
        match s.unwrap_or("summary") {
            "summary" => Ok(Self::Summary),
            "details" => Ok(Self::Details),
            other => Err(CoreError::InvalidMode(other.to_string())),
        }
    }
}

/// Validates `limit`/`offset` against the shared pagination contract.
pub fn validate_pagination(limit: Option<i64>, offset: Option<i64>) -> CoreResult<(i64, i64)> {
    let limit = limit.unwrap_or(DEFAULT_LIMIT);
    let offset = offset.unwrap_or(0);
    if !(MIN_LIMIT..=MAX_LIMIT).contains(&limit) {
        return Err(CoreError::PaginationInvalid(format!(
            "limit must be in [{MIN_LIMIT}, {MAX_LIMIT}], got {limit}"
        )));
    }
    if offset < 0 {
        return Err(CoreError::PaginationInvalid(format!("offset must be >= 0, got {offset}")));
    }
    Ok((limit, offset))
}

/// Monotonic token estimate (chars / 4, rounded up). Not pinned to any
/// particular tokenizer — only required to be monotonic in response size.
pub fn estimate_tokens(value: &Value) -> usize {
    let rendered = value.to_string();
    rendered.len().div_ceil(4)
}

/// Final projection step: serializes `body`, checks the token budget,
/// and either returns the value or a structured `ResponseSizeExceeded`.
pub fn enforce_size_budget(body: Value) -> CoreResult<Value> {
    let tokens = estimate_tokens(&body);
    if tokens >= TOKEN_HARD_CEILING {
        return Err(CoreError::ResponseSizeExceeded {
            actual_tokens: tokens,
            max_tokens: TOKEN_HARD_CEILING,
            suggestion: "narrow the result with pagination, summary mode, or tighter filters".into(),
        });
    }
    if tokens >= TOKEN_WARN_THRESHOLD {
        tracing::warn!(actual_tokens = tokens, max_tokens = TOKEN_HARD_CEILING, "response size approaching budget");
    }
    Ok(body)
}

/// Wraps a page of already-projected items in the shared pagination
/// envelope and runs it through the size budget.
pub fn paginate_envelope(
    items: Vec<Value>,
    total_count: i64,
    limit: i64,
    offset: i64,
) -> CoreResult<Value> {
    let returned_count = items.len();
    let envelope = json!({
        "total_count": total_count,
        "returned_count": returned_count,
        "limit": limit,
        "offset": offset,
        "items": items,
    });
    enforce_size_budget(envelope)
}

#[derive(Serialize)]
struct TaskSummary<'a> {
    id: i64,
    title: &'a str,
    status: &'a str,
    priority: &'a str,
    tags: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_task_id: Option<i64>,
    created_at: &'a str,
    updated_at: &'a str,
}

pub fn project_task(task: &Task, mode: Mode) -> Value {
    let summary = TaskSummary {
        id: task.id,
        title: &task.title,
        status: task.status.as_str(),
        priority: task.priority.as_str(),
        tags: &task.tags,
        parent_task_id: task.parent_task_id,
        created_at: &task.created_at,
        updated_at: &task.updated_at,
    };
    let mut value = serde_json::to_value(summary).expect("TaskSummary always serializes");
    if mode == Mode::Details {
        let details = json!({
            "description": task.description,
            "depends_on": task.depends_on,
            "blocker_reason": task.blocker_reason,
            "file_references": task.file_references,
            "created_by": task.created_by,
            "completed_at": task.completed_at,
            "deleted_at": task.deleted_at,
            "workspace_metadata": task.workspace_metadata,
        });
        merge_into(&mut value, details);
    }
    value
}

pub fn project_task_tree(node: &TaskTreeNode, mode: Mode) -> Value {
    let mut value = project_task(&node.task, mode);
    let children: Vec<Value> = node.children.iter().map(|c| project_task_tree(c, mode)).collect();
    merge_into(&mut value, json!({ "children": children }));
    value
}

#[derive(Serialize)]
struct EntitySummary<'a> {
    id: i64,
    entity_type: &'a str,
    name: &'a str,
    identifier: &'a Option<String>,
    tags: &'a [String],
    created_at: &'a str,
}

pub fn project_entity(entity: &Entity, mode: Mode) -> Value {
    let summary = EntitySummary {
        id: entity.id,
        entity_type: entity.entity_type.as_str(),
        name: &entity.name,
        identifier: &entity.identifier,
        tags: &entity.tags,
        created_at: &entity.created_at,
    };
    let mut value = serde_json::to_value(summary).expect("EntitySummary always serializes");
    if mode == Mode::Details {
        let details = json!({
            "description": entity.description,
            "metadata": entity.metadata,
            "created_by": entity.created_by,
            "updated_at": entity.updated_at,
            "deleted_at": entity.deleted_at,
        });
        merge_into(&mut value, details);
    }
    value
}

/// A relationship row carries `link_created_at`/`link_created_by`
/// regardless of mode, alongside the projected entity or task.
pub fn project_entity_with_link(entity: &Entity, mode: Mode, link_created_at: &str, link_created_by: Option<&str>) -> Value {
    let mut value = project_entity(entity, mode);
    merge_into(
        &mut value,
        json!({ "link_created_at": link_created_at, "link_created_by": link_created_by }),
    );
    value
}

pub fn project_task_with_link(task: &Task, mode: Mode, link_created_at: &str, link_created_by: Option<&str>) -> Value {
    let mut value = project_task(task, mode);
    merge_into(
        &mut value,
        json!({ "link_created_at": link_created_at, "link_created_by": link_created_by }),
    );
    value
}

fn merge_into(base: &mut Value, extra: Value) {
    let (Value::Object(base_map), Value::Object(extra_map)) = (base, extra) else {
        return;
    };
    base_map.extend(extra_map);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_defaults_and_bounds() {
        assert_eq!(validate_pagination(None, None).unwrap(), (100, 0));
        assert!(validate_pagination(Some(0), None).is_err());
        assert!(validate_pagination(Some(1001), None).is_err());
        assert!(validate_pagination(Some(100), Some(-1)).is_err());
        assert_eq!(validate_pagination(Some(1), Some(0)).unwrap(), (1, 0));
        assert_eq!(validate_pagination(Some(1000), Some(0)).unwrap(), (1000, 0));
    }

    #[test]
    fn mode_parsing_rejects_unknown_values() {
        assert!(matches!(Mode::parse(None), Ok(Mode::Summary)));
        assert!(matches!(Mode::parse(Some("summary")), Ok(Mode::Summary)));
        assert!(matches!(Mode::parse(Some("details")), Ok(Mode::Details)));
        assert!(Mode::parse(Some("verbose")).is_err());
    }

    #[test]
    fn summary_keys_are_a_subset_of_details_keys() {
        let task = Task {
            id: 1,
            title: "t".into(),
            description: Some("d".into()),
            status: crate::models::task::TaskStatus::Todo,
            priority: crate::models::task::Priority::Medium,
            parent_task_id: None,
            depends_on: vec![],
            tags: vec![],
            blocker_reason: String::new(),
            file_references: vec![],
            created_by: None,
            created_at: "now".into(),
            updated_at: "now".into(),
            completed_at: None,
            deleted_at: None,
            workspace_metadata: None,
        };
        let summary = project_task(&task, Mode::Summary);
        let details = project_task(&task, Mode::Details);
        let summary_keys = summary.as_object().unwrap().keys().collect::<Vec<_>>();
        let details_keys = details.as_object().unwrap();
        assert!(!summary_keys.is_empty());
        for k in summary_keys {
            assert!(details_keys.contains_key(k), "summary key {k} missing from details");
        }
    }

    #[test]
    fn size_budget_trips_on_oversized_payload() {
        let huge = json!({ "items": vec!["x".repeat(100); 1000] });
        assert!(enforce_size_budget(huge).is_err());
        assert!(enforce_size_budget(json!({ "items": [] })).is_ok());
    }
}
