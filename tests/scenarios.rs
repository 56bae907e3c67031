//! End-to-end scenario tests against `engine::Core`, using in-memory
//! SQLite databases for isolation. These exercise the same code paths an
//! MCP client drives through `src/bin/task-tracker-mcpd.rs`.

use task_tracker_core::engine::Core;
use task_tracker_core::models::entity::{EntityUpdate, NewEntity};
use task_tracker_core::models::task::{NewTask, TaskUpdate};
use task_tracker_core::store::entity_store::EntityFilters;
use task_tracker_core::store::task_store::TaskFilters;
use task_tracker_core::CoreError;

const WS: &str = "/tmp/task-tracker-test-workspace";

fn new_task(title: &str) -> NewTask {
    NewTask {
        title: title.to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn s1_dependency_gate_blocks_in_progress_and_done() {
    let core = Core::in_memory().expect("in-memory core");

    let blocker = core.create_task(WS, new_task("blocker")).await.expect("create blocker");
    let blocker_id = blocker["id"].as_i64().unwrap();

    let dependent = core
        .create_task(
            WS,
            NewTask {
                depends_on: Some(vec![blocker_id]),
                ..new_task("dependent")
            },
        )
        .await
        .expect("create dependent");
    let dependent_id = dependent["id"].as_i64().unwrap();

    // Blocker still todo: dependent cannot move to in_progress or done.
    let err = core
        .update_task(
            WS,
            dependent_id,
            TaskUpdate {
                status: Some("in_progress".to_string()),
                ..Default::default()
            },
        )
        .await
        .expect_err("dependency not yet satisfied");
    assert!(matches!(err, CoreError::DependencyNotSatisfied(_)));

    // Finish the blocker.
    core.update_task(
        WS,
        blocker_id,
        TaskUpdate {
            status: Some("done".to_string()),
            ..Default::default()
        },
    )
    .await
    .expect("complete blocker");

    // Now the dependent can proceed.
    let updated = core
        .update_task(
            WS,
            dependent_id,
            TaskUpdate {
                status: Some("in_progress".to_string()),
                ..Default::default()
            },
        )
        .await
        .expect("dependent now unblocked");
    assert_eq!(updated["status"], "in_progress");
}

#[tokio::test]
async fn s1_cycle_in_depends_on_is_rejected() {
    let core = Core::in_memory().expect("in-memory core");

    let a = core.create_task(WS, new_task("a")).await.unwrap();
    let a_id = a["id"].as_i64().unwrap();
    let b = core
        .create_task(
            WS,
            NewTask { depends_on: Some(vec![a_id]), ..new_task("b") },
        )
        .await
        .unwrap();
    let b_id = b["id"].as_i64().unwrap();

    let err = core
        .update_task(
            WS,
            a_id,
            TaskUpdate { depends_on: Some(vec![b_id]), ..Default::default() },
        )
        .await
        .expect_err("a depends on b depends on a");
    assert!(matches!(err, CoreError::Cycle(_)));
}

#[tokio::test]
async fn s2_blocker_reason_required_and_cleared() {
    let core = Core::in_memory().expect("in-memory core");
    let task = core.create_task(WS, new_task("needs input")).await.unwrap();
    let id = task["id"].as_i64().unwrap();

    let err = core
        .update_task(
            WS,
            id,
            TaskUpdate { status: Some("blocked".to_string()), ..Default::default() },
        )
        .await
        .expect_err("blocked without a reason");
    assert!(matches!(err, CoreError::BlockerReasonMissing));

    let blocked = core
        .update_task(
            WS,
            id,
            TaskUpdate {
                status: Some("blocked".to_string()),
                blocker_reason: Some("waiting on design review".to_string()),
                ..Default::default()
            },
        )
        .await
        .expect("blocked with reason");
    assert_eq!(blocked["status"], "blocked");
    assert_eq!(blocked["blocker_reason"], "waiting on design review");

    let unblocked = core
        .update_task(
            WS,
            id,
            TaskUpdate { status: Some("todo".to_string()), ..Default::default() },
        )
        .await
        .expect("back to todo");
    assert_eq!(unblocked["blocker_reason"], "");
}

#[tokio::test]
async fn s3_soft_delete_hides_then_cleanup_purges() {
    let core = Core::in_memory().expect("in-memory core");
    let parent = core.create_task(WS, new_task("parent")).await.unwrap();
    let parent_id = parent["id"].as_i64().unwrap();
    let child = core
        .create_task(
            WS,
            NewTask { parent_task_id: Some(parent_id), ..new_task("child") },
        )
        .await
        .unwrap();
    let child_id = child["id"].as_i64().unwrap();

    let result = core.delete_task(WS, parent_id, true).await.expect("cascade delete");
    let deleted_ids: Vec<i64> = result["deleted_task_ids"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_i64().unwrap())
        .collect();
    assert!(deleted_ids.contains(&parent_id));
    assert!(deleted_ids.contains(&child_id));

    // Listing live tasks no longer shows either one.
    let listed = core
        .list_tasks(WS, TaskFilters::default(), None, None, None)
        .await
        .unwrap();
    assert_eq!(listed["items"].as_array().unwrap().len(), 0);

    // But get_task still returns the soft-deleted record.
    let fetched = core.get_task(WS, child_id).await.expect("deleted task still gettable");
    assert!(fetched["deleted_at"].is_string());

    // A zero-day retention window purges it for good.
    let cleanup = core.cleanup_deleted_tasks(WS, 0).await.expect("cleanup");
    assert!(cleanup["purged"].as_u64().unwrap() >= 2);

    let err = core.get_task(WS, child_id).await.expect_err("purged for good");
    assert!(matches!(err, CoreError::NotFound(_)));
}

#[tokio::test]
async fn s4_entity_identifier_uniqueness_and_cascading_unlink() {
    let core = Core::in_memory().expect("in-memory core");

    let entity = core
        .create_entity(
            WS,
            NewEntity {
                entity_type: "file".to_string(),
                name: "main.rs".to_string(),
                identifier: Some("/tmp/task-tracker-test-workspace/src/main.rs".to_string()),
                ..Default::default()
            },
        )
        .await
        .expect("create entity");
    let entity_id = entity["id"].as_i64().unwrap();

    let err = core
        .create_entity(
            WS,
            NewEntity {
                entity_type: "file".to_string(),
                name: "main.rs again".to_string(),
                identifier: Some("/tmp/task-tracker-test-workspace/src/main.rs".to_string()),
                ..Default::default()
            },
        )
        .await
        .expect_err("duplicate identifier");
    assert!(matches!(err, CoreError::Conflict(_)));

    let task = core.create_task(WS, new_task("touches main.rs")).await.unwrap();
    let task_id = task["id"].as_i64().unwrap();
    core.link_entity_to_task(WS, task_id, entity_id, None)
        .await
        .expect("link");

    let linked = core
        .get_task_entities(WS, task_id, None, None, None)
        .await
        .expect("task entities");
    assert_eq!(linked["items"].as_array().unwrap().len(), 1);

    let delete_result = core.delete_entity(WS, entity_id).await.expect("delete entity");
    assert_eq!(delete_result["deleted_links"].as_u64().unwrap(), 1);

    let linked_after = core
        .get_task_entities(WS, task_id, None, None, None)
        .await
        .expect("task entities after delete");
    assert_eq!(linked_after["items"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn s4_entity_update_can_clear_optional_fields() {
    let core = Core::in_memory().expect("in-memory core");
    let entity = core
        .create_entity(
            WS,
            NewEntity {
                entity_type: "other".to_string(),
                name: "deploy-checklist".to_string(),
                identifier: Some("deploy-checklist".to_string()),
                description: Some("tracked separately".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let id = entity["id"].as_i64().unwrap();

    let updated = core
        .update_entity(
            WS,
            id,
            EntityUpdate {
                description: Some(None),
                ..Default::default()
            },
        )
        .await
        .expect("clear description");
    assert!(updated.get("description").is_none() || updated["description"].is_null());
}

#[tokio::test]
async fn s5_pagination_bounds_and_envelope_shape() {
    let core = Core::in_memory().expect("in-memory core");
    for i in 0..5 {
        core.create_task(WS, new_task(&format!("task-{i}"))).await.unwrap();
    }

    let page = core
        .list_tasks(WS, TaskFilters::default(), None, Some(2), Some(1))
        .await
        .expect("paginated list");
    assert_eq!(page["total_count"], 5);
    assert_eq!(page["returned_count"], 2);
    assert_eq!(page["limit"], 2);
    assert_eq!(page["offset"], 1);
    assert_eq!(page["items"].as_array().unwrap().len(), 2);

    let err = core
        .list_tasks(WS, TaskFilters::default(), None, Some(0), None)
        .await
        .expect_err("limit below minimum");
    assert!(matches!(err, CoreError::PaginationInvalid(_)));

    let err = core
        .list_tasks(WS, TaskFilters::default(), None, Some(5000), None)
        .await
        .expect_err("limit above maximum");
    assert!(matches!(err, CoreError::PaginationInvalid(_)));
}

#[tokio::test]
async fn s5_oversized_tree_trips_the_response_size_budget() {
    let core = Core::in_memory().expect("in-memory core");
    let root = core
        .create_task(
            WS,
            NewTask {
                description: Some("root of an oversized tree".to_string()),
                ..new_task("root")
            },
        )
        .await
        .unwrap();
    let root_id = root["id"].as_i64().unwrap();

    let huge_description = "x".repeat(2_000);
    for i in 0..40 {
        core.create_task(
            WS,
            NewTask {
                parent_task_id: Some(root_id),
                description: Some(format!("{huge_description}-{i}")),
                ..new_task(&format!("child-{i}"))
            },
        )
        .await
        .unwrap();
    }

    let err = core
        .get_task_tree(WS, root_id, Some("details"))
        .await
        .expect_err("tree exceeds the token budget");
    assert!(matches!(err, CoreError::ResponseSizeExceeded { .. }));
}

#[tokio::test]
async fn s6_workspaces_are_isolated_and_audit_flags_foreign_references() {
    let core = Core::in_memory().expect("in-memory core");
    let ws_a = "/tmp/task-tracker-workspace-a";
    let ws_b = "/tmp/task-tracker-workspace-b";

    let task_a = core.create_task(ws_a, new_task("only in a")).await.unwrap();
    core.create_task(ws_b, new_task("only in b")).await.unwrap();

    let listed_a = core
        .list_tasks(ws_a, TaskFilters::default(), None, None, None)
        .await
        .unwrap();
    assert_eq!(listed_a["items"].as_array().unwrap().len(), 1);
    assert_eq!(listed_a["items"][0]["title"], "only in a");

    let listed_b = core
        .list_tasks(ws_b, TaskFilters::default(), None, None, None)
        .await
        .unwrap();
    assert_eq!(listed_b["items"].as_array().unwrap().len(), 1);
    assert_eq!(listed_b["items"][0]["title"], "only in b");

    let task_a_id = task_a["id"].as_i64().unwrap();
    let validation = core.validate_task_workspace(ws_a, task_a_id).await.unwrap();
    assert_eq!(validation["valid"], true);
    assert_eq!(validation["workspace_match"], true);

    // A task in workspace A pointing at a file outside of A is flagged by
    // the audit's file-reference heuristic.
    core.create_task(
        ws_a,
        NewTask {
            file_references: Some(vec!["/tmp/task-tracker-workspace-b/src/lib.rs".to_string()]),
            ..new_task("suspicious")
        },
    )
    .await
    .unwrap();

    let audit = core
        .audit_workspace_integrity(ws_a, false, false)
        .await
        .expect("audit runs");
    assert_eq!(audit["contamination_found"], true);
    assert!(audit["issues"]["file_reference_mismatches"]
        .as_array()
        .unwrap()
        .iter()
        .any(|v| v["file_reference"] == "/tmp/task-tracker-workspace-b/src/lib.rs"));
}

#[tokio::test]
async fn workspace_registry_tracks_friendly_names() {
    let core = Core::in_memory().expect("in-memory core");
    core.create_task(WS, new_task("anchor")).await.unwrap();
    core.set_friendly_name(WS, "My Project".to_string()).await.expect("set name");

    let workspaces = core.list_workspaces().await.expect("list workspaces");
    let rows = workspaces.as_array().expect("array of workspace rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["friendly_name"], "My Project");
}

#[tokio::test]
async fn search_filters_by_entity_type_and_term() {
    let core = Core::in_memory().expect("in-memory core");
    core.create_entity(
        WS,
        NewEntity {
            entity_type: "file".to_string(),
            name: "config loader".to_string(),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    core.create_entity(
        WS,
        NewEntity {
            entity_type: "other".to_string(),
            name: "release checklist".to_string(),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let found = core
        .search_entities(
            WS,
            "config".to_string(),
            EntityFilters::default(),
            None,
            None,
            None,
        )
        .await
        .expect("search");
    assert_eq!(found["items"].as_array().unwrap().len(), 1);
    assert_eq!(found["items"][0]["name"], "config loader");
}
