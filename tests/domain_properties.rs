//! Property-based tests over the domain engine's core invariants.
//!
//! Each `proptest!` block drives `engine::Core::in_memory()` through a
//! small number of random operations and checks an invariant that must
//! hold no matter what sequence of valid inputs produced the task. Grounded
//! in the same `tests/*_properties.rs` shape used elsewhere in the pack
//! (custom strategies for small enums, a `proptest!` block per invariant).

use proptest::prelude::*;
use task_tracker_core::engine::Core;
use task_tracker_core::models::task::{NewTask, TaskUpdate};
use task_tracker_core::store::task_store::TaskFilters;

const WS: &str = "/tmp/task-tracker-proptest-workspace";

fn status_strategy() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("todo"),
        Just("in_progress"),
        Just("blocked"),
        Just("done"),
        Just("cancelled"),
        Just("to_be_deleted"),
    ]
}

fn title_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z][a-zA-Z0-9 _-]{0,40}"
}

fn tag_list_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[A-Za-z ]{1,12}", 0..5)
}

fn block_on<F: std::future::Future>(f: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("build current-thread runtime")
        .block_on(f)
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 48, ..ProptestConfig::default() })]

    /// Invariant 1 (spec §8): for every task, `status = "blocked"` iff
    /// `blocker_reason` is non-empty — whether that status is reached by
    /// creation or by a later update, with or without an explicit reason.
    #[test]
    fn blocked_iff_blocker_reason_nonempty(
        title in title_strategy(),
        status in status_strategy(),
        reason in prop_oneof![Just(None), Just(Some("because reasons".to_string()))],
    ) {
        block_on(async {
            let core = Core::in_memory().expect("in-memory core");
            let result = core
                .create_task(
                    WS,
                    NewTask {
                        title,
                        status: Some(status.to_string()),
                        blocker_reason: reason,
                        ..Default::default()
                    },
                )
                .await;

            if status == "blocked" {
                match result {
                    Ok(task) => {
                        prop_assert_eq!(task["status"], "blocked");
                        prop_assert!(!task["blocker_reason"].as_str().unwrap().is_empty());
                    }
                    Err(_) => {
                        // No reason supplied: BlockerReasonMissing is the
                        // only acceptable failure.
                    }
                }
            } else if let Ok(task) = result {
                prop_assert_eq!(task["blocker_reason"].as_str().unwrap(), "");
            }
            Ok(())
        })?;
    }

    /// Invariant 3 (spec §8): `completed_at` is set iff `status = "done"`,
    /// across an arbitrary sequence of two status updates.
    #[test]
    fn completed_at_tracks_done_status(
        title in title_strategy(),
        first in status_strategy(),
        second in status_strategy(),
    ) {
        block_on(async {
            let core = Core::in_memory().expect("in-memory core");
            let created = core
                .create_task(WS, NewTask { title, ..Default::default() })
                .await
                .expect("create always succeeds for todo default");
            let id = created["id"].as_i64().unwrap();

            for status in [first, second] {
                let reason = if status == "blocked" {
                    Some("proptest reason".to_string())
                } else {
                    None
                };
                let result = core
                    .update_task(
                        WS,
                        id,
                        TaskUpdate {
                            status: Some(status.to_string()),
                            blocker_reason: reason,
                            ..Default::default()
                        },
                    )
                    .await;
                if let Ok(task) = result {
                    let is_done = task["status"] == "done";
                    prop_assert_eq!(!task["completed_at"].is_null(), is_done);
                }
            }
            Ok(())
        })?;
    }

    /// Invariant 4 (spec §8): a soft-deleted task never reappears in
    /// `list_tasks`, regardless of what filters are applied.
    #[test]
    fn soft_deleted_tasks_never_appear_in_listings(
        title in title_strategy(),
        tags in tag_list_strategy(),
    ) {
        block_on(async {
            let core = Core::in_memory().expect("in-memory core");
            let created = core
                .create_task(
                    WS,
                    NewTask {
                        title: title.clone(),
                        tags: Some(tags),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
            let id = created["id"].as_i64().unwrap();

            core.delete_task(WS, id, false).await.expect("soft delete");

            let listed = core
                .list_tasks(WS, TaskFilters::default(), None, Some(1000), None)
                .await
                .unwrap();
            let titles: Vec<String> = listed["items"]
                .as_array()
                .unwrap()
                .iter()
                .map(|t| t["title"].as_str().unwrap().to_string())
                .collect();
            prop_assert!(!titles.contains(&title));
            Ok(())
        })?;
    }

    /// Invariant 8 (spec §8): paginating through every page at a fixed
    /// limit and concatenating the pages reproduces the single
    /// unpaginated listing, in order.
    #[test]
    fn pagination_pages_concatenate_to_the_full_listing(
        count in 1usize..12,
        limit in 1i64..6,
    ) {
        block_on(async {
            let core = Core::in_memory().expect("in-memory core");
            for i in 0..count {
                core.create_task(WS, NewTask { title: format!("t{i}"), ..Default::default() })
                    .await
                    .unwrap();
            }

            let full = core
                .list_tasks(WS, TaskFilters::default(), None, Some(1000), Some(0))
                .await
                .unwrap();
            let full_ids: Vec<i64> = full["items"]
                .as_array()
                .unwrap()
                .iter()
                .map(|t| t["id"].as_i64().unwrap())
                .collect();

            let mut paged_ids = Vec::new();
            let mut offset = 0i64;
            loop {
                let page = core
                    .list_tasks(WS, TaskFilters::default(), None, Some(limit), Some(offset))
                    .await
                    .unwrap();
                let items = page["items"].as_array().unwrap();
                if items.is_empty() {
                    break;
                }
                paged_ids.extend(items.iter().map(|t| t["id"].as_i64().unwrap()));
                offset += limit;
                if offset >= full_ids.len() as i64 {
                    break;
                }
            }

            prop_assert_eq!(paged_ids, full_ids);
            Ok(())
        })?;
    }

    /// Invariant 9 (spec §8): for task listings, the keys present in
    /// summary mode are a subset of the keys present in details mode, and
    /// summary is never empty.
    #[test]
    fn summary_keys_subset_of_details_keys(title in title_strategy()) {
        block_on(async {
            let core = Core::in_memory().expect("in-memory core");
            core.create_task(WS, NewTask { title, ..Default::default() }).await.unwrap();

            let summary = core
                .list_tasks(WS, TaskFilters::default(), Some("summary"), None, None)
                .await
                .unwrap();
            let details = core
                .list_tasks(WS, TaskFilters::default(), Some("details"), None, None)
                .await
                .unwrap();

            let summary_item = summary["items"][0].as_object().unwrap();
            let details_item = details["items"][0].as_object().unwrap();
            prop_assert!(!summary_item.is_empty());
            for key in summary_item.keys() {
                prop_assert!(details_item.contains_key(key));
            }
            Ok(())
        })?;
    }
}

#[cfg(test)]
mod cycle_prevention {
    use super::*;

    /// Invariant 10 (spec §8): a chain of valid `update_task` calls can
    /// never produce a cycle in `depends_on` — the engine rejects the
    /// closing edge instead of silently accepting it.
    #[tokio::test]
    async fn three_node_dependency_chain_cannot_be_closed_into_a_cycle() {
        let core = Core::in_memory().expect("in-memory core");
        let a = core.create_task(WS, NewTask { title: "a".into(), ..Default::default() }).await.unwrap();
        let a_id = a["id"].as_i64().unwrap();
        let b = core
            .create_task(WS, NewTask { title: "b".into(), depends_on: Some(vec![a_id]), ..Default::default() })
            .await
            .unwrap();
        let b_id = b["id"].as_i64().unwrap();
        let c = core
            .create_task(WS, NewTask { title: "c".into(), depends_on: Some(vec![b_id]), ..Default::default() })
            .await
            .unwrap();
        let c_id = c["id"].as_i64().unwrap();

        // a -> b -> c already exists; closing c -> a would cycle.
        let err = core
            .update_task(WS, a_id, TaskUpdate { depends_on: Some(vec![c_id]), ..Default::default() })
            .await
            .expect_err("closing the chain into a cycle must fail");
        assert!(matches!(err, task_tracker_core::CoreError::Cycle(_)));
    }

    #[tokio::test]
    async fn parent_chain_cannot_be_closed_into_a_cycle() {
        let core = Core::in_memory().expect("in-memory core");
        let a = core.create_task(WS, NewTask { title: "a".into(), ..Default::default() }).await.unwrap();
        let a_id = a["id"].as_i64().unwrap();
        let b = core
            .create_task(WS, NewTask { title: "b".into(), parent_task_id: Some(a_id), ..Default::default() })
            .await
            .unwrap();
        let b_id = b["id"].as_i64().unwrap();

        let err = core
            .update_task(WS, a_id, TaskUpdate { parent_task_id: Some(Some(b_id)), ..Default::default() })
            .await
            .expect_err("a cannot become a child of its own child");
        assert!(matches!(err, task_tracker_core::CoreError::Cycle(_)));
    }
}
