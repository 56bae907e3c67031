//! Append-only usage telemetry.
//!
//! Recording is fire-and-forget: a dropped row is acceptable, a failed
//! core operation because telemetry hiccuped is not.

use crate::db::Database;
use crate::models::usage::UsageStats;
use crate::store::master_store;
use crate::util::now_iso;

/// Records one `tool_usage` row, swallowing any failure after logging it.
pub async fn record_usage(master_db: &Database, tool_name: &str, workspace_id: &str, success: bool) {
    let tool_name = tool_name.to_string();
    let workspace_id = workspace_id.to_string();
    let now = now_iso();
    let result = master_db
        .with_conn_async(move |conn| master_store::record_usage(conn, &tool_name, &workspace_id, &now, success))
        .await;
    if let Err(e) = result {
        tracing::warn!(error = %e, "failed to record tool usage, dropping");
    }
}

pub async fn get_usage_stats(
    master_db: &Database,
    days: u32,
    tool_name: Option<String>,
) -> crate::error::CoreResult<UsageStats> {
    let since = (chrono::Utc::now() - chrono::Duration::days(days as i64)).to_rfc3339();
    master_db
        .with_conn_async(move |conn| master_store::usage_stats(conn, &since, days, tool_name.as_deref()))
        .await
}
