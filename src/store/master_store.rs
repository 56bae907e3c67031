//! Row-level operations on the master registry (`workspaces`,
//! `tool_usage`).

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::models::usage::{ToolUsageBreakdown, UsageDay, UsageStats};
use crate::models::workspace::WorkspaceRecord;

/// Idempotent registration: insert on first sight, otherwise bump
/// `last_accessed`.
pub fn register(
    conn: &Connection,
    id: &str,
    workspace_path: &str,
    now: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO workspaces (id, workspace_path, friendly_name, created_at, last_accessed) \
         VALUES (?1, ?2, NULL, ?3, ?3) \
         ON CONFLICT(id) DO UPDATE SET last_accessed = excluded.last_accessed",
        params![id, workspace_path, now],
    )?;
    Ok(())
}

pub fn set_friendly_name(conn: &Connection, id: &str, name: &str) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE workspaces SET friendly_name = ?1 WHERE id = ?2",
        params![name, id],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, id: &str) -> rusqlite::Result<Option<WorkspaceRecord>> {
    conn.query_row(
        "SELECT id, workspace_path, friendly_name, created_at, last_accessed \
         FROM workspaces WHERE id = ?1",
        params![id],
        row_to_workspace,
    )
    .optional()
}

pub fn list(conn: &Connection) -> rusqlite::Result<Vec<WorkspaceRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, workspace_path, friendly_name, created_at, last_accessed \
         FROM workspaces ORDER BY last_accessed DESC",
    )?;
    stmt.query_map([], row_to_workspace)?.collect()
}

fn row_to_workspace(row: &Row<'_>) -> rusqlite::Result<WorkspaceRecord> {
    Ok(WorkspaceRecord {
        id: row.get(0)?,
        workspace_path: row.get(1)?,
        friendly_name: row.get(2)?,
        created_at: row.get(3)?,
        last_accessed: row.get(4)?,
    })
}

pub fn record_usage(
    conn: &Connection,
    tool_name: &str,
    workspace_id: &str,
    timestamp: &str,
    success: bool,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO tool_usage (tool_name, workspace_id, timestamp, success) \
         VALUES (?1, ?2, ?3, ?4)",
        params![tool_name, workspace_id, timestamp, success],
    )?;
    Ok(())
}

/// Aggregate usage over the last `days` days, optionally scoped to one
/// tool. All aggregation runs in SQL.
pub fn usage_stats(
    conn: &Connection,
    since: &str,
    days: u32,
    tool_name: Option<&str>,
) -> rusqlite::Result<UsageStats> {
    let tool_clause = tool_name.map(|_| " AND tool_name = ?2").unwrap_or("");

    let total_calls: i64 = if let Some(t) = tool_name {
        conn.query_row(
            &format!("SELECT COUNT(*) FROM tool_usage WHERE timestamp >= ?1{tool_clause}"),
            params![since, t],
            |r| r.get(0),
        )?
    } else {
        conn.query_row(
            "SELECT COUNT(*) FROM tool_usage WHERE timestamp >= ?1",
            params![since],
            |r| r.get(0),
        )?
    };

    let by_tool = {
        let sql = format!(
            "SELECT tool_name, COUNT(*) as calls, SUM(success) as successes \
             FROM tool_usage WHERE timestamp >= ?1{tool_clause} \
             GROUP BY tool_name ORDER BY calls DESC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows: Vec<(String, i64, i64)> = if let Some(t) = tool_name {
            stmt.query_map(params![since, t], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get::<_, Option<i64>>(2)?.unwrap_or(0)))
            })?
            .collect::<rusqlite::Result<_>>()?
        } else {
            stmt.query_map(params![since], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get::<_, Option<i64>>(2)?.unwrap_or(0)))
            })?
            .collect::<rusqlite::Result<_>>()?
        };
        rows.into_iter()
            .map(|(tool_name, calls, successes)| ToolUsageBreakdown {
                tool_name,
                calls,
                successes,
                success_rate: if calls > 0 {
                    successes as f64 / calls as f64
                } else {
                    0.0
                },
            })
            .collect()
    };

    let timeline = {
        let sql = format!(
            "SELECT date(timestamp) as day, COUNT(*) as calls \
             FROM tool_usage WHERE timestamp >= ?1{tool_clause} \
             GROUP BY day ORDER BY day ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows: Vec<(String, i64)> = if let Some(t) = tool_name {
            stmt.query_map(params![since, t], |r| Ok((r.get(0)?, r.get(1)?)))?
                .collect::<rusqlite::Result<_>>()?
        } else {
            stmt.query_map(params![since], |r| Ok((r.get(0)?, r.get(1)?)))?
                .collect::<rusqlite::Result<_>>()?
        };
        rows.into_iter()
            .map(|(date, calls)| UsageDay { date, calls })
            .collect()
    };

    Ok(UsageStats {
        window_days: days,
        total_calls,
        by_tool,
        timeline,
    })
}
