//! Schema for the master registry database: `workspaces` and the
//! append-only `tool_usage` log.

use rusqlite::Connection;

use crate::db::Database;
use crate::error::CoreResult;

impl Database {
    pub fn init_master_schema(&self) -> CoreResult<()> {
        self.with_conn(create_master_tables)?;
        Ok(())
    }
}

fn create_master_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS workspaces (
            id              TEXT PRIMARY KEY,
            workspace_path  TEXT NOT NULL UNIQUE,
            friendly_name   TEXT,
            created_at      TEXT NOT NULL,
            last_accessed   TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_workspaces_last_accessed ON workspaces(last_accessed);

        CREATE TABLE IF NOT EXISTS tool_usage (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            tool_name     TEXT NOT NULL,
            workspace_id  TEXT NOT NULL,
            timestamp     TEXT NOT NULL,
            success       INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_tool_usage_timestamp ON tool_usage(timestamp);
        CREATE INDEX IF NOT EXISTS idx_tool_usage_tool_name ON tool_usage(tool_name);
        CREATE INDEX IF NOT EXISTS idx_tool_usage_workspace_id ON tool_usage(workspace_id);
        ",
    )
}
