//! Schema for a single workspace database: `tasks`, `entities`,
//! `task_entity_links`, plus the indexes the query layer relies on.

use rusqlite::Connection;

use crate::db::Database;
use crate::error::CoreResult;

impl Database {
    /// Create the workspace schema if absent, then apply forward-only
    /// migrations. Safe to call on every open.
    pub fn init_workspace_schema(&self) -> CoreResult<()> {
        self.with_conn(create_workspace_tables)?;
        self.with_conn(migrate_workspace_metadata_column)?;
        Ok(())
    }
}

fn create_workspace_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS tasks (
            id                   INTEGER PRIMARY KEY AUTOINCREMENT,
            title                TEXT NOT NULL,
            description          TEXT,
            status               TEXT NOT NULL DEFAULT 'todo',
            priority             TEXT NOT NULL DEFAULT 'medium',
            parent_task_id       INTEGER REFERENCES tasks(id),
            depends_on           TEXT NOT NULL DEFAULT '[]',
            tags                 TEXT NOT NULL DEFAULT '[]',
            blocker_reason       TEXT NOT NULL DEFAULT '',
            file_references      TEXT NOT NULL DEFAULT '[]',
            created_by           TEXT,
            created_at           TEXT NOT NULL,
            updated_at           TEXT NOT NULL,
            completed_at         TEXT,
            deleted_at           TEXT,
            workspace_metadata   TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
        CREATE INDEX IF NOT EXISTS idx_tasks_parent ON tasks(parent_task_id);
        CREATE INDEX IF NOT EXISTS idx_tasks_deleted_at ON tasks(deleted_at);

        CREATE TABLE IF NOT EXISTS entities (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_type  TEXT NOT NULL,
            name         TEXT NOT NULL,
            identifier   TEXT,
            description  TEXT,
            metadata     TEXT,
            tags         TEXT NOT NULL DEFAULT '[]',
            created_by   TEXT,
            created_at   TEXT NOT NULL,
            updated_at   TEXT NOT NULL,
            deleted_at   TEXT
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_entities_type_identifier
            ON entities(entity_type, identifier) WHERE deleted_at IS NULL;
        CREATE INDEX IF NOT EXISTS idx_entities_deleted_at ON entities(deleted_at);

        CREATE TABLE IF NOT EXISTS task_entity_links (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id     INTEGER NOT NULL REFERENCES tasks(id),
            entity_id   INTEGER NOT NULL REFERENCES entities(id),
            created_by  TEXT,
            created_at  TEXT NOT NULL,
            deleted_at  TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_links_task ON task_entity_links(task_id);
        CREATE INDEX IF NOT EXISTS idx_links_entity ON task_entity_links(entity_id);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_links_task_entity
            ON task_entity_links(task_id, entity_id) WHERE deleted_at IS NULL;
        ",
    )
}

/// Forward-only: add `workspace_metadata` to legacy `tasks` tables that
/// predate it. Legacy rows are tolerated with a null value.
fn migrate_workspace_metadata_column(conn: &Connection) -> rusqlite::Result<()> {
    let has_column: bool = conn
        .prepare("SELECT 1 FROM pragma_table_info('tasks') WHERE name = 'workspace_metadata'")?
        .exists([])?;
    if !has_column {
        conn.execute("ALTER TABLE tasks ADD COLUMN workspace_metadata TEXT", [])?;
    }
    Ok(())
}
