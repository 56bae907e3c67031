//! Orchestrating facade: resolve the workspace, touch
//! the master registry, open/cache the workspace store, run the domain
//! operation, shape the result through the query layer, and record
//! telemetry — in that order, with telemetry failures swallowed.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::Mutex as AsyncMutex;

use crate::audit::{self, AuditOptions};
use crate::db::Database;
use crate::domain::{entities, tasks};
use crate::error::CoreResult;
use crate::models::entity::{EntityUpdate, NewEntity};
use crate::models::task::{NewTask, TaskUpdate};
use crate::models::usage::UsageStats;
use crate::query::{self, Mode};
use crate::resolver::{self, DataRoot, ResolvedWorkspace};
use crate::store::{entity_store::EntityFilters, master_store, task_store::TaskFilters};
use crate::telemetry;
use crate::util::now_iso;

/// The single entry point a transport binds to. One `Core` per process;
/// internally caches one `Database` per workspace, opened lazily.
pub struct Core {
    data_root: Option<DataRoot>,
    master_db: Database,
    workspaces: AsyncMutex<HashMap<String, Database>>,
}

impl Core {
    pub fn new(data_root: DataRoot) -> CoreResult<Arc<Self>> {
        let master_db = Database::open(&data_root.master_db_path())?;
        master_db.init_master_schema()?;
        Ok(Arc::new(Self {
            data_root: Some(data_root),
            master_db,
            workspaces: AsyncMutex::new(HashMap::new()),
        }))
    }

    /// In-memory instance for tests: no data root, the master DB and
    /// every workspace DB live only in process memory.
    pub fn in_memory() -> CoreResult<Arc<Self>> {
        let master_db = Database::open_in_memory()?;
        master_db.init_master_schema()?;
        Ok(Arc::new(Self {
            data_root: None,
            master_db,
            workspaces: AsyncMutex::new(HashMap::new()),
        }))
    }

    /// Resolves `workspace_path`, registers it in the master registry
    /// (idempotent, bumps `last_accessed`), and returns the workspace's
    /// (lazily opened, cached) `Database`.
    async fn touch_workspace(&self, workspace_path: &str) -> CoreResult<(ResolvedWorkspace, Database)> {
        let resolved = resolver::resolve(workspace_path)?;
        let now = now_iso();
        let id = resolved.workspace_id.clone();
        let path = resolved.absolute_path.clone();
        self.master_db
            .with_conn_async(move |conn| master_store::register(conn, &id, &path, &now))
            .await?;

        let mut guard = self.workspaces.lock().await;
        if let Some(db) = guard.get(&resolved.workspace_id) {
            return Ok((resolved, db.clone()));
        }
        let db = match &self.data_root {
            Some(root) => Database::open(&root.workspace_db_path(&resolved.workspace_id))?,
            None => Database::open_in_memory()?,
        };
        db.init_workspace_schema()?;
        guard.insert(resolved.workspace_id.clone(), db.clone());
        Ok((resolved, db))
    }

    async fn record(&self, tool_name: &str, workspace_id: &str, success: bool) {
        telemetry::record_usage(&self.master_db, tool_name, workspace_id, success).await;
    }

    // ---- Task operations -------------------------------------------------

    pub async fn create_task(&self, workspace_path: &str, new_task: NewTask) -> CoreResult<Value> {
        let (resolved, db) = self.touch_workspace(workspace_path).await?;
        let input = tasks::CreateTaskInput {
            new_task,
            workspace_path: resolved.absolute_path.clone(),
            git_root: resolved.git_root.clone(),
            project_name: project_name_of(&resolved.absolute_path),
        };
        let result = tasks::create_task(&db, input).await;
        self.record("create_task", &resolved.workspace_id, result.is_ok()).await;
        Ok(serde_json::to_value(result?).expect("Task always serializes"))
    }

    pub async fn get_task(&self, workspace_path: &str, id: i64) -> CoreResult<Value> {
        let (resolved, db) = self.touch_workspace(workspace_path).await?;
        let result = tasks::get_task(&db, id).await;
        self.record("get_task", &resolved.workspace_id, result.is_ok()).await;
        Ok(serde_json::to_value(result?).expect("Task always serializes"))
    }

    pub async fn update_task(&self, workspace_path: &str, id: i64, update: TaskUpdate) -> CoreResult<Value> {
        let (resolved, db) = self.touch_workspace(workspace_path).await?;
        let result = tasks::update_task(&db, id, update).await;
        self.record("update_task", &resolved.workspace_id, result.is_ok()).await;
        Ok(serde_json::to_value(result?).expect("Task always serializes"))
    }

    pub async fn delete_task(&self, workspace_path: &str, id: i64, cascade: bool) -> CoreResult<Value> {
        let (resolved, db) = self.touch_workspace(workspace_path).await?;
        let result = tasks::delete_task(&db, id, cascade).await;
        self.record("delete_task", &resolved.workspace_id, result.is_ok()).await;
        let result = result?;
        Ok(json!({
            "deleted_task_ids": result.deleted_task_ids,
            "deleted_links": result.deleted_links,
        }))
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn list_tasks(
        &self,
        workspace_path: &str,
        filters: TaskFilters,
        mode: Option<&str>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> CoreResult<Value> {
        let mode = Mode::parse(mode)?;
        let (limit, offset) = query::validate_pagination(limit, offset)?;
        let (resolved, db) = self.touch_workspace(workspace_path).await?;
        let result = tasks::list_tasks(&db, filters, limit, offset).await;
        self.record("list_tasks", &resolved.workspace_id, result.is_ok()).await;
        let (rows, total) = result?;
        let items = rows.iter().map(|t| query::project_task(t, mode)).collect();
        query::paginate_envelope(items, total, limit, offset)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn search_tasks(
        &self,
        workspace_path: &str,
        term: String,
        filters: TaskFilters,
        mode: Option<&str>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> CoreResult<Value> {
        let mode = Mode::parse(mode)?;
        let (limit, offset) = query::validate_pagination(limit, offset)?;
        let (resolved, db) = self.touch_workspace(workspace_path).await?;
        let result = tasks::search_tasks(&db, term, filters, limit, offset).await;
        self.record("search_tasks", &resolved.workspace_id, result.is_ok()).await;
        let (rows, total) = result?;
        let items = rows.iter().map(|t| query::project_task(t, mode)).collect();
        query::paginate_envelope(items, total, limit, offset)
    }

    pub async fn get_task_tree(&self, workspace_path: &str, root_id: i64, mode: Option<&str>) -> CoreResult<Value> {
        let mode = Mode::parse(mode)?;
        let (resolved, db) = self.touch_workspace(workspace_path).await?;
        let result = tasks::get_task_tree(&db, root_id).await;
        self.record("get_task_tree", &resolved.workspace_id, result.is_ok()).await;
        let tree = result?;
        query::enforce_size_budget(query::project_task_tree(&tree, mode))
    }

    pub async fn get_blocked_tasks(&self, workspace_path: &str, mode: Option<&str>) -> CoreResult<Value> {
        let mode = Mode::parse(mode)?;
        let (resolved, db) = self.touch_workspace(workspace_path).await?;
        let result = tasks::get_blocked_tasks(&db).await;
        self.record("get_blocked_tasks", &resolved.workspace_id, result.is_ok()).await;
        let items: Vec<Value> = result?.iter().map(|t| query::project_task(t, mode)).collect();
        query::enforce_size_budget(json!({ "items": items }))
    }

    pub async fn get_next_tasks(&self, workspace_path: &str, mode: Option<&str>) -> CoreResult<Value> {
        let mode = Mode::parse(mode)?;
        let (resolved, db) = self.touch_workspace(workspace_path).await?;
        let result = tasks::get_next_tasks(&db).await;
        self.record("get_next_tasks", &resolved.workspace_id, result.is_ok()).await;
        let items: Vec<Value> = result?.iter().map(|t| query::project_task(t, mode)).collect();
        query::enforce_size_budget(json!({ "items": items }))
    }

    pub async fn cleanup_deleted_tasks(&self, workspace_path: &str, retention_days: u32) -> CoreResult<Value> {
        let (resolved, db) = self.touch_workspace(workspace_path).await?;
        let result = tasks::cleanup_deleted_tasks(&db, retention_days).await;
        self.record("cleanup_deleted_tasks", &resolved.workspace_id, result.is_ok()).await;
        Ok(json!({ "purged": result? }))
    }

    // ---- Entity operations -----------------------------------------------

    pub async fn create_entity(&self, workspace_path: &str, new_entity: NewEntity) -> CoreResult<Value> {
        let (resolved, db) = self.touch_workspace(workspace_path).await?;
        let result = entities::create_entity(&db, new_entity).await;
        self.record("create_entity", &resolved.workspace_id, result.is_ok()).await;
        Ok(serde_json::to_value(result?).expect("Entity always serializes"))
    }

    pub async fn get_entity(&self, workspace_path: &str, id: i64) -> CoreResult<Value> {
        let (resolved, db) = self.touch_workspace(workspace_path).await?;
        let result = entities::get_entity(&db, id).await;
        self.record("get_entity", &resolved.workspace_id, result.is_ok()).await;
        Ok(serde_json::to_value(result?).expect("Entity always serializes"))
    }

    pub async fn update_entity(&self, workspace_path: &str, id: i64, update: EntityUpdate) -> CoreResult<Value> {
        let (resolved, db) = self.touch_workspace(workspace_path).await?;
        let result = entities::update_entity(&db, id, update).await;
        self.record("update_entity", &resolved.workspace_id, result.is_ok()).await;
        Ok(serde_json::to_value(result?).expect("Entity always serializes"))
    }

    pub async fn list_entities(
        &self,
        workspace_path: &str,
        filters: EntityFilters,
        mode: Option<&str>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> CoreResult<Value> {
        let mode = Mode::parse(mode)?;
        let (limit, offset) = query::validate_pagination(limit, offset)?;
        let (resolved, db) = self.touch_workspace(workspace_path).await?;
        let result = entities::list_entities(&db, filters, limit, offset).await;
        self.record("list_entities", &resolved.workspace_id, result.is_ok()).await;
        let (rows, total) = result?;
        let items = rows.iter().map(|e| query::project_entity(e, mode)).collect();
        query::paginate_envelope(items, total, limit, offset)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn search_entities(
        &self,
        workspace_path: &str,
        term: String,
        filters: EntityFilters,
        mode: Option<&str>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> CoreResult<Value> {
        let mode = Mode::parse(mode)?;
        let (limit, offset) = query::validate_pagination(limit, offset)?;
        let (resolved, db) = self.touch_workspace(workspace_path).await?;
        let result = entities::search_entities(&db, term, filters, limit, offset).await;
        self.record("search_entities", &resolved.workspace_id, result.is_ok()).await;
        let (rows, total) = result?;
        let items = rows.iter().map(|e| query::project_entity(e, mode)).collect();
        query::paginate_envelope(items, total, limit, offset)
    }

    pub async fn delete_entity(&self, workspace_path: &str, id: i64) -> CoreResult<Value> {
        let (resolved, db) = self.touch_workspace(workspace_path).await?;
        let result = entities::delete_entity(&db, id).await;
        self.record("delete_entity", &resolved.workspace_id, result.is_ok()).await;
        Ok(json!({ "deleted_links": result?.deleted_links }))
    }

    pub async fn link_entity_to_task(
        &self,
        workspace_path: &str,
        task_id: i64,
        entity_id: i64,
        created_by: Option<String>,
    ) -> CoreResult<Value> {
        let (resolved, db) = self.touch_workspace(workspace_path).await?;
        let result = entities::link_entity_to_task(&db, task_id, entity_id, created_by).await;
        self.record("link_entity_to_task", &resolved.workspace_id, result.is_ok()).await;
        result?;
        Ok(json!({ "linked": true }))
    }

    pub async fn get_task_entities(
        &self,
        workspace_path: &str,
        task_id: i64,
        mode: Option<&str>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> CoreResult<Value> {
        let mode = Mode::parse(mode)?;
        let (limit, offset) = query::validate_pagination(limit, offset)?;
        let (resolved, db) = self.touch_workspace(workspace_path).await?;
        let result = entities::get_task_entities(&db, task_id, limit, offset).await;
        self.record("get_task_entities", &resolved.workspace_id, result.is_ok()).await;
        let (rows, total) = result?;
        let items = rows
            .iter()
            .map(|(e, link_at, link_by)| query::project_entity_with_link(e, mode, link_at, link_by.as_deref()))
            .collect();
        query::paginate_envelope(items, total, limit, offset)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn get_entity_tasks(
        &self,
        workspace_path: &str,
        entity_id: i64,
        status: Option<String>,
        priority: Option<String>,
        mode: Option<&str>,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> CoreResult<Value> {
        let mode = Mode::parse(mode)?;
        let (limit, offset) = query::validate_pagination(limit, offset)?;
        let (resolved, db) = self.touch_workspace(workspace_path).await?;
        let result = entities::get_entity_tasks(&db, entity_id, status, priority, limit, offset).await;
        self.record("get_entity_tasks", &resolved.workspace_id, result.is_ok()).await;
        let (rows, total) = result?;
        let items = rows
            .iter()
            .map(|(t, link_at, link_by)| query::project_task_with_link(t, mode, link_at, link_by.as_deref()))
            .collect();
        query::paginate_envelope(items, total, limit, offset)
    }

    // ---- Audit & telemetry -----------------------------------------------

    pub async fn validate_task_workspace(&self, workspace_path: &str, task_id: i64) -> CoreResult<Value> {
        let (resolved, db) = self.touch_workspace(workspace_path).await?;
        let result = audit::validate_task_workspace(&db, &resolved, task_id).await;
        self.record("validate_task_workspace", &resolved.workspace_id, result.is_ok()).await;
        result
    }

    pub async fn audit_workspace_integrity(
        &self,
        workspace_path: &str,
        include_deleted: bool,
        check_git_repo: bool,
    ) -> CoreResult<Value> {
        let (resolved, db) = self.touch_workspace(workspace_path).await?;
        let options = AuditOptions { include_deleted, check_git_repo };
        let result = audit::audit_workspace_integrity(&db, &self.master_db, &resolved, options).await;
        self.record("audit_workspace_integrity", &resolved.workspace_id, result.is_ok()).await;
        result
    }

    pub async fn get_usage_stats(&self, days: u32, tool_name: Option<String>) -> CoreResult<UsageStats> {
        telemetry::get_usage_stats(&self.master_db, days, tool_name).await
    }

    // ---- Master registry -------------------------------------------------

    pub async fn set_friendly_name(&self, workspace_path: &str, name: String) -> CoreResult<()> {
        let (resolved, _db) = self.touch_workspace(workspace_path).await?;
        let id = resolved.workspace_id.clone();
        self.master_db
            .with_conn_async(move |conn| master_store::set_friendly_name(conn, &id, &name))
            .await?;
        Ok(())
    }

    pub async fn list_workspaces(&self) -> CoreResult<Value> {
        let rows = self.master_db.with_conn_async(master_store::list).await?;
        Ok(serde_json::to_value(rows).expect("workspace rows always serialize"))
    }
}

fn project_name_of(workspace_path: &str) -> String {
    std::path::Path::new(workspace_path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| workspace_path.to_string())
}
