//! Thin MCP adapter: one `#[tool]` per top-level core operation, each a
//! one-line forward into `task_tracker_core::Core`. No validation or
//! projection lives here — that's the core's job.

use std::sync::Arc;

use rmcp::handler::server::tool::Parameters;
use rmcp::model::{CallToolResult, Content, ServerCapabilities, ServerInfo};
use rmcp::{tool, tool_handler, tool_router, ErrorData, ServerHandler, ServiceExt};
use schemars::JsonSchema;
use serde::Deserialize;

use task_tracker_core::models::entity::{EntityUpdate, NewEntity};
use task_tracker_core::models::task::{NewTask, TaskUpdate};
use task_tracker_core::store::entity_store::EntityFilters;
use task_tracker_core::store::task_store::TaskFilters;
use task_tracker_core::{Core, DataRoot};

#[derive(Clone)]
struct TaskTrackerServer {
    core: Arc<Core>,
    tool_router: rmcp::handler::server::tool::ToolRouter<Self>,
}

fn ok(value: serde_json::Value) -> Result<CallToolResult, ErrorData> {
    Ok(CallToolResult::success(vec![Content::text(value.to_string())]))
}

fn to_error(e: task_tracker_core::CoreError) -> ErrorData {
    ErrorData::internal_error(e.to_envelope().to_string(), None)
}

#[derive(Debug, Deserialize, JsonSchema)]
struct CreateTaskRequest {
    workspace_path: String,
    #[serde(flatten)]
    task: NewTask,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct GetTaskRequest {
    workspace_path: String,
    id: i64,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct UpdateTaskRequest {
    workspace_path: String,
    id: i64,
    #[serde(flatten)]
    update: TaskUpdate,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct DeleteTaskRequest {
    workspace_path: String,
    id: i64,
    #[serde(default)]
    cascade: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ListTasksRequest {
    workspace_path: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    parent_task_id: Option<i64>,
    #[serde(default)]
    tags: Option<String>,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    limit: Option<i64>,
    #[serde(default)]
    offset: Option<i64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SearchTasksRequest {
    workspace_path: String,
    term: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    limit: Option<i64>,
    #[serde(default)]
    offset: Option<i64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct TaskTreeRequest {
    workspace_path: String,
    root_id: i64,
    #[serde(default)]
    mode: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct WorkspaceOnlyRequest {
    workspace_path: String,
    #[serde(default)]
    mode: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct CleanupRequest {
    workspace_path: String,
    #[serde(default = "default_retention_days")]
    retention_days: u32,
}

fn default_retention_days() -> u32 {
    30
}

#[derive(Debug, Deserialize, JsonSchema)]
struct CreateEntityRequest {
    workspace_path: String,
    #[serde(flatten)]
    entity: NewEntity,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct GetEntityRequest {
    workspace_path: String,
    id: i64,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct UpdateEntityRequest {
    workspace_path: String,
    id: i64,
    #[serde(flatten)]
    update: EntityUpdate,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct DeleteEntityRequest {
    workspace_path: String,
    id: i64,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ListEntitiesRequest {
    workspace_path: String,
    #[serde(default)]
    entity_type: Option<String>,
    #[serde(default)]
    tags: Option<String>,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    limit: Option<i64>,
    #[serde(default)]
    offset: Option<i64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SearchEntitiesRequest {
    workspace_path: String,
    term: String,
    #[serde(default)]
    entity_type: Option<String>,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    limit: Option<i64>,
    #[serde(default)]
    offset: Option<i64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct LinkEntityRequest {
    workspace_path: String,
    task_id: i64,
    entity_id: i64,
    #[serde(default)]
    created_by: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct TaskEntitiesRequest {
    workspace_path: String,
    task_id: i64,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    limit: Option<i64>,
    #[serde(default)]
    offset: Option<i64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct EntityTasksRequest {
    workspace_path: String,
    entity_id: i64,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    limit: Option<i64>,
    #[serde(default)]
    offset: Option<i64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ValidateTaskWorkspaceRequest {
    workspace_path: String,
    task_id: i64,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct AuditRequest {
    workspace_path: String,
    #[serde(default)]
    include_deleted: bool,
    #[serde(default = "default_true")]
    check_git_repo: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, JsonSchema)]
struct UsageStatsRequest {
    #[serde(default = "default_usage_days")]
    days: u32,
    #[serde(default)]
    tool_name: Option<String>,
}

fn default_usage_days() -> u32 {
    7
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SetFriendlyNameRequest {
    workspace_path: String,
    name: String,
}

#[tool_router]
impl TaskTrackerServer {
    fn new(core: Arc<Core>) -> Self {
        Self {
            core,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "Create a task in the given workspace")]
    async fn create_task(
        &self,
        Parameters(req): Parameters<CreateTaskRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        ok(self
            .core
            .create_task(&req.workspace_path, req.task)
            .await
            .map_err(to_error)?)
    }

    #[tool(description = "Fetch a single task by id")]
    async fn get_task(&self, Parameters(req): Parameters<GetTaskRequest>) -> Result<CallToolResult, ErrorData> {
        ok(self.core.get_task(&req.workspace_path, req.id).await.map_err(to_error)?)
    }

    #[tool(description = "Apply a partial update to a task")]
    async fn update_task(
        &self,
        Parameters(req): Parameters<UpdateTaskRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        ok(self
            .core
            .update_task(&req.workspace_path, req.id, req.update)
            .await
            .map_err(to_error)?)
    }

    #[tool(description = "Soft-delete a task, optionally cascading to its descendants")]
    async fn delete_task(
        &self,
        Parameters(req): Parameters<DeleteTaskRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        ok(self
            .core
            .delete_task(&req.workspace_path, req.id, req.cascade)
            .await
            .map_err(to_error)?)
    }

    #[tool(description = "List tasks with optional filters, mode projection, and pagination")]
    async fn list_tasks(
        &self,
        Parameters(req): Parameters<ListTasksRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let filters = TaskFilters {
            status: req.status.as_deref().and_then(task_tracker_core::models::task::TaskStatus::parse),
            priority: req.priority.as_deref().and_then(task_tracker_core::models::task::Priority::parse),
            parent_task_id: req.parent_task_id,
            tags_substring: req.tags,
            search_term: None,
        };
        ok(self
            .core
            .list_tasks(&req.workspace_path, filters, req.mode.as_deref(), req.limit, req.offset)
            .await
            .map_err(to_error)?)
    }

    #[tool(description = "Search tasks by title/description substring")]
    async fn search_tasks(
        &self,
        Parameters(req): Parameters<SearchTasksRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let filters = TaskFilters {
            status: req.status.as_deref().and_then(task_tracker_core::models::task::TaskStatus::parse),
            priority: req.priority.as_deref().and_then(task_tracker_core::models::task::Priority::parse),
            parent_task_id: None,
            tags_substring: None,
            search_term: None,
        };
        ok(self
            .core
            .search_tasks(&req.workspace_path, req.term, filters, req.mode.as_deref(), req.limit, req.offset)
            .await
            .map_err(to_error)?)
    }

    #[tool(description = "Return a task and its live descendants as a tree")]
    async fn get_task_tree(
        &self,
        Parameters(req): Parameters<TaskTreeRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        ok(self
            .core
            .get_task_tree(&req.workspace_path, req.root_id, req.mode.as_deref())
            .await
            .map_err(to_error)?)
    }

    #[tool(description = "List all blocked tasks, newest first")]
    async fn get_blocked_tasks(
        &self,
        Parameters(req): Parameters<WorkspaceOnlyRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        ok(self
            .core
            .get_blocked_tasks(&req.workspace_path, req.mode.as_deref())
            .await
            .map_err(to_error)?)
    }

    #[tool(description = "List todo tasks whose dependencies are all satisfied")]
    async fn get_next_tasks(
        &self,
        Parameters(req): Parameters<WorkspaceOnlyRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        ok(self
            .core
            .get_next_tasks(&req.workspace_path, req.mode.as_deref())
            .await
            .map_err(to_error)?)
    }

    #[tool(description = "Permanently delete soft-deleted tasks older than the retention window")]
    async fn cleanup_deleted_tasks(
        &self,
        Parameters(req): Parameters<CleanupRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        ok(self
            .core
            .cleanup_deleted_tasks(&req.workspace_path, req.retention_days)
            .await
            .map_err(to_error)?)
    }

    #[tool(description = "Create an entity in the given workspace")]
    async fn create_entity(
        &self,
        Parameters(req): Parameters<CreateEntityRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        ok(self
            .core
            .create_entity(&req.workspace_path, req.entity)
            .await
            .map_err(to_error)?)
    }

    #[tool(description = "Fetch a single entity by id, even if soft-deleted")]
    async fn get_entity(&self, Parameters(req): Parameters<GetEntityRequest>) -> Result<CallToolResult, ErrorData> {
        ok(self.core.get_entity(&req.workspace_path, req.id).await.map_err(to_error)?)
    }

    #[tool(description = "Apply a partial update to an entity")]
    async fn update_entity(
        &self,
        Parameters(req): Parameters<UpdateEntityRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        ok(self
            .core
            .update_entity(&req.workspace_path, req.id, req.update)
            .await
            .map_err(to_error)?)
    }

    #[tool(description = "Soft-delete an entity and cascade to its live links")]
    async fn delete_entity(
        &self,
        Parameters(req): Parameters<DeleteEntityRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        ok(self.core.delete_entity(&req.workspace_path, req.id).await.map_err(to_error)?)
    }

    #[tool(description = "List entities with optional filters, mode projection, and pagination")]
    async fn list_entities(
        &self,
        Parameters(req): Parameters<ListEntitiesRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let filters = EntityFilters {
            entity_type: req
                .entity_type
                .as_deref()
                .and_then(task_tracker_core::models::entity::EntityType::parse),
            tags_substring: req.tags,
            search_term: None,
        };
        ok(self
            .core
            .list_entities(&req.workspace_path, filters, req.mode.as_deref(), req.limit, req.offset)
            .await
            .map_err(to_error)?)
    }

    #[tool(description = "Search entities by name/identifier substring")]
    async fn search_entities(
        &self,
        Parameters(req): Parameters<SearchEntitiesRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let filters = EntityFilters {
            entity_type: req
                .entity_type
                .as_deref()
                .and_then(task_tracker_core::models::entity::EntityType::parse),
            tags_substring: None,
            search_term: None,
        };
        ok(self
            .core
            .search_entities(&req.workspace_path, req.term, filters, req.mode.as_deref(), req.limit, req.offset)
            .await
            .map_err(to_error)?)
    }

    #[tool(description = "Link an entity to a task")]
    async fn link_entity_to_task(
        &self,
        Parameters(req): Parameters<LinkEntityRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        ok(self
            .core
            .link_entity_to_task(&req.workspace_path, req.task_id, req.entity_id, req.created_by)
            .await
            .map_err(to_error)?)
    }

    #[tool(description = "List entities linked to a task")]
    async fn get_task_entities(
        &self,
        Parameters(req): Parameters<TaskEntitiesRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        ok(self
            .core
            .get_task_entities(&req.workspace_path, req.task_id, req.mode.as_deref(), req.limit, req.offset)
            .await
            .map_err(to_error)?)
    }

    #[tool(description = "List tasks linked to an entity")]
    async fn get_entity_tasks(
        &self,
        Parameters(req): Parameters<EntityTasksRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        ok(self
            .core
            .get_entity_tasks(
                &req.workspace_path,
                req.entity_id,
                req.status,
                req.priority,
                req.mode.as_deref(),
                req.limit,
                req.offset,
            )
            .await
            .map_err(to_error)?)
    }

    #[tool(description = "Compare a task's recorded workspace against the current one")]
    async fn validate_task_workspace(
        &self,
        Parameters(req): Parameters<ValidateTaskWorkspaceRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        ok(self
            .core
            .validate_task_workspace(&req.workspace_path, req.task_id)
            .await
            .map_err(to_error)?)
    }

    #[tool(description = "Run cross-workspace contamination heuristics over a workspace")]
    async fn audit_workspace_integrity(
        &self,
        Parameters(req): Parameters<AuditRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        ok(self
            .core
            .audit_workspace_integrity(&req.workspace_path, req.include_deleted, req.check_git_repo)
            .await
            .map_err(to_error)?)
    }

    #[tool(description = "Aggregate tool-usage telemetry over a trailing window")]
    async fn get_usage_stats(
        &self,
        Parameters(req): Parameters<UsageStatsRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let stats = self.core.get_usage_stats(req.days, req.tool_name).await.map_err(to_error)?;
        ok(serde_json::to_value(stats).expect("UsageStats always serializes"))
    }

    #[tool(description = "Set a workspace's human-friendly display name")]
    async fn set_friendly_name(
        &self,
        Parameters(req): Parameters<SetFriendlyNameRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        self.core
            .set_friendly_name(&req.workspace_path, req.name)
            .await
            .map_err(to_error)?;
        ok(serde_json::json!({ "ok": true }))
    }

    #[tool(description = "List every workspace the master registry knows about")]
    async fn list_workspaces(&self) -> Result<CallToolResult, ErrorData> {
        ok(self.core.list_workspaces().await.map_err(to_error)?)
    }
}

#[tool_handler]
impl ServerHandler for TaskTrackerServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Per-developer task and entity tracker. Every tool call takes an explicit \
                 workspace_path; there is no implicit cwd-based workspace detection."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "task_tracker_core=info".into()),
        )
        .init();

    let core = Core::new(DataRoot::default_location())?;
    let server = TaskTrackerServer::new(core);
    let service = server.serve(rmcp::transport::stdio()).await?;
    service.waiting().await?;
    Ok(())
}
