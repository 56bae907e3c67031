//! Master registry row.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceRecord {
    pub id: String,
    pub workspace_path: String,
    pub friendly_name: Option<String>,
    pub created_at: String,
    pub last_accessed: String,
}
