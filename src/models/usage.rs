//! Append-only tool-usage telemetry row.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolUsageBreakdown {
    pub tool_name: String,
    pub calls: i64,
    pub successes: i64,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageDay {
    pub date: String,
    pub calls: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageStats {
    pub window_days: u32,
    pub total_calls: i64,
    pub by_tool: Vec<ToolUsageBreakdown>,
    pub timeline: Vec<UsageDay>,
}
