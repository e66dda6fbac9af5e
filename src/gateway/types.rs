use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One decoded result row: column name to cell text
pub type Row = BTreeMap<String, String>;

/// Decoded SQL result set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SqlResult {
    /// Column names in header order
    pub columns: Vec<String>,
    /// Rows in result order
    pub rows: Vec<Row>,
}

/// Where and how a statement runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryContext {
    pub database: Option<String>,
    pub output_location: String,
    pub workgroup: Option<String>,
}

/// Warehouse execution state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl QueryState {
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "SUCCEEDED" => QueryState::Succeeded,
            "FAILED" => QueryState::Failed,
            "CANCELLED" => QueryState::Cancelled,
            "RUNNING" => QueryState::Running,
            _ => QueryState::Queued,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryState::Queued => "QUEUED",
            QueryState::Running => "RUNNING",
            QueryState::Succeeded => "SUCCEEDED",
            QueryState::Failed => "FAILED",
            QueryState::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueryState::Succeeded | QueryState::Failed | QueryState::Cancelled
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryExecutionStatus {
    pub state: QueryState,
    pub reason: Option<String>,
}

/// Log-insights query request; times are epoch milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsightsQuery {
    pub log_groups: Vec<String>,
    pub start_ms: i64,
    pub end_ms: i64,
    pub query: String,
    pub limit: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InsightsStatus {
    Scheduled,
    Running,
    Complete,
    Failed,
    Cancelled,
    Timeout,
    Unknown,
}

impl InsightsStatus {
    pub fn parse(value: &str) -> Self {
        match value {
            "Scheduled" => InsightsStatus::Scheduled,
            "Running" => InsightsStatus::Running,
            "Complete" => InsightsStatus::Complete,
            "Failed" => InsightsStatus::Failed,
            "Cancelled" => InsightsStatus::Cancelled,
            "Timeout" => InsightsStatus::Timeout,
            _ => InsightsStatus::Unknown,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InsightsStatus::Complete
                | InsightsStatus::Failed
                | InsightsStatus::Cancelled
                | InsightsStatus::Timeout
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultField {
    pub field: String,
    pub value: String,
}

/// One insights record as returned by the service
pub type InsightsRecord = Vec<ResultField>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsightsResults {
    pub status: InsightsStatus,
    pub results: Vec<InsightsRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogGroupInfo {
    pub name: String,
    pub creation_time: Option<i64>,
    pub retention_days: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogGroupPage {
    pub groups: Vec<LogGroupInfo>,
    pub next_token: Option<String>,
}
