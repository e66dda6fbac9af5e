use super::types::{
    InsightsQuery, InsightsResults, LogGroupPage, QueryContext, QueryExecutionStatus,
};
use crate::error::Result;
use async_trait::async_trait;

/// SQL warehouse service
#[async_trait]
pub trait WarehouseApi: Send + Sync {
    /// Submit a statement and return its execution id
    async fn start_query(&self, sql: &str, context: &QueryContext) -> Result<String>;

    /// Current state of an execution
    async fn get_execution(&self, execution_id: &str) -> Result<QueryExecutionStatus>;

    /// Full result set, header row first; `None` marks a missing cell
    async fn get_results(&self, execution_id: &str) -> Result<Vec<Vec<Option<String>>>>;

    /// Whether the database is registered in the catalog
    async fn database_exists(&self, database: &str) -> Result<bool>;
}

/// Log-insights service
#[async_trait]
pub trait InsightsApi: Send + Sync {
    /// Start a query and return its id
    async fn start_query(&self, query: &InsightsQuery) -> Result<String>;

    async fn get_query_results(&self, query_id: &str) -> Result<InsightsResults>;

    /// One page of log groups
    async fn describe_log_groups(
        &self,
        prefix: Option<&str>,
        limit: usize,
        next_token: Option<&str>,
    ) -> Result<LogGroupPage>;
}
