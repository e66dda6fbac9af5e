use super::api::{InsightsApi, WarehouseApi};
use super::types::{
    InsightsQuery, InsightsRecord, InsightsStatus, LogGroupInfo, QueryContext,
    QueryExecutionStatus, QueryState, Row, SqlResult,
};
use crate::config::{InsightsConfig, WarehouseConfig};
use crate::error::{Error, Result};
use crate::polling::{PollOutcome, PollStep, Poller};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Gateway over the warehouse and insights services
pub struct LogQueryGateway {
    warehouse: Arc<dyn WarehouseApi>,
    insights: Arc<dyn InsightsApi>,
    warehouse_config: WarehouseConfig,
    insights_config: InsightsConfig,
}

impl LogQueryGateway {
    pub fn new(
        warehouse: Arc<dyn WarehouseApi>,
        insights: Arc<dyn InsightsApi>,
        warehouse_config: WarehouseConfig,
        insights_config: InsightsConfig,
    ) -> Self {
        Self {
            warehouse,
            insights,
            warehouse_config,
            insights_config,
        }
    }

    pub fn warehouse_config(&self) -> &WarehouseConfig {
        &self.warehouse_config
    }

    pub fn insights_config(&self) -> &InsightsConfig {
        &self.insights_config
    }

    /// Run SQL against the configured database and output location
    pub async fn execute(&self, sql: &str) -> Result<SqlResult> {
        let database = self.warehouse_config.database.clone();
        let output = self.warehouse_config.output_location.clone();
        self.run_sql(&database, sql, &output).await
    }

    /// Run one SQL statement and decode its rows.
    ///
    /// The database is created first when the catalog does not know it.
    pub async fn run_sql(&self, database: &str, sql: &str, output_location: &str) -> Result<SqlResult> {
        validate_database_name(database)?;
        if sql.trim().is_empty() {
            return Err(Error::InputInvalid("query must not be empty".to_string()));
        }

        self.ensure_database(database, output_location).await?;

        let context = QueryContext {
            database: Some(database.to_string()),
            output_location: output_location.to_string(),
            workgroup: self.warehouse_config.workgroup.clone(),
        };
        let execution_id = self.submit_and_wait(sql, &context).await?;
        let raw = self.warehouse.get_results(&execution_id).await?;
        let result = decode_rows(raw);

        info!(
            query_execution_id = %execution_id,
            rows = result.rows.len(),
            "warehouse query succeeded"
        );
        Ok(result)
    }

    async fn ensure_database(&self, database: &str, output_location: &str) -> Result<()> {
        if self.warehouse.database_exists(database).await? {
            return Ok(());
        }

        info!(database, "database missing, creating it");
        let context = QueryContext {
            database: None,
            output_location: output_location.to_string(),
            workgroup: self.warehouse_config.workgroup.clone(),
        };
        let ddl = format!("CREATE DATABASE IF NOT EXISTS `{}`", database);
        self.submit_and_wait(&ddl, &context).await?;
        Ok(())
    }

    /// Submit, poll until terminal, fail on any state but success
    async fn submit_and_wait(&self, sql: &str, context: &QueryContext) -> Result<String> {
        let execution_id = self.warehouse.start_query(sql, context).await?;
        debug!(query_execution_id = %execution_id, "warehouse query submitted");

        let poller = Poller::new(self.warehouse_config.poll_interval())
            .with_optional_deadline(self.warehouse_config.query_timeout());
        let warehouse = &self.warehouse;
        let id = execution_id.as_str();

        let outcome = poller
            .run(|_| async move {
                let status = warehouse.get_execution(id).await?;
                Ok(if status.state.is_terminal() {
                    PollStep::Done(status)
                } else {
                    PollStep::Pending
                })
            })
            .await?;

        match outcome {
            PollOutcome::Done {
                value: QueryExecutionStatus {
                    state: QueryState::Succeeded,
                    ..
                },
                ..
            } => Ok(execution_id),
            PollOutcome::Done { value, .. } => {
                let reason = value.reason.unwrap_or_else(|| "no reason given".to_string());
                warn!(query_execution_id = %execution_id, state = value.state.as_str(), %reason, "warehouse query did not succeed");
                Err(Error::QueryFailed {
                    state: value.state.as_str().to_string(),
                    reason,
                })
            }
            PollOutcome::Exhausted { attempts } => Err(Error::UpstreamFailed(format!(
                "query {} still running after {} polls",
                execution_id, attempts
            ))),
        }
    }

    /// Run a log-insights query over `[start_ms, end_ms]`
    pub async fn run_insights(
        &self,
        log_group: &str,
        query_string: &str,
        start_ms: i64,
        end_ms: i64,
        limit: Option<u32>,
    ) -> Result<Vec<InsightsRecord>> {
        if log_group.trim().is_empty() {
            return Err(Error::InputInvalid("log group must not be empty".to_string()));
        }
        if end_ms < start_ms {
            return Err(Error::InputInvalid(
                "end of the time range precedes its start".to_string(),
            ));
        }

        let request = InsightsQuery {
            log_groups: vec![log_group.to_string()],
            start_ms,
            end_ms,
            query: query_string.to_string(),
            limit: limit.unwrap_or(self.insights_config.default_limit),
        };
        let query_id = self.insights.start_query(&request).await?;
        debug!(query_id = %query_id, log_group, "insights query started");

        let poller = Poller::new(self.insights_config.poll_interval())
            .with_optional_deadline(self.insights_config.query_timeout());
        let insights = &self.insights;
        let id = query_id.as_str();

        let outcome = poller
            .run(|_| async move {
                let results = insights.get_query_results(id).await?;
                Ok(if results.status.is_terminal() {
                    PollStep::Done(results)
                } else {
                    PollStep::Pending
                })
            })
            .await?;

        match outcome {
            PollOutcome::Done { value, .. } if value.status == InsightsStatus::Complete => {
                info!(query_id = %query_id, records = value.results.len(), "insights query complete");
                Ok(value.results)
            }
            PollOutcome::Done { value, .. } => Err(Error::QueryFailed {
                state: format!("{:?}", value.status),
                reason: format!("insights query {} ended without results", query_id),
            }),
            PollOutcome::Exhausted { attempts } => Err(Error::UpstreamFailed(format!(
                "insights query {} still running after {} polls",
                query_id, attempts
            ))),
        }
    }

    /// Enumerate log groups, following pagination up to `limit`
    pub async fn list_log_groups(&self, prefix: Option<&str>, limit: usize) -> Result<Vec<LogGroupInfo>> {
        let mut groups = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let remaining = limit.saturating_sub(groups.len());
            if remaining == 0 {
                break;
            }
            let page = self
                .insights
                .describe_log_groups(prefix, remaining.min(50), next_token.as_deref())
                .await?;
            groups.extend(page.groups);

            match page.next_token {
                Some(token) if !token.is_empty() => next_token = Some(token),
                _ => break,
            }
        }

        groups.truncate(limit);
        Ok(groups)
    }
}

/// Flatten an insights record into a field map
pub fn flatten_record(record: &InsightsRecord) -> Row {
    record
        .iter()
        .map(|f| (f.field.clone(), f.value.clone()))
        .collect()
}

/// First row is the header; later rows map header names to cell text
fn decode_rows(raw: Vec<Vec<Option<String>>>) -> SqlResult {
    let mut iter = raw.into_iter();
    let Some(header) = iter.next() else {
        return SqlResult::default();
    };

    let columns: Vec<String> = header
        .into_iter()
        .enumerate()
        .map(|(i, name)| name.unwrap_or_else(|| format!("_col{}", i)))
        .collect();

    let rows = iter
        .map(|cells| {
            let mut row = BTreeMap::new();
            for (i, column) in columns.iter().enumerate() {
                let value = cells.get(i).cloned().flatten().unwrap_or_default();
                row.insert(column.clone(), value);
            }
            row
        })
        .collect();

    SqlResult { columns, rows }
}

fn validate_database_name(database: &str) -> Result<()> {
    let valid = !database.is_empty()
        && database
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(Error::InputInvalid(format!("invalid database name: {}", database)))
    }
}
