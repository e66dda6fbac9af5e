//! Log-insights client over the CloudWatch Logs JSON API.

use super::client::AwsClient;
use crate::error::{Error, Result};
use crate::gateway::{
    InsightsApi, InsightsQuery, InsightsResults, InsightsStatus, LogGroupInfo, LogGroupPage,
    ResultField,
};
use async_trait::async_trait;
use serde_json::{json, Value};

const TARGET_PREFIX: &str = "Logs_20140328";

pub struct CloudWatchLogsClient {
    client: AwsClient,
}

impl CloudWatchLogsClient {
    pub fn new(client: AwsClient) -> Self {
        Self { client }
    }

    async fn call(&self, action: &str, body: Value) -> Result<Value> {
        self.client.json_call("logs", TARGET_PREFIX, action, &body).await
    }
}

#[async_trait]
impl InsightsApi for CloudWatchLogsClient {
    async fn start_query(&self, query: &InsightsQuery) -> Result<String> {
        // the service takes epoch seconds
        let body = json!({
            "logGroupNames": query.log_groups,
            "startTime": query.start_ms / 1000,
            "endTime": query.end_ms / 1000,
            "queryString": query.query,
            "limit": query.limit,
        });
        let response = self.call("StartQuery", body).await?;
        response
            .get("queryId")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| Error::UpstreamFailed("StartQuery returned no queryId".to_string()))
    }

    async fn get_query_results(&self, query_id: &str) -> Result<InsightsResults> {
        let response = self.call("GetQueryResults", json!({ "queryId": query_id })).await?;
        let status = InsightsStatus::parse(response["status"].as_str().unwrap_or_default());
        let results = response["results"]
            .as_array()
            .map(|records| {
                records
                    .iter()
                    .map(|record| {
                        record
                            .as_array()
                            .map(|fields| {
                                fields
                                    .iter()
                                    .map(|f| ResultField {
                                        field: f["field"].as_str().unwrap_or_default().to_string(),
                                        value: f["value"].as_str().unwrap_or_default().to_string(),
                                    })
                                    .collect()
                            })
                            .unwrap_or_default()
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(InsightsResults { status, results })
    }

    async fn describe_log_groups(
        &self,
        prefix: Option<&str>,
        limit: usize,
        next_token: Option<&str>,
    ) -> Result<LogGroupPage> {
        let mut body = json!({ "limit": limit.clamp(1, 50) });
        if let Some(prefix) = prefix {
            body["logGroupNamePrefix"] = json!(prefix);
        }
        if let Some(token) = next_token {
            body["nextToken"] = json!(token);
        }

        let response = self.call("DescribeLogGroups", body).await?;
        let groups = response["logGroups"]
            .as_array()
            .map(|groups| {
                groups
                    .iter()
                    .filter_map(|g| {
                        Some(LogGroupInfo {
                            name: g["logGroupName"].as_str()?.to_string(),
                            creation_time: g["creationTime"].as_i64(),
                            retention_days: g["retentionInDays"].as_i64(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(LogGroupPage {
            groups,
            next_token: response["nextToken"].as_str().map(String::from),
        })
    }
}
