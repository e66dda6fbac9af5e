//! Warehouse client over the Athena JSON API.

use super::client::AwsClient;
use crate::error::{Error, Result};
use crate::gateway::{QueryContext, QueryExecutionStatus, QueryState, WarehouseApi};
use async_trait::async_trait;
use serde_json::{json, Value};

const TARGET_PREFIX: &str = "AmazonAthena";
const DATA_CATALOG: &str = "AwsDataCatalog";

pub struct AthenaClient {
    client: AwsClient,
}

impl AthenaClient {
    pub fn new(client: AwsClient) -> Self {
        Self { client }
    }

    async fn call(&self, action: &str, body: Value) -> Result<Value> {
        self.client.json_call("athena", TARGET_PREFIX, action, &body).await
    }
}

#[async_trait]
impl WarehouseApi for AthenaClient {
    async fn start_query(&self, sql: &str, context: &QueryContext) -> Result<String> {
        let mut body = json!({
            "QueryString": sql,
            "ResultConfiguration": { "OutputLocation": context.output_location },
        });
        if let Some(database) = &context.database {
            body["QueryExecutionContext"] = json!({ "Database": database, "Catalog": DATA_CATALOG });
        }
        if let Some(workgroup) = &context.workgroup {
            body["WorkGroup"] = json!(workgroup);
        }

        let response = self.call("StartQueryExecution", body).await?;
        response
            .get("QueryExecutionId")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| Error::UpstreamFailed("StartQueryExecution returned no id".to_string()))
    }

    async fn get_execution(&self, execution_id: &str) -> Result<QueryExecutionStatus> {
        let response = self
            .call("GetQueryExecution", json!({ "QueryExecutionId": execution_id }))
            .await?;
        let status = &response["QueryExecution"]["Status"];
        Ok(QueryExecutionStatus {
            state: QueryState::parse(status["State"].as_str().unwrap_or("QUEUED")),
            reason: status["StateChangeReason"].as_str().map(String::from),
        })
    }

    async fn get_results(&self, execution_id: &str) -> Result<Vec<Vec<Option<String>>>> {
        let mut rows = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut body = json!({ "QueryExecutionId": execution_id, "MaxResults": 1000 });
            if let Some(token) = &next_token {
                body["NextToken"] = json!(token);
            }
            let response = self.call("GetQueryResults", body).await?;
            rows.extend(decode_result_rows(&response));

            match response.get("NextToken").and_then(Value::as_str) {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }
        Ok(rows)
    }

    async fn database_exists(&self, database: &str) -> Result<bool> {
        let body = json!({ "CatalogName": DATA_CATALOG, "DatabaseName": database });
        match self.call("GetDatabase", body).await {
            Ok(_) => Ok(true),
            Err(Error::NotFound(_)) => Ok(false),
            Err(Error::UpstreamFailed(message)) if message.contains("MetadataException") => Ok(false),
            Err(e) => Err(e),
        }
    }
}

fn decode_result_rows(response: &Value) -> Vec<Vec<Option<String>>> {
    response["ResultSet"]["Rows"]
        .as_array()
        .map(|rows| {
            rows.iter()
                .map(|row| {
                    row["Data"]
                        .as_array()
                        .map(|cells| {
                            cells
                                .iter()
                                .map(|cell| cell.get("VarCharValue").and_then(Value::as_str).map(String::from))
                                .collect()
                        })
                        .unwrap_or_default()
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_result_rows() {
        let response = json!({
            "ResultSet": {
                "Rows": [
                    {"Data": [{"VarCharValue": "eventname"}, {"VarCharValue": "cnt"}]},
                    {"Data": [{"VarCharValue": "ConsoleLogin"}, {}]}
                ]
            }
        });
        let rows = decode_result_rows(&response);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1][0].as_deref(), Some("ConsoleLogin"));
        assert_eq!(rows[1][1], None);
    }
}
