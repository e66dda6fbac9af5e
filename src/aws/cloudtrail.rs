//! Event lookup client over the CloudTrail JSON API.

use super::client::AwsClient;
use crate::analytics::events::{Event, EventLookupApi, LookupPage, LookupRequest, ResourceRef, INTERNAL_SOURCE};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};
use tracing::debug;

const TARGET_PREFIX: &str = "com.amazonaws.cloudtrail.v20131101.CloudTrail_20131101";

pub struct CloudTrailClient {
    client: AwsClient,
}

impl CloudTrailClient {
    pub fn new(client: AwsClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EventLookupApi for CloudTrailClient {
    async fn lookup_events(&self, request: &LookupRequest) -> Result<LookupPage> {
        let mut body = json!({
            "StartTime": request.start_time.timestamp(),
            "EndTime": request.end_time.timestamp(),
            "MaxResults": request.max_results.clamp(1, 50),
        });
        if let Some(attribute) = &request.attribute {
            body["LookupAttributes"] = json!([{
                "AttributeKey": attribute.key,
                "AttributeValue": attribute.value,
            }]);
        }
        if let Some(token) = &request.next_token {
            body["NextToken"] = json!(token);
        }

        let response = self
            .client
            .json_call("cloudtrail", TARGET_PREFIX, "LookupEvents", &body)
            .await?;

        let events: Vec<Event> = response["Events"]
            .as_array()
            .map(|list| list.iter().filter_map(decode_event).collect())
            .unwrap_or_default();
        debug!(events = events.len(), "lookup page decoded");

        Ok(LookupPage {
            events,
            next_token: response["NextToken"].as_str().map(String::from),
        })
    }
}

/// Decode one `LookupEvents` entry; the embedded `CloudTrailEvent` JSON
/// supplies the source IP, caller ARN and resource list.
pub fn decode_event(entry: &Value) -> Option<Event> {
    let event_name = entry["EventName"].as_str()?.to_string();
    let raw: Option<Value> = entry["CloudTrailEvent"]
        .as_str()
        .and_then(|s| serde_json::from_str(s).ok());

    let event_source = entry["EventSource"]
        .as_str()
        .or_else(|| raw.as_ref()?.get("eventSource")?.as_str())
        .unwrap_or_default()
        .to_string();

    let identity = raw
        .as_ref()
        .and_then(|r| r["userIdentity"]["arn"].as_str())
        .or_else(|| entry["Username"].as_str())
        .unwrap_or_default()
        .to_string();

    let source_ip = raw
        .as_ref()
        .and_then(|r| r["sourceIPAddress"].as_str())
        .map(normalize_source_ip)
        .unwrap_or_else(|| INTERNAL_SOURCE.to_string());

    let resources = entry["Resources"]
        .as_array()
        .map(|list| {
            list.iter()
                .filter_map(|r| {
                    Some(ResourceRef {
                        resource_type: r["ResourceType"].as_str()?.to_string(),
                        resource_name: r["ResourceName"].as_str()?.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Some(Event {
        event_id: entry["EventId"].as_str().unwrap_or_default().to_string(),
        event_time: parse_event_time(&entry["EventTime"])?,
        identity,
        event_name,
        event_source,
        source_ip,
        resources,
        raw,
    })
}

/// AWS services call in with their hostname instead of an address
fn normalize_source_ip(value: &str) -> String {
    let is_service = value.ends_with(".amazonaws.com") || value.eq_ignore_ascii_case("AWS Internal");
    if is_service {
        INTERNAL_SOURCE.to_string()
    } else {
        value.to_string()
    }
}

fn parse_event_time(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let seconds = n.as_f64()?;
            let millis = (seconds * 1000.0).round() as i64;
            Utc.timestamp_millis_opt(millis).single()
        }
        Value::String(s) => DateTime::parse_from_rfc3339(s).ok().map(|t| t.with_timezone(&Utc)),
        _ => None,
    }
}
