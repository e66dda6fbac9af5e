//! Route handlers

use super::response::Success;
use super::AppState;
use crate::error::{Error, Result};
use crate::nlq::{summarize_result, ChatRequest};
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::str::FromStr;
use tracing::info;

/// Raw query-string parameters; parsed by hand so bad values map to `InputInvalid`
#[derive(Debug, Default, Deserialize)]
pub struct AnalyticsParams {
    pub user_arn: Option<String>,
    pub days: Option<String>,
    pub limit: Option<String>,
}

fn parse_param<T: FromStr>(name: &str, raw: Option<&str>) -> Result<Option<T>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| Error::InputInvalid(format!("{} must be a positive integer", name))),
    }
}

fn require_user(params: &AnalyticsParams) -> Result<&str> {
    params
        .user_arn
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::InputInvalid("user_arn is required".to_string()))
}

fn body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|e| Error::InputInvalid(e.body_text()))
}

pub async fn health() -> impl IntoResponse {
    Success(json!({"status": "ok", "version": env!("CARGO_PKG_VERSION")}))
}

pub async fn analyze_user(
    State(state): State<AppState>,
    Query(params): Query<AnalyticsParams>,
) -> Result<impl IntoResponse> {
    let user_arn = require_user(&params)?;
    let days = parse_param::<u32>("days", params.days.as_deref())?;
    let report = state.analytics.analyze_user(user_arn, days).await?;
    Ok(Success(report))
}

pub async fn detect_anomalies(
    State(state): State<AppState>,
    Query(params): Query<AnalyticsParams>,
) -> Result<impl IntoResponse> {
    let days = parse_param::<u32>("days", params.days.as_deref())?;
    let report = state.analytics.detect_anomalies(days).await?;
    Ok(Success(report))
}

pub async fn get_risk_score(
    State(state): State<AppState>,
    Query(params): Query<AnalyticsParams>,
) -> Result<impl IntoResponse> {
    let user_arn = require_user(&params)?;
    Ok(Success(state.analytics.get_risk_score(user_arn).await?))
}

pub async fn get_anomaly_events(
    State(state): State<AppState>,
    Query(params): Query<AnalyticsParams>,
) -> Result<impl IntoResponse> {
    let user_arn = require_user(&params)?;
    let limit = parse_param::<usize>("limit", params.limit.as_deref())?;
    let anomalies = state.analytics.get_anomaly_events(user_arn, limit).await?;
    Ok(Success(json!({
        "user_arn": user_arn,
        "count": anomalies.len(),
        "anomalies": anomalies,
    })))
}

/// `/llm1`: one chat turn
pub async fn chat(
    State(state): State<AppState>,
    payload: std::result::Result<Json<ChatRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let request = body(payload)?;
    let response = state.pipeline.ask(&request).await?;
    Ok(Success(response))
}

#[derive(Debug, Deserialize)]
pub struct SummarizeRequest {
    pub question: String,
    pub result: Value,
}

/// `/llm2`: summarize a result set
pub async fn summarize(
    State(state): State<AppState>,
    payload: std::result::Result<Json<SummarizeRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let request = body(payload)?;
    let answer = summarize_result(state.pipeline.summarizer(), &request.question, &request.result).await?;
    Ok(Success(json!({ "answer": answer })))
}

#[derive(Debug, Deserialize)]
pub struct ExecuteQueryRequest {
    pub query: String,
}

pub async fn execute_query(
    State(state): State<AppState>,
    payload: std::result::Result<Json<ExecuteQueryRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let request = body(payload)?;
    let sql = request.query.trim();
    if sql.is_empty() {
        return Err(Error::InputInvalid("query must not be empty".to_string()));
    }
    let result = state.gateway.execute(sql).await?;
    info!(rows = result.rows.len(), "query executed");
    Ok(Success(result))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_param() {
        assert_eq!(parse_param::<u32>("days", Some("30")).unwrap(), Some(30));
        assert_eq!(parse_param::<u32>("days", Some(" ")).unwrap(), None);
        assert_eq!(parse_param::<u32>("days", None).unwrap(), None);
        assert!(matches!(
            parse_param::<u32>("days", Some("-3")),
            Err(Error::InputInvalid(_))
        ));
    }

    #[test]
    fn test_require_user() {
        let params = AnalyticsParams {
            user_arn: Some("  ".to_string()),
            ..Default::default()
        };
        assert!(require_user(&params).is_err());
    }
}
