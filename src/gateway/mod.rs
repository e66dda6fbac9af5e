//! Log Query Gateway.
//!
//! Submits SQL to the warehouse and log-insights queries to the insights
//! service, polls each until it reaches a terminal state and hands back
//! decoded rows. Nothing is cached between calls.

mod api;
mod client;
mod types;

pub use api::{InsightsApi, WarehouseApi};
pub use client::{flatten_record, LogQueryGateway};
pub use types::{
    InsightsQuery, InsightsRecord, InsightsResults, InsightsStatus, LogGroupInfo, LogGroupPage,
    QueryContext, QueryExecutionStatus, QueryState, ResultField, Row, SqlResult,
};
