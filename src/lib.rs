//! # cloudlens-rs
//!
//! Behavioral analytics and anomaly detection over AWS CloudTrail activity,
//! plus a natural-language pipeline that turns questions into warehouse or
//! log-insights queries and drives a tool-calling model loop.
//!
//! Per-identity profiles are derived from event history, scored for risk and
//! used as the baseline for a fixed registry of anomaly detectors. Results are
//! kept in a pluggable key-value store and exposed over HTTP.

pub mod alerts;
pub mod analytics;
pub mod app;
pub mod aws;
pub mod config;
pub mod error;
pub mod gateway;
pub mod llm;
pub mod logging;
pub mod mcp;
pub mod nlq;
pub mod orchestrator;
pub mod polling;
pub mod server;
pub mod store;

pub use error::{Error, ErrorKind, Result};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::InputInvalid("test".to_string());
        assert!(err.to_string().contains("test"));
        assert_eq!(err.kind(), ErrorKind::InputInvalid);
    }
}
