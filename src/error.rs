//! Error types for the analytics engine and the query pipeline.

use http::StatusCode;
use thiserror::Error;

/// Result type alias for cloudlens operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types surfaced by the engine
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or malformed request parameter
    #[error("Invalid input: {0}")]
    InputInvalid(String),

    /// No session or an expired one
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// Identity or resource absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Warehouse, insights, model or identity call failed
    #[error("Upstream call failed: {0}")]
    UpstreamFailed(String),

    /// Upstream asked us to slow down
    #[error("Upstream throttled: {0}")]
    Throttled(String),

    /// Terminal non-success state reported by the warehouse
    #[error("Query {state}: {reason}")]
    QueryFailed { state: String, reason: String },

    /// Asynchronous task did not finish in time
    #[error("Task {0} timed out")]
    TaskTimeout(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Network error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Profile store error
    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),

    /// Model inference error
    #[error("LLM error: {0}")]
    Llm(#[from] crate::llm::LlmError),

    /// Tool transport error
    #[error("Tool transport error: {0}")]
    Mcp(#[from] crate::mcp::McpError),
}

/// Coarse error classification used by the HTTP layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InputInvalid,
    Unauthenticated,
    NotFound,
    UpstreamFailed,
    QueryFailed,
    TaskTimeout,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InputInvalid => "InputInvalid",
            ErrorKind::Unauthenticated => "Unauthenticated",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::UpstreamFailed => "UpstreamFailed",
            ErrorKind::QueryFailed => "QueryFailed",
            ErrorKind::TaskTimeout => "TaskTimeout",
            ErrorKind::Internal => "Internal",
        }
    }

    pub fn http_status(&self) -> StatusCode {
        match self {
            ErrorKind::InputInvalid => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::UpstreamFailed => StatusCode::BAD_GATEWAY,
            ErrorKind::TaskTimeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::QueryFailed | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::UpstreamFailed | ErrorKind::TaskTimeout)
    }
}

impl Error {
    /// Classify the error for reporting
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InputInvalid(_) => ErrorKind::InputInvalid,
            Error::Unauthenticated(_) => ErrorKind::Unauthenticated,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::UpstreamFailed(_)
            | Error::Throttled(_)
            | Error::Network(_)
            | Error::Llm(_)
            | Error::Mcp(_) => ErrorKind::UpstreamFailed,
            Error::QueryFailed { .. } => ErrorKind::QueryFailed,
            Error::TaskTimeout(_) => ErrorKind::TaskTimeout,
            Error::Config(_)
            | Error::Internal(_)
            | Error::Json(_)
            | Error::Io(_)
            | Error::Store(_) => ErrorKind::Internal,
        }
    }

    /// Message safe to hand back to a caller. Internal details stay in the logs.
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Internal => "An internal error occurred".to_string(),
            _ => self.to_string(),
        }
    }
}
