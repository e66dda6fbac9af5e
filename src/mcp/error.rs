use crate::mcp::JsonRpcError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum McpError {
    #[error("JSON-RPC error {code}: {message}")]
    JsonRpc { code: i32, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Session not initialized")]
    NotInitialized,

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("HTTP status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<JsonRpcError> for McpError {
    fn from(err: JsonRpcError) -> Self {
        match err.code {
            -32601 => McpError::ToolNotFound(err.message),
            code => McpError::JsonRpc {
                code,
                message: err.message,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_error_conversion() {
        let err: McpError = JsonRpcError {
            code: -32601,
            message: "no such tool".to_string(),
            data: None,
        }
        .into();
        assert!(matches!(err, McpError::ToolNotFound(_)));

        let err: McpError = JsonRpcError {
            code: -32603,
            message: "boom".to_string(),
            data: None,
        }
        .into();
        assert_eq!(err.to_string(), "JSON-RPC error -32603: boom");
    }
}
