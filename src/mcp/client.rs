//! Tool-call transport client for MCP servers over streamable HTTP.

use crate::config::McpConfig;
use crate::mcp::{
    ClientInfo, InitializeParams, JsonRpcRequest, JsonRpcResponse, McpError, Tool, ToolCallParams,
    ToolCallResult, ToolList,
};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use tracing::{debug, warn};

const SESSION_HEADER: &str = "Mcp-Session-Id";

/// Contract the orchestrator drives: `initialize` → `tools/list` → `tools/call`* → `close`
#[async_trait]
pub trait ToolTransport: Send + Sync {
    async fn initialize(&self) -> Result<(), McpError>;
    async fn list_tools(&self) -> Result<Vec<Tool>, McpError>;
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult, McpError>;
    async fn close(&self) -> Result<(), McpError>;
}

/// JSON-RPC over HTTP with a session header
pub struct HttpToolTransport {
    client: Client,
    endpoint: String,
    protocol_version: String,
    session_id: Mutex<Option<String>>,
    next_id: AtomicI64,
}

impl HttpToolTransport {
    pub fn new(endpoint: impl Into<String>, protocol_version: impl Into<String>, client: Client) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            protocol_version: protocol_version.into(),
            session_id: Mutex::new(None),
            next_id: AtomicI64::new(1),
        }
    }

    /// Build from config; `None` when no endpoint is configured
    pub fn from_config(config: &McpConfig) -> Result<Option<Self>, McpError> {
        let Some(endpoint) = &config.endpoint else {
            return Ok(None);
        };
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Some(Self::new(endpoint, &config.protocol_version, client)))
    }

    /// Same endpoint and connection pool, no session yet
    pub fn fresh(&self) -> Self {
        Self::new(&self.endpoint, &self.protocol_version, self.client.clone())
    }

    fn session_id(&self) -> Option<String> {
        self.session_id.lock().ok().and_then(|s| s.clone())
    }

    fn remember_session(&self, response: &reqwest::Response) {
        if let Some(id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            if let Ok(mut slot) = self.session_id.lock() {
                *slot = Some(id.to_string());
            }
        }
    }

    async fn post(&self, body: &JsonRpcRequest) -> Result<reqwest::Response, McpError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Accept", "application/json, text/event-stream")
            .json(body);
        if let Some(id) = self.session_id() {
            request = request.header(SESSION_HEADER, id);
        }
        let response = request.send().await?;
        self.remember_session(&response);
        Ok(response)
    }

    /// Make a JSON-RPC request to the server
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let response = self.post(&JsonRpcRequest::new(id, method, params)).await?;

        let status = response.status();
        let is_stream = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("text/event-stream"))
            .unwrap_or(false);
        if !status.is_success() {
            return Err(McpError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let rpc = if is_stream {
            read_event_stream(response.bytes_stream(), id).await?
        } else {
            serde_json::from_str::<JsonRpcResponse>(&response.text().await?)?
        };
        debug!(method, id, "tool server replied");

        if let Some(error) = rpc.error {
            return Err(error.into());
        }
        rpc.result
            .ok_or_else(|| McpError::InvalidResponse("No result in response".to_string()))
    }

    async fn notify(&self, method: &str) -> Result<(), McpError> {
        let response = self.post(&JsonRpcRequest::notification(method)).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(McpError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }
}

/// Read SSE events until one answers `id`; notifications before it are skipped
async fn read_event_stream<S, B, E>(body: S, id: i64) -> Result<JsonRpcResponse, McpError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut events = std::pin::pin!(body.eventsource());
    while let Some(event) = events.next().await {
        let event = event.map_err(|e| McpError::InvalidResponse(format!("event stream: {}", e)))?;
        match serde_json::from_str::<JsonRpcResponse>(&event.data) {
            Ok(rpc) if rpc.id.as_ref().and_then(Value::as_i64) == Some(id) => return Ok(rpc),
            Ok(_) => {}
            Err(e) => debug!(error = %e, "skipping non-response event"),
        }
    }
    Err(McpError::InvalidResponse(format!("no event answered request {}", id)))
}

#[async_trait]
impl ToolTransport for HttpToolTransport {
    async fn initialize(&self) -> Result<(), McpError> {
        let params = InitializeParams {
            protocol_version: self.protocol_version.clone(),
            capabilities: json!({}),
            client_info: ClientInfo {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };
        self.request("initialize", Some(serde_json::to_value(params)?))
            .await?;
        self.notify("notifications/initialized").await
    }

    async fn list_tools(&self) -> Result<Vec<Tool>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor.as_ref().map(|c| json!({"cursor": c}));
            let page: ToolList = serde_json::from_value(self.request("tools/list", params).await?)?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        Ok(tools)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult, McpError> {
        let params = ToolCallParams {
            name: name.to_string(),
            arguments,
        };
        let result = self
            .request("tools/call", Some(serde_json::to_value(params)?))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn close(&self) -> Result<(), McpError> {
        let Some(id) = self.session_id() else {
            return Ok(());
        };
        let response = self
            .client
            .delete(&self.endpoint)
            .header(SESSION_HEADER, id)
            .send()
            .await?;
        // servers without explicit session teardown answer 405
        if !response.status().is_success() && response.status() != StatusCode::METHOD_NOT_ALLOWED {
            warn!(status = %response.status(), "tool session close rejected");
        }
        if let Ok(mut slot) = self.session_id.lock() {
            *slot = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks() -> Vec<Result<&'static [u8], std::io::Error>> {
        vec![
            Ok(&b"event: message\ndata: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/progress\"}\n\n"[..]),
            // one event split across two chunks
            Ok(&b"event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":7,"[..]),
            Ok(&b"\"result\":{\"ok\":true}}\n\n"[..]),
        ]
    }

    #[tokio::test]
    async fn test_event_stream_matches_id() {
        let response = read_event_stream(futures::stream::iter(chunks()), 7).await.unwrap();
        assert_eq!(response.result.unwrap()["ok"], true);

        let missing = read_event_stream(futures::stream::iter(chunks()), 8).await;
        assert!(matches!(missing, Err(McpError::InvalidResponse(_))));
    }

    #[test]
    fn test_from_config_without_endpoint() {
        let config = McpConfig::default();
        assert!(HttpToolTransport::from_config(&config).unwrap().is_none());

        let config = McpConfig {
            endpoint: Some("http://localhost:9000/mcp".to_string()),
            ..Default::default()
        };
        let transport = HttpToolTransport::from_config(&config).unwrap().unwrap();
        assert!(transport.session_id().is_none());
        assert_eq!(transport.fresh().endpoint, "http://localhost:9000/mcp");
    }
}
