//! Anthropic API プロバイダー

use super::{messages_body, parse_response, LlmProvider};
use crate::llm::{
    config::LlmConfig,
    error::{LlmError, LlmResult},
    types::{LlmRequest, LlmResponse},
};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::debug;

const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

/// Messages APIを直接呼び出すプロバイダー
pub struct AnthropicProvider {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl AnthropicProvider {
    /// 新しいプロバイダーを作成
    pub fn new(config: &LlmConfig) -> LlmResult<Self> {
        let api_key = config
            .get_api_key()
            .ok_or_else(|| LlmError::ConfigError("Anthropic API key not set".to_string()))?
            .to_string();

        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| LlmError::ConfigError(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config
                .endpoint
                .clone()
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            api_key,
        })
    }
}

fn status_error(status: StatusCode, body: String) -> LlmError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmError::AuthError(body),
        StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimitError(body),
        StatusCode::BAD_REQUEST => LlmError::InvalidRequest(body),
        _ => LlmError::HttpError {
            status: status.as_u16(),
            body,
        },
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn complete(&self, request: &LlmRequest) -> LlmResult<LlmResponse> {
        let model = request
            .model
            .as_deref()
            .ok_or_else(|| LlmError::InvalidRequest("model is not resolved".to_string()))?;

        let mut body = messages_body(request)?;
        body.insert("model".to_string(), json!(model));

        debug!(model, messages = request.messages.len(), "calling messages api");
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&Value::Object(body))
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(status_error(status, text));
        }
        parse_response(serde_json::from_str(&text)?)
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_requires_key() {
        let mut config = LlmConfig::anthropic("key", "claude-3-5-sonnet-latest");
        assert!(AnthropicProvider::new(&config).is_ok());
        config.api_key = None;
        assert!(AnthropicProvider::new(&config).is_err());
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, String::new()),
            LlmError::RateLimitError(_)
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_GATEWAY, String::new()),
            LlmError::HttpError { status: 502, .. }
        ));
    }
}
