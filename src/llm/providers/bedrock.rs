//! Bedrock Runtime プロバイダー

use super::{messages_body, parse_response, LlmProvider};
use crate::aws::AwsClient;
use crate::error::Error;
use crate::llm::{
    error::{LlmError, LlmResult},
    types::{LlmRequest, LlmResponse},
};
use async_trait::async_trait;
use http::Method;
use serde_json::{json, Value};
use tracing::debug;

const ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";

/// `InvokeModel` でAnthropicモデルを呼び出すプロバイダー
pub struct BedrockProvider {
    aws: AwsClient,
}

impl BedrockProvider {
    pub fn new(aws: AwsClient) -> Self {
        Self { aws }
    }
}

/// AWS呼び出しのエラーをLLMエラーへ変換
fn map_aws_error(error: Error) -> LlmError {
    match error {
        Error::Throttled(msg) => LlmError::RateLimitError(msg),
        Error::Unauthenticated(msg) => LlmError::AuthError(msg),
        Error::Network(e) => LlmError::NetworkError(e.to_string()),
        Error::Json(e) => LlmError::JsonError(e),
        other => LlmError::ApiError(other.to_string()),
    }
}

#[async_trait]
impl LlmProvider for BedrockProvider {
    async fn complete(&self, request: &LlmRequest) -> LlmResult<LlmResponse> {
        let model = request
            .model
            .as_deref()
            .ok_or_else(|| LlmError::InvalidRequest("model is not resolved".to_string()))?;

        let mut body = messages_body(request)?;
        body.insert("anthropic_version".to_string(), json!(ANTHROPIC_VERSION));

        let path = format!("/model/{}/invoke", urlencoding::encode(model));
        debug!(model, messages = request.messages.len(), "invoking bedrock model");

        let value = self
            .aws
            .rest_json("bedrock", "bedrock-runtime", Method::POST, &path, &Value::Object(body))
            .await
            .map_err(map_aws_error)?;

        let mut response = parse_response(value)?;
        if response.model.is_empty() {
            response.model = model.to_string();
        }
        Ok(response)
    }

    fn name(&self) -> &str {
        "bedrock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        assert!(matches!(
            map_aws_error(Error::Throttled("slow".into())),
            LlmError::RateLimitError(_)
        ));
        assert!(matches!(
            map_aws_error(Error::Unauthenticated("expired".into())),
            LlmError::AuthError(_)
        ));
        assert!(matches!(
            map_aws_error(Error::UpstreamFailed("500".into())),
            LlmError::ApiError(_)
        ));
    }
}
