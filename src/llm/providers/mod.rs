//! LLMプロバイダー実装

pub mod anthropic;
pub mod bedrock;

use crate::aws::AwsClient;
use crate::llm::{
    config::{LlmConfig, LlmProviderKind},
    error::{LlmError, LlmResult},
    types::{LlmRequest, LlmResponse},
};
use async_trait::async_trait;
use serde_json::{json, Map, Value};

/// LLMプロバイダートレイト
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// 完了リクエスト（モデル・最大トークン数は解決済み）
    async fn complete(&self, request: &LlmRequest) -> LlmResult<LlmResponse>;

    /// プロバイダー名を取得
    fn name(&self) -> &str;
}

/// プロバイダーファクトリー
pub fn create_provider(config: &LlmConfig, aws: Option<&AwsClient>) -> LlmResult<Box<dyn LlmProvider>> {
    match config.provider {
        LlmProviderKind::Bedrock => {
            let aws = aws.ok_or_else(|| {
                LlmError::ConfigError("Bedrock provider requires AWS settings".to_string())
            })?;
            Ok(Box::new(bedrock::BedrockProvider::new(aws.clone())))
        }
        LlmProviderKind::Anthropic => Ok(Box::new(anthropic::AnthropicProvider::new(config)?)),
    }
}

/// Messages APIのリクエストボディ
///
/// `model` はBedrockではパスに入るため、ここでは含めない。
pub(crate) fn messages_body(request: &LlmRequest) -> LlmResult<Map<String, Value>> {
    let max_tokens = request
        .max_tokens
        .ok_or_else(|| LlmError::InvalidRequest("max_tokens is not resolved".to_string()))?;
    if request.messages.is_empty() {
        return Err(LlmError::InvalidRequest("messages must not be empty".to_string()));
    }

    let mut body = Map::new();
    body.insert("max_tokens".to_string(), json!(max_tokens));
    body.insert("messages".to_string(), serde_json::to_value(&request.messages)?);
    if let Some(system) = &request.system {
        body.insert("system".to_string(), json!(system));
    }
    if let Some(temperature) = request.temperature {
        body.insert("temperature".to_string(), json!(temperature));
    }
    if !request.tools.is_empty() {
        body.insert("tools".to_string(), serde_json::to_value(&request.tools)?);
        if let Some(choice) = request.tool_choice {
            body.insert("tool_choice".to_string(), serde_json::to_value(choice)?);
        }
    }
    Ok(body)
}

/// Messages APIのレスポンスを解析
pub(crate) fn parse_response(value: Value) -> LlmResult<LlmResponse> {
    if let Some(message) = value.get("error").and_then(|e| e.get("message")).and_then(Value::as_str) {
        return Err(LlmError::ApiError(message.to_string()));
    }
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::{Message, StopReason, ToolChoice, ToolSpec};

    #[test]
    fn test_body_without_tools_omits_tool_choice() {
        let request = LlmRequest::from_prompt("hi")
            .with_max_tokens(256)
            .with_system("be brief");
        let body = messages_body(&request).unwrap();
        assert_eq!(body["max_tokens"], 256);
        assert_eq!(body["system"], "be brief");
        assert!(!body.contains_key("tools"));
        assert!(!body.contains_key("tool_choice"));
        assert_eq!(body["messages"][0]["content"][0]["type"], "text");
    }

    #[test]
    fn test_body_with_tools() {
        let tool = ToolSpec {
            name: "run-query".to_string(),
            description: "Run SQL".to_string(),
            input_schema: json!({"type": "object"}),
        };
        let request = LlmRequest::new(vec![Message::user("count logins")])
            .with_tools(vec![tool], ToolChoice::None)
            .with_max_tokens(10);
        let body = messages_body(&request).unwrap();
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
        assert_eq!(body["tool_choice"]["type"], "none");
    }

    #[test]
    fn test_unresolved_request_is_rejected() {
        assert!(messages_body(&LlmRequest::from_prompt("hi")).is_err());
        assert!(messages_body(&LlmRequest::default().with_max_tokens(1)).is_err());
    }

    #[test]
    fn test_parse_response() {
        let response = parse_response(json!({
            "content": [{"type": "text", "text": "done"}],
            "stop_reason": "max_tokens",
            "usage": {"input_tokens": 1, "output_tokens": 2}
        }))
        .unwrap();
        assert_eq!(response.stop_reason, StopReason::MaxTokens);

        let err = parse_response(json!({"type": "error", "error": {"message": "overloaded"}}));
        assert!(matches!(err, Err(LlmError::ApiError(_))));
    }
}
