//! LLMクライアント

use crate::aws::AwsClient;
use crate::llm::{
    config::LlmConfig,
    error::LlmResult,
    providers::{create_provider, LlmProvider},
    types::{LlmRequest, LlmResponse, Message},
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// リトライ間隔の初期値
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// LLMクライアント
///
/// リクエストの未指定項目に設定値を補い、レート制限などの一時的な
/// エラーは指数バックオフで再試行します。
#[derive(Clone)]
pub struct LlmClient {
    provider: Arc<dyn LlmProvider>,
    config: LlmConfig,
}

impl LlmClient {
    /// 新しいクライアントを作成
    pub fn new(config: LlmConfig, aws: Option<&AwsClient>) -> LlmResult<Self> {
        config.validate()?;
        let provider = create_provider(&config, aws)?;

        Ok(Self {
            provider: Arc::from(provider),
            config,
        })
    }

    /// 任意のプロバイダーでクライアントを作成
    pub fn with_provider(config: LlmConfig, provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider, config }
    }

    /// 設定を取得
    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    /// 完了リクエストを送信
    pub async fn complete(&self, mut request: LlmRequest) -> LlmResult<LlmResponse> {
        if request.model.is_none() {
            request.model = Some(self.config.default_model.clone());
        }
        if request.max_tokens.is_none() {
            request.max_tokens = Some(self.config.default_max_tokens);
        }
        if request.temperature.is_none() {
            request.temperature = Some(self.config.default_temperature);
        }

        let mut attempt = 0;
        loop {
            match self.provider.complete(&request).await {
                Ok(response) => {
                    debug!(
                        provider = self.provider.name(),
                        input_tokens = response.usage.input_tokens,
                        output_tokens = response.usage.output_tokens,
                        stop_reason = ?response.stop_reason,
                        "model call completed"
                    );
                    return Ok(response);
                }
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = RETRY_BASE_DELAY * 2u32.pow(attempt);
                    attempt += 1;
                    warn!(provider = self.provider.name(), attempt, error = %e, "model call failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// シンプルなテキスト完了
    pub async fn complete_text(&self, prompt: impl Into<String>) -> LlmResult<String> {
        let response = self.complete(LlmRequest::from_prompt(prompt)).await?;
        Ok(response.text())
    }

    /// システムプロンプト付きの完了（軽量モデルを使用）
    pub async fn classify(
        &self,
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
        max_tokens: usize,
    ) -> LlmResult<String> {
        let request = LlmRequest::new(vec![Message::user(user_prompt)])
            .with_system(system_prompt)
            .with_model(self.config.fast_model())
            .with_max_tokens(max_tokens)
            .with_temperature(0.0);
        let response = self.complete(request).await?;
        Ok(response.text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::error::LlmError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FlakyProvider {
        failures: Mutex<u32>,
        seen: Mutex<Vec<LlmRequest>>,
    }

    #[async_trait]
    impl LlmProvider for FlakyProvider {
        async fn complete(&self, request: &LlmRequest) -> LlmResult<LlmResponse> {
            self.seen.lock().unwrap().push(request.clone());
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(LlmError::RateLimitError("slow down".to_string()));
            }
            Ok(LlmResponse::text_only("QUERY"))
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    fn client(failures: u32) -> (LlmClient, Arc<FlakyProvider>) {
        let provider = Arc::new(FlakyProvider {
            failures: Mutex::new(failures),
            seen: Mutex::new(Vec::new()),
        });
        let config = LlmConfig {
            fast_model: Some("haiku".to_string()),
            ..LlmConfig::bedrock("sonnet")
        };
        (LlmClient::with_provider(config, provider.clone()), provider)
    }

    #[tokio::test(start_paused = true)]
    async fn test_defaults_and_retry() {
        let (client, provider) = client(2);
        let text = client.complete_text("hello").await.unwrap();
        assert_eq!(text, "QUERY");

        let seen = provider.seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].model.as_deref(), Some("sonnet"));
        assert_eq!(seen[0].max_tokens, Some(4096));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_bounded() {
        let (client, provider) = client(10);
        assert!(client.complete_text("hello").await.is_err());
        assert_eq!(provider.seen.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_classify_uses_fast_model() {
        let (client, provider) = client(0);
        client.classify("rubric", "question", 10).await.unwrap();
        let seen = provider.seen.lock().unwrap();
        assert_eq!(seen[0].model.as_deref(), Some("haiku"));
        assert_eq!(seen[0].system.as_deref(), Some("rubric"));
    }
}
