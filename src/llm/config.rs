//! LLM統合の設定

use crate::llm::error::{LlmError, LlmResult};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// LLMプロバイダー
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProviderKind {
    /// Bedrock Runtime（AWS認証情報で署名）
    Bedrock,
    /// Anthropic API（APIキー）
    Anthropic,
}

/// LLM設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// プロバイダー
    pub provider: LlmProviderKind,
    /// APIキー（Anthropic直接利用時）
    #[serde(skip_serializing)]
    pub api_key: Option<SecretString>,
    /// デフォルトモデル
    pub default_model: String,
    /// 意図分類・クエリ生成用の軽量モデル（未設定ならデフォルトモデル）
    pub fast_model: Option<String>,
    /// リクエストタイムアウト（秒）
    pub timeout_secs: u64,
    /// 最大リトライ回数
    pub max_retries: u32,
    /// デフォルト温度
    pub default_temperature: f32,
    /// デフォルト最大トークン数
    pub default_max_tokens: usize,
    /// APIエンドポイント（カスタム時）
    pub endpoint: Option<String>,
}

impl LlmConfig {
    /// Bedrock設定を作成
    pub fn bedrock(model: impl Into<String>) -> Self {
        Self {
            provider: LlmProviderKind::Bedrock,
            default_model: model.into(),
            ..Default::default()
        }
    }

    /// Anthropic API設定を作成
    pub fn anthropic(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: LlmProviderKind::Anthropic,
            api_key: Some(SecretString::new(api_key.into().into_boxed_str())),
            default_model: model.into(),
            ..Default::default()
        }
    }

    /// タイムアウトを取得
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// APIキーを取得（露出）
    pub fn get_api_key(&self) -> Option<&str> {
        self.api_key.as_ref().map(|k| k.expose_secret())
    }

    /// 軽量モデル
    pub fn fast_model(&self) -> &str {
        self.fast_model.as_deref().unwrap_or(&self.default_model)
    }

    /// 設定を検証
    pub fn validate(&self) -> LlmResult<()> {
        if self.provider == LlmProviderKind::Anthropic && self.api_key.is_none() {
            return Err(LlmError::ConfigError(
                "API key is required for the Anthropic provider".to_string(),
            ));
        }

        if self.default_model.trim().is_empty() {
            return Err(LlmError::ConfigError("default_model must be set".to_string()));
        }

        // 温度の範囲チェック
        if !(0.0..=1.0).contains(&self.default_temperature) {
            return Err(LlmError::ConfigError(
                "Temperature must be between 0.0 and 1.0".to_string(),
            ));
        }

        // max_tokensの妥当性チェック
        if self.default_max_tokens == 0 || self.default_max_tokens > 100_000 {
            return Err(LlmError::ConfigError(
                "max_tokens must be between 1 and 100000".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProviderKind::Bedrock,
            api_key: None,
            default_model: "anthropic.claude-3-5-sonnet-20240620-v1:0".to_string(),
            fast_model: None,
            timeout_secs: 120,
            max_retries: 3,
            default_temperature: 0.0,
            default_max_tokens: 4096,
            endpoint: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bedrock_config() {
        let config = LlmConfig::bedrock("anthropic.claude-3-haiku-20240307-v1:0");
        assert_eq!(config.provider, LlmProviderKind::Bedrock);
        assert!(config.validate().is_ok());
        assert_eq!(config.fast_model(), "anthropic.claude-3-haiku-20240307-v1:0");
    }

    #[test]
    fn test_anthropic_requires_key() {
        let mut config = LlmConfig::anthropic("test-key", "claude-3-5-sonnet-latest");
        assert!(config.validate().is_ok());
        config.api_key = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_invalid_temperature() {
        let mut config = LlmConfig::default();
        config.default_temperature = 3.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_invalid_max_tokens() {
        let mut config = LlmConfig::default();
        config.default_max_tokens = 0;
        assert!(config.validate().is_err());
    }
}
