//! LLM統合のエラー型定義

use thiserror::Error;

/// LLM統合システムのエラー型
#[derive(Error, Debug)]
pub enum LlmError {
    /// API呼び出しエラー
    #[error("API error: {0}")]
    ApiError(String),

    /// 認証エラー
    #[error("Authentication error: {0}")]
    AuthError(String),

    /// レート制限エラー
    #[error("Rate limit exceeded: {0}")]
    RateLimitError(String),

    /// 無効なリクエスト
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// 設定エラー
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// ネットワークエラー
    #[error("Network error: {0}")]
    NetworkError(String),

    /// JSONパースエラー
    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// HTTPエラー
    #[error("HTTP error {status}: {body}")]
    HttpError { status: u16, body: String },
}

impl LlmError {
    /// 再試行で回復しうるか
    pub fn is_retryable(&self) -> bool {
        matches!(self, LlmError::RateLimitError(_) | LlmError::NetworkError(_))
            || matches!(self, LlmError::HttpError { status, .. } if *status >= 500)
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        LlmError::NetworkError(e.to_string())
    }
}

/// LLM統合システムの結果型
pub type LlmResult<T> = Result<T, LlmError>;
