//! LLM統合システム
//!
//! Anthropic Messages形式のモデル呼び出し（Bedrock経由または直接API）と、
//! ツール呼び出し用のコンテンツブロック型を提供します。

pub mod client;
pub mod config;
pub mod error;
pub mod providers;
pub mod types;

pub use client::LlmClient;
pub use config::{LlmConfig, LlmProviderKind};
pub use error::{LlmError, LlmResult};
pub use providers::LlmProvider;
pub use types::{
    ContentBlock, LlmRequest, LlmResponse, Message, Role, StopReason, TokenUsage, ToolChoice,
    ToolSpec,
};
