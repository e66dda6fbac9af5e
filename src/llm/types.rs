//! LLM統合の型定義
//!
//! Anthropic Messages形式のリクエスト・レスポンス。ツール呼び出しは
//! コンテンツブロック（`tool_use` / `tool_result`）として表現されます。

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// メッセージの役割
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// ユーザーメッセージ（ツール結果もこの役割で返す）
    User,
    /// アシスタントメッセージ
    Assistant,
}

/// コンテンツブロック
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// テキスト
    Text { text: String },
    /// モデルからのツール呼び出し要求
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    /// ツール実行結果
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>, is_error: bool) -> Self {
        Self::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error,
        }
    }
}

/// ツール呼び出し要求（`ContentBlock::ToolUse` の借用ビュー）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToolUse<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub input: &'a Value,
}

fn collect_text(blocks: &[ContentBlock]) -> String {
    blocks
        .iter()
        .filter_map(|b| match b {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn collect_tool_uses(blocks: &[ContentBlock]) -> Vec<ToolUse<'_>> {
    blocks
        .iter()
        .filter_map(|b| match b {
            ContentBlock::ToolUse { id, name, input } => Some(ToolUse { id, name, input }),
            _ => None,
        })
        .collect()
}

/// 会話メッセージ
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// 役割
    pub role: Role,
    /// コンテンツブロック
    pub content: Vec<ContentBlock>,
}

impl Message {
    /// ユーザーメッセージを作成
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::text(content)],
        }
    }

    /// アシスタントメッセージを作成
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentBlock::text(content)],
        }
    }

    /// モデル応答のブロックをそのままアシスタントターンにする
    pub fn assistant_blocks(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content,
        }
    }

    /// ツール結果をユーザーターンにまとめる
    pub fn tool_results(results: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::User,
            content: results,
        }
    }

    /// テキストブロックを連結
    pub fn text(&self) -> String {
        collect_text(&self.content)
    }

    /// テキストのみのユーザーターンか
    pub fn is_user_text(&self, text: &str) -> bool {
        self.role == Role::User
            && self.content.len() == 1
            && matches!(&self.content[0], ContentBlock::Text { text: t } if t == text)
    }
}

/// モデルに渡すツール定義
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// ツール選択
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolChoice {
    /// モデルに任せる
    Auto,
    /// ツールを使わせない
    None,
}

/// LLMリクエスト
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmRequest {
    /// メッセージ履歴
    pub messages: Vec<Message>,
    /// システムプロンプト
    pub system: Option<String>,
    /// 利用可能なツール
    pub tools: Vec<ToolSpec>,
    /// ツール選択（ツールが無い場合は送らない）
    pub tool_choice: Option<ToolChoice>,
    /// 使用するモデル（未指定時はデフォルト）
    pub model: Option<String>,
    /// 最大トークン数
    pub max_tokens: Option<usize>,
    /// 温度パラメータ
    pub temperature: Option<f32>,
}

impl LlmRequest {
    /// 新しいリクエストを作成
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    /// 単一のユーザーメッセージからリクエストを作成
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self::new(vec![Message::user(prompt)])
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>, choice: ToolChoice) -> Self {
        self.tools = tools;
        self.tool_choice = Some(choice);
        self
    }

    /// モデルを設定
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// 最大トークン数を設定
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// 温度を設定
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// 停止理由
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    #[default]
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
    #[serde(other)]
    Other,
}

/// トークン使用量
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct TokenUsage {
    /// 入力トークン数
    #[serde(default)]
    pub input_tokens: u64,
    /// 出力トークン数
    #[serde(default)]
    pub output_tokens: u64,
}

impl TokenUsage {
    /// 合計トークン数
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// LLMレスポンス
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmResponse {
    #[serde(default)]
    pub id: Option<String>,
    /// 使用されたモデル
    #[serde(default)]
    pub model: String,
    /// 生成されたブロック
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    /// 停止理由
    #[serde(default)]
    pub stop_reason: StopReason,
    /// トークン使用量
    #[serde(default)]
    pub usage: TokenUsage,
}

impl LlmResponse {
    /// テキストのみの応答を作成
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            id: None,
            model: String::new(),
            content: vec![ContentBlock::text(text)],
            stop_reason: StopReason::EndTurn,
            usage: TokenUsage::default(),
        }
    }

    /// テキストブロックを連結
    pub fn text(&self) -> String {
        collect_text(&self.content)
    }

    /// ツール呼び出し要求（要求順）
    pub fn tool_uses(&self) -> Vec<ToolUse<'_>> {
        collect_tool_uses(&self.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_creation() {
        let user_msg = Message::user("Hello");
        assert_eq!(user_msg.role, Role::User);
        assert_eq!(user_msg.text(), "Hello");
        assert!(user_msg.is_user_text("Hello"));

        let assistant_msg = Message::assistant("Hi there!");
        assert_eq!(assistant_msg.role, Role::Assistant);
        assert!(!assistant_msg.is_user_text("Hi there!"));
    }

    #[test]
    fn test_content_block_wire_format() {
        let block = ContentBlock::tool_result("tu_1", "ok", false);
        assert_eq!(
            serde_json::to_value(&block).unwrap(),
            json!({"type": "tool_result", "tool_use_id": "tu_1", "content": "ok"})
        );

        let failed = ContentBlock::tool_result("tu_2", "boom", true);
        assert_eq!(serde_json::to_value(&failed).unwrap()["is_error"], true);
        assert_eq!(serde_json::to_value(ToolChoice::None).unwrap(), json!({"type": "none"}));
    }

    #[test]
    fn test_response_decoding() {
        let response: LlmResponse = serde_json::from_value(json!({
            "id": "msg_1",
            "model": "claude",
            "content": [
                {"type": "text", "text": "Let me check."},
                {"type": "tool_use", "id": "tu_1", "name": "run-query", "input": {"sql": "SELECT 1"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 12, "output_tokens": 7}
        }))
        .unwrap();

        assert_eq!(response.stop_reason, StopReason::ToolUse);
        assert_eq!(response.text(), "Let me check.");
        let uses = response.tool_uses();
        assert_eq!(uses.len(), 1);
        assert_eq!(uses[0].name, "run-query");
        assert_eq!(response.usage.total(), 19);
    }

    #[test]
    fn test_unknown_stop_reason() {
        let reason: StopReason = serde_json::from_value(json!("pause_turn")).unwrap();
        assert_eq!(reason, StopReason::Other);
    }

    #[test]
    fn test_request_builder() {
        let request = LlmRequest::from_prompt("Hello")
            .with_model("claude")
            .with_max_tokens(100)
            .with_temperature(0.5);

        assert_eq!(request.model, Some("claude".to_string()));
        assert_eq!(request.max_tokens, Some(100));
        assert_eq!(request.temperature, Some(0.5));
        assert!(request.tools.is_empty());
    }
}
