//! 統合テスト用のインプロセス実装

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cloudlens_rs::alerts::AlertChannel;
use cloudlens_rs::analytics::{Event, EventLookupApi, LookupPage, LookupRequest, UnknownGeoResolver};
use cloudlens_rs::app::Backends;
use cloudlens_rs::gateway::{
    InsightsApi, InsightsQuery, InsightsResults, InsightsStatus, LogGroupInfo, LogGroupPage,
    QueryContext, QueryExecutionStatus, QueryState, ResultField, WarehouseApi,
};
use cloudlens_rs::llm::{
    ContentBlock, LlmClient, LlmConfig, LlmError, LlmProvider, LlmRequest, LlmResponse, LlmResult,
    StopReason,
};
use cloudlens_rs::mcp::{McpError, Tool, ToolCallResult, ToolTransport};
use cloudlens_rs::orchestrator::TransportFactory;
use cloudlens_rs::store::MemoryStore;
use cloudlens_rs::Result;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// 台本どおりに応答するモデル
#[derive(Default)]
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<LlmResponse>>,
    pub seen: Mutex<Vec<LlmRequest>>,
}

impl ScriptedLlm {
    pub fn new(replies: Vec<LlmResponse>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn texts(replies: &[&str]) -> Arc<Self> {
        Self::new(replies.iter().map(|r| LlmResponse::text_only(*r)).collect())
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn client(self: &Arc<Self>) -> LlmClient {
        let config = LlmConfig {
            fast_model: Some("fast".to_string()),
            max_retries: 0,
            ..LlmConfig::bedrock("main")
        };
        LlmClient::with_provider(config, self.clone())
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn complete(&self, request: &LlmRequest) -> LlmResult<LlmResponse> {
        self.seen.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LlmError::ApiError("script exhausted".to_string()))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// 1件のツール呼び出しを含む応答
pub fn tool_use_reply(id: &str, name: &str, input: Value) -> LlmResponse {
    LlmResponse {
        content: vec![ContentBlock::ToolUse {
            id: id.to_string(),
            name: name.to_string(),
            input,
        }],
        stop_reason: StopReason::ToolUse,
        ..LlmResponse::text_only("")
    }
}

/// ツール名ごとに応答を順に返すツールサーバー
pub struct FakeTools {
    tools: Vec<String>,
    replies: Mutex<Vec<(String, VecDeque<ToolCallResult>)>>,
    pub calls: Mutex<Vec<(String, Value)>>,
    pub closed: AtomicUsize,
}

impl FakeTools {
    pub fn new(tools: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            tools: tools.iter().map(|t| t.to_string()).collect(),
            replies: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            closed: AtomicUsize::new(0),
        })
    }

    pub fn script(self: &Arc<Self>, tool: &str, replies: Vec<ToolCallResult>) -> Arc<Self> {
        self.replies
            .lock()
            .unwrap()
            .push((tool.to_string(), replies.into()));
        self.clone()
    }

    pub fn calls_to(&self, tool: &str) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == tool)
            .map(|(_, args)| args.clone())
            .collect()
    }

    pub fn factory(self: &Arc<Self>) -> TransportFactory {
        let tools = self.clone();
        Arc::new(move || tools.clone() as Arc<dyn ToolTransport>)
    }
}

#[async_trait]
impl ToolTransport for FakeTools {
    async fn initialize(&self) -> std::result::Result<(), McpError> {
        Ok(())
    }

    async fn list_tools(&self) -> std::result::Result<Vec<Tool>, McpError> {
        Ok(self
            .tools
            .iter()
            .map(|name| Tool {
                name: name.clone(),
                description: Some(format!("{} tool", name)),
                input_schema: json!({"type": "object", "properties": {}}),
            })
            .collect())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> std::result::Result<ToolCallResult, McpError> {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), arguments));
        let mut replies = self.replies.lock().unwrap();
        match replies.iter_mut().find(|(tool, _)| tool == name) {
            Some((_, queue)) => queue
                .pop_front()
                .ok_or_else(|| McpError::InvalidResponse(format!("no reply left for {}", name))),
            None => Err(McpError::ToolNotFound(name.to_string())),
        }
    }

    async fn close(&self) -> std::result::Result<(), McpError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// 固定のイベント一覧を1ページで返す
#[derive(Default)]
pub struct FakeEvents {
    pub events: Mutex<Vec<Event>>,
    pub requests: Mutex<Vec<LookupRequest>>,
}

impl FakeEvents {
    pub fn with(events: Vec<Event>) -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(events),
            requests: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl EventLookupApi for FakeEvents {
    async fn lookup_events(&self, request: &LookupRequest) -> Result<LookupPage> {
        self.requests.lock().unwrap().push(request.clone());
        let events = self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| match &request.attribute {
                Some(attr) => e.identity.rsplit('/').next() == Some(attr.value.as_str()),
                None => true,
            })
            .cloned()
            .collect();
        Ok(LookupPage {
            events,
            next_token: None,
        })
    }
}

/// 1回で成功する倉庫
#[derive(Default)]
pub struct FakeWarehouse {
    pub rows: Vec<Vec<Option<String>>>,
    pub statements: Mutex<Vec<String>>,
}

impl FakeWarehouse {
    pub fn with_rows(rows: Vec<Vec<&str>>) -> Arc<Self> {
        Arc::new(Self {
            rows: rows
                .into_iter()
                .map(|row| row.into_iter().map(|c| Some(c.to_string())).collect())
                .collect(),
            statements: Mutex::new(Vec::new()),
        })
    }

    pub fn statement_count(&self) -> usize {
        self.statements.lock().unwrap().len()
    }
}

#[async_trait]
impl WarehouseApi for FakeWarehouse {
    async fn start_query(&self, sql: &str, _context: &QueryContext) -> Result<String> {
        let mut statements = self.statements.lock().unwrap();
        statements.push(sql.to_string());
        Ok(format!("exec-{}", statements.len()))
    }

    async fn get_execution(&self, _execution_id: &str) -> Result<QueryExecutionStatus> {
        Ok(QueryExecutionStatus {
            state: QueryState::Succeeded,
            reason: None,
        })
    }

    async fn get_results(&self, _execution_id: &str) -> Result<Vec<Vec<Option<String>>>> {
        Ok(self.rows.clone())
    }

    async fn database_exists(&self, _database: &str) -> Result<bool> {
        Ok(true)
    }
}

#[derive(Default)]
pub struct FakeInsights {
    pub groups: Vec<String>,
    pub records: Vec<Vec<(String, String)>>,
    pub queries: Mutex<Vec<InsightsQuery>>,
}

#[async_trait]
impl InsightsApi for FakeInsights {
    async fn start_query(&self, query: &InsightsQuery) -> Result<String> {
        self.queries.lock().unwrap().push(query.clone());
        Ok("q-1".to_string())
    }

    async fn get_query_results(&self, _query_id: &str) -> Result<InsightsResults> {
        Ok(InsightsResults {
            status: InsightsStatus::Complete,
            results: self
                .records
                .iter()
                .map(|record| {
                    record
                        .iter()
                        .map(|(field, value)| ResultField {
                            field: field.clone(),
                            value: value.clone(),
                        })
                        .collect()
                })
                .collect(),
        })
    }

    async fn describe_log_groups(
        &self,
        _prefix: Option<&str>,
        _limit: usize,
        _next_token: Option<&str>,
    ) -> Result<LogGroupPage> {
        Ok(LogGroupPage {
            groups: self
                .groups
                .iter()
                .map(|name| LogGroupInfo {
                    name: name.clone(),
                    creation_time: None,
                    retention_days: None,
                })
                .collect(),
            next_token: None,
        })
    }
}

/// 送信内容を記録する通知チャネル
#[derive(Default)]
pub struct RecordingAlerts {
    pub published: Mutex<Vec<(String, String, Option<String>)>>,
}

#[async_trait]
impl AlertChannel for RecordingAlerts {
    async fn publish(&self, topic: &str, message: &str, subject: Option<&str>) -> Result<()> {
        self.published.lock().unwrap().push((
            topic.to_string(),
            message.to_string(),
            subject.map(str::to_string),
        ));
        Ok(())
    }
}

pub fn event(identity: &str, action: &str, source: &str, ip: &str, at: DateTime<Utc>) -> Event {
    Event::new(identity, action, source, ip, at)
}

/// 全外部サービスをインプロセス実装にしたバックエンド
pub struct Fakes {
    pub events: Arc<FakeEvents>,
    pub warehouse: Arc<FakeWarehouse>,
    pub insights: Arc<FakeInsights>,
    pub alerts: Arc<RecordingAlerts>,
    pub llm: Arc<ScriptedLlm>,
    pub tools: Option<Arc<FakeTools>>,
}

impl Fakes {
    pub fn new(llm: Arc<ScriptedLlm>) -> Self {
        Self {
            events: FakeEvents::with(Vec::new()),
            warehouse: Arc::new(FakeWarehouse::default()),
            insights: Arc::new(FakeInsights::default()),
            alerts: Arc::new(RecordingAlerts::default()),
            llm,
            tools: None,
        }
    }

    pub fn backends(&self) -> Backends {
        Backends {
            warehouse: self.warehouse.clone(),
            insights: self.insights.clone(),
            events: self.events.clone(),
            policies: None,
            alerts: self.alerts.clone(),
            geo: Arc::new(UnknownGeoResolver),
            store: Arc::new(MemoryStore::new()),
            llm: self.llm.client(),
            tools: self.tools.as_ref().map(FakeTools::factory),
        }
    }
}
