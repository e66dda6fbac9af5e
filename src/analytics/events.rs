//! Activity Events
//!
//! 監査イベントの型とページング取得

use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// AWS内部呼び出しの送信元IP
pub const INTERNAL_SOURCE: &str = "internal";

/// イベントが参照するリソース
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    pub resource_type: String,
    pub resource_name: String,
}

/// 監査イベント（不変）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: String,
    pub event_time: DateTime<Utc>,
    /// 実行主体（ARN等）
    pub identity: String,
    /// アクション名（例: `CreateUser`）
    pub event_name: String,
    /// サービスドメイン（例: `iam.amazonaws.com`）
    pub event_source: String,
    /// 送信元IPまたは [`INTERNAL_SOURCE`]
    pub source_ip: String,
    /// v1フィールドのリソース一覧
    #[serde(default)]
    pub resources: Vec<ResourceRef>,
    /// 生のイベントJSON
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

impl Event {
    /// 最小構成のイベントを作成
    pub fn new(
        identity: impl Into<String>,
        event_name: impl Into<String>,
        event_source: impl Into<String>,
        source_ip: impl Into<String>,
        event_time: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            event_time,
            identity: identity.into(),
            event_name: event_name.into(),
            event_source: event_source.into(),
            source_ip: source_ip.into(),
            resources: Vec::new(),
            raw: None,
        }
    }

    pub fn with_resource(mut self, resource_type: impl Into<String>, resource_name: impl Into<String>) -> Self {
        self.resources.push(ResourceRef {
            resource_type: resource_type.into(),
            resource_name: resource_name.into(),
        });
        self
    }

    pub fn with_raw(mut self, raw: Value) -> Self {
        self.raw = Some(raw);
        self
    }

    /// サービス名（イベントソースの先頭ラベル）
    pub fn service(&self) -> &str {
        self.event_source
            .split('.')
            .next()
            .unwrap_or(self.event_source.as_str())
    }

    /// `service:Action` 形式の権限
    pub fn permission(&self) -> String {
        format!("{}:{}", self.service(), self.event_name)
    }

    pub fn is_internal(&self) -> bool {
        self.source_ip == INTERNAL_SOURCE
    }

    /// v1フィールドと生JSONの両方に載っているリソース
    pub fn all_resources(&self) -> Vec<ResourceRef> {
        let mut all = self.resources.clone();
        if let Some(list) = self
            .raw
            .as_ref()
            .and_then(|raw| raw.get("resources"))
            .and_then(Value::as_array)
        {
            for item in list {
                let resource_type = item.get("type").and_then(Value::as_str);
                let resource_name = item
                    .get("ARN")
                    .or_else(|| item.get("arn"))
                    .and_then(Value::as_str);
                if let (Some(resource_type), Some(resource_name)) = (resource_type, resource_name) {
                    all.push(ResourceRef {
                        resource_type: resource_type.to_string(),
                        resource_name: resource_name.to_string(),
                    });
                }
            }
        }
        all
    }
}

/// 検索条件の属性
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupAttribute {
    pub key: String,
    pub value: String,
}

/// イベント検索リクエスト
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupRequest {
    pub attribute: Option<LookupAttribute>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub max_results: u32,
    pub next_token: Option<String>,
}

/// 1ページ分の検索結果
#[derive(Debug, Clone, Default)]
pub struct LookupPage {
    pub events: Vec<Event>,
    pub next_token: Option<String>,
}

/// イベント検索サービス
#[async_trait]
pub trait EventLookupApi: Send + Sync {
    async fn lookup_events(&self, request: &LookupRequest) -> Result<LookupPage>;
}

/// ページング付きイベント取得
pub struct EventFetcher {
    api: Arc<dyn EventLookupApi>,
    page_delay: Duration,
    page_size: u32,
    max_throttle_retries: u32,
}

impl EventFetcher {
    /// `page_delay` は200ms未満に設定できない
    pub fn new(api: Arc<dyn EventLookupApi>, page_delay: Duration, page_size: u32) -> Self {
        Self {
            api,
            page_delay: page_delay.max(Duration::from_millis(200)),
            page_size: page_size.clamp(1, 50),
            max_throttle_retries: 3,
        }
    }

    /// 1ユーザー分のイベントを全件取得（上限なし）
    pub async fn fetch_for_identity(
        &self,
        identity: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Event>> {
        if identity.trim().is_empty() {
            return Err(Error::InputInvalid("user_arn is required".to_string()));
        }
        let attribute = LookupAttribute {
            key: "Username".to_string(),
            value: username_from_identity(identity).to_string(),
        };
        self.fetch(Some(attribute), start, end, None).await
    }

    /// アカウント全体のイベントを `cap` 件まで取得
    pub async fn fetch_account(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        cap: usize,
    ) -> Result<Vec<Event>> {
        self.fetch(None, start, end, Some(cap)).await
    }

    async fn fetch(
        &self,
        attribute: Option<LookupAttribute>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        cap: Option<usize>,
    ) -> Result<Vec<Event>> {
        if end < start {
            return Err(Error::InputInvalid(
                "end of the time window precedes its start".to_string(),
            ));
        }

        let mut events = Vec::new();
        let mut next_token: Option<String> = None;
        let mut pages = 0u32;

        loop {
            let request = LookupRequest {
                attribute: attribute.clone(),
                start_time: start,
                end_time: end,
                max_results: self.page_size,
                next_token: next_token.clone(),
            };
            let page = self.lookup_with_retry(&request).await?;
            pages += 1;
            events.extend(page.events);

            if let Some(cap) = cap {
                if events.len() >= cap {
                    events.truncate(cap);
                    info!(cap, pages, "event cap reached");
                    break;
                }
            }

            match page.next_token {
                Some(token) if !token.is_empty() => {
                    next_token = Some(token);
                    tokio::time::sleep(self.page_delay).await;
                }
                _ => break,
            }
        }

        debug!(events = events.len(), pages, "event fetch finished");
        Ok(events)
    }

    /// スロットリング時は間隔を倍にして再試行
    async fn lookup_with_retry(&self, request: &LookupRequest) -> Result<LookupPage> {
        let mut delay = self.page_delay;
        let mut attempt = 0;
        loop {
            match self.api.lookup_events(request).await {
                Err(Error::Throttled(message)) if attempt < self.max_throttle_retries => {
                    attempt += 1;
                    warn!(attempt, delay_ms = delay.as_millis() as u64, %message, "event lookup throttled");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                other => return other,
            }
        }
    }
}

/// ARNの末尾セグメント（`arn:aws:iam::1:user/alice` → `alice`）
pub fn username_from_identity(identity: &str) -> &str {
    identity.rsplit('/').next().unwrap_or(identity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use std::sync::Mutex;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_service_and_permission() {
        let event = Event::new("alice", "PutObject", "s3.amazonaws.com", "10.0.0.1", at(9));
        assert_eq!(event.service(), "s3");
        assert_eq!(event.permission(), "s3:PutObject");
        assert!(!event.is_internal());
    }

    #[test]
    fn test_all_resources_merges_raw() {
        let event = Event::new("alice", "GetObject", "s3.amazonaws.com", "10.0.0.1", at(9))
            .with_resource("AWS::S3::Bucket", "logs")
            .with_raw(json!({
                "resources": [
                    {"type": "AWS::S3::Object", "ARN": "arn:aws:s3:::logs/a.txt"},
                    {"type": "AWS::S3::Bucket"}
                ]
            }));
        let all = event.all_resources();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].resource_name, "arn:aws:s3:::logs/a.txt");
    }

    #[test]
    fn test_username_from_identity() {
        assert_eq!(username_from_identity("arn:aws:iam::123:user/ops/alice"), "alice");
        assert_eq!(username_from_identity("bob"), "bob");
    }

    struct PagedApi {
        pages: Mutex<Vec<Result<LookupPage>>>,
        requests: Mutex<Vec<LookupRequest>>,
    }

    #[async_trait]
    impl EventLookupApi for PagedApi {
        async fn lookup_events(&self, request: &LookupRequest) -> Result<LookupPage> {
            self.requests.lock().unwrap().push(request.clone());
            self.pages.lock().unwrap().remove(0)
        }
    }

    fn page(count: usize, next: Option<&str>) -> Result<LookupPage> {
        Ok(LookupPage {
            events: (0..count)
                .map(|_| Event::new("alice", "ListUsers", "iam.amazonaws.com", "10.0.0.1", at(9)))
                .collect(),
            next_token: next.map(String::from),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_follows_pages_and_retries_throttle() {
        let api = Arc::new(PagedApi {
            pages: Mutex::new(vec![
                page(50, Some("t1")),
                Err(Error::Throttled("rate".into())),
                page(10, None),
            ]),
            requests: Mutex::new(Vec::new()),
        });
        let fetcher = EventFetcher::new(api.clone(), Duration::from_millis(10), 50);

        let events = fetcher
            .fetch_for_identity("arn:aws:iam::1:user/alice", at(0), at(12))
            .await
            .unwrap();

        assert_eq!(events.len(), 60);
        let requests = api.requests.lock().unwrap();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].attribute.as_ref().unwrap().value, "alice");
        assert_eq!(requests[2].next_token.as_deref(), Some("t1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_account_fetch_is_capped() {
        let api = Arc::new(PagedApi {
            pages: Mutex::new(vec![page(50, Some("a")), page(50, Some("b")), page(50, None)]),
            requests: Mutex::new(Vec::new()),
        });
        let fetcher = EventFetcher::new(api.clone(), Duration::from_millis(200), 50);

        let events = fetcher.fetch_account(at(0), at(12), 70).await.unwrap();
        assert_eq!(events.len(), 70);
        assert_eq!(api.requests.lock().unwrap().len(), 2);
    }
}
