//! Profile Store
//!
//! プロファイル・異常・分析結果を保持するキーバリューストア。
//! 汎用の [`KeyValueStore`] トレイトに対してメモリ実装とSQLite実装を持ち、
//! [`ProfileRepository`] が型付きの操作を提供する。

mod memory;
mod repository;
mod sqlite;

pub use memory::MemoryStore;
pub use repository::ProfileRepository;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use thiserror::Error;

/// ストアに格納するアイテム（JSONオブジェクト）
pub type Item = Map<String, Value>;

/// ストアエラー
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Condition check failed for {0}")]
    ConditionFailed(String),

    #[error("Update would change key attribute {0}")]
    KeyConflict(String),

    #[error("Missing key attribute {0}")]
    MissingKey(String),

    #[error("Unknown index {0}")]
    UnknownIndex(String),

    #[error("Invalid page token")]
    InvalidPageToken,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// 論理コレクション
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Sessions,
    Users,
    Profiles,
    Anomalies,
    AnalysisResults,
    RoleHistory,
    AccessDecisions,
}

/// キー構成
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeySchema {
    pub partition: &'static str,
    pub sort: Option<&'static str>,
}

/// 利用者ARN別・作成時刻順のセカンダリインデックス
pub const USER_ARN_INDEX: &str = "UserArnIndex";

impl Collection {
    pub fn name(&self) -> &'static str {
        match self {
            Collection::Sessions => "sessions",
            Collection::Users => "users",
            Collection::Profiles => "profiles",
            Collection::Anomalies => "anomalies",
            Collection::AnalysisResults => "analysis_results",
            Collection::RoleHistory => "role_history",
            Collection::AccessDecisions => "access_decisions",
        }
    }

    pub fn key_schema(&self) -> KeySchema {
        match self {
            Collection::Sessions => KeySchema {
                partition: "session_id",
                sort: None,
            },
            Collection::Users => KeySchema {
                partition: "user_id",
                sort: None,
            },
            Collection::Profiles => KeySchema {
                partition: "user_arn",
                sort: None,
            },
            Collection::Anomalies => KeySchema {
                partition: "user_arn",
                sort: Some("id"),
            },
            Collection::AnalysisResults | Collection::AccessDecisions => KeySchema {
                partition: "id",
                sort: None,
            },
            Collection::RoleHistory => KeySchema {
                partition: "role_arn",
                sort: Some("timestamp"),
            },
        }
    }

    /// インデックスのキー構成
    pub fn index_schema(&self, index: &str) -> Option<KeySchema> {
        match (self, index) {
            (Collection::Anomalies | Collection::AnalysisResults, USER_ARN_INDEX) => Some(KeySchema {
                partition: "user_arn",
                sort: Some("timestamp"),
            }),
            _ => None,
        }
    }
}

/// 主キー
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    pub partition: String,
    pub sort: Option<String>,
}

impl Key {
    pub fn partition(value: impl Into<String>) -> Self {
        Self {
            partition: value.into(),
            sort: None,
        }
    }

    pub fn with_sort(mut self, value: impl Into<String>) -> Self {
        self.sort = Some(value.into());
        self
    }

    /// アイテムからキーを取り出す
    pub fn from_item(collection: Collection, item: &Item) -> StoreResult<Self> {
        let schema = collection.key_schema();
        let partition = key_text(item, schema.partition)
            .ok_or_else(|| StoreError::MissingKey(schema.partition.to_string()))?;
        let sort = match schema.sort {
            Some(field) => Some(key_text(item, field).ok_or_else(|| StoreError::MissingKey(field.to_string()))?),
            None => None,
        };
        Ok(Self { partition, sort })
    }

    /// 保存用の (pk, sk) ペア
    pub(crate) fn storage_parts(&self) -> (String, String) {
        (self.partition.clone(), self.sort.clone().unwrap_or_default())
    }
}

fn key_text(item: &Item, field: &str) -> Option<String> {
    match item.get(field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// 並び順
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Ascending,
    Descending,
}

/// パーティションキー条件での検索
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub partition_value: String,
    pub index: Option<String>,
    pub limit: Option<usize>,
    /// 未指定時はインデックス検索なら降順、それ以外は昇順
    pub order: Option<Order>,
    pub page_token: Option<String>,
}

impl QueryRequest {
    pub fn partition(value: impl Into<String>) -> Self {
        Self {
            partition_value: value.into(),
            index: None,
            limit: None,
            order: None,
            page_token: None,
        }
    }

    pub fn on_index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn order(mut self, order: Order) -> Self {
        self.order = Some(order);
        self
    }

    pub fn effective_order(&self) -> Order {
        self.order.unwrap_or(if self.index.is_some() {
            Order::Descending
        } else {
            Order::Ascending
        })
    }

    /// 検索に使うキー構成
    pub fn schema(&self, collection: Collection) -> StoreResult<KeySchema> {
        match &self.index {
            Some(index) => collection
                .index_schema(index)
                .ok_or_else(|| StoreError::UnknownIndex(index.clone())),
            None => Ok(collection.key_schema()),
        }
    }
}

/// 属性の等値フィルター（空なら全件）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanFilter {
    pub equals: Vec<(String, Value)>,
}

impl ScanFilter {
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.equals.push((field.into(), value.into()));
        self
    }

    pub fn matches(&self, item: &Item) -> bool {
        self.equals
            .iter()
            .all(|(field, value)| item.get(field) == Some(value))
    }
}

/// 結果ページ
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<Item>,
    pub next_token: Option<String>,
}

/// 書き込み条件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutCondition {
    None,
    /// 同じキーのアイテムが無いこと
    NotExists,
    /// 既存アイテムの `version` が一致すること（無ければ0とみなす）
    VersionEquals(u64),
}

/// キーバリューストア
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, collection: Collection, key: &Key) -> StoreResult<Option<Item>>;

    /// 保存したアイテム（ID・タイムスタンプ補完後）を返す
    async fn put(&self, collection: Collection, item: Item, condition: PutCondition) -> StoreResult<Item>;

    /// 既存アイテムへパッチを適用。存在しなければ `None`
    async fn update(&self, collection: Collection, key: &Key, patch: Item) -> StoreResult<Option<Item>>;

    async fn query(&self, collection: Collection, request: &QueryRequest) -> StoreResult<Page>;

    async fn scan(
        &self,
        collection: Collection,
        filter: &ScanFilter,
        limit: Option<usize>,
        page_token: Option<&str>,
    ) -> StoreResult<Page>;
}

/// 書き込み前の補完: `id` 系キーはUUID、`timestamp` は現在時刻
pub(crate) fn prepare_item(collection: Collection, mut item: Item, now: DateTime<Utc>) -> StoreResult<Item> {
    let schema = collection.key_schema();
    for field in [Some(schema.partition), schema.sort].into_iter().flatten() {
        if field == "id" && key_text(&item, field).is_none() {
            item.insert(field.to_string(), Value::String(uuid::Uuid::new_v4().to_string()));
        }
    }
    if !matches!(item.get("timestamp"), Some(Value::String(s)) if !s.is_empty()) {
        item.insert("timestamp".to_string(), Value::String(now.to_rfc3339()));
    }
    Key::from_item(collection, &item)?;
    Ok(item)
}

/// パッチがキー属性を書き換えないか確認して適用
pub(crate) fn apply_patch(collection: Collection, existing: &mut Item, patch: Item) -> StoreResult<()> {
    let schema = collection.key_schema();
    for field in [Some(schema.partition), schema.sort].into_iter().flatten() {
        if let Some(new_value) = patch.get(field) {
            if existing.get(field) != Some(new_value) {
                return Err(StoreError::KeyConflict(field.to_string()));
            }
        }
    }
    for (k, v) in patch {
        existing.insert(k, v);
    }
    Ok(())
}

/// 現在の `version`（無ければ0）
pub(crate) fn item_version(item: &Item) -> u64 {
    item.get("version").and_then(Value::as_u64).unwrap_or(0)
}

/// ソートキーの比較。時刻文字列は時刻として比較する
pub(crate) fn compare_sort_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => {
            match (DateTime::parse_from_rfc3339(x), DateTime::parse_from_rfc3339(y)) {
                (Ok(tx), Ok(ty)) => tx.cmp(&ty),
                _ => x.cmp(y),
            }
        }
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

/// パーティション一致のアイテムを並べ替えてページ分割
pub(crate) fn select_partition(items: Vec<Item>, schema: KeySchema, request: &QueryRequest) -> StoreResult<Page> {
    let mut matched: Vec<Item> = items
        .into_iter()
        .filter(|item| key_text(item, schema.partition).as_deref() == Some(request.partition_value.as_str()))
        .collect();

    if let Some(sort) = schema.sort {
        matched.sort_by(|a, b| compare_sort_values(a.get(sort), b.get(sort)));
    }
    if request.effective_order() == Order::Descending {
        matched.reverse();
    }

    paginate(matched, request.limit, request.page_token.as_deref())
}

/// オフセット方式のページ分割
pub(crate) fn paginate(items: Vec<Item>, limit: Option<usize>, page_token: Option<&str>) -> StoreResult<Page> {
    let offset = match page_token {
        Some(token) => token.parse::<usize>().map_err(|_| StoreError::InvalidPageToken)?,
        None => 0,
    };
    let total = items.len();
    let take = limit.unwrap_or(usize::MAX);
    let page: Vec<Item> = items.into_iter().skip(offset).take(take).collect();
    let consumed = offset + page.len();
    let next_token = (consumed < total && limit.is_some()).then(|| consumed.to_string());

    Ok(Page {
        items: page,
        next_token,
    })
}
