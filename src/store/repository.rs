//! Profile Repository
//!
//! 型付きのプロファイル・異常・分析結果アクセス。
//! 書き込み失敗はログに記録して `None` / `false` を返し、判断は呼び出し側に任せる。

use super::{
    Collection, Item, Key, KeyValueStore, PutCondition, QueryRequest, ScanFilter, StoreError,
    StoreResult, USER_ARN_INDEX,
};
use crate::analytics::{AnalysisResult, Anomaly, BehaviorProfile};
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// バージョン競合時の再試行回数
const MERGE_RETRIES: usize = 3;

/// 型付きストアアクセス
#[derive(Clone)]
pub struct ProfileRepository {
    store: Arc<dyn KeyValueStore>,
}

impl ProfileRepository {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// プロファイルを取得（無い・壊れている場合は `None`）
    pub async fn get_profile(&self, user_arn: &str) -> Option<BehaviorProfile> {
        match self.store.get(Collection::Profiles, &Key::partition(user_arn)).await {
            Ok(Some(item)) => from_item(item, "profile"),
            Ok(None) => None,
            Err(e) => {
                error!(user_arn, error = %e, "failed to read profile");
                None
            }
        }
    }

    /// 既存プロファイルへ新しいフィールドを上書きマージして保存
    ///
    /// 新プロファイルに無いキーは保持され、`updated_at` は必ず前回より進む。
    /// 同時更新でバージョンが変わっていれば読み直して再試行する。
    pub async fn save_profile(&self, profile: &BehaviorProfile) -> Option<BehaviorProfile> {
        let user_arn = profile.user_arn.as_str();
        let incoming = match to_item(profile) {
            Ok(item) => item,
            Err(e) => {
                error!(user_arn, error = %e, "failed to serialize profile");
                return None;
            }
        };

        for attempt in 1..=MERGE_RETRIES {
            match self.try_merge(user_arn, incoming.clone()).await {
                Ok(item) => return from_item(item, "profile"),
                Err(StoreError::ConditionFailed(_)) => {
                    warn!(user_arn, attempt, "profile changed concurrently, retrying merge");
                }
                Err(e) => {
                    error!(user_arn, error = %e, "failed to write profile");
                    return None;
                }
            }
        }

        error!(user_arn, retries = MERGE_RETRIES, "gave up merging profile");
        None
    }

    async fn try_merge(&self, user_arn: &str, incoming: Item) -> StoreResult<Item> {
        let existing = self
            .store
            .get(Collection::Profiles, &Key::partition(user_arn))
            .await?;

        let (mut merged, version, previous) = match existing {
            Some(item) => {
                let version = super::item_version(&item);
                let previous = item
                    .get("updated_at")
                    .and_then(Value::as_str)
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|t| t.with_timezone(&Utc));
                (item, version, previous)
            }
            None => (Item::new(), 0, None),
        };

        for (k, v) in incoming {
            merged.insert(k, v);
        }
        merged.insert("version".to_string(), Value::from(version + 1));
        merged.insert(
            "updated_at".to_string(),
            Value::String(next_updated_at(previous, Utc::now()).to_rfc3339()),
        );

        self.store
            .put(Collection::Profiles, merged, PutCondition::VersionEquals(version))
            .await
    }

    /// 異常を1件書き込む
    pub async fn put_anomaly(&self, anomaly: &Anomaly) -> bool {
        let item = match to_item(anomaly) {
            Ok(item) => item,
            Err(e) => {
                error!(error = %e, "failed to serialize anomaly");
                return false;
            }
        };
        match self
            .store
            .put(Collection::Anomalies, item, PutCondition::NotExists)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                error!(user_arn = %anomaly.user_arn, anomaly_id = %anomaly.id, error = %e, "failed to write anomaly");
                false
            }
        }
    }

    /// 新しい順に異常を取得
    pub async fn list_anomalies(&self, user_arn: &str, limit: Option<usize>) -> Vec<Anomaly> {
        let mut request = QueryRequest::partition(user_arn).on_index(USER_ARN_INDEX);
        request.limit = limit;
        match self.store.query(Collection::Anomalies, &request).await {
            Ok(page) => page
                .items
                .into_iter()
                .filter_map(|item| from_item(item, "anomaly"))
                .collect(),
            Err(e) => {
                error!(user_arn, error = %e, "failed to list anomalies");
                Vec::new()
            }
        }
    }

    /// `since` 以降に検知された異常
    pub async fn recent_anomalies(&self, user_arn: &str, since: DateTime<Utc>) -> Vec<Anomaly> {
        self.list_anomalies(user_arn, None)
            .await
            .into_iter()
            .take_while(|a| a.timestamp >= since)
            .collect()
    }

    pub async fn put_analysis_result(&self, result: &AnalysisResult) -> bool {
        let item = match to_item(result) {
            Ok(item) => item,
            Err(e) => {
                error!(error = %e, "failed to serialize analysis result");
                return false;
            }
        };
        match self
            .store
            .put(Collection::AnalysisResults, item, PutCondition::None)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                error!(user_arn = %result.user_arn, error = %e, "failed to write analysis result");
                false
            }
        }
    }

    /// 1ユーザーの分析結果（新しい順）
    pub async fn results_for_user(&self, user_arn: &str, limit: usize) -> Vec<AnalysisResult> {
        let request = QueryRequest::partition(user_arn)
            .on_index(USER_ARN_INDEX)
            .limit(limit);
        match self.store.query(Collection::AnalysisResults, &request).await {
            Ok(page) => page
                .items
                .into_iter()
                .filter_map(|item| from_item(item, "analysis result"))
                .collect(),
            Err(e) => {
                error!(user_arn, error = %e, "failed to query analysis results");
                Vec::new()
            }
        }
    }

    /// 全ユーザー横断の最新 `limit` 件（全件走査して並べ替え）
    pub async fn latest_results(&self, limit: usize) -> Vec<AnalysisResult> {
        let mut results: Vec<AnalysisResult> = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = match self
                .store
                .scan(Collection::AnalysisResults, &ScanFilter::default(), Some(500), token.as_deref())
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    error!(error = %e, "failed to scan analysis results");
                    break;
                }
            };
            results.extend(
                page.items
                    .into_iter()
                    .filter_map(|item| from_item::<AnalysisResult>(item, "analysis result")),
            );
            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        results.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        results.truncate(limit);
        results
    }
}

/// 前回より必ず後の時刻
fn next_updated_at(previous: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    match previous {
        Some(prev) if now <= prev => prev + Duration::microseconds(1),
        _ => now,
    }
}

fn to_item<T: Serialize>(value: &T) -> StoreResult<Item> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        _ => Err(StoreError::MissingKey("object body".to_string())),
    }
}

fn from_item<T: DeserializeOwned>(item: Item, what: &str) -> Option<T> {
    match serde_json::from_value(Value::Object(item)) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!(error = %e, "skipping undecodable {}", what);
            None
        }
    }
}
