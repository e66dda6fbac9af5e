use super::{
    apply_patch, item_version, paginate, prepare_item, select_partition, Collection, Item, Key,
    KeyValueStore, Page, PutCondition, QueryRequest, ScanFilter, StoreError, StoreResult,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

type Table = BTreeMap<(String, String), Item>;

/// メモリ上のストア（テスト・単体実行用）
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<HashMap<Collection, Table>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, collection: Collection, key: &Key) -> StoreResult<Option<Item>> {
        let tables = self.tables.read().await;
        Ok(tables
            .get(&collection)
            .and_then(|table| table.get(&key.storage_parts()))
            .cloned())
    }

    async fn put(&self, collection: Collection, item: Item, condition: PutCondition) -> StoreResult<Item> {
        let item = prepare_item(collection, item, Utc::now())?;
        let key = Key::from_item(collection, &item)?;
        let parts = key.storage_parts();

        let mut tables = self.tables.write().await;
        let table = tables.entry(collection).or_default();
        match condition {
            PutCondition::None => {}
            PutCondition::NotExists => {
                if table.contains_key(&parts) {
                    return Err(StoreError::ConditionFailed(key.partition));
                }
            }
            PutCondition::VersionEquals(expected) => {
                let current = table.get(&parts).map(item_version).unwrap_or(0);
                if current != expected {
                    return Err(StoreError::ConditionFailed(key.partition));
                }
            }
        }
        table.insert(parts, item.clone());
        Ok(item)
    }

    async fn update(&self, collection: Collection, key: &Key, patch: Item) -> StoreResult<Option<Item>> {
        let mut tables = self.tables.write().await;
        let Some(existing) = tables
            .get_mut(&collection)
            .and_then(|table| table.get_mut(&key.storage_parts()))
        else {
            return Ok(None);
        };
        apply_patch(collection, existing, patch)?;
        Ok(Some(existing.clone()))
    }

    async fn query(&self, collection: Collection, request: &QueryRequest) -> StoreResult<Page> {
        let schema = request.schema(collection)?;
        let tables = self.tables.read().await;
        let items: Vec<Item> = tables
            .get(&collection)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default();
        select_partition(items, schema, request)
    }

    async fn scan(
        &self,
        collection: Collection,
        filter: &ScanFilter,
        limit: Option<usize>,
        page_token: Option<&str>,
    ) -> StoreResult<Page> {
        let tables = self.tables.read().await;
        let items: Vec<Item> = tables
            .get(&collection)
            .map(|table| table.values().filter(|item| filter.matches(item)).cloned().collect())
            .unwrap_or_default();
        paginate(items, limit, page_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::USER_ARN_INDEX;
    use serde_json::json;

    fn item(value: serde_json::Value) -> Item {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_get_miss_is_none() {
        let store = MemoryStore::new();
        let found = store
            .get(Collection::Profiles, &Key::partition("nobody"))
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_version_condition() {
        let store = MemoryStore::new();
        store
            .put(
                Collection::Profiles,
                item(json!({"user_arn": "alice", "version": 1})),
                PutCondition::VersionEquals(0),
            )
            .await
            .unwrap();

        let stale = store
            .put(
                Collection::Profiles,
                item(json!({"user_arn": "alice", "version": 1})),
                PutCondition::VersionEquals(0),
            )
            .await;
        assert!(matches!(stale, Err(StoreError::ConditionFailed(_))));
    }

    #[tokio::test]
    async fn test_index_query_newest_first() {
        let store = MemoryStore::new();
        for (i, ts) in ["2024-05-01T00:00:00Z", "2024-05-03T00:00:00Z", "2024-05-02T00:00:00Z"]
            .iter()
            .enumerate()
        {
            store
                .put(
                    Collection::AnalysisResults,
                    item(json!({"id": i.to_string(), "user_arn": "alice", "timestamp": ts})),
                    PutCondition::None,
                )
                .await
                .unwrap();
        }
        store
            .put(
                Collection::AnalysisResults,
                item(json!({"user_arn": "bob"})),
                PutCondition::None,
            )
            .await
            .unwrap();

        let page = store
            .query(
                Collection::AnalysisResults,
                &QueryRequest::partition("alice").on_index(USER_ARN_INDEX).limit(2),
            )
            .await
            .unwrap();

        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0]["id"], "1");
        assert_eq!(page.items[1]["id"], "2");
        assert!(page.next_token.is_some());
    }

    #[tokio::test]
    async fn test_update_missing_returns_none() {
        let store = MemoryStore::new();
        let updated = store
            .update(
                Collection::Profiles,
                &Key::partition("ghost"),
                item(json!({"risk_score": 5})),
            )
            .await
            .unwrap();
        assert!(updated.is_none());
    }

    #[tokio::test]
    async fn test_empty_scan() {
        let store = MemoryStore::new();
        let page = store
            .scan(Collection::Anomalies, &ScanFilter::default(), None, None)
            .await
            .unwrap();
        assert!(page.items.is_empty());
    }
}
