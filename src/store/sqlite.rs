use super::{
    apply_patch, item_version, paginate, prepare_item, select_partition, Collection, Item, Key,
    KeyValueStore, Page, PutCondition, QueryRequest, ScanFilter, StoreError, StoreResult,
};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::info;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS items (
    collection TEXT NOT NULL,
    pk TEXT NOT NULL,
    sk TEXT NOT NULL DEFAULT '',
    body TEXT NOT NULL,
    PRIMARY KEY (collection, pk, sk)
)
"#;

/// SQLiteストア（1テーブルにJSON本文を保存）
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// 接続してスキーマを作成
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;
        let store = Self::from_pool(pool).await?;
        info!(url, "sqlite store ready");
        Ok(store)
    }

    pub async fn from_pool(pool: SqlitePool) -> StoreResult<Self> {
        sqlx::query(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    async fn load_collection(&self, collection: Collection) -> StoreResult<Vec<Item>> {
        let rows = sqlx::query("SELECT body FROM items WHERE collection = ? ORDER BY pk, sk")
            .bind(collection.name())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|row| decode(row.try_get("body")?)).collect()
    }
}

fn decode(body: String) -> StoreResult<Item> {
    Ok(serde_json::from_str(&body)?)
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, collection: Collection, key: &Key) -> StoreResult<Option<Item>> {
        let (pk, sk) = key.storage_parts();
        let row = sqlx::query("SELECT body FROM items WHERE collection = ? AND pk = ? AND sk = ?")
            .bind(collection.name())
            .bind(pk)
            .bind(sk)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(decode(row.try_get("body")?)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, collection: Collection, item: Item, condition: PutCondition) -> StoreResult<Item> {
        let item = prepare_item(collection, item, Utc::now())?;
        let key = Key::from_item(collection, &item)?;
        let (pk, sk) = key.storage_parts();
        let body = serde_json::to_string(&item)?;

        let affected = match condition {
            PutCondition::None => sqlx::query(
                "INSERT INTO items (collection, pk, sk, body) VALUES (?, ?, ?, ?) \
                 ON CONFLICT (collection, pk, sk) DO UPDATE SET body = excluded.body",
            )
            .bind(collection.name())
            .bind(&pk)
            .bind(&sk)
            .bind(&body)
            .execute(&self.pool)
            .await?
            .rows_affected(),
            PutCondition::NotExists => insert_if_absent(&self.pool, collection, &pk, &sk, &body).await?,
            PutCondition::VersionEquals(expected) => {
                let updated = update_if_version(&self.pool, collection, &pk, &sk, &body, expected).await?;
                if updated == 0 && expected == 0 {
                    insert_if_absent(&self.pool, collection, &pk, &sk, &body).await?
                } else {
                    updated
                }
            }
        };

        if affected == 0 {
            return Err(StoreError::ConditionFailed(key.partition));
        }
        Ok(item)
    }

    async fn update(&self, collection: Collection, key: &Key, patch: Item) -> StoreResult<Option<Item>> {
        let Some(mut existing) = self.get(collection, key).await? else {
            return Ok(None);
        };
        let version = item_version(&existing);
        apply_patch(collection, &mut existing, patch)?;

        let (pk, sk) = key.storage_parts();
        let body = serde_json::to_string(&existing)?;
        // a concurrent writer moved the version after our read
        if update_if_version(&self.pool, collection, &pk, &sk, &body, version).await? == 0 {
            return Err(StoreError::ConditionFailed(key.partition.clone()));
        }
        Ok(Some(existing))
    }

    async fn query(&self, collection: Collection, request: &QueryRequest) -> StoreResult<Page> {
        let schema = request.schema(collection)?;
        let items = self.load_collection(collection).await?;
        select_partition(items, schema, request)
    }

    async fn scan(
        &self,
        collection: Collection,
        filter: &ScanFilter,
        limit: Option<usize>,
        page_token: Option<&str>,
    ) -> StoreResult<Page> {
        let items: Vec<Item> = self
            .load_collection(collection)
            .await?
            .into_iter()
            .filter(|item| filter.matches(item))
            .collect();
        paginate(items, limit, page_token)
    }
}

async fn update_if_version(
    pool: &SqlitePool,
    collection: Collection,
    pk: &str,
    sk: &str,
    body: &str,
    expected: u64,
) -> StoreResult<u64> {
    Ok(sqlx::query(
        "UPDATE items SET body = ? WHERE collection = ? AND pk = ? AND sk = ? \
         AND COALESCE(json_extract(body, '$.version'), 0) = ?",
    )
    .bind(body)
    .bind(collection.name())
    .bind(pk)
    .bind(sk)
    .bind(expected as i64)
    .execute(pool)
    .await?
    .rows_affected())
}

async fn insert_if_absent(
    pool: &SqlitePool,
    collection: Collection,
    pk: &str,
    sk: &str,
    body: &str,
) -> StoreResult<u64> {
    Ok(sqlx::query(
        "INSERT INTO items (collection, pk, sk, body) VALUES (?, ?, ?, ?) \
         ON CONFLICT (collection, pk, sk) DO NOTHING",
    )
    .bind(collection.name())
    .bind(pk)
    .bind(sk)
    .bind(body)
    .execute(pool)
    .await?
    .rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::USER_ARN_INDEX;
    use serde_json::json;

    fn item(value: serde_json::Value) -> Item {
        value.as_object().cloned().unwrap()
    }

    async fn file_store(dir: &tempfile::TempDir) -> SqliteStore {
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("store.db").display());
        SqliteStore::connect(&url).await.unwrap()
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = file_store(&dir).await;

        store
            .put(
                Collection::Profiles,
                item(json!({"user_arn": "alice", "risk_score": 42})),
                PutCondition::None,
            )
            .await
            .unwrap();

        let found = store
            .get(Collection::Profiles, &Key::partition("alice"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found["risk_score"], 42);
    }

    #[tokio::test]
    async fn test_version_condition() {
        let dir = tempfile::tempdir().unwrap();
        let store = file_store(&dir).await;

        store
            .put(
                Collection::Profiles,
                item(json!({"user_arn": "alice", "version": 1})),
                PutCondition::VersionEquals(0),
            )
            .await
            .unwrap();
        store
            .put(
                Collection::Profiles,
                item(json!({"user_arn": "alice", "version": 2})),
                PutCondition::VersionEquals(1),
            )
            .await
            .unwrap();

        let stale = store
            .put(
                Collection::Profiles,
                item(json!({"user_arn": "alice", "version": 2})),
                PutCondition::VersionEquals(1),
            )
            .await;
        assert!(matches!(stale, Err(StoreError::ConditionFailed(_))));
    }

    #[tokio::test]
    async fn test_update_detects_lost_race() {
        let dir = tempfile::tempdir().unwrap();
        let store = file_store(&dir).await;
        let key = Key::partition("alice");

        store
            .put(
                Collection::Profiles,
                item(json!({"user_arn": "alice", "version": 1})),
                PutCondition::None,
            )
            .await
            .unwrap();
        let read = store.get(Collection::Profiles, &key).await.unwrap().unwrap();

        // another writer lands between our read and our write
        store
            .put(
                Collection::Profiles,
                item(json!({"user_arn": "alice", "version": 2})),
                PutCondition::VersionEquals(1),
            )
            .await
            .unwrap();

        let body = serde_json::to_string(&read).unwrap();
        let written = update_if_version(&store.pool, Collection::Profiles, "alice", "", &body, item_version(&read))
            .await
            .unwrap();
        assert_eq!(written, 0);

        let patched = store
            .update(Collection::Profiles, &key, item(json!({"team": "platform"})))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(patched["version"], 2);
        assert_eq!(patched["team"], "platform");
    }

    #[tokio::test]
    async fn test_anomaly_index_query() {
        let dir = tempfile::tempdir().unwrap();
        let store = file_store(&dir).await;

        for ts in ["2024-05-01T00:00:00Z", "2024-05-02T00:00:00Z"] {
            store
                .put(
                    Collection::Anomalies,
                    item(json!({"user_arn": "alice", "timestamp": ts, "anomaly_type": "new_ip_address"})),
                    PutCondition::NotExists,
                )
                .await
                .unwrap();
        }

        let page = store
            .query(
                Collection::Anomalies,
                &QueryRequest::partition("alice").on_index(USER_ARN_INDEX),
            )
            .await
            .unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0]["timestamp"], "2024-05-02T00:00:00Z");
    }
}
