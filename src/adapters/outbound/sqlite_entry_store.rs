//! SQLite Entry Store
//!
//! Implements EntryStore on a single SQLite table. Uniqueness of
//! `entryId` per collection address is a table constraint, so racing
//! inserts are settled by SQLite itself.

use crate::domain::errors::StoreError;
use crate::domain::filter::Filter;
use crate::domain::ports::EntryStore;
use crate::domain::value_objects::{CollectionAddress, InsertOutcome};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// SQLite-backed entry store.
///
/// All statements run on the blocking thread pool. The connection is
/// dropped by `close()`, after which every call fails with `NotConnected`.
pub struct SqliteEntryStore {
    conn: Arc<Mutex<Option<Connection>>>,
    path: String,
}

impl SqliteEntryStore {
    /// Open (or create) the database file and its schema.
    pub fn open(path: impl Into<String>) -> Result<Self, StoreError> {
        let path = path.into();
        let conn = Connection::open(&path).map_err(backend)?;
        Self::init_schema(&conn)?;

        tracing::info!("entry store opened, db_path={}", path);
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            path,
        })
    }

    /// Open a private in-memory database.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(backend)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            path: ":memory:".to_string(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Release the connection.
    pub fn close(&self) {
        if self.conn.lock().take().is_some() {
            tracing::info!("entry store closed, db_path={}", self.path);
        }
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.busy_timeout(Duration::from_secs(5)).map_err(backend)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS entries (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                collection TEXT NOT NULL,
                entry_id TEXT NOT NULL,
                document TEXT NOT NULL,
                inserted_at INTEGER NOT NULL,
                UNIQUE (collection, entry_id)
            )",
            [],
        )
        .map_err(backend)?;
        Ok(())
    }

    fn insert_row(
        conn: &Connection,
        collection: &str,
        entry_id: &str,
        document: &str,
    ) -> Result<InsertOutcome, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();

        let result = conn.execute(
            "INSERT INTO entries (id, collection, entry_id, document, inserted_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, collection, entry_id, document, now],
        );

        match result {
            Ok(_) => Ok(InsertOutcome::Inserted { inserted_id: id }),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                Ok(InsertOutcome::AlreadyExists)
            }
            Err(e) => Err(backend(e)),
        }
    }

    fn select_rows(
        conn: &Connection,
        collection: &str,
        filter: &Filter,
    ) -> Result<Vec<Value>, StoreError> {
        let mut stmt = conn
            .prepare("SELECT id, document FROM entries WHERE collection = ?1 ORDER BY seq")
            .map_err(backend)?;

        let rows = stmt
            .query_map(params![collection], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(backend)?;

        let mut documents = Vec::new();
        for row in rows {
            let (id, body) = row.map_err(backend)?;
            let mut document: Value = serde_json::from_str(&body)?;
            if let Value::Object(map) = &mut document {
                map.insert("_id".to_string(), Value::String(id));
            }
            if filter.matches(&document) {
                documents.push(document);
            }
        }
        Ok(documents)
    }
}

#[async_trait]
impl EntryStore for SqliteEntryStore {
    fn is_connected(&self) -> bool {
        self.conn.lock().is_some()
    }

    async fn insert_unique(
        &self,
        collection: &CollectionAddress,
        entry_id: &str,
        document: &Value,
    ) -> Result<InsertOutcome, StoreError> {
        let conn = self.conn.clone();
        let collection = collection.as_str().to_string();
        let entry_id = entry_id.to_string();
        let body = serde_json::to_string(document)?;

        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            let conn = guard.as_ref().ok_or(StoreError::NotConnected)?;
            Self::insert_row(conn, &collection, &entry_id, &body)
        })
        .await
        .map_err(|e| StoreError::Backend(Box::new(e)))?
    }

    async fn find(
        &self,
        collection: &CollectionAddress,
        filter: &Filter,
    ) -> Result<Vec<Value>, StoreError> {
        filter.validate()?;

        let conn = self.conn.clone();
        let collection = collection.as_str().to_string();
        let filter = filter.clone();

        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            let conn = guard.as_ref().ok_or(StoreError::NotConnected)?;
            Self::select_rows(conn, &collection, &filter)
        })
        .await
        .map_err(|e| StoreError::Backend(Box::new(e)))?
    }
}

fn backend(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(Box::new(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::NamedTempFile;

    fn songs() -> CollectionAddress {
        CollectionAddress::resolve("songs", None)
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let store = SqliteEntryStore::in_memory().unwrap();
        assert!(store.is_connected());

        let outcome = store
            .insert_unique(&songs(), "s1", &json!({ "entryId": "s1", "year": 1971 }))
            .await
            .unwrap();
        assert!(outcome.is_inserted());

        let docs = store.find(&songs(), &Filter::all()).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["entryId"], "s1");
        assert_eq!(docs[0]["_id"], outcome.inserted_id().unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_is_already_exists() {
        let store = SqliteEntryStore::in_memory().unwrap();
        let doc = json!({ "entryId": "s1" });

        let first = store.insert_unique(&songs(), "s1", &doc).await.unwrap();
        let second = store.insert_unique(&songs(), "s1", &doc).await.unwrap();

        assert!(first.is_inserted());
        assert_eq!(second, InsertOutcome::AlreadyExists);
        assert_eq!(store.find(&songs(), &Filter::all()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_uniqueness_is_per_collection() {
        let store = SqliteEntryStore::in_memory().unwrap();
        let doc = json!({ "entryId": "s1" });
        let owned = CollectionAddress::resolve("songs", Some("ab"));

        assert!(store.insert_unique(&songs(), "s1", &doc).await.unwrap().is_inserted());
        assert!(store.insert_unique(&owned, "s1", &doc).await.unwrap().is_inserted());
    }

    #[tokio::test]
    async fn test_find_applies_filter_in_order() {
        let store = SqliteEntryStore::in_memory().unwrap();
        for (id, year) in [("a", 1969), ("b", 1971), ("c", 1974)] {
            store
                .insert_unique(&songs(), id, &json!({ "entryId": id, "year": year }))
                .await
                .unwrap();
        }

        let filter = Filter::all().cmp("year", "$gt", 1970);
        let docs = store.find(&songs(), &filter).await.unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d["entryId"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_find_empty_collection() {
        let store = SqliteEntryStore::in_memory().unwrap();
        let docs = store.find(&songs(), &Filter::all()).await.unwrap();
        assert!(docs.is_empty());
    }

    #[tokio::test]
    async fn test_closed_store_is_not_connected() {
        let store = SqliteEntryStore::in_memory().unwrap();
        store.close();
        assert!(!store.is_connected());

        let result = store.insert_unique(&songs(), "s1", &json!({})).await;
        assert!(matches!(result, Err(StoreError::NotConnected)));

        let result = store.find(&songs(), &Filter::all()).await;
        assert!(matches!(result, Err(StoreError::NotConnected)));
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let temp = NamedTempFile::new().unwrap();
        let path = temp.path().to_str().unwrap().to_string();

        {
            let store = SqliteEntryStore::open(path.clone()).unwrap();
            store
                .insert_unique(&songs(), "s1", &json!({ "entryId": "s1" }))
                .await
                .unwrap();
            store.close();
        }

        let store = SqliteEntryStore::open(path).unwrap();
        let docs = store.find(&songs(), &Filter::all()).await.unwrap();
        assert_eq!(docs.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_inserts_store_one_document() {
        let store = Arc::new(SqliteEntryStore::in_memory().unwrap());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .insert_unique(&songs(), "race", &json!({ "entryId": "race" }))
                    .await
                    .unwrap()
            }));
        }

        let mut inserted = 0;
        for handle in handles {
            if handle.await.unwrap().is_inserted() {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 1);
        assert_eq!(store.find(&songs(), &Filter::all()).await.unwrap().len(), 1);
    }
}
