use std::sync::Arc;

use tracing::{info, warn};

use lobby_types::models::Entry;
use lobby_types::store::{Direction, Query, RelationalStore};

use crate::error::TransientFetchError;
use crate::wire::{self, CREATED_AT};

/// One-shot read of the first entries of the feed.
pub struct SnapshotLoader<S> {
    store: Arc<S>,
    table: String,
}

impl<S> Clone for SnapshotLoader<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            table: self.table.clone(),
        }
    }
}

impl<S: RelationalStore> SnapshotLoader<S> {
    pub fn new(store: Arc<S>, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Load the oldest `limit` entries in ascending order. Anything newer
    /// arrives through live updates only.
    ///
    /// Store failures come back as [`TransientFetchError`] and are not
    /// retried here. Rows that do not decode are skipped.
    pub async fn load(&self, limit: u32) -> Result<Vec<Entry>, TransientFetchError> {
        let query = Query::table(&self.table)
            .order_by(CREATED_AT, Direction::Ascending)
            .limit(limit);

        let rows = self
            .store
            .query(query)
            .await
            .map_err(|e| TransientFetchError::new(&self.table, e))?;

        let mut entries: Vec<Entry> = rows
            .iter()
            .filter_map(|row| match wire::decode_row(row) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping undecodable row in '{}': {}", self.table, e);
                    None
                }
            })
            .collect();
        // Stores that ignore the limit still yield the same window
        entries.sort_by_key(Entry::sort_key);
        entries.truncate(limit as usize);

        info!("Snapshot loaded {} entries from '{}'", entries.len(), self.table);
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lobby_types::store::{Row, StoreError};
    use serde_json::json;
    use std::future::Future;
    use std::sync::Mutex;

    const AUTHOR: &str = "0d6b1a5e-54c4-4b8e-a3f1-0b0f2b1e5c77";

    /// Returns canned rows and remembers the last query.
    struct CannedStore {
        rows: Result<Vec<Row>, String>,
        last_query: Mutex<Option<Query>>,
    }

    impl RelationalStore for CannedStore {
        fn query(&self, query: Query) -> impl Future<Output = Result<Vec<Row>, StoreError>> + Send {
            *self.last_query.lock().unwrap() = Some(query);
            let result = self.rows.clone().map_err(StoreError::Unavailable);
            async move { result }
        }

        fn insert(
            &self,
            _table: &str,
            _record: Row,
        ) -> impl Future<Output = Result<Row, StoreError>> + Send {
            async { Err(StoreError::Rejected("read only".into())) }
        }
    }

    fn row(id: i64, created_at: &str) -> Row {
        let value = json!({ "id": id, "user_id": AUTHOR, "content": "x", "created_at": created_at });
        value.as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn returns_oldest_window_ascending() {
        let store = Arc::new(CannedStore {
            rows: Ok(vec![
                row(1, "2024-01-01T00:00:10Z"),
                row(2, "2024-01-01T00:00:20Z"),
                row(3, "2024-01-01T00:00:30Z"),
            ]),
            last_query: Mutex::new(None),
        });
        let loader = SnapshotLoader::new(store.clone(), "messages");

        let entries = loader.load(3).await.unwrap();
        let ids: Vec<i64> = entries.iter().map(|e| e.id.0).collect();
        assert_eq!(ids, vec![1, 2, 3]);

        let query = store.last_query.lock().unwrap().clone().unwrap();
        assert_eq!(query.limit, Some(3));
        let order = query.order.unwrap();
        assert_eq!(order.column, CREATED_AT);
        assert_eq!(order.direction, Direction::Ascending);
    }

    #[tokio::test]
    async fn overlong_result_is_cut_to_the_oldest_entries() {
        let store = Arc::new(CannedStore {
            rows: Ok(vec![
                row(3, "2024-01-01T00:00:30Z"),
                row(1, "2024-01-01T00:00:10Z"),
                row(4, "2024-01-01T00:00:40Z"),
                row(2, "2024-01-01T00:00:20Z"),
            ]),
            last_query: Mutex::new(None),
        });

        let entries = SnapshotLoader::new(store, "messages").load(2).await.unwrap();
        let ids: Vec<i64> = entries.iter().map(|e| e.id.0).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn skips_malformed_rows() {
        let mut broken = row(2, "2024-01-01T00:00:20Z");
        broken.remove("id");
        let store = Arc::new(CannedStore {
            rows: Ok(vec![broken, row(1, "2024-01-01T00:00:10Z")]),
            last_query: Mutex::new(None),
        });

        let entries = SnapshotLoader::new(store, "messages").load(10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id.0, 1);
    }

    #[tokio::test]
    async fn store_failure_is_transient_error() {
        let store = Arc::new(CannedStore {
            rows: Err("connection refused".into()),
            last_query: Mutex::new(None),
        });

        let err = SnapshotLoader::new(store, "messages").load(10).await.unwrap_err();
        assert_eq!(err.table, "messages");
        assert!(err.reason.contains("connection refused"));
    }
}
