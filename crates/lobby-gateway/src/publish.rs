use std::future::Future;

use tracing::warn;

use lobby_types::events::{ChangeKind, RawChange};
use lobby_types::store::{Query, RelationalStore, Row, StoreError};

use crate::dispatcher::Dispatcher;

/// Wraps a store so that every successful insert is announced on the
/// dispatcher, with the table name as topic and the stored row as payload.
#[derive(Clone)]
pub struct PublishingStore<S> {
    inner: S,
    dispatcher: Dispatcher,
}

impl<S: RelationalStore> PublishingStore<S> {
    pub fn new(inner: S, dispatcher: Dispatcher) -> Self {
        Self { inner, dispatcher }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}

impl<S: RelationalStore> RelationalStore for PublishingStore<S> {
    fn query(&self, query: Query) -> impl Future<Output = Result<Vec<Row>, StoreError>> + Send {
        self.inner.query(query)
    }

    fn insert(
        &self,
        table: &str,
        record: Row,
    ) -> impl Future<Output = Result<Row, StoreError>> + Send {
        let dispatcher = self.dispatcher.clone();
        let topic = table.to_string();
        let insert = self.inner.insert(table, record);
        async move {
            let stored = insert.await?;
            match serde_json::to_string(&stored) {
                Ok(payload) => dispatcher.publish(RawChange {
                    topic,
                    kind: ChangeKind::Insert,
                    payload,
                }),
                Err(e) => warn!("Stored row on '{}' not published: {}", topic, e),
            }
            Ok(stored)
        }
    }
}
