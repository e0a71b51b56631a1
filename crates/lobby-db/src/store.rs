use std::future::Future;
use std::sync::Arc;

use lobby_types::store::{Query, RelationalStore, Row, StoreError};
use rusqlite::ErrorCode;
use tracing::{debug, error};

use crate::Database;
use crate::models::{TableSchema, schema_for};

/// `RelationalStore` over the SQLite database. Blocking calls run on the
/// blocking pool so callers can stay on the async runtime.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Database>,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db: Arc::new(db) }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }
}

impl RelationalStore for SqliteStore {
    fn query(&self, query: Query) -> impl Future<Output = Result<Vec<Row>, StoreError>> + Send {
        let db = self.db.clone();
        async move {
            let schema = lookup(&query.table)?;
            for (column, _) in &query.filter {
                check_column(schema, column)?;
            }
            if let Some(order) = &query.order {
                check_column(schema, &order.column)?;
            }

            let rows = tokio::task::spawn_blocking(move || db.select_rows(schema, &query))
                .await
                .map_err(|e| {
                    error!("spawn_blocking join error: {}", e);
                    StoreError::Unavailable(e.to_string())
                })?
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;

            debug!(table = schema.name, rows = rows.len(), "query");
            Ok(rows)
        }
    }

    fn insert(
        &self,
        table: &str,
        record: Row,
    ) -> impl Future<Output = Result<Row, StoreError>> + Send {
        let db = self.db.clone();
        let table = table.to_string();
        async move {
            let schema = lookup(&table)?;
            for column in record.keys() {
                check_column(schema, column)?;
            }

            tokio::task::spawn_blocking(move || db.insert_row(schema, &record))
                .await
                .map_err(|e| {
                    error!("spawn_blocking join error: {}", e);
                    StoreError::Unavailable(e.to_string())
                })?
                .map_err(classify)
        }
    }
}

fn lookup(table: &str) -> Result<&'static TableSchema, StoreError> {
    schema_for(table).ok_or_else(|| StoreError::UnknownTable(table.to_string()))
}

fn check_column(schema: &TableSchema, column: &str) -> Result<(), StoreError> {
    schema
        .column(column)
        .map(|_| ())
        .ok_or_else(|| StoreError::UnknownColumn {
            table: schema.name.to_string(),
            column: column.to_string(),
        })
}

/// Constraint failures are the caller's fault; anything else means the store is unwell.
fn classify(err: anyhow::Error) -> StoreError {
    let constraint = err
        .downcast_ref::<rusqlite::Error>()
        .and_then(|e| e.sqlite_error_code())
        == Some(ErrorCode::ConstraintViolation);
    if constraint {
        StoreError::Rejected(err.to_string())
    } else {
        StoreError::Unavailable(err.to_string())
    }
}
