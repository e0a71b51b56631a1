use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

/// A row as returned by the store: column name -> JSON value.
pub type Row = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub direction: Direction,
}

/// Select against one table: equality filters, one ordering column, a limit.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: String,
    pub filter: Vec<(String, Value)>,
    pub order: Option<Order>,
    pub limit: Option<u32>,
}

impl Query {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filter: Vec::new(),
            order: None,
            limit: None,
        }
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter.push((column.into(), value.into()));
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, direction: Direction) -> Self {
        self.order = Some(Order {
            column: column.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("unknown table '{0}'")]
    UnknownTable(String),

    #[error("unknown column '{column}' on table '{table}'")]
    UnknownColumn { table: String, column: String },

    #[error("record rejected: {0}")]
    Rejected(String),
}

/// Ordered query and insert over named tables.
pub trait RelationalStore: Send + Sync + 'static {
    fn query(&self, query: Query) -> impl Future<Output = Result<Vec<Row>, StoreError>> + Send;

    /// Insert a record and return it as stored, including store-assigned columns.
    fn insert(
        &self,
        table: &str,
        record: Row,
    ) -> impl Future<Output = Result<Row, StoreError>> + Send;
}

impl<S: RelationalStore> RelationalStore for Arc<S> {
    fn query(&self, query: Query) -> impl Future<Output = Result<Vec<Row>, StoreError>> + Send {
        (**self).query(query)
    }

    fn insert(
        &self,
        table: &str,
        record: Row,
    ) -> impl Future<Output = Result<Row, StoreError>> + Send {
        (**self).insert(table, record)
    }
}
