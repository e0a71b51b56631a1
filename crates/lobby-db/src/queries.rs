use crate::Database;
use crate::models::TableSchema;
use anyhow::Result;
use lobby_types::store::{Direction, Query, Row};
use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::Value;

impl Database {
    /// Run a validated select. Column names in `query` must already be known
    /// to `schema`; values are always bound as parameters.
    pub fn select_rows(&self, schema: &TableSchema, query: &Query) -> Result<Vec<Row>> {
        let mut sql = format!("SELECT {} FROM {}", schema.columns.join(", "), schema.name);
        let mut params: Vec<SqlValue> = Vec::with_capacity(query.filter.len() + 1);

        if !query.filter.is_empty() {
            let clauses: Vec<String> = query
                .filter
                .iter()
                .enumerate()
                .map(|(i, (column, _))| format!("{} = ?{}", column, i + 1))
                .collect();
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
            params.extend(query.filter.iter().map(|(_, value)| to_sql_value(value)));
        }

        if let Some(order) = &query.order {
            let dir = match order.direction {
                Direction::Ascending => "ASC",
                Direction::Descending => "DESC",
            };
            sql.push_str(&format!(" ORDER BY {} {}", order.column, dir));
            // Identical timestamps still come back in a stable order
            if order.column != schema.key {
                sql.push_str(&format!(", {} {}", schema.key, dir));
            }
        }

        if let Some(limit) = query.limit {
            params.push(SqlValue::Integer(i64::from(limit)));
            sql.push_str(&format!(" LIMIT ?{}", params.len()));
        }

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(params.iter()), |row| {
                    read_row(schema, row)
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Insert a record and return the stored row, store-assigned columns included.
    pub fn insert_row(&self, schema: &TableSchema, record: &Row) -> Result<Row> {
        let returning = schema.columns.join(", ");
        let sql = if record.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES RETURNING {}", schema.name, returning)
        } else {
            let columns: Vec<&str> = record.keys().map(String::as_str).collect();
            let placeholders: Vec<String> =
                (1..=columns.len()).map(|i| format!("?{}", i)).collect();
            format!(
                "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
                schema.name,
                columns.join(", "),
                placeholders.join(", "),
                returning
            )
        };
        let params: Vec<SqlValue> = record.values().map(to_sql_value).collect();

        self.with_conn_mut(|conn| {
            let row = conn.query_row(&sql, rusqlite::params_from_iter(params.iter()), |row| {
                read_row(schema, row)
            })?;
            Ok(row)
        })
    }

    // -- Profiles --

    /// Create or refresh the profile row for a user.
    pub fn upsert_profile(&self, user_id: &str, username: &str, email: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO profiles (user_id, username, email) VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET username = excluded.username, email = excluded.email",
                (user_id, username, email),
            )?;
            Ok(())
        })
    }

    // -- Messages --

    pub fn count_messages(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
            Ok(count as u64)
        })
    }
}

fn read_row(schema: &TableSchema, row: &rusqlite::Row<'_>) -> rusqlite::Result<Row> {
    let mut out = Row::new();
    for (i, column) in schema.columns.iter().enumerate() {
        out.insert((*column).to_string(), from_sql_ref(row.get_ref(i)?));
    }
    Ok(out)
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => n.as_f64().map(SqlValue::Real).unwrap_or(SqlValue::Null),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn from_sql_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) | ValueRef::Blob(t) => {
            Value::String(String::from_utf8_lossy(t).into_owned())
        }
    }
}
