//! Storage Executor: the single embedded SQL engine instance.
//!
//! Owns one `sqlx::SqlitePool` and exposes exactly the three
//! operations spec §4.1 names: `exec_shaped`, `exec_raw`, and
//! `transaction_sync`. On construction it ensures the three bootstrap
//! tables described in spec §6 exist.

use gateway_error::{GatewayError, Result};
use serde_json::Value as JsonValue;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::{Column, Row, TypeInfo};

use crate::RawRowSet;

/// Owns the embedded SQLite pool. Single-writer by construction: callers
/// must only reach this through the [`crate::queue::OperationQueue`] so
/// at most one operation is ever in flight (spec I4).
#[derive(Clone)]
pub struct StorageExecutor {
    pool: SqlitePool,
}

impl StorageExecutor {
    /// Connect to `connection_string` (e.g. `sqlite:./gateway.db` or
    /// `sqlite::memory:`) and ensure the bootstrap tables exist.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::StorageFailure` if the pool cannot be
    /// created or the connectivity probe / bootstrap DDL fails.
    pub async fn new(connection_string: &str) -> Result<Self> {
        Self::with_pool_size(connection_string, 5).await
    }

    /// Connect with a custom maximum pool size.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::StorageFailure` if the pool cannot be created.
    pub async fn with_pool_size(connection_string: &str, max_size: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_size)
            .connect(connection_string)
            .await
            .map_err(|e| GatewayError::storage(format!("failed to create SQLite pool: {e}")))?;

        sqlx::query("SELECT 1")
            .fetch_one(&pool)
            .await
            .map_err(|e| GatewayError::storage(format!("failed to connect to SQLite: {e}")))?;

        let executor = Self { pool };
        executor.ensure_bootstrap_tables().await?;
        Ok(executor)
    }

    /// Open an in-memory database, for tests and ephemeral gateways.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::StorageFailure` if the pool cannot be created.
    pub async fn in_memory() -> Result<Self> {
        Self::new("sqlite::memory:").await
    }

    async fn ensure_bootstrap_tables(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS tmp_cache(
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp REAL NOT NULL,
                ttl INTEGER NOT NULL,
                query TEXT UNIQUE NOT NULL,
                results TEXT
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS tmp_allowlist_queries(
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sql_statement TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS tmp_rls_policies(
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                actions TEXT NOT NULL CHECK(actions IN ('SELECT','UPDATE','INSERT','DELETE')),
                schema TEXT, \"table\" TEXT NOT NULL, column TEXT NOT NULL,
                value TEXT NOT NULL, value_type TEXT NOT NULL DEFAULT 'string',
                operator TEXT DEFAULT '='
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// A reference to the underlying pool, for callers (e.g. the REST
    /// facade's primary-key discovery) that need dialect-specific schema
    /// introspection the shaped/raw contract does not cover.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// `exec_shaped(sql, params) → seq of row-mapping`.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::StorageFailure` on query execution failure.
    pub async fn exec_shaped(&self, sql: &str, params: &[JsonValue]) -> Result<Vec<JsonValue>> {
        let rows = self.exec_raw(sql, params).await?;
        Ok(rows.into_shaped())
    }

    /// `exec_raw(sql, params) → {columns, rows, meta}`.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::StorageFailure` on query execution failure.
    pub async fn exec_raw(&self, sql: &str, params: &[JsonValue]) -> Result<RawRowSet> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_json_value(query, param);
        }

        let result = query.fetch_all(&self.pool).await;
        match result {
            Ok(rows) => Ok(sqlite_rows_to_raw(&rows)),
            Err(sqlx::Error::RowNotFound) => Ok(RawRowSet::empty()),
            Err(e) => {
                // Non-SELECT statements (INSERT/UPDATE/DELETE) go through `execute`,
                // not `fetch_all`; sqlx surfaces a decode error for those here, so
                // fall back to `execute` to get the affected row count.
                if is_non_query_statement(sql) {
                    let mut exec_query = sqlx::query(sql);
                    for param in params {
                        exec_query = bind_json_value(exec_query, param);
                    }
                    let outcome = exec_query.execute(&self.pool).await?;
                    return Ok(RawRowSet::written(outcome.rows_affected()));
                }
                let _ = e;
                Err(GatewayError::storage(format!("SQLite query execution failed: {e}")))
            }
        }
    }

    /// `transaction_sync(queries) → ordered seq of result`, committing
    /// atomically or rolling back entirely (spec I5).
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::StorageFailure` if any statement fails;
    /// no rows from the batch are visible after a failed transaction.
    pub async fn transaction_sync(&self, statements: &[(String, Vec<JsonValue>)]) -> Result<Vec<RawRowSet>> {
        let mut tx = self.pool.begin().await.map_err(GatewayError::from)?;
        let mut results = Vec::with_capacity(statements.len());

        for (sql, params) in statements {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_json_value(query, param);
            }
            match query.fetch_all(&mut *tx).await {
                Ok(rows) => results.push(sqlite_rows_to_raw(&rows)),
                Err(_) if is_non_query_statement(sql) => {
                    let mut exec_query = sqlx::query(sql);
                    for param in params {
                        exec_query = bind_json_value(exec_query, param);
                    }
                    let outcome = exec_query.execute(&mut *tx).await.map_err(|e| {
                        GatewayError::storage(format!("transaction statement failed: {e}"))
                    })?;
                    results.push(RawRowSet::written(outcome.rows_affected()));
                }
                Err(e) => return Err(GatewayError::storage(format!("transaction statement failed: {e}"))),
            }
        }

        tx.commit().await.map_err(GatewayError::from)?;
        Ok(results)
    }
}

fn is_non_query_statement(sql: &str) -> bool {
    let upper = sql.trim_start().to_ascii_uppercase();
    upper.starts_with("INSERT") || upper.starts_with("UPDATE") || upper.starts_with("DELETE") || upper.starts_with("CREATE")
}

fn bind_json_value<'a>(
    query: sqlx::query::Query<'a, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'a>>,
    value: &'a JsonValue,
) -> sqlx::query::Query<'a, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'a>> {
    match value {
        JsonValue::String(s) => query.bind(s.clone()),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                query.bind(i)
            } else if let Some(f) = n.as_f64() {
                query.bind(f)
            } else {
                query.bind(n.to_string())
            }
        }
        JsonValue::Bool(b) => query.bind(*b),
        JsonValue::Null => query.bind(Option::<String>::None),
        JsonValue::Array(_) | JsonValue::Object(_) => query.bind(value.to_string()),
    }
}

fn sqlite_rows_to_raw(rows: &[sqlx::sqlite::SqliteRow]) -> RawRowSet {
    let Some(first) = rows.first() else {
        return RawRowSet::empty();
    };
    let columns: Vec<String> = first.columns().iter().map(|c| c.name().to_string()).collect();
    let values = rows
        .iter()
        .map(|row| {
            columns
                .iter()
                .enumerate()
                .map(|(i, _)| sqlite_value_to_json(row, i))
                .collect::<Vec<_>>()
        })
        .collect();

    RawRowSet { columns, rows: values, rows_read: rows.len() as u64, rows_written: 0 }
}

fn sqlite_value_to_json(row: &sqlx::sqlite::SqliteRow, idx: usize) -> JsonValue {
    let type_name = row.column(idx).type_info().name().to_ascii_uppercase();
    match type_name.as_str() {
        "INTEGER" | "BOOLEAN" => row.try_get::<i64, _>(idx).map(JsonValue::from).unwrap_or(JsonValue::Null),
        "REAL" | "FLOAT" | "DOUBLE" => row.try_get::<f64, _>(idx).map(JsonValue::from).unwrap_or(JsonValue::Null),
        _ => row.try_get::<String, _>(idx).map(JsonValue::from).unwrap_or(JsonValue::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bootstrap_tables_are_created() {
        let executor = StorageExecutor::in_memory().await.unwrap();
        let rows = executor
            .exec_shaped("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name", &[])
            .await
            .unwrap();
        let names: Vec<String> =
            rows.iter().map(|r| r["name"].as_str().unwrap_or_default().to_string()).collect();
        assert!(names.contains(&"tmp_cache".to_string()));
        assert!(names.contains(&"tmp_allowlist_queries".to_string()));
        assert!(names.contains(&"tmp_rls_policies".to_string()));
    }

    #[tokio::test]
    async fn transaction_rolls_back_entirely_on_failure() {
        let executor = StorageExecutor::in_memory().await.unwrap();
        executor.exec_raw("CREATE TABLE todos(id INTEGER PRIMARY KEY, text TEXT)", &[]).await.unwrap();

        let statements = vec![
            ("INSERT INTO todos(id, text) VALUES (1, 'ok')".to_string(), vec![]),
            ("INSERT INTO nonexistent_table(x) VALUES (1)".to_string(), vec![]),
        ];
        let result = executor.transaction_sync(&statements).await;
        assert!(result.is_err());

        let rows = executor.exec_shaped("SELECT * FROM todos", &[]).await.unwrap();
        assert!(rows.is_empty(), "no rows from the failed batch should be visible");
    }

    #[tokio::test]
    async fn insert_reports_rows_written() {
        let executor = StorageExecutor::in_memory().await.unwrap();
        executor.exec_raw("CREATE TABLE todos(id INTEGER PRIMARY KEY, text TEXT)", &[]).await.unwrap();
        let raw = executor
            .exec_raw("INSERT INTO todos(id, text) VALUES (1, 'x')", &[])
            .await
            .unwrap();
        assert_eq!(raw.rows_written, 1);
    }

    #[tokio::test]
    async fn duplicate_primary_key_is_a_conflict() {
        let executor = StorageExecutor::in_memory().await.unwrap();
        executor.exec_raw("CREATE TABLE todos(id INTEGER PRIMARY KEY, text TEXT)", &[]).await.unwrap();
        executor.exec_raw("INSERT INTO todos(id, text) VALUES (1, 'a')", &[]).await.unwrap();

        let err = executor.exec_raw("INSERT INTO todos(id, text) VALUES (1, 'b')", &[]).await.unwrap_err();
        assert!(matches!(err, GatewayError::Conflict { .. }));
    }
}
