//! External MySQL adapter.
//!
//! Implements [`Backend`] over a `sqlx::MySqlPool`, mirroring the
//! SQLite storage executor's parameter binding and row-shaping but
//! against a remote MySQL server (spec §4.3).

use async_trait::async_trait;
use gateway_core::pipeline::{Backend, ExecResult, StatementRequest};
use gateway_error::{GatewayError, Result};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, Row, TypeInfo};

use crate::RawRowSet;

/// Pooled connection to an external MySQL database.
pub struct MySqlAdapter {
    pool: MySqlPool,
}

impl MySqlAdapter {
    /// Connect with the default pool size.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::ExternalFailure` if the pool cannot be created.
    pub async fn new(connection_string: &str) -> Result<Self> {
        Self::with_pool_size(connection_string, 10).await
    }

    /// Connect with a custom maximum pool size.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::ExternalFailure` if the pool cannot be created.
    pub async fn with_pool_size(connection_string: &str, max_size: u32) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(max_size)
            .connect(connection_string)
            .await
            .map_err(|e| GatewayError::external("mysql", format!("failed to create connection pool: {e}")))?;

        sqlx::query("SELECT 1")
            .fetch_one(&pool)
            .await
            .map_err(|e| GatewayError::external("mysql", format!("failed to connect: {e}")))?;

        Ok(Self { pool })
    }

    /// Run a read-only catalog query and return shaped rows, for schema
    /// introspection (spec §4.10). Not gated by the allowlist — callers
    /// never pass user-supplied SQL here.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::ExternalFailure` on connection or query failure.
    pub async fn schema_query(&self, sql: &str, params: &[JsonValue]) -> Result<Vec<JsonValue>> {
        Ok(self.run_one(sql, params).await?.into_shaped())
    }

    async fn run_one(&self, sql: &str, params: &[JsonValue]) -> Result<RawRowSet> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_json_value(query, param);
        }

        match query.fetch_all(&self.pool).await {
            Ok(rows) => Ok(mysql_rows_to_raw(&rows)),
            Err(_) if is_non_query_statement(sql) => {
                let mut exec_query = sqlx::query(sql);
                for param in params {
                    exec_query = bind_json_value(exec_query, param);
                }
                let outcome = exec_query
                    .execute(&self.pool)
                    .await
                    .map_err(|e| GatewayError::external("mysql", format!("statement failed: {e}")))?;
                Ok(RawRowSet::written(outcome.rows_affected()))
            }
            Err(e) => Err(GatewayError::external("mysql", format!("query failed: {e}"))),
        }
    }
}

#[async_trait]
impl Backend for MySqlAdapter {
    async fn execute(&self, statements: &[StatementRequest], raw: bool) -> Result<ExecResult> {
        let mut merged = RawRowSet::empty();
        for stmt in statements {
            let rowset = self.run_one(&stmt.sql, &stmt.params).await?;
            merged.rows_read += rowset.rows_read;
            merged.rows_written += rowset.rows_written;
            if merged.columns.is_empty() {
                merged.columns = rowset.columns;
            }
            merged.rows.extend(rowset.rows);
        }
        Ok(if raw { ExecResult::Raw(merged.into_envelope()) } else { ExecResult::Shaped(merged.into_shaped()) })
    }
}

fn is_non_query_statement(sql: &str) -> bool {
    let upper = sql.trim_start().to_ascii_uppercase();
    upper.starts_with("INSERT") || upper.starts_with("UPDATE") || upper.starts_with("DELETE")
}

fn bind_json_value<'a>(
    query: sqlx::query::Query<'a, sqlx::MySql, sqlx::mysql::MySqlArguments>,
    value: &'a JsonValue,
) -> sqlx::query::Query<'a, sqlx::MySql, sqlx::mysql::MySqlArguments> {
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

fn mysql_rows_to_raw(rows: &[MySqlRow]) -> RawRowSet {
    let Some(first) = rows.first() else { return RawRowSet::empty() };
    let columns: Vec<String> = first.columns().iter().map(|c| c.name().to_string()).collect();
    let values = rows
        .iter()
        .map(|row| columns.iter().enumerate().map(|(i, _)| mysql_value_to_json(row, i)).collect::<Vec<_>>())
        .collect();
    RawRowSet { columns, rows: values, rows_read: rows.len() as u64, rows_written: 0 }
}

fn mysql_value_to_json(row: &MySqlRow, idx: usize) -> JsonValue {
    let type_name = row.column(idx).type_info().name().to_ascii_uppercase();
    match type_name.as_str() {
        "TINYINT" | "SMALLINT" | "INT" | "BIGINT" => {
            row.try_get::<i64, _>(idx).map(JsonValue::from).unwrap_or(JsonValue::Null)
        }
        "FLOAT" | "DOUBLE" | "DECIMAL" => row.try_get::<f64, _>(idx).map(JsonValue::from).unwrap_or(JsonValue::Null),
        _ => row.try_get::<String, _>(idx).map(JsonValue::from).unwrap_or(JsonValue::Null),
    }
}
