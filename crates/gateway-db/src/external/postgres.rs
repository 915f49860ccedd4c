//! External PostgreSQL adapter.
//!
//! Implements [`Backend`] over a pooled `tokio-postgres` connection, for
//! statements whose `RequestContext.source` is `External` and the
//! gateway is configured with a Postgres connection string (spec §4.3).

use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use gateway_core::pipeline::{Backend, ExecResult, StatementRequest};
use gateway_error::{GatewayError, Result};
use serde_json::Value as JsonValue;
use tokio_postgres::NoTls;
use tokio_postgres::types::{ToSql, Type};

use crate::RawRowSet;

/// Pooled connection to an external PostgreSQL database.
pub struct PostgresAdapter {
    pool: Pool,
}

impl PostgresAdapter {
    /// Connect with the default pool size.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::ExternalFailure` if the pool cannot be
    /// created or the connectivity probe fails.
    pub async fn new(connection_string: &str) -> Result<Self> {
        Self::with_pool_size(connection_string, 10).await
    }

    /// Connect with a custom maximum pool size.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::ExternalFailure` if the pool cannot be created.
    pub async fn with_pool_size(connection_string: &str, max_size: usize) -> Result<Self> {
        let mut cfg = Config::new();
        cfg.url = Some(connection_string.to_string());
        cfg.manager = Some(ManagerConfig { recycling_method: RecyclingMethod::Fast });
        cfg.pool = Some(deadpool_postgres::PoolConfig::new(max_size));

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| GatewayError::external("postgres", format!("failed to create connection pool: {e}")))?;

        let client = pool
            .get()
            .await
            .map_err(|e| GatewayError::external("postgres", format!("failed to acquire connection: {e}")))?;
        client
            .query("SELECT 1", &[])
            .await
            .map_err(|e| GatewayError::external("postgres", format!("failed to connect: {e}")))?;

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
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| GatewayError::external("postgres", format!("failed to acquire connection: {e}")))?;

        let bound: Vec<Box<dyn ToSql + Sync + Send>> = params.iter().map(json_to_postgres_param).collect();
        let refs: Vec<&(dyn ToSql + Sync)> = bound.iter().map(|p| p.as_ref() as &(dyn ToSql + Sync)).collect();
        let sql = translate_placeholders(sql);

        if is_non_query_statement(&sql) {
            let affected = client
                .execute(&sql, &refs)
                .await
                .map_err(|e| GatewayError::external("postgres", format!("statement failed: {e}")))?;
            return Ok(RawRowSet::written(affected));
        }

        let rows = client
            .query(&sql, &refs)
            .await
            .map_err(|e| GatewayError::external("postgres", format!("query failed: {e}")))?;

        let Some(first) = rows.first() else { return Ok(RawRowSet::empty()) };
        let columns: Vec<String> = first.columns().iter().map(|c| c.name().to_string()).collect();
        let values = rows
            .iter()
            .map(|row| {
                (0..columns.len()).map(|i| postgres_value_to_json(row, i)).collect::<Vec<_>>()
            })
            .collect();

        Ok(RawRowSet { columns, rows: values, rows_read: rows.len() as u64, rows_written: 0 })
    }
}

#[async_trait]
impl Backend for PostgresAdapter {
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

/// Translate the gateway's dialect-neutral positional `?` placeholders
/// into Postgres's native `$1, $2, ...` form (spec §4.3). A `?` inside a
/// single-quoted string literal is left untouched; doubled quotes
/// (`''`) inside a literal are passed through without ending it early.
fn translate_placeholders(sql: &str) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut in_string = false;
    let mut index = 0usize;
    for c in sql.chars() {
        if c == '\'' {
            in_string = !in_string;
            result.push(c);
        } else if c == '?' && !in_string {
            index += 1;
            result.push('$');
            result.push_str(&index.to_string());
        } else {
            result.push(c);
        }
    }
    result
}

fn is_non_query_statement(sql: &str) -> bool {
    let upper = sql.trim_start().to_ascii_uppercase();
    (upper.starts_with("INSERT") || upper.starts_with("UPDATE") || upper.starts_with("DELETE"))
        && !upper.contains("RETURNING")
}

fn json_to_postgres_param(value: &JsonValue) -> Box<dyn ToSql + Sync + Send> {
    match value {
        JsonValue::String(s) => Box::new(s.clone()),
        JsonValue::Bool(b) => Box::new(*b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Box::new(i)
            } else if let Some(f) = n.as_f64() {
                Box::new(f)
            } else {
                Box::new(n.to_string())
            }
        }
        JsonValue::Null => Box::new(Option::<String>::None),
        JsonValue::Array(_) | JsonValue::Object(_) => Box::new(value.to_string()),
    }
}

fn postgres_value_to_json(row: &tokio_postgres::Row, idx: usize) -> JsonValue {
    let column_type = row.columns()[idx].type_();
    match *column_type {
        Type::INT2 | Type::INT4 | Type::INT8 => {
            row.try_get::<_, i64>(idx).map(JsonValue::from).unwrap_or(JsonValue::Null)
        }
        Type::FLOAT4 | Type::FLOAT8 => row.try_get::<_, f64>(idx).map(JsonValue::from).unwrap_or(JsonValue::Null),
        Type::BOOL => row.try_get::<_, bool>(idx).map(JsonValue::from).unwrap_or(JsonValue::Null),
        _ => row.try_get::<_, String>(idx).map(JsonValue::from).unwrap_or(JsonValue::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::translate_placeholders;

    #[test]
    fn translates_sequential_placeholders() {
        assert_eq!(translate_placeholders("SELECT * FROM t WHERE a = ? AND b = ?"), "SELECT * FROM t WHERE a = $1 AND b = $2");
    }

    #[test]
    fn leaves_placeholders_inside_string_literals_untouched() {
        assert_eq!(translate_placeholders("SELECT * FROM t WHERE a = '?' AND b = ?"), "SELECT * FROM t WHERE a = '?' AND b = $1");
    }

    #[test]
    fn sql_without_placeholders_is_unchanged() {
        assert_eq!(translate_placeholders("SELECT 1"), "SELECT 1");
    }
}
