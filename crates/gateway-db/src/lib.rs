//! Storage layer for the SQL gateway: the embedded executor, the
//! single-writer operation queue, and the optional external adapters.
//!
//! ```text
//! GatewayPipeline
//!       |
//!       v
//! OperationQueue  (FIFO, one worker, per-ticket timeout)
//!       |
//!       v
//! StorageExecutor (embedded sqlite)   PostgresAdapter / MySqlAdapter (external)
//! ```
#![allow(clippy::module_name_repetitions)]

pub mod external;
pub mod identifier;
pub mod queue;
pub mod schema;
pub mod storage;

use async_trait::async_trait;
use gateway_core::allowlist::AllowlistEntry;
use gateway_core::cache::{CacheEntry, CacheStore};
use gateway_core::pipeline::{AllowlistProvider, Backend, ExecResult, PolicyProvider, RawEnvelope, RawMeta, StatementRequest};
use gateway_core::rls::{Action, Operator, Policy, PolicyValue, ValueType};
use gateway_error::Result;
use serde_json::{json, Value as JsonValue};

pub use external::{MySqlAdapter, PostgresAdapter};
pub use queue::OperationQueue;
pub use schema::SchemaIntrospector;
pub use storage::StorageExecutor;

/// A column/row/meta result fresh off the wire, before it's been
/// flattened into a sequence of `{column: value}` objects.
#[derive(Debug, Clone, Default)]
pub struct RawRowSet {
    /// Ordered column names, empty if no rows were returned.
    pub columns: Vec<String>,
    /// Ordered value rows.
    pub rows: Vec<Vec<JsonValue>>,
    /// Number of rows read (SELECT).
    pub rows_read: u64,
    /// Number of rows written (INSERT/UPDATE/DELETE).
    pub rows_written: u64,
}

impl RawRowSet {
    /// Creates an empty row set with no rows or columns.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates a row set representing a write with no returned rows.
    #[must_use]
    pub fn written(rows_written: u64) -> Self {
        Self { rows_written, ..Self::default() }
    }

    /// Flatten into the shaped form: one JSON object per row.
    #[must_use]
    pub fn into_shaped(self) -> Vec<JsonValue> {
        self.rows
            .into_iter()
            .map(|row| {
                let mut obj = serde_json::Map::with_capacity(self.columns.len());
                for (col, val) in self.columns.iter().zip(row) {
                    obj.insert(col.clone(), val);
                }
                JsonValue::Object(obj)
            })
            .collect()
    }

    /// Converts into the raw envelope form: columns, rows, and metadata kept separate.
    #[must_use]
    pub fn into_envelope(self) -> RawEnvelope {
        RawEnvelope {
            columns: self.columns,
            rows: self.rows,
            meta: RawMeta { rows_read: self.rows_read, rows_written: self.rows_written },
        }
    }
}

/// Adapts a [`StorageExecutor`] to the pipeline's [`Backend`] trait,
/// running every statement through the operation queue so the single
/// writer invariant holds regardless of caller concurrency.
pub struct EmbeddedBackend {
    queue: OperationQueue,
}

impl EmbeddedBackend {
    /// Wraps the given operation queue as a [`Backend`].
    #[must_use]
    pub fn new(queue: OperationQueue) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl Backend for EmbeddedBackend {
    async fn execute(&self, statements: &[StatementRequest], raw: bool) -> Result<ExecResult> {
        if statements.len() == 1 {
            let stmt = &statements[0];
            let rowset = self.queue.submit(stmt.sql.clone(), stmt.params.clone()).await?;
            return Ok(to_exec_result(rowset, raw));
        }

        let batch: Vec<(String, Vec<JsonValue>)> =
            statements.iter().map(|s| (s.sql.clone(), s.params.clone())).collect();
        let rowsets = self.queue.submit_transaction(batch).await?;
        let merged = merge_rowsets(rowsets);
        Ok(to_exec_result(merged, raw))
    }
}

fn to_exec_result(rowset: RawRowSet, raw: bool) -> ExecResult {
    if raw {
        ExecResult::Raw(rowset.into_envelope())
    } else {
        ExecResult::Shaped(rowset.into_shaped())
    }
}

fn merge_rowsets(rowsets: Vec<RawRowSet>) -> RawRowSet {
    let mut merged = RawRowSet::empty();
    for rowset in rowsets {
        merged.rows_read += rowset.rows_read;
        merged.rows_written += rowset.rows_written;
        if merged.columns.is_empty() {
            merged.columns = rowset.columns;
        }
        merged.rows.extend(rowset.rows);
    }
    merged
}

/// Reads allowlist entries from the `tmp_allowlist_queries` bootstrap
/// table (spec §6).
pub struct SqliteAllowlist {
    storage: StorageExecutor,
}

impl SqliteAllowlist {
    /// Wraps the given storage executor as an [`AllowlistProvider`].
    #[must_use]
    pub fn new(storage: StorageExecutor) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl AllowlistProvider for SqliteAllowlist {
    async fn snapshot(&self) -> Result<Vec<AllowlistEntry>> {
        let rows = self.storage.exec_shaped("SELECT id, sql_statement FROM tmp_allowlist_queries", &[]).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let id = row.get("id")?.as_i64()?;
                let sql = row.get("sql_statement")?.as_str()?.to_string();
                Some(AllowlistEntry { id, sql })
            })
            .collect())
    }
}

/// Reads RLS policies from the `tmp_rls_policies` bootstrap table
/// (spec §6).
pub struct SqlitePolicies {
    storage: StorageExecutor,
}

impl SqlitePolicies {
    /// Wraps the given storage executor as a [`PolicyProvider`].
    #[must_use]
    pub fn new(storage: StorageExecutor) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl PolicyProvider for SqlitePolicies {
    async fn snapshot(&self) -> Result<Vec<Policy>> {
        let rows = self
            .storage
            .exec_shaped(
                "SELECT actions, schema, \"table\", \"column\", value, value_type, operator FROM tmp_rls_policies",
                &[],
            )
            .await?;
        Ok(rows.into_iter().filter_map(row_to_policy).collect())
    }
}

fn row_to_policy(row: JsonValue) -> Option<Policy> {
    let action = Action::parse(row.get("actions")?.as_str()?)?;
    let schema = row.get("schema").and_then(JsonValue::as_str).map(str::to_string);
    let table = row.get("table")?.as_str()?.to_string();
    let column = row.get("column")?.as_str()?.to_string();
    let raw_value = row.get("value")?.as_str()?.to_string();
    let value_type = match row.get("value_type").and_then(JsonValue::as_str) {
        Some("number") => ValueType::Number,
        _ => ValueType::String,
    };
    let operator = match row.get("operator").and_then(JsonValue::as_str) {
        Some("!=") => Operator::Neq,
        Some("<") => Operator::Lt,
        Some("<=") => Operator::Lte,
        Some(">") => Operator::Gt,
        Some(">=") => Operator::Gte,
        Some("LIKE") => Operator::Like,
        Some("IN") => Operator::In,
        _ => Operator::Eq,
    };
    Some(Policy { action, schema, table, column, value: PolicyValue::parse(&raw_value), value_type, operator })
}

/// Persists cache entries in the `tmp_cache` bootstrap table (spec §6).
///
/// Routed through the [`OperationQueue`] rather than calling the
/// executor directly: spec §5 counts cache lookups/stores as
/// operations that "themselves traverse the queue," so a cache `put`
/// never runs concurrently with a queued write against the same
/// embedded store.
pub struct SqliteCache {
    queue: OperationQueue,
}

impl SqliteCache {
    /// Wraps the given operation queue as a [`CacheStore`].
    #[must_use]
    pub fn new(queue: OperationQueue) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl CacheStore for SqliteCache {
    async fn get(&self, query: &str) -> Result<Option<CacheEntry>> {
        let rowset = self
            .queue
            .submit("SELECT query, timestamp, ttl, results FROM tmp_cache WHERE query = ?1".to_string(), vec![json!(query)])
            .await?;
        let Some(row) = rowset.into_shaped().into_iter().next() else { return Ok(None) };
        let timestamp = row.get("timestamp").and_then(JsonValue::as_f64).unwrap_or(0.0) as i64;
        let ttl = row.get("ttl").and_then(JsonValue::as_i64).unwrap_or(0);
        let results = row.get("results").and_then(JsonValue::as_str).unwrap_or("[]").to_string();
        Ok(Some(CacheEntry { query: query.to_string(), timestamp, ttl, results }))
    }

    async fn put(&self, entry: CacheEntry) -> Result<()> {
        self.queue
            .submit(
                "INSERT INTO tmp_cache(query, timestamp, ttl, results) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(query) DO UPDATE SET timestamp = excluded.timestamp, ttl = excluded.ttl, results = excluded.results"
                    .to_string(),
                vec![json!(entry.query), json!(entry.timestamp), json!(entry.ttl), json!(entry.results)],
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod cache_tests {
    use super::*;
    use crate::storage::StorageExecutor;

    #[tokio::test]
    async fn put_then_get_round_trips_through_the_queue() {
        let storage = StorageExecutor::in_memory().await.unwrap();
        let queue = OperationQueue::spawn(storage);
        let cache = SqliteCache::new(queue);

        cache.put(CacheEntry { query: "SELECT 1".to_string(), timestamp: 100, ttl: 60, results: "[]".to_string() }).await.unwrap();

        let entry = cache.get("SELECT 1").await.unwrap().unwrap();
        assert_eq!(entry.ttl, 60);
        assert_eq!(entry.results, "[]");
    }

    #[tokio::test]
    async fn get_on_unknown_query_returns_none() {
        let storage = StorageExecutor::in_memory().await.unwrap();
        let queue = OperationQueue::spawn(storage);
        let cache = SqliteCache::new(queue);

        assert!(cache.get("SELECT 2").await.unwrap().is_none());
    }
}
