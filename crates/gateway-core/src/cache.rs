//! Fingerprint-keyed query result cache.
//!
//! The cache key is the exact canonicalized SQL text of a parameterless
//! read — not a hash of query + variables as in richer caching layers,
//! because the spec scopes caching to exactly the statements for which
//! that is safe (see [`is_cacheable`]). Storage is the `tmp_cache`
//! bootstrap table so cached rows are visible through the same
//! single-writer path as every other statement.

use chrono::Utc;
use gateway_error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::ast::Statement;
use crate::context::{RequestContext, Source};

/// Default TTL for cache entries, in seconds. Hard-coded per spec §9
/// Open Question 3 — not per-policy or per-caller.
pub const DEFAULT_TTL_SECS: i64 = 60;

/// A row persisted in `tmp_cache`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Cache key: the canonicalized query text.
    pub query: String,
    /// Millisecond epoch timestamp the entry was stored.
    pub timestamp: i64,
    /// Time-to-live in seconds.
    pub ttl: i64,
    /// Serialized shaped rows.
    pub results: String,
}

impl CacheEntry {
    fn is_fresh(&self, now_ms: i64) -> bool {
        self.timestamp + self.ttl * 1000 > now_ms
    }
}

/// Decide whether a statement is eligible for the cache per spec §4.7:
/// external source, caching requested, no bound parameters, and the
/// parsed statement contains no modifying node.
#[must_use]
pub fn is_cacheable(context: &RequestContext, params_len: usize, statement: &Statement) -> bool {
    context.source == Source::External && context.cache && params_len == 0 && !statement.is_modifying()
}

/// Abstraction over the `tmp_cache` table so `gateway-core` does not
/// depend directly on `gateway-db`; the pipeline orchestrator supplies
/// a concrete implementation backed by the Storage Executor.
#[async_trait::async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch the row for `query`, if any (expired or not — freshness is
    /// checked by the caller so a single clock source is used).
    async fn get(&self, query: &str) -> Result<Option<CacheEntry>>;

    /// Upsert a row for `query`, keyed by its UNIQUE `query` column.
    async fn put(&self, entry: CacheEntry) -> Result<()>;
}

/// Look up `sql` in `store`. Returns `None` on a miss or stale entry.
pub async fn lookup(store: &dyn CacheStore, sql: &str, now_ms: i64) -> Result<Option<Vec<JsonValue>>> {
    let key = crate::ast::canonicalize(sql);
    let Some(entry) = store.get(&key).await? else {
        return Ok(None);
    };
    if !entry.is_fresh(now_ms) {
        return Ok(None);
    }
    let rows: Vec<JsonValue> = serde_json::from_str(&entry.results).unwrap_or_default();
    Ok(Some(rows))
}

/// Store `rows` for `sql`. Store failures are swallowed by the caller
/// (pipeline orchestrator) per spec §7 — they must never fail the
/// query that produced them.
pub async fn store(store: &dyn CacheStore, sql: &str, rows: &[JsonValue]) -> Result<()> {
    let key = crate::ast::canonicalize(sql);
    let results = serde_json::to_string(rows).unwrap_or_else(|_| "[]".to_string());
    let entry = CacheEntry { query: key, timestamp: Utc::now().timestamp_millis(), ttl: DEFAULT_TTL_SECS, results };
    store.put(entry).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Dialect;
    use std::collections::HashMap;

    #[test]
    fn bound_params_are_not_cacheable() {
        let stmt = Statement::parse("SELECT * FROM users", Dialect::Sqlite).unwrap();
        let ctx = RequestContext::client(HashMap::new(), Source::External, true);
        assert!(!is_cacheable(&ctx, 1, &stmt));
    }

    #[test]
    fn internal_source_is_not_cacheable() {
        let stmt = Statement::parse("SELECT * FROM users", Dialect::Sqlite).unwrap();
        let ctx = RequestContext::client(HashMap::new(), Source::Internal, true);
        assert!(!is_cacheable(&ctx, 0, &stmt));
    }

    #[test]
    fn modifying_statement_is_not_cacheable() {
        let stmt = Statement::parse("UPDATE users SET x = 1", Dialect::Sqlite).unwrap();
        let ctx = RequestContext::client(HashMap::new(), Source::External, true);
        assert!(!is_cacheable(&ctx, 0, &stmt));
    }

    #[test]
    fn eligible_parameterless_external_read_is_cacheable() {
        let stmt = Statement::parse("SELECT * FROM users", Dialect::Sqlite).unwrap();
        let ctx = RequestContext::client(HashMap::new(), Source::External, true);
        assert!(is_cacheable(&ctx, 0, &stmt));
    }

    #[test]
    fn entry_freshness_respects_ttl() {
        let entry = CacheEntry { query: "SELECT 1".into(), timestamp: 1_000, ttl: 60, results: "[]".into() };
        assert!(entry.is_fresh(1_000 + 59_000));
        assert!(!entry.is_fresh(1_000 + 61_000));
    }
}
