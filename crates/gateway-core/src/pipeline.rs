//! The pipeline orchestrator: the query entry point described in spec §4.8.
//!
//! Sequences authentication (done by the transport layer before this is
//! called), AST parse, allowlist check, RLS rewrite, cache lookup,
//! dispatch to the single-writer queue or an external adapter, cache
//! store, and a post-hook extension point.

use std::sync::Arc;

use gateway_error::{GatewayError, Result};
use serde_json::Value as JsonValue;
use tracing::{debug, info, instrument};

use crate::allowlist::{self, AllowlistEntry, Decision as AllowlistDecision};
use crate::ast::{Dialect, Statement};
use crate::cache::{self, CacheStore};
use crate::context::{RequestContext, Source};
use crate::metrics::PipelineMetrics;
use crate::rls::{self, Policy};

/// One statement plus its positional parameters.
#[derive(Debug, Clone)]
pub struct StatementRequest {
    /// Raw SQL text as submitted by the client.
    pub sql: String,
    /// Positional parameters, bound by the executor — never interpolated.
    pub params: Vec<JsonValue>,
}

/// The request submitted to the pipeline: either one statement or an
/// atomic batch.
#[derive(Debug, Clone)]
pub enum PipelineRequest {
    /// A single statement.
    Single(StatementRequest),
    /// An ordered batch, committed atomically.
    Batch(Vec<StatementRequest>),
}

/// `{columns, rows (values only), meta}` — the raw response shape.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RawEnvelope {
    /// Ordered column names.
    pub columns: Vec<String>,
    /// Ordered value rows, one per result row.
    pub rows: Vec<Vec<JsonValue>>,
    /// Execution metadata.
    pub meta: RawMeta,
}

/// Row counters attached to a raw envelope.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct RawMeta {
    /// Number of rows read (for SELECT).
    pub rows_read: u64,
    /// Number of rows written (for INSERT/UPDATE/DELETE).
    pub rows_written: u64,
}

/// Result of executing one or more statements.
#[derive(Debug, Clone)]
pub enum ExecResult {
    /// Shaped rows: one JSON object per row, column name to value.
    Shaped(Vec<JsonValue>),
    /// Raw envelope, when the caller asked for the `/query/raw` shape.
    Raw(RawEnvelope),
}

/// The execution target selected by `RequestContext.source`.
#[async_trait::async_trait]
pub trait Backend: Send + Sync {
    /// Execute `statements` as a single atomic unit (one statement is a
    /// batch of length one), returning shaped or raw results per `raw`.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::StorageFailure`/`ExternalFailure` on
    /// backend errors, or `GatewayError::Timeout` if queued past the
    /// configured deadline.
    async fn execute(&self, statements: &[StatementRequest], raw: bool) -> Result<ExecResult>;
}

/// Supplies the current allowlist snapshot. Reloaded per request — the
/// spec intentionally avoids in-memory pinning so table edits take
/// effect immediately (§5).
#[async_trait::async_trait]
pub trait AllowlistProvider: Send + Sync {
    /// Fetch the current set of allowed statement templates.
    async fn snapshot(&self) -> Result<Vec<AllowlistEntry>>;
}

/// Supplies the current RLS policy snapshot, with context substitution
/// already applied to `PolicyValue::ContextClaim` left as unresolved —
/// resolution happens lazily at rewrite time against the caller's claims.
#[async_trait::async_trait]
pub trait PolicyProvider: Send + Sync {
    /// Fetch the current set of row-level security policies.
    async fn snapshot(&self) -> Result<Vec<Policy>>;
}

/// Whether the allowlist/RLS phases are active for this deployment.
#[derive(Debug, Clone, Copy)]
pub struct PipelineFeatures {
    /// When false, every statement passes the allowlist gate unchecked.
    pub allowlist_enabled: bool,
    /// When false, RLS rewriting is skipped entirely.
    pub rls_enabled: bool,
}

impl Default for PipelineFeatures {
    fn default() -> Self {
        Self { allowlist_enabled: true, rls_enabled: true }
    }
}

/// Composes the allowlist, RLS, cache and dispatch stages into the
/// single `run` entry point every transport handler calls.
pub struct GatewayPipeline {
    features: PipelineFeatures,
    allowlist: Arc<dyn AllowlistProvider>,
    policies: Arc<dyn PolicyProvider>,
    cache: Arc<dyn CacheStore>,
    internal: Arc<dyn Backend>,
    external: Option<Arc<dyn Backend>>,
    metrics: Arc<PipelineMetrics>,
}

impl GatewayPipeline {
    /// Construct a pipeline wired to its collaborators.
    #[must_use]
    pub fn new(
        features: PipelineFeatures,
        allowlist: Arc<dyn AllowlistProvider>,
        policies: Arc<dyn PolicyProvider>,
        cache: Arc<dyn CacheStore>,
        internal: Arc<dyn Backend>,
        external: Option<Arc<dyn Backend>>,
    ) -> Self {
        Self { features, allowlist, policies, cache, internal, external, metrics: PipelineMetrics::new() }
    }

    /// Shared counters this pipeline updates as it runs, for the
    /// admin-gated `/metrics` route (spec §2 ambient Metrics, §6).
    #[must_use]
    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        self.metrics.clone()
    }

    /// Run one request through the full pipeline. See spec §4.8 for the
    /// numbered steps this mirrors.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::BadRequest` for empty/malformed SQL,
    /// `GatewayError::Forbidden` for allowlist/RLS denial, and whatever
    /// the selected backend returns for execution failures.
    #[instrument(skip(self, request, context), fields(source = ?context.source))]
    pub async fn run(&self, request: PipelineRequest, context: RequestContext, raw: bool) -> Result<ExecResult> {
        let started = std::time::Instant::now();
        let statements = match request {
            PipelineRequest::Single(stmt) => vec![stmt],
            PipelineRequest::Batch(stmts) => stmts,
        };
        if statements.is_empty() {
            return Err(GatewayError::bad_request("empty batch"));
        }

        let dialect = match context.source {
            Source::Internal => Dialect::Sqlite,
            Source::External => Dialect::Postgresql,
        };

        let allowlist_snapshot =
            if self.features.allowlist_enabled && !context.is_admin() { self.allowlist.snapshot().await? } else { Vec::new() };
        let policy_snapshot = if self.features.rls_enabled { self.policies.snapshot().await? } else { Vec::new() };

        let mut rewritten = Vec::with_capacity(statements.len());
        for stmt in &statements {
            if stmt.sql.trim().is_empty() {
                return Err(GatewayError::bad_request("empty SQL statement"));
            }

            if self.features.allowlist_enabled && !context.is_admin() {
                match allowlist::check(&stmt.sql, &allowlist_snapshot, &context)? {
                    AllowlistDecision::Allowed => {}
                    AllowlistDecision::Denied(reason) => return Err(GatewayError::forbidden(reason)),
                }
            }

            let sql = if self.features.rls_enabled {
                rls::rewrite(&stmt.sql, &policy_snapshot, &context, dialect)?
            } else {
                stmt.sql.clone()
            };

            rewritten.push(StatementRequest { sql, params: stmt.params.clone() });
        }

        // Cache is only ever consulted for a single parameterless external read.
        if let [single] = rewritten.as_slice() {
            let parsed = Statement::parse(&single.sql, dialect)?;
            if cache::is_cacheable(&context, single.params.len(), &parsed) {
                let now_ms = chrono::Utc::now().timestamp_millis();
                if let Ok(Some(rows)) = cache::lookup(self.cache.as_ref(), &single.sql, now_ms).await {
                    debug!(sql = %single.sql, "cache hit");
                    self.metrics.record_cache_hit();
                    return Ok(ExecResult::Shaped(rows));
                }
                self.metrics.record_cache_miss();

                let backend = self.select_backend(context.source)?;
                self.metrics.record_backend_query(context.source);
                let result = backend.execute(&rewritten, raw).await?;
                if let ExecResult::Shaped(rows) = &result {
                    // Cache store failures are swallowed — they must never fail the query.
                    if let Err(err) = cache::store(self.cache.as_ref(), &single.sql, rows).await {
                        debug!(error = %err, "cache store failed, ignoring");
                    }
                }
                info!(elapsed_ms = started.elapsed().as_millis() as u64, cached = false, "query complete");
                return Ok(self.post_hook(result));
            }
        }

        let backend = self.select_backend(context.source)?;
        self.metrics.record_backend_query(context.source);
        let result = backend.execute(&rewritten, raw).await?;
        info!(elapsed_ms = started.elapsed().as_millis() as u64, cached = false, "query complete");
        Ok(self.post_hook(result))
    }

    fn select_backend(&self, source: Source) -> Result<Arc<dyn Backend>> {
        match source {
            Source::Internal => Ok(self.internal.clone()),
            Source::External => self
                .external
                .clone()
                .ok_or_else(|| GatewayError::config("no external adapter configured for this gateway")),
        }
    }

    /// Identity by default. A documented extension point for callers that
    /// need to transform results before they leave the pipeline (e.g.
    /// redacting columns) without touching allowlist/RLS semantics.
    fn post_hook(&self, result: ExecResult) -> ExecResult {
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rls::{Action, Operator, PolicyValue, ValueType};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct StaticAllowlist(Vec<AllowlistEntry>);
    #[async_trait]
    impl AllowlistProvider for StaticAllowlist {
        async fn snapshot(&self) -> Result<Vec<AllowlistEntry>> {
            Ok(self.0.clone())
        }
    }

    struct StaticPolicies(Vec<Policy>);
    #[async_trait]
    impl PolicyProvider for StaticPolicies {
        async fn snapshot(&self) -> Result<Vec<Policy>> {
            Ok(self.0.clone())
        }
    }

    struct NullCache;
    #[async_trait]
    impl CacheStore for NullCache {
        async fn get(&self, _query: &str) -> Result<Option<cache::CacheEntry>> {
            Ok(None)
        }
        async fn put(&self, _entry: cache::CacheEntry) -> Result<()> {
            Ok(())
        }
    }

    struct RecordingBackend {
        seen: Mutex<Vec<String>>,
    }
    #[async_trait]
    impl Backend for RecordingBackend {
        async fn execute(&self, statements: &[StatementRequest], _raw: bool) -> Result<ExecResult> {
            self.seen.lock().unwrap().extend(statements.iter().map(|s| s.sql.clone()));
            Ok(ExecResult::Shaped(vec![serde_json::json!({"ok": true})]))
        }
    }

    fn pipeline(allowlist: Vec<AllowlistEntry>, policies: Vec<Policy>) -> (GatewayPipeline, Arc<RecordingBackend>) {
        let backend = Arc::new(RecordingBackend { seen: Mutex::new(Vec::new()) });
        let pipeline = GatewayPipeline::new(
            PipelineFeatures::default(),
            Arc::new(StaticAllowlist(allowlist)),
            Arc::new(StaticPolicies(policies)),
            Arc::new(NullCache),
            backend.clone(),
            None,
        );
        (pipeline, backend)
    }

    #[tokio::test]
    async fn empty_sql_is_rejected() {
        let (pipeline, _backend) = pipeline(vec![], vec![]);
        let ctx = RequestContext::admin(Source::Internal, false);
        let req = PipelineRequest::Single(StatementRequest { sql: "   ".into(), params: vec![] });
        let err = pipeline.run(req, ctx, false).await.unwrap_err();
        assert!(matches!(err, GatewayError::BadRequest { .. }));
    }

    #[tokio::test]
    async fn allowlisted_statement_dispatches_to_internal_backend() {
        let entries = vec![AllowlistEntry { id: 1, sql: "SELECT * FROM t WHERE a = 1".into() }];
        let (pipeline, backend) = pipeline(entries, vec![]);
        let ctx = RequestContext::client(HashMap::new(), Source::Internal, false);
        let req = PipelineRequest::Single(StatementRequest { sql: "SELECT * FROM t WHERE a = 42".into(), params: vec![] });
        let result = pipeline.run(req, ctx, false).await.unwrap();
        assert!(matches!(result, ExecResult::Shaped(_)));
        assert_eq!(backend.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn non_allowlisted_statement_is_forbidden() {
        let entries = vec![AllowlistEntry { id: 1, sql: "SELECT * FROM t WHERE a = 1".into() }];
        let (pipeline, _backend) = pipeline(entries, vec![]);
        let ctx = RequestContext::client(HashMap::new(), Source::Internal, false);
        let req =
            PipelineRequest::Single(StatementRequest { sql: "SELECT * FROM t WHERE a = 42 OR 1=1".into(), params: vec![] });
        let err = pipeline.run(req, ctx, false).await.unwrap_err();
        assert!(matches!(err, GatewayError::Forbidden { .. }));
    }

    #[tokio::test]
    async fn rls_rewrite_is_applied_before_dispatch() {
        let policy = Policy {
            action: Action::Select,
            schema: None,
            table: "todos".into(),
            column: "user_id".into(),
            value: PolicyValue::ContextClaim("id".into()),
            value_type: ValueType::String,
            operator: Operator::Eq,
        };
        let (pipeline, backend) = pipeline(vec![], vec![policy]);
        let mut claims = HashMap::new();
        claims.insert("sub".to_string(), serde_json::json!("U"));
        let ctx = RequestContext::client(claims, Source::Internal, false);
        let req = PipelineRequest::Single(StatementRequest { sql: "SELECT * FROM todos".into(), params: vec![] });
        pipeline.run(req, ctx, false).await.unwrap();
        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen[0], "SELECT * FROM todos WHERE user_id = 'U'");
    }

    #[tokio::test]
    async fn external_source_without_adapter_is_configuration_error() {
        let (pipeline, _backend) = pipeline(vec![], vec![]);
        let ctx = RequestContext::admin(Source::External, false);
        let req = PipelineRequest::Single(StatementRequest { sql: "SELECT 1".into(), params: vec![] });
        let err = pipeline.run(req, ctx, false).await.unwrap_err();
        assert!(matches!(err, GatewayError::Configuration { .. }));
    }
}
