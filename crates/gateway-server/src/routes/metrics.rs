//! `GET /metrics`: admin-gated Prometheus scrape target (spec §2, §6).

use axum::{extract::{Extension, State}, http::StatusCode, response::{IntoResponse, Response}};
use gateway_core::context::RequestContext;
use gateway_error::GatewayError;

use crate::metrics::MetricsSnapshot;
use crate::state::AppState;

/// Returns Prometheus text-format metrics. Restricted to the admin
/// token/role — the queue depth and query counts this exposes are
/// operational detail, not something every client should read.
pub async fn metrics_handler(State(state): State<AppState>, Extension(context): Extension<RequestContext>) -> Response {
    if !context.is_admin() {
        return GatewayError::forbidden("metrics are restricted to the admin role").into_response();
    }

    let metrics = state.pipeline.metrics();
    let snapshot = MetricsSnapshot::capture(&metrics, state.embedded_queue.depth());

    (StatusCode::OK, [("Content-Type", "text/plain; version=0.0.4")], snapshot.to_prometheus_format()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::context::Source;
    use gateway_core::pipeline::{GatewayPipeline, PipelineFeatures};
    use gateway_db::{EmbeddedBackend, OperationQueue, SqliteAllowlist, SqliteCache, SqlitePolicies, StorageExecutor};
    use std::sync::Arc;

    async fn state() -> AppState {
        let storage = StorageExecutor::in_memory().await.unwrap();
        let queue = OperationQueue::spawn(storage.clone());
        let backend = Arc::new(EmbeddedBackend::new(queue.clone()));
        let pipeline = Arc::new(GatewayPipeline::new(
            PipelineFeatures::default(),
            Arc::new(SqliteAllowlist::new(storage.clone())),
            Arc::new(SqlitePolicies::new(storage.clone())),
            Arc::new(SqliteCache::new(queue.clone())),
            backend,
            None,
        ));
        let auth = crate::middleware::AuthState::new("admin".to_string(), "client".to_string(), None);
        AppState::new(pipeline, Arc::new(storage), None, "sqlite::memory:".to_string(), auth, None, queue)
    }

    #[tokio::test]
    async fn admin_sees_metrics() {
        let response = metrics_handler(State(state().await), Extension(RequestContext::admin(Source::Internal, false))).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn non_admin_is_forbidden() {
        let context = RequestContext::client(std::collections::HashMap::new(), Source::Internal, false);
        let response = metrics_handler(State(state().await), Extension(context)).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
