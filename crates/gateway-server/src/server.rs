//! HTTP server assembly and the `serve` entry point.

use axum::{Router, routing::{get, post}};
use tokio::net::TcpListener;
use tracing::info;

use crate::config::ServerConfig;
use crate::middleware::{auth_middleware, cors_layer, trace_layer};
use crate::routes::bulk::{export_database_handler, export_table_handler, import_table_handler};
use crate::routes::metrics::metrics_handler;
use crate::routes::query::{query_handler, query_raw_handler, socket_handler, status_handler};
use crate::routes::rest::{create_handler, delete_handler, get_handler, list_handler, patch_handler, put_handler};
use crate::state::AppState;

/// Owns the configuration and shared state; builds the router and serves it.
pub struct Server {
    config: ServerConfig,
    state: AppState,
}

impl Server {
    /// Construct a server from configuration and already-built state.
    #[must_use]
    pub fn new(config: ServerConfig, state: AppState) -> Self {
        Self { config, state }
    }

    fn build_router(&self) -> Router {
        let rest_item_path = format!("{}/{{table}}/{{id}}", self.config.rest_path);
        let rest_collection_path = format!("{}/{{table}}", self.config.rest_path);
        let export_table_path = format!("{}/{{table}}", self.config.export_path);
        let export_database_path = format!("{}/database", self.config.export_path);
        let import_table_path = format!("{}/{{table}}", self.config.import_path);

        let mut protected = Router::new()
            .route(&self.config.query_path, post(query_handler))
            .route(&self.config.query_raw_path, post(query_raw_handler))
            .route(&self.config.status_path, get(status_handler))
            .route(&self.config.metrics_path, get(metrics_handler))
            .route(&rest_collection_path, get(list_handler).post(create_handler))
            .route(&rest_item_path, get(get_handler).patch(patch_handler).put(put_handler).delete(delete_handler))
            .route(&export_database_path, get(export_database_handler))
            .route(&export_table_path, post(export_table_handler))
            .route(&import_table_path, post(import_table_handler))
            .with_state(self.state.clone());

        protected = protected.route_layer(axum::middleware::from_fn_with_state(self.state.auth.clone(), auth_middleware));

        let socket = Router::new().route(&self.config.socket_path, get(socket_handler)).with_state(self.state.clone());

        let mut app = protected.merge(socket);

        if self.config.tracing_enabled {
            app = app.layer(trace_layer());
        }
        if self.config.cors_enabled {
            app = app.layer(cors_layer());
        }
        if self.config.compression_enabled {
            app = app.layer(tower_http::compression::CompressionLayer::new());
        }

        app
    }

    /// Bind and serve forever.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Configuration` if the bind address cannot
    /// be bound, or `GatewayError::Internal` if `axum::serve` itself fails.
    pub async fn serve(self) -> gateway_error::Result<()> {
        let app = self.build_router();

        let listener = TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(|e| gateway_error::GatewayError::config(format!("failed to bind {}: {e}", self.config.bind_addr)))?;

        info!(bind_addr = %self.config.bind_addr, "gateway listening");

        axum::serve(listener, app).await.map_err(|e| gateway_error::GatewayError::internal(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::AuthState;
    use gateway_core::pipeline::{GatewayPipeline, PipelineFeatures};
    use gateway_db::{SqliteAllowlist, SqliteCache, SqlitePolicies, StorageExecutor};
    use std::sync::Arc;

    async fn test_state() -> AppState {
        let storage = StorageExecutor::in_memory().await.unwrap();
        let queue = gateway_db::OperationQueue::spawn(storage.clone());
        let backend = Arc::new(gateway_db::EmbeddedBackend::new(queue.clone()));
        let pipeline = Arc::new(GatewayPipeline::new(
            PipelineFeatures::default(),
            Arc::new(SqliteAllowlist::new(storage.clone())),
            Arc::new(SqlitePolicies::new(storage.clone())),
            Arc::new(SqliteCache::new(queue.clone())),
            backend,
            None,
        ));
        let auth = AuthState::new("admin".to_string(), "client".to_string(), None);
        AppState::new(pipeline, Arc::new(storage), None, "sqlite::memory:".to_string(), auth, None, queue)
    }

    #[tokio::test]
    async fn router_builds_without_panicking() {
        let config = ServerConfig { admin_token: "admin".to_string(), client_token: "client".to_string(), ..ServerConfig::default() };
        let state = test_state().await;
        let server = Server::new(config, state);
        let _router = server.build_router();
    }
}
