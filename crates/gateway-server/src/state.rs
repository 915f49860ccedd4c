//! Shared application state handed to every route handler.

use std::sync::Arc;

use dashmap::DashMap;
use gateway_core::pipeline::GatewayPipeline;
use gateway_db::{OperationQueue, SchemaIntrospector};
use uuid::Uuid;

use crate::config::ExternalKind;
use crate::middleware::AuthState;
use crate::socket::SocketHandle;

/// Everything a handler needs: the pipeline, schema introspection for the
/// REST facade, the database path for `/status`, and the live socket
/// session registry.
#[derive(Clone)]
pub struct AppState {
    /// The query pipeline (allowlist, RLS, cache, dispatch).
    pub pipeline: Arc<GatewayPipeline>,
    /// Schema introspector for the backend selected by a request's source.
    pub internal_schema: Arc<dyn SchemaIntrospector>,
    /// Schema introspector for the external adapter, if one is configured.
    pub external_schema: Option<Arc<dyn SchemaIntrospector>>,
    /// Path/URL of the embedded database, surfaced by `/status`.
    pub database_path: Arc<String>,
    /// Live WebSocket sessions, keyed by their connection UUID (spec §4.9).
    pub sockets: Arc<DashMap<Uuid, SocketHandle>>,
    /// Authenticator, reused directly by the socket handler since the
    /// socket upgrade cannot go through the header-based auth middleware.
    pub auth: AuthState,
    /// Which external adapter is configured, if any — determines bind
    /// parameter placeholder syntax for REST-facade generated SQL.
    pub external_kind: Option<ExternalKind>,
    /// The embedded store's single-writer queue, kept here (in addition
    /// to being owned by the pipeline's internal `Backend`) purely so
    /// `/metrics` can read its current depth.
    pub embedded_queue: OperationQueue,
}

impl AppState {
    /// Construct application state.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pipeline: Arc<GatewayPipeline>,
        internal_schema: Arc<dyn SchemaIntrospector>,
        external_schema: Option<Arc<dyn SchemaIntrospector>>,
        database_path: String,
        auth: AuthState,
        external_kind: Option<ExternalKind>,
        embedded_queue: OperationQueue,
    ) -> Self {
        Self {
            pipeline,
            internal_schema,
            external_schema,
            database_path: Arc::new(database_path),
            sockets: Arc::new(DashMap::new()),
            auth,
            external_kind,
            embedded_queue,
        }
    }

    /// Pick the schema introspector matching a request's `source`.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Configuration` if `source` is `External`
    /// and no external adapter is configured.
    pub fn schema_for(&self, source: gateway_core::context::Source) -> gateway_error::Result<Arc<dyn SchemaIntrospector>> {
        match source {
            gateway_core::context::Source::Internal => Ok(self.internal_schema.clone()),
            gateway_core::context::Source::External => self
                .external_schema
                .clone()
                .ok_or_else(|| gateway_error::GatewayError::config("no external adapter configured for this gateway")),
        }
    }
}
