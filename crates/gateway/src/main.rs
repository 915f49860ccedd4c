//! Gateway binary entry point: load configuration, wire the storage
//! layer and query pipeline, and serve the HTTP/WebSocket transport.

use std::process::ExitCode;
use std::sync::Arc;

use gateway_core::pipeline::{GatewayPipeline, PipelineFeatures};
use gateway_db::{EmbeddedBackend, OperationQueue, SchemaIntrospector, SqliteAllowlist, SqliteCache, SqlitePolicies, StorageExecutor};
use gateway_server::config::ExternalKind;
use gateway_server::middleware::AuthState;
use gateway_server::{AppState, Server, ServerConfig};
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "gateway exited with an error");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> gateway_error::Result<()> {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "gateway.toml".to_string());
    let config = if std::path::Path::new(&config_path).exists() {
        ServerConfig::from_toml_file(&config_path)?
    } else {
        info!(path = %config_path, "no config file found, falling back to environment/defaults");
        config_from_env()
    };
    config.validate().map_err(gateway_error::GatewayError::config)?;

    let storage = StorageExecutor::new(&config.database_path).await?;
    let queue = OperationQueue::spawn(storage.clone());
    let internal_backend: Arc<dyn gateway_core::pipeline::Backend> = Arc::new(EmbeddedBackend::new(queue.clone()));
    let internal_schema: Arc<dyn SchemaIntrospector> = Arc::new(storage.clone());

    let (external_backend, external_schema) = match (&config.external_url, &config.external_kind) {
        (Some(url), Some(ExternalKind::Postgres)) => {
            let adapter = Arc::new(gateway_db::PostgresAdapter::new(url).await?);
            let backend: Arc<dyn gateway_core::pipeline::Backend> = adapter.clone();
            let schema: Arc<dyn SchemaIntrospector> = adapter;
            (Some(backend), Some(schema))
        }
        (Some(url), Some(ExternalKind::Mysql)) => {
            let adapter = Arc::new(gateway_db::MySqlAdapter::new(url).await?);
            let backend: Arc<dyn gateway_core::pipeline::Backend> = adapter.clone();
            let schema: Arc<dyn SchemaIntrospector> = adapter;
            (Some(backend), Some(schema))
        }
        (Some(url), None) => {
            let adapter = StorageExecutor::new(url).await?;
            let backend: Arc<dyn gateway_core::pipeline::Backend> = Arc::new(EmbeddedBackend::new(OperationQueue::spawn(adapter.clone())));
            let schema: Arc<dyn SchemaIntrospector> = Arc::new(adapter);
            (Some(backend), Some(schema))
        }
        _ => (None, None),
    };

    let features = PipelineFeatures { allowlist_enabled: config.allowlist_enabled, rls_enabled: config.rls_enabled };
    let pipeline = Arc::new(GatewayPipeline::new(
        features,
        Arc::new(SqliteAllowlist::new(storage.clone())),
        Arc::new(SqlitePolicies::new(storage.clone())),
        Arc::new(SqliteCache::new(queue.clone())),
        internal_backend,
        external_backend,
    ));

    let jwt = config.jwt.clone().map(|jwt_config| gateway_server::jwt::JwtVerifier::new(jwt_config));
    let auth = AuthState::new(config.admin_token.clone(), config.client_token.clone(), jwt);

    let state = AppState::new(
        pipeline,
        internal_schema,
        external_schema,
        config.database_path.clone(),
        auth,
        config.external_kind,
        queue,
    );

    let server = Server::new(config, state);
    server.serve().await
}

fn config_from_env() -> ServerConfig {
    let mut config = ServerConfig::default();
    if let Ok(admin) = std::env::var("GATEWAY_ADMIN_TOKEN") {
        config.admin_token = admin;
    }
    if let Ok(client) = std::env::var("GATEWAY_CLIENT_TOKEN") {
        config.client_token = client;
    }
    if let Ok(db) = std::env::var("GATEWAY_DATABASE_PATH") {
        config.database_path = db;
    }
    if let Ok(bind) = std::env::var("GATEWAY_BIND_ADDR") {
        if let Ok(addr) = bind.parse() {
            config.bind_addr = addr;
        }
    }
    config
}
