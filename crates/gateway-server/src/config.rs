//! Server configuration.

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Remote JWKS-backed JWT verification, used in addition to the two
/// static bearer tokens (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    /// URL serving the provider's JSON Web Key Set.
    pub jwks_url: String,
    /// Expected `aud` claim, checked on every token.
    pub audience: Option<String>,
    /// Expected `iss` claim, checked on every token.
    pub issuer: Option<String>,
}

/// Server configuration, loadable from TOML with environment overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// Path to the embedded SQLite database file (`sqlite::memory:` for ephemeral).
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Connection string for the optional external adapter.
    #[serde(default)]
    pub external_url: Option<String>,

    /// Which external adapter `external_url` targets.
    #[serde(default)]
    pub external_kind: Option<ExternalKind>,

    /// Static admin bearer token.
    pub admin_token: String,

    /// Static client bearer token.
    pub client_token: String,

    /// Optional JWT verification, layered on top of the two static tokens.
    #[serde(default)]
    pub jwt: Option<JwtConfig>,

    /// Enable the allowlist gate.
    #[serde(default = "default_true")]
    pub allowlist_enabled: bool,

    /// Enable the RLS rewriter.
    #[serde(default = "default_true")]
    pub rls_enabled: bool,

    /// Enable CORS.
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Enable response compression.
    #[serde(default = "default_true")]
    pub compression_enabled: bool,

    /// Enable request tracing.
    #[serde(default = "default_true")]
    pub tracing_enabled: bool,

    /// `/query` endpoint path.
    #[serde(default = "default_query_path")]
    pub query_path: String,

    /// `/query/raw` endpoint path.
    #[serde(default = "default_query_raw_path")]
    pub query_raw_path: String,

    /// `/status` endpoint path.
    #[serde(default = "default_status_path")]
    pub status_path: String,

    /// `/socket` WebSocket endpoint path.
    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    /// `/rest` facade mount path.
    #[serde(default = "default_rest_path")]
    pub rest_path: String,

    /// `/metrics` endpoint path, admin-token-gated (spec §2/§6).
    #[serde(default = "default_metrics_path")]
    pub metrics_path: String,

    /// `/export` bulk export mount path (spec §1, §6).
    #[serde(default = "default_export_path")]
    pub export_path: String,

    /// `/import` bulk import mount path (spec §1, §6).
    #[serde(default = "default_import_path")]
    pub import_path: String,
}

/// Which remote database kind an `external_url` targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExternalKind {
    /// PostgreSQL, via the `tokio-postgres`-backed adapter.
    Postgres,
    /// MySQL, via the `sqlx`-backed adapter.
    Mysql,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            database_path: default_database_path(),
            external_url: None,
            external_kind: None,
            admin_token: String::new(),
            client_token: String::new(),
            jwt: None,
            allowlist_enabled: true,
            rls_enabled: true,
            cors_enabled: true,
            compression_enabled: true,
            tracing_enabled: true,
            query_path: default_query_path(),
            query_raw_path: default_query_raw_path(),
            status_path: default_status_path(),
            socket_path: default_socket_path(),
            rest_path: default_rest_path(),
            metrics_path: default_metrics_path(),
            export_path: default_export_path(),
            import_path: default_import_path(),
        }
    }
}

impl ServerConfig {
    /// Load from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Configuration` if the file cannot be read
    /// or parsed.
    pub fn from_toml_file(path: impl AsRef<std::path::Path>) -> gateway_error::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| gateway_error::GatewayError::config(format!("failed to read config file: {e}")))?;
        toml::from_str(&text).map_err(|e| gateway_error::GatewayError::config(format!("invalid config file: {e}")))
    }

    /// Validate configuration invariants that serde defaults cannot express.
    ///
    /// # Errors
    ///
    /// Returns an error message if both bearer tokens are empty, or if a
    /// JWT config is set with an empty JWKS URL.
    pub fn validate(&self) -> Result<(), String> {
        if self.admin_token.is_empty() && self.client_token.is_empty() {
            return Err("at least one of admin_token/client_token must be set".to_string());
        }
        if let Some(jwt) = &self.jwt {
            if jwt.jwks_url.is_empty() {
                return Err("jwt.jwks_url must not be empty".to_string());
            }
        }
        Ok(())
    }
}

fn default_bind_addr() -> SocketAddr {
    "127.0.0.1:8080".parse().expect("valid default bind address")
}

fn default_database_path() -> String {
    "sqlite::memory:".to_string()
}

fn default_true() -> bool {
    true
}

fn default_query_path() -> String {
    "/query".to_string()
}

fn default_query_raw_path() -> String {
    "/query/raw".to_string()
}

fn default_status_path() -> String {
    "/status".to_string()
}

fn default_socket_path() -> String {
    "/socket".to_string()
}

fn default_rest_path() -> String {
    "/rest".to_string()
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_export_path() -> String {
    "/export".to_string()
}

fn default_import_path() -> String {
    "/import".to_string()
}

/// Config file location convention, for callers that want the same
/// default path the umbrella binary uses.
#[must_use]
pub fn default_config_path() -> PathBuf {
    PathBuf::from("gateway.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_paths_match_the_documented_surface() {
        let config = ServerConfig::default();
        assert_eq!(config.query_path, "/query");
        assert_eq!(config.query_raw_path, "/query/raw");
        assert_eq!(config.status_path, "/status");
        assert_eq!(config.socket_path, "/socket");
        assert_eq!(config.metrics_path, "/metrics");
        assert_eq!(config.export_path, "/export");
        assert_eq!(config.import_path, "/import");
    }

    #[test]
    fn validate_rejects_no_tokens_at_all() {
        let config = ServerConfig { admin_token: String::new(), client_token: String::new(), ..ServerConfig::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_accepts_client_token_only() {
        let config = ServerConfig { admin_token: String::new(), client_token: "c".to_string(), ..ServerConfig::default() };
        assert!(config.validate().is_ok());
    }
}
