//! HTTP/WebSocket transport and REST facade for the SQL gateway.
//!
//! Wires [`gateway_core::pipeline::GatewayPipeline`] and
//! [`gateway_db`]'s backends to an `axum` router: `/query`,
//! `/query/raw`, `/status`, `/socket`, and the generated `/rest` facade.

#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod jwt;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod socket;
pub mod state;

pub use config::ServerConfig;
pub use server::Server;
pub use state::AppState;
