//! HTTP middleware: authentication, CORS, tracing.

pub mod auth;
pub mod cors;
pub mod trace;

pub use auth::{AuthState, auth_middleware};
pub use cors::cors_layer;
pub use trace::trace_layer;
