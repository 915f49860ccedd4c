//! Query pipeline core for the SQL gateway.
//!
//! Composes four concerns around an embedded SQL engine: AST-based
//! allowlist matching, AST-rewriting row-level security, a
//! fingerprint-keyed result cache, and the pipeline orchestrator that
//! sequences them in front of a storage backend.
//!
//! # Compilation flow
//!
//! ```text
//! raw SQL text
//!      │  ast::Statement::parse
//!      ▼
//! sqlparser AST ──► allowlist::check ──► rls::rewrite ──► cache::lookup
//!                                                              │ miss
//!                                                              ▼
//!                                                     dispatch to backend
//! ```

#![allow(clippy::module_name_repetitions)]

pub mod allowlist;
pub mod ast;
pub mod cache;
pub mod context;
pub mod metrics;
pub mod pipeline;
pub mod rls;

pub use ast::{Dialect, Statement};
pub use context::{RequestContext, Role, Source};
pub use metrics::PipelineMetrics;
pub use pipeline::{AllowlistProvider, Backend, ExecResult, GatewayPipeline, PolicyProvider, RawEnvelope};

/// Crate version, for diagnostics and the `/status` endpoint.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
