//! External adapters: remote databases reachable over `source: external`.
//!
//! A gateway deployment enables at most one external adapter at a time
//! (spec §4.3); the remote-SQLite case reuses [`crate::storage::StorageExecutor`]
//! pointed at a file path outside the embedded store's lifecycle, so it
//! has no adapter of its own here.

pub mod mysql;
pub mod postgres;

pub use mysql::MySqlAdapter;
pub use postgres::PostgresAdapter;
