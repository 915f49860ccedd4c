//! Primary-key and column discovery for the REST facade (spec §4.10).
//!
//! Schema metadata queries (`PRAGMA table_info`, `information_schema`)
//! are read directly against the backend, bypassing the allowlist/RLS
//! pipeline — they never touch user data, only catalog tables, and the
//! facade only uses the result to shape the SQL it then *does* run
//! through the orchestrator.

use async_trait::async_trait;
use gateway_error::Result;

use crate::external::{MySqlAdapter, PostgresAdapter};
use crate::storage::StorageExecutor;

/// Looks up a table's primary-key and full column list.
#[async_trait]
pub trait SchemaIntrospector: Send + Sync {
    /// Ordered primary-key column names (composite keys have more than one).
    async fn primary_keys(&self, table: &str) -> Result<Vec<String>>;

    /// All column names, in declaration order.
    async fn columns(&self, table: &str) -> Result<Vec<String>>;

    /// Every user table, for whole-database bulk export (spec §1, §6).
    /// Bootstrap tables (`tmp_cache`, `tmp_allowlist_queries`,
    /// `tmp_rls_policies`) are never included.
    async fn tables(&self) -> Result<Vec<String>>;
}

const BOOTSTRAP_TABLES: &[&str] = &["tmp_cache", "tmp_allowlist_queries", "tmp_rls_policies"];

#[async_trait]
impl SchemaIntrospector for StorageExecutor {
    async fn primary_keys(&self, table: &str) -> Result<Vec<String>> {
        let rows = self.exec_shaped(&format!("PRAGMA table_info({table})"), &[]).await?;
        Ok(rows
            .into_iter()
            .filter(|row| row.get("pk").and_then(serde_json::Value::as_i64).unwrap_or(0) > 0)
            .filter_map(|row| row.get("name").and_then(serde_json::Value::as_str).map(str::to_string))
            .collect())
    }

    async fn columns(&self, table: &str) -> Result<Vec<String>> {
        let rows = self.exec_shaped(&format!("PRAGMA table_info({table})"), &[]).await?;
        Ok(rows.into_iter().filter_map(|row| row.get("name").and_then(serde_json::Value::as_str).map(str::to_string)).collect())
    }

    async fn tables(&self) -> Result<Vec<String>> {
        let rows = self
            .exec_shaped("SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'", &[])
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.get("name").and_then(serde_json::Value::as_str).map(str::to_string))
            .filter(|name| !BOOTSTRAP_TABLES.contains(&name.as_str()))
            .collect())
    }
}

#[async_trait]
impl SchemaIntrospector for PostgresAdapter {
    async fn primary_keys(&self, table: &str) -> Result<Vec<String>> {
        let rows = self
            .schema_query(
                "SELECT a.attname AS name FROM pg_index i \
                 JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey) \
                 WHERE i.indrelid = $1::regclass AND i.indisprimary",
                &[serde_json::json!(table)],
            )
            .await?;
        Ok(rows.into_iter().filter_map(|row| row.get("name").and_then(serde_json::Value::as_str).map(str::to_string)).collect())
    }

    async fn columns(&self, table: &str) -> Result<Vec<String>> {
        let rows = self
            .schema_query(
                "SELECT column_name AS name FROM information_schema.columns WHERE table_name = $1 ORDER BY ordinal_position",
                &[serde_json::json!(table)],
            )
            .await?;
        Ok(rows.into_iter().filter_map(|row| row.get("name").and_then(serde_json::Value::as_str).map(str::to_string)).collect())
    }

    async fn tables(&self) -> Result<Vec<String>> {
        let rows = self
            .schema_query("SELECT table_name AS name FROM information_schema.tables WHERE table_schema = 'public'", &[])
            .await?;
        Ok(rows.into_iter().filter_map(|row| row.get("name").and_then(serde_json::Value::as_str).map(str::to_string)).collect())
    }
}

#[async_trait]
impl SchemaIntrospector for MySqlAdapter {
    async fn primary_keys(&self, table: &str) -> Result<Vec<String>> {
        let rows = self
            .schema_query(
                "SELECT column_name AS name FROM information_schema.key_column_usage \
                 WHERE table_name = ? AND constraint_name = 'PRIMARY' ORDER BY ordinal_position",
                &[serde_json::json!(table)],
            )
            .await?;
        Ok(rows.into_iter().filter_map(|row| row.get("name").and_then(serde_json::Value::as_str).map(str::to_string)).collect())
    }

    async fn columns(&self, table: &str) -> Result<Vec<String>> {
        let rows = self
            .schema_query(
                "SELECT column_name AS name FROM information_schema.columns WHERE table_name = ? ORDER BY ordinal_position",
                &[serde_json::json!(table)],
            )
            .await?;
        Ok(rows.into_iter().filter_map(|row| row.get("name").and_then(serde_json::Value::as_str).map(str::to_string)).collect())
    }

    async fn tables(&self) -> Result<Vec<String>> {
        let rows = self
            .schema_query("SELECT table_name AS name FROM information_schema.tables WHERE table_schema = DATABASE()", &[])
            .await?;
        Ok(rows.into_iter().filter_map(|row| row.get("name").and_then(serde_json::Value::as_str).map(str::to_string)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tables_excludes_bootstrap_tables() {
        let storage = StorageExecutor::in_memory().await.unwrap();
        storage.exec_raw("CREATE TABLE widgets(id INTEGER PRIMARY KEY, name TEXT)", &[]).await.unwrap();
        let tables = storage.tables().await.unwrap();
        assert!(tables.contains(&"widgets".to_string()));
        assert!(!tables.iter().any(|t| BOOTSTRAP_TABLES.contains(&t.as_str())));
    }

    #[tokio::test]
    async fn primary_keys_and_columns_reflect_table_info() {
        let storage = StorageExecutor::in_memory().await.unwrap();
        storage.exec_raw("CREATE TABLE widgets(id INTEGER PRIMARY KEY, name TEXT, price INTEGER)", &[]).await.unwrap();
        assert_eq!(storage.primary_keys("widgets").await.unwrap(), vec!["id".to_string()]);
        assert_eq!(storage.columns("widgets").await.unwrap(), vec!["id".to_string(), "name".to_string(), "price".to_string()]);
    }
}
