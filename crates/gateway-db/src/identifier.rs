//! Database-specific identifier quoting.
//!
//! Each function splits a possibly schema-qualified identifier on `.`
//! and quotes each component with the target dialect's syntax.

/// Quote a PostgreSQL identifier (double quotes).
#[must_use]
pub fn quote_postgres_identifier(identifier: &str) -> String {
    identifier.split('.').map(|part| format!("\"{part}\"")).collect::<Vec<_>>().join(".")
}

/// Quote a MySQL identifier (backticks).
#[must_use]
pub fn quote_mysql_identifier(identifier: &str) -> String {
    identifier.split('.').map(|part| format!("`{part}`")).collect::<Vec<_>>().join(".")
}

/// Quote a SQLite identifier (double quotes).
#[must_use]
pub fn quote_sqlite_identifier(identifier: &str) -> String {
    identifier.split('.').map(|part| format!("\"{part}\"")).collect::<Vec<_>>().join(".")
}

/// Reject anything that is not `[A-Za-z0-9_]+`, used for REST-facade
/// table/column names lifted straight from the URL path (spec §4.10).
#[must_use]
pub fn is_safe_bare_identifier(identifier: &str) -> bool {
    !identifier.is_empty() && identifier.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_schema_qualified_postgres_identifiers() {
        assert_eq!(quote_postgres_identifier("v_user"), "\"v_user\"");
        assert_eq!(quote_postgres_identifier("public.v_user"), "\"public\".\"v_user\"");
    }

    #[test]
    fn quotes_mysql_identifiers_with_backticks() {
        assert_eq!(quote_mysql_identifier("mydb.v_user"), "`mydb`.`v_user`");
    }

    #[test]
    fn rejects_unsafe_bare_identifiers() {
        assert!(is_safe_bare_identifier("widgets"));
        assert!(is_safe_bare_identifier("widgets_v2"));
        assert!(!is_safe_bare_identifier("widgets; DROP TABLE x"));
        assert!(!is_safe_bare_identifier(""));
        assert!(!is_safe_bare_identifier("widgets.x"));
    }
}
