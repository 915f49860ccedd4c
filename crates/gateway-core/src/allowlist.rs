//! Allowlist gate: AST equality modulo literal values.
//!
//! A client statement is permitted when it structurally matches some
//! allowlist entry once every literal value in both trees is replaced
//! by the same sentinel. This lets one template cover arbitrary
//! parameter bindings while rejecting injected clauses (`OR 1=1`)
//! that change the tree shape rather than just its literals.

use gateway_error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use sqlparser::ast::{Expr, Value};

use crate::ast::{Dialect, Statement};
use crate::context::RequestContext;

/// One permitted statement template, as persisted in `tmp_allowlist_queries`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllowlistEntry {
    /// Row id in `tmp_allowlist_queries`.
    pub id: i64,
    /// Canonicalized template SQL text.
    pub sql: String,
}

/// Result of an allowlist check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The statement is permitted.
    Allowed,
    /// The statement was rejected, with a human-readable reason.
    Denied(String),
}

/// Check `sql` against the allowlist snapshot for this request.
///
/// Admins bypass the gate entirely. When the allowlist feature is
/// disabled by configuration the caller should not invoke this
/// function at all (checked by the pipeline orchestrator).
///
/// # Errors
///
/// Returns `GatewayError::BadRequest` if `sql` fails to parse.
pub fn check(sql: &str, entries: &[AllowlistEntry], context: &RequestContext) -> Result<Decision> {
    if context.is_admin() {
        return Ok(Decision::Allowed);
    }

    let incoming = Statement::parse(sql, Dialect::Sqlite)
        .map_err(|e| GatewayError::bad_request(format!("allowlist: {e}")))?;

    for entry in entries {
        let Ok(candidate) = Statement::parse(&entry.sql, Dialect::Sqlite) else {
            continue;
        };
        if matches_modulo_literals(&incoming.ast, &candidate.ast) {
            return Ok(Decision::Allowed);
        }
    }

    Ok(Decision::Denied("query not allowed".to_string()))
}

// `sqlparser::ast::Statement` does not implement a generic sentinel-replacing
// visitor out of the box, so the comparison below walks the specific
// substructure the gateway cares about via `to_string` normalization after
// blanking literals. This mirrors the textual-canonicalization approach used
// for allowlist matching: both trees are re-serialized after literal erasure
// and then compared as strings, which is equivalent to structural equality
// because `sqlparser`'s `Display` impl is deterministic for a given AST shape.
fn normalize(stmt: &sqlparser::ast::Statement) -> String {
    let mut cloned = stmt.clone();
    blank_literals_statement(&mut cloned);
    cloned.to_string()
}

fn blank_literals_statement(stmt: &mut sqlparser::ast::Statement) {
    use sqlparser::ast::Statement as S;
    match stmt {
        S::Query(query) => blank_literals_query(query),
        S::Insert(insert) => {
            if let Some(source) = insert.source.as_mut() {
                blank_literals_query(source);
            }
        }
        S::Update { assignments, selection, .. } => {
            for assignment in assignments {
                blank_literals_expr(&mut assignment.value);
            }
            if let Some(expr) = selection {
                blank_literals_expr(expr);
            }
        }
        S::Delete(delete) => {
            if let Some(expr) = delete.selection.as_mut() {
                blank_literals_expr(expr);
            }
        }
        _ => {}
    }
}

fn blank_literals_query(query: &mut sqlparser::ast::Query) {
    blank_literals_set_expr(query.body.as_mut());
    if let Some(limit) = query.limit.as_mut() {
        blank_literals_expr(limit);
    }
}

fn blank_literals_set_expr(set_expr: &mut sqlparser::ast::SetExpr) {
    use sqlparser::ast::SetExpr;
    match set_expr {
        SetExpr::Select(select) => blank_literals_select(select),
        SetExpr::Query(query) => blank_literals_query(query),
        SetExpr::SetOperation { left, right, .. } => {
            blank_literals_set_expr(left);
            blank_literals_set_expr(right);
        }
        SetExpr::Values(values) => {
            for row in &mut values.rows {
                for expr in row {
                    blank_literals_expr(expr);
                }
            }
        }
        _ => {}
    }
}

fn blank_literals_select(select: &mut sqlparser::ast::Select) {
    for item in &mut select.projection {
        blank_literals_select_item(item);
    }
    for table_with_joins in &mut select.from {
        blank_literals_table_with_joins(table_with_joins);
    }
    if let Some(expr) = select.selection.as_mut() {
        blank_literals_expr(expr);
    }
    if let Some(expr) = select.having.as_mut() {
        blank_literals_expr(expr);
    }
}

fn blank_literals_select_item(item: &mut sqlparser::ast::SelectItem) {
    use sqlparser::ast::SelectItem;
    match item {
        SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => blank_literals_expr(expr),
        _ => {}
    }
}

fn blank_literals_table_with_joins(table_with_joins: &mut sqlparser::ast::TableWithJoins) {
    blank_literals_table_factor(&mut table_with_joins.relation);
    for join in &mut table_with_joins.joins {
        blank_literals_table_factor(&mut join.relation);
        blank_literals_join_operator(&mut join.join_operator);
    }
}

fn blank_literals_table_factor(factor: &mut sqlparser::ast::TableFactor) {
    use sqlparser::ast::TableFactor;
    match factor {
        TableFactor::Derived { subquery, .. } => blank_literals_query(subquery),
        TableFactor::NestedJoin { table_with_joins, .. } => blank_literals_table_with_joins(table_with_joins),
        _ => {}
    }
}

fn blank_literals_join_operator(op: &mut sqlparser::ast::JoinOperator) {
    use sqlparser::ast::JoinOperator::{FullOuter, Inner, LeftOuter, RightOuter};
    match op {
        Inner(constraint) | LeftOuter(constraint) | RightOuter(constraint) | FullOuter(constraint) => {
            if let sqlparser::ast::JoinConstraint::On(expr) = constraint {
                blank_literals_expr(expr);
            }
        }
        _ => {}
    }
}

const SENTINEL: &str = "?";

fn blank_literals_expr(expr: &mut Expr) {
    match expr {
        Expr::Value(v) => {
            *v = Value::Placeholder(SENTINEL.to_string());
        }
        Expr::BinaryOp { left, right, .. } => {
            blank_literals_expr(left);
            blank_literals_expr(right);
        }
        Expr::UnaryOp { expr, .. } | Expr::Nested(expr) | Expr::IsNull(expr) | Expr::IsNotNull(expr) => {
            blank_literals_expr(expr);
        }
        Expr::InList { expr, list, .. } => {
            blank_literals_expr(expr);
            for item in list {
                blank_literals_expr(item);
            }
        }
        Expr::Between { expr, low, high, .. } => {
            blank_literals_expr(expr);
            blank_literals_expr(low);
            blank_literals_expr(high);
        }
        Expr::Like { expr, pattern, .. } | Expr::ILike { expr, pattern, .. } => {
            blank_literals_expr(expr);
            blank_literals_expr(pattern);
        }
        _ => {}
    }
}

fn matches_modulo_literals(a: &sqlparser::ast::Statement, b: &sqlparser::ast::Statement) -> bool {
    normalize(a) == normalize(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{RequestContext, Source};

    fn entry(id: i64, sql: &str) -> AllowlistEntry {
        AllowlistEntry { id, sql: sql.to_string() }
    }

    fn client_ctx() -> RequestContext {
        RequestContext::client(Default::default(), Source::Internal, false)
    }

    #[test]
    fn literal_difference_still_matches() {
        let entries = vec![entry(1, "SELECT * FROM t WHERE a = 1")];
        let decision = check("SELECT * FROM t WHERE a = 42", &entries, &client_ctx()).unwrap();
        assert_eq!(decision, Decision::Allowed);
    }

    #[test]
    fn injected_clause_is_denied() {
        let entries = vec![entry(1, "SELECT * FROM t WHERE a = 1")];
        let decision = check("SELECT * FROM t WHERE a = 42 OR 1=1", &entries, &client_ctx()).unwrap();
        assert_eq!(decision, Decision::Denied("query not allowed".to_string()));
    }

    #[test]
    fn admin_bypasses_allowlist() {
        let decision = check("DROP TABLE users", &[], &RequestContext::admin(Source::Internal, false)).unwrap();
        assert_eq!(decision, Decision::Allowed);
    }

    #[test]
    fn malformed_sql_is_bad_request() {
        let err = check("SELEKT * FROM t", &[], &client_ctx()).unwrap_err();
        assert!(matches!(err, GatewayError::BadRequest { .. }));
    }

    #[test]
    fn empty_allowlist_denies_client() {
        let decision = check("SELECT 1", &[], &client_ctx()).unwrap();
        assert!(matches!(decision, Decision::Denied(_)));
    }

    #[test]
    fn projection_literal_difference_still_matches() {
        let entries = vec![entry(1, "SELECT a, 1 FROM t")];
        let decision = check("SELECT a, 2 FROM t", &entries, &client_ctx()).unwrap();
        assert_eq!(decision, Decision::Allowed);
    }

    #[test]
    fn join_on_literal_difference_still_matches() {
        let entries = vec![entry(1, "SELECT * FROM t JOIN u ON t.id = u.id AND u.flag = 1")];
        let decision = check("SELECT * FROM t JOIN u ON t.id = u.id AND u.flag = 2", &entries, &client_ctx()).unwrap();
        assert_eq!(decision, Decision::Allowed);
    }

    #[test]
    fn insert_values_literal_difference_still_matches() {
        let entries = vec![entry(1, "INSERT INTO t (a) VALUES (1)")];
        let decision = check("INSERT INTO t (a) VALUES (2)", &entries, &client_ctx()).unwrap();
        assert_eq!(decision, Decision::Allowed);
    }

    #[test]
    fn insert_with_extra_value_is_denied() {
        let entries = vec![entry(1, "INSERT INTO t (a) VALUES (1)")];
        let decision = check("INSERT INTO t (a, b) VALUES (2, 3)", &entries, &client_ctx()).unwrap();
        assert!(matches!(decision, Decision::Denied(_)));
    }
}
