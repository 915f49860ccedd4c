//! Row-level security: AST rewriting to inject policy predicates.
//!
//! Policies gate which `(table, action)` pairs may execute at all, and
//! apply predicates (SELECT/UPDATE/DELETE) or forced column values
//! (INSERT) to every matching statement. See spec §4.6 for the
//! gate-then-apply algorithm this module implements.

use std::collections::{HashMap, HashSet};

use gateway_error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlparser::ast::{
    BinaryOperator, Expr, Ident, ObjectName, Statement as SqlStatement, Value as SqlValue,
};

use crate::ast::Statement;
use crate::context::RequestContext;

/// The action a policy applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    /// Matches SELECT statements.
    Select,
    /// Matches INSERT statements.
    Insert,
    /// Matches UPDATE statements.
    Update,
    /// Matches DELETE statements.
    Delete,
    /// Matches any action.
    #[serde(rename = "*")]
    Any,
}

impl Action {
    /// Parse the `actions` column's stored text (e.g. `"SELECT"`, `"*"`).
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "SELECT" => Some(Self::Select),
            "INSERT" => Some(Self::Insert),
            "UPDATE" => Some(Self::Update),
            "DELETE" => Some(Self::Delete),
            "*" => Some(Self::Any),
            _ => None,
        }
    }
}

/// Comparison operator used when rendering a SELECT/UPDATE/DELETE predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    /// `=`
    Eq,
    /// `!=`
    Neq,
    /// `<`
    Lt,
    /// `<=`
    Lte,
    /// `>`
    Gt,
    /// `>=`
    Gte,
    /// `LIKE`
    Like,
    /// `IN` — `value` is a comma-separated list.
    In,
}

impl Operator {
    fn to_binary_op(self) -> Option<BinaryOperator> {
        match self {
            Self::Eq => Some(BinaryOperator::Eq),
            Self::Neq => Some(BinaryOperator::NotEq),
            Self::Lt => Some(BinaryOperator::Lt),
            Self::Lte => Some(BinaryOperator::LtEq),
            Self::Gt => Some(BinaryOperator::Gt),
            Self::Gte => Some(BinaryOperator::GtEq),
            Self::Like | Self::In => None,
        }
    }
}

/// The declared type of a policy's `value` column, used for literal casting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    /// Value renders as a quoted string literal.
    String,
    /// Value renders as an unquoted numeric literal.
    Number,
}

/// A value, either a literal or an unresolved `context.<key>()` expression.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyValue {
    /// A literal value, cast per `ValueType` when resolved.
    Literal(String),
    /// `context.<key>()`, resolved against `RequestContext.claims` at load time.
    ContextClaim(String),
}

impl PolicyValue {
    /// Parse a raw stored `value` string into a context expression or a literal.
    ///
    /// Recognizes `context.<key>()`. Anything else is treated as a literal.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Some(rest) = trimmed.strip_prefix("context.") {
            if let Some(key) = rest.strip_suffix("()") {
                return Self::ContextClaim(key.to_string());
            }
        }
        Self::Literal(trimmed.to_string())
    }

    /// Resolve this value against the request context, producing the final
    /// literal text to render into SQL.
    fn resolve(&self, context: &RequestContext) -> Result<String> {
        match self {
            Self::Literal(s) => Ok(s.clone()),
            Self::ContextClaim(key) => {
                let claim = context
                    .resolve_claim(key)
                    .ok_or_else(|| GatewayError::forbidden(format!("missing claim '{key}' for RLS policy")))?;
                Ok(json_value_to_text(claim))
            }
        }
    }
}

fn json_value_to_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// One row-level security rule, as persisted in `tmp_rls_policies`.
#[derive(Debug, Clone)]
pub struct Policy {
    /// Action this rule applies to.
    pub action: Action,
    /// Optional schema qualifier.
    pub schema: Option<String>,
    /// Unqualified table name this rule governs.
    pub table: String,
    /// Column the predicate/forced value applies to.
    pub column: String,
    /// Literal or context-claim value.
    pub value: PolicyValue,
    /// How to cast `value` once resolved.
    pub value_type: ValueType,
    /// Comparison operator for SELECT/UPDATE/DELETE predicates.
    pub operator: Operator,
}

impl Policy {
    fn applies_to(&self, action: Action) -> bool {
        self.action == Action::Any || self.action == action
    }
}

/// Rewrite `stmt` in place per the loaded policy set, or deny it.
///
/// # Errors
///
/// Returns `GatewayError::Forbidden` when a target table has policies for
/// other actions but none for the action being performed, or when a
/// context-claim value cannot be resolved.
pub fn rewrite(sql: &str, policies: &[Policy], context: &RequestContext, dialect: crate::ast::Dialect) -> Result<String> {
    let mut stmt = Statement::parse(sql, dialect)?;

    // PRAGMA and other non-DML/DQL statements pass through untouched.
    let Some(action) = statement_action(&stmt.ast) else {
        return Ok(stmt.render());
    };

    let tables_with_rules = build_table_action_index(policies);
    let targets = target_tables(&stmt.ast);

    for table in &targets {
        if let Some(allowed_actions) = tables_with_rules.get(table) {
            if !allowed_actions.contains(&action) && !allowed_actions.contains(&Action::Any) {
                return Err(GatewayError::forbidden_by_rule(
                    format!("action {action:?} not permitted on table '{table}'"),
                    table.clone(),
                ));
            }
        }
    }

    let matching: Vec<&Policy> = policies
        .iter()
        .filter(|p| targets.contains(&p.table) && p.applies_to(action))
        .collect();

    if matching.is_empty() {
        return Ok(stmt.render());
    }

    match action {
        Action::Select | Action::Update | Action::Delete => {
            apply_predicates(&mut stmt.ast, &matching, context)?;
        }
        Action::Insert => {
            apply_insert_policy(&mut stmt.ast, &matching, context)?;
        }
        Action::Any => {}
    }

    Ok(stmt.render())
}

fn statement_action(stmt: &SqlStatement) -> Option<Action> {
    match stmt {
        SqlStatement::Query(_) => Some(Action::Select),
        SqlStatement::Insert(_) => Some(Action::Insert),
        SqlStatement::Update { .. } => Some(Action::Update),
        SqlStatement::Delete(_) => Some(Action::Delete),
        _ => None,
    }
}

fn build_table_action_index(policies: &[Policy]) -> HashMap<String, HashSet<Action>> {
    let mut index: HashMap<String, HashSet<Action>> = HashMap::new();
    for policy in policies {
        index.entry(policy.table.clone()).or_default().insert(policy.action);
    }
    index
}

/// Extract the unqualified target table names for a statement.
fn target_tables(stmt: &SqlStatement) -> HashSet<String> {
    let mut names = HashSet::new();
    match stmt {
        SqlStatement::Insert(insert) => {
            names.insert(unqualified(&insert.table_name));
        }
        SqlStatement::Update { table, .. } => {
            names.insert(unqualified_str(&table.relation.to_string()));
        }
        SqlStatement::Delete(delete) => {
            for t in &delete.tables {
                names.insert(unqualified(t));
            }
            let from_tables = match &delete.from {
                sqlparser::ast::FromTable::WithFromKeyword(tables)
                | sqlparser::ast::FromTable::WithoutKeyword(tables) => tables,
            };
            for t in from_tables {
                names.insert(unqualified_str(&t.relation.to_string()));
            }
        }
        SqlStatement::Query(query) => {
            collect_query_tables(query, &mut names);
        }
        _ => {}
    }
    names
}

fn collect_query_tables(query: &sqlparser::ast::Query, names: &mut HashSet<String>) {
    use sqlparser::ast::SetExpr;
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            collect_query_tables(&cte.query, names);
        }
    }
    if let SetExpr::Select(select) = query.body.as_ref() {
        for twj in &select.from {
            collect_table_factor(&twj.relation, names);
            for join in &twj.joins {
                collect_table_factor(&join.relation, names);
            }
        }
    }
}

fn collect_table_factor(factor: &sqlparser::ast::TableFactor, names: &mut HashSet<String>) {
    use sqlparser::ast::TableFactor;
    match factor {
        TableFactor::Table { name, .. } => {
            names.insert(unqualified(name));
        }
        TableFactor::Derived { subquery, .. } => collect_query_tables(subquery, names),
        TableFactor::NestedJoin { table_with_joins, .. } => {
            collect_table_factor(&table_with_joins.relation, names);
            for join in &table_with_joins.joins {
                collect_table_factor(&join.relation, names);
            }
        }
        _ => {}
    }
}

fn unqualified(name: &ObjectName) -> String {
    name.0.last().map(|ident| ident.value.clone()).unwrap_or_default()
}

fn unqualified_str(name: &str) -> String {
    name.rsplit('.').next().unwrap_or(name).trim_matches('"').to_string()
}

fn apply_predicates(stmt: &mut SqlStatement, policies: &[&Policy], context: &RequestContext) -> Result<()> {
    let mut predicate: Option<Expr> = None;
    for policy in policies {
        let new_pred = policy_predicate(policy, context)?;
        predicate = Some(match predicate {
            Some(existing) => Expr::BinaryOp {
                left: Box::new(Expr::Nested(Box::new(existing))),
                op: BinaryOperator::And,
                right: Box::new(Expr::Nested(Box::new(new_pred))),
            },
            None => new_pred,
        });
    }
    let Some(predicate) = predicate else { return Ok(()) };

    match stmt {
        SqlStatement::Query(query) => {
            if let sqlparser::ast::SetExpr::Select(select) = query.body.as_mut() {
                select.selection = Some(combine_and(select.selection.take(), predicate));
            }
        }
        SqlStatement::Update { selection, .. } => {
            *selection = Some(combine_and(selection.take(), predicate));
        }
        SqlStatement::Delete(delete) => {
            delete.selection = Some(combine_and(delete.selection.take(), predicate));
        }
        _ => {}
    }
    Ok(())
}

/// Combine an existing WHERE clause with a new predicate via `AND`,
/// parenthesizing the existing clause so a client-supplied `OR 1=1`
/// cannot associate out of its original scope.
fn combine_and(existing: Option<Expr>, new_predicate: Expr) -> Expr {
    match existing {
        Some(existing) => Expr::BinaryOp {
            left: Box::new(Expr::Nested(Box::new(existing))),
            op: BinaryOperator::And,
            right: Box::new(Expr::Nested(Box::new(new_predicate))),
        },
        None => new_predicate,
    }
}

fn policy_predicate(policy: &Policy, context: &RequestContext) -> Result<Expr> {
    let resolved = policy.value.resolve(context)?;
    let literal = render_literal(&resolved, policy.value_type);
    let column = Expr::Identifier(Ident::new(policy.column.clone()));

    Ok(match policy.operator {
        Operator::Like => Expr::Like { negated: false, expr: Box::new(column), pattern: Box::new(literal), escape_char: None },
        Operator::In => {
            let list = resolved.split(',').map(|v| render_literal(v.trim(), policy.value_type)).collect();
            Expr::InList { expr: Box::new(column), list, negated: false }
        }
        op => {
            let binop = op.to_binary_op().unwrap_or(BinaryOperator::Eq);
            Expr::BinaryOp { left: Box::new(column), op: binop, right: Box::new(literal) }
        }
    })
}

fn render_literal(value: &str, value_type: ValueType) -> Expr {
    match value_type {
        ValueType::Number => value
            .parse::<f64>()
            .map(|n| Expr::Value(SqlValue::Number(format!("{n}"), false)))
            .unwrap_or_else(|_| Expr::Value(SqlValue::SingleQuotedString(value.to_string()))),
        ValueType::String => Expr::Value(SqlValue::SingleQuotedString(value.to_string())),
    }
}

/// Apply INSERT policies: overwrite each value tuple's column at the
/// policy's index with the policy value. Per spec §9, a column absent
/// from the statement's column list is left untouched — never added.
fn apply_insert_policy(stmt: &mut SqlStatement, policies: &[&Policy], context: &RequestContext) -> Result<()> {
    let SqlStatement::Insert(insert) = stmt else { return Ok(()) };

    let column_index: HashMap<String, usize> =
        insert.columns.iter().enumerate().map(|(i, ident)| (ident.value.clone(), i)).collect();

    let Some(source) = insert.source.as_mut() else { return Ok(()) };
    let sqlparser::ast::SetExpr::Values(values) = source.body.as_mut() else { return Ok(()) };

    for policy in policies {
        let Some(&idx) = column_index.get(&policy.column) else {
            // Column omitted entirely: leave the statement as-is (Open Question #1).
            continue;
        };
        let resolved = policy.value.resolve(context)?;
        let literal = render_literal(&resolved, policy.value_type);
        for row in &mut values.rows {
            if idx < row.len() {
                row[idx] = literal.clone();
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Dialect;
    use crate::context::{RequestContext, Source};
    use std::collections::HashMap as StdHashMap;

    fn client_with_claim(key: &str, value: &str) -> RequestContext {
        let mut claims = StdHashMap::new();
        claims.insert(key.to_string(), JsonValue::String(value.to_string()));
        RequestContext::client(claims, Source::Internal, false)
    }

    fn select_policy(column: &str, value: PolicyValue) -> Policy {
        Policy {
            action: Action::Select,
            schema: None,
            table: "users".to_string(),
            column: column.to_string(),
            value,
            value_type: ValueType::String,
            operator: Operator::Eq,
        }
    }

    #[test]
    fn injected_or_cannot_escape_the_policy_predicate() {
        let ctx = client_with_claim("sub", "U");
        let policies = vec![select_policy("id", PolicyValue::ContextClaim("id".to_string()))];
        let rewritten = rewrite(
            "SELECT * FROM users WHERE name = 'Alice' OR 1=1",
            &policies,
            &ctx,
            Dialect::Sqlite,
        )
        .unwrap();
        assert_eq!(rewritten, "SELECT * FROM users WHERE (name = 'Alice' OR 1 = 1) AND (id = 'U')");
    }

    #[test]
    fn insert_forces_column_value() {
        let ctx = client_with_claim("sub", "U");
        let policy = Policy {
            action: Action::Insert,
            schema: None,
            table: "todos".to_string(),
            column: "user_id".to_string(),
            value: PolicyValue::ContextClaim("id".to_string()),
            value_type: ValueType::String,
            operator: Operator::Eq,
        };
        let rewritten =
            rewrite("INSERT INTO todos(user_id,text) VALUES('27','x')", &[policy], &ctx, Dialect::Sqlite).unwrap();
        assert_eq!(rewritten, "INSERT INTO todos (user_id, text) VALUES ('U', 'x')");
    }

    #[test]
    fn insert_with_omitted_column_is_untouched() {
        let ctx = client_with_claim("sub", "U");
        let policy = Policy {
            action: Action::Insert,
            schema: None,
            table: "todos".to_string(),
            column: "user_id".to_string(),
            value: PolicyValue::ContextClaim("id".to_string()),
            value_type: ValueType::String,
            operator: Operator::Eq,
        };
        let rewritten = rewrite("INSERT INTO todos(text) VALUES('x')", &[policy], &ctx, Dialect::Sqlite).unwrap();
        assert_eq!(rewritten, "INSERT INTO todos (text) VALUES ('x')");
    }

    #[test]
    fn table_without_matching_action_policy_is_forbidden() {
        let ctx = client_with_claim("sub", "U");
        let policy = Policy {
            action: Action::Insert,
            schema: None,
            table: "todos".to_string(),
            column: "user_id".to_string(),
            value: PolicyValue::Literal("U".to_string()),
            value_type: ValueType::String,
            operator: Operator::Eq,
        };
        let err = rewrite("DELETE FROM todos WHERE id = 1", &[policy], &ctx, Dialect::Sqlite).unwrap_err();
        assert!(matches!(err, GatewayError::Forbidden { .. }));
    }

    #[test]
    fn table_without_any_policy_is_unchanged() {
        let ctx = client_with_claim("sub", "U");
        let rewritten = rewrite("SELECT * FROM posts", &[], &ctx, Dialect::Sqlite).unwrap();
        assert_eq!(rewritten, "SELECT * FROM posts");
    }

    #[test]
    fn pragma_passes_through_untouched() {
        let ctx = client_with_claim("sub", "U");
        let rewritten = rewrite("PRAGMA table_info(users)", &[], &ctx, Dialect::Sqlite).unwrap();
        assert_eq!(rewritten, "PRAGMA table_info(users)");
    }

    #[test]
    fn context_claim_expression_parses() {
        assert_eq!(PolicyValue::parse("context.id()"), PolicyValue::ContextClaim("id".to_string()));
        assert_eq!(PolicyValue::parse("'literal-value'"), PolicyValue::Literal("'literal-value'".to_string()));
    }
}
