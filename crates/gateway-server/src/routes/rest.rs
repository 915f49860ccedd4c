//! REST facade (spec §4.10): maps `/<table>[/<id>]` and an HTTP verb to a
//! generated SQL statement, which is then run through the same pipeline
//! as `/query` — the facade never bypasses the allowlist or RLS.

use std::collections::HashMap;

use axum::{
    Json,
    extract::{Extension, Path, Query, State},
    response::{IntoResponse, Response},
};
use serde_json::{Map, Value as JsonValue, json};

use gateway_core::context::{RequestContext, Source};
use gateway_core::pipeline::{ExecResult, PipelineRequest, StatementRequest};
use gateway_db::identifier::{
    is_safe_bare_identifier, quote_mysql_identifier, quote_postgres_identifier, quote_sqlite_identifier,
};
use gateway_error::{GatewayError, Result};

use crate::config::ExternalKind;
use crate::state::AppState;

const FILTER_SUFFIXES: &[(&str, &str)] =
    &[(".eq", "="), (".ne", "!="), (".gt", ">"), (".lt", "<"), (".gte", ">="), (".lte", "<="), (".like", "LIKE")];

const RESERVED_QUERY_KEYS: &[&str] = &["sort_by", "order", "limit", "offset"];

/// `GET /rest/:table`: list rows, filtered by query-string predicates.
pub async fn list_handler(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Path(table): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    match build_select(&table, None, &query, context.source, state.external_kind) {
        Ok(sql) => dispatch(&state, context, sql, vec![]).await,
        Err(err) => err.into_response(),
    }
}

/// `GET /rest/:table/:id`: fetch by primary key.
pub async fn get_handler(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Path((table, id)): Path<(String, String)>,
) -> Response {
    let schema = match state.schema_for(context.source) {
        Ok(schema) => schema,
        Err(err) => return err.into_response(),
    };
    let pk = match schema.primary_keys(&table).await {
        Ok(pk) if !pk.is_empty() => pk,
        Ok(_) => return GatewayError::bad_request(format!("table {table} has no primary key")).into_response(),
        Err(err) => return err.into_response(),
    };
    match build_select(&table, Some((pk.as_slice(), id.as_str())), &HashMap::new(), context.source, state.external_kind) {
        Ok(sql) => dispatch(&state, context, sql, pk_values(&id)).await,
        Err(err) => err.into_response(),
    }
}

/// `POST /rest/:table`: insert a row from the JSON body.
pub async fn create_handler(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Path(table): Path<String>,
    Json(body): Json<Map<String, JsonValue>>,
) -> Response {
    match build_insert(&table, &body, context.source, state.external_kind) {
        Ok((sql, params)) => dispatch(&state, context, sql, params).await,
        Err(err) => err.into_response(),
    }
}

/// `PATCH /rest/:table/:id`: update the submitted columns only.
pub async fn patch_handler(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Path((table, id)): Path<(String, String)>,
    Json(body): Json<Map<String, JsonValue>>,
) -> Response {
    update(&state, context, &table, &id, &body, false).await
}

/// `PUT /rest/:table/:id`: replace the row — the body must name every
/// non-primary-key column, not just the ones changing.
pub async fn put_handler(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Path((table, id)): Path<(String, String)>,
    Json(body): Json<Map<String, JsonValue>>,
) -> Response {
    update(&state, context, &table, &id, &body, true).await
}

/// `DELETE /rest/:table/:id`.
pub async fn delete_handler(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Path((table, id)): Path<(String, String)>,
) -> Response {
    let schema = match state.schema_for(context.source) {
        Ok(schema) => schema,
        Err(err) => return err.into_response(),
    };
    let pk = match schema.primary_keys(&table).await {
        Ok(pk) if !pk.is_empty() => pk,
        Ok(_) => return GatewayError::bad_request(format!("table {table} has no primary key")).into_response(),
        Err(err) => return err.into_response(),
    };
    if !is_safe_bare_identifier(&table) {
        return GatewayError::bad_request("invalid table name").into_response();
    }
    let placeholders = placeholder_list(pk.len(), context.source, state.external_kind);
    let where_clause = pk
        .iter()
        .zip(&placeholders)
        .map(|(col, ph)| format!("{} = {ph}", quote_identifier(col, context.source, state.external_kind)))
        .collect::<Vec<_>>()
        .join(" AND ");
    let quoted_table = quote_identifier(&table, context.source, state.external_kind);
    let sql = format!("DELETE FROM {quoted_table} WHERE {where_clause}");
    dispatch(&state, context, sql, pk_values(&id)).await
}

async fn update(
    state: &AppState,
    context: RequestContext,
    table: &str,
    id: &str,
    body: &Map<String, JsonValue>,
    require_all_columns: bool,
) -> Response {
    let schema = match state.schema_for(context.source) {
        Ok(schema) => schema,
        Err(err) => return err.into_response(),
    };
    let pk = match schema.primary_keys(table).await {
        Ok(pk) if !pk.is_empty() => pk,
        Ok(_) => return GatewayError::bad_request(format!("table {table} has no primary key")).into_response(),
        Err(err) => return err.into_response(),
    };
    if require_all_columns {
        let columns = match schema.columns(table).await {
            Ok(columns) => columns,
            Err(err) => return err.into_response(),
        };
        let missing: Vec<&String> =
            columns.iter().filter(|col| !pk.contains(col)).filter(|col| !body.contains_key(col.as_str())).collect();
        if !missing.is_empty() {
            let names = missing.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ");
            return GatewayError::bad_request(format!("PUT must supply every non-primary-key column; missing: {names}")).into_response();
        }
    }
    match build_update(table, &pk, body, context.source, state.external_kind) {
        Ok((sql, mut params)) => {
            params.extend(pk_values(id));
            dispatch(state, context, sql, params).await
        }
        Err(err) => err.into_response(),
    }
}

async fn dispatch(state: &AppState, context: RequestContext, sql: String, params: Vec<JsonValue>) -> Response {
    let request = PipelineRequest::Single(StatementRequest { sql, params });
    match state.pipeline.run(request, context, false).await {
        Ok(ExecResult::Shaped(rows)) => (axum::http::StatusCode::OK, Json(json!({"result": rows}))).into_response(),
        Ok(ExecResult::Raw(envelope)) => (axum::http::StatusCode::OK, Json(json!({"result": envelope}))).into_response(),
        Err(err) => err.into_response(),
    }
}

fn placeholder_list(count: usize, source: Source, external_kind: Option<ExternalKind>) -> Vec<String> {
    (1..=count).map(|i| placeholder(i, source, external_kind)).collect()
}

/// Quote a table/column name for the dialect the statement will run
/// against. Names reaching this function have already passed
/// [`is_safe_bare_identifier`], so quoting here is about reserved words
/// and case-folding, not injection — the same defense-in-depth the AST
/// service applies to allowlisted SQL (spec §4.5).
pub(crate) fn quote_identifier(name: &str, source: Source, external_kind: Option<ExternalKind>) -> String {
    match (source, external_kind) {
        (Source::External, Some(ExternalKind::Postgres)) => quote_postgres_identifier(name),
        (Source::External, Some(ExternalKind::Mysql)) => quote_mysql_identifier(name),
        _ => quote_sqlite_identifier(name),
    }
}

fn placeholder(index: usize, source: Source, external_kind: Option<ExternalKind>) -> String {
    match (source, external_kind) {
        (Source::External, Some(ExternalKind::Postgres)) => format!("${index}"),
        _ => "?".to_string(),
    }
}

/// Composite primary keys are addressed in the URL as a comma-separated
/// list, matching the order `primary_keys` returns them in.
fn pk_values(id: &str) -> Vec<JsonValue> {
    id.split(',').map(|part| json!(part)).collect()
}

fn build_select(
    table: &str,
    pk_filter: Option<(&[String], &str)>,
    query: &HashMap<String, String>,
    source: Source,
    external_kind: Option<ExternalKind>,
) -> Result<String> {
    if !is_safe_bare_identifier(table) {
        return Err(GatewayError::bad_request("invalid table name"));
    }

    let mut conditions = Vec::new();
    let mut next_placeholder = 1usize;

    if let Some((pk, _id)) = pk_filter {
        for col in pk {
            if !is_safe_bare_identifier(col) {
                return Err(GatewayError::bad_request("invalid primary key column"));
            }
            let quoted = quote_identifier(col, source, external_kind);
            conditions.push(format!("{quoted} = {}", placeholder(next_placeholder, source, external_kind)));
            next_placeholder += 1;
        }
    }

    for (key, value) in query {
        if RESERVED_QUERY_KEYS.contains(&key.as_str()) {
            continue;
        }
        let (column, operator) = parse_filter_key(key)?;
        let quoted_column = quote_identifier(&column, source, external_kind);
        if operator == "IN" {
            let values: Vec<&str> = value.split(',').collect();
            let placeholders: Vec<String> =
                (0..values.len()).map(|_| { let p = placeholder(next_placeholder, source, external_kind); next_placeholder += 1; p }).collect();
            conditions.push(format!("{quoted_column} IN ({})", placeholders.join(", ")));
        } else {
            conditions.push(format!("{quoted_column} {operator} {}", placeholder(next_placeholder, source, external_kind)));
            next_placeholder += 1;
        }
    }

    let quoted_table = quote_identifier(table, source, external_kind);
    let mut sql = format!("SELECT * FROM {quoted_table}");
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }

    if let Some(sort_by) = query.get("sort_by") {
        if !is_safe_bare_identifier(sort_by) {
            return Err(GatewayError::bad_request("invalid sort_by column"));
        }
        let order = match query.get("order").map(String::as_str) {
            Some("DESC") | Some("desc") => "DESC",
            _ => "ASC",
        };
        let quoted_sort = quote_identifier(sort_by, source, external_kind);
        sql.push_str(&format!(" ORDER BY {quoted_sort} {order}"));
    }
    if let Some(limit) = query.get("limit") {
        let limit: u64 = limit.parse().map_err(|_| GatewayError::bad_request("invalid limit"))?;
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    if let Some(offset) = query.get("offset") {
        let offset: u64 = offset.parse().map_err(|_| GatewayError::bad_request("invalid offset"))?;
        sql.push_str(&format!(" OFFSET {offset}"));
    }

    Ok(sql)
}

fn parse_filter_key(key: &str) -> Result<(String, &'static str)> {
    for (suffix, operator) in FILTER_SUFFIXES {
        if let Some(column) = key.strip_suffix(suffix) {
            if !is_safe_bare_identifier(column) {
                return Err(GatewayError::bad_request("invalid filter column"));
            }
            return Ok((column.to_string(), operator));
        }
    }
    if let Some(column) = key.strip_suffix(".in") {
        if !is_safe_bare_identifier(column) {
            return Err(GatewayError::bad_request("invalid filter column"));
        }
        return Ok((column.to_string(), "IN"));
    }
    Err(GatewayError::bad_request(format!(
        "unrecognized query parameter: {key} (expected a .eq/.ne/.gt/.lt/.gte/.lte/.like/.in suffix)"
    )))
}

pub(crate) fn build_insert(
    table: &str,
    body: &Map<String, JsonValue>,
    source: Source,
    external_kind: Option<ExternalKind>,
) -> Result<(String, Vec<JsonValue>)> {
    if !is_safe_bare_identifier(table) {
        return Err(GatewayError::bad_request("invalid table name"));
    }
    if body.is_empty() {
        return Err(GatewayError::bad_request("request body must supply at least one column"));
    }
    let mut columns = Vec::with_capacity(body.len());
    let mut params = Vec::with_capacity(body.len());
    for (column, value) in body {
        if !is_safe_bare_identifier(column) {
            return Err(GatewayError::bad_request(format!("invalid column name: {column}")));
        }
        columns.push(column.clone());
        params.push(value.clone());
    }
    let placeholders = placeholder_list(columns.len(), source, external_kind);
    let quoted_table = quote_identifier(table, source, external_kind);
    let quoted_columns: Vec<String> = columns.iter().map(|c| quote_identifier(c, source, external_kind)).collect();
    let sql = format!("INSERT INTO {quoted_table} ({}) VALUES ({})", quoted_columns.join(", "), placeholders.join(", "));
    Ok((sql, params))
}

fn build_update(
    table: &str,
    pk: &[String],
    body: &Map<String, JsonValue>,
    source: Source,
    external_kind: Option<ExternalKind>,
) -> Result<(String, Vec<JsonValue>)> {
    if !is_safe_bare_identifier(table) {
        return Err(GatewayError::bad_request("invalid table name"));
    }
    let mut columns = Vec::new();
    let mut params = Vec::new();
    for (column, value) in body {
        if pk.iter().any(|p| p == column) {
            continue;
        }
        if !is_safe_bare_identifier(column) {
            return Err(GatewayError::bad_request(format!("invalid column name: {column}")));
        }
        columns.push(column.clone());
        params.push(value.clone());
    }
    if columns.is_empty() {
        return Err(GatewayError::bad_request("no updatable columns in request body"));
    }

    let mut next_placeholder = 1usize;
    let set_clause: Vec<String> = columns
        .iter()
        .map(|col| {
            let ph = placeholder(next_placeholder, source, external_kind);
            next_placeholder += 1;
            format!("{} = {ph}", quote_identifier(col, source, external_kind))
        })
        .collect();
    let where_clause: Vec<String> = pk
        .iter()
        .map(|col| {
            let ph = placeholder(next_placeholder, source, external_kind);
            next_placeholder += 1;
            format!("{} = {ph}", quote_identifier(col, source, external_kind))
        })
        .collect();

    let quoted_table = quote_identifier(table, source, external_kind);
    let sql = format!("UPDATE {quoted_table} SET {} WHERE {}", set_clause.join(", "), where_clause.join(" AND "));
    Ok((sql, params))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_with_no_filters() {
        let sql = build_select("widgets", None, &HashMap::new(), Source::Internal, None).unwrap();
        assert_eq!(sql, "SELECT * FROM \"widgets\"");
    }

    #[test]
    fn select_rejects_unsafe_table_name() {
        assert!(build_select("widgets; DROP TABLE x", None, &HashMap::new(), Source::Internal, None).is_err());
    }

    #[test]
    fn select_applies_suffix_filters_and_sort() {
        let mut query = HashMap::new();
        query.insert("price.gt".to_string(), "10".to_string());
        query.insert("sort_by".to_string(), "price".to_string());
        query.insert("order".to_string(), "DESC".to_string());
        query.insert("limit".to_string(), "5".to_string());
        let sql = build_select("widgets", None, &query, Source::Internal, None).unwrap();
        assert!(sql.contains("\"price\" > ?"));
        assert!(sql.contains("ORDER BY \"price\" DESC"));
        assert!(sql.contains("LIMIT 5"));
    }

    #[test]
    fn postgres_placeholders_are_dollar_numbered() {
        let mut query = HashMap::new();
        query.insert("a.eq".to_string(), "1".to_string());
        let sql = build_select("t", None, &query, Source::External, Some(ExternalKind::Postgres)).unwrap();
        assert!(sql.contains("\"a\" = $1"));
    }

    #[test]
    fn mysql_identifiers_are_backtick_quoted() {
        let sql = build_select("widgets", None, &HashMap::new(), Source::External, Some(ExternalKind::Mysql)).unwrap();
        assert_eq!(sql, "SELECT * FROM `widgets`");
    }

    #[test]
    fn insert_builds_column_and_placeholder_lists() {
        let mut body = Map::new();
        body.insert("name".to_string(), json!("widget"));
        let (sql, params) = build_insert("widgets", &body, Source::Internal, None).unwrap();
        assert_eq!(sql, "INSERT INTO \"widgets\" (\"name\") VALUES (?)");
        assert_eq!(params, vec![json!("widget")]);
    }

    #[tokio::test]
    async fn put_rejects_body_missing_non_primary_key_columns() {
        let storage = gateway_db::StorageExecutor::in_memory().await.unwrap();
        storage.exec_raw("CREATE TABLE widgets (id INTEGER PRIMARY KEY, name TEXT, price INTEGER)", &[]).await.unwrap();
        let queue = gateway_db::OperationQueue::spawn(storage.clone());
        let backend = std::sync::Arc::new(gateway_db::EmbeddedBackend::new(queue.clone()));
        let pipeline = std::sync::Arc::new(gateway_core::pipeline::GatewayPipeline::new(
            gateway_core::pipeline::PipelineFeatures::default(),
            std::sync::Arc::new(gateway_db::SqliteAllowlist::new(storage.clone())),
            std::sync::Arc::new(gateway_db::SqlitePolicies::new(storage.clone())),
            std::sync::Arc::new(gateway_db::SqliteCache::new(queue.clone())),
            backend,
            None,
        ));
        let auth = crate::middleware::AuthState::new("admin".to_string(), "client".to_string(), None);
        let state = AppState::new(pipeline, std::sync::Arc::new(storage), None, "sqlite::memory:".to_string(), auth, None, queue);
        let mut body = Map::new();
        body.insert("name".to_string(), json!("widget"));
        let response = update(&state, RequestContext::admin(Source::Internal, false), "widgets", "1", &body, true).await;
        assert_eq!(response.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn update_excludes_primary_key_columns_from_set_clause() {
        let mut body = Map::new();
        body.insert("id".to_string(), json!(1));
        body.insert("text".to_string(), json!("y"));
        let (sql, params) = build_update("todos", &["id".to_string()], &body, Source::Internal, None).unwrap();
        assert_eq!(sql, "UPDATE \"todos\" SET \"text\" = ? WHERE \"id\" = ?");
        assert_eq!(params, vec![json!("y")]);
    }
}
