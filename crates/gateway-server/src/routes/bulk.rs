//! Bulk export/import of tables and whole-database dumps (spec §1, §6):
//! a minimal CSV/JSON/SQL-dump codec layered over the same pipeline the
//! REST facade and `/query` use — exported/imported rows still pass
//! through the allowlist and RLS, they are never read or written directly
//! against the backend.

use std::collections::HashMap;
use std::fmt::Write as _;

use axum::{
    extract::{Extension, Path, Query, State},
    response::{IntoResponse, Response},
};
use serde_json::{Map, Value as JsonValue, json};

use gateway_core::context::RequestContext;
use gateway_core::pipeline::{ExecResult, PipelineRequest, RawEnvelope, StatementRequest};
use gateway_db::identifier::is_safe_bare_identifier;
use gateway_error::{GatewayError, Result};

use crate::routes::rest::{build_insert, quote_identifier};
use crate::state::AppState;

/// On-the-wire shape selected by the `?format=` query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Csv,
    Sql,
}

impl Format {
    fn from_query(query: &HashMap<String, String>) -> Self {
        match query.get("format").map(String::as_str) {
            Some("csv") => Self::Csv,
            Some("sql") => Self::Sql,
            _ => Self::Json,
        }
    }

    fn content_type(self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Csv => "text/csv",
            Self::Sql => "application/sql",
        }
    }
}

/// `POST /export/:table`: dump one table's rows in the requested format.
pub async fn export_table_handler(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Path(table): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let format = Format::from_query(&query);
    match export_table(&state, context, &table, format).await {
        Ok(body) => (axum::http::StatusCode::OK, [("Content-Type", format.content_type())], body).into_response(),
        Err(err) => err.into_response(),
    }
}

/// `GET /export/database`: dump every user table. Restricted to the admin
/// role since it enumerates the whole schema, not just tables the caller
/// already knows about.
pub async fn export_database_handler(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if !context.is_admin() {
        return GatewayError::forbidden("whole-database export is restricted to the admin role").into_response();
    }
    let format = Format::from_query(&query);
    let schema = match state.schema_for(context.source) {
        Ok(schema) => schema,
        Err(err) => return err.into_response(),
    };
    let tables = match schema.tables().await {
        Ok(tables) => tables,
        Err(err) => return err.into_response(),
    };

    match export_database(&state, context, &tables, format).await {
        Ok(body) => (axum::http::StatusCode::OK, [("Content-Type", format.content_type())], body).into_response(),
        Err(err) => err.into_response(),
    }
}

/// `POST /import/:table`: insert every row the body decodes to, one
/// `INSERT` per row dispatched through the pipeline. Returns `200` if
/// every row succeeded, `207 Multi-Status` with a per-row summary if some
/// did not (spec §6's response envelope).
pub async fn import_table_handler(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Path(table): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    body: axum::body::Bytes,
) -> Response {
    let format = Format::from_query(&query);
    let text = match String::from_utf8(body.to_vec()) {
        Ok(text) => text,
        Err(_) => return GatewayError::bad_request("import body must be UTF-8").into_response(),
    };

    let rows = match format {
        Format::Json => decode_json_rows(&text),
        Format::Csv => decode_csv_rows(&text),
        Format::Sql => decode_sql_rows(&text),
    };
    let rows = match rows {
        Ok(rows) => rows,
        Err(err) => return err.into_response(),
    };
    if rows.is_empty() {
        return GatewayError::bad_request("import body contained no rows").into_response();
    }

    let mut outcomes = Vec::with_capacity(rows.len());
    let mut failures = 0usize;
    for (index, row) in rows.into_iter().enumerate() {
        let result = import_one_row(&state, context.clone(), &table, &row).await;
        match result {
            Ok(()) => outcomes.push(json!({"index": index, "status": "ok"})),
            Err(err) => {
                failures += 1;
                outcomes.push(json!({"index": index, "status": "error", "error": err.to_string()}));
            }
        }
    }

    let status = if failures == 0 { axum::http::StatusCode::OK } else { axum::http::StatusCode::MULTI_STATUS };
    (status, axum::Json(json!({"result": outcomes}))).into_response()
}

async fn import_one_row(state: &AppState, context: RequestContext, table: &str, row: &Map<String, JsonValue>) -> Result<()> {
    let (sql, params) = build_insert(table, row, context.source, state.external_kind)?;
    let request = PipelineRequest::Single(StatementRequest { sql, params });
    state.pipeline.run(request, context, false).await?;
    Ok(())
}

async fn export_table(state: &AppState, context: RequestContext, table: &str, format: Format) -> Result<String> {
    let (columns, rows) = select_all(state, &context, table).await?;
    Ok(encode(table, &columns, &rows, format))
}

async fn export_database(state: &AppState, context: RequestContext, tables: &[String], format: Format) -> Result<String> {
    match format {
        Format::Json => {
            let mut object = Map::new();
            for table in tables {
                let (columns, rows) = select_all(state, &context, table).await?;
                object.insert(table.clone(), rows_to_json_array(&columns, &rows));
            }
            Ok(serde_json::to_string_pretty(&JsonValue::Object(object)).unwrap_or_default())
        }
        Format::Csv | Format::Sql => {
            let mut text = String::new();
            for table in tables {
                let (columns, rows) = select_all(state, &context, table).await?;
                let _ = writeln!(text, "-- table: {table}");
                text.push_str(&encode(table, &columns, &rows, format));
                text.push('\n');
            }
            Ok(text)
        }
    }
}

async fn select_all(state: &AppState, context: &RequestContext, table: &str) -> Result<(Vec<String>, Vec<Vec<JsonValue>>)> {
    if !is_safe_bare_identifier(table) {
        return Err(GatewayError::bad_request("invalid table name"));
    }
    let quoted = quote_identifier(table, context.source, state.external_kind);
    let request = PipelineRequest::Single(StatementRequest { sql: format!("SELECT * FROM {quoted}"), params: vec![] });
    match state.pipeline.run(request, context.clone(), true).await? {
        ExecResult::Raw(RawEnvelope { columns, rows, .. }) => Ok((columns, rows)),
        ExecResult::Shaped(_) => Err(GatewayError::internal("expected a raw envelope for table export")),
    }
}

fn encode(table: &str, columns: &[String], rows: &[Vec<JsonValue>], format: Format) -> String {
    match format {
        Format::Json => serde_json::to_string_pretty(&rows_to_json_array(columns, rows)).unwrap_or_default(),
        Format::Csv => encode_csv(columns, rows),
        Format::Sql => encode_sql_dump(table, columns, rows),
    }
}

fn rows_to_json_array(columns: &[String], rows: &[Vec<JsonValue>]) -> JsonValue {
    JsonValue::Array(
        rows.iter()
            .map(|row| {
                let mut object = Map::new();
                for (column, value) in columns.iter().zip(row) {
                    object.insert(column.clone(), value.clone());
                }
                JsonValue::Object(object)
            })
            .collect(),
    )
}

fn decode_json_rows(text: &str) -> Result<Vec<Map<String, JsonValue>>> {
    let parsed: Vec<Map<String, JsonValue>> =
        serde_json::from_str(text).map_err(|e| GatewayError::bad_request(format!("invalid JSON import body: {e}")))?;
    Ok(parsed)
}

fn encode_csv(columns: &[String], rows: &[Vec<JsonValue>]) -> String {
    let mut text = String::new();
    text.push_str(&columns.iter().map(|c| csv_escape(c)).collect::<Vec<_>>().join(","));
    text.push('\n');
    for row in rows {
        text.push_str(&row.iter().map(json_value_to_csv_field).collect::<Vec<_>>().join(","));
        text.push('\n');
    }
    text
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn json_value_to_csv_field(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::String(s) => csv_escape(s),
        other => csv_escape(&other.to_string()),
    }
}

fn decode_csv_rows(text: &str) -> Result<Vec<Map<String, JsonValue>>> {
    let mut lines = text.lines();
    let header = lines.next().ok_or_else(|| GatewayError::bad_request("empty CSV import body"))?;
    let columns = split_csv_line(header);
    let mut rows = Vec::new();
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        let fields = split_csv_line(line);
        if fields.len() != columns.len() {
            return Err(GatewayError::bad_request("CSV row has the wrong number of fields"));
        }
        let mut row = Map::new();
        for (column, field) in columns.iter().zip(fields) {
            row.insert(column.clone(), csv_field_to_json(&field));
        }
        rows.push(row);
    }
    Ok(rows)
}

fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                current.push(c);
            }
        } else if c == '"' {
            in_quotes = true;
        } else if c == ',' {
            fields.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    fields.push(current);
    fields
}

fn csv_field_to_json(field: &str) -> JsonValue {
    if field.is_empty() {
        JsonValue::Null
    } else if let Ok(n) = field.parse::<i64>() {
        json!(n)
    } else if let Ok(f) = field.parse::<f64>() {
        json!(f)
    } else {
        JsonValue::String(field.to_string())
    }
}

fn encode_sql_dump(table: &str, columns: &[String], rows: &[Vec<JsonValue>]) -> String {
    let mut text = String::new();
    let quoted_columns: Vec<String> = columns.iter().map(|c| format!("\"{c}\"")).collect();
    for row in rows {
        let values: Vec<String> = row.iter().map(sql_dump_value).collect();
        let _ = writeln!(text, "INSERT INTO \"{table}\" ({}) VALUES ({});", quoted_columns.join(", "), values.join(", "));
    }
    text
}

fn sql_dump_value(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => "NULL".to_string(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::String(s) => format!("'{}'", s.replace('\'', "''")),
        other => format!("'{}'", other.to_string().replace('\'', "''")),
    }
}

/// Rows dispatched through the pipeline one `INSERT` at a time; a dump
/// produced by [`encode_sql_dump`] (one statement per line, no embedded
/// semicolons) round-trips through this. A semicolon inside a string
/// value would split a statement early — acceptable for the minimal
/// codec this endpoint promises.
fn decode_sql_rows(text: &str) -> Result<Vec<Map<String, JsonValue>>> {
    let mut rows = Vec::new();
    for statement in text.split(';') {
        let statement = statement.trim();
        if statement.is_empty() || statement.starts_with("--") {
            continue;
        }
        let (columns, values) = parse_insert_statement(statement)?;
        let mut row = Map::new();
        for (column, raw_value) in columns.into_iter().zip(values) {
            row.insert(column, parse_sql_value(&raw_value));
        }
        rows.push(row);
    }
    Ok(rows)
}

fn parse_insert_statement(statement: &str) -> Result<(Vec<String>, Vec<String>)> {
    let upper = statement.to_ascii_uppercase();
    let values_pos =
        upper.find("VALUES").ok_or_else(|| GatewayError::bad_request("expected a VALUES clause in the SQL dump"))?;
    let before = &statement[..values_pos];
    let after = statement[values_pos + "VALUES".len()..].trim();

    let open = before.find('(').ok_or_else(|| GatewayError::bad_request("expected a column list in the SQL dump"))?;
    let close = before.rfind(')').ok_or_else(|| GatewayError::bad_request("expected a column list in the SQL dump"))?;
    let columns = parse_sql_column_list(&before[open..=close]);

    let values_open = after.find('(').ok_or_else(|| GatewayError::bad_request("expected a value list in the SQL dump"))?;
    let values_close = after.rfind(')').ok_or_else(|| GatewayError::bad_request("expected a value list in the SQL dump"))?;
    let values = split_sql_values(&after[values_open + 1..values_close]);

    if columns.len() != values.len() {
        return Err(GatewayError::bad_request("column/value count mismatch in the SQL dump"));
    }
    Ok((columns, values))
}

fn parse_sql_column_list(raw: &str) -> Vec<String> {
    raw.trim()
        .trim_start_matches('(')
        .trim_end_matches(')')
        .split(',')
        .map(|c| c.trim().trim_matches(|ch| ch == '"' || ch == '`' || ch == '\'').to_string())
        .collect()
}

fn split_sql_values(list: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_string = false;
    let mut chars = list.chars().peekable();
    while let Some(c) = chars.next() {
        if in_string {
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    current.push('\'');
                    chars.next();
                } else {
                    in_string = false;
                    current.push(c);
                }
            } else {
                current.push(c);
            }
        } else if c == '\'' {
            in_string = true;
            current.push(c);
        } else if c == ',' {
            parts.push(current.trim().to_string());
            current = String::new();
        } else {
            current.push(c);
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

fn parse_sql_value(raw: &str) -> JsonValue {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("null") {
        JsonValue::Null
    } else if trimmed.eq_ignore_ascii_case("true") {
        JsonValue::Bool(true)
    } else if trimmed.eq_ignore_ascii_case("false") {
        JsonValue::Bool(false)
    } else if trimmed.len() >= 2 && trimmed.starts_with('\'') && trimmed.ends_with('\'') {
        JsonValue::String(trimmed[1..trimmed.len() - 1].replace("''", "'"))
    } else if let Ok(n) = trimmed.parse::<i64>() {
        json!(n)
    } else if let Ok(f) = trimmed.parse::<f64>() {
        json!(f)
    } else {
        JsonValue::String(trimmed.to_string())
    }
}
