//! `/query`, `/query/raw` and `/status` handlers (spec §4.9, §6).

use axum::{
    Json,
    extract::{Extension, State, WebSocketUpgrade},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};

use gateway_core::context::{RequestContext, Source};
use gateway_core::pipeline::{ExecResult, PipelineRequest, StatementRequest};
use gateway_error::GatewayError;

use crate::socket;
use crate::state::AppState;

/// Body accepted by `/query` and `/query/raw`: either a single statement
/// or an atomic batch.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum QueryBody {
    /// `{sql, params?}`.
    Single {
        /// SQL text.
        sql: String,
        /// Positional bind parameters.
        #[serde(default)]
        params: Vec<JsonValue>,
    },
    /// `{transaction: [{sql, params?}, ...]}`.
    Batch {
        /// Ordered statements, committed atomically.
        transaction: Vec<StatementBody>,
    },
}

#[derive(Debug, Deserialize)]
struct StatementBody {
    sql: String,
    #[serde(default)]
    params: Vec<JsonValue>,
}

impl From<QueryBody> for PipelineRequest {
    fn from(body: QueryBody) -> Self {
        match body {
            QueryBody::Single { sql, params } => PipelineRequest::Single(StatementRequest { sql, params }),
            QueryBody::Batch { transaction } => PipelineRequest::Batch(
                transaction.into_iter().map(|s| StatementRequest { sql: s.sql, params: s.params }).collect(),
            ),
        }
    }
}

/// `POST /query`: shaped rows.
pub async fn query_handler(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Json(body): Json<QueryBody>,
) -> Response {
    run_query(&state, context, body, false).await
}

/// `POST /query/raw`: the raw `{columns, rows, meta}` envelope.
pub async fn query_raw_handler(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Json(body): Json<QueryBody>,
) -> Response {
    run_query(&state, context, body, true).await
}

async fn run_query(state: &AppState, context: RequestContext, body: QueryBody, raw: bool) -> Response {
    let request = PipelineRequest::from(body);
    match state.pipeline.run(request, context, raw).await {
        Ok(ExecResult::Shaped(rows)) => (axum::http::StatusCode::OK, Json(json!({"result": rows}))).into_response(),
        Ok(ExecResult::Raw(envelope)) => (axum::http::StatusCode::OK, Json(json!({"result": envelope}))).into_response(),
        Err(err) => err.into_response(),
    }
}

/// `GET /status`: `{status:"reachable", timestamp, usedDisk}`.
pub async fn status_handler(State(state): State<AppState>) -> Response {
    let timestamp = chrono::Utc::now().to_rfc3339();
    let used_disk = std::fs::metadata(state.database_path.as_str()).map(|m| m.len()).unwrap_or(0);
    (axum::http::StatusCode::OK, Json(json!({"status": "reachable", "timestamp": timestamp, "usedDisk": used_disk})))
        .into_response()
}

/// `GET /socket`: upgrade to a WebSocket session, authenticating via the
/// `?token=` query parameter since browsers cannot set headers on the
/// upgrade request (spec §6).
pub async fn socket_handler(ws: WebSocketUpgrade, State(state): State<AppState>, uri: axum::http::Uri) -> Response {
    let query = uri.query();
    let Some(token) = socket::token_from_query(query) else {
        return GatewayError::unauthenticated("missing ?token= query parameter").into_response();
    };
    let source = socket::source_from_query(query);
    let cache = socket::cache_from_query(query);

    let context = match state.auth.authenticate(&token, source, cache).await {
        Ok(context) => context,
        Err(err) => return err.into_response(),
    };

    ws.on_upgrade(move |socket| socket::handle_connection(socket, state, context))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_body_converts_to_single_request() {
        let body = QueryBody::Single { sql: "SELECT 1".into(), params: vec![] };
        match PipelineRequest::from(body) {
            PipelineRequest::Single(stmt) => assert_eq!(stmt.sql, "SELECT 1"),
            PipelineRequest::Batch(_) => panic!("expected Single"),
        }
    }

    #[test]
    fn batch_body_converts_to_batch_request() {
        let body = QueryBody::Batch {
            transaction: vec![
                StatementBody { sql: "INSERT INTO t VALUES (1)".into(), params: vec![] },
                StatementBody { sql: "UPDATE t SET a = 2".into(), params: vec![] },
            ],
        };
        match PipelineRequest::from(body) {
            PipelineRequest::Batch(stmts) => assert_eq!(stmts.len(), 2),
            PipelineRequest::Single(_) => panic!("expected Batch"),
        }
    }

    #[test]
    fn source_defaults_internal_when_absent_from_query() {
        assert_eq!(socket::source_from_query(None), Source::Internal);
        assert_eq!(socket::source_from_query(Some("source=external")), Source::External);
    }
}
