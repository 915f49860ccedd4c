//! WebSocket transport (spec §4.9): one session per connection, tracked
//! in a registry, each inbound `{action:"query", ...}` frame run through
//! the pipeline and replied to on the same socket.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use gateway_core::context::{RequestContext, Source};
use gateway_core::pipeline::{PipelineRequest, StatementRequest};

use crate::state::AppState;

/// Registry entry for a live socket session.
#[derive(Debug, Clone)]
pub struct SocketHandle {
    /// Millisecond epoch timestamp the connection was accepted.
    pub connected_at: i64,
}

/// Inbound socket frame (spec §6): `{action:"query", sql, params?}`.
#[derive(Debug, Deserialize)]
struct InboundFrame {
    action: String,
    sql: Option<String>,
    #[serde(default)]
    params: Vec<serde_json::Value>,
}

/// Drive one accepted WebSocket connection end to end.
pub async fn handle_connection(socket: WebSocket, state: AppState, context: RequestContext) {
    let session_id = Uuid::new_v4();
    let connected_at = chrono::Utc::now().timestamp_millis();
    state.sockets.insert(session_id, SocketHandle { connected_at });
    tracing::info!(session = %session_id, "socket session opened");

    let (mut sender, mut receiver) = socket.split();
    let mut close_reason = "client disconnected";

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                let reply = handle_frame(&text, &state, &context).await;
                if sender.send(Message::Text(reply.into())).await.is_err() {
                    close_reason = "failed to write to socket";
                    break;
                }
            }
            Ok(Message::Ping(data)) => {
                let _ = sender.send(Message::Pong(data)).await;
            }
            Ok(Message::Close(_)) => {
                break;
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(session = %session_id, error = %err, "socket read error");
                close_reason = "protocol error";
                break;
            }
        }
    }

    let _ = sender
        .send(Message::Close(Some(CloseFrame { code: 1000, reason: close_reason.into() })))
        .await;
    state.sockets.remove(&session_id);
    tracing::info!(session = %session_id, reason = close_reason, "socket session closed");
}

async fn handle_frame(text: &str, state: &AppState, context: &RequestContext) -> String {
    let frame: InboundFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(err) => return json!({"error": format!("invalid frame: {err}")}).to_string(),
    };

    if frame.action != "query" {
        return json!({"error": format!("unknown action: {}", frame.action)}).to_string();
    }

    let Some(sql) = frame.sql else {
        return json!({"error": "missing sql"}).to_string();
    };

    let request = PipelineRequest::Single(StatementRequest { sql, params: frame.params });
    match state.pipeline.run(request, context.clone(), false).await {
        Ok(result) => match result {
            gateway_core::pipeline::ExecResult::Shaped(rows) => json!({"result": rows}).to_string(),
            gateway_core::pipeline::ExecResult::Raw(envelope) => json!({"result": envelope}).to_string(),
        },
        Err(err) => json!({"error": err.to_string()}).to_string(),
    }
}

/// Resolve the caller's source/cache preference for a socket session.
///
/// Sockets cannot set per-request headers, so source/cache are fixed for
/// the lifetime of the connection from the initial upgrade's query string.
#[must_use]
pub fn source_from_query(raw_query: Option<&str>) -> Source {
    let source = raw_query
        .and_then(|q| url_decode_param(q, "source"))
        .unwrap_or_default();
    Source::from_header(Some(source.as_str()))
}

/// Whether the `cache=true` query parameter was set on the upgrade URL.
#[must_use]
pub fn cache_from_query(raw_query: Option<&str>) -> bool {
    raw_query.and_then(|q| url_decode_param(q, "cache")).as_deref() == Some("true")
}

/// Extract the bearer token from a socket upgrade's `?token=` query parameter.
#[must_use]
pub fn token_from_query(raw_query: Option<&str>) -> Option<String> {
    raw_query.and_then(|q| url_decode_param(q, "token"))
}

fn url_decode_param(query: &str, key: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        if k == key { Some(v.replace('+', " ")) } else { None }
    })
}
