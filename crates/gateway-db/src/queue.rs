//! Single-writer operation queue.
//!
//! Every statement destined for the embedded store funnels through one
//! FIFO channel serviced by a single background worker, so writers never
//! interleave regardless of how many concurrent callers the transport
//! layer has (spec I4). Each ticket carries a deadline; a ticket that
//! sits in the queue past its deadline is failed with
//! `GatewayError::Timeout` rather than executed late.

use std::time::Duration;

use gateway_error::{GatewayError, Result};
use serde_json::Value as JsonValue;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::storage::StorageExecutor;
use crate::RawRowSet;

/// Default per-operation deadline, per spec §4.2/§5.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(25);

enum Ticket {
    Single { sql: String, params: Vec<JsonValue>, deadline: Instant, reply: oneshot::Sender<Result<RawRowSet>> },
    Transaction {
        statements: Vec<(String, Vec<JsonValue>)>,
        deadline: Instant,
        reply: oneshot::Sender<Result<Vec<RawRowSet>>>,
    },
}

/// Handle to the background writer task. Clone freely — every clone
/// shares the same channel and therefore the same single worker.
#[derive(Clone)]
pub struct OperationQueue {
    sender: mpsc::Sender<Ticket>,
}

impl OperationQueue {
    /// Spawn the worker loop over `executor` with the default channel
    /// depth (256) and default per-ticket timeout.
    #[must_use]
    pub fn spawn(executor: StorageExecutor) -> Self {
        Self::spawn_with(executor, 256, DEFAULT_TIMEOUT)
    }

    /// Spawn the worker loop with a custom channel depth and timeout.
    #[must_use]
    pub fn spawn_with(executor: StorageExecutor, channel_depth: usize, timeout: Duration) -> Self {
        let (sender, mut receiver) = mpsc::channel::<Ticket>(channel_depth);

        tokio::spawn(async move {
            while let Some(ticket) = receiver.recv().await {
                match ticket {
                    Ticket::Single { sql, params, deadline, reply } => {
                        if Instant::now() > deadline {
                            warn!(%sql, "ticket expired before execution");
                            let _ = reply.send(Err(GatewayError::timeout(timeout.as_millis() as u64, "queued statement")));
                            continue;
                        }
                        let result = executor.exec_raw(&sql, &params).await;
                        if result.is_err() {
                            debug!(%sql, "queued statement failed");
                        }
                        let _ = reply.send(result);
                    }
                    Ticket::Transaction { statements, deadline, reply } => {
                        if Instant::now() > deadline {
                            let _ = reply.send(Err(GatewayError::timeout(timeout.as_millis() as u64, "queued transaction")));
                            continue;
                        }
                        let result = executor.transaction_sync(&statements).await;
                        let _ = reply.send(result);
                    }
                }
            }
        });

        Self { sender }
    }

    /// Enqueue a single statement and await its result.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Timeout` if the ticket was not serviced
    /// before its deadline, or whatever the executor returned otherwise.
    pub async fn submit(&self, sql: String, params: Vec<JsonValue>) -> Result<RawRowSet> {
        let (reply, rx) = oneshot::channel();
        let deadline = Instant::now() + DEFAULT_TIMEOUT;
        self.sender
            .send(Ticket::Single { sql, params, deadline, reply })
            .await
            .map_err(|_| GatewayError::internal("operation queue worker has shut down"))?;
        rx.await.map_err(|_| GatewayError::internal("operation queue dropped the reply channel"))?
    }

    /// Number of tickets currently queued or in flight, for the
    /// admin-gated `/metrics` route's queue-depth gauge (spec §2/§6).
    #[must_use]
    pub fn depth(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Enqueue an atomic batch and await its results.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Timeout` if not serviced before its
    /// deadline, or whatever the executor returned otherwise.
    pub async fn submit_transaction(&self, statements: Vec<(String, Vec<JsonValue>)>) -> Result<Vec<RawRowSet>> {
        let (reply, rx) = oneshot::channel();
        let deadline = Instant::now() + DEFAULT_TIMEOUT;
        self.sender
            .send(Ticket::Transaction { statements, deadline, reply })
            .await
            .map_err(|_| GatewayError::internal("operation queue worker has shut down"))?;
        rx.await.map_err(|_| GatewayError::internal("operation queue dropped the reply channel"))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn depth_is_zero_when_idle() {
        let executor = StorageExecutor::in_memory().await.unwrap();
        let queue = OperationQueue::spawn(executor);
        assert_eq!(queue.depth(), 0);
        queue.submit("SELECT 1".to_string(), vec![]).await.unwrap();
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test]
    async fn serializes_concurrent_writers_without_interleaving() {
        let executor = StorageExecutor::in_memory().await.unwrap();
        executor.exec_raw("CREATE TABLE counters(id INTEGER PRIMARY KEY, n INTEGER)", &[]).await.unwrap();
        executor.exec_raw("INSERT INTO counters(id, n) VALUES (1, 0)", &[]).await.unwrap();
        let queue = OperationQueue::spawn(executor.clone());

        let mut handles = Vec::new();
        for _ in 0..20 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                queue.submit("UPDATE counters SET n = n + 1 WHERE id = 1".to_string(), vec![]).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let rows = executor.exec_shaped("SELECT n FROM counters WHERE id = 1", &[]).await.unwrap();
        assert_eq!(rows[0]["n"], serde_json::json!(20));
    }

    #[tokio::test]
    async fn transaction_is_visible_atomically() {
        let executor = StorageExecutor::in_memory().await.unwrap();
        executor.exec_raw("CREATE TABLE todos(id INTEGER PRIMARY KEY, text TEXT)", &[]).await.unwrap();
        let queue = OperationQueue::spawn(executor.clone());

        let batch = vec![
            ("INSERT INTO todos(id, text) VALUES (1, 'a')".to_string(), vec![]),
            ("INSERT INTO todos(id, text) VALUES (2, 'b')".to_string(), vec![]),
        ];
        queue.submit_transaction(batch).await.unwrap();

        let rows = executor.exec_shaped("SELECT * FROM todos ORDER BY id", &[]).await.unwrap();
        assert_eq!(rows.len(), 2);
    }
}
