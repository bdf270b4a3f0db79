//! Pending-request table shared by every transport
//!
//! Each transport instance owns exactly one [`PendingTable`]. A caller
//! registers an entry before writing a request, receives a
//! [`PendingGuard`], and awaits [`PendingGuard::wait`]. The entry leaves
//! the table on exactly one of:
//!
//! - a matching response ([`PendingTable::resolve`])
//! - its deadline expiring inside `wait`
//! - a broad failure ([`PendingTable::fail_all`]) on stop or disconnect
//! - the guard being dropped (caller cancelled)
//!
//! The map sits behind a plain `std::sync::Mutex`: critical sections are
//! short, never cross an `.await`, and the guard must be able to clean up
//! from `Drop`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::McpError;
use crate::mcp::types::{JsonRpcResponse, RequestId};

/// Why a pending entry was settled without a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleFailure {
    /// The transport was stopped by its owner
    Stopped,
    /// The transport went away underneath the request
    ConnectionLost(String),
}

impl From<SettleFailure> for McpError {
    fn from(f: SettleFailure) -> Self {
        match f {
            SettleFailure::Stopped => McpError::Stopped,
            SettleFailure::ConnectionLost(reason) => McpError::ConnectionLost(reason),
        }
    }
}

type Settlement = std::result::Result<JsonRpcResponse, SettleFailure>;

#[derive(Debug)]
struct PendingEntry {
    token: u64,
    method: String,
    created_at: Instant,
    tx: oneshot::Sender<Settlement>,
}

/// Table of requests awaiting a response, keyed by request id.
#[derive(Debug, Clone, Default)]
pub struct PendingTable {
    entries: Arc<Mutex<HashMap<RequestId, PendingEntry>>>,
    next_token: Arc<AtomicU64>,
}

impl PendingTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<RequestId, PendingEntry>> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a pending entry for `id` with a deadline `timeout` from now.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::DuplicateRequestId`] if `id` is already in
    /// flight on this table.
    pub fn register(
        &self,
        id: RequestId,
        method: &str,
        timeout: Duration,
    ) -> std::result::Result<PendingGuard, McpError> {
        let (tx, rx) = oneshot::channel();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let created_at = Instant::now();

        let mut entries = self.lock();
        if entries.contains_key(&id) {
            return Err(McpError::DuplicateRequestId(id.to_string()));
        }
        entries.insert(
            id.clone(),
            PendingEntry {
                token,
                method: method.to_string(),
                created_at,
                tx,
            },
        );
        drop(entries);

        Ok(PendingGuard {
            table: self.clone(),
            id,
            method: method.to_string(),
            token,
            timeout,
            deadline: created_at + timeout,
            rx,
        })
    }

    /// Deliver a response to the entry with the matching id.
    ///
    /// Returns `false` when no entry matches (late reply after a timeout,
    /// unsolicited id, or a response with a `null` id).
    pub fn resolve(&self, response: JsonRpcResponse) -> bool {
        let Some(id) = response.id.clone() else {
            tracing::debug!(error = ?response.error, "Dropping MCP response with null id");
            return false;
        };
        let entry = self.lock().remove(&id);
        match entry {
            Some(entry) => {
                tracing::debug!(
                    id = %id,
                    method = %entry.method,
                    elapsed_ms = entry.created_at.elapsed().as_millis() as u64,
                    "MCP response correlated"
                );
                // The receiver may already be gone if the caller was cancelled.
                let _ = entry.tx.send(Ok(response));
                true
            }
            None => {
                tracing::debug!(id = %id, "Dropping MCP response with no pending request");
                false
            }
        }
    }

    /// Settle every pending entry with `failure`. Returns how many were
    /// settled.
    pub fn fail_all(&self, failure: SettleFailure) -> usize {
        let drained: Vec<(RequestId, PendingEntry)> = self.lock().drain().collect();
        let count = drained.len();
        for (id, entry) in drained {
            tracing::debug!(id = %id, method = %entry.method, ?failure, "Settling pending MCP request");
            let _ = entry.tx.send(Err(failure.clone()));
        }
        count
    }

    fn remove_token(&self, id: &RequestId, token: u64) {
        let mut entries = self.lock();
        if entries.get(id).map(|e| e.token) == Some(token) {
            entries.remove(id);
        }
    }

    /// Number of requests currently in flight.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true when nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle for one registered pending entry.
///
/// Dropping the guard removes the entry if it is still in the table, so a
/// cancelled caller never leaves a stale id behind.
#[derive(Debug)]
pub struct PendingGuard {
    table: PendingTable,
    id: RequestId,
    method: String,
    token: u64,
    timeout: Duration,
    deadline: Instant,
    rx: oneshot::Receiver<Settlement>,
}

impl PendingGuard {
    /// Returns the settlement if one has already arrived, without waiting.
    pub fn try_settled(&mut self) -> Option<std::result::Result<JsonRpcResponse, McpError>> {
        match self.rx.try_recv() {
            Ok(Ok(response)) => Some(Ok(response)),
            Ok(Err(failure)) => Some(Err(failure.into())),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(McpError::ConnectionLost(
                "pending request dropped by transport".to_string(),
            ))),
        }
    }

    /// Wait for the response, the deadline, or a broad failure, whichever
    /// comes first.
    ///
    /// # Errors
    ///
    /// - [`McpError::Timeout`] when the deadline expires (the entry is
    ///   removed first, so a late reply is dropped).
    /// - [`McpError::Stopped`] or [`McpError::ConnectionLost`] when the
    ///   table was failed by its transport.
    pub async fn wait(&mut self) -> std::result::Result<JsonRpcResponse, McpError> {
        match tokio::time::timeout_at(self.deadline, &mut self.rx).await {
            Ok(Ok(Ok(response))) => Ok(response),
            Ok(Ok(Err(failure))) => Err(failure.into()),
            Ok(Err(_)) => Err(McpError::ConnectionLost(
                "pending request dropped by transport".to_string(),
            )),
            Err(_) => {
                self.table.remove_token(&self.id, self.token);
                // A response may have raced the deadline.
                if let Ok(Ok(response)) = self.rx.try_recv() {
                    return Ok(response);
                }
                Err(McpError::Timeout {
                    method: self.method.clone(),
                    id: self.id.to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
        }
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.table.remove_token(&self.id, self.token);
    }
}
