//! Outstanding outbound requests keyed by id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::types::{JsonRpcMessage, McpError, McpResult, RequestId};

type Outcome = McpResult<Value>;

/// Each entry resolves exactly once: by its response, by local removal, or by [`close_all`].
///
/// [`close_all`]: PendingRequests::close_all
pub struct PendingRequests {
    next_id: AtomicI64,
    closed: AtomicBool,
    entries: Mutex<HashMap<RequestId, oneshot::Sender<Outcome>>>,
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingRequests {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            closed: AtomicBool::new(false),
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<RequestId, oneshot::Sender<Outcome>>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Allocate a fresh numeric id, skipping any still pending, and register it.
    pub fn register(&self) -> McpResult<(RequestId, oneshot::Receiver<Outcome>)> {
        let mut entries = self.entries();
        if self.closed.load(Ordering::Acquire) {
            return Err(McpError::ConnectionClosed);
        }
        let id = loop {
            let candidate = RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed));
            if !entries.contains_key(&candidate) {
                break candidate;
            }
        };
        let (tx, rx) = oneshot::channel();
        entries.insert(id.clone(), tx);
        Ok((id, rx))
    }

    /// Register a caller-chosen id.
    pub fn insert(&self, id: RequestId) -> McpResult<oneshot::Receiver<Outcome>> {
        let mut entries = self.entries();
        if self.closed.load(Ordering::Acquire) {
            return Err(McpError::ConnectionClosed);
        }
        if entries.contains_key(&id) {
            return Err(McpError::InvalidRequest(format!(
                "Request id {id} is already pending"
            )));
        }
        let (tx, rx) = oneshot::channel();
        entries.insert(id, tx);
        Ok(rx)
    }

    /// Resolve and remove the entry for `id`. Returns false when none was pending.
    pub fn resolve(&self, id: &RequestId, outcome: Outcome) -> bool {
        let Some(tx) = self.entries().remove(id) else {
            return false;
        };
        // The waiter may have gone away already; nothing else to do then.
        let _ = tx.send(outcome);
        true
    }

    /// Route an inbound response or error response to its waiter.
    ///
    /// Late or unknown responses are logged and dropped.
    pub fn resolve_message(&self, message: JsonRpcMessage) {
        let (id, outcome) = match message {
            JsonRpcMessage::Response(r) => (r.id, Ok(r.result)),
            JsonRpcMessage::Error(e) => (e.id, Err(McpError::from(e.error))),
            other => {
                tracing::warn!(method = ?other.method(), "Not a response; ignoring");
                return;
            }
        };
        if !self.resolve(&id, outcome) {
            tracing::debug!(%id, "Dropping response with no pending request");
        }
    }

    /// Forget `id` without resolving it.
    pub fn remove(&self, id: &RequestId) -> bool {
        self.entries().remove(id).is_some()
    }

    /// Fail every entry with [`McpError::ConnectionClosed`] and refuse new ones.
    pub fn close_all(&self) -> usize {
        let drained: Vec<_> = {
            let mut entries = self.entries();
            self.closed.store(true, Ordering::Release);
            entries.drain().collect()
        };
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(McpError::ConnectionClosed));
        }
        if count > 0 {
            tracing::debug!(count, "Failed pending requests on close");
        }
        count
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{JsonRpcError, JsonRpcResponse};
    use serde_json::json;

    #[tokio::test]
    async fn response_resolves_matching_entry() {
        let table = PendingRequests::new();
        let (id, rx) = table.register().unwrap();

        table.resolve_message(JsonRpcResponse::new(id, json!({"ok": true})).into());
        assert_eq!(rx.await.unwrap().unwrap(), json!({"ok": true}));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn error_response_becomes_remote_error() {
        let table = PendingRequests::new();
        let (id, rx) = table.register().unwrap();

        table.resolve_message(JsonRpcError::new(id, -32601, "Method not found: x".into()).into());
        match rx.await.unwrap() {
            Err(McpError::Remote { code, .. }) => assert_eq!(code, -32601),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn allocation_skips_ids_still_pending() {
        let table = PendingRequests::new();
        let _held = table.insert(RequestId::Number(1)).unwrap();
        let _held2 = table.insert(RequestId::Number(2)).unwrap();

        let (id, _rx) = table.register().unwrap();
        assert_eq!(id, RequestId::Number(3));
    }

    #[test]
    fn ids_are_unique_while_outstanding() {
        let table = PendingRequests::new();
        let mut seen = std::collections::HashSet::new();
        let mut receivers = Vec::new();
        for _ in 0..100 {
            let (id, rx) = table.register().unwrap();
            assert!(seen.insert(id));
            receivers.push(rx);
        }
        assert_eq!(table.len(), 100);
    }

    #[test]
    fn duplicate_explicit_id_is_rejected() {
        let table = PendingRequests::new();
        let _rx = table.insert("a".into()).unwrap();
        assert!(table.insert("a".into()).is_err());
    }

    #[tokio::test]
    async fn close_all_fails_every_waiter() {
        let table = PendingRequests::new();
        let one = table.insert("1".into()).unwrap();
        let two = table.insert("2".into()).unwrap();

        assert_eq!(table.close_all(), 2);
        assert!(matches!(one.await.unwrap(), Err(McpError::ConnectionClosed)));
        assert!(matches!(two.await.unwrap(), Err(McpError::ConnectionClosed)));
        assert!(matches!(table.register(), Err(McpError::ConnectionClosed)));
    }

    #[test]
    fn unknown_response_is_dropped() {
        let table = PendingRequests::new();
        table.resolve_message(JsonRpcResponse::new(RequestId::Number(99), json!({})).into());
        assert!(!table.resolve(&RequestId::Number(99), Ok(json!({}))));
    }
}
