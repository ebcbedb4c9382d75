//! Pending-request table for handler-initiated round-trips.
//!
//! Single-writer/single-reader in the cooperative scheduler: the job
//! context registers and the dispatcher completes. The mutex is held only
//! for insert/take/drain, never across an await.

use std::collections::HashMap;

use jobbox_shared::{JobboxError, JobboxResult};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

/// What a pending request was asking for. Kept for diagnostics; the
/// completion value is chosen by the response message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Update,
    ResolveSecret,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Update => "update",
            RequestKind::ResolveSecret => "resolve-secret",
        }
    }
}

struct Pending {
    kind: RequestKind,
    waiter: oneshot::Sender<JobboxResult<Value>>,
}

/// Table of in-flight outbound requests keyed by request id.
#[derive(Default)]
pub struct PendingRequests {
    entries: Mutex<HashMap<String, Pending>>,
}

impl PendingRequests {
    /// Register a new request. The returned id is unique for the process
    /// lifetime; the receiver completes exactly once or fails on drain.
    pub fn register(
        &self,
        kind: RequestKind,
    ) -> (String, oneshot::Receiver<JobboxResult<Value>>) {
        let request_id = Uuid::new_v4().to_string();
        let (waiter, receiver) = oneshot::channel();
        self.entries
            .lock()
            .insert(request_id.clone(), Pending { kind, waiter });
        (request_id, receiver)
    }

    /// Complete a request. Unknown or already-completed ids are a no-op,
    /// making duplicate responses harmless.
    pub fn complete(&self, request_id: &str, outcome: JobboxResult<Value>) {
        let Some(pending) = self.entries.lock().remove(request_id) else {
            tracing::debug!(request_id, "Response for unknown request id ignored");
            return;
        };
        tracing::trace!(request_id, kind = pending.kind.as_str(), "Completing request");
        let _ = pending.waiter.send(outcome);
    }

    /// Fail every in-flight request with `message`. Used when the handler
    /// terminates (cancellation or error) with requests still pending.
    pub fn fail_all(&self, message: &str) {
        let drained: Vec<(String, Pending)> = self.entries.lock().drain().collect();
        for (request_id, pending) in drained {
            tracing::debug!(
                request_id,
                kind = pending.kind.as_str(),
                "Draining pending request"
            );
            let _ = pending
                .waiter
                .send(Err(JobboxError::Request(message.to_string())));
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn completes_exactly_once_and_removes_entry() {
        let table = PendingRequests::default();
        let (id, receiver) = table.register(RequestKind::Update);
        assert_eq!(table.len(), 1, "entry present between send and completion");

        table.complete(&id, Ok(json!({"x": 1})));
        assert!(table.is_empty(), "entry removed on completion");

        let value = receiver.await.expect("waiter completed").expect("ok");
        assert_eq!(value, json!({"x": 1}));
    }

    #[tokio::test]
    async fn duplicate_completion_is_a_no_op() {
        let table = PendingRequests::default();
        let (id, receiver) = table.register(RequestKind::ResolveSecret);

        table.complete(&id, Ok(json!("first")));
        table.complete(&id, Ok(json!("second")));

        let value = receiver.await.unwrap().unwrap();
        assert_eq!(value, json!("first"));
    }

    #[test]
    fn unknown_id_is_ignored() {
        let table = PendingRequests::default();
        table.complete("nope", Ok(Value::Null));
        assert!(table.is_empty());
    }

    #[test]
    fn request_ids_are_unique() {
        let table = PendingRequests::default();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..100 {
            let (id, _receiver) = table.register(RequestKind::Update);
            assert!(seen.insert(id), "request ids must never repeat");
        }
    }

    #[tokio::test]
    async fn fail_all_drains_every_waiter() {
        let table = PendingRequests::default();
        let (_id1, rx1) = table.register(RequestKind::Update);
        let (_id2, rx2) = table.register(RequestKind::ResolveSecret);

        table.fail_all("Handler failed");
        assert!(table.is_empty());

        for rx in [rx1, rx2] {
            let err = rx.await.unwrap().unwrap_err();
            assert!(matches!(err, JobboxError::Request(ref m) if m == "Handler failed"));
        }
    }
}
