use super::{ToolInvokeError, response_key, response_result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::oneshot;
use tracing::debug;

type Responder = oneshot::Sender<Result<Value, ToolInvokeError>>;

/// Outstanding requests of one connection, keyed by JSON-RPC id.
pub(crate) struct PendingRequests {
    server: String,
    slots: Mutex<HashMap<String, Responder>>,
    id_counter: AtomicU64,
}

impl PendingRequests {
    pub(crate) fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            slots: Mutex::new(HashMap::new()),
            id_counter: AtomicU64::new(1),
        }
    }

    pub(crate) fn next_id(&self) -> String {
        let id = self.id_counter.fetch_add(1, Ordering::SeqCst);
        format!("req-{id}")
    }

    pub(crate) fn register(&self, id: &str) -> oneshot::Receiver<Result<Value, ToolInvokeError>> {
        let (tx, rx) = oneshot::channel();
        self.slots().insert(id.to_string(), tx);
        rx
    }

    /// Drops the slot for `id`. Returns whether the request was still waiting.
    pub(crate) fn release(&self, id: &str) -> bool {
        self.slots().remove(id).is_some()
    }

    /// Routes a response message to whoever is waiting for its id.
    pub(crate) fn resolve(&self, message: Value) {
        let Some(key) = message.get("id").and_then(response_key) else {
            return;
        };
        let responder = self.slots().remove(&key);
        match responder {
            Some(sender) => {
                let _ = sender.send(response_result(&self.server, message));
            }
            None => debug!(
                server = %self.server,
                response_id = key,
                "received response for unknown request"
            ),
        }
    }

    pub(crate) fn fail_all(&self) {
        let drained: Vec<Responder> = self.slots().drain().map(|(_, sender)| sender).collect();
        for sender in drained {
            let _ = sender.send(Err(ToolInvokeError::Terminated {
                server: self.server.clone(),
            }));
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots().len()
    }

    fn slots(&self) -> std::sync::MutexGuard<'_, HashMap<String, Responder>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Runs its action when dropped unless disarmed first. A request future that is
/// dropped mid-flight (for example by a timeout) uses this to release its slot
/// and tell the server to stop working on it.
pub(crate) struct CancelOnDrop {
    action: Option<Box<dyn FnOnce() + Send>>,
}

impl CancelOnDrop {
    pub(crate) fn new(action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            action: Some(Box::new(action)),
        }
    }

    pub(crate) fn disarm(mut self) {
        self.action = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(action) = self.action.take() {
            action();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    #[tokio::test]
    async fn resolves_matching_response() {
        let pending = PendingRequests::new("fs");
        let id = pending.next_id();
        let rx = pending.register(&id);
        pending.resolve(json!({ "jsonrpc": "2.0", "id": id, "result": { "ok": true } }));

        let value = rx.await.expect("responder kept").expect("successful result");
        assert_eq!(value, json!({ "ok": true }));
        assert_eq!(pending.len(), 0);
    }

    #[tokio::test]
    async fn surfaces_rpc_errors() {
        let pending = PendingRequests::new("fs");
        let rx = pending.register("req-7");
        pending.resolve(json!({
            "jsonrpc": "2.0",
            "id": "req-7",
            "error": { "code": -32602, "message": "bad params" }
        }));

        match rx.await.expect("responder kept") {
            Err(ToolInvokeError::Rpc { code, message, .. }) => {
                assert_eq!(code, -32602);
                assert_eq!(message, "bad params");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn fail_all_terminates_waiters() {
        let pending = PendingRequests::new("fs");
        let first = pending.register("a");
        let second = pending.register("b");
        pending.fail_all();

        assert!(matches!(first.await, Ok(Err(ToolInvokeError::Terminated { .. }))));
        assert!(matches!(second.await, Ok(Err(ToolInvokeError::Terminated { .. }))));
    }

    #[test]
    fn ids_are_unique() {
        let pending = PendingRequests::new("fs");
        assert_ne!(pending.next_id(), pending.next_id());
    }

    #[test]
    fn cancel_guard_runs_unless_disarmed() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        drop(CancelOnDrop::new(move || flag.store(true, Ordering::SeqCst)));
        assert!(fired.load(Ordering::SeqCst));

        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        CancelOnDrop::new(move || flag.store(true, Ordering::SeqCst)).disarm();
        assert!(!fired.load(Ordering::SeqCst));
    }
}
