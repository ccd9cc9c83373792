//! Request correlation: pending-id table plus notification fan-out.
//!
//! Every in-flight call registers its id here and receives a oneshot
//! handle that resolves exactly once - either with the matching response
//! or, if the connection faults first, by the sender being dropped (the
//! caller observes that as connection-lost). Decoded values whose `id`
//! does not match a pending entry are unsolicited and are published to
//! every current subscriber, in wire order.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::{broadcast, oneshot};

/// Buffered unsolicited notifications per subscriber before lagging.
const NOTIFICATION_BUFFER: usize = 64;

pub(crate) struct Correlator {
    /// In-flight request ids. Each entry resolves at most once; entries
    /// are removed the instant their response arrives or the connection
    /// faults.
    pending: Mutex<HashMap<u64, oneshot::Sender<Value>>>,
    notify_tx: broadcast::Sender<Value>,
}

impl Correlator {
    pub fn new() -> Self {
        let (notify_tx, _) = broadcast::channel(NOTIFICATION_BUFFER);
        Self {
            pending: Mutex::new(HashMap::new()),
            notify_tx,
        }
    }

    /// Insert a pending entry for `id` and return its resolution handle.
    pub fn register(&self, id: u64) -> oneshot::Receiver<Value> {
        let (tx, rx) = oneshot::channel();
        self.lock_pending().insert(id, tx);
        rx
    }

    /// Remove a pending entry without resolving it (e.g. the request was
    /// never written). The caller's handle resolves as connection-lost.
    pub fn discard(&self, id: u64) {
        self.lock_pending().remove(&id);
    }

    /// Route one decoded value: resolve the matching pending call, or
    /// publish it as an unsolicited notification.
    ///
    /// An object carrying an `id` that is not (or no longer) pending is
    /// treated as unsolicited - classification is purely by table
    /// membership, never by shape.
    pub fn dispatch(&self, value: Value) {
        if let Some(id) = value.get("id").and_then(Value::as_u64) {
            if let Some(tx) = self.lock_pending().remove(&id) {
                // Receiver may have been dropped; that is a silent no-op.
                let _ = tx.send(value);
                return;
            }
        }
        // No subscribers is fine for fire-and-forget delivery.
        let _ = self.notify_tx.send(value);
    }

    /// Resolve every still-pending handle as connection-lost by dropping
    /// its sender. No handle is left unresolved.
    pub fn fail_all(&self) {
        self.lock_pending().clear();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.notify_tx.subscribe()
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<Value>>> {
        // Held only for map operations, never across await points.
        self.pending.lock().expect("pending table lock poisoned")
    }
}
