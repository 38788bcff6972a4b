use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::JanusError;
use crate::protocol::Envelope;

/// Routes long-poll events to the request that is waiting for them.
///
/// Each pending request registers its transaction id and gets a [`Waiter`];
/// the poll loop calls [`resolve`](Self::resolve) with every event that
/// carries a transaction. Cloning shares the same map.
#[derive(Clone, Default)]
pub struct TransactionRegistry {
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<Envelope>>>>,
}

impl std::fmt::Debug for TransactionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionRegistry")
            .field("pending", &self.len())
            .finish()
    }
}

impl TransactionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `transaction`.
    ///
    /// Must happen before the request that triggers the event is sent. An
    /// event resolved before the waiter is awaited is buffered, not lost.
    pub fn register(&self, transaction: &str) -> Result<Waiter, JanusError> {
        let mut pending = self.pending.lock();
        if pending.contains_key(transaction) {
            return Err(JanusError::DuplicateTransaction(transaction.to_string()));
        }
        let (tx, rx) = oneshot::channel();
        pending.insert(transaction.to_string(), tx);
        Ok(Waiter {
            transaction: transaction.to_string(),
            rx,
            pending: self.pending.clone(),
        })
    }

    /// Deliver `event` to the waiter for `transaction` and drop the entry.
    ///
    /// Returns false when nobody is waiting; the event is discarded.
    pub fn resolve(&self, transaction: &str, event: Envelope) -> bool {
        let Some(tx) = self.pending.lock().remove(transaction) else {
            return false;
        };
        tx.send(event).is_ok()
    }

    /// Drop every pending waiter. They fail with
    /// [`JanusError::WaiterDropped`]. Returns how many were pending.
    pub fn clear(&self) -> usize {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        drained.len()
    }

    pub fn contains(&self, transaction: &str) -> bool {
        self.pending.lock().contains_key(transaction)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A single pending transaction.
///
/// Dropping an unresolved waiter removes its registry entry, so an event that
/// arrives later is treated as unclaimed.
#[derive(Debug)]
pub struct Waiter {
    transaction: String,
    rx: oneshot::Receiver<Envelope>,
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<Envelope>>>>,
}

impl Waiter {
    pub fn transaction(&self) -> &str {
        &self.transaction
    }

    /// Wait for the event without a deadline.
    pub async fn wait(mut self) -> Result<Envelope, JanusError> {
        (&mut self.rx)
            .await
            .map_err(|_| JanusError::WaiterDropped(self.transaction.clone()))
    }

    /// Wait for the event, giving up after `timeout`.
    pub async fn wait_timeout(self, timeout: Duration) -> Result<Envelope, JanusError> {
        let transaction = self.transaction.clone();
        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(result) => result,
            Err(_) => Err(JanusError::Timeout {
                transaction,
                after_ms: saturating_millis(timeout),
            }),
        }
    }
}

fn saturating_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl Drop for Waiter {
    fn drop(&mut self) {
        self.rx.close();
        let mut pending = self.pending.lock();
        // Only our own sender observes the closed receiver; a later
        // registration under the same id is left alone.
        if pending
            .get(&self.transaction)
            .is_some_and(|tx| tx.is_closed())
        {
            pending.remove(&self.transaction);
        }
    }
}
