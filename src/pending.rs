//! In-flight request bookkeeping.
//!
//! Every entry is settled exactly once: by a response, by its timer, or by a
//! connection-wide drain. Whichever path removes the entry from the map wins;
//! the others find nothing and become no-ops.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::debug;

use crate::error::{BridgeError, Result};

/// How long a request may stay unanswered.
pub const REQUEST_TIMEOUT: Duration = Duration::from_millis(30_000);

struct Entry {
    tx: oneshot::Sender<Result<Value>>,
    timer: AbortHandle,
    // Distinguishes entries that reuse an id after a reconnect, so a stale
    // timer can never expire its successor.
    ticket: u64,
}

#[derive(Default)]
struct Entries {
    map: HashMap<u64, Entry>,
    next_ticket: u64,
}

/// Table of requests awaiting a reply, keyed by message id.
///
/// Cheap to clone; clones share the same table.
#[derive(Clone, Default)]
pub struct PendingTable {
    inner: Arc<Mutex<Entries>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        // Critical sections never panic midway, so a poisoned map is still consistent.
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Track `id` and arm its timer. Must be called inside a Tokio runtime.
    pub fn register(&self, id: u64, timeout: Duration) -> PendingReply {
        let (tx, rx) = oneshot::channel();
        let mut entries = self.lock();
        entries.next_ticket += 1;
        let ticket = entries.next_ticket;

        let table = self.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            table.expire(id, ticket, timeout);
        })
        .abort_handle();

        if let Some(old) = entries.map.insert(id, Entry { tx, timer, ticket }) {
            debug!(id, "dropping stale pending entry with the same id");
            old.timer.abort();
        }
        PendingReply { id, rx }
    }

    /// Settle `id` with a value. Returns whether an entry existed.
    pub fn resolve(&self, id: u64, data: Value) -> bool {
        self.settle(id, Ok(data))
    }

    /// Settle `id` with an error. Returns whether an entry existed.
    pub fn reject(&self, id: u64, error: BridgeError) -> bool {
        self.settle(id, Err(error))
    }

    fn settle(&self, id: u64, outcome: Result<Value>) -> bool {
        let Some(entry) = self.lock().map.remove(&id) else {
            debug!(id, "no pending request for id; ignoring");
            return false;
        };
        entry.timer.abort();
        if entry.tx.send(outcome).is_err() {
            debug!(id, "caller stopped waiting before settlement");
        }
        true
    }

    fn expire(&self, id: u64, ticket: u64, timeout: Duration) {
        let mut entries = self.lock();
        if entries.map.get(&id).is_some_and(|e| e.ticket == ticket) {
            if let Some(entry) = entries.map.remove(&id) {
                debug!(id, "request timed out");
                let _ = entry.tx.send(Err(BridgeError::Timeout(timeout)));
            }
        }
    }

    /// Forget `id` without settling it. Used when the request never left.
    pub fn remove(&self, id: u64) -> bool {
        match self.lock().map.remove(&id) {
            Some(entry) => {
                entry.timer.abort();
                true
            }
            None => false,
        }
    }

    /// Fail every pending entry with `error` and empty the table.
    /// Returns how many entries were failed.
    pub fn drain_all_with_error(&self, error: BridgeError) -> usize {
        let drained: Vec<(u64, Entry)> = self.lock().map.drain().collect();
        let n = drained.len();
        for (id, entry) in drained {
            entry.timer.abort();
            if entry.tx.send(Err(error.clone())).is_err() {
                debug!(id, "caller stopped waiting before drain");
            }
        }
        n
    }

    /// Empty the table without reporting anything. Waiting callers observe
    /// [`BridgeError::ConnectionLost`].
    pub fn clear(&self) -> usize {
        let drained: Vec<Entry> = self.lock().map.drain().map(|(_, e)| e).collect();
        for entry in &drained {
            entry.timer.abort();
        }
        drained.len()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.lock().map.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Future resolving to the outcome of one registered request.
#[derive(Debug)]
pub struct PendingReply {
    id: u64,
    rx: oneshot::Receiver<Result<Value>>,
}

impl PendingReply {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Future for PendingReply {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(BridgeError::ConnectionLost)),
            Poll::Pending => Poll::Pending,
        }
    }
}
