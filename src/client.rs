//! Request/response correlation on top of a [`ConnectionManager`].

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{BridgeConfig, Limits};
use crate::connection::{ConnectionManager, ConnectionState, Connector, ProcessConnector};
use crate::error::{BridgeError, Result};
use crate::message::{Action, Request, Response};
use crate::pending::{PendingReply, PendingTable, REQUEST_TIMEOUT};

/// Client side of the native-messaging bridge.
///
/// Any number of tasks may call [`Bridge::send`] concurrently through a
/// shared reference; each gets its own reply.
pub struct Bridge<C: Connector> {
    connection: ConnectionManager<C>,
    pending: PendingTable,
    timeout: Duration,
}

impl Bridge<ProcessConnector> {
    /// Bridge to the host program named in `config`.
    pub fn from_config(config: &BridgeConfig) -> Result<Self> {
        Ok(Self::with_limits(config.connector()?, config.limits))
    }
}

impl<C: Connector> Bridge<C> {
    pub fn new(connector: C) -> Self {
        Self::with_limits(connector, Limits::default())
    }

    pub fn with_limits(connector: C, limits: Limits) -> Self {
        let pending = PendingTable::new();
        Self {
            connection: ConnectionManager::new(connector, pending.clone(), limits),
            pending,
            timeout: REQUEST_TIMEOUT,
        }
    }

    pub async fn connect(&self) -> Result<()> {
        self.connection.connect().await
    }

    pub async fn disconnect(&self) {
        self.connection.disconnect().await
    }

    pub async fn state(&self) -> ConnectionState {
        self.connection.state().await
    }

    /// Requests currently awaiting a reply.
    pub fn pending(&self) -> &PendingTable {
        &self.pending
    }

    /// Send `action` and wait for the host's reply.
    pub async fn send(&self, action: &str, payload: Value) -> Result<Value> {
        self.submit(action, payload).await?.await
    }

    /// Queue `action` for the host and return the reply future without waiting on it.
    ///
    /// Connects first if needed. Only the connect step can wait on I/O; the
    /// write itself happens on the connection's writer task. Once this
    /// returns `Ok`, the reply will settle exactly once.
    pub async fn submit(&self, action: &str, payload: Value) -> Result<PendingReply> {
        let mut link = self.connection.lock_connected().await?;
        let id = link.allocate_id();
        let reply = self.pending.register(id, self.timeout);
        let request = Request {
            id,
            action: action.to_string(),
            data: payload,
        };
        match link.enqueue(&request) {
            Ok(len) => debug!(id, action, len, "request queued"),
            Err(e) => {
                self.pending.remove(id);
                warn!(id, action, error = %e, "failed to send request");
                return Err(BridgeError::Send {
                    id,
                    source: Arc::new(e),
                });
            }
        }
        Ok(reply)
    }

    pub async fn test_connection(&self) -> Result<Value> {
        self.send(Action::TestConnection.as_str(), json!({})).await
    }

    pub async fn get_status(&self) -> Result<Value> {
        self.send(Action::GetStatus.as_str(), json!({})).await
    }

    pub async fn get_credentials(&self, domain: &str) -> Result<Value> {
        self.send(Action::GetCredentials.as_str(), json!({ "domain": domain }))
            .await
    }

    pub async fn search_credentials(&self, query: &str) -> Result<Value> {
        self.send(Action::SearchCredentials.as_str(), json!({ "query": query }))
            .await
    }
}

/// Route one raw inbound frame to its pending request.
///
/// A frame that is valid JSON with a numeric `id` but not a valid reply
/// still fails that request, rather than leaving it to time out.
pub(crate) fn dispatch_frame(pending: &PendingTable, frame: &[u8]) {
    let e = match serde_json::from_slice::<Response>(frame) {
        Ok(response) => {
            dispatch_response(pending, response);
            return;
        }
        Err(e) => e,
    };
    let id = serde_json::from_slice::<Value>(frame)
        .ok()
        .and_then(|v| v.get("id").and_then(Value::as_u64));
    match id {
        Some(id) => {
            let message = format!("malformed reply from native host: {e}");
            if pending.reject(id, BridgeError::PeerReported { message }) {
                warn!(id, error = %e, "rejected request with malformed reply");
            } else {
                warn!(id, error = %e, "malformed reply for unknown request id; discarding");
            }
        }
        None => warn!(len = frame.len(), error = %e, "discarding undecodable reply"),
    }
}

/// Settle the request `response` answers. Returns `false` (and logs) when no
/// request with that id is waiting.
pub fn dispatch_response(pending: &PendingTable, response: Response) -> bool {
    let id = response.id;
    let action = response.action.clone();
    let settled = match response.into_result() {
        Ok(data) => pending.resolve(id, data),
        Err(message) => pending.reject(id, BridgeError::PeerReported { message }),
    };
    if settled {
        debug!(id, %action, "reply settled");
    } else {
        warn!(id, %action, "reply for unknown request id; discarding");
    }
    settled
}
