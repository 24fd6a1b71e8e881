//! The other end of the bridge: a native host that answers requests.
//!
//! [`serve`] reads framed [`Request`]s until the extension closes the pipe and
//! answers each one through a [`Router`]. Use it to build a host program, or
//! to stand in for one in tests.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use crate::error::FrameError;
use crate::message::{empty_object, Action, Request, Response};
use crate::transport::{FrameReader, FrameWriter, MAX_FROM_HOST, MAX_TO_HOST};

type Handler = Box<dyn Fn(&Value) -> Result<Value, String> + Send + Sync>;

/// Maps action names to handlers.
#[derive(Default)]
pub struct Router {
    handlers: HashMap<String, Handler>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `action`, replacing any previous one.
    pub fn on<F>(mut self, action: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.handlers.insert(action.into(), Box::new(handler));
        self
    }

    /// A host with no password store attached.
    ///
    /// Answers `test-connection` and `get-status` truthfully (nothing is
    /// open) and fails the credential lookups.
    pub fn without_backend() -> Self {
        const NO_BACKEND: &str = "No password database is available";
        Self::new()
            .on(Action::TestConnection.as_str(), |_| {
                Ok(json!({
                    "connected": false,
                    "message": "Host reachable, no password database backend",
                }))
            })
            .on(Action::GetStatus.as_str(), |_| {
                Ok(json!({
                    "isOpen": false,
                    "isDatabaseLoaded": false,
                    "databaseName": "",
                }))
            })
            .on(Action::GetCredentials.as_str(), |data| {
                require_field(data, "domain")?;
                Err(NO_BACKEND.to_string())
            })
            .on(Action::SearchCredentials.as_str(), |data| {
                require_field(data, "query")?;
                Err(NO_BACKEND.to_string())
            })
    }

    /// Build the reply envelope for `request`.
    pub fn handle(&self, request: &Request) -> Response {
        let data = if request.data.is_null() {
            empty_object()
        } else {
            request.data.clone()
        };
        let outcome = match self.handlers.get(&request.action) {
            Some(handler) => handler(&data),
            None => Err(format!("Unknown action: {}", request.action)),
        };
        match outcome {
            Ok(result) => Response::ok(request.id, &request.action, result),
            Err(error) => {
                debug!(id = request.id, action = %request.action, %error, "action failed");
                Response::failed(request.id, &request.action, error)
            }
        }
    }
}

/// Non-empty string field `key` of a request payload.
pub fn require_field<'a>(data: &'a Value, key: &str) -> Result<&'a str, String> {
    match data.get(key).and_then(Value::as_str) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(format!("{key} not provided")),
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut actions: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        actions.sort_unstable();
        f.debug_struct("Router").field("actions", &actions).finish()
    }
}

/// Answer requests from `reader` on `writer` until the stream ends.
///
/// A clean end of stream is the normal shutdown and returns `Ok(())`.
/// Frames that do not decode as a request are logged and skipped.
pub async fn serve<R, W>(reader: R, writer: W, router: &Router) -> Result<(), FrameError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = FrameReader::new(reader, MAX_TO_HOST);
    let mut writer = FrameWriter::new(writer, MAX_FROM_HOST);
    loop {
        let request: Request = match reader.read_message().await {
            Ok(Some(request)) => request,
            Ok(None) => {
                info!("extension closed the channel");
                return Ok(());
            }
            Err(e) if !e.breaks_stream() => {
                warn!(error = %e, "skipping malformed request");
                continue;
            }
            Err(e) => return Err(e),
        };
        debug!(id = request.id, action = %request.action, "request received");
        let response = router.handle(&request);
        match writer.write_message(&response).await {
            Ok(_) => {}
            // Reply too large: tell the caller instead of dropping the request.
            Err(FrameError::TooLarge { size, max }) => {
                let fallback = Response::failed(
                    request.id,
                    &request.action,
                    format!("response too large ({size} bytes, max {max})"),
                );
                writer.write_message(&fallback).await?;
            }
            Err(e) => return Err(e),
        }
    }
}

/// [`serve`] over this process's stdin/stdout.
///
/// Nothing else may write to stdout while this runs.
pub async fn serve_stdio(router: &Router) -> Result<(), FrameError> {
    serve(tokio::io::stdin(), tokio::io::stdout(), router).await
}
