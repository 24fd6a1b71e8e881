//! # keepass_bridge
//!
//! The extension side of a **browser Native Messaging** link to a local
//! password-manager host (KeePass bridge):
//!
//! - Frame JSON messages the way browsers do (length prefix + UTF-8 JSON)
//! - Correlate replies to requests by id, with per-request timeouts
//! - Survive the host going away: every waiting caller hears about it promptly
//!
//! ---
//!
//! ## Wire protocol
//!
//! 1. The sender writes a **4-byte length prefix** (`u32`) in **native endianness**.
//! 2. Then writes **that many bytes** of UTF-8 JSON.
//!
//! Requests and replies use a small envelope:
//!
//! ```text
//! -> {"id": 1, "action": "get-status", "data": {}}
//! <- {"id": 1, "action": "get-status", "success": true, "data": {"isOpen": true}}
//! <- {"id": 2, "action": "get-credentials", "success": false, "error": "Domain not provided"}
//! ```
//!
//! Ids are assigned by the bridge, start at 1 on every new connection and
//! only ever go up.
//!
//! ### Most important gotchas (read this first)
//!
//! - **Disconnect is normal:** when the host exits, every in-flight request fails
//!   with [`BridgeError::ConnectionLost`]. The next [`Bridge::send`] reconnects.
//! - **Timeouts are fixed:** a request with no reply after 30 s fails with
//!   [`BridgeError::Timeout`]. Nothing is retried for you.
//! - **Message limits:** outgoing frames are capped at 64 MiB and incoming ones at
//!   1 MiB by default (see [`config::Limits`]).
//! - **Never log to stdout in a host:** stdout is the protocol channel. This crate
//!   logs through `tracing`; the bundled binary sends it to stderr.
//!
//! ---
//!
//! ## Crate layout
//!
//! - [`transport`]: framing over any async (or blocking) byte stream.
//! - [`pending`]: the in-flight request table and its timers.
//! - [`connection`]: connect/disconnect lifecycle and the [`Connector`] seam.
//! - [`client`]: [`Bridge`], the correlation engine callers talk to.
//! - [`host`]: the answering side, for writing hosts or standing one in for tests.
//! - [`config`]: TOML configuration.
//!
//! ---
//!
//! ## Quick start
//!
//! ```no_run
//! use keepass_bridge::{Bridge, BridgeError, ProcessConnector};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), BridgeError> {
//!     let bridge = Bridge::new(ProcessConnector::new("/usr/local/bin/keepass-host"));
//!
//!     match bridge.get_credentials("example.com").await {
//!         Ok(found) => eprintln!("credentials: {found}"),
//!         Err(e) if e.is_timeout() => eprintln!("host did not answer in time"),
//!         Err(e) if e.is_connection_error() => eprintln!("host not reachable: {e}"),
//!         Err(e) => eprintln!("request failed: {e}"),
//!     }
//!
//!     bridge.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Pure framing (runnable example)
//!
//! ```rust
//! use keepass_bridge::transport::{decode_message, encode_message, MAX_TO_HOST};
//! use serde_json::json;
//! use std::io::Cursor;
//!
//! let msg = json!({"id": 1, "action": "get-status", "data": {}});
//! let frame = encode_message(&msg, MAX_TO_HOST).unwrap();
//!
//! let mut cur = Cursor::new(frame);
//! let raw = decode_message(&mut cur, MAX_TO_HOST).unwrap().unwrap();
//! let back: serde_json::Value = serde_json::from_str(&raw).unwrap();
//! assert_eq!(back, msg);
//! ```
//!
//! ## Writing a host
//!
//! ```no_run
//! use keepass_bridge::host::{serve_stdio, Router};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), keepass_bridge::FrameError> {
//!     let router = Router::new().on("get-status", |_| Ok(json!({ "isOpen": true })));
//!     serve_stdio(&router).await
//! }
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod host;
pub mod message;
pub mod pending;
pub mod transport;

#[doc(inline)]
pub use client::Bridge;
#[doc(inline)]
pub use config::BridgeConfig;
#[doc(inline)]
pub use connection::{Channel, ConnectionState, Connector, ProcessConnector};
#[doc(inline)]
pub use error::{BridgeError, FrameError};
#[doc(inline)]
pub use message::{Action, Request, Response};
#[doc(inline)]
pub use pending::{PendingTable, REQUEST_TIMEOUT};
