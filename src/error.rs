use std::io;
use std::sync::Arc;
use std::time::Duration;

/// Errors produced while encoding or decoding native-messaging frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Underlying I/O failure on the channel.
    #[error("frame I/O error: {0}")]
    Io(#[from] io::Error),

    /// The stream ended in the middle of a frame.
    #[error("truncated frame (expected {expected} bytes, got {read})")]
    Truncated { expected: usize, read: usize },

    /// Declared or serialized payload exceeds the configured limit.
    #[error("payload too large ({size} bytes, max {max})")]
    TooLarge { size: usize, max: usize },

    /// Payload bytes are not valid UTF-8.
    #[error("payload is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// Payload is not the JSON shape we expected.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FrameError {
    /// True when the error leaves the byte stream in an unknown position.
    pub fn breaks_stream(&self) -> bool {
        !matches!(self, FrameError::Json(_) | FrameError::InvalidUtf8(_))
    }
}

/// Errors surfaced to callers of [`crate::Bridge::send`].
///
/// `Clone` so that one connection-wide failure can be handed to every
/// in-flight request.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BridgeError {
    /// The channel to the host could not be established.
    #[error("failed to connect to native host: {0}")]
    Connect(#[source] Arc<io::Error>),

    /// Writing a request to an established channel failed.
    #[error("failed to send request {id}: {source}")]
    Send {
        id: u64,
        #[source]
        source: Arc<FrameError>,
    },

    /// No response arrived in time.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The host answered with `success: false`.
    #[error("{message}")]
    PeerReported { message: String },

    /// The host went away while the request was in flight.
    #[error("connection to native host lost")]
    ConnectionLost,

    /// The host produced a malformed frame; the connection was dropped.
    #[error("malformed frame from native host: {0}")]
    Framing(#[source] Arc<FrameError>),

    /// Invalid configuration.
    #[error("config error: {0}")]
    Config(String),
}

impl BridgeError {
    /// The host did not answer within the request deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, BridgeError::Timeout(_))
    }

    /// "Not connected" class: the host is unreachable or dropped the channel.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            BridgeError::Connect(_) | BridgeError::ConnectionLost | BridgeError::Framing(_)
        )
    }

    /// "Request failed" class: the host received the request and refused it.
    pub fn is_peer_failure(&self) -> bool {
        matches!(self, BridgeError::PeerReported { .. })
    }
}

impl From<toml::de::Error> for BridgeError {
    fn from(e: toml::de::Error) -> Self {
        BridgeError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
