//! Request/response envelopes exchanged with the native host.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Fallback error text when the host reports failure without saying why.
pub const UNKNOWN_ERROR: &str = "unknown error";

/// Outgoing envelope: `{"id": 1, "action": "get-status", "data": {...}}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Request {
    pub id: u64,
    pub action: String,
    #[serde(default = "empty_object")]
    pub data: Value,
}

/// Reply envelope. `error` is only meaningful when `success` is false.
///
/// A reply without `success` counts as a failure.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Response {
    pub id: u64,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok(id: u64, action: impl Into<String>, data: Value) -> Self {
        Self {
            id,
            action: action.into(),
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failed(id: u64, action: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id,
            action: action.into(),
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    /// Turn the envelope into the caller-facing result.
    ///
    /// A successful reply without `data` yields `Value::Null`; a failed reply
    /// without `error` yields [`UNKNOWN_ERROR`].
    pub fn into_result(self) -> Result<Value, String> {
        if self.success {
            Ok(self.data.unwrap_or(Value::Null))
        } else {
            Err(self
                .error
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| UNKNOWN_ERROR.to_string()))
        }
    }
}

/// Actions understood by the KeePass host.
///
/// The bridge itself never looks at the action; these exist for the
/// convenience wrappers on [`crate::Bridge`] and for the stub host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    TestConnection,
    GetCredentials,
    SearchCredentials,
    GetStatus,
}

impl Action {
    pub const ALL: [Action; 4] = [
        Action::TestConnection,
        Action::GetCredentials,
        Action::SearchCredentials,
        Action::GetStatus,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Action::TestConnection => "test-connection",
            Action::GetCredentials => "get-credentials",
            Action::SearchCredentials => "search-credentials",
            Action::GetStatus => "get-status",
        }
    }

    pub fn parse(s: &str) -> Option<Action> {
        Action::ALL.into_iter().find(|a| a.as_str() == s)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) fn empty_object() -> Value {
    Value::Object(Map::new())
}
