//! Transport error types and error-value normalization.
//!
//! Anything that can go wrong is funnelled into one of:
//! - [`ConfigError`]: the factory rejected the options
//! - [`ServerError`]: an owned listener could not start
//! - [`DispatchError`]: business logic failed (sent as `-32000`)
//! - [`ClientError`]: a call did not produce a result
//!
//! [`normalize_value`] and [`normalize_error`] reduce arbitrary error values
//! to the uniform `{message}` shape that goes on the wire.

use std::net::SocketAddr;
use std::path::PathBuf;

use ht_jsonrpc_protocol::RpcError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("transport requires either an app or both host and port")]
    MissingEndpoint,
    #[error("invalid route path: {0}")]
    InvalidPath(String),
    #[error("path {0} is already mounted on the shared app")]
    PathInUse(String),
    #[error("failed to read TLS certificate {path}: {source}")]
    Certificate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("exclusive listener requires host and port")]
    MissingEndpoint,
    #[error("failed to resolve {addr}: {source}")]
    Resolve {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to load TLS material from {path}: {source}")]
    Tls {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("listener on {0} exited before accepting connections")]
    NotStarted(SocketAddr),
}

/// Uniform `{message}` view of an error, keeping the original structured
/// payload when there was one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl NormalizedError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            data: None,
        }
    }
}

impl std::fmt::Display for NormalizedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Normalize an arbitrary JSON error value.
///
/// Strings become their own message. Objects with a string `message` use it.
/// Anything else is described by its compact JSON text. Non-string values are
/// kept as `data`.
pub fn normalize_value(value: &Value) -> NormalizedError {
    match value {
        Value::String(s) => NormalizedError::new(s.clone()),
        Value::Object(map) => {
            let message = match map.get("message") {
                Some(Value::String(m)) => m.clone(),
                _ => value.to_string(),
            };
            NormalizedError {
                message,
                data: Some(value.clone()),
            }
        }
        other => NormalizedError {
            message: other.to_string(),
            data: Some(other.clone()),
        },
    }
}

/// Normalize a Rust error, folding its source chain into the message.
pub fn normalize_error(err: &(dyn std::error::Error + 'static)) -> NormalizedError {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    NormalizedError::new(message)
}

/// Failure reported by a dispatch implementation.
///
/// Business logic may fail with a plain message, a structured JSON value or
/// any Rust error; the server normalizes all three before answering `-32000`.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{0}")]
    Message(String),
    #[error("{}", normalize_value(.0).message)]
    Object(Value),
    #[error("{0}")]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl DispatchError {
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    pub fn other(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Other(Box::new(err))
    }

    pub fn normalize(&self) -> NormalizedError {
        match self {
            Self::Message(m) => NormalizedError::new(m.clone()),
            Self::Object(value) => normalize_value(value),
            Self::Other(err) => normalize_error(err.as_ref()),
        }
    }

    /// The wire error object for this failure.
    pub fn to_rpc_error(&self) -> RpcError {
        let normalized = self.normalize();
        let error = RpcError::server_error(normalized.message);
        match normalized.data {
            Some(data) => error.with_data(data),
            None => error,
        }
    }
}

impl From<String> for DispatchError {
    fn from(message: String) -> Self {
        Self::Message(message)
    }
}

impl From<&str> for DispatchError {
    fn from(message: &str) -> Self {
        Self::Message(message.to_string())
    }
}

impl From<Value> for DispatchError {
    fn from(value: Value) -> Self {
        Self::Object(value)
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for DispatchError {
    fn from(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Self::Other(err)
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        Self::other(err)
    }
}

/// Why a client call produced no result.
///
/// `Remote` and `Transport` carry a `message`; `Malformed` is the raw response
/// text and deliberately has none, so callers can tell the shapes apart.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server answered with an `error` member, passed through verbatim.
    #[error("remote error: {}", normalize_value(.0).message)]
    Remote(Value),
    /// The response body was not JSON.
    #[error("malformed response: {0}")]
    Malformed(String),
    /// The exchange itself failed (refused, reset, DNS, TLS).
    #[error("transport error: {0}")]
    Transport(NormalizedError),
}

impl ClientError {
    pub fn transport(err: &(dyn std::error::Error + 'static)) -> Self {
        Self::Transport(normalize_error(err))
    }

    /// The `message` of a structured error, `None` for a malformed body.
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Remote(value) => value.get("message").and_then(Value::as_str),
            Self::Transport(normalized) => Some(&normalized.message),
            Self::Malformed(_) => None,
        }
    }

    /// The JSON-RPC error code of a remote error.
    pub fn code(&self) -> Option<i64> {
        match self {
            Self::Remote(value) => value.get("code").and_then(Value::as_i64),
            _ => None,
        }
    }

    /// Typed view of a remote error, when it has the standard shape.
    pub fn rpc_error(&self) -> Option<RpcError> {
        match self {
            Self::Remote(value) => serde_json::from_value(value.clone()).ok(),
            _ => None,
        }
    }

    /// Raw body text of a malformed response.
    pub fn raw(&self) -> Option<&str> {
        match self {
            Self::Malformed(text) => Some(text),
            _ => None,
        }
    }
}
