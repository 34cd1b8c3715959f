//! Stateless JSON-RPC over HTTP(S) client.
//!
//! Every `call` builds a fresh envelope, performs exactly one POST and reads
//! the whole body before interpreting it. There is no retry, queueing,
//! timeout or id correlation; one call is one exchange.

use std::sync::Arc;

use ht_jsonrpc_protocol::RpcRequest;
use rand::Rng;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use tracing::debug;

use crate::config::TransportConfig;
use crate::error::{ClientError, ConfigError, NormalizedError};
use crate::tls;

/// Request ids are drawn from `[0, MAX_REQUEST_ID)`.
pub const MAX_REQUEST_ID: i64 = 100_000;

/// Body text some peers send instead of an empty reply.
const UNDEFINED_BODY: &str = "undefined";

#[derive(Debug, Clone)]
pub struct Client {
    config: Arc<TransportConfig>,
    http: reqwest::Client,
}

impl Client {
    pub fn new(config: Arc<TransportConfig>) -> Result<Self, ConfigError> {
        // No idle pooling: each call gets its own connection.
        let mut builder = reqwest::Client::builder().pool_max_idle_per_host(0);
        if let Some(tls_config) = config.ssl.tls() {
            builder = builder.add_root_certificate(tls::load_root_certificate(tls_config)?);
        }
        let http = builder.build()?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &Arc<TransportConfig> {
        &self.config
    }

    /// Nothing to set up: HTTP is connectionless per call.
    pub async fn connect(&self) -> Result<(), ClientError> {
        Ok(())
    }

    /// Nothing to tear down.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        Ok(())
    }

    /// Issue one JSON-RPC request and interpret the reply.
    ///
    /// Resolves to `Ok(None)` for an empty (or `"undefined"`) body or a reply
    /// without `result`. Failures never panic; they come back as
    /// [`ClientError`].
    pub async fn call(&self, method: &str, params: Value) -> Result<Option<Value>, ClientError> {
        let url = self.config.endpoint_url().ok_or_else(|| {
            ClientError::Transport(NormalizedError::new("client has no host and port configured"))
        })?;

        let id = rand::rng().random_range(0..MAX_REQUEST_ID);
        let request = RpcRequest::new(id, method, params);
        let body = serde_json::to_vec(&request).map_err(|e| ClientError::transport(&e))?;

        debug!("Calling {method} (id {id}) at {url}");

        let response = self
            .http
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| ClientError::transport(&e))?;
        let text = response.text().await.map_err(|e| ClientError::transport(&e))?;

        interpret_response(text)
    }
}

/// Interpret a complete response body.
///
/// In priority order: empty or `"undefined"` is a valid no-result reply;
/// non-JSON is returned raw as [`ClientError::Malformed`]; a non-null `error`
/// member is passed through verbatim; otherwise the `result` member (if any)
/// is the outcome. The HTTP status is not consulted.
pub fn interpret_response(text: String) -> Result<Option<Value>, ClientError> {
    if text.is_empty() || text == UNDEFINED_BODY {
        return Ok(None);
    }

    let mut parsed: Value = match serde_json::from_str(&text) {
        Ok(v) => v,
        Err(_) => return Err(ClientError::Malformed(text)),
    };

    if let Some(error) = parsed.get_mut("error").map(Value::take).filter(|e| !e.is_null()) {
        return Err(ClientError::Remote(error));
    }

    Ok(parsed.get_mut("result").map(Value::take))
}
