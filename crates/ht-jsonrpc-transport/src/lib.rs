//! ht-jsonrpc Transport Layer
//!
//! JSON-RPC 2.0 request/response exchange over HTTP(S).
//! The transport layer handles:
//! - Option validation and defaults (`HttpTransport::new`)
//! - Server lifecycle (owned listener, or a route on a shared router)
//! - Envelope decoding, dispatch, and response/error encoding
//! - One-POST-per-call clients with permissive reply interpretation
//!
//! Business logic is decoupled from the transport via the `Dispatch` trait.
//! `ServerTransport` and `ClientTransport` are the interface other transports
//! of the enclosing RPC layer implement as well.

pub mod app;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod factory;
pub mod server;
pub mod tls;

use std::future::Future;

use serde_json::Value;

pub use app::SharedApp;
pub use client::{Client, MAX_REQUEST_ID, interpret_response};
pub use config::{DEFAULT_PATH, Ssl, TlsConfig, TransportConfig, TransportOptions};
pub use dispatch::{Dispatch, DispatchFn, DispatchResult, dispatch_fn};
pub use error::{
    ClientError, ConfigError, DispatchError, NormalizedError, ServerError, normalize_error,
    normalize_value,
};
pub use factory::HttpTransport;
pub use server::Server;

/// Server half of a transport: a listener lifecycle around a dispatch hook.
pub trait ServerTransport: Send {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Start accepting requests. Idempotent.
    fn listen(&mut self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Stop accepting requests. Idempotent.
    fn stop(&mut self) -> impl Future<Output = ()> + Send;
}

/// Client half of a transport.
pub trait ClientTransport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    fn connect(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    fn disconnect(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Issue one request; `Ok(None)` is a valid no-result reply.
    fn call(
        &self,
        method: &str,
        params: Value,
    ) -> impl Future<Output = Result<Option<Value>, Self::Error>> + Send;
}

impl ServerTransport for Server {
    type Error = ServerError;

    async fn listen(&mut self) -> Result<(), ServerError> {
        Server::listen(self).await
    }

    async fn stop(&mut self) {
        Server::stop(self).await
    }
}

impl ClientTransport for Client {
    type Error = ClientError;

    async fn connect(&self) -> Result<(), ClientError> {
        Client::connect(self).await
    }

    async fn disconnect(&self) -> Result<(), ClientError> {
        Client::disconnect(self).await
    }

    async fn call(&self, method: &str, params: Value) -> Result<Option<Value>, ClientError> {
        Client::call(self, method, params).await
    }
}
