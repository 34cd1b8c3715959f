//! JSON-RPC over HTTP(S) server using Axum.
//!
//! Mounts one POST route at the configured path, either on a router it owns
//! (exclusive-app mode) or on a caller-owned [`SharedApp`]. Only in exclusive
//! mode does `listen`/`stop` manage an actual listener.
//!
//! [`SharedApp`]: crate::SharedApp

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{MethodRouter, post},
};
use ht_jsonrpc_protocol::{JSONRPC_VERSION, RpcError, RpcResponse};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};

use crate::config::TransportConfig;
use crate::dispatch::{Dispatch, DispatchDyn};
use crate::error::{ConfigError, ServerError};
use crate::tls;

/// Shared state for the route handler.
struct RouteState {
    path: String,
    dispatch: Option<Arc<dyn DispatchDyn>>,
}

/// Lifecycle of the owned listener.
#[derive(Debug)]
enum ListenState {
    Idle,
    Listening(OwnedListener),
}

#[derive(Debug)]
struct OwnedListener {
    addr: SocketAddr,
    shutdown: Shutdown,
    handle: JoinHandle<std::io::Result<()>>,
}

#[derive(Debug)]
enum Shutdown {
    Plain(mpsc::Sender<()>),
    Tls(axum_server::Handle),
}

impl Shutdown {
    fn signal(&self) {
        match self {
            // Ignore send errors (the serve task may already be gone)
            Self::Plain(tx) => {
                let _ = tx.try_send(());
            }
            Self::Tls(handle) => handle.graceful_shutdown(None),
        }
    }
}

/// The transport server. Owns or shares an HTTP listener and answers
/// JSON-RPC envelopes through a [`Dispatch`] hook.
#[derive(Debug)]
pub struct Server {
    config: Arc<TransportConfig>,
    /// Router to serve in exclusive mode; `None` when mounted on a shared app
    router: Option<Router>,
    state: ListenState,
}

impl Server {
    /// Build a server and register its route.
    pub fn new<D: Dispatch>(config: Arc<TransportConfig>, dispatch: D) -> Result<Self, ConfigError> {
        Self::build(config, Some(Arc::new(dispatch)))
    }

    /// Build a server that accepts requests but has no business logic behind
    /// it; every well-formed request gets an empty 200 reply.
    pub fn without_dispatch(config: Arc<TransportConfig>) -> Result<Self, ConfigError> {
        Self::build(config, None)
    }

    fn build(
        config: Arc<TransportConfig>,
        dispatch: Option<Arc<dyn DispatchDyn>>,
    ) -> Result<Self, ConfigError> {
        let state = Arc::new(RouteState {
            path: config.path.clone(),
            dispatch,
        });
        let route: MethodRouter = post(handle_rpc).with_state(state);

        let router = match &config.app {
            Some(app) => {
                app.mount(&config.path, route)?;
                debug!("Mounted JSON-RPC route {} on shared app", config.path);
                None
            }
            None => {
                let mut router = Router::new().route(&config.path, route);
                if config.cors {
                    router = router.layer(CorsLayer::permissive());
                }
                Some(router)
            }
        };

        Ok(Self {
            config,
            router,
            state: ListenState::Idle,
        })
    }

    pub fn config(&self) -> &Arc<TransportConfig> {
        &self.config
    }

    /// True when the route lives on a caller-owned router.
    pub fn is_shared_app(&self) -> bool {
        self.router.is_none()
    }

    pub fn is_listening(&self) -> bool {
        matches!(self.state, ListenState::Listening(_))
    }

    /// Address of the owned listener while listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.state {
            ListenState::Listening(listener) => Some(listener.addr),
            ListenState::Idle => None,
        }
    }

    /// Start the owned listener.
    ///
    /// A no-op when already listening or when mounted on a shared app.
    pub async fn listen(&mut self) -> Result<(), ServerError> {
        let Some(router) = self.router.clone() else {
            debug!("Shared app owns the listener; listen() is a no-op");
            return Ok(());
        };
        if self.is_listening() {
            return Ok(());
        }

        let (Some(host), Some(port)) = (self.config.host.as_deref(), self.config.port) else {
            return Err(ServerError::MissingEndpoint);
        };

        let listener = match self.config.ssl.tls() {
            None => serve_plain(router, host, port).await?,
            Some(tls_config) => {
                let rustls = tls::load_server_config(tls_config).await?;
                serve_tls(router, host, port, rustls).await?
            }
        };

        info!(
            "JSON-RPC transport listening on {}://{}{}",
            self.config.ssl.scheme(),
            listener.addr,
            self.config.path,
        );
        self.state = ListenState::Listening(listener);
        Ok(())
    }

    /// Gracefully stop the owned listener.
    ///
    /// A no-op when idle or when mounted on a shared app.
    pub async fn stop(&mut self) {
        let ListenState::Listening(listener) =
            std::mem::replace(&mut self.state, ListenState::Idle)
        else {
            return;
        };

        listener.shutdown.signal();
        match listener.handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("JSON-RPC listener on {} exited with error: {e}", listener.addr),
            Err(e) => error!("JSON-RPC listener task on {} failed: {e}", listener.addr),
        }
        info!("JSON-RPC transport on {} stopped", listener.addr);
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let ListenState::Listening(listener) = &self.state {
            listener.shutdown.signal();
        }
    }
}

async fn serve_plain(router: Router, host: &str, port: u16) -> Result<OwnedListener, ServerError> {
    let listener = tokio::net::TcpListener::bind((host, port))
        .await
        .map_err(|source| ServerError::Bind {
            addr: format!("{host}:{port}"),
            source,
        })?;
    let addr = listener.local_addr().map_err(|source| ServerError::Bind {
        addr: format!("{host}:{port}"),
        source,
    })?;

    let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
    let handle = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await
    });

    Ok(OwnedListener {
        addr,
        shutdown: Shutdown::Plain(shutdown_tx),
        handle,
    })
}

async fn serve_tls(
    router: Router,
    host: &str,
    port: u16,
    rustls: axum_server::tls_rustls::RustlsConfig,
) -> Result<OwnedListener, ServerError> {
    let requested = format!("{host}:{port}");
    let addr = tokio::net::lookup_host((host, port))
        .await
        .map_err(|source| ServerError::Resolve {
            addr: requested.clone(),
            source,
        })?
        .next()
        .ok_or_else(|| ServerError::Resolve {
            addr: requested.clone(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses"),
        })?;

    let server_handle = axum_server::Handle::new();
    let server = axum_server::bind_rustls(addr, rustls).handle(server_handle.clone());
    let handle = tokio::spawn(async move { server.serve(router.into_make_service()).await });

    let Some(bound) = server_handle.listening().await else {
        return match handle.await {
            Ok(Err(source)) => Err(ServerError::Bind {
                addr: requested,
                source,
            }),
            _ => Err(ServerError::NotStarted(addr)),
        };
    };

    Ok(OwnedListener {
        addr: bound,
        shutdown: Shutdown::Tls(server_handle),
        handle,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Route handler
// ─────────────────────────────────────────────────────────────────────────────

async fn handle_rpc(
    State(state): State<Arc<RouteState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> Response {
    let envelope = match body {
        Ok(Json(value)) => value,
        Err(rejection) => {
            warn!("Undecodable request body on {}: {rejection}", state.path);
            return reply(
                StatusCode::BAD_REQUEST,
                RpcResponse::error(
                    Some(Value::Null),
                    RpcError::parse_error(rejection.body_text()),
                ),
            );
        }
    };

    // Echoed verbatim, whatever JSON value it is
    let id = envelope.get("id").cloned();

    let jsonrpc = envelope.get("jsonrpc").and_then(Value::as_str);
    if jsonrpc != Some(JSONRPC_VERSION) {
        warn!("Rejected request on {} with jsonrpc version {jsonrpc:?}", state.path);
        return reply(
            StatusCode::BAD_REQUEST,
            RpcResponse::error(id, RpcError::version_mismatch()),
        );
    }

    let Some(dispatch) = state.dispatch.clone() else {
        debug!("No dispatch configured for {}; replying with an empty body", state.path);
        return StatusCode::OK.into_response();
    };

    let method = envelope
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let params = envelope.get("params").cloned().unwrap_or(Value::Null);

    debug!("Dispatching {method} on {}", state.path);

    // Run dispatch on its own task so a panic in business logic still gets
    // an answer instead of tearing down the connection.
    let outcome = tokio::spawn(async move { dispatch.dispatch_dyn(&method, params).await }).await;

    match outcome {
        Ok(Ok(result)) => reply(StatusCode::OK, RpcResponse::success(id, result)),
        Ok(Err(err)) => {
            debug!("Dispatch on {} failed: {err}", state.path);
            reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                RpcResponse::error(id, err.to_rpc_error()),
            )
        }
        Err(join_err) => {
            error!("Dispatch on {} panicked: {join_err}", state.path);
            reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                RpcResponse::error(id, RpcError::server_error("dispatch panicked")),
            )
        }
    }
}

fn reply(status: StatusCode, response: RpcResponse) -> Response {
    (status, Json(response)).into_response()
}
