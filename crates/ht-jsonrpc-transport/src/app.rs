//! Handle to an externally owned router.
//!
//! Several servers can mount their routes on one `SharedApp` at distinct
//! paths; whoever owns the app serves [`SharedApp::router`] and controls the
//! listener, TLS and any cross-cutting layers.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::Router;
use axum::extract::Request;
use axum::response::Response;
use axum::routing::MethodRouter;
use parking_lot::RwLock;
use tower::ServiceExt;

use crate::error::ConfigError;

#[derive(Clone, Default)]
pub struct SharedApp {
    inner: Arc<AppInner>,
}

#[derive(Default)]
struct AppInner {
    /// The owner's own routes, fixed at construction
    base: Router,
    mounted: RwLock<Mounted>,
}

/// Transport routes, looked up per request.
#[derive(Default)]
struct Mounted {
    router: Router,
    paths: BTreeSet<String>,
}

impl SharedApp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a router that already carries the owner's own routes.
    ///
    /// Transport routes are reached through the router's fallback, so any
    /// fallback already set on `router` is replaced.
    pub fn from_router(router: Router) -> Self {
        Self {
            inner: Arc::new(AppInner {
                base: router,
                mounted: RwLock::default(),
            }),
        }
    }

    /// The router to serve.
    ///
    /// Requests the owner's routes don't match go to the transport routes
    /// mounted at that moment, so servers created after serving has started
    /// are reachable too.
    pub fn router(&self) -> Router {
        let inner = self.inner.clone();
        self.inner.base.clone().fallback(move |req: Request| {
            let inner = inner.clone();
            async move { inner.route_mounted(req).await }
        })
    }

    /// Paths mounted by transports on this app.
    pub fn paths(&self) -> Vec<String> {
        self.inner.mounted.read().paths.iter().cloned().collect()
    }

    pub(crate) fn mount(&self, path: &str, route: MethodRouter) -> Result<(), ConfigError> {
        let mut mounted = self.inner.mounted.write();
        if !mounted.paths.insert(path.to_string()) {
            return Err(ConfigError::PathInUse(path.to_string()));
        }
        let router = std::mem::take(&mut mounted.router);
        mounted.router = router.route(path, route);
        Ok(())
    }
}

impl AppInner {
    async fn route_mounted(&self, req: Request) -> Response {
        // Clone out so the lock is not held across the handler
        let router = self.mounted.read().router.clone();
        match router.oneshot(req).await {
            Ok(response) => response,
            Err(never) => match never {},
        }
    }
}

impl std::fmt::Debug for SharedApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedApp")
            .field("paths", &self.inner.mounted.read().paths)
            .finish()
    }
}
