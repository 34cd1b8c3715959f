//! The server's business-logic hook.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::error::DispatchError;

/// Outcome of one dispatched request: the `result` member or a failure.
pub type DispatchResult = Result<Value, DispatchError>;

/// Trait implemented by whatever answers inbound JSON-RPC requests.
///
/// The transport calls this once per well-formed request. Method routing and
/// parameter validation are entirely up to the implementation.
pub trait Dispatch: Send + Sync + 'static {
    fn dispatch(
        &self,
        method: &str,
        params: Value,
    ) -> impl Future<Output = DispatchResult> + Send;
}

impl<D: Dispatch> Dispatch for Arc<D> {
    fn dispatch(
        &self,
        method: &str,
        params: Value,
    ) -> impl Future<Output = DispatchResult> + Send {
        (**self).dispatch(method, params)
    }
}

/// Dispatch backed by a closure, see [`dispatch_fn`].
#[derive(Clone)]
pub struct DispatchFn<F> {
    f: F,
}

/// Wrap a closure `(method, params) -> future` as a [`Dispatch`].
pub fn dispatch_fn<F, Fut>(f: F) -> DispatchFn<F>
where
    F: Fn(String, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = DispatchResult> + Send + 'static,
{
    DispatchFn { f }
}

impl<F, Fut> Dispatch for DispatchFn<F>
where
    F: Fn(String, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = DispatchResult> + Send + 'static,
{
    fn dispatch(
        &self,
        method: &str,
        params: Value,
    ) -> impl Future<Output = DispatchResult> + Send {
        (self.f)(method.to_string(), params)
    }
}

/// Object-safe version of [`Dispatch`]; all refs share lifetime `'a`.
pub(crate) trait DispatchDyn: Send + Sync {
    fn dispatch_dyn<'a>(
        &'a self,
        method: &'a str,
        params: Value,
    ) -> Pin<Box<dyn Future<Output = DispatchResult> + Send + 'a>>;
}

impl<T: Dispatch> DispatchDyn for T {
    fn dispatch_dyn<'a>(
        &'a self,
        method: &'a str,
        params: Value,
    ) -> Pin<Box<dyn Future<Output = DispatchResult> + Send + 'a>> {
        Box::pin(self.dispatch(method, params))
    }
}
