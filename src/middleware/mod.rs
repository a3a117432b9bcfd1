//! Middleware pipeline: composable before/after request handler logic.
//!
//! Each middleware wraps the next layer, enabling request inspection, short-circuit
//! responses, and response decoration without coupling handlers to infrastructure
//! concerns.
//!
//! ## Core types
//!
//! - [`Middleware`]: trait implemented by all middleware.
//! - [`Next`]: cursor into the remaining middleware chain; call [`Next::run`] to
//!   advance to the next layer. When the chain is exhausted the endpoint runs.
//! - [`MiddlewareHandler`]: type-erased, cheaply-cloneable middleware function.
//! - [`from_middleware`]: converts a [`Middleware`] into a [`MiddlewareHandler`].
//! - [`AccessLog`]: request/response logger with render timing.

use std::{future::Future, pin::Pin, sync::Arc};

use tokio::time::Instant;
use tracing::{debug, info};

use crate::{Response, context::Context, router::Handler};

/// A cursor into the remaining middleware chain for a single request.
///
/// `Next` is consumed on each call to [`run`](Self::run), so it cannot be called
/// more than once per middleware invocation.
///
/// # Examples
///
/// ```rust,no_run
/// use std::pin::Pin;
/// use ssrd::{Response, context::Context, middleware::{Middleware, Next}};
///
/// struct PassThrough;
///
/// impl Middleware for PassThrough {
///     fn handle(
///         &self,
///         ctx: Context,
///         next: Next,
///     ) -> Pin<Box<dyn std::future::Future<Output = Response> + Send>> {
///         Box::pin(async move { next.run(ctx).await })
///     }
/// }
/// ```
pub struct Next {
    middlewares: Arc<[MiddlewareHandler]>,
    endpoint: Handler,
    // Which middleware to invoke on the next `run` call.
    index: usize,
}

/// A type-erased, reference-counted middleware function.
pub type MiddlewareHandler = Arc<
    dyn Fn(Context, Next) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static,
>;

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

impl Next {
    /// Creates a cursor positioned at the start of `middlewares`, finishing at `endpoint`.
    pub fn new(middlewares: Arc<[MiddlewareHandler]>, endpoint: Handler) -> Self {
        Self {
            middlewares,
            endpoint,
            index: 0,
        }
    }

    /// Invokes the next middleware in the chain, or the endpoint once every
    /// middleware has run, and returns its response.
    pub async fn run(mut self, ctx: Context) -> Response {
        if self.index < self.middlewares.len() {
            let handler = Arc::clone(&self.middlewares[self.index]);
            self.index += 1;
            handler(ctx, self).await
        } else {
            (self.endpoint)(ctx).await
        }
    }
}

/// The core trait for all middleware.
///
/// Implementors receive a [`Context`] and a [`Next`] cursor. They may pass through,
/// short-circuit by returning a [`Response`] without calling `next`, or decorate the
/// downstream response.
///
/// Implementations must not hold `&mut` references to shared state across an
/// `.await` point.
pub trait Middleware: Send + Sync {
    /// Handle the request and optionally delegate to the next middleware.
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

/// Logs each request's method, target, status, and elapsed time.
///
/// With `verbose` set (development) the line is emitted at `info` as a
/// "whole request" timing; otherwise it goes to `debug`. For streamed
/// responses the elapsed time covers time-to-headers only.
pub struct AccessLog {
    verbose: bool,
}

impl AccessLog {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl Middleware for AccessLog {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        let verbose = self.verbose;
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.request().method().clone();
            let uri = ctx.request().uri().to_owned();

            let response = next.run(ctx).await;

            let elapsed_ms = start.elapsed().as_millis() as u64;
            let status = response.status().as_u16();
            if verbose {
                info!(%method, %uri, status, elapsed_ms, "whole request");
            } else {
                debug!(%method, %uri, status, elapsed_ms, "request served");
            }

            response
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{Request, StatusCode};

    struct Stamp(&'static str);

    impl Middleware for Stamp {
        fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
            let value = self.0;
            Box::pin(async move {
                let mut response = next.run(ctx).await;
                response.set_header("X-Stamp", value);
                response
            })
        }
    }

    struct Deny;

    impl Middleware for Deny {
        fn handle(&self, _ctx: Context, _next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
            Box::pin(async { Response::new(StatusCode::Forbidden) })
        }
    }

    fn counting_endpoint(calls: Arc<AtomicUsize>) -> Handler {
        Arc::new(move |_ctx: Context| -> Pin<Box<dyn Future<Output = Response> + Send>> {
            calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Response::new(StatusCode::Ok) })
        })
    }

    #[tokio::test]
    async fn empty_chain_runs_endpoint() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain: Vec<MiddlewareHandler> = Vec::new();
        let next = Next::new(Arc::from(chain), counting_endpoint(calls.clone()));
        let res = next.run(Context::new(Request::get("/"))).await;
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn inner_middleware_decorates_last() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain: Vec<MiddlewareHandler> = vec![
            from_middleware(Arc::new(Stamp("outer"))),
            from_middleware(Arc::new(Stamp("inner"))),
            from_middleware(Arc::new(AccessLog::new(true))),
        ];
        let res = Next::new(Arc::from(chain), counting_endpoint(calls))
            .run(Context::new(Request::get("/")))
            .await;
        assert_eq!(res.headers().get("x-stamp"), Some("outer"));
    }

    #[tokio::test]
    async fn short_circuit_skips_endpoint() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain: Vec<MiddlewareHandler> = vec![from_middleware(Arc::new(Deny))];
        let res = Next::new(Arc::from(chain), counting_endpoint(calls.clone()))
            .run(Context::new(Request::get("/")))
            .await;
        assert_eq!(res.status(), StatusCode::Forbidden);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
