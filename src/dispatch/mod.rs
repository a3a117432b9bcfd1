//! Request dispatch: classifies each request as a static asset, an upstream
//! API call, or a page render, and applies the matching policy.
//!
//! Routes are tried in this order:
//!
//! 1. static mounts (`/dist/*`, `/public/*`, `/manifest.json`, ...)
//! 2. upstream proxy paths, micro-cached
//! 3. `/*`, rendered and micro-cached
//!
//! Every route answers `GET` and `HEAD`; other methods get `405`.

use std::pin::Pin;
use std::sync::Arc;

use tracing::error;

use crate::assets::StaticFiles;
use crate::cache::{CachedResponse, ResponseCache};
use crate::context::Context;
use crate::lifecycle::RendererLifecycle;
use crate::middleware::{AccessLog, MiddlewareHandler, Next, from_middleware};
use crate::proxy::UpstreamProxy;
use crate::router::{Handler, Router};
use crate::{Method, Request, Response, StatusCode};

mod page;
mod recorder;

pub use recorder::{MAX_RECORDED_BODY, Recorder};

pub(crate) const NOT_FOUND_BODY: &str = "404 | Page Not Found";
pub(crate) const INTERNAL_ERROR_BODY: &str = "500 | Internal Server Error";

/// Everything request handlers share.
pub struct AppState {
    cache: Arc<ResponseCache>,
    lifecycle: Arc<RendererLifecycle>,
    proxy: UpstreamProxy,
    assets: StaticFiles,
    upstream_paths: Vec<String>,
    default_title: String,
    server_info: String,
    production: bool,
}

impl AppState {
    pub fn new(
        cache: Arc<ResponseCache>,
        lifecycle: Arc<RendererLifecycle>,
        proxy: UpstreamProxy,
        assets: StaticFiles,
    ) -> Self {
        let server_info = format!(
            "ssrd/{} {}",
            env!("CARGO_PKG_VERSION"),
            lifecycle.engine_name()
        );
        Self {
            cache,
            lifecycle,
            proxy,
            assets,
            upstream_paths: Vec::new(),
            default_title: "ssrd".to_owned(),
            server_info,
            production: false,
        }
    }

    /// Paths forwarded to the upstream host instead of being rendered.
    #[must_use]
    pub fn upstream_paths(mut self, paths: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.upstream_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Title placed in every render context.
    #[must_use]
    pub fn default_title(mut self, title: impl Into<String>) -> Self {
        self.default_title = title.into();
        self
    }

    /// Production mode quiets the per-request timing log.
    #[must_use]
    pub fn production(mut self, production: bool) -> Self {
        self.production = production;
        self
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn lifecycle(&self) -> &Arc<RendererLifecycle> {
        &self.lifecycle
    }

    /// Value of the `Server` header on rendered pages.
    pub fn server_info(&self) -> &str {
        &self.server_info
    }
}

/// The application entry point handed to the server.
pub struct Dispatcher {
    state: Arc<AppState>,
    middlewares: Arc<[MiddlewareHandler]>,
    endpoint: Handler,
}

impl Dispatcher {
    pub fn new(state: AppState) -> Self {
        let state = Arc::new(state);
        let router = Arc::new(build_router(&state));

        let middlewares: Vec<MiddlewareHandler> =
            vec![from_middleware(Arc::new(AccessLog::new(!state.production)))];
        let endpoint: Handler = Arc::new(
            move |ctx: Context| -> Pin<Box<dyn Future<Output = Response> + Send>> {
                let router = Arc::clone(&router);
                Box::pin(async move { router.route(ctx.into_request()).await })
            },
        );

        Self {
            state,
            middlewares: Arc::from(middlewares),
            endpoint,
        }
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Runs `request` through the middleware pipeline and router.
    pub async fn dispatch(&self, request: Request) -> Response {
        Next::new(Arc::clone(&self.middlewares), Arc::clone(&self.endpoint))
            .run(Context::new(request))
            .await
    }
}

fn build_router(state: &Arc<AppState>) -> Router {
    let mut router = Router::new();

    for pattern in state.assets.route_patterns() {
        read_only(&mut router, state, &pattern, serve_asset);
    }
    for path in &state.upstream_paths {
        read_only(&mut router, state, path, proxy_upstream);
    }
    read_only(&mut router, state, "/*", page::render_page);

    router
}

/// Registers `handler` for `GET` and `HEAD` on `pattern`.
fn read_only<F, Fut>(router: &mut Router, state: &Arc<AppState>, pattern: &str, handler: F)
where
    F: Fn(Arc<AppState>, Request) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    for method in [Method::Get, Method::Head] {
        let state = Arc::clone(state);
        let handler = handler.clone();
        router.on(method, pattern, move |ctx: Context| {
            handler(Arc::clone(&state), ctx.into_request())
        });
    }
}

async fn serve_asset(state: Arc<AppState>, request: Request) -> Response {
    state.assets.serve(request.path()).await
}

async fn proxy_upstream(state: Arc<AppState>, request: Request) -> Response {
    let key = state.cache.hash(&request);
    if let Some(hit) = key.as_ref().and_then(|key| state.cache.get(key)) {
        return cached(hit);
    }

    match state.proxy.forward(&request).await {
        // Only a plain 200 is replayable as a cache hit.
        Ok(response) => match key {
            Some(key) if response.status() == StatusCode::Ok => {
                let content_type = response
                    .headers()
                    .get("content-type")
                    .unwrap_or("application/octet-stream")
                    .to_owned();
                let cache = Arc::clone(&state.cache);
                response.map_body(|body| Recorder::wrap(body, cache, key, content_type))
            }
            _ => response,
        },
        Err(err) => {
            error!(url = request.uri(), error = %err, "upstream request failed");
            Response::text(StatusCode::InternalServerError, INTERNAL_ERROR_BODY)
        }
    }
}

fn cached(hit: CachedResponse) -> Response {
    Response::new(StatusCode::Ok)
        .header("Content-Type", hit.content_type)
        .body(hit.body)
}
