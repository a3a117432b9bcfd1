//! Request routing: map URL patterns and HTTP methods to handler functions.
//!
//! This module provides [`Router`], which dispatches incoming HTTP requests to handler
//! functions based on the request method and URL path. Two pattern styles are supported:
//!
//! | Pattern              | Example match                       |
//! |----------------------|-------------------------------------|
//! | `/manifest.json`     | `/manifest.json`                    |
//! | `/dist/*`            | `/dist`, `/dist/js/app.js`          |
//! | `/*`                 | *anything*                          |
//!
//! Trailing slashes are normalized on both patterns and incoming paths, so `/about/` and
//! `/about` are treated as equivalent.
//!
//! Routes are matched in registration order; the first route whose method and pattern both
//! match the incoming request wins. Register catch-alls last.

use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;
use crate::{Method, Request, Response, StatusCode};

/// Type-erased, heap-allocated async handler that processes a [`Context`] and returns a
/// [`Response`].
///
/// Handlers are stored behind `Arc<dyn Fn(…)>` so they can be cloned and shared across
/// connection tasks without copying the underlying closure.
pub type Handler =
    Arc<dyn Fn(Context) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static>;

/// Conversion trait for async handler functions.
///
/// Any `Fn(Context) -> impl Future<Output = Response> + Send` that is also
/// `Send + Sync + 'static` implements this trait through the blanket impl below.
pub trait IntoHandler: Send + Sync + 'static {
    /// Call the handler with the given context, boxing the returned future.
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Context) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin((self)(ctx))
    }
}

// Compiled representation of a route pattern string.
#[derive(Debug, Clone)]
enum Pattern {
    // Matches one exact path string, e.g. `/manifest.json`.
    Exact(String),
    // Matches the prefix itself or anything below it, e.g. `/dist/*`. Empty prefix = catch-all.
    Wildcard(String),
}

impl Pattern {
    /// Parse a route pattern string into a `Pattern`.
    ///
    /// The pattern is classified as follows (checked in order):
    ///
    /// 1. Ends with `/*` → [`Pattern::Wildcard`].
    /// 2. Otherwise → [`Pattern::Exact`].
    ///
    /// A trailing slash (other than on the root `/`) is stripped before classification.
    fn parse(pattern: &str) -> Self {
        let pattern = trim_trailing_slash(pattern);

        if let Some(prefix) = pattern.strip_suffix("/*") {
            return Pattern::Wildcard(prefix.to_string());
        }

        Pattern::Exact(pattern.to_string())
    }

    fn matches(&self, path: &str) -> bool {
        let path = trim_trailing_slash(path);

        match self {
            Pattern::Exact(p) => p == path,
            Pattern::Wildcard(prefix) => match path.strip_prefix(prefix.as_str()) {
                // `/dist/*` must not claim `/distribution`.
                Some(suffix) => prefix.is_empty() || suffix.is_empty() || suffix.starts_with('/'),
                None => false,
            },
        }
    }
}

fn trim_trailing_slash(path: &str) -> &str {
    if path != "/" && path.ends_with('/') {
        &path[..path.len() - 1]
    } else {
        path
    }
}

// A single registered route binding a method + pattern to a handler.
struct Route {
    method: Method,
    pattern: Pattern,
    handler: Handler,
}

/// HTTP request router that dispatches requests to registered handler functions.
///
/// Routes are evaluated in registration order; the first route whose HTTP method and path
/// pattern both match the incoming request is used. When the path matches some route but
/// the method does not, `405 Method Not Allowed` is returned with an `Allow` header;
/// otherwise unmatched requests get `404 Not Found`.
///
/// # Examples
///
/// ```rust,no_run
/// use ssrd::{Response, Router, StatusCode, context::Context};
///
/// let mut router = Router::new();
/// router.get("/ping", |_ctx: Context| async { Response::new(StatusCode::Ok) });
/// router.get("/dist/*", |ctx: Context| async move {
///     Response::new(StatusCode::Ok).body(ctx.request().path().to_owned())
/// });
/// ```
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    /// Create a new, empty `Router` with no registered routes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `GET` requests matching `path`.
    ///
    /// # Arguments
    ///
    /// - `path`: URL pattern string (e.g. `"/about"` or `"/dist/*"`).
    /// - `handler`: async function that receives a [`Context`] and returns a [`Response`].
    pub fn get(&mut self, path: &str, handler: impl IntoHandler) {
        self.on(Method::Get, path, handler);
    }

    /// Register a handler for an arbitrary method.
    pub fn on(&mut self, method: Method, path: &str, handler: impl IntoHandler) {
        let handler: Handler = Arc::new(move |ctx| handler.call(ctx));
        self.routes.push(Route {
            method,
            pattern: Pattern::parse(path),
            handler,
        });
    }

    /// Return the number of routes registered in this router.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Return `true` if no routes have been registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Dispatch `request` to the first matching route and return its response.
    pub async fn route(&self, request: Request) -> Response {
        let mut allowed: Vec<&str> = Vec::new();

        for route in &self.routes {
            if !route.pattern.matches(request.path()) {
                continue;
            }
            if &route.method == request.method() {
                return (route.handler)(Context::new(request)).await;
            }
            if !allowed.contains(&route.method.as_str()) {
                allowed.push(route.method.as_str());
            }
        }

        if allowed.is_empty() {
            Response::new(StatusCode::NotFound)
        } else {
            Response::new(StatusCode::MethodNotAllowed).header("Allow", allowed.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::request::Request;

    fn make_request(method: &str, path: &str) -> Request {
        let raw = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        let (req, _) = Request::parse(raw.as_bytes()).unwrap();
        req
    }

    // ── Pattern::parse ────────────────────────────────────────────────────────

    #[test]
    fn pattern_parse_root() {
        assert!(matches!(Pattern::parse("/"), Pattern::Exact(s) if s == "/"));
    }

    #[test]
    fn pattern_parse_trailing_slash_stripped() {
        assert!(matches!(Pattern::parse("/about/"), Pattern::Exact(s) if s == "/about"));
    }

    #[test]
    fn pattern_parse_wildcards() {
        assert!(matches!(Pattern::parse("/dist/*"), Pattern::Wildcard(s) if s == "/dist"));
        assert!(matches!(Pattern::parse("/*"), Pattern::Wildcard(s) if s.is_empty()));
    }

    // ── Pattern::matches ──────────────────────────────────────────────────────

    #[test]
    fn exact_match_ignores_trailing_slash() {
        let pat = Pattern::parse("/manifest.json");
        assert!(pat.matches("/manifest.json"));
        assert!(pat.matches("/manifest.json/"));
        assert!(!pat.matches("/manifest"));
    }

    #[test]
    fn colon_is_literal() {
        let pat = Pattern::parse("/post/:id");
        assert!(pat.matches("/post/:id"));
        assert!(!pat.matches("/post/42"));
    }

    #[test]
    fn wildcard_respects_segment_boundary() {
        let pat = Pattern::parse("/dist/*");
        assert!(pat.matches("/dist/js/app.js"));
        assert!(pat.matches("/dist"));
        assert!(!pat.matches("/distribution/app.js"));
    }

    #[test]
    fn catch_all_matches_everything() {
        let pat = Pattern::parse("/*");
        assert!(pat.matches("/"));
        assert!(pat.matches("/a/b"));
    }

    // ── Router ────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn empty_router_returns_404() {
        let router = Router::new();
        assert!(router.is_empty());
        let res = router.route(make_request("GET", "/")).await;
        assert_eq!(res.status(), StatusCode::NotFound);
    }

    #[tokio::test]
    async fn first_matching_route_wins() {
        let mut router = Router::new();
        router.get("/dist/*", |_ctx: Context| async { Response::new(StatusCode::Ok) });
        router.get("/*", |_ctx: Context| async { Response::new(StatusCode::Accepted) });
        assert_eq!(router.len(), 2);

        let res = router.route(make_request("GET", "/dist/app.js")).await;
        assert_eq!(res.status(), StatusCode::Ok);
        let res = router.route(make_request("GET", "/about")).await;
        assert_eq!(res.status(), StatusCode::Accepted);
    }

    #[tokio::test]
    async fn wrong_method_returns_405_with_allow() {
        let mut router = Router::new();
        router.get("/*", |_ctx: Context| async { Response::new(StatusCode::Ok) });
        router.on(Method::Head, "/*", |_ctx: Context| async { Response::new(StatusCode::Ok) });

        let res = router.route(make_request("POST", "/anything")).await;
        assert_eq!(res.status(), StatusCode::MethodNotAllowed);
        assert_eq!(res.headers().get("allow"), Some("GET, HEAD"));
    }

    #[tokio::test]
    async fn handler_receives_the_request() {
        let mut router = Router::new();
        router.get("/dist/*", |ctx: Context| async move {
            Response::new(StatusCode::Ok).body(ctx.request().uri().to_owned())
        });
        let res = router.route(make_request("GET", "/dist/app.js?v=2")).await;
        let body = res.into_body().collect().await.unwrap();
        assert_eq!(body, "/dist/app.js?v=2");
    }
}
