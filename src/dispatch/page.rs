use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, error};

use super::{AppState, INTERNAL_ERROR_BODY, NOT_FOUND_BODY};
use crate::cache::CachedResponse;
use crate::render::{RenderContext, RenderOutcome};
use crate::{Request, Response, StatusCode};

const HTML: &str = "text/html; charset=utf-8";

/// The catch-all route: serve from the micro-cache or render the page.
pub(super) async fn render_page(state: Arc<AppState>, request: Request) -> Response {
    let key = state.cache.hash(&request);
    if let Some(hit) = key.as_ref().and_then(|key| state.cache.get(key)) {
        debug!(url = request.uri(), "micro-cache hit");
        return page(&state, StatusCode::Ok, hit.content_type, hit.body);
    }

    let outcome = match state.lifecycle.current_handle().await {
        Ok(handle) => {
            let context = RenderContext::new(request.uri(), state.default_title.as_str());
            // A panicking render only takes down its own task.
            match tokio::spawn(async move { handle.render(context).await }).await {
                Ok(outcome) => outcome,
                Err(err) => RenderOutcome::InternalError(format!("render task failed: {err}")),
            }
        }
        Err(err) => RenderOutcome::InternalError(err.to_string()),
    };

    match outcome {
        RenderOutcome::Success(html) => {
            let body = Bytes::from(html);
            if let Some(key) = key {
                state.cache.set(key, CachedResponse::new(HTML, body.clone()));
            }
            page(&state, StatusCode::Ok, HTML, body)
        }
        RenderOutcome::Redirect(target) => {
            Response::redirect(target).header("Server", state.server_info())
        }
        RenderOutcome::NotFound => page(&state, StatusCode::NotFound, HTML, NOT_FOUND_BODY),
        RenderOutcome::InternalError(detail) => {
            error!(url = request.uri(), %detail, "error during render");
            page(&state, StatusCode::InternalServerError, HTML, INTERNAL_ERROR_BODY)
        }
    }
}

fn page(state: &AppState, status: StatusCode, content_type: impl Into<String>, body: impl Into<Bytes>) -> Response {
    Response::new(status)
        .header("Content-Type", content_type)
        .header("Server", state.server_info())
        .body(body.into())
}
