//! Page rendering: the per-request [`RenderContext`], the pluggable
//! [`RenderEngine`] capability, and the [`RendererHandle`] that binds one
//! engine to one immutable [`RenderArtifact`].
//!
//! The engine produces the application markup for a URL; the handle wraps it
//! in the artifact's document template and classifies the result as a
//! [`RenderOutcome`].

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;

mod artifact;
mod page_table;

pub use artifact::{
    ArtifactError, ArtifactSources, BundleDescriptor, ClientManifest, OUTLET, RenderArtifact,
    Template,
};
pub use page_table::PageTableEngine;

/// Input to one render: built fresh for each request and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderContext {
    url: String,
    title: String,
    meta: BTreeMap<String, String>,
}

impl RenderContext {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            meta: BTreeMap::new(),
        }
    }

    /// Adds a page-scoped metadata value, available to templates as `{{ key }}`.
    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// The request target being rendered: path plus query.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The URL path without its query string.
    pub fn path(&self) -> &str {
        self.url.split('?').next().unwrap_or_default()
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn meta(&self) -> &BTreeMap<String, String> {
        &self.meta
    }

    /// Resolves a template variable: `title`, `url`, or a metadata key.
    pub fn lookup(&self, name: &str) -> Option<&str> {
        match name {
            "title" => Some(&self.title),
            "url" => Some(&self.url),
            other => self.meta.get(other).map(String::as_str),
        }
    }
}

/// How a render can fail to produce a page.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    /// The application asked for the client to be sent elsewhere.
    #[error("redirect requested to {url}")]
    Redirect { url: String },

    /// No page exists at this URL.
    #[error("page not found")]
    NotFound,

    /// Rendering itself broke.
    #[error("render failed: {detail}")]
    Failed { detail: String },
}

impl RenderError {
    pub fn failed(detail: impl Into<String>) -> Self {
        Self::Failed {
            detail: detail.into(),
        }
    }
}

/// The classified result of one render attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    Success(String),
    Redirect(String),
    NotFound,
    InternalError(String),
}

impl From<RenderError> for RenderOutcome {
    fn from(err: RenderError) -> Self {
        match err {
            RenderError::Redirect { url } => Self::Redirect(url),
            RenderError::NotFound => Self::NotFound,
            RenderError::Failed { detail } => Self::InternalError(detail),
        }
    }
}

impl From<Result<String, RenderError>> for RenderOutcome {
    fn from(result: Result<String, RenderError>) -> Self {
        match result {
            Ok(html) => Self::Success(html),
            Err(err) => err.into(),
        }
    }
}

/// Future returned by [`RenderEngine::render`].
pub type RenderFuture<'a> = Pin<Box<dyn Future<Output = Result<String, RenderError>> + Send + 'a>>;

/// The render capability: turns an artifact and a context into application markup.
///
/// Implementations read the artifact but must not touch shared server state.
/// The returned string is the markup for the template's outlet, not a full
/// document.
pub trait RenderEngine: Send + Sync + 'static {
    /// Short identifier used in the `Server` header.
    fn name(&self) -> &str;

    fn render<'a>(&'a self, artifact: &'a RenderArtifact, context: RenderContext) -> RenderFuture<'a>;
}

/// One render artifact bound to the engine that renders it.
///
/// Handles are immutable. A swap installs a new handle; requests that already
/// hold the old one keep rendering against it.
pub struct RendererHandle {
    artifact: Arc<RenderArtifact>,
    engine: Arc<dyn RenderEngine>,
    generation: u64,
}

impl RendererHandle {
    pub fn new(artifact: RenderArtifact, engine: Arc<dyn RenderEngine>, generation: u64) -> Self {
        Self {
            artifact: Arc::new(artifact),
            engine,
            generation,
        }
    }

    pub fn artifact(&self) -> &RenderArtifact {
        &self.artifact
    }

    /// Monotonic install counter, starting at 1 for the first artifact.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    /// Renders `context` into a complete HTML document.
    pub async fn render(&self, context: RenderContext) -> RenderOutcome {
        let page = context.clone();
        match self.engine.render(&self.artifact, context).await {
            Ok(app_html) => RenderOutcome::Success(self.artifact.document(&app_html, &page)),
            Err(err) => err.into(),
        }
    }
}

impl std::fmt::Debug for RendererHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RendererHandle")
            .field("generation", &self.generation)
            .field("engine", &self.engine.name())
            .field("entry", &self.artifact.bundle().entry)
            .finish()
    }
}
