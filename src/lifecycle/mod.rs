//! Renderer lifecycle: owns the active [`RendererHandle`], gates requests
//! until the first artifact is installed, and swaps handles atomically.
//!
//! The current state lives in a [`tokio::sync::watch`] channel. The lifecycle
//! is its only writer; every request is a reader that clones an `Arc` snapshot
//! of the handle and renders against it, so an install never pauses readers
//! and never changes the artifact under a render that already started.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info};

use crate::render::{ArtifactError, ArtifactSources, RenderArtifact, RenderEngine, RendererHandle};

mod watcher;

pub use watcher::ArtifactWatcher;

/// Where the lifecycle is.
///
/// There is no error state: a failed load leaves whatever was installed
/// before (or nothing) in place.
#[derive(Debug, Clone, Default)]
pub enum RendererState {
    /// No artifact has loaded yet; requests wait.
    #[default]
    Uninitialized,
    /// Serving with this handle.
    Ready(Arc<RendererHandle>),
    /// A reload is underway; requests keep using the old handle.
    SwapPending(Arc<RendererHandle>),
}

impl RendererState {
    /// The handle requests should render with, if any.
    pub fn handle(&self) -> Option<&Arc<RendererHandle>> {
        match self {
            Self::Uninitialized => None,
            Self::Ready(handle) | Self::SwapPending(handle) => Some(handle),
        }
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("renderer not ready after {waited:?}")]
    NotReady { waited: Duration },
}

pub struct RendererLifecycle {
    state: watch::Sender<RendererState>,
    engine: Arc<dyn RenderEngine>,
    ready_timeout: Duration,
    generation: AtomicU64,
}

impl RendererLifecycle {
    pub fn new(engine: Arc<dyn RenderEngine>, ready_timeout: Duration) -> Self {
        let (state, _) = watch::channel(RendererState::Uninitialized);
        Self {
            state,
            engine,
            ready_timeout,
            generation: AtomicU64::new(0),
        }
    }

    /// Returns the handle to render with, waiting for the first install if
    /// necessary.
    ///
    /// Once any artifact has been installed this never suspends.
    ///
    /// # Errors
    ///
    /// [`LifecycleError::NotReady`] if nothing is installed within the ready
    /// timeout.
    pub async fn current_handle(&self) -> Result<Arc<RendererHandle>, LifecycleError> {
        if let Some(handle) = self.state.borrow().handle() {
            return Ok(Arc::clone(handle));
        }

        let mut rx = self.state.subscribe();
        let not_ready = LifecycleError::NotReady {
            waited: self.ready_timeout,
        };
        let wait = async {
            let state = rx.wait_for(|state| state.handle().is_some()).await.ok()?;
            state.handle().cloned()
        };
        match tokio::time::timeout(self.ready_timeout, wait).await {
            Ok(Some(handle)) => Ok(handle),
            Ok(None) | Err(_) => Err(not_ready),
        }
    }

    /// Installs `artifact` as the active renderer and wakes every waiting
    /// request. Returns the new generation number.
    pub fn on_artifact_ready(&self, artifact: RenderArtifact) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = Arc::new(RendererHandle::new(artifact, Arc::clone(&self.engine), generation));
        let previous = self.state.send_replace(RendererState::Ready(handle));
        info!(
            generation,
            engine = self.engine.name(),
            first = previous.handle().is_none(),
            "renderer artifact installed"
        );
        generation
    }

    /// Marks a reload as started. Has no effect before the first install.
    pub fn begin_swap(&self) {
        self.state.send_if_modified(|state| match state {
            RendererState::Ready(handle) => {
                *state = RendererState::SwapPending(Arc::clone(handle));
                true
            }
            _ => false,
        });
    }

    /// Records a failed load. The previously installed handle, if any, stays.
    pub fn on_artifact_failed(&self, err: &ArtifactError) {
        error!(error = %err, "renderer artifact failed to load, keeping previous");
        self.state.send_if_modified(|state| match state {
            RendererState::SwapPending(handle) => {
                *state = RendererState::Ready(Arc::clone(handle));
                true
            }
            _ => false,
        });
    }

    /// Reads the artifact files and installs the result.
    ///
    /// # Errors
    ///
    /// Returns the load error after recording it via
    /// [`on_artifact_failed`](Self::on_artifact_failed).
    pub async fn load(&self, sources: &ArtifactSources) -> Result<u64, ArtifactError> {
        match RenderArtifact::load(sources).await {
            Ok(artifact) => Ok(self.on_artifact_ready(artifact)),
            Err(err) => {
                self.on_artifact_failed(&err);
                Err(err)
            }
        }
    }

    /// A snapshot of the current state.
    pub fn state(&self) -> RendererState {
        self.state.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.state.borrow().handle().is_some()
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }
}

impl std::fmt::Debug for RendererLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RendererLifecycle")
            .field("state", &*self.state.borrow())
            .field("engine", &self.engine.name())
            .field("ready_timeout", &self.ready_timeout)
            .finish()
    }
}
