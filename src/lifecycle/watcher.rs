use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::RendererLifecycle;
use crate::render::{ArtifactError, ArtifactSources};

/// Polls the artifact files and reloads the renderer when any of them changes.
///
/// Used for watch-mode deployments where a build tool rewrites the artifact
/// in place. The first check always loads.
#[derive(Debug)]
pub struct ArtifactWatcher {
    lifecycle: Arc<RendererLifecycle>,
    sources: ArtifactSources,
    every: Duration,
    last_seen: Option<Vec<Option<SystemTime>>>,
}

impl ArtifactWatcher {
    pub fn new(lifecycle: Arc<RendererLifecycle>, sources: ArtifactSources, every: Duration) -> Self {
        Self {
            lifecycle,
            sources,
            every,
            last_seen: None,
        }
    }

    /// Reloads if the artifact files changed since the previous check.
    ///
    /// Returns `None` when nothing changed since the last successful load.
    /// A failed load is retried on every check until one succeeds, since a
    /// build may still be writing files whose mtimes will not move again.
    pub async fn check(&mut self) -> Option<Result<u64, ArtifactError>> {
        let fingerprint = self.fingerprint().await;
        if self.last_seen.as_ref() == Some(&fingerprint) {
            return None;
        }
        debug!(files = fingerprint.len(), "artifact files changed");

        self.lifecycle.begin_swap();
        let result = self.lifecycle.load(&self.sources).await;
        if let Ok(generation) = &result {
            info!(generation, "renderer reloaded from disk");
            self.last_seen = Some(fingerprint);
        }
        Some(result)
    }

    pub fn spawn(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                // Failures are already reported by the lifecycle.
                let _ = self.check().await;
            }
        })
    }

    async fn fingerprint(&self) -> Vec<Option<SystemTime>> {
        let mut stamps = Vec::new();
        for path in self.sources.paths() {
            let modified = match tokio::fs::metadata(path).await {
                Ok(meta) => meta.modified().ok(),
                Err(_) => None,
            };
            stamps.push(modified);
        }
        stamps
    }
}
