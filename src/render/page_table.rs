use std::future;

use super::{RenderArtifact, RenderContext, RenderEngine, RenderError, RenderFuture};

/// Renders pages straight out of the server bundle's page table.
///
/// Redirects are consulted before pages; a path present in neither is
/// [`RenderError::NotFound`]. Lookups ignore the query string and a trailing
/// slash.
#[derive(Debug, Default, Clone, Copy)]
pub struct PageTableEngine;

impl PageTableEngine {
    pub const NAME: &'static str = "page-table";
}

impl RenderEngine for PageTableEngine {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn render<'a>(&'a self, artifact: &'a RenderArtifact, context: RenderContext) -> RenderFuture<'a> {
        let bundle = artifact.bundle();
        let path = normalize(context.path());

        let result = if let Some(target) = bundle.redirects.get(path) {
            Err(RenderError::Redirect {
                url: target.clone(),
            })
        } else if let Some(page) = bundle.pages.get(path) {
            Ok(page.clone())
        } else {
            Err(RenderError::NotFound)
        };

        Box::pin(future::ready(result))
    }
}

fn normalize(path: &str) -> &str {
    match path.strip_suffix('/') {
        Some(trimmed) if !trimmed.is_empty() => trimmed,
        _ => path,
    }
}
