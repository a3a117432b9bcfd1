#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use ssrd::assets::StaticFiles;
use ssrd::cache::{CacheConfig, ResponseCache};
use ssrd::dispatch::{AppState, Dispatcher};
use ssrd::lifecycle::RendererLifecycle;
use ssrd::proxy::UpstreamProxy;
use ssrd::render::{
    BundleDescriptor, PageTableEngine, RenderArtifact, RenderContext, RenderEngine, RenderError,
    RenderFuture, Template,
};
use tokio::sync::Semaphore;

pub const TEMPLATE: &str =
    "<!DOCTYPE html><html><head><title>{{ title }}</title></head><body><!--ssr-outlet--></body></html>";

static PAGES: PageTableEngine = PageTableEngine;

/// Page-table rendering that counts calls, fails on `/boom`, panics on
/// `/panic`, and can be held back with a semaphore.
#[derive(Default)]
pub struct CountingEngine {
    calls: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
}

impl CountingEngine {
    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            gate: Some(gate),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RenderEngine for CountingEngine {
    fn name(&self) -> &str {
        "counting"
    }

    fn render<'a>(&'a self, artifact: &'a RenderArtifact, context: RenderContext) -> RenderFuture<'a> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            if let Some(gate) = &self.gate {
                let _permit = gate.acquire().await.map_err(|e| RenderError::failed(e.to_string()))?;
            }
            let path = context.path().to_owned();
            match path.as_str() {
                "/boom" => Err(RenderError::failed("TypeError: cannot read property 'x'")),
                "/panic" => panic!("render blew up"),
                _ => PAGES.render(artifact, context).await,
            }
        })
    }
}

pub fn artifact(home: &str) -> RenderArtifact {
    let mut bundle = BundleDescriptor::default();
    bundle.entry = "app".into();
    bundle.pages.insert("/".into(), home.into());
    bundle.pages.insert("/about".into(), "<main>about</main>".into());
    bundle.redirects.insert("/old".into(), "/about".into());
    RenderArtifact::new(Template::parse(TEMPLATE).unwrap(), bundle, None)
}

pub struct Fixture {
    pub dispatcher: Dispatcher,
    pub engine: Arc<CountingEngine>,
    pub lifecycle: Arc<RendererLifecycle>,
    pub cache: Arc<ResponseCache>,
}

pub struct FixtureBuilder {
    engine: CountingEngine,
    cache: CacheConfig,
    ready_timeout: Duration,
    upstream: String,
    assets: StaticFiles,
    production: bool,
}

impl FixtureBuilder {
    pub fn new() -> Self {
        Self {
            engine: CountingEngine::default(),
            cache: CacheConfig::default(),
            ready_timeout: Duration::from_secs(30),
            // Nothing listens on the discard port.
            upstream: "http://127.0.0.1:9".into(),
            assets: StaticFiles::new(false),
            production: false,
        }
    }

    pub fn engine(mut self, engine: CountingEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn upstream(mut self, host: impl Into<String>) -> Self {
        self.upstream = host.into();
        self
    }

    pub fn static_root(mut self, root: &Path, production: bool) -> Self {
        self.assets = StaticFiles::new(production)
            .dir("/dist", root.join("dist"))
            .file("/manifest.json", root.join("manifest.json"));
        self.production = production;
        self
    }

    /// Builds the dispatcher without installing any artifact.
    pub fn build(self) -> Fixture {
        let engine = Arc::new(self.engine);
        let lifecycle = Arc::new(RendererLifecycle::new(
            Arc::clone(&engine) as Arc<dyn RenderEngine>,
            self.ready_timeout,
        ));
        let cache = Arc::new(ResponseCache::new(&self.cache));
        let proxy = UpstreamProxy::new(&self.upstream, Duration::from_secs(5)).unwrap();
        let state = AppState::new(Arc::clone(&cache), Arc::clone(&lifecycle), proxy, self.assets)
            .upstream_paths(["/v1/get_entry_by_rank"])
            .default_title("Juejin")
            .production(self.production);
        Fixture {
            dispatcher: Dispatcher::new(state),
            engine,
            lifecycle,
            cache,
        }
    }

    /// Builds the dispatcher with `artifact("<main>home</main>")` installed.
    pub fn ready(self) -> Fixture {
        let fixture = self.build();
        fixture.lifecycle.on_artifact_ready(artifact("<main>home</main>"));
        fixture
    }
}
