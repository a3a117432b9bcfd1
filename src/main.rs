use std::error::Error;
use std::process;
use std::sync::Arc;

use clap::Parser;
use ssrd::{
    Request, Server,
    cache::ResponseCache,
    config::Config,
    dispatch::{AppState, Dispatcher},
    lifecycle::{ArtifactWatcher, RendererLifecycle},
    proxy::UpstreamProxy,
    render::PageTableEngine,
    telemetry,
};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        if tracing::dispatcher::has_been_set() {
            error!(error = %err, "ssrd exited with an error");
        } else {
            eprintln!("ssrd: {err}");
        }
        process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error>> {
    let config = Config::parse();
    telemetry::init(config.log_level, config.log_json)?;

    let production = config.is_production();
    info!(
        production,
        micro_cache = config.micro_cache,
        upstream = %config.upstream_host,
        "starting ssrd"
    );

    let lifecycle = Arc::new(RendererLifecycle::new(
        Arc::new(PageTableEngine),
        config.ready_timeout(),
    ));
    let sources = config.artifact_sources();
    if production {
        // Requests wait on the readiness gate if this fails; the error is
        // already logged by the lifecycle.
        if lifecycle.load(&sources).await.is_err() {
            warn!("no render artifact loaded at startup");
        }
    } else {
        ArtifactWatcher::new(
            Arc::clone(&lifecycle),
            sources,
            config.artifact_poll_interval(),
        )
        .spawn();
    }

    let cache = Arc::new(ResponseCache::new(&config.cache_config()));
    Arc::clone(&cache).spawn_sweeper(config.cache_sweep_interval());

    let proxy = UpstreamProxy::new(&config.upstream_host, config.upstream_timeout())?;
    let state = AppState::new(cache, lifecycle, proxy, config.static_files())
        .upstream_paths(config.upstream_paths.clone())
        .default_title(config.page_title.clone())
        .production(production);
    let dispatcher = Arc::new(Dispatcher::new(state));

    let server = Server::bind(config.bind_addr()).await?;
    server
        .run_until_shutdown(
            move |req: Request| {
                let dispatcher = Arc::clone(&dispatcher);
                async move { dispatcher.dispatch(req).await }
            },
            shutdown_signal(),
        )
        .await?;

    info!("ssrd stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
