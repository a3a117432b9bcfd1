//! # ssrd
//!
//! A server-side rendering front server: renders single-page-application
//! routes to HTML on request, absorbs bursts with a short-lived micro-cache,
//! hot-swaps the render artifact without dropping traffic, and streams a
//! handful of API paths through from an upstream host.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use ssrd::assets::StaticFiles;
//! use ssrd::cache::{CacheConfig, ResponseCache};
//! use ssrd::dispatch::{AppState, Dispatcher};
//! use ssrd::lifecycle::RendererLifecycle;
//! use ssrd::proxy::UpstreamProxy;
//! use ssrd::render::PageTableEngine;
//! use ssrd::{Request, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let lifecycle = Arc::new(RendererLifecycle::new(
//!         Arc::new(PageTableEngine),
//!         Duration::from_secs(30),
//!     ));
//!     let state = AppState::new(
//!         Arc::new(ResponseCache::new(&CacheConfig::default())),
//!         lifecycle,
//!         UpstreamProxy::new("http://127.0.0.1:8082", Duration::from_secs(10))?,
//!         StaticFiles::new(false).dir("/dist", "dist"),
//!     );
//!     let dispatcher = Arc::new(Dispatcher::new(state));
//!
//!     let server = Server::bind("127.0.0.1:8081").await?;
//!     server
//!         .run(move |req: Request| {
//!             let dispatcher = Arc::clone(&dispatcher);
//!             async move { dispatcher.dispatch(req).await }
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod http;
pub mod server;

pub mod assets;
pub mod cache;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod lifecycle;
pub mod middleware;
pub mod proxy;
pub mod render;
pub mod router;
pub mod telemetry;

pub use http::{Headers, Method, Request, Response, StatusCode};
pub use router::Router;
pub use server::{Server, ServerError};
