//! Runtime configuration, read once at startup from flags and environment.

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser, builder::BoolishValueParser};
use tracing::level_filters::LevelFilter;

use crate::assets::StaticFiles;
use crate::cache::CacheConfig;
use crate::render::ArtifactSources;

#[derive(Debug, Clone, Parser)]
#[command(name = "ssrd", version, about = "Server-side rendering front server")]
pub struct Config {
    /// Interface to listen on.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 8081)]
    pub port: u16,

    /// `production` loads the artifact once and enables long static caching.
    #[arg(long = "node-env", env = "NODE_ENV", default_value = "development")]
    pub node_env: String,

    /// Toggle the page micro-cache.
    #[arg(
        long = "micro-cache",
        env = "MICRO_CACHE",
        value_name = "BOOL",
        default_value = "true",
        value_parser = BoolishValueParser::new(),
        action = ArgAction::Set
    )]
    pub micro_cache: bool,

    #[arg(long = "micro-cache-ttl-ms", env = "MICRO_CACHE_TTL_MS", default_value_t = 1000)]
    pub micro_cache_ttl_ms: u64,

    #[arg(
        long = "micro-cache-max-entries",
        env = "MICRO_CACHE_MAX_ENTRIES",
        default_value_t = 1000
    )]
    pub micro_cache_max_entries: usize,

    /// How often expired cache entries are reclaimed.
    #[arg(long = "micro-cache-sweep-ms", env = "MICRO_CACHE_SWEEP_MS", default_value_t = 5000)]
    pub micro_cache_sweep_ms: u64,

    /// Base URL of the API host that proxied paths are forwarded to.
    #[arg(
        long = "upstream-host",
        env = "UPSTREAM_HOST",
        value_name = "URL",
        default_value = "http://127.0.0.1:8082"
    )]
    pub upstream_host: String,

    /// Paths forwarded to the upstream host (comma separated in the environment).
    #[arg(
        long = "upstream-path",
        env = "UPSTREAM_PATHS",
        value_delimiter = ',',
        default_value = "/v1/get_entry_by_rank"
    )]
    pub upstream_paths: Vec<String>,

    #[arg(long = "upstream-timeout-secs", env = "UPSTREAM_TIMEOUT_SECS", default_value_t = 10)]
    pub upstream_timeout_secs: u64,

    #[arg(
        long,
        env = "SSR_TEMPLATE",
        value_name = "PATH",
        default_value = "src/index.template.html"
    )]
    pub template: PathBuf,

    #[arg(
        long = "server-bundle",
        env = "SSR_SERVER_BUNDLE",
        value_name = "PATH",
        default_value = "dist/ssr-server-bundle.json"
    )]
    pub server_bundle: PathBuf,

    /// Optional; an empty value disables asset injection.
    #[arg(
        long = "client-manifest",
        env = "SSR_CLIENT_MANIFEST",
        value_name = "PATH",
        default_value = "dist/ssr-client-manifest.json"
    )]
    pub client_manifest: String,

    #[arg(long = "dist-dir", env = "DIST_DIR", value_name = "PATH", default_value = "dist")]
    pub dist_dir: PathBuf,

    #[arg(long = "public-dir", env = "PUBLIC_DIR", value_name = "PATH", default_value = "public")]
    pub public_dir: PathBuf,

    #[arg(
        long = "web-manifest",
        env = "WEB_MANIFEST",
        value_name = "PATH",
        default_value = "manifest.json"
    )]
    pub web_manifest: PathBuf,

    #[arg(
        long = "service-worker",
        env = "SERVICE_WORKER",
        value_name = "PATH",
        default_value = "dist/service-worker.js"
    )]
    pub service_worker: PathBuf,

    /// How long a request waits for the first artifact before failing.
    #[arg(
        long = "ready-timeout-secs",
        env = "RENDERER_READY_TIMEOUT_SECS",
        default_value_t = 30
    )]
    pub ready_timeout_secs: u64,

    /// Artifact poll interval in development mode.
    #[arg(long = "artifact-poll-ms", env = "ARTIFACT_POLL_MS", default_value_t = 500)]
    pub artifact_poll_ms: u64,

    /// Default `<title>` handed to every render.
    #[arg(long = "page-title", env = "PAGE_TITLE", default_value = "ssrd")]
    pub page_title: String,

    /// Base log level (trace|debug|info|warn|error); `RUST_LOG` overrides.
    #[arg(long = "log-level", env = "LOG_LEVEL", value_name = "LEVEL", default_value = "info")]
    pub log_level: LevelFilter,

    /// Emit JSON log lines instead of compact text.
    #[arg(
        long = "log-json",
        env = "LOG_JSON",
        value_name = "BOOL",
        default_value = "false",
        value_parser = BoolishValueParser::new(),
        action = ArgAction::Set
    )]
    pub log_json: bool,
}

impl Config {
    pub fn is_production(&self) -> bool {
        self.node_env == "production"
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            enabled: self.micro_cache,
            ttl: Duration::from_millis(self.micro_cache_ttl_ms),
            max_entries: self.micro_cache_max_entries,
        }
    }

    pub fn cache_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.micro_cache_sweep_ms.max(1))
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn artifact_poll_interval(&self) -> Duration {
        Duration::from_millis(self.artifact_poll_ms.max(1))
    }

    pub fn artifact_sources(&self) -> ArtifactSources {
        let client_manifest =
            (!self.client_manifest.is_empty()).then(|| PathBuf::from(&self.client_manifest));
        ArtifactSources {
            template: self.template.clone(),
            server_bundle: self.server_bundle.clone(),
            client_manifest,
        }
    }

    /// The static mount table.
    pub fn static_files(&self) -> StaticFiles {
        StaticFiles::new(self.is_production())
            .dir("/dist", &self.dist_dir)
            .dir("/public", &self.public_dir)
            .file("/manifest.json", &self.web_manifest)
            .file("/service-worker.js", &self.service_worker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        Config::try_parse_from(std::iter::once("ssrd").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn production_flag_and_cache_settings() {
        let config = parse(&[
            "--node-env",
            "production",
            "--micro-cache",
            "off",
            "--micro-cache-ttl-ms",
            "250",
            "--micro-cache-max-entries",
            "5",
        ]);
        assert!(config.is_production());
        let cache = config.cache_config();
        assert!(!cache.enabled);
        assert_eq!(cache.ttl, Duration::from_millis(250));
        assert_eq!(cache.max_entries, 5);
    }

    #[test]
    fn upstream_paths_accept_a_list() {
        let config = parse(&["--upstream-path", "/v1/a,/v1/b"]);
        assert_eq!(config.upstream_paths, vec!["/v1/a", "/v1/b"]);
    }

    #[test]
    fn empty_client_manifest_disables_it() {
        let config = parse(&["--client-manifest", ""]);
        assert_eq!(config.artifact_sources().client_manifest, None);

        let config = parse(&["--client-manifest", "out/client.json"]);
        assert_eq!(
            config.artifact_sources().client_manifest,
            Some(PathBuf::from("out/client.json"))
        );
    }

    #[test]
    fn bind_addr_and_log_level() {
        let config = parse(&["--host", "127.0.0.1", "--port", "9000", "--log-level", "debug"]);
        assert_eq!(config.bind_addr(), "127.0.0.1:9000");
        assert_eq!(config.log_level, LevelFilter::DEBUG);
    }
}
