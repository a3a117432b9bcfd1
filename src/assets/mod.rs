//! Static file mounts: build output, public files, and a few single files
//! served at fixed paths.

use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};

use crate::{Response, StatusCode};

/// Thirty days, in seconds.
const PRODUCTION_MAX_AGE: u64 = 60 * 60 * 24 * 30;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    /// Serves files below a directory; the mount prefix is stripped.
    Dir(PathBuf),
    /// Serves exactly one file at exactly the mount path.
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Mount {
    prefix: String,
    target: Target,
}

/// A table of static mounts.
#[derive(Debug, Clone, Default)]
pub struct StaticFiles {
    mounts: Vec<Mount>,
    production: bool,
}

impl StaticFiles {
    /// With `production` set, responses carry a long immutable cache
    /// lifetime; otherwise clients revalidate every time.
    pub fn new(production: bool) -> Self {
        Self {
            mounts: Vec::new(),
            production,
        }
    }

    /// Mounts `root` under `prefix`, e.g. `/dist` → `./dist`.
    #[must_use]
    pub fn dir(mut self, prefix: &str, root: impl Into<PathBuf>) -> Self {
        self.mounts.push(Mount {
            prefix: prefix.trim_end_matches('/').to_owned(),
            target: Target::Dir(root.into()),
        });
        self
    }

    /// Mounts a single file at `path`, e.g. `/manifest.json`.
    #[must_use]
    pub fn file(mut self, path: &str, file: impl Into<PathBuf>) -> Self {
        self.mounts.push(Mount {
            prefix: path.to_owned(),
            target: Target::File(file.into()),
        });
        self
    }

    /// Router patterns covering every mount, in mount order.
    pub fn route_patterns(&self) -> Vec<String> {
        self.mounts
            .iter()
            .map(|mount| match mount.target {
                Target::Dir(_) => format!("{}/*", mount.prefix),
                Target::File(_) => mount.prefix.clone(),
            })
            .collect()
    }

    /// Maps a request path onto a file on disk.
    ///
    /// Returns `None` for paths outside every mount, bare directory paths,
    /// and anything trying to climb out of its mount with `..`.
    pub fn resolve(&self, request_path: &str) -> Option<PathBuf> {
        self.mounts.iter().find_map(|mount| match &mount.target {
            Target::File(file) => (request_path == mount.prefix).then(|| file.clone()),
            Target::Dir(root) => {
                let rest = request_path.strip_prefix(mount.prefix.as_str())?;
                let rest = rest.strip_prefix('/')?;
                if rest.is_empty() || rest.ends_with('/') {
                    return None;
                }
                let relative = Path::new(rest);
                if !relative.components().all(|c| matches!(c, Component::Normal(_))) {
                    return None;
                }
                Some(root.join(relative))
            }
        })
    }

    /// Reads the file behind `request_path`, or answers 404.
    pub async fn serve(&self, request_path: &str) -> Response {
        let Some(file) = self.resolve(request_path) else {
            debug!(path = request_path, "static path rejected");
            return not_found();
        };

        match tokio::fs::read(&file).await {
            Ok(contents) => {
                let mime = mime_guess::from_path(&file).first_or_octet_stream();
                Response::new(StatusCode::Ok)
                    .header("Content-Type", mime.to_string())
                    .header("Cache-Control", self.cache_control())
                    .body(contents)
            }
            Err(err) if is_missing(&err) => {
                debug!(path = request_path, file = %file.display(), "static file not found");
                not_found()
            }
            Err(err) => {
                warn!(file = %file.display(), error = %err, "static file unreadable");
                not_found()
            }
        }
    }

    fn cache_control(&self) -> String {
        if self.production {
            format!("public, max-age={PRODUCTION_MAX_AGE}, immutable")
        } else {
            "no-cache".to_owned()
        }
    }
}

fn is_missing(err: &io::Error) -> bool {
    // Reading a directory reports something other than NotFound on most
    // platforms; it is still not a servable file.
    matches!(err.kind(), io::ErrorKind::NotFound | io::ErrorKind::IsADirectory)
}

fn not_found() -> Response {
    Response::text(StatusCode::NotFound, "404 | Not Found")
}
