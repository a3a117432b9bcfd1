//! Render artifacts: the document template, the server bundle, and the
//! optional client manifest produced by a build.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use super::RenderContext;

/// Marker in the document template where rendered markup is inserted.
pub const OUTLET: &str = "<!--ssr-outlet-->";

/// Errors raised while loading an artifact. They never reach clients.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("template has no `<!--ssr-outlet-->` slot")]
    MissingOutlet,
}

/// Where a build leaves its artifact files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSources {
    pub template: PathBuf,
    pub server_bundle: PathBuf,
    /// Optional: a missing file here just means no asset injection.
    pub client_manifest: Option<PathBuf>,
}

impl ArtifactSources {
    /// Every path the artifact depends on.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        [Some(&self.template), Some(&self.server_bundle), self.client_manifest.as_ref()]
            .into_iter()
            .flatten()
            .map(PathBuf::as_path)
    }
}

/// A document template split around its outlet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    head: String,
    tail: String,
}

impl Template {
    /// Splits `source` at the first [`OUTLET`].
    ///
    /// # Errors
    ///
    /// [`ArtifactError::MissingOutlet`] if the marker is absent.
    pub fn parse(source: impl AsRef<str>) -> Result<Self, ArtifactError> {
        let (head, tail) = source
            .as_ref()
            .split_once(OUTLET)
            .ok_or(ArtifactError::MissingOutlet)?;
        Ok(Self {
            head: head.to_owned(),
            tail: tail.to_owned(),
        })
    }

    /// Assembles the final document.
    ///
    /// `{{ name }}` is replaced with the HTML-escaped context value,
    /// `{{{ name }}}` with the raw value; unknown names render empty.
    /// Client-manifest tags go before `</head>` (styles, preload, prefetch)
    /// and before `</body>` (scripts).
    pub fn render(&self, app_html: &str, context: &RenderContext, manifest: Option<&ClientManifest>) -> String {
        let mut head = interpolate(&self.head, context);
        let mut tail = interpolate(&self.tail, context);

        if let Some(manifest) = manifest {
            let (head_tags, body_tags) = manifest.tags();
            insert_before(&mut head, "</head>", &head_tags);
            insert_before(&mut tail, "</body>", &body_tags);
        }

        let mut document = String::with_capacity(head.len() + app_html.len() + tail.len());
        document.push_str(&head);
        document.push_str(app_html);
        document.push_str(&tail);
        document
    }
}

/// The server bundle: what the page-table engine renders from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BundleDescriptor {
    /// Build entry name, surfaced in logs.
    #[serde(default)]
    pub entry: String,
    /// Path → application markup.
    #[serde(default)]
    pub pages: BTreeMap<String, String>,
    /// Path → redirect target.
    #[serde(default)]
    pub redirects: BTreeMap<String, String>,
}

/// Client build manifest listing the assets a page should reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientManifest {
    #[serde(default)]
    pub public_path: String,
    /// Assets every page needs up front.
    #[serde(default)]
    pub initial: Vec<String>,
    /// Lazily loaded chunks, hinted with `prefetch`.
    #[serde(default, rename = "async")]
    pub async_chunks: Vec<String>,
}

impl ClientManifest {
    fn href(&self, file: &str) -> String {
        escape_html(&format!("{}{}", self.public_path, file))
    }

    fn tags(&self) -> (String, String) {
        let mut head = String::new();
        let mut body = String::new();
        for file in &self.initial {
            let href = self.href(file);
            if file.ends_with(".css") {
                head.push_str(&format!(r#"<link rel="stylesheet" href="{href}">"#));
            } else if file.ends_with(".js") {
                head.push_str(&format!(r#"<link rel="preload" href="{href}" as="script">"#));
                body.push_str(&format!(r#"<script src="{href}" defer></script>"#));
            }
        }
        for file in &self.async_chunks {
            head.push_str(&format!(r#"<link rel="prefetch" href="{}">"#, self.href(file)));
        }
        (head, body)
    }
}

/// Everything needed to render pages for one build. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderArtifact {
    template: Template,
    bundle: BundleDescriptor,
    client_manifest: Option<ClientManifest>,
}

impl RenderArtifact {
    pub fn new(template: Template, bundle: BundleDescriptor, client_manifest: Option<ClientManifest>) -> Self {
        Self {
            template,
            bundle,
            client_manifest,
        }
    }

    /// Reads and validates the artifact files named by `sources`.
    ///
    /// # Errors
    ///
    /// Any unreadable file, malformed JSON, or a template without an outlet.
    /// An absent client manifest file is not an error.
    pub async fn load(sources: &ArtifactSources) -> Result<Self, ArtifactError> {
        let template = Template::parse(read(&sources.template).await?)?;
        let bundle = parse_json(&sources.server_bundle, &read(&sources.server_bundle).await?)?;

        let client_manifest = match &sources.client_manifest {
            None => None,
            Some(path) => match tokio::fs::read_to_string(path).await {
                Ok(raw) => Some(parse_json(path, &raw)?),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    debug!(path = %path.display(), "no client manifest, skipping asset injection");
                    None
                }
                Err(source) => {
                    return Err(ArtifactError::Read {
                        path: path.clone(),
                        source,
                    });
                }
            },
        };

        Ok(Self::new(template, bundle, client_manifest))
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    pub fn bundle(&self) -> &BundleDescriptor {
        &self.bundle
    }

    pub fn client_manifest(&self) -> Option<&ClientManifest> {
        self.client_manifest.as_ref()
    }

    /// Wraps rendered application markup in this artifact's template.
    pub fn document(&self, app_html: &str, context: &RenderContext) -> String {
        self.template
            .render(app_html, context, self.client_manifest.as_ref())
    }
}

async fn read(path: &Path) -> Result<String, ArtifactError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ArtifactError::Read {
            path: path.to_owned(),
            source,
        })
}

fn parse_json<T: serde::de::DeserializeOwned>(path: &Path, raw: &str) -> Result<T, ArtifactError> {
    serde_json::from_str(raw).map_err(|source| ArtifactError::Parse {
        path: path.to_owned(),
        source,
    })
}

fn insert_before(haystack: &mut String, marker: &str, insert: &str) {
    if insert.is_empty() {
        return;
    }
    match haystack.rfind(marker) {
        Some(pos) => haystack.insert_str(pos, insert),
        None => haystack.push_str(insert),
    }
}

fn interpolate(source: &str, context: &RenderContext) -> String {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start..];
        let (raw, open, close) = if after.starts_with("{{{") {
            (true, 3, "}}}")
        } else {
            (false, 2, "}}")
        };
        let Some(end) = after[open..].find(close) else {
            out.push_str(after);
            return out;
        };
        let name = after[open..open + end].trim();
        if let Some(value) = context.lookup(name) {
            if raw {
                out.push_str(value);
            } else {
                out.push_str(&escape_html(value));
            }
        }
        rest = &after[open + end + close.len()..];
    }

    out.push_str(rest);
    out
}

pub(crate) fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    const TEMPLATE: &str = "<html><head><title>{{ title }}</title>{{{ head }}}</head>\
                            <body><!--ssr-outlet--></body></html>";

    #[test]
    fn template_requires_outlet() {
        assert!(matches!(
            Template::parse("<html><body></body></html>"),
            Err(ArtifactError::MissingOutlet)
        ));
    }

    #[test]
    fn interpolation_escapes_unless_triple_braced() {
        let template = Template::parse(TEMPLATE).unwrap();
        let ctx = RenderContext::new("/", "Tom & Jerry <3").with_meta("head", "<meta name=\"x\">");
        let html = template.render("<div id=\"app\"></div>", &ctx, None);
        assert_eq!(
            html,
            "<html><head><title>Tom &amp; Jerry &lt;3</title><meta name=\"x\"></head>\
             <body><div id=\"app\"></div></body></html>"
        );
    }

    #[test]
    fn unknown_and_unterminated_variables() {
        let ctx = RenderContext::new("/", "t");
        assert_eq!(interpolate("a{{ nope }}b", &ctx), "ab");
        assert_eq!(interpolate("a{{ title", &ctx), "a{{ title");
    }

    #[test]
    fn manifest_assets_are_injected() {
        let template = Template::parse(TEMPLATE).unwrap();
        let manifest = ClientManifest {
            public_path: "/dist/".into(),
            initial: vec!["app.css".into(), "app.js".into()],
            async_chunks: vec!["0.js".into()],
        };
        let html = template.render("", &RenderContext::new("/", "t"), Some(&manifest));
        assert!(html.contains(
            r#"<link rel="stylesheet" href="/dist/app.css"><link rel="preload" href="/dist/app.js" as="script"><link rel="prefetch" href="/dist/0.js"></head>"#
        ));
        assert!(html.ends_with(r#"<script src="/dist/app.js" defer></script></body></html>"#));
    }

    #[tokio::test]
    async fn load_reads_all_three_files() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("index.template.html");
        let bundle = dir.path().join("server-bundle.json");
        let manifest = dir.path().join("client-manifest.json");
        fs::write(&template, TEMPLATE).unwrap();
        fs::write(&bundle, r#"{"entry":"main","pages":{"/":"<p>home</p>"}}"#).unwrap();
        fs::write(&manifest, r#"{"publicPath":"/dist/","initial":["app.js"]}"#).unwrap();

        let artifact = RenderArtifact::load(&ArtifactSources {
            template,
            server_bundle: bundle,
            client_manifest: Some(manifest),
        })
        .await
        .unwrap();

        assert_eq!(artifact.bundle().entry, "main");
        assert_eq!(artifact.bundle().pages["/"], "<p>home</p>");
        assert_eq!(artifact.client_manifest().unwrap().initial, vec!["app.js"]);
    }

    #[tokio::test]
    async fn missing_client_manifest_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("t.html");
        let bundle = dir.path().join("b.json");
        fs::write(&template, TEMPLATE).unwrap();
        fs::write(&bundle, "{}").unwrap();

        let artifact = RenderArtifact::load(&ArtifactSources {
            template,
            server_bundle: bundle,
            client_manifest: Some(dir.path().join("absent.json")),
        })
        .await
        .unwrap();
        assert!(artifact.client_manifest().is_none());
    }

    #[tokio::test]
    async fn malformed_bundle_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("t.html");
        let bundle = dir.path().join("b.json");
        fs::write(&template, TEMPLATE).unwrap();
        fs::write(&bundle, "{ not json").unwrap();

        let err = RenderArtifact::load(&ArtifactSources {
            template,
            server_bundle: bundle.clone(),
            client_manifest: None,
        })
        .await
        .unwrap_err();
        assert!(matches!(&err, ArtifactError::Parse { path, .. } if *path == bundle));
    }

    #[tokio::test]
    async fn missing_template_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = RenderArtifact::load(&ArtifactSources {
            template: dir.path().join("nope.html"),
            server_bundle: dir.path().join("nope.json"),
            client_manifest: None,
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ArtifactError::Read { .. }));
    }
}
