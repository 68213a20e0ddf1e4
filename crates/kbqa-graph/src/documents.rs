//! Encyclopedia article access and HTML-to-text conversion.

use std::collections::HashMap;

use scraper::{ElementRef, Html, Node, Selector};

use crate::error::{GraphError, GraphResult};

/// Source of rendered article HTML, addressed by article title.
pub trait DocumentSource {
    fn fetch_html(&self, title: &str) -> GraphResult<String>;
}

impl<T: DocumentSource + ?Sized> DocumentSource for &T {
    fn fetch_html(&self, title: &str) -> GraphResult<String> {
        (**self).fetch_html(title)
    }
}

impl<T: DocumentSource + ?Sized> DocumentSource for Box<T> {
    fn fetch_html(&self, title: &str) -> GraphResult<String> {
        (**self).fetch_html(title)
    }
}

/// In-memory article store keyed by title.
#[derive(Debug, Clone, Default)]
pub struct StaticDocuments {
    pages: HashMap<String, String>,
}

impl StaticDocuments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, title: impl Into<String>, html: impl Into<String>) -> Self {
        self.pages.insert(title.into(), html.into());
        self
    }
}

impl DocumentSource for StaticDocuments {
    fn fetch_html(&self, title: &str) -> GraphResult<String> {
        self.pages
            .get(title)
            .cloned()
            .ok_or_else(|| GraphError::NotFound(format!("no page titled {title:?}")))
    }
}

#[cfg(feature = "http")]
pub use http::HttpDocumentSource;

#[cfg(feature = "http")]
mod http {
    use reqwest::blocking::Client;

    use super::DocumentSource;
    use crate::config::GraphSettings;
    use crate::error::{GraphError, GraphResult};
    use crate::sparql::build_http_client;

    /// REST page-HTML client (`{base}{title}`).
    pub struct HttpDocumentSource {
        client: Client,
        base: url::Url,
    }

    impl HttpDocumentSource {
        pub fn new(settings: &GraphSettings) -> GraphResult<Self> {
            let mut base = settings.article_base_url.clone();
            if !base.ends_with('/') {
                base.push('/');
            }
            let base = url::Url::parse(&base).map_err(|e| {
                GraphError::Config(format!("invalid article base url {base:?}: {e}"))
            })?;
            Ok(Self {
                client: build_http_client(&settings.user_agent, settings.timeout_secs)?,
                base,
            })
        }
    }

    impl DocumentSource for HttpDocumentSource {
        fn fetch_html(&self, title: &str) -> GraphResult<String> {
            let url = super::article_url(&self.base, title)?;

            let resp = self
                .client
                .get(url.clone())
                .send()
                .map_err(|e| GraphError::Network(format!("failed to fetch {url}: {e}")))?;
            let status = resp.status();
            if !status.is_success() {
                tracing::warn!(status = status.as_u16(), url = %url, "article fetch failed");
                return Err(GraphError::Status {
                    status: status.as_u16(),
                    body: format!("article fetch failed for {url}"),
                });
            }
            resp.text()
                .map_err(|e| GraphError::Network(format!("failed to read body for {url}: {e}")))
        }
    }
}

/// Resolve `title` against the page-HTML base URL.
///
/// Titles come from article URLs: already percent-encoded, except for
/// characters that are legal in a path but not in a single segment. `:` must
/// be escaped too, or `Halo:_Combat_Evolved` parses as a URL with scheme
/// `halo`.
pub fn article_url(base: &url::Url, title: &str) -> GraphResult<url::Url> {
    let title = title.trim().trim_start_matches('/');
    if title.is_empty() {
        return Err(GraphError::Config("empty article title".to_string()));
    }
    let mut segment = String::with_capacity(title.len());
    for ch in title.chars() {
        match ch {
            ':' => segment.push_str("%3A"),
            '/' => segment.push_str("%2F"),
            '?' => segment.push_str("%3F"),
            '#' => segment.push_str("%23"),
            ' ' => segment.push('_'),
            other => segment.push(other),
        }
    }
    base.join(&segment)
        .map_err(|e| GraphError::Config(format!("invalid article title {title:?}: {e}")))
}

const SKIPPED_TAGS: &[&str] = &[
    "script", "style", "nav", "aside", "footer", "sup", "table", "noscript", "head",
];

const SKIPPED_CLASSES: &[&str] = &[
    "hatnote",
    "infobox",
    "sidebar",
    "navbox",
    "reflist",
    "mw-references",
    "metadata",
    "mw-editsection",
    "reference",
];

const BLOCK_TAGS: &[&str] = &[
    "p", "div", "section", "li", "ul", "ol", "dl", "dd", "dt", "h1", "h2", "h3", "h4", "h5",
    "h6", "blockquote", "figcaption", "pre",
];

/// Convert rendered article HTML to plain text.
///
/// Boilerplate elements (navigation, reference markers, tables, infoboxes, and
/// similar) are removed. When the page has a `#mw-content-text` container only
/// that subtree is used. Output has one non-empty, trimmed line per block.
pub fn html_to_plain_text(html: &str) -> String {
    let doc = Html::parse_document(html);

    let root = ["#mw-content-text", "body"]
        .iter()
        .filter_map(|sel| Selector::parse(sel).ok())
        .find_map(|sel| doc.select(&sel).next())
        .unwrap_or_else(|| doc.root_element());

    let mut raw = String::new();
    collect_text(root, &mut raw);

    let mut out = String::new();
    for line in raw.lines() {
        let line = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if line.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&line);
    }
    out
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(_) => {
                let Some(child) = ElementRef::wrap(child) else {
                    continue;
                };
                if is_skipped(&child) {
                    continue;
                }
                let name = child.value().name();
                if name == "br" {
                    out.push('\n');
                    continue;
                }
                let block = BLOCK_TAGS.contains(&name);
                if block {
                    out.push('\n');
                }
                collect_text(child, out);
                if block {
                    out.push('\n');
                }
            }
            _ => {}
        }
    }
}

fn is_skipped(element: &ElementRef<'_>) -> bool {
    let value = element.value();
    SKIPPED_TAGS.contains(&value.name())
        || value.classes().any(|class| SKIPPED_CLASSES.contains(&class))
}

/// Truncate to at most `max_chars` characters, on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> (&str, bool) {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => (&text[..idx], true),
        None => (text, false),
    }
}
