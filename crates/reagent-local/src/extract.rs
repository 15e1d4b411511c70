//! URL → readable text.
//!
//! Two paths, tried in order:
//! - rendered: a headless browser loads the page (JS included) and hands back the final HTML
//! - static: a plain GET of the raw HTML
//!
//! Both paths run the same cleaning, and each reports an [`Attempt`]. The extractor never
//! fails: when neither path produces enough text, the document carries a placeholder.

use encoding_rs::{Encoding, UTF_8};
use reagent_core::{
    Attempt, DelayPolicy, ExtractedDocument, ExtractionPath, FetchBackend, FetchRequest,
    FetchResponse, RenderRequest, Renderer,
};
use std::sync::Arc;

/// Subtrees that never hold readable content.
///
/// `noscript` is parsed as raw text (scripting is on), so anything inside it would surface
/// as literal markup.
pub const STRIPPED_TAGS: [&str; 8] = [
    "script", "style", "noscript", "img", "form", "iframe", "nav", "footer",
];

/// How far into the body to look for a `<meta charset>` declaration.
const META_SNIFF_BYTES: usize = 1024;

/// Cleaned text must be strictly longer than this (in chars) to count as content.
pub const MIN_CONTENT_CHARS: usize = 100;

pub const TOO_SHORT_MARKER: &str = "Content too short from";

/// Collapse every whitespace run to a single space and trim the ends.
pub fn normalize_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Visible text of an HTML document, with non-content subtrees removed.
///
/// Text nodes are trimmed, empty ones dropped, the rest joined with single spaces, and the
/// result whitespace-normalized.
pub fn clean_html(html: &str) -> String {
    let doc = html_scraper::Html::parse_document(html);
    let mut parts: Vec<&str> = Vec::new();
    for node in doc.tree.root().descendants() {
        let html_scraper::Node::Text(text) = node.value() else {
            continue;
        };
        let stripped = node.ancestors().any(|a| match a.value() {
            html_scraper::Node::Element(el) => STRIPPED_TAGS.contains(&el.name()),
            _ => false,
        });
        if stripped {
            continue;
        }
        let t = text.trim();
        if !t.is_empty() {
            parts.push(t);
        }
    }
    normalize_ws(&parts.join(" "))
}

fn charset_label(s: &str) -> Option<&str> {
    let lower = s.to_ascii_lowercase();
    let i = lower.find("charset=")? + "charset=".len();
    let rest = s[i..].trim_start_matches(['"', '\'', ' ']);
    let end = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.')))
        .unwrap_or(rest.len());
    Some(&rest[..end]).filter(|l| !l.is_empty())
}

/// Encoding of an HTML body: BOM, then `Content-Type` charset, then `<meta charset>`,
/// then UTF-8.
pub fn sniff_encoding(bytes: &[u8], content_type: Option<&str>) -> &'static Encoding {
    if let Some((enc, _)) = Encoding::for_bom(bytes) {
        return enc;
    }
    if let Some(enc) = content_type
        .and_then(charset_label)
        .and_then(|l| Encoding::for_label(l.as_bytes()))
    {
        return enc;
    }
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(META_SNIFF_BYTES)]);
    let lower = head.to_ascii_lowercase();
    if let Some(i) = lower.find("<meta") {
        let label = charset_label(&head[i..]);
        if let Some(enc) = label.and_then(|l| Encoding::for_label(l.as_bytes())) {
            return enc;
        }
    }
    UTF_8
}

/// Body text of a static response, decoded with its declared encoding. Undecodable bytes
/// become U+FFFD.
pub fn decode_body(resp: &FetchResponse) -> String {
    let enc = sniff_encoding(&resp.bytes, resp.content_type.as_deref());
    let (text, _, _) = enc.decode(&resp.bytes);
    text.into_owned()
}

pub fn too_short_placeholder(url: &str) -> String {
    format!("{TOO_SHORT_MARKER} {url}")
}

pub fn failure_placeholder(url: &str, detail: &str) -> String {
    format!("Could not retrieve content from {url}: {detail}")
}

#[derive(Debug, Clone)]
pub struct ExtractConfig {
    pub min_chars: usize,
    pub render_timeout_ms: u64,
    pub fetch_timeout_ms: u64,
    pub max_bytes: u64,
    pub delays: DelayPolicy,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            min_chars: MIN_CONTENT_CHARS,
            render_timeout_ms: 15_000,
            fetch_timeout_ms: 10_000,
            max_bytes: 5_000_000,
            delays: DelayPolicy::default(),
        }
    }
}

#[derive(Clone)]
pub struct Extractor {
    renderer: Arc<dyn Renderer>,
    fetcher: Arc<dyn FetchBackend>,
    cfg: ExtractConfig,
}

impl Extractor {
    pub fn new(
        renderer: Arc<dyn Renderer>,
        fetcher: Arc<dyn FetchBackend>,
        cfg: ExtractConfig,
    ) -> Self {
        Self {
            renderer,
            fetcher,
            cfg,
        }
    }

    pub fn config(&self) -> &ExtractConfig {
        &self.cfg
    }

    fn judge(&self, text: String) -> Attempt {
        let chars = text.chars().count();
        if chars > self.cfg.min_chars {
            Attempt::Success(text)
        } else {
            Attempt::TooShort { chars }
        }
    }

    pub async fn attempt_rendered(&self, url: &str) -> Attempt {
        let req = RenderRequest {
            url: url.to_string(),
            timeout_ms: self.cfg.render_timeout_ms,
            headers: crate::browser_headers(),
            delays: self.cfg.delays,
        };
        match self.renderer.render(&req).await {
            Ok(page) => self.judge(clean_html(&page.html)),
            Err(e) => Attempt::Error(e.to_string()),
        }
    }

    pub async fn attempt_static(&self, url: &str) -> Attempt {
        let req = FetchRequest {
            url: url.to_string(),
            timeout_ms: Some(self.cfg.fetch_timeout_ms),
            max_bytes: Some(self.cfg.max_bytes),
            headers: crate::static_fetch_headers(),
        };
        match self.fetcher.fetch(&req).await {
            Ok(resp) if resp.is_success() => self.judge(clean_html(&decode_body(&resp))),
            Ok(resp) => Attempt::Error(format!(
                "HTTP {} for url {}",
                resp.status, resp.final_url
            )),
            Err(e) => Attempt::Error(e.to_string()),
        }
    }

    /// Extract one URL. Always yields a document; failures become placeholder text.
    pub async fn extract(&self, url: &str) -> ExtractedDocument {
        let doc = |text: String, path: ExtractionPath| ExtractedDocument {
            url: url.to_string(),
            text,
            path,
        };

        match self.attempt_rendered(url).await {
            Attempt::Success(text) => {
                tracing::debug!(url, chars = text.chars().count(), "rendered extraction accepted");
                return doc(text, ExtractionPath::Rendered);
            }
            Attempt::TooShort { chars } => {
                tracing::debug!(
                    url,
                    chars,
                    renderer = self.renderer.name(),
                    "rendered text too short; falling back"
                );
            }
            Attempt::Error(e) => {
                tracing::warn!(
                    url,
                    error = %e,
                    renderer = self.renderer.name(),
                    "rendered fetch failed; falling back"
                );
            }
        }

        match self.attempt_static(url).await {
            Attempt::Success(text) => {
                tracing::debug!(url, chars = text.chars().count(), "static extraction accepted");
                doc(text, ExtractionPath::Static)
            }
            Attempt::TooShort { chars } => {
                tracing::warn!(url, chars, "static text too short");
                doc(too_short_placeholder(url), ExtractionPath::Placeholder)
            }
            Attempt::Error(e) => {
                tracing::warn!(url, error = %e, "static fetch failed");
                doc(failure_placeholder(url, &e), ExtractionPath::Placeholder)
            }
        }
    }

    /// Extract each URL in order, one at a time. Output is index-aligned with `urls`.
    pub async fn extract_all(&self, urls: &[String]) -> Vec<ExtractedDocument> {
        let mut out = Vec::with_capacity(urls.len());
        for url in urls {
            out.push(self.extract(url).await);
        }
        out
    }
}
