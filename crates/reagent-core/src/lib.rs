use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("render failed: {0}")]
    Render(String),
    #[error("search failed: {0}")]
    Search(String),
    #[error("llm failed: {0}")]
    Llm(String),
    #[error("persist failed: {0}")]
    Persist(String),
    #[error("not configured: {0}")]
    NotConfigured(String),
    #[error("not supported: {0}")]
    NotSupported(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchRequest {
    pub url: String,
    /// Timeout for the operation (network + body read).
    pub timeout_ms: Option<u64>,
    /// Hard cap on bytes read from the response body.
    pub max_bytes: Option<u64>,
    /// Optional headers to add (best-effort; adapter may drop unsafe headers).
    pub headers: BTreeMap<String, String>,
}

impl FetchRequest {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchResponse {
    pub url: String,
    pub final_url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub bytes: Vec<u8>,
    pub truncated: bool,
    pub timings_ms: BTreeMap<String, u128>,
}

impl FetchResponse {
    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.bytes).to_string()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait::async_trait]
pub trait FetchBackend: Send + Sync {
    async fn fetch(&self, req: &FetchRequest) -> Result<FetchResponse>;
}

/// One page worth of search results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    /// Page size requested from the provider.
    pub max_results: Option<usize>,
    /// Zero-based index of the first result on this page.
    pub offset: usize,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub url: String,
    pub title: Option<String>,
    pub snippet: Option<String>,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub provider: String,
    pub timings_ms: BTreeMap<String, u128>,
}

#[async_trait::async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn search(&self, q: &SearchQuery) -> Result<SearchResponse>;
}

/// Inclusive millisecond ranges for the pauses a rendered fetch takes to look like a person
/// reading the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayPolicy {
    /// Pause after navigation, before waiting for network idle.
    pub settle_ms: (u64, u64),
    /// Pause after the scroll, before capturing HTML.
    pub scroll_ms: (u64, u64),
}

impl DelayPolicy {
    pub fn none() -> Self {
        Self {
            settle_ms: (0, 0),
            scroll_ms: (0, 0),
        }
    }

    /// Upper bound of the total time spent sleeping.
    pub fn max_total_ms(&self) -> u64 {
        self.settle_ms
            .0
            .max(self.settle_ms.1)
            .saturating_add(self.scroll_ms.0.max(self.scroll_ms.1))
    }
}

impl Default for DelayPolicy {
    fn default() -> Self {
        Self {
            settle_ms: (500, 2_000),
            scroll_ms: (200, 800),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderRequest {
    pub url: String,
    /// Navigation timeout; the network-idle wait uses the same bound.
    pub timeout_ms: u64,
    pub headers: BTreeMap<String, String>,
    pub delays: DelayPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderedPage {
    pub final_url: String,
    pub status: Option<u16>,
    pub html: String,
    pub elapsed_ms: u64,
}

/// A headless browser able to return the fully rendered HTML of one page.
#[async_trait::async_trait]
pub trait Renderer: Send + Sync {
    fn name(&self) -> &'static str;
    async fn render(&self, req: &RenderRequest) -> Result<RenderedPage>;
}

/// Single-shot text completion. No streaming, no conversation state.
#[async_trait::async_trait]
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &'static str;
    async fn complete(&self, prompt: &str, temperature: f64) -> Result<String>;
}

/// Outcome of one extraction path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt {
    Success(String),
    TooShort { chars: usize },
    Error(String),
}

impl Attempt {
    pub fn is_success(&self) -> bool {
        matches!(self, Attempt::Success(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionPath {
    Rendered,
    Static,
    Placeholder,
}

impl ExtractionPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionPath::Rendered => "rendered",
            ExtractionPath::Static => "static",
            ExtractionPath::Placeholder => "placeholder",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedDocument {
    pub url: String,
    pub text: String,
    pub path: ExtractionPath,
}

impl ExtractedDocument {
    pub fn is_placeholder(&self) -> bool {
        self.path == ExtractionPath::Placeholder
    }
}

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One completed research session, as written to the history log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchRecord {
    pub query: String,
    pub urls: Vec<String>,
    pub report: String,
    pub timestamp: String,
}

impl ResearchRecord {
    pub fn new(
        query: impl Into<String>,
        urls: Vec<String>,
        report: impl Into<String>,
        at: chrono::DateTime<chrono::Local>,
    ) -> Self {
        Self {
            query: query.into(),
            urls,
            report: report.into(),
            timestamp: at.format(TIMESTAMP_FORMAT).to_string(),
        }
    }
}

/// Append-only log of completed sessions.
pub trait HistoryStore: Send + Sync {
    /// Writes one new record and returns where it landed. Never rewrites earlier records.
    fn append(&self, record: &ResearchRecord) -> Result<PathBuf>;
    /// All readable records, newest first.
    fn list(&self) -> Result<Vec<ResearchRecord>>;
}
