//! One research session: discover → select → extract → synthesize → persist.
//!
//! State lives in an explicit [`ResearchSession`] value that each step reads and fills in.

use std::path::PathBuf;
use std::sync::Arc;

use reagent_core::{Error, ExtractedDocument, HistoryStore, ResearchRecord, Result, SearchProvider};

use crate::extract::Extractor;
use crate::synth::Synthesizer;

pub const DEFAULT_NUM_RESULTS: usize = 20;
pub const DEFAULT_MAX_SELECTION: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub num_results: usize,
    pub max_selection: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            num_results: DEFAULT_NUM_RESULTS,
            max_selection: DEFAULT_MAX_SELECTION,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResearchSession {
    pub query: String,
    pub results: Vec<String>,
    /// Index-aligned with `results`.
    pub titles: Vec<String>,
    pub selection: Vec<String>,
    /// Index-aligned with `selection`.
    pub documents: Vec<ExtractedDocument>,
    pub report: Option<String>,
}

impl ResearchSession {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn document_texts(&self) -> Vec<String> {
        self.documents.iter().map(|d| d.text.clone()).collect()
    }
}

/// Display title for a result: the URL's host, or the URL itself when it has none.
pub fn display_title(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .unwrap_or_else(|| url.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectionError {
    #[error("Please select at least one valid URL number.")]
    Empty,
    #[error("Please enter numbers only.")]
    NotANumber(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Zero-based indices into the result list, in pick order.
    pub indices: Vec<usize>,
    /// Count of distinct valid picks before truncation, when truncation happened.
    pub truncated_from: Option<usize>,
}

/// Parse operator picks (1-based numbers separated by spaces and/or commas).
///
/// Out-of-range numbers are ignored. Repeats are dropped by index and by URL, first
/// occurrence wins. More than `max` picks keep the first `max`.
pub fn parse_selection(
    input: &str,
    results: &[String],
    max: usize,
) -> std::result::Result<Selection, SelectionError> {
    let mut indices: Vec<usize> = Vec::new();
    for tok in input
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
    {
        let n: usize = tok
            .parse()
            .map_err(|_| SelectionError::NotANumber(tok.to_string()))?;
        if n == 0 || n > results.len() {
            continue;
        }
        let i = n - 1;
        if indices.contains(&i) || indices.iter().any(|&j| results[j] == results[i]) {
            continue;
        }
        indices.push(i);
    }
    if indices.is_empty() {
        return Err(SelectionError::Empty);
    }
    let max = max.max(1);
    let mut truncated_from = None;
    if indices.len() > max {
        truncated_from = Some(indices.len());
        indices.truncate(max);
    }
    Ok(Selection {
        indices,
        truncated_from,
    })
}

#[derive(Clone)]
pub struct Orchestrator {
    search: Arc<dyn SearchProvider>,
    extractor: Extractor,
    synth: Synthesizer,
    history: Option<Arc<dyn HistoryStore>>,
    cfg: SessionConfig,
}

impl Orchestrator {
    pub fn new(
        search: Arc<dyn SearchProvider>,
        extractor: Extractor,
        synth: Synthesizer,
        history: Option<Arc<dyn HistoryStore>>,
        cfg: SessionConfig,
    ) -> Self {
        Self {
            search,
            extractor,
            synth,
            history,
            cfg,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.cfg
    }

    pub async fn discover(&self, query: &str) -> Result<ResearchSession> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::InvalidInput("query must be non-empty".to_string()));
        }
        let results =
            crate::discovery::discover(self.search.as_ref(), query, self.cfg.num_results).await;
        tracing::info!(query, results = results.len(), "discovery complete");
        let titles = results.iter().map(|u| display_title(u)).collect();
        Ok(ResearchSession {
            query: query.to_string(),
            results,
            titles,
            ..ResearchSession::default()
        })
    }

    pub fn select(
        &self,
        session: &mut ResearchSession,
        input: &str,
    ) -> std::result::Result<Selection, SelectionError> {
        let sel = parse_selection(input, &session.results, self.cfg.max_selection)?;
        session.selection = sel
            .indices
            .iter()
            .map(|&i| session.results[i].clone())
            .collect();
        session.documents.clear();
        session.report = None;
        Ok(sel)
    }

    /// Extract every selected URL in order. `on_start(i, n, url)` fires before each one
    /// (1-based `i`).
    pub async fn extract_selected(
        &self,
        session: &mut ResearchSession,
        mut on_start: impl FnMut(usize, usize, &str),
    ) {
        let n = session.selection.len();
        let mut docs = Vec::with_capacity(n);
        for (i, url) in session.selection.iter().enumerate() {
            on_start(i + 1, n, url);
            docs.push(self.extractor.extract(url).await);
        }
        let placeholders = docs.iter().filter(|d| d.is_placeholder()).count();
        tracing::info!(documents = n, placeholders, "extraction complete");
        session.documents = docs;
    }

    pub async fn synthesize(&self, session: &mut ResearchSession) -> String {
        let report = self
            .synth
            .synthesize(&session.query, &session.document_texts())
            .await;
        session.report = Some(report.clone());
        report
    }

    /// Append the session to history. `None` when no store is configured.
    pub fn persist(&self, session: &ResearchSession) -> Option<Result<PathBuf>> {
        let store = self.history.as_ref()?;
        let record = ResearchRecord::new(
            session.query.clone(),
            session.selection.clone(),
            session.report.clone().unwrap_or_default(),
            chrono::Local::now(),
        );
        let out = store.append(&record);
        if let Err(e) = &out {
            tracing::warn!(error = %e, "history append failed");
        }
        Some(out)
    }
}
