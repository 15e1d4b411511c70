use reagent_core::{Error, Result, SearchProvider, SearchQuery, SearchResponse, SearchResult};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Instant;

/// The Custom Search JSON API refuses `num` outside 1..=10.
pub const GOOGLE_MAX_PAGE_SIZE: usize = 10;

fn timeout_ms_from_query(q: &SearchQuery) -> u64 {
    // Provider requests can hang indefinitely without an explicit timeout.
    // Keep a conservative cap even if callers pass something huge.
    q.timeout_ms.unwrap_or(20_000).clamp(1_000, 60_000)
}

fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn google_api_key_from_env() -> Option<String> {
    env("REAGENT_GOOGLE_API_KEY").or_else(|| env("GOOGLE_API_KEY"))
}

pub fn google_cse_id_from_env() -> Option<String> {
    env("REAGENT_GOOGLE_CSE_ID").or_else(|| env("GOOGLE_CSE_ID"))
}

fn google_endpoint_from_env() -> Option<String> {
    env("REAGENT_GOOGLE_CSE_ENDPOINT")
}

/// Google Programmable Search Engine (Custom Search JSON API).
#[derive(Debug, Clone)]
pub struct GoogleCseProvider {
    client: reqwest::Client,
    api_key: String,
    cse_id: String,
    endpoint: String,
}

impl GoogleCseProvider {
    pub fn new(
        client: reqwest::Client,
        api_key: impl Into<String>,
        cse_id: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            cse_id: cse_id.into(),
            endpoint: endpoint.into(),
        }
    }

    pub fn from_env(client: reqwest::Client) -> Result<Self> {
        let api_key = google_api_key_from_env().ok_or_else(|| {
            Error::NotConfigured("missing REAGENT_GOOGLE_API_KEY (or GOOGLE_API_KEY)".to_string())
        })?;
        let cse_id = google_cse_id_from_env().ok_or_else(|| {
            Error::NotConfigured("missing REAGENT_GOOGLE_CSE_ID (or GOOGLE_CSE_ID)".to_string())
        })?;
        Ok(Self::new(client, api_key, cse_id, Self::default_endpoint()))
    }

    fn default_endpoint() -> String {
        // Docs: https://developers.google.com/custom-search/v1/reference/rest/v1/cse/list
        google_endpoint_from_env()
            .unwrap_or_else(|| "https://www.googleapis.com/customsearch/v1".to_string())
    }
}

#[derive(Debug, Deserialize)]
struct GoogleCseResponse {
    items: Option<Vec<GoogleCseItem>>,
}

#[derive(Debug, Deserialize)]
struct GoogleCseItem {
    link: Option<String>,
    title: Option<String>,
    snippet: Option<String>,
}

#[async_trait::async_trait]
impl SearchProvider for GoogleCseProvider {
    fn name(&self) -> &'static str {
        "google_cse"
    }

    async fn search(&self, q: &SearchQuery) -> Result<SearchResponse> {
        let t0 = Instant::now();
        let timeout_ms = timeout_ms_from_query(q);
        let num = q
            .max_results
            .unwrap_or(GOOGLE_MAX_PAGE_SIZE)
            .clamp(1, GOOGLE_MAX_PAGE_SIZE);
        // `start` is 1-based.
        let start = q.offset.saturating_add(1);

        let resp = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("q", q.query.as_str()),
                ("cx", self.cse_id.as_str()),
                ("key", self.api_key.as_str()),
            ])
            .query(&[("start", start), ("num", num)])
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .send()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Search(format!("google cse search HTTP {status}")));
        }

        let parsed: GoogleCseResponse = resp
            .json()
            .await
            .map_err(|e| Error::Search(e.to_string()))?;

        let mut out = Vec::new();
        for item in parsed.items.unwrap_or_default() {
            let Some(url) = item.link else { continue };
            out.push(SearchResult {
                url,
                title: item.title,
                snippet: item.snippet,
                source: "google_cse".to_string(),
            });
        }

        let mut timings_ms = BTreeMap::new();
        timings_ms.insert("search".to_string(), t0.elapsed().as_millis());

        Ok(SearchResponse {
            results: out,
            provider: "google_cse".to_string(),
            timings_ms,
        })
    }
}
