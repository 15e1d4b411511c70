//! Paginated result discovery on top of a page-level [`SearchProvider`].

use reagent_core::{SearchProvider, SearchQuery};

use crate::search::GOOGLE_MAX_PAGE_SIZE;

/// Collect up to `desired` result URLs for `query`, one page at a time.
///
/// Stops on the first empty or short page, or on the first page error; whatever was
/// gathered before that point is returned. Upstream order is kept and repeats are not
/// removed.
pub async fn discover(provider: &dyn SearchProvider, query: &str, desired: usize) -> Vec<String> {
    discover_with_page_size(provider, query, desired, GOOGLE_MAX_PAGE_SIZE).await
}

pub async fn discover_with_page_size(
    provider: &dyn SearchProvider,
    query: &str,
    desired: usize,
    page_size: usize,
) -> Vec<String> {
    if desired == 0 {
        tracing::warn!("discover called with desired=0; nothing to do");
        return Vec::new();
    }
    let page_size = page_size.max(1);

    let mut urls: Vec<String> = Vec::new();
    let mut offset = 0usize;
    while urls.len() < desired {
        let num = page_size.min(desired - urls.len());
        let q = SearchQuery {
            query: query.to_string(),
            max_results: Some(num),
            offset,
            timeout_ms: None,
        };
        let page = match provider.search(&q).await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(
                    provider = provider.name(),
                    offset,
                    collected = urls.len(),
                    error = %e,
                    "search page failed; returning partial results"
                );
                break;
            }
        };
        let got = page.results.len();
        tracing::debug!(provider = provider.name(), offset, num, got, "search page");
        if got == 0 {
            break;
        }
        for r in page.results {
            urls.push(r.url);
            if urls.len() >= desired {
                break;
            }
        }
        if got < num {
            break;
        }
        offset += num;
    }
    urls
}

#[cfg(test)]
mod tests {
    use super::*;
    use reagent_core::{Error, Result, SearchResponse, SearchResult};
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Serves `total` numbered results, recording each requested (offset, num).
    struct FakeProvider {
        total: usize,
        fail_at_offset: Option<usize>,
        calls: Mutex<Vec<(usize, usize)>>,
    }

    impl FakeProvider {
        fn new(total: usize) -> Self {
            Self {
                total,
                fail_at_offset: None,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl SearchProvider for FakeProvider {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn search(&self, q: &SearchQuery) -> Result<SearchResponse> {
            let num = q.max_results.unwrap_or(10);
            self.calls.lock().unwrap().push((q.offset, num));
            if self.fail_at_offset == Some(q.offset) {
                return Err(Error::Search("boom".to_string()));
            }
            let results = (q.offset..self.total.min(q.offset + num))
                .map(|i| SearchResult {
                    url: format!("https://example.com/{i}"),
                    title: None,
                    snippet: None,
                    source: "fake".to_string(),
                })
                .collect();
            Ok(SearchResponse {
                results,
                provider: "fake".to_string(),
                timings_ms: BTreeMap::new(),
            })
        }
    }

    #[tokio::test]
    async fn three_results_then_empty_page_returns_exactly_those() {
        let p = FakeProvider::new(3);
        let urls = discover(&p, "test query", 10).await;
        assert_eq!(
            urls,
            vec![
                "https://example.com/0",
                "https://example.com/1",
                "https://example.com/2"
            ]
        );
        // Short first page ends discovery without a second request.
        assert_eq!(p.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stops_at_desired_count_across_pages() {
        let p = FakeProvider::new(100);
        let urls = discover(&p, "q", 25).await;
        assert_eq!(urls.len(), 25);
        assert_eq!(urls[24], "https://example.com/24");
        assert_eq!(*p.calls.lock().unwrap(), vec![(0, 10), (10, 10), (20, 5)]);
    }

    #[tokio::test]
    async fn page_error_returns_partial_results() {
        let mut p = FakeProvider::new(100);
        p.fail_at_offset = Some(10);
        let urls = discover(&p, "q", 20).await;
        assert_eq!(urls.len(), 10);
    }

    #[tokio::test]
    async fn zero_desired_makes_no_requests() {
        let p = FakeProvider::new(100);
        assert!(discover(&p, "q", 0).await.is_empty());
        assert!(p.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn never_exceeds_desired_even_if_provider_overdelivers() {
        struct Greedy;
        #[async_trait::async_trait]
        impl SearchProvider for Greedy {
            fn name(&self) -> &'static str {
                "greedy"
            }
            async fn search(&self, _q: &SearchQuery) -> Result<SearchResponse> {
                Ok(SearchResponse {
                    results: (0..50)
                        .map(|i| SearchResult {
                            url: format!("https://dup.example/{}", i % 2),
                            title: None,
                            snippet: None,
                            source: "greedy".to_string(),
                        })
                        .collect(),
                    provider: "greedy".to_string(),
                    timings_ms: BTreeMap::new(),
                })
            }
        }
        for desired in [1usize, 7, 10, 33] {
            let urls = discover(&Greedy, "q", desired).await;
            assert_eq!(urls.len(), desired);
        }
    }
}
