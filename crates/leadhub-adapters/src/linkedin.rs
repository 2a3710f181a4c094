use std::sync::Arc;

use leadhub_core::normalize::clean_text;
use leadhub_core::{AcquisitionError, RawLeadRecord, SearchQuery};
use leadhub_fetch::RetryPolicy;
use tracing::{debug, info, info_span, Instrument};

use crate::search::{SearchApi, SearchRequest};
use crate::snippet::parse_search_result;

const PROFILE_SITE_FILTER: &str = "site:linkedin.com/in/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paging {
    pub results_per_page: u32,
    pub pages_per_query: u32,
}

impl Default for Paging {
    fn default() -> Self {
        Self {
            results_per_page: 100,
            pages_per_query: 1,
        }
    }
}

/// Finds public profiles through the search API, for both alumni and role+location queries.
pub struct ProfileSearchScraper {
    api: Arc<dyn SearchApi>,
    retry: RetryPolicy,
    paging: Paging,
}

impl ProfileSearchScraper {
    pub fn new(api: Arc<dyn SearchApi>, retry: RetryPolicy) -> Self {
        Self {
            api,
            retry,
            paging: Paging::default(),
        }
    }

    pub fn with_paging(mut self, paging: Paging) -> Self {
        self.paging = paging;
        self
    }

    /// Runs every page of `query`. Results that do not decode into a profile are dropped;
    /// a call that still fails after retrying fails the whole query.
    pub async fn search(
        &self,
        query: &SearchQuery,
    ) -> Result<Vec<RawLeadRecord>, AcquisitionError> {
        let text = build_profile_query(query);
        let per_page = self.paging.results_per_page.clamp(1, 100);
        let span = info_span!("profile_search", query = %query);

        async {
            let mut records = Vec::new();
            for page in 0..self.paging.pages_per_query.max(1) {
                let request = SearchRequest {
                    query: text.clone(),
                    num: per_page,
                    start: page * per_page,
                };
                let result = self
                    .retry
                    .run("profile_search", || self.api.search(&request))
                    .await?;

                let returned = result.organic_results.len();
                for item in &result.organic_results {
                    match parse_search_result(item) {
                        Ok(record) => records.push(record),
                        Err(err) => debug!(error = %err, "dropping search result"),
                    }
                }
                if (returned as u32) < per_page {
                    break;
                }
            }
            info!(records = records.len(), "profile search complete");
            Ok(records)
        }
        .instrument(span)
        .await
    }
}

fn quoted(term: &str) -> Option<String> {
    clean_text(Some(&term.replace('"', ""))).map(|t| format!("\"{t}\""))
}

/// Search text for a profile query, e.g.
/// `"Questrom" ("Product Manager" OR "Product Owner") "New York City" -"Senior" site:linkedin.com/in/`.
pub fn build_profile_query(query: &SearchQuery) -> String {
    let mut parts = Vec::new();
    if let Some(school) = query.school.as_deref().and_then(quoted) {
        parts.push(school);
    }

    let keywords = query
        .keywords
        .iter()
        .filter_map(|k| quoted(k))
        .collect::<Vec<_>>();
    match keywords.len() {
        0 => {}
        1 => parts.extend(keywords),
        _ => parts.push(format!("({})", keywords.join(" OR "))),
    }

    if let Some(location) = query.location.as_deref().and_then(quoted) {
        parts.push(location);
    }
    for word in &query.exclude_seniority {
        if let Some(word) = quoted(word) {
            parts.push(format!("-{word}"));
        }
    }
    parts.push(PROFILE_SITE_FILTER.to_string());
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{SearchPage, SearchResult};
    use async_trait::async_trait;
    use leadhub_core::ErrorKind;
    use std::sync::Mutex;
    use std::time::Duration;

    struct PagedApi {
        pages: Vec<Vec<SearchResult>>,
        requests: Mutex<Vec<SearchRequest>>,
    }

    #[async_trait]
    impl SearchApi for PagedApi {
        async fn search(&self, request: &SearchRequest) -> Result<SearchPage, AcquisitionError> {
            let mut requests = self.requests.lock().unwrap();
            let index = requests.len();
            requests.push(request.clone());
            Ok(SearchPage {
                organic_results: self.pages.get(index).cloned().unwrap_or_default(),
                knowledge_graph: None,
            })
        }
    }

    struct DownApi {
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl SearchApi for DownApi {
        async fn search(&self, _request: &SearchRequest) -> Result<SearchPage, AcquisitionError> {
            *self.calls.lock().unwrap() += 1;
            Err(AcquisitionError::transient("serpapi", "connection refused"))
        }
    }

    fn profile(name: &str, slug: &str) -> SearchResult {
        SearchResult {
            title: format!("{name} - Product Manager at Acme | LinkedIn"),
            link: format!("https://www.linkedin.com/in/{slug}"),
            snippet: "New York · Product Manager · Acme".into(),
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::default()
            .with_base_delay(Duration::ZERO)
            .with_jitter(false)
            .with_max_attempts(3)
    }

    #[test]
    fn school_and_role_queries_build_distinct_search_text() {
        let alumni = SearchQuery::by_school("Questrom").with_location("New York City");
        assert_eq!(
            build_profile_query(&alumni),
            "\"Questrom\" \"New York City\" site:linkedin.com/in/"
        );

        let role = SearchQuery::by_role(["Product Manager", "Product Owner"], "New York City")
            .excluding(["Senior", "Director"]);
        assert_eq!(
            build_profile_query(&role),
            "(\"Product Manager\" OR \"Product Owner\") \"New York City\" -\"Senior\" -\"Director\" site:linkedin.com/in/"
        );

        let single = SearchQuery::by_school("Questrom").with_keywords(["PM", "  "]);
        assert_eq!(
            build_profile_query(&single),
            "\"Questrom\" \"PM\" site:linkedin.com/in/"
        );
    }

    #[tokio::test]
    async fn malformed_result_is_dropped_and_siblings_survive() {
        let api = Arc::new(PagedApi {
            pages: vec![vec![
                profile("Jane Doe", "jane"),
                SearchResult {
                    title: "LinkedIn".into(),
                    link: "https://www.linkedin.com/in/???".into(),
                    snippet: String::new(),
                },
                profile("John Roe", "john"),
            ]],
            requests: Mutex::new(Vec::new()),
        });
        let scraper = ProfileSearchScraper::new(api, fast_retry());

        let records = scraper
            .search(&SearchQuery::by_school("Questrom"))
            .await
            .unwrap();

        let names = records.iter().map(|r| r.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["Jane Doe", "John Roe"]);
        assert_eq!(records[0].location.as_deref(), Some("New York"));
    }

    #[tokio::test]
    async fn pages_until_a_short_page() {
        let full = (0..2).map(|i| profile("Jane Doe", &format!("p{i}"))).collect::<Vec<_>>();
        let api = Arc::new(PagedApi {
            pages: vec![full.clone(), vec![profile("Last One", "last")], full],
            requests: Mutex::new(Vec::new()),
        });
        let scraper = ProfileSearchScraper::new(api.clone(), fast_retry()).with_paging(Paging {
            results_per_page: 2,
            pages_per_query: 5,
        });

        let records = scraper
            .search(&SearchQuery::by_role(["Product Manager"], "NYC"))
            .await
            .unwrap();

        assert_eq!(records.len(), 3);
        let starts = api
            .requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| (r.start, r.num))
            .collect::<Vec<_>>();
        assert_eq!(starts, vec![(0, 2), (2, 2)]);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_the_classified_error() {
        let api = Arc::new(DownApi {
            calls: Mutex::new(0),
        });
        let scraper = ProfileSearchScraper::new(api.clone(), fast_retry());

        let err = scraper
            .search(&SearchQuery::by_school("Questrom"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::TransientNetwork);
        assert_eq!(*api.calls.lock().unwrap(), 3);
    }
}
