use std::collections::HashMap;
use std::sync::Arc;

use leadhub_core::normalize::{clean_text, company_key, normalize_company_name};
use leadhub_core::{AcquisitionError, CompanyProfile};
use leadhub_fetch::RetryPolicy;
use once_cell::sync::Lazy;
use regex::Regex;
use strsim::jaro_winkler;
use tracing::{debug, info_span, Instrument};

use crate::search::{SearchApi, SearchPage, SearchRequest};

const COMPANY_PAGE_MARKER: &str = "linkedin.com/company/";

static EMPLOYEE_COUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d[\d,]*)\s*(?:\+|(?:-|–|to)\s*\d[\d,]*)?\s*employees")
        .expect("employee count regex is hardcoded and valid")
});

static FIRST_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d[\d,]*").expect("number regex is hardcoded and valid"));

/// Company lookups made during one processor invocation, keyed by normalized company name.
/// Misses and failed lookups are remembered too, so each company costs at most one call.
#[derive(Debug, Default)]
pub struct CompanyCache {
    entries: HashMap<String, Option<CompanyProfile>>,
}

impl CompanyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, company_name: &str) -> Option<&Option<CompanyProfile>> {
        self.entries.get(&company_key(company_name))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct CompanyInfoScraper {
    api: Arc<dyn SearchApi>,
    retry: RetryPolicy,
    min_similarity: f64,
}

impl CompanyInfoScraper {
    pub fn new(api: Arc<dyn SearchApi>, retry: RetryPolicy) -> Self {
        Self {
            api,
            retry,
            min_similarity: 0.9,
        }
    }

    pub fn with_min_similarity(mut self, min_similarity: f64) -> Self {
        self.min_similarity = min_similarity;
        self
    }

    /// Returns the company's profile, `None` when no confident match exists. A failed call is
    /// cached as `None` before the error is returned.
    pub async fn lookup(
        &self,
        cache: &mut CompanyCache,
        company_name: &str,
    ) -> Result<Option<CompanyProfile>, AcquisitionError> {
        let key = company_key(company_name);
        if key.is_empty() {
            return Ok(None);
        }
        if let Some(hit) = cache.entries.get(&key) {
            debug!(company = %key, "company cache hit");
            return Ok(hit.clone());
        }

        let display_name = normalize_company_name(company_name);
        let request = SearchRequest {
            query: format!("\"{}\" site:linkedin.com/company", display_name.replace('"', "")),
            num: 3,
            start: 0,
        };
        let span = info_span!("company_lookup", company = %display_name);
        let outcome = self
            .retry
            .run("company_search", || self.api.search(&request))
            .instrument(span)
            .await;

        let profile = match outcome {
            Ok(page) => match_company(&display_name, &page, self.min_similarity),
            Err(err) => {
                cache.entries.insert(key, None);
                return Err(err);
            }
        };
        debug!(company = %display_name, matched = profile.is_some(), "company lookup finished");
        cache.entries.insert(key, profile.clone());
        Ok(profile)
    }
}

/// Picks the first company page whose title names the wanted company.
pub fn match_company(name: &str, page: &SearchPage, min_similarity: f64) -> Option<CompanyProfile> {
    let wanted = company_key(name);
    let hit = page.organic_results.iter().find(|result| {
        result.link.to_ascii_lowercase().contains(COMPANY_PAGE_MARKER)
            && title_names_company(&result.title, &wanted, min_similarity)
    })?;

    let graph = page.knowledge_graph.as_ref();
    let size_bucket = graph
        .and_then(|g| g.employees.as_deref())
        .and_then(bucket_from_employee_field)
        .or_else(|| graph.and_then(|g| g.description.as_deref()).and_then(bucket_from_text))
        .or_else(|| bucket_from_text(&hit.snippet));
    let product_focus = graph
        .and_then(|g| clean_text(g.description.as_deref()))
        .or_else(|| clean_text(Some(&hit.snippet)));

    Some(CompanyProfile {
        linkedin_url: hit.link.trim().to_string(),
        size_bucket,
        product_focus,
    })
}

fn title_names_company(title: &str, wanted: &str, min_similarity: f64) -> bool {
    if title.to_lowercase().contains(wanted) {
        return true;
    }
    let head = title
        .split(|c| c == '|' || c == ':')
        .next()
        .unwrap_or_default();
    let head = head.split(" - ").next().unwrap_or_default();
    jaro_winkler(&company_key(head), wanted) >= min_similarity
}

fn parse_count(digits: &str) -> Option<u64> {
    digits.replace(',', "").parse().ok()
}

fn bucket_from_text(text: &str) -> Option<String> {
    let caps = EMPLOYEE_COUNT.captures(text)?;
    parse_count(caps.get(1)?.as_str()).map(size_bucket)
}

fn bucket_from_employee_field(text: &str) -> Option<String> {
    parse_count(FIRST_NUMBER.find(text)?.as_str()).map(size_bucket)
}

/// LinkedIn's company size bands, chosen by the lower bound of a reported range.
pub fn size_bucket(count: u64) -> String {
    let bucket = match count {
        0..=10 => "1-10",
        11..=50 => "11-50",
        51..=200 => "51-200",
        201..=500 => "201-500",
        501..=1_000 => "501-1000",
        1_001..=5_000 => "1001-5000",
        5_001..=10_000 => "5001-10000",
        _ => "10001+",
    };
    bucket.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{KnowledgeGraph, SearchResult};
    use async_trait::async_trait;
    use leadhub_core::ErrorKind;
    use std::sync::Mutex;
    use std::time::Duration;

    struct CountingApi {
        page: Option<SearchPage>,
        queries: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SearchApi for CountingApi {
        async fn search(&self, request: &SearchRequest) -> Result<SearchPage, AcquisitionError> {
            self.queries.lock().unwrap().push(request.query.clone());
            self.page
                .clone()
                .ok_or_else(|| AcquisitionError::transient("serpapi", "timeout"))
        }
    }

    fn acme_page() -> SearchPage {
        SearchPage {
            organic_results: vec![
                SearchResult {
                    title: "Acme Rockets | LinkedIn".into(),
                    link: "https://www.linkedin.com/company/acme-rockets".into(),
                    snippet: "Rockets for everyone.".into(),
                },
                SearchResult {
                    title: "Acme | LinkedIn".into(),
                    link: "https://www.linkedin.com/company/acme".into(),
                    snippet: "Acme builds anvils. Company size: 51-200 employees".into(),
                },
            ],
            knowledge_graph: None,
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::default()
            .with_base_delay(Duration::ZERO)
            .with_jitter(false)
            .with_max_attempts(2)
    }

    #[test]
    fn first_named_company_page_is_the_match() {
        let profile = match_company("Acme Rockets, Inc.", &acme_page(), 0.9).unwrap();
        assert_eq!(profile.linkedin_url, "https://www.linkedin.com/company/acme-rockets");
        assert_eq!(profile.product_focus.as_deref(), Some("Rockets for everyone."));
        assert_eq!(profile.size_bucket, None);

        assert!(match_company("Globex", &acme_page(), 0.9).is_none());
    }

    #[test]
    fn fuzzy_titles_and_size_text_are_understood() {
        let page = SearchPage {
            organic_results: vec![SearchResult {
                title: "Acmee: Overview".into(),
                link: "https://www.linkedin.com/company/acmee".into(),
                snippet: "10,001+ employees on LinkedIn".into(),
            }],
            knowledge_graph: None,
        };
        let profile = match_company("Acme", &page, 0.9).unwrap();
        assert_eq!(profile.size_bucket.as_deref(), Some("10001+"));
    }

    #[test]
    fn knowledge_graph_wins_for_focus_and_size() {
        let mut page = acme_page();
        page.knowledge_graph = Some(KnowledgeGraph {
            description: Some("Industrial anvils and rocket skates.".into()),
            employees: Some("350 (2024)".into()),
            ..Default::default()
        });
        let profile = match_company("Acme", &page, 0.9).unwrap();
        assert_eq!(profile.size_bucket.as_deref(), Some("201-500"));
        assert_eq!(
            profile.product_focus.as_deref(),
            Some("Industrial anvils and rocket skates.")
        );
    }

    #[test]
    fn size_buckets_follow_linkedin_bands() {
        assert_eq!(bucket_from_text("11-50 employees").as_deref(), Some("11-50"));
        assert_eq!(bucket_from_text("1,001 to 5,000 Employees").as_deref(), Some("1001-5000"));
        assert_eq!(bucket_from_text("a team of 7 employees").as_deref(), Some("1-10"));
        assert_eq!(bucket_from_text("no size here"), None);
    }

    #[tokio::test]
    async fn shared_company_costs_one_call() {
        let api = Arc::new(CountingApi {
            page: Some(acme_page()),
            queries: Mutex::new(Vec::new()),
        });
        let scraper = CompanyInfoScraper::new(api.clone(), fast_retry());
        let mut cache = CompanyCache::new();

        let first = scraper.lookup(&mut cache, "Acme Inc.").await.unwrap();
        let second = scraper.lookup(&mut cache, "  ACME ").await.unwrap();

        assert!(first.is_some());
        assert_eq!(first, second);
        assert_eq!(
            *api.queries.lock().unwrap(),
            vec!["\"Acme\" site:linkedin.com/company".to_string()]
        );
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn failed_lookup_is_cached_as_no_match() {
        let api = Arc::new(CountingApi {
            page: None,
            queries: Mutex::new(Vec::new()),
        });
        let scraper = CompanyInfoScraper::new(api.clone(), fast_retry());
        let mut cache = CompanyCache::new();

        let err = scraper.lookup(&mut cache, "Globex").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransientNetwork);
        assert_eq!(scraper.lookup(&mut cache, "Globex").await.unwrap(), None);
        assert_eq!(api.queries.lock().unwrap().len(), 2);
        assert_eq!(cache.get("globex"), Some(&None));
    }

    #[tokio::test]
    async fn blank_company_name_makes_no_call() {
        let api = Arc::new(CountingApi {
            page: Some(acme_page()),
            queries: Mutex::new(Vec::new()),
        });
        let scraper = CompanyInfoScraper::new(api.clone(), fast_retry());
        let mut cache = CompanyCache::new();

        assert_eq!(scraper.lookup(&mut cache, "   ").await.unwrap(), None);
        assert!(api.queries.lock().unwrap().is_empty());
        assert!(cache.is_empty());
    }
}
