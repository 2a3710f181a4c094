use std::path::{Path, PathBuf};
use std::time::Duration;

use leadhub_adapters::Paging;
use leadhub_core::normalize::{company_key, normalize_whitespace};
use leadhub_core::{ErrorKind, JobBoard, SearchQuery};
use leadhub_fetch::{HttpClientConfig, RetryClassification, RetryPolicy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://leads.db";
pub const DEFAULT_CONFIG_PATH: &str = "leadhub.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("SCRAPING_API_KEY is not set")]
    MissingApiKey,
}

/// Who counts as a lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Criteria {
    pub target_schools: Vec<String>,
    pub target_locations: Vec<String>,
    pub role_keywords: Vec<String>,
    pub seniority_exclusions: Vec<String>,
}

impl Default for Criteria {
    fn default() -> Self {
        Self {
            target_schools: strings(["Questrom", "University School"]),
            target_locations: strings(["New York City"]),
            role_keywords: strings(["Product Manager", "Product Owner"]),
            seniority_exclusions: strings([
                "Senior",
                "Lead",
                "Principal",
                "Head of",
                "Director",
                "VP",
            ]),
        }
    }
}

/// Score = base + alma mater bonus + enrichment bonus + keyword weight per word of the
/// longest matched role keyword.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub base: f64,
    pub alma_mater_bonus: f64,
    pub enrichment_bonus: f64,
    pub keyword_weight: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            base: 10.0,
            alma_mater_bonus: 3.0,
            enrichment_bonus: 2.0,
            keyword_weight: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_secs: u64,
    pub jitter: bool,
    /// Retry 401/403 too, for providers that answer a burst with an auth error.
    pub retry_auth: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 2_000,
            multiplier: 2.0,
            max_delay_secs: 60,
            jitter: true,
            retry_auth: false,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        let mut classification = RetryClassification::default();
        if self.retry_auth {
            classification = classification.retrying(ErrorKind::Auth);
        }
        RetryPolicy::default()
            .with_max_attempts(self.max_attempts.max(1))
            .with_base_delay(Duration::from_millis(self.base_delay_ms))
            .with_multiplier(self.multiplier)
            .with_max_delay(Duration::from_secs(self.max_delay_secs))
            .with_jitter(self.jitter)
            .with_classification(classification)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PagingSettings {
    pub results_per_page: u32,
    pub pages_per_query: u32,
    /// Minimum spacing between outbound requests, to stay inside the search API quota.
    pub min_request_interval_ms: Option<u64>,
}

impl Default for PagingSettings {
    fn default() -> Self {
        let paging = Paging::default();
        Self {
            results_per_page: paging.results_per_page,
            pages_per_query: paging.pages_per_query,
            min_request_interval_ms: None,
        }
    }
}

impl PagingSettings {
    pub fn paging(&self) -> Paging {
        Paging {
            results_per_page: self.results_per_page,
            pages_per_query: self.pages_per_query,
        }
    }
}

/// Which public job board a company publishes its openings on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardAssignment {
    pub company: String,
    pub board: JobBoard,
    pub token: String,
}

/// Shape of `leadhub.yaml`. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub criteria: Criteria,
    pub scoring: ScoringWeights,
    pub retry: RetrySettings,
    pub paging: PagingSettings,
    pub job_boards: Vec<BoardAssignment>,
    pub queries: Vec<SearchQuery>,
}

impl FileConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, serde_yaml::Error> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml)
    }

    fn load(path: &Path, required: bool) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if !required && err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default())
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Self::from_yaml_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Debug, Clone)]
pub struct LeadHubConfig {
    pub database_url: String,
    pub api_key: Option<String>,
    pub config_path: PathBuf,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub criteria: Criteria,
    pub scoring: ScoringWeights,
    pub retry: RetrySettings,
    pub paging: PagingSettings,
    pub job_boards: Vec<BoardAssignment>,
    pub queries: Vec<SearchQuery>,
}

impl LeadHubConfig {
    /// Reads `.env`, the process environment and the YAML file named by `LEADHUB_CONFIG`.
    /// Environment criteria override the file's.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let explicit_path = var("LEADHUB_CONFIG");
        let config_path = PathBuf::from(explicit_path.as_deref().unwrap_or(DEFAULT_CONFIG_PATH));
        let file = FileConfig::load(&config_path, explicit_path.is_some())?;

        let mut criteria = file.criteria;
        if let Some(schools) = var("TARGET_SCHOOLS") {
            criteria.target_schools = split_list(&schools);
        }
        if let Some(location) = var("TARGET_LOCATION") {
            criteria.target_locations = vec![normalize_whitespace(&location)];
        }
        if let Some(keywords) = var("ROLE_KEYWORDS") {
            criteria.role_keywords = split_list(&keywords);
        }
        if let Some(exclusions) = var("SENIORITY_EXCLUSIONS") {
            criteria.seniority_exclusions = split_list(&exclusions);
        }

        Ok(Self {
            database_url: var("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            api_key: var("SCRAPING_API_KEY"),
            config_path,
            user_agent: var("LEADHUB_USER_AGENT").unwrap_or_else(|| "leadhub/0.1".to_string()),
            http_timeout_secs: var("LEADHUB_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            criteria,
            scoring: file.scoring,
            retry: file.retry,
            paging: file.paging,
            job_boards: file.job_boards,
            queries: file.queries,
        })
    }

    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.api_key.as_deref().ok_or(ConfigError::MissingApiKey)
    }

    /// Explicitly configured queries, or the default plan derived from the criteria.
    pub fn search_queries(&self) -> Vec<SearchQuery> {
        if self.queries.is_empty() {
            default_queries(&self.criteria)
        } else {
            self.queries.clone()
        }
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            min_request_interval: self.paging.min_request_interval_ms.map(Duration::from_millis),
        }
    }

    pub fn board_for(&self, company: &str) -> Option<&BoardAssignment> {
        board_for(&self.job_boards, company)
    }
}

pub(crate) fn board_for<'a>(
    boards: &'a [BoardAssignment],
    company: &str,
) -> Option<&'a BoardAssignment> {
    let key = company_key(company);
    if key.is_empty() {
        return None;
    }
    boards.iter().find(|b| company_key(&b.company) == key)
}

/// One alumni query per target school, then one role+location query.
pub fn default_queries(criteria: &Criteria) -> Vec<SearchQuery> {
    let location = criteria.target_locations.first();
    let mut queries = criteria
        .target_schools
        .iter()
        .map(|school| {
            let query = SearchQuery::by_school(school.as_str());
            match location {
                Some(location) => query.with_location(location.as_str()),
                None => query,
            }
        })
        .collect::<Vec<_>>();

    if !criteria.role_keywords.is_empty() {
        queries.push(SearchQuery {
            keywords: criteria.role_keywords.clone(),
            school: None,
            location: location.cloned(),
            exclude_seniority: criteria.seniority_exclusions.clone(),
        });
    }
    queries
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(normalize_whitespace)
        .filter(|v| !v.is_empty())
        .collect()
}

fn strings<const N: usize>(values: [&str; N]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}
