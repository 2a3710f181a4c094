use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use leadhub_core::normalize::{clean_text, normalize_whitespace};
use leadhub_core::{AcquisitionError, JobBoard, JobPostingRecord};
use leadhub_fetch::{JsonTransport, RetryPolicy};
use scraper::Html;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

const GREENHOUSE_SNIPPET_CHARS: usize = 500;
const LEVER_SNIPPET_CHARS: usize = 250;

/// "List open postings for a board token", implemented once per vendor.
#[async_trait]
pub trait JobBoardClient: Send + Sync {
    fn board(&self) -> JobBoard;

    /// Open postings for `token`. An empty or unknown token yields an empty list.
    async fn list_postings(&self, token: &str) -> Result<Vec<JobPostingRecord>, AcquisitionError>;
}

/// Fetches one board document; an unknown token (HTTP 404) comes back as `None`.
async fn fetch_board(
    transport: &dyn JsonTransport,
    retry: &RetryPolicy,
    board: JobBoard,
    url: &str,
    query: &[(&str, &str)],
) -> Result<Option<JsonValue>, AcquisitionError> {
    let operation = format!("{board}_postings");
    match retry
        .run(&operation, || transport.get_json(board.as_str(), url, query))
        .await
    {
        Ok(value) => Ok(Some(value)),
        Err(AcquisitionError::NotFound { url, .. }) => {
            info!(%board, url = %url, "board token not found");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

fn decode<T: DeserializeOwned>(board: JobBoard, value: JsonValue) -> Result<T, AcquisitionError> {
    serde_json::from_value(value).map_err(|err| {
        AcquisitionError::malformed(board.as_str(), format!("unexpected board payload: {err}"))
    })
}

fn fragment_text(html: &str) -> String {
    Html::parse_fragment(html)
        .root_element()
        .text()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Plain text of an HTML description. Greenhouse entity-escapes its markup, so a first pass
/// can still leave tags behind.
fn html_to_text(html: &str) -> String {
    let mut text = fragment_text(html);
    if text.contains('<') && text.contains('>') {
        text = fragment_text(&text);
    }
    normalize_whitespace(&text)
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head = text.chars().take(max_chars).collect::<String>();
    format!("{}...", head.trim_end())
}

fn snippet(text: Option<String>, max_chars: usize) -> Option<String> {
    text.filter(|t| !t.is_empty())
        .map(|t| truncate_chars(&t, max_chars))
}

fn posting(
    board: JobBoard,
    title: Option<&str>,
    url: Option<&str>,
    location: Option<&str>,
    description_snippet: Option<String>,
) -> Option<JobPostingRecord> {
    let (Some(title), Some(url)) = (clean_text(title), clean_text(url)) else {
        debug!(%board, "skipping posting without title or url");
        return None;
    };
    Some(JobPostingRecord {
        board,
        title,
        location: clean_text(location),
        url,
        description_snippet,
    })
}

#[derive(Debug, Deserialize)]
struct GreenhouseBoard {
    jobs: Vec<GreenhouseJob>,
}

#[derive(Debug, Deserialize)]
struct GreenhouseJob {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    absolute_url: Option<String>,
    #[serde(default)]
    location: Option<GreenhouseLocation>,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GreenhouseLocation {
    #[serde(default)]
    name: Option<String>,
}

pub struct GreenhouseClient {
    transport: Arc<dyn JsonTransport>,
    retry: RetryPolicy,
    base_url: String,
}

impl GreenhouseClient {
    pub const DEFAULT_BASE_URL: &'static str = "https://boards-api.greenhouse.io";

    pub fn new(transport: Arc<dyn JsonTransport>, retry: RetryPolicy) -> Self {
        Self {
            transport,
            retry,
            base_url: Self::DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn jobs_url(&self, token: &str) -> String {
        format!("{}/v1/boards/{token}/jobs", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl JobBoardClient for GreenhouseClient {
    fn board(&self) -> JobBoard {
        JobBoard::Greenhouse
    }

    async fn list_postings(&self, token: &str) -> Result<Vec<JobPostingRecord>, AcquisitionError> {
        let token = token.trim();
        if token.is_empty() {
            return Ok(Vec::new());
        }
        let url = self.jobs_url(token);
        let Some(value) = fetch_board(
            self.transport.as_ref(),
            &self.retry,
            JobBoard::Greenhouse,
            &url,
            &[("content", "true")],
        )
        .await?
        else {
            return Ok(Vec::new());
        };

        let board: GreenhouseBoard = decode(JobBoard::Greenhouse, value)?;
        Ok(board
            .jobs
            .into_iter()
            .filter_map(|job| {
                let description = job.content.as_deref().map(html_to_text);
                posting(
                    JobBoard::Greenhouse,
                    job.title.as_deref(),
                    job.absolute_url.as_deref(),
                    job.location.as_ref().and_then(|l| l.name.as_deref()),
                    snippet(description, GREENHOUSE_SNIPPET_CHARS),
                )
            })
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct LeverPosting {
    #[serde(default)]
    text: Option<String>,
    #[serde(default, rename = "hostedUrl")]
    hosted_url: Option<String>,
    #[serde(default)]
    categories: Option<LeverCategories>,
    #[serde(default, rename = "descriptionPlain")]
    description_plain: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LeverCategories {
    #[serde(default)]
    location: Option<String>,
}

pub struct LeverClient {
    transport: Arc<dyn JsonTransport>,
    retry: RetryPolicy,
    base_url: String,
}

impl LeverClient {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.lever.co";

    pub fn new(transport: Arc<dyn JsonTransport>, retry: RetryPolicy) -> Self {
        Self {
            transport,
            retry,
            base_url: Self::DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn postings_url(&self, token: &str) -> String {
        format!("{}/v0/postings/{token}", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl JobBoardClient for LeverClient {
    fn board(&self) -> JobBoard {
        JobBoard::Lever
    }

    async fn list_postings(&self, token: &str) -> Result<Vec<JobPostingRecord>, AcquisitionError> {
        let token = token.trim();
        if token.is_empty() {
            return Ok(Vec::new());
        }
        let url = self.postings_url(token);
        let Some(value) = fetch_board(
            self.transport.as_ref(),
            &self.retry,
            JobBoard::Lever,
            &url,
            &[("mode", "json")],
        )
        .await?
        else {
            return Ok(Vec::new());
        };

        let postings: Vec<LeverPosting> = decode(JobBoard::Lever, value)?;
        Ok(postings
            .into_iter()
            .filter_map(|post| {
                let description = post.description_plain.as_deref().map(normalize_whitespace);
                posting(
                    JobBoard::Lever,
                    post.text.as_deref(),
                    post.hosted_url.as_deref(),
                    post.categories.as_ref().and_then(|c| c.location.as_deref()),
                    snippet(description, LEVER_SNIPPET_CHARS),
                )
            })
            .collect())
    }
}

/// Job board clients available to a run, selected by the board named in configuration.
#[derive(Default, Clone)]
pub struct JobBoardRegistry {
    clients: BTreeMap<JobBoard, Arc<dyn JobBoardClient>>,
}

impl JobBoardRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Greenhouse and Lever over one transport and retry policy.
    pub fn standard(transport: Arc<dyn JsonTransport>, retry: RetryPolicy) -> Self {
        Self::new()
            .with_client(Arc::new(GreenhouseClient::new(transport.clone(), retry.clone())))
            .with_client(Arc::new(LeverClient::new(transport, retry)))
    }

    pub fn with_client(mut self, client: Arc<dyn JobBoardClient>) -> Self {
        self.clients.insert(client.board(), client);
        self
    }

    pub fn client(&self, board: JobBoard) -> Option<&dyn JobBoardClient> {
        self.clients.get(&board).map(|c| c.as_ref())
    }

    pub async fn list_postings(
        &self,
        board: JobBoard,
        token: &str,
    ) -> Result<Vec<JobPostingRecord>, AcquisitionError> {
        match self.client(board) {
            Some(client) => client.list_postings(token).await,
            None => {
                warn!(%board, "no client registered for job board");
                Ok(Vec::new())
            }
        }
    }
}
