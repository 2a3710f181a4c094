use std::sync::Arc;

use async_trait::async_trait;
use leadhub_core::AcquisitionError;
use leadhub_fetch::JsonTransport;
use serde::{Deserialize, Deserializer};
use serde_json::Value as JsonValue;
use tracing::debug;

pub const SERPAPI_ORIGIN: &str = "serpapi";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: String,
    pub num: u32,
    pub start: u32,
}

/// One page of web search results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPage {
    pub organic_results: Vec<SearchResult>,
    pub knowledge_graph: Option<KnowledgeGraph>,
}

/// Text fields read `null` and non-text values as empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SearchResult {
    #[serde(default, deserialize_with = "lenient_text")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub link: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub snippet: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct KnowledgeGraph {
    #[serde(default, deserialize_with = "lenient_optional_text")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient_optional_text")]
    pub description: Option<String>,
    #[serde(default, rename = "type", deserialize_with = "lenient_optional_text")]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "lenient_optional_text")]
    pub website: Option<String>,
    #[serde(default, deserialize_with = "lenient_optional_text")]
    pub employees: Option<String>,
}

fn text_value(value: JsonValue) -> Option<String> {
    match value {
        JsonValue::String(text) => Some(text),
        JsonValue::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn lenient_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(text_value(JsonValue::deserialize(deserializer)?).unwrap_or_default())
}

fn lenient_optional_text<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Ok(text_value(JsonValue::deserialize(deserializer)?))
}

/// Third-party web search surface. One call, no retries.
#[async_trait]
pub trait SearchApi: Send + Sync {
    async fn search(&self, request: &SearchRequest) -> Result<SearchPage, AcquisitionError>;
}

pub struct SerpApiClient {
    transport: Arc<dyn JsonTransport>,
    api_key: String,
    base_url: String,
}

impl SerpApiClient {
    pub const DEFAULT_BASE_URL: &'static str = "https://serpapi.com/search.json";

    pub fn new(transport: Arc<dyn JsonTransport>, api_key: impl Into<String>) -> Self {
        Self {
            transport,
            api_key: api_key.into(),
            base_url: Self::DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl SearchApi for SerpApiClient {
    async fn search(&self, request: &SearchRequest) -> Result<SearchPage, AcquisitionError> {
        let num = request.num.clamp(1, 100).to_string();
        let start = request.start.to_string();
        let params = [
            ("engine", "google"),
            ("q", request.query.as_str()),
            ("api_key", self.api_key.as_str()),
            ("num", num.as_str()),
            ("start", start.as_str()),
            ("gl", "us"),
            ("hl", "en"),
        ];
        let value = self
            .transport
            .get_json(SERPAPI_ORIGIN, &self.base_url, &params)
            .await?;
        decode_page(value)
    }
}

fn decode_page(value: JsonValue) -> Result<SearchPage, AcquisitionError> {
    if let Some(message) = value.get("error").and_then(JsonValue::as_str) {
        // An empty result set is reported through the error field.
        if message.contains("hasn't returned any results") {
            return Ok(SearchPage::default());
        }
        return Err(AcquisitionError::malformed(SERPAPI_ORIGIN, message));
    }
    if !value.is_object() {
        return Err(AcquisitionError::malformed(
            SERPAPI_ORIGIN,
            "search payload is not an object",
        ));
    }

    // Entries decode one at a time; a broken entry stays as an empty result so the page
    // keeps its length for paging and the parser drops it later.
    let organic_results = match value.get("organic_results") {
        None | Some(JsonValue::Null) => Vec::new(),
        Some(JsonValue::Array(items)) => items
            .iter()
            .map(|item| {
                SearchResult::deserialize(item).unwrap_or_else(|err| {
                    debug!(error = %err, "unreadable search result");
                    SearchResult::default()
                })
            })
            .collect(),
        Some(_) => {
            return Err(AcquisitionError::malformed(
                SERPAPI_ORIGIN,
                "organic_results is not a list",
            ))
        }
    };
    let knowledge_graph = match value.get("knowledge_graph") {
        None | Some(JsonValue::Null) => None,
        Some(graph) => KnowledgeGraph::deserialize(graph)
            .map_err(|err| debug!(error = %err, "unreadable knowledge graph"))
            .ok(),
    };

    Ok(SearchPage {
        organic_results,
        knowledge_graph,
    })
}
