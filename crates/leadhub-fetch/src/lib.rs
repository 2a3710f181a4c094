//! Retry policy + single-attempt HTTP JSON fetching for Lead Hub.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use leadhub_core::AcquisitionError;
use reqwest::StatusCode;
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info_span, Instrument};

mod retry;

pub use retry::{RetryClassification, RetryObserver, RetryPolicy, TracingRetryObserver};

/// Maps a non-success HTTP status onto the acquisition taxonomy.
pub fn error_for_status(origin: &str, status: StatusCode, url: &str) -> AcquisitionError {
    let origin = origin.to_string();
    match status.as_u16() {
        401 | 403 => AcquisitionError::Auth {
            origin,
            status: status.as_u16(),
        },
        404 => AcquisitionError::NotFound {
            origin,
            url: url.to_string(),
        },
        429 => AcquisitionError::RateLimit {
            origin,
            status: status.as_u16(),
        },
        code if status.is_server_error() => {
            AcquisitionError::transient(origin, format!("http {code}"))
        }
        code => AcquisitionError::UnexpectedStatus {
            origin,
            status: code,
        },
    }
}

pub fn classify_reqwest_error(origin: &str, err: &reqwest::Error) -> AcquisitionError {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        AcquisitionError::transient(origin, err.to_string())
    } else if err.is_decode() {
        AcquisitionError::malformed(origin, err.to_string())
    } else {
        AcquisitionError::unclassified(origin, err.to_string())
    }
}

/// One GET returning a JSON document. Implementations make exactly one attempt; retrying is
/// the caller's [`RetryPolicy`].
#[async_trait]
pub trait JsonTransport: Send + Sync {
    async fn get_json(
        &self,
        origin: &str,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<JsonValue, AcquisitionError>;
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub min_request_interval: Option<Duration>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: Some("leadhub/0.1".to_string()),
            min_request_interval: None,
        }
    }
}

/// Enforces a minimum spacing between consecutive requests.
#[derive(Debug)]
pub struct RequestPacer {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RequestPacer {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Mutex::new(None),
        }
    }

    pub async fn wait_turn(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    pacer: Option<RequestPacer>,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            pacer: config.min_request_interval.map(RequestPacer::new),
        })
    }
}

#[async_trait]
impl JsonTransport for HttpFetcher {
    async fn get_json(
        &self,
        origin: &str,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<JsonValue, AcquisitionError> {
        if let Some(pacer) = &self.pacer {
            pacer.wait_turn().await;
        }

        // Query parameters stay out of spans and error text; they can carry API keys.
        let span = info_span!("http_get", origin, url);
        async {
            let resp = self
                .client
                .get(url)
                .query(query)
                .send()
                .await
                .map_err(|err| classify_reqwest_error(origin, &err.without_url()))?;

            let status = resp.status();
            debug!(status = status.as_u16(), "response received");
            if !status.is_success() {
                return Err(error_for_status(origin, status, url));
            }

            let body = resp
                .bytes()
                .await
                .map_err(|err| classify_reqwest_error(origin, &err.without_url()))?;
            serde_json::from_slice::<JsonValue>(&body)
                .map_err(|err| AcquisitionError::malformed(origin, format!("invalid json: {err}")))
        }
        .instrument(span)
        .await
    }
}
