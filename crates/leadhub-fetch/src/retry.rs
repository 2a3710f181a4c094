use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use leadhub_core::{AcquisitionError, ErrorKind};
use rand::Rng;
use tracing::{error, warn};

/// Hook invoked by [`RetryPolicy::run`] before every backoff sleep and when it gives up.
pub trait RetryObserver: Send + Sync {
    fn on_retry(&self, operation: &str, attempt: u32, delay: Duration, error: &AcquisitionError);
    fn on_give_up(&self, operation: &str, attempts: u32, error: &AcquisitionError);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRetryObserver;

impl RetryObserver for TracingRetryObserver {
    fn on_retry(&self, operation: &str, attempt: u32, delay: Duration, err: &AcquisitionError) {
        warn!(
            operation,
            attempt,
            delay_ms = delay.as_millis() as u64,
            kind = %err.kind(),
            error = %err,
            "call failed; retrying"
        );
    }

    fn on_give_up(&self, operation: &str, attempts: u32, err: &AcquisitionError) {
        error!(operation, attempts, kind = %err.kind(), error = %err, "call failed; giving up");
    }
}

/// Which error kinds are retried. A kind in `immediate` is never retried, even when it is
/// also listed as retryable; a kind in neither set propagates immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryClassification {
    retryable: BTreeSet<ErrorKind>,
    immediate: BTreeSet<ErrorKind>,
}

impl Default for RetryClassification {
    fn default() -> Self {
        Self::new(
            [ErrorKind::RateLimit, ErrorKind::TransientNetwork],
            [
                ErrorKind::Auth,
                ErrorKind::MalformedResponse,
                ErrorKind::NotFound,
                ErrorKind::UnexpectedStatus,
                ErrorKind::Unclassified,
            ],
        )
    }
}

impl RetryClassification {
    pub fn new(
        retryable: impl IntoIterator<Item = ErrorKind>,
        immediate: impl IntoIterator<Item = ErrorKind>,
    ) -> Self {
        Self {
            retryable: retryable.into_iter().collect(),
            immediate: immediate.into_iter().collect(),
        }
    }

    pub fn retrying(mut self, kind: ErrorKind) -> Self {
        self.immediate.remove(&kind);
        self.retryable.insert(kind);
        self
    }

    pub fn never_retrying(mut self, kind: ErrorKind) -> Self {
        self.retryable.remove(&kind);
        self.immediate.insert(kind);
        self
    }

    pub fn is_retryable(&self, kind: ErrorKind) -> bool {
        !self.immediate.contains(&kind) && self.retryable.contains(&kind)
    }
}

/// Bounded exponential backoff around a single fallible async call.
#[derive(Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub jitter: bool,
    pub classification: RetryClassification,
    observer: Arc<dyn RetryObserver>,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("multiplier", &self.multiplier)
            .field("max_delay", &self.max_delay)
            .field("jitter", &self.jitter)
            .field("classification", &self.classification)
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: true,
            classification: RetryClassification::default(),
            observer: Arc::new(TracingRetryObserver),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_classification(mut self, classification: RetryClassification) -> Self {
        self.classification = classification;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn RetryObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Un-jittered delay after failed attempt number `attempt` (1-based):
    /// `base_delay * multiplier^(attempt - 1)`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.max(0.0).powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        if self.jitter && !delay.is_zero() {
            delay + delay.mul_f64(rand::thread_rng().gen_range(0.0..0.1))
        } else {
            delay
        }
    }

    /// Runs `call` until it succeeds, fails with a non-retryable kind, or `max_attempts`
    /// calls have failed. The last error is returned unchanged.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, AcquisitionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AcquisitionError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let err = match call().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if attempt >= max_attempts || !self.classification.is_retryable(err.kind()) {
                self.observer.on_give_up(operation, attempt, &err);
                return Err(err);
            }

            let delay = self.backoff(attempt);
            self.observer.on_retry(operation, attempt, delay, &err);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            attempt += 1;
        }
    }
}
