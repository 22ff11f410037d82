//! Retry policies for fetch operations.

use std::sync::Arc;
use std::time::Duration;

use fuel_observability::DataLayerMetrics;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::message::{HttpClient, HttpRequest, HttpResponse};

/// Backoff strategy between retry attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// No delay between retries.
    None,
    /// Fixed delay between retries.
    Fixed(Duration),
    /// Exponential backoff with base and max.
    Exponential {
        /// Initial delay.
        base: Duration,
        /// Maximum delay.
        max: Duration,
    },
}

impl BackoffStrategy {
    /// Calculate delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            Self::None => Duration::ZERO,
            Self::Fixed(d) => *d,
            Self::Exponential { base, max } => {
                let multiplier = 2u32.saturating_pow(attempt);
                std::cmp::min(base.saturating_mul(multiplier), *max)
            }
        }
    }
}

impl Default for BackoffStrategy {
    /// 1s, 2s, 4s, ... capped at five minutes.
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_secs(1),
            max: Duration::from_secs(300),
        }
    }
}

/// Conditions that trigger a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCondition {
    /// Retry on any status >= 500.
    ServerError,
    /// Retry on timeout.
    Timeout,
    /// Retry on connection error.
    ConnectionError,
}

impl RetryCondition {
    /// Check if an error matches this condition.
    pub fn matches(&self, error: &FetchError) -> bool {
        match self {
            Self::ServerError => error.is_server_error(),
            Self::Timeout => matches!(error, FetchError::Timeout(_)),
            Self::ConnectionError => matches!(error, FetchError::Connection(_)),
        }
    }
}

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt.
    pub max_retries: u32,
    /// Backoff strategy.
    pub backoff: BackoffStrategy,
    /// Conditions that trigger retry.
    pub retry_on: Vec<RetryCondition>,
}

impl RetryPolicy {
    /// Create a new retry policy.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff: BackoffStrategy::default(),
            retry_on: vec![
                RetryCondition::ServerError,
                RetryCondition::Timeout,
                RetryCondition::ConnectionError,
            ],
        }
    }

    /// Create a policy with no retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: BackoffStrategy::None,
            retry_on: Vec::new(),
        }
    }

    /// Set backoff strategy.
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff = strategy;
        self
    }

    /// Set retry conditions.
    pub fn with_conditions(mut self, conditions: Vec<RetryCondition>) -> Self {
        self.retry_on = conditions;
        self
    }

    /// Whether `error`, seen on attempt `attempt` (0-indexed), earns another try.
    ///
    /// Only [`FetchError::is_retryable`] errors qualify, and only those the
    /// configured conditions select. Client errors and aborts never do.
    pub fn should_retry(&self, error: &FetchError, attempt: u32) -> bool {
        if attempt >= self.max_retries || !error.is_retryable() {
            return false;
        }
        self.retry_on.iter().any(|c| c.matches(error))
    }

    /// Run `request` against `client` under this policy.
    ///
    /// Responses with status >= 400 become `FetchError::Http`. When every
    /// attempt fails, the last error is returned.
    pub async fn execute<C>(
        &self,
        client: &C,
        request: HttpRequest,
        metrics: Option<&DataLayerMetrics>,
    ) -> Result<HttpResponse, FetchError>
    where
        C: HttpClient + ?Sized,
    {
        let mut attempt = 0u32;

        loop {
            if let Some(metrics) = metrics {
                metrics.record_http_attempt(attempt);
            }

            let outcome = send_once(client, &request)
                .await
                .and_then(|resp| resp.error_for_status(&request.url));

            let error = match outcome {
                Ok(resp) => return Ok(resp),
                Err(error) => error,
            };

            if !self.should_retry(&error, attempt) {
                debug!(url = %request.url, attempt, error = %error, "giving up");
                return Err(error);
            }

            let delay = self.backoff.delay_for_attempt(attempt);
            warn!(
                url = %request.url,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying request"
            );
            sleep_or_cancel(delay, request.cancel.as_ref()).await?;
            attempt += 1;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

/// One attempt, honouring the request's cancellation token.
pub(crate) async fn send_once<C>(client: &C, request: &HttpRequest) -> Result<HttpResponse, FetchError>
where
    C: HttpClient + ?Sized,
{
    match &request.cancel {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => Err(FetchError::Aborted),
            result = client.send(request.clone()) => result,
        },
        None => client.send(request.clone()).await,
    }
}

async fn sleep_or_cancel(delay: Duration, cancel: Option<&CancellationToken>) -> Result<(), FetchError> {
    match cancel {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => Err(FetchError::Aborted),
            _ = tokio::time::sleep(delay) => Ok(()),
        },
        None => {
            tokio::time::sleep(delay).await;
            Ok(())
        }
    }
}

/// Send `request`, retrying transport-class failures up to `max_retries` times
/// with 1s, 2s, 4s, ... between attempts.
pub async fn fetch_with_retry<C>(
    client: &C,
    request: HttpRequest,
    max_retries: u32,
) -> Result<HttpResponse, FetchError>
where
    C: HttpClient + ?Sized,
{
    RetryPolicy::new(max_retries).execute(client, request, None).await
}

/// An `HttpClient` paired with the retry policy applied to every request.
#[derive(Clone)]
pub struct RetryingTransport {
    client: Arc<dyn HttpClient>,
    policy: RetryPolicy,
    metrics: Option<Arc<DataLayerMetrics>>,
}

impl RetryingTransport {
    /// Create a transport with the default policy.
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self {
            client,
            policy: RetryPolicy::default(),
            metrics: None,
        }
    }

    /// Set the retry policy.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Record attempts into shared metrics.
    pub fn with_metrics(mut self, metrics: Arc<DataLayerMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Send a request under the configured policy.
    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse, FetchError> {
        self.policy
            .execute(self.client.as_ref(), request, self.metrics.as_deref())
            .await
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn client(&self) -> &Arc<dyn HttpClient> {
        &self.client
    }
}

impl std::fmt::Debug for RetryingTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingTransport")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
