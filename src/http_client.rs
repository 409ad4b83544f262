//! Shared HTTP client
//!
//! One reqwest client serves every feed, the composer API and the
//! publisher. A semaphore caps in-flight requests across all of them and
//! transient failures are retried with jittered exponential backoff.

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::error::{NewsroomError, Result};

/// Backoff schedule for transient failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Un-jittered delay before retry number `retry` (1-based), capped at `max_delay`
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Delay scaled by a random factor in `[0.5, 1.5)`
    fn jittered(&self, retry: u32) -> Duration {
        self.delay_for(retry).mul_f64(0.5 + rand::random::<f64>())
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Requests in flight across all callers
    pub max_concurrent_requests: usize,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub retry: RetryPolicy,
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 10,
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            user_agent: format!("newsroom/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// What to do with the result of one attempt
enum Verdict {
    Done(Response),
    Retry(String),
    Fail(NewsroomError),
}

/// Throttled, retrying HTTP client. Cheap to clone.
#[derive(Clone)]
pub struct ResilientHttpClient {
    client: Client,
    permits: Arc<Semaphore>,
    retry: RetryPolicy,
}

impl ResilientHttpClient {
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Self {
            client,
            permits: Arc::new(Semaphore::new(config.max_concurrent_requests.max(1))),
            retry: config.retry,
        })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::new(HttpClientConfig::default())
    }

    /// Same connection pool and permits with a different retry policy
    pub fn with_retry(&self, retry: RetryPolicy) -> Self {
        Self {
            retry,
            ..self.clone()
        }
    }

    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Sends a request, retrying transient failures.
    ///
    /// `build` runs once per attempt so bodies can be replayed. A non-success
    /// status that is not retryable (or still failing after the last retry)
    /// comes back as `ApiError` carrying the response body.
    pub async fn execute<F>(&self, build: F) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| NewsroomError::ValidationError("HTTP client is shut down".to_string()))?;

        let mut retry = 0u32;
        loop {
            let request = build(&self.client).build()?;
            let url = request.url().clone();
            debug!(method = %request.method(), url = %url, retry, "HTTP request");

            let can_retry = retry < self.retry.max_retries;
            let verdict = match self.client.execute(request).await {
                Ok(response) if response.status().is_success() => Verdict::Done(response),
                Ok(response) if can_retry && is_retryable_status(response.status()) => {
                    Verdict::Retry(format!("status {}", response.status()))
                }
                Ok(response) => {
                    let code = response.status().to_string();
                    let message = response.text().await.unwrap_or_default();
                    Verdict::Fail(NewsroomError::ApiError { code, message })
                }
                Err(e) if can_retry && (e.is_timeout() || e.is_connect()) => Verdict::Retry(e.to_string()),
                Err(e) => Verdict::Fail(NewsroomError::HttpError(e)),
            };

            match verdict {
                Verdict::Done(response) => return Ok(response),
                Verdict::Fail(err) => return Err(err),
                Verdict::Retry(reason) => {
                    retry += 1;
                    let wait = self.retry.jittered(retry);
                    warn!(url = %url, reason = %reason, retry, wait_ms = wait.as_millis() as u64, "Transient HTTP failure, retrying");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// GET returning the body as text
    pub async fn get_text(&self, url: &str) -> Result<String> {
        let response = self.execute(|client| client.get(url)).await?;
        Ok(response.text().await?)
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}

/// Rate limiting, gateway trouble and request timeouts
fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
            | StatusCode::REQUEST_TIMEOUT
    )
}
