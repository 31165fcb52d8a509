//! Listing page download with bounded retries
//!
//! One fetch picks an egress path from the proxy pool, checks out that path's
//! client and issues the GET. Transient outcomes (HTTP 429/500/502/503/504,
//! timeouts, connection and protocol errors) are retried with exponential
//! backoff; everything else is returned at once. Failures come back as a
//! [`FetchFailure`] value, never as a panic.

use async_trait::async_trait;
use governor::DefaultDirectRateLimiter;
use reqwest::StatusCode;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::{Category, Egress};
use crate::infrastructure::config::SiteConfig;
use crate::infrastructure::http_client_pool::{ClientPoolError, HttpClientPool};
use crate::infrastructure::proxy_pool::ProxyPool;

/// Statuses worth another attempt.
pub const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    #[error("Gave up after {attempts} attempts: {last_error}")]
    TransientExhausted { attempts: u32, last_error: String },

    #[error("Non-retryable failure: {reason}")]
    NonRetryable { status: Option<u16>, reason: String },

    #[error("Fetch was cancelled")]
    Cancelled,

    #[error("HTTP client pool is shut down")]
    PoolClosed,
}

impl FetchFailure {
    pub fn non_retryable(reason: impl Into<String>) -> Self {
        Self::NonRetryable {
            status: None,
            reason: reason.into(),
        }
    }
}

/// Exponential backoff: `base * 2^n`, capped, for at most `max_attempts`
/// attempts in total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Sleep before retry number `retry` (0 = after the first failure).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.min(31));
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// What one attempt produced.
#[derive(Debug)]
pub enum Attempt<T> {
    Done(T),
    Retry(String),
    Fail(FetchFailure),
}

/// Runs `attempt` until it is done, fails for good, or the policy runs out.
///
/// The attempt number (starting at 1) is passed in. Cancellation is observed
/// before each attempt, during it and during the backoff sleep.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    label: &str,
    mut attempt: F,
) -> Result<T, FetchFailure>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut last_error = String::new();

    for number in 1..=attempts {
        if cancel.is_cancelled() {
            return Err(FetchFailure::Cancelled);
        }

        let outcome = tokio::select! {
            outcome = attempt(number) => outcome,
            _ = cancel.cancelled() => return Err(FetchFailure::Cancelled),
        };

        match outcome {
            Attempt::Done(value) => return Ok(value),
            Attempt::Fail(failure) => return Err(failure),
            Attempt::Retry(reason) => {
                last_error = reason;
                if number < attempts {
                    let delay = policy.delay_for(number - 1);
                    warn!(
                        "{} attempt {}/{} failed: {}; retrying in {:?}",
                        label, number, attempts, last_error, delay
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(FetchFailure::Cancelled),
                    }
                }
            }
        }
    }

    Err(FetchFailure::TransientExhausted {
        attempts,
        last_error,
    })
}

/// Anything that can hand out the raw HTML of a category's listing page.
#[async_trait]
pub trait ListingSource: Send + Sync {
    async fn fetch(&self, category: &Category, page: u32) -> Result<String, FetchFailure>;
}

pub struct PageFetcher {
    proxies: Arc<ProxyPool>,
    clients: Arc<HttpClientPool>,
    site: SiteConfig,
    policy: RetryPolicy,
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
    cancel: CancellationToken,
}

impl PageFetcher {
    pub fn new(
        proxies: Arc<ProxyPool>,
        clients: Arc<HttpClientPool>,
        site: SiteConfig,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            proxies,
            clients,
            site,
            policy,
            limiter: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Every attempt first waits for a token from `limiter`.
    pub fn with_rate_limiter(mut self, limiter: Option<Arc<DefaultDirectRateLimiter>>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    async fn attempt(&self, url: &str, egress: &Egress) -> Attempt<String> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let pooled = match self.clients.acquire(egress).await {
            Ok(pooled) => pooled,
            Err(ClientPoolError::Closed) => return Attempt::Fail(FetchFailure::PoolClosed),
            Err(err) => return Attempt::Fail(FetchFailure::non_retryable(err.to_string())),
        };

        let response = match pooled.client.get(url).send().await {
            Ok(response) => response,
            Err(err) => return classify_error(&err),
        };

        let status = response.status();
        if !status.is_success() {
            return classify_status(status);
        }

        match response.text().await {
            Ok(body) => Attempt::Done(body),
            Err(err) => classify_error(&err),
        }
    }
}

#[async_trait]
impl ListingSource for PageFetcher {
    async fn fetch(&self, category: &Category, page: u32) -> Result<String, FetchFailure> {
        let url = self
            .site
            .listing_url(&category.slug, page)
            .map_err(|err| FetchFailure::non_retryable(err.to_string()))?;
        let egress = self.proxies.next();
        let label = format!("{url} via {egress}");

        let body = retry_with_backoff(&self.policy, &self.cancel, &label, |_| {
            self.attempt(url.as_str(), &egress)
        })
        .await?;

        debug!("Fetched {} ({} bytes)", label, body.len());
        Ok(body)
    }
}

/// Decides whether a non-2xx status is worth another attempt.
pub fn classify_status<T>(status: StatusCode) -> Attempt<T> {
    if RETRYABLE_STATUSES.contains(&status.as_u16()) {
        Attempt::Retry(format!("HTTP {status}"))
    } else {
        Attempt::Fail(FetchFailure::NonRetryable {
            status: Some(status.as_u16()),
            reason: format!("HTTP {status}"),
        })
    }
}

fn classify_error<T>(err: &reqwest::Error) -> Attempt<T> {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        Attempt::Retry(err.to_string())
    } else {
        Attempt::Fail(FetchFailure::NonRetryable {
            status: err.status().map(|status| status.as_u16()),
            reason: err.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::time::Instant;

    #[test]
    fn delays_double_up_to_the_cap() {
        let policy = RetryPolicy::default();
        let delays: Vec<_> = (0..8).map(|n| policy.delay_for(n)).collect();
        assert_eq!(
            delays,
            [250, 500, 1000, 2000, 4000, 8000, 8000, 8000].map(Duration::from_millis)
        );
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(8));
    }

    #[test]
    fn status_classification() {
        for code in RETRYABLE_STATUSES {
            let status = StatusCode::from_u16(code).unwrap();
            assert!(matches!(classify_status::<()>(status), Attempt::Retry(_)));
        }
        assert!(matches!(
            classify_status::<()>(StatusCode::NOT_FOUND),
            Attempt::Fail(FetchFailure::NonRetryable { status: Some(404), .. })
        ));
        assert!(matches!(
            classify_status::<()>(StatusCode::FORBIDDEN),
            Attempt::Fail(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn three_503s_then_success_with_growing_backoff() {
        let policy = RetryPolicy::default();
        let cancel = CancellationToken::new();
        let started: Mutex<Vec<Instant>> = Mutex::new(Vec::new());

        let body = retry_with_backoff(&policy, &cancel, "page", |number| {
            started.lock().unwrap().push(Instant::now());
            async move {
                if number <= 3 {
                    classify_status(StatusCode::SERVICE_UNAVAILABLE)
                } else {
                    Attempt::Done("<html>ok</html>".to_string())
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(body, "<html>ok</html>");

        let started = started.into_inner().unwrap();
        assert_eq!(started.len(), 4);
        let gaps: Vec<_> = started.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(gaps, [250, 500, 1000].map(Duration::from_millis));
        assert!(gaps.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_is_a_transient_failure() {
        let policy = RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::default()
        };
        let calls = Mutex::new(0u32);

        let result: Result<(), _> =
            retry_with_backoff(&policy, &CancellationToken::new(), "page", |_| {
                *calls.lock().unwrap() += 1;
                async { Attempt::Retry("HTTP 502 Bad Gateway".to_string()) }
            })
            .await;

        assert_eq!(*calls.lock().unwrap(), 3);
        assert_eq!(
            result.unwrap_err(),
            FetchFailure::TransientExhausted {
                attempts: 3,
                last_error: "HTTP 502 Bad Gateway".to_string()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_returns_immediately() {
        let calls = Mutex::new(0u32);
        let result: Result<(), _> = retry_with_backoff(
            &RetryPolicy::default(),
            &CancellationToken::new(),
            "page",
            |_| {
                *calls.lock().unwrap() += 1;
                async { classify_status(StatusCode::NOT_FOUND) }
            },
        )
        .await;

        assert_eq!(*calls.lock().unwrap(), 1);
        assert!(matches!(
            result.unwrap_err(),
            FetchFailure::NonRetryable { status: Some(404), .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let result: Result<(), _> = retry_with_backoff(
            &RetryPolicy {
                base_delay: Duration::from_secs(5),
                ..RetryPolicy::default()
            },
            &cancel,
            "page",
            |_| async { Attempt::Retry("timeout".to_string()) },
        )
        .await;
        assert_eq!(result.unwrap_err(), FetchFailure::Cancelled);
    }

    #[tokio::test]
    async fn closed_pool_fails_without_retrying() {
        let clients = Arc::new(HttpClientPool::new(
            crate::infrastructure::http_client_pool::ClientSettings::from_config(
                &crate::infrastructure::config::CrawlerConfig::default(),
            ),
        ));
        clients.shutdown().await;

        let fetcher = PageFetcher::new(
            Arc::new(ProxyPool::direct()),
            clients,
            SiteConfig::default(),
            RetryPolicy::default(),
        );
        let result = fetcher.fetch(&Category::leaf(1, "bolty"), 1).await;
        assert_eq!(result.unwrap_err(), FetchFailure::PoolClosed);
    }
}
