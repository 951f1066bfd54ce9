//! Page fetching with exponential backoff retry logic.
//!
//! Sources never talk to reqwest directly; they go through [`PageFetcher`],
//! which keeps them testable with in-memory fetchers.
//!
//! # Architecture
//!
//! - [`PageFetcher`]: Core trait defining an async page download
//! - [`HttpFetcher`]: reqwest-backed implementation with timeouts and headers
//! - [`RetryFetch`]: Decorator that adds retry logic to any `PageFetcher`
//! - [`Pacing`]: Randomised pause taken before loading the next page
//!
//! # Retry Strategy
//!
//! - Exponential backoff starting at `base_delay`
//! - Maximum delay capped at 30 seconds
//! - Random jitter (0-250ms by default) added to prevent thundering herd
//! - Permanent failures (most 4xx statuses) are returned immediately

use crate::error::FetchError;
use rand::{Rng, rng};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration as StdDuration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, instrument, warn};
use url::Url;

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko)";

/// Trait for downloading one page as text.
pub trait PageFetcher {
    async fn fetch(&self, url: &Url) -> Result<String, FetchError>;
}

/// HTTP and pacing knobs, read from the `fetch` block of a site profile.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    pub user_agent: String,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// Retries after the first failed attempt.
    pub max_retries: usize,
    pub retry_base_delay_ms: u64,
    /// Fixed pause before each advance.
    pub delay_ms: u64,
    /// Upper bound of the random pause added on top of `delay_ms`.
    pub jitter_ms: u64,
    /// Extra request headers.
    pub headers: BTreeMap<String, String>,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
            max_retries: 3,
            retry_base_delay_ms: 1000,
            delay_ms: 1000,
            jitter_ms: 1000,
            headers: BTreeMap::new(),
        }
    }
}

impl FetchSettings {
    pub fn pacing(&self) -> Pacing {
        Pacing {
            delay: StdDuration::from_millis(self.delay_ms),
            jitter: StdDuration::from_millis(self.jitter_ms),
        }
    }
}

/// Pause taken before each advance so paging looks less like a bot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pacing {
    pub delay: StdDuration,
    pub jitter: StdDuration,
}

impl Pacing {
    pub async fn wait(&self) {
        let jitter_ms = self.jitter.as_millis() as u64;
        let extra = if jitter_ms == 0 {
            0
        } else {
            rng().random_range(0..=jitter_ms)
        };
        let pause = self.delay + StdDuration::from_millis(extra);
        if !pause.is_zero() {
            debug!(?pause, "Pacing before next page");
            sleep(pause).await;
        }
    }
}

/// reqwest-backed [`PageFetcher`].
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(settings: &FetchSettings) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &settings.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| FetchError::InvalidHeader { name: name.clone() })?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|_| FetchError::InvalidHeader { name: name.clone() })?;
            headers.insert(header_name, header_value);
        }

        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .connect_timeout(StdDuration::from_secs(settings.connect_timeout_secs))
            .timeout(StdDuration::from_secs(settings.request_timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| FetchError::Client {
                reason: e.to_string(),
            })?;
        Ok(Self { client })
    }
}

impl PageFetcher for HttpFetcher {
    #[instrument(level = "debug", skip_all, fields(%url))]
    async fn fetch(&self, url: &Url) -> Result<String, FetchError> {
        let t0 = Instant::now();
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| map_reqwest_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| FetchError::Body {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        debug!(
            bytes = body.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Fetched page"
        );
        Ok(body)
    }
}

fn map_reqwest_error(url: &Url, err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::Timeout {
            url: url.to_string(),
        };
    }
    FetchError::Network {
        url: url.to_string(),
        reason: err.to_string(),
    }
}

/// Wrapper that adds exponential backoff retry logic to any [`PageFetcher`].
///
/// # Backoff Strategy
///
/// The delay between retries follows this formula:
/// ```text
/// delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..max_jitter)
/// ```
pub struct RetryFetch<T> {
    /// The underlying fetcher to wrap.
    inner: T,
    /// Maximum number of retry attempts before giving up.
    max_retries: usize,
    /// Initial delay between retries (doubles with each attempt).
    base_delay: StdDuration,
    /// Maximum delay cap to prevent excessive waiting.
    max_delay: StdDuration,
    /// Upper bound of the random jitter added to each delay.
    max_jitter: StdDuration,
}

impl<T> RetryFetch<T>
where
    T: PageFetcher,
{
    /// Create a new retry wrapper around an existing [`PageFetcher`].
    ///
    /// # Example
    ///
    /// ```ignore
    /// let http = HttpFetcher::new(&FetchSettings::default())?;
    /// let fetcher = RetryFetch::new(http, 3, Duration::from_secs(1));
    /// ```
    pub fn new(inner: T, max_retries: usize, base_delay: StdDuration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: StdDuration::from_secs(30),
            max_jitter: StdDuration::from_millis(250),
        }
    }

    pub fn with_max_jitter(mut self, max_jitter: StdDuration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    fn backoff(&self, attempt: usize) -> StdDuration {
        let shift = (attempt - 1).min(16) as u32;
        let mut delay = self.base_delay.saturating_mul(1 << shift);
        if delay > self.max_delay {
            delay = self.max_delay;
        }
        let jitter_ms = self.max_jitter.as_millis() as u64;
        if jitter_ms > 0 {
            delay += StdDuration::from_millis(rng().random_range(0..=jitter_ms));
        }
        delay
    }
}

impl<T> fmt::Debug for RetryFetch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryFetch")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T> PageFetcher for RetryFetch<T>
where
    T: PageFetcher,
{
    #[instrument(level = "info", skip_all, fields(%url))]
    async fn fetch(&self, url: &Url) -> Result<String, FetchError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match self.inner.fetch(url).await {
                Ok(body) => return Ok(body),
                Err(e) => {
                    attempt += 1;
                    let attempt_dt = attempt_t0.elapsed();
                    let total_dt = total_t0.elapsed();

                    if !e.is_retryable() || attempt > self.max_retries {
                        error!(
                            attempt,
                            max = self.max_retries,
                            retryable = e.is_retryable(),
                            elapsed_ms_total = total_dt.as_millis() as u64,
                            error = %e,
                            "fetch() giving up"
                        );
                        return Err(e);
                    }

                    let delay = self.backoff(attempt);
                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                        ?delay,
                        error = %e,
                        "fetch() attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct FlakyFetcher {
        failures: Vec<FetchError>,
        calls: Cell<usize>,
    }

    impl PageFetcher for FlakyFetcher {
        async fn fetch(&self, url: &Url) -> Result<String, FetchError> {
            let call = self.calls.get();
            self.calls.set(call + 1);
            match self.failures.get(call) {
                Some(FetchError::Status { status, .. }) => Err(FetchError::Status {
                    url: url.to_string(),
                    status: *status,
                }),
                Some(_) => Err(FetchError::Timeout {
                    url: url.to_string(),
                }),
                None => Ok("<html>ok</html>".to_string()),
            }
        }
    }

    fn status(code: u16) -> FetchError {
        FetchError::Status {
            url: String::new(),
            status: code,
        }
    }

    fn url() -> Url {
        Url::parse("https://example.com/page").unwrap()
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let inner = FlakyFetcher {
            failures: vec![status(503), FetchError::Timeout { url: String::new() }],
            calls: Cell::new(0),
        };
        let fetcher = RetryFetch::new(inner, 3, StdDuration::from_millis(1))
            .with_max_jitter(StdDuration::ZERO);

        let body = fetcher.fetch(&url()).await.unwrap();
        assert_eq!(body, "<html>ok</html>");
        assert_eq!(fetcher.inner.calls.get(), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let inner = FlakyFetcher {
            failures: vec![status(500), status(500), status(500)],
            calls: Cell::new(0),
        };
        let fetcher = RetryFetch::new(inner, 2, StdDuration::from_millis(1))
            .with_max_jitter(StdDuration::ZERO);

        let err = fetcher.fetch(&url()).await.unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 500, .. }));
        assert_eq!(fetcher.inner.calls.get(), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let inner = FlakyFetcher {
            failures: vec![status(404)],
            calls: Cell::new(0),
        };
        let fetcher = RetryFetch::new(inner, 5, StdDuration::from_millis(1));

        let err = fetcher.fetch(&url()).await.unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 404, .. }));
        assert_eq!(fetcher.inner.calls.get(), 1);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let inner = FlakyFetcher {
            failures: vec![],
            calls: Cell::new(0),
        };
        let fetcher = RetryFetch::new(inner, 10, StdDuration::from_secs(1))
            .with_max_jitter(StdDuration::ZERO);
        assert_eq!(fetcher.backoff(1), StdDuration::from_secs(1));
        assert_eq!(fetcher.backoff(2), StdDuration::from_secs(2));
        assert_eq!(fetcher.backoff(4), StdDuration::from_secs(8));
        assert_eq!(fetcher.backoff(6), StdDuration::from_secs(30));
        assert_eq!(fetcher.backoff(40), StdDuration::from_secs(30));
    }

    #[test]
    fn test_fetch_settings_defaults_and_pacing() {
        let settings: FetchSettings = serde_yaml::from_str("delay_ms: 0\njitter_ms: 0").unwrap();
        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.pacing(), Pacing::default());
    }

    #[test]
    fn test_invalid_header_is_rejected() {
        let mut settings = FetchSettings::default();
        settings
            .headers
            .insert("bad header".to_string(), "x".to_string());
        let err = HttpFetcher::new(&settings).unwrap_err();
        assert!(matches!(err, FetchError::InvalidHeader { .. }));
    }
}
