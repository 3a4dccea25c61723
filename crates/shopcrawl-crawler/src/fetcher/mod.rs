//! Rate-limited HTTP client shared by sitemap expansion and product resolution.

mod origin;

use std::borrow::Cow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode, Url};
use shopcrawl_core::CrawlConfig;

use crate::error::{CrawlError, FetchError, FetchFailure};
use crate::rate_limit::{retry_with_backoff, BackoffPolicy};

pub use origin::extract_origin;
use origin::OriginThrottle;

const ACCEPT_HEADER: &str = "application/xml,text/xml,application/json;q=0.9,*/*;q=0.8";

/// Longest `Retry-After` honoured; larger hints are clamped to this.
pub const MAX_RETRY_AFTER_SECS: u64 = 300;

/// A successful (2xx) response.
#[derive(Debug, Clone)]
pub struct FetchedBody {
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    /// Attempts it took to get this response, the successful one included.
    pub attempts: u32,
}

impl FetchedBody {
    /// The body decoded as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// HTTP GET with per-origin politeness and capped exponential backoff.
///
/// - Requests to one origin are spaced at least `request_delay` apart and
///   never overlap; different origins proceed independently.
/// - 429, 5xx, timeouts and connection failures are retried up to
///   `max_retries` total attempts. A `Retry-After` header longer than the
///   computed backoff wins.
/// - Other non-2xx statuses and malformed URLs fail on the first attempt.
///
/// Every request carries the configured `User-Agent`.
pub struct PoliteFetcher {
    client: Client,
    throttle: OriginThrottle,
    policy: BackoffPolicy,
    requests_sent: AtomicU64,
}

impl PoliteFetcher {
    /// Builds a fetcher from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError::Config`] if the configuration fails validation
    /// and [`CrawlError::Client`] if the `reqwest::Client` cannot be built.
    pub fn new(config: &CrawlConfig) -> Result<Self, CrawlError> {
        config.validate()?;
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.request_timeout.min(Duration::from_secs(10)))
            .user_agent(config.user_agent.as_str())
            .gzip(true)
            .build()
            .map_err(CrawlError::Client)?;
        Ok(Self {
            client,
            throttle: OriginThrottle::new(config.request_delay),
            policy: BackoffPolicy::from_config(config),
            requests_sent: AtomicU64::new(0),
        })
    }

    /// Total HTTP requests issued, retries included.
    #[must_use]
    pub fn requests_sent(&self) -> u64 {
        self.requests_sent.load(Ordering::Relaxed)
    }

    /// Fetches `url`, applying origin spacing and the retry policy.
    ///
    /// # Errors
    ///
    /// Returns a [`FetchFailure`] carrying the last [`FetchError`] and the
    /// number of attempts made. A malformed or non-HTTP URL fails with zero
    /// attempts.
    pub async fn get(&self, url: &str) -> Result<FetchedBody, FetchFailure> {
        let parsed = parse_http_url(url).map_err(|source| FetchFailure {
            url: url.to_owned(),
            attempts: 0,
            exhausted: false,
            source,
        })?;
        let origin = extract_origin(&parsed);

        retry_with_backoff(&self.policy, url, |attempt| {
            let parsed = parsed.clone();
            let origin = origin.clone();
            async move { self.attempt(parsed, &origin, attempt).await }
        })
        .await
    }

    async fn attempt(
        &self,
        url: Url,
        origin: &str,
        attempt: u32,
    ) -> Result<FetchedBody, FetchError> {
        let mut permit = self.throttle.acquire(origin).await;
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(url = %url, "GET");

        let response = self
            .client
            .get(url.clone())
            .header(reqwest::header::ACCEPT, ACCEPT_HEADER)
            .send()
            .await?;
        let status = response.status();

        if !status.is_success() {
            let retry_after_secs = parse_retry_after(response.headers(), Utc::now());

            if status == StatusCode::TOO_MANY_REQUESTS {
                if let Some(secs) = retry_after_secs {
                    permit.defer_for(Duration::from_secs(secs));
                }
                return Err(FetchError::RateLimited {
                    origin: origin.to_owned(),
                    retry_after_secs,
                });
            }

            if status.is_server_error() {
                if let Some(secs) = retry_after_secs {
                    permit.defer_for(Duration::from_secs(secs));
                }
                return Err(FetchError::ServerError {
                    status: status.as_u16(),
                    url: url.to_string(),
                    retry_after_secs,
                });
            }

            return Err(FetchError::UnexpectedStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = response.bytes().await?.to_vec();

        Ok(FetchedBody {
            url: url.to_string(),
            status: status.as_u16(),
            content_type,
            body,
            attempts: attempt,
        })
    }
}

fn parse_http_url(url: &str) -> Result<Url, FetchError> {
    let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
        url: url.to_owned(),
        reason: e.to_string(),
    })?;
    if matches!(parsed.scheme(), "http" | "https") && parsed.host_str().is_some() {
        return Ok(parsed);
    }
    Err(FetchError::InvalidUrl {
        url: url.to_owned(),
        reason: format!(
            "unsupported scheme \"{}\" or missing host",
            parsed.scheme()
        ),
    })
}

/// Reads `Retry-After` as either delta-seconds or an HTTP date, clamped to
/// [`MAX_RETRY_AFTER_SECS`].
fn parse_retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<u64> {
    let raw = headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim();
    let secs = match raw.parse::<u64>() {
        Ok(secs) => secs,
        Err(_) => {
            let at = DateTime::parse_from_rfc2822(raw).ok()?;
            let secs = (at.with_timezone(&Utc) - now).num_seconds().max(0);
            u64::try_from(secs).ok()?
        }
    };
    Some(secs.min(MAX_RETRY_AFTER_SECS))
}
