use std::time::Duration;

use thiserror::Error;

use crate::types::ErrorKind;

/// Failure of a single HTTP attempt.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("rate limited by {origin}")]
    RateLimited {
        origin: String,
        retry_after_secs: Option<u64>,
    },

    #[error("server error {status} from {url}")]
    ServerError {
        status: u16,
        url: String,
        retry_after_secs: Option<u64>,
    },

    #[error("unexpected HTTP status {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },

    #[error("invalid URL \"{url}\": {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl FetchError {
    /// Returns `true` if the attempt may succeed when repeated after a delay.
    ///
    /// Retriable: HTTP 429, 5xx, timeouts, and connection-level failures.
    /// Everything else (other 4xx, malformed URLs, body decoding errors) is
    /// returned to the caller without another attempt.
    pub(crate) fn is_retriable(&self) -> bool {
        match self {
            FetchError::RateLimited { .. } | FetchError::ServerError { .. } => true,
            FetchError::Http(e) => {
                e.is_timeout() || e.is_connect() || e.is_request() || e.is_body()
            }
            FetchError::UnexpectedStatus { .. } | FetchError::InvalidUrl { .. } => false,
        }
    }

    /// The server-provided `Retry-After` hint, if the response carried one.
    pub(crate) fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::RateLimited {
                retry_after_secs, ..
            }
            | FetchError::ServerError {
                retry_after_secs, ..
            } => retry_after_secs.map(Duration::from_secs),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Http(e) if e.is_timeout())
    }
}

/// Terminal outcome of [`crate::PoliteFetcher::get`] after the retry policy
/// has run its course.
#[derive(Debug, Error)]
#[error("fetch of {url} failed after {attempts} attempt(s): {source}")]
pub struct FetchFailure {
    pub url: String,
    pub attempts: u32,
    /// `true` when the last error was retriable but no attempts were left.
    pub exhausted: bool,
    #[source]
    pub source: FetchError,
}

impl FetchFailure {
    /// Maps the failure onto the error taxonomy recorded in results.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        if self.source.is_timeout() {
            ErrorKind::FetchTimeout
        } else if self.exhausted {
            ErrorKind::FetchExhaustedRetries
        } else {
            ErrorKind::FetchHttpError
        }
    }
}

/// Reasons a sitemap body could not be classified as an index or a urlset.
#[derive(Debug, Error)]
pub enum SitemapParseError {
    #[error("gzip decompression failed: {0}")]
    Decompress(#[source] std::io::Error),

    #[error("sitemap body is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),

    #[error("XML parse error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("document has no root element")]
    MissingRoot,

    #[error("unrecognized root element <{0}>; expected <sitemapindex> or <urlset>")]
    UnrecognizedRoot(String),

    #[error("document ended before <{0}> was closed")]
    Truncated(String),
}

/// Process-fatal errors. Data problems never surface here; they are recorded
/// as [`crate::ErrorEntry`] values on the brand result instead.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("invalid crawl configuration: {0}")]
    Config(#[from] shopcrawl_core::ConfigError),

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("checkpoint I/O error on {path}: {source}")]
    CheckpointIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode checkpoint entry: {0}")]
    CheckpointEncode(#[from] serde_json::Error),
}
