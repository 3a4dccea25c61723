use std::path::PathBuf;
use std::time::Duration;

use crate::ConfigError;

pub const DEFAULT_USER_AGENT: &str = "shopcrawl/0.1 (+sitemap-product-crawler)";

/// Settings consumed by the crawl engine.
///
/// Build one with [`crate::load_crawl_config`] or start from
/// [`CrawlConfig::default`] and override fields; either way call
/// [`CrawlConfig::validate`] before handing it to the crawler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlConfig {
    /// Minimum spacing between two requests to the same origin.
    pub request_delay: Duration,
    /// Per-request timeout applied by the HTTP client.
    pub request_timeout: Duration,
    /// Total attempts per URL, including the first one. Must be at least 1.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on every further retry.
    pub backoff_base: Duration,
    /// Upper bound for any single backoff delay.
    pub backoff_cap: Duration,
    /// Maximum number of sitemap documents fetched for one brand.
    pub max_sitemap_nodes: usize,
    /// Number of resolved products between two checkpoint appends.
    pub checkpoint_batch_size: usize,
    pub user_agent: String,
    /// Append-only checkpoint log. `None` disables checkpointing.
    pub checkpoint_path: Option<PathBuf>,
    pub max_concurrent_brands: usize,
    /// Stop resolving a brand once this many product URLs have been handled.
    pub max_products_per_brand: Option<usize>,
    /// Total sitemap + product fetches allowed for one brand.
    pub max_fetches_per_brand: Option<usize>,
    pub jobs_path: PathBuf,
    pub log_level: String,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            request_delay: Duration::from_millis(1_000),
            request_timeout: Duration::from_secs(30),
            max_retries: 3,
            backoff_base: Duration::from_millis(1_000),
            backoff_cap: Duration::from_millis(30_000),
            max_sitemap_nodes: 10_000,
            checkpoint_batch_size: 50,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            checkpoint_path: None,
            max_concurrent_brands: 1,
            max_products_per_brand: None,
            max_fetches_per_brand: None,
            jobs_path: PathBuf::from("./config/brands.yaml"),
            log_level: "info".to_string(),
        }
    }
}

impl CrawlConfig {
    /// Checks the range constraints that the type system cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(ConfigError::Validation(
                "max_retries must allow at least one attempt".to_string(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "request_timeout must be greater than zero".to_string(),
            ));
        }
        if self.backoff_cap < self.backoff_base {
            return Err(ConfigError::Validation(format!(
                "backoff_cap ({}ms) must not be smaller than backoff_base ({}ms)",
                self.backoff_cap.as_millis(),
                self.backoff_base.as_millis()
            )));
        }
        if self.max_sitemap_nodes == 0 {
            return Err(ConfigError::Validation(
                "max_sitemap_nodes must be at least 1".to_string(),
            ));
        }
        if self.checkpoint_batch_size == 0 {
            return Err(ConfigError::Validation(
                "checkpoint_batch_size must be at least 1".to_string(),
            ));
        }
        if self.user_agent.trim().is_empty() {
            return Err(ConfigError::Validation(
                "user_agent must be non-empty".to_string(),
            ));
        }
        if self.max_concurrent_brands == 0 {
            return Err(ConfigError::Validation(
                "max_concurrent_brands must be at least 1".to_string(),
            ));
        }
        if self.max_fetches_per_brand == Some(0) {
            return Err(ConfigError::Validation(
                "max_fetches_per_brand must be at least 1 when set".to_string(),
            ));
        }
        Ok(())
    }
}
