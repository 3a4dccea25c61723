use std::path::PathBuf;
use std::time::Duration;

use crate::crawl_config::{CrawlConfig, DEFAULT_USER_AGENT};
use crate::ConfigError;

/// Load crawl configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if a value cannot be parsed or fails validation.
pub fn load_crawl_config() -> Result<CrawlConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_crawl_config_from_env()
}

/// Load crawl configuration from environment variables already in the process.
///
/// Unlike [`load_crawl_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if a value cannot be parsed or fails validation.
pub fn load_crawl_config_from_env() -> Result<CrawlConfig, ConfigError> {
    build_crawl_config(|key| std::env::var(key))
}

/// Build crawl configuration using the provided env-var lookup function.
///
/// Every variable is optional; unset variables fall back to the defaults of
/// [`CrawlConfig::default`]. Parsing is strict: a negative or non-numeric
/// value is rejected here rather than surfacing mid-crawl.
fn build_crawl_config<F>(lookup: F) -> Result<CrawlConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    let defaults = CrawlConfig::default();

    let parse_u64 = |var: &str| -> Result<Option<u64>, ConfigError> {
        match lookup(var) {
            Ok(raw) => raw
                .trim()
                .parse::<u64>()
                .map(Some)
                .map_err(|e| ConfigError::InvalidEnvVar {
                    var: var.to_string(),
                    reason: e.to_string(),
                }),
            Err(_) => Ok(None),
        }
    };

    let parse_u32 = |var: &str| -> Result<Option<u32>, ConfigError> {
        match lookup(var) {
            Ok(raw) => raw
                .trim()
                .parse::<u32>()
                .map(Some)
                .map_err(|e| ConfigError::InvalidEnvVar {
                    var: var.to_string(),
                    reason: e.to_string(),
                }),
            Err(_) => Ok(None),
        }
    };

    let parse_usize = |var: &str| -> Result<Option<usize>, ConfigError> {
        match lookup(var) {
            Ok(raw) => raw
                .trim()
                .parse::<usize>()
                .map(Some)
                .map_err(|e| ConfigError::InvalidEnvVar {
                    var: var.to_string(),
                    reason: e.to_string(),
                }),
            Err(_) => Ok(None),
        }
    };

    let request_delay = parse_u64("SHOPCRAWL_REQUEST_DELAY_MS")?
        .map_or(defaults.request_delay, Duration::from_millis);
    let request_timeout = parse_u64("SHOPCRAWL_REQUEST_TIMEOUT_SECS")?
        .map_or(defaults.request_timeout, Duration::from_secs);
    let max_retries = parse_u32("SHOPCRAWL_MAX_RETRIES")?.unwrap_or(defaults.max_retries);
    let backoff_base = parse_u64("SHOPCRAWL_BACKOFF_BASE_MS")?
        .map_or(defaults.backoff_base, Duration::from_millis);
    let backoff_cap = parse_u64("SHOPCRAWL_BACKOFF_CAP_MS")?
        .map_or(defaults.backoff_cap, Duration::from_millis);
    let max_sitemap_nodes =
        parse_usize("SHOPCRAWL_MAX_SITEMAP_NODES")?.unwrap_or(defaults.max_sitemap_nodes);
    let checkpoint_batch_size = parse_usize("SHOPCRAWL_CHECKPOINT_BATCH_SIZE")?
        .unwrap_or(defaults.checkpoint_batch_size);
    let max_concurrent_brands = parse_usize("SHOPCRAWL_MAX_CONCURRENT_BRANDS")?
        .unwrap_or(defaults.max_concurrent_brands);
    let max_products_per_brand = parse_usize("SHOPCRAWL_MAX_PRODUCTS_PER_BRAND")?;
    let max_fetches_per_brand = parse_usize("SHOPCRAWL_MAX_FETCHES_PER_BRAND")?;

    let user_agent =
        lookup("SHOPCRAWL_USER_AGENT").unwrap_or_else(|_| DEFAULT_USER_AGENT.to_string());
    let checkpoint_path = lookup("SHOPCRAWL_CHECKPOINT_PATH")
        .ok()
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from);
    let jobs_path = lookup("SHOPCRAWL_JOBS_PATH").map_or(defaults.jobs_path, PathBuf::from);
    let log_level = lookup("SHOPCRAWL_LOG_LEVEL").unwrap_or(defaults.log_level);

    let config = CrawlConfig {
        request_delay,
        request_timeout,
        max_retries,
        backoff_base,
        backoff_cap,
        max_sitemap_nodes,
        checkpoint_batch_size,
        user_agent,
        checkpoint_path,
        max_concurrent_brands,
        max_products_per_brand,
        max_fetches_per_brand,
        jobs_path,
        log_level,
    };
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
