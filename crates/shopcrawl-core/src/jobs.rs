use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// One store to crawl: a brand, its storefront, and the sitemap URLs that
/// seed discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrandJob {
    #[serde(rename = "name")]
    pub brand_name: String,
    pub site_url: String,
    /// Seed sitemap URLs in the order they were supplied, without duplicates.
    #[serde(default, rename = "sitemaps")]
    pub seed_sitemap_urls: Vec<String>,
}

impl BrandJob {
    #[must_use]
    pub fn new<I, S>(brand_name: &str, site_url: &str, seeds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut job = Self {
            brand_name: brand_name.to_string(),
            site_url: site_url.to_string(),
            seed_sitemap_urls: seeds.into_iter().map(Into::into).collect(),
        };
        job.dedup_seeds();
        job
    }

    /// Trims seed URLs, drops blanks, and removes repeats while keeping the
    /// first occurrence in place.
    fn dedup_seeds(&mut self) {
        let mut seen = HashSet::new();
        self.seed_sitemap_urls = std::mem::take(&mut self.seed_sitemap_urls)
            .into_iter()
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty() && seen.insert(url.clone()))
            .collect();
    }
}

#[derive(Debug, Deserialize)]
pub struct JobsFile {
    pub brands: Vec<BrandJob>,
}

/// Load and validate brand jobs from a YAML file.
///
/// ```yaml
/// brands:
///   - name: Cann
///     site_url: https://drinkcann.com
///     sitemaps:
///       - https://drinkcann.com/sitemap.xml
/// ```
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or fails validation.
pub fn load_brand_jobs(path: &Path) -> Result<Vec<BrandJob>, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::JobsFileIo {
        path: path.display().to_string(),
        source: e,
    })?;

    let mut jobs_file: JobsFile = serde_yaml::from_str(&content)?;
    for job in &mut jobs_file.brands {
        job.brand_name = job.brand_name.trim().to_string();
        job.site_url = job.site_url.trim().to_string();
        job.dedup_seeds();
    }

    validate_jobs(&jobs_file.brands)?;

    Ok(jobs_file.brands)
}

// Brand names key both the result mapping and the checkpoint log, so they
// must be unique.
fn validate_jobs(jobs: &[BrandJob]) -> Result<(), ConfigError> {
    let mut seen_names = HashSet::new();

    for job in jobs {
        if job.brand_name.is_empty() {
            return Err(ConfigError::Validation(
                "brand name must be non-empty".to_string(),
            ));
        }

        if !seen_names.insert(job.brand_name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate brand name: '{}'",
                job.brand_name
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
#[path = "jobs_test.rs"]
mod tests;
