//! Result and error records produced by a crawl.
//!
//! Everything here is `Serialize`: brand results are handed to an external
//! writer, and products/errors are also embedded in checkpoint entries so a
//! resumed run can rebuild the same results without refetching.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shopcrawl_core::BrandJob;

use crate::error::FetchFailure;

/// Pipeline stage an error was recorded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Sitemap,
    Product,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    FetchTimeout,
    /// Non-retriable HTTP status or malformed URL.
    FetchHttpError,
    FetchExhaustedRetries,
    /// The brand used up `max_fetches_per_brand`.
    FetchBudgetExhausted,
    SitemapParseError,
    SitemapNodeLimitExceeded,
    NoSeedSitemaps,
    ProductJsonInvalid,
    ProductFieldsMissing,
}

impl ErrorKind {
    /// Kinds that end a brand in [`BrandState::FailedPartial`] instead of
    /// being recovered locally.
    #[must_use]
    pub fn is_brand_fatal(self) -> bool {
        matches!(
            self,
            ErrorKind::SitemapNodeLimitExceeded
                | ErrorKind::FetchBudgetExhausted
                | ErrorKind::NoSeedSitemaps
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub url: String,
    pub stage: Stage,
    pub error_kind: ErrorKind,
    pub message: String,
    pub attempt_count: u32,
}

impl ErrorEntry {
    #[must_use]
    pub fn new(
        url: impl Into<String>,
        stage: Stage,
        error_kind: ErrorKind,
        message: impl Into<String>,
        attempt_count: u32,
    ) -> Self {
        Self {
            url: url.into(),
            stage,
            error_kind,
            message: message.into(),
            attempt_count,
        }
    }

    pub(crate) fn from_fetch(url: &str, stage: Stage, failure: &FetchFailure) -> Self {
        Self::new(
            url,
            stage,
            failure.kind(),
            failure.to_string(),
            failure.attempts,
        )
    }
}

/// A resolved product: its page URL, the JSON endpoint it was read from, and
/// the validated payload.
///
/// `payload` is `None` only for records rebuilt from a checkpoint log that
/// predates payload journaling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub source_url: String,
    pub json_endpoint_url: String,
    pub payload: Option<serde_json::Value>,
    pub fetched_at: DateTime<Utc>,
}

/// Per-brand lifecycle. `FailedPartial` is absorbing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BrandState {
    #[default]
    Pending,
    ExpandingSitemaps,
    ResolvingProducts,
    Done,
    FailedPartial,
}

impl BrandState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, BrandState::Done | BrandState::FailedPartial)
    }
}

impl std::fmt::Display for BrandState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrandState::Pending => write!(f, "pending"),
            BrandState::ExpandingSitemaps => write!(f, "expanding_sitemaps"),
            BrandState::ResolvingProducts => write!(f, "resolving_products"),
            BrandState::Done => write!(f, "done"),
            BrandState::FailedPartial => write!(f, "failed_partial"),
        }
    }
}

/// Insertion-ordered set of URLs. Serializes as a plain JSON array.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct OrderedUrlSet {
    items: Vec<String>,
    index: HashSet<String>,
}

impl OrderedUrlSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `url` unless it is already present. Returns `true` if it was added.
    pub fn insert(&mut self, url: impl Into<String>) -> bool {
        let url = url.into();
        if self.index.contains(&url) {
            return false;
        }
        self.index.insert(url.clone());
        self.items.push(url);
        true
    }

    #[must_use]
    pub fn contains(&self, url: &str) -> bool {
        self.index.contains(url)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.items.iter()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.items
    }
}

impl From<Vec<String>> for OrderedUrlSet {
    fn from(urls: Vec<String>) -> Self {
        let mut set = Self::new();
        set.extend(urls);
        set
    }
}

impl From<OrderedUrlSet> for Vec<String> {
    fn from(set: OrderedUrlSet) -> Self {
        set.items
    }
}

impl<S: Into<String>> Extend<S> for OrderedUrlSet {
    fn extend<T: IntoIterator<Item = S>>(&mut self, iter: T) {
        for url in iter {
            self.insert(url);
        }
    }
}

impl<'a> IntoIterator for &'a OrderedUrlSet {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Per-brand cap on HTTP fetches issued during one run.
///
/// Retries inside the fetcher count as a single fetch here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchBudget {
    limit: Option<usize>,
    used: usize,
}

impl FetchBudget {
    #[must_use]
    pub fn new(limit: Option<usize>) -> Self {
        Self { limit, used: 0 }
    }

    #[must_use]
    pub fn unlimited() -> Self {
        Self::new(None)
    }

    /// Claims one fetch. Returns `false` once the limit is reached.
    pub fn try_spend(&mut self) -> bool {
        if self.limit.is_some_and(|limit| self.used >= limit) {
            return false;
        }
        self.used += 1;
        true
    }

    #[must_use]
    pub fn used(&self) -> usize {
        self.used
    }

    pub(crate) fn exhausted_entry(&self, url: &str, stage: Stage) -> ErrorEntry {
        ErrorEntry::new(
            url,
            stage,
            ErrorKind::FetchBudgetExhausted,
            format!(
                "fetch budget of {} request(s) exhausted before {url}",
                self.limit.unwrap_or(self.used)
            ),
            0,
        )
    }
}

/// Everything collected for one brand. Fields only ever grow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrandResult {
    pub brand_name: String,
    pub site_url: String,
    pub state: BrandState,
    pub sitemap_urls: OrderedUrlSet,
    pub product_urls: OrderedUrlSet,
    pub products: Vec<ProductRecord>,
    pub errors: Vec<ErrorEntry>,
}

impl BrandResult {
    #[must_use]
    pub fn new(job: &BrandJob) -> Self {
        Self {
            brand_name: job.brand_name.clone(),
            site_url: job.site_url.clone(),
            state: BrandState::Pending,
            sitemap_urls: OrderedUrlSet::new(),
            product_urls: OrderedUrlSet::new(),
            products: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Errors recorded while resolving product URLs.
    pub fn product_errors(&self) -> impl Iterator<Item = &ErrorEntry> {
        self.errors.iter().filter(|e| e.stage == Stage::Product)
    }

    /// Number of product URLs that have a record or a product-stage error.
    #[must_use]
    pub fn resolved_count(&self) -> usize {
        self.products.len() + self.product_errors().count()
    }
}
