//! Append-only checkpoint log and the resume state replayed from it.
//!
//! The log is JSON Lines: one [`CheckpointEntry`] per line, appended and
//! fsynced as each unit of work completes. Product records and errors ride
//! along in the entries, so replaying the log rebuilds every brand's result
//! without refetching anything.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shopcrawl_core::BrandJob;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::CrawlError;
use crate::product::json_endpoint_url;
use crate::types::{BrandResult, BrandState, ErrorEntry, OrderedUrlSet, ProductRecord, Stage};

/// Which unit of work a checkpoint entry completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStage {
    /// All seeds expanded; `processed_urls` are the sitemap URLs visited.
    SitemapsExpanded,
    /// A batch of product URLs resolved.
    ProductBatch,
    /// The final product batch; the brand is done.
    ProductsResolved,
    /// The brand stopped early and will not be retried.
    FailedPartial,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    pub brand_name: String,
    pub stage: CheckpointStage,
    /// Sitemap URLs for `sitemaps_expanded`, product URLs otherwise.
    #[serde(default)]
    pub processed_urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sitemap_urls: Vec<String>,
    /// Product URLs discovered by expansion.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub product_urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub products: Vec<ProductRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ErrorEntry>,
    #[serde(default = "Utc::now")]
    pub recorded_at: DateTime<Utc>,
}

impl CheckpointEntry {
    #[must_use]
    pub fn new(brand_name: impl Into<String>, stage: CheckpointStage) -> Self {
        Self {
            brand_name: brand_name.into(),
            stage,
            processed_urls: Vec::new(),
            sitemap_urls: Vec::new(),
            product_urls: Vec::new(),
            products: Vec::new(),
            errors: Vec::new(),
            recorded_at: Utc::now(),
        }
    }
}

/// Everything known about one brand after replaying its checkpoints.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BrandProgress {
    pub state: BrandState,
    pub sitemap_urls: OrderedUrlSet,
    pub product_urls: OrderedUrlSet,
    /// Product URLs that already have a record or a product-stage error.
    pub resolved: OrderedUrlSet,
    pub products: Vec<ProductRecord>,
    pub errors: Vec<ErrorEntry>,
    seen_errors: HashSet<ErrorEntry>,
}

impl BrandProgress {
    fn advance(&mut self, to: BrandState) {
        if self.state.is_terminal() {
            return;
        }
        if to.is_terminal() || rank(to) > rank(self.state) {
            self.state = to;
        }
    }

    fn record_error(&mut self, error: &ErrorEntry) {
        if self.seen_errors.insert(error.clone()) {
            self.errors.push(error.clone());
        }
    }

    fn apply(&mut self, entry: &CheckpointEntry) {
        self.sitemap_urls.extend(entry.sitemap_urls.iter().cloned());
        self.product_urls.extend(entry.product_urls.iter().cloned());

        if entry.stage == CheckpointStage::SitemapsExpanded {
            self.sitemap_urls.extend(entry.processed_urls.iter().cloned());
        }

        for record in &entry.products {
            self.product_urls.insert(record.source_url.clone());
            if self.resolved.insert(record.source_url.clone()) {
                self.products.push(record.clone());
            }
        }
        for error in &entry.errors {
            if error.stage == Stage::Product {
                self.product_urls.insert(error.url.clone());
                if self.resolved.insert(error.url.clone()) {
                    self.record_error(error);
                }
            } else {
                self.record_error(error);
            }
        }

        if entry.stage != CheckpointStage::SitemapsExpanded {
            // Older logs list resolved URLs without journaling the payload.
            for url in &entry.processed_urls {
                self.product_urls.insert(url.clone());
                if self.resolved.insert(url.clone()) {
                    self.products.push(ProductRecord {
                        source_url: url.clone(),
                        json_endpoint_url: json_endpoint_url(url).unwrap_or_default(),
                        payload: None,
                        fetched_at: entry.recorded_at,
                    });
                }
            }
        }

        self.advance(match entry.stage {
            CheckpointStage::SitemapsExpanded | CheckpointStage::ProductBatch => {
                BrandState::ResolvingProducts
            }
            CheckpointStage::ProductsResolved => BrandState::Done,
            CheckpointStage::FailedPartial => BrandState::FailedPartial,
        });
    }

    /// Rebuilds the brand result recorded so far.
    #[must_use]
    pub fn to_result(&self, job: &BrandJob) -> BrandResult {
        let mut result = BrandResult::new(job);
        result.state = self.state;
        result.sitemap_urls = self.sitemap_urls.clone();
        result.product_urls = self.product_urls.clone();
        result.products = self.products.clone();
        result.errors = self.errors.clone();
        result
    }
}

fn rank(state: BrandState) -> u8 {
    match state {
        BrandState::Pending => 0,
        BrandState::ExpandingSitemaps => 1,
        BrandState::ResolvingProducts => 2,
        BrandState::Done | BrandState::FailedPartial => 3,
    }
}

/// Per-brand progress replayed from a checkpoint log.
///
/// Applying an entry is idempotent: replaying the same log twice, or a log
/// containing duplicate entries, yields the same state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResumeState {
    brands: HashMap<String, BrandProgress>,
}

impl ResumeState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a CheckpointEntry>) -> Self {
        let mut state = Self::new();
        for entry in entries {
            state.apply(entry);
        }
        state
    }

    pub fn apply(&mut self, entry: &CheckpointEntry) {
        self.brands
            .entry(entry.brand_name.clone())
            .or_default()
            .apply(entry);
    }

    #[must_use]
    pub fn brand(&self, brand_name: &str) -> Option<&BrandProgress> {
        self.brands.get(brand_name)
    }

    /// State of `brand_name`; `Pending` if the log never mentions it.
    #[must_use]
    pub fn state_of(&self, brand_name: &str) -> BrandState {
        self.brand(brand_name)
            .map_or(BrandState::Pending, |progress| progress.state)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.brands.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.brands.is_empty()
    }
}

/// Durable, append-only checkpoint log.
pub struct ProgressStore {
    path: PathBuf,
    file: Mutex<tokio::fs::File>,
}

impl std::fmt::Debug for ProgressStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl ProgressStore {
    /// Opens (or creates) the log at `path` and replays it.
    ///
    /// Lines that do not decode, such as a final line cut short by a crash,
    /// are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError::CheckpointIo`] if the file cannot be read,
    /// created, or opened for appending.
    pub async fn open(path: impl Into<PathBuf>) -> Result<(Self, ResumeState), CrawlError> {
        let path = path.into();
        let io_err = |source: std::io::Error| CrawlError::CheckpointIo {
            path: path.display().to_string(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let existing = match tokio::fs::read(&path).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(io_err(e)),
        };
        let entries = decode_entries(&path, &existing);
        let resume = ResumeState::from_entries(&entries);

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(io_err)?;

        // Keep the next entry off the tail of a torn line.
        if !existing.is_empty() && !existing.ends_with('\n') {
            file.write_all(b"\n").await.map_err(io_err)?;
            file.flush().await.map_err(io_err)?;
        }

        tracing::info!(
            path = %path.display(),
            entries = entries.len(),
            brands = resume.len(),
            "checkpoint log opened"
        );

        Ok((
            Self {
                path,
                file: Mutex::new(file),
            },
            resume,
        ))
    }

    /// Reads and decodes every entry in the log at `path` without opening
    /// it for writing. A missing file has no entries.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError::CheckpointIo`] if the file exists but cannot be read.
    pub async fn read_entries(path: &Path) -> Result<Vec<CheckpointEntry>, CrawlError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(decode_entries(path, &String::from_utf8_lossy(&bytes))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(source) => Err(CrawlError::CheckpointIo {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `entry` and syncs it to disk before returning.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError::CheckpointEncode`] if the entry cannot be
    /// serialized and [`CrawlError::CheckpointIo`] if the write or sync fails.
    pub async fn append(&self, entry: &CheckpointEntry) -> Result<(), CrawlError> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let io_err = |source: std::io::Error| CrawlError::CheckpointIo {
            path: self.path.display().to_string(),
            source,
        };
        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await.map_err(io_err)?;
        file.flush().await.map_err(io_err)?;
        file.sync_data().await.map_err(io_err)?;

        tracing::debug!(
            brand = %entry.brand_name,
            stage = ?entry.stage,
            processed = entry.processed_urls.len(),
            "checkpoint written"
        );
        Ok(())
    }
}

fn decode_entries(path: &Path, contents: &str) -> Vec<CheckpointEntry> {
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(idx, line)| match serde_json::from_str(line) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    line = idx + 1,
                    error = %e,
                    "skipping unreadable checkpoint line"
                );
                None
            }
        })
        .collect()
}

#[cfg(test)]
#[path = "progress_test.rs"]
mod tests;
