//! Drives brands through expansion and product resolution.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use shopcrawl_core::{BrandJob, CrawlConfig};

use crate::error::CrawlError;
use crate::fetcher::PoliteFetcher;
use crate::product::ProductResolver;
use crate::progress::{CheckpointEntry, CheckpointStage, ProgressStore, ResumeState};
use crate::sitemap::{ProductUrlFilter, ShopifyProductFilter, SitemapExpander};
use crate::types::{
    BrandResult, BrandState, ErrorEntry, ErrorKind, FetchBudget, ProductRecord, Stage,
};

/// Log a progress line every this many resolved products.
const PROGRESS_LOG_INTERVAL: usize = 50;

/// Cooperative cancellation flag, checked between products and between brands.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Products and errors produced since the last checkpoint.
#[derive(Debug, Default)]
struct PendingBatch {
    urls: Vec<String>,
    products: Vec<ProductRecord>,
    errors: Vec<ErrorEntry>,
}

impl PendingBatch {
    fn len(&self) -> usize {
        self.urls.len()
    }

    fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    fn into_entry(self, brand_name: &str, stage: CheckpointStage) -> CheckpointEntry {
        let mut entry = CheckpointEntry::new(brand_name, stage);
        entry.processed_urls = self.urls;
        entry.products = self.products;
        entry.errors = self.errors;
        entry
    }
}

/// Runs a batch of brand jobs against one shared [`PoliteFetcher`].
///
/// Brands already `DONE` or `FAILED_PARTIAL` in the resume state are returned
/// from the checkpoint log without any network traffic; partially processed
/// brands continue where they stopped.
pub struct CrawlOrchestrator {
    config: CrawlConfig,
    fetcher: PoliteFetcher,
    filter: Box<dyn ProductUrlFilter>,
    store: Option<ProgressStore>,
    resume: ResumeState,
    shutdown: ShutdownHandle,
}

impl CrawlOrchestrator {
    /// Builds an orchestrator without checkpointing.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError`] if the configuration is invalid or the HTTP
    /// client cannot be built.
    pub fn new(config: CrawlConfig) -> Result<Self, CrawlError> {
        let fetcher = PoliteFetcher::new(&config)?;
        Ok(Self {
            config,
            fetcher,
            filter: Box::new(ShopifyProductFilter),
            store: None,
            resume: ResumeState::new(),
            shutdown: ShutdownHandle::default(),
        })
    }

    /// Builds an orchestrator and, if `checkpoint_path` is configured, opens
    /// and replays the checkpoint log there.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError`] for invalid configuration or an unreadable log.
    pub async fn from_config(config: CrawlConfig) -> Result<Self, CrawlError> {
        let checkpoint_path = config.checkpoint_path.clone();
        let orchestrator = Self::new(config)?;
        match checkpoint_path {
            Some(path) => {
                let (store, resume) = ProgressStore::open(path).await?;
                Ok(orchestrator.with_progress_store(store, resume))
            }
            None => Ok(orchestrator),
        }
    }

    #[must_use]
    pub fn with_progress_store(mut self, store: ProgressStore, resume: ResumeState) -> Self {
        self.store = Some(store);
        self.resume = resume;
        self
    }

    /// Replaces the default Shopify product predicate.
    #[must_use]
    pub fn with_filter(mut self, filter: impl ProductUrlFilter + 'static) -> Self {
        self.filter = Box::new(filter);
        self
    }

    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    #[must_use]
    pub fn fetcher(&self) -> &PoliteFetcher {
        &self.fetcher
    }

    /// Crawls every job and returns one result per job, in input order.
    ///
    /// Up to `max_concurrent_brands` brands run at once; per-origin spacing
    /// still applies across them. After shutdown is requested, brands not yet
    /// started come back in the state the checkpoint log left them in.
    ///
    /// # Errors
    ///
    /// Only checkpoint I/O failures are fatal. Network and data problems are
    /// recorded on the affected brand's result.
    pub async fn run(&self, jobs: &[BrandJob]) -> Result<Vec<BrandResult>, CrawlError> {
        tracing::info!(
            brands = jobs.len(),
            max_concurrent = self.config.max_concurrent_brands,
            resumed = self.resume.len(),
            "crawl starting"
        );

        let mut outcomes: Vec<(usize, Result<BrandResult, CrawlError>)> =
            stream::iter(jobs.iter().enumerate())
                .map(|(index, job)| async move { (index, self.crawl_brand(job).await) })
                .buffer_unordered(self.config.max_concurrent_brands.max(1))
                .collect()
                .await;
        outcomes.sort_by_key(|(index, _)| *index);

        let results = outcomes
            .into_iter()
            .map(|(_, outcome)| outcome)
            .collect::<Result<Vec<_>, _>>()?;

        tracing::info!(
            done = results.iter().filter(|r| r.state == BrandState::Done).count(),
            failed = results
                .iter()
                .filter(|r| r.state == BrandState::FailedPartial)
                .count(),
            products = results.iter().map(|r| r.products.len()).sum::<usize>(),
            requests = self.fetcher.requests_sent(),
            "crawl finished"
        );
        Ok(results)
    }

    async fn crawl_brand(&self, job: &BrandJob) -> Result<BrandResult, CrawlError> {
        let mut result = self
            .resume
            .brand(&job.brand_name)
            .map_or_else(|| BrandResult::new(job), |progress| progress.to_result(job));

        if result.state.is_terminal() {
            tracing::info!(
                brand = %job.brand_name,
                state = %result.state,
                products = result.products.len(),
                "brand already finished in checkpoint log — skipping"
            );
            return Ok(result);
        }
        if self.shutdown.is_requested() {
            tracing::info!(brand = %job.brand_name, "shutdown requested — brand not started");
            return Ok(result);
        }

        let mut budget = FetchBudget::new(self.config.max_fetches_per_brand);

        if matches!(
            result.state,
            BrandState::Pending | BrandState::ExpandingSitemaps
        ) && !self.expand_sitemaps(job, &mut result, &mut budget).await?
        {
            return Ok(result);
        }

        self.resolve_products(&mut result, &mut budget).await?;
        Ok(result)
    }

    /// Returns `false` when the brand ended in `FAILED_PARTIAL`.
    async fn expand_sitemaps(
        &self,
        job: &BrandJob,
        result: &mut BrandResult,
        budget: &mut FetchBudget,
    ) -> Result<bool, CrawlError> {
        result.state = BrandState::ExpandingSitemaps;

        if job.seed_sitemap_urls.is_empty() {
            tracing::error!(brand = %job.brand_name, "no seed sitemaps configured");
            let error = ErrorEntry::new(
                &job.site_url,
                Stage::Sitemap,
                ErrorKind::NoSeedSitemaps,
                "brand has no seed sitemap URLs",
                0,
            );
            let mut entry = CheckpointEntry::new(&job.brand_name, CheckpointStage::FailedPartial);
            entry.errors.push(error.clone());
            result.errors.push(error);
            result.state = BrandState::FailedPartial;
            self.checkpoint(&entry).await?;
            return Ok(false);
        }

        tracing::info!(
            brand = %job.brand_name,
            seeds = job.seed_sitemap_urls.len(),
            "expanding sitemaps"
        );
        let expander = SitemapExpander::new(
            &self.fetcher,
            self.filter.as_ref(),
            self.config.max_sitemap_nodes,
        );
        let expansion = expander.expand(&job.seed_sitemap_urls, budget).await;

        result
            .sitemap_urls
            .extend(expansion.sitemap_urls.iter().cloned());
        result
            .product_urls
            .extend(expansion.product_urls.iter().cloned());
        result.errors.extend(expansion.errors.iter().cloned());

        if let Some(terminal) = expansion.terminal {
            tracing::error!(
                brand = %job.brand_name,
                kind = ?terminal.error_kind,
                sitemaps = expansion.sitemap_urls.len(),
                "sitemap expansion stopped early"
            );
            let mut entry = CheckpointEntry::new(&job.brand_name, CheckpointStage::FailedPartial);
            entry.sitemap_urls = expansion.sitemap_urls.into();
            entry.product_urls = expansion.product_urls.into();
            entry.errors = expansion.errors;
            entry.errors.push(terminal.clone());
            result.errors.push(terminal);
            result.state = BrandState::FailedPartial;
            self.checkpoint(&entry).await?;
            return Ok(false);
        }

        tracing::info!(
            brand = %job.brand_name,
            sitemaps = expansion.sitemap_urls.len(),
            products = expansion.product_urls.len(),
            errors = expansion.errors.len(),
            "sitemaps expanded"
        );
        let mut entry = CheckpointEntry::new(&job.brand_name, CheckpointStage::SitemapsExpanded);
        entry.processed_urls = expansion.sitemap_urls.into();
        entry.product_urls = expansion.product_urls.into();
        entry.errors = expansion.errors;
        self.checkpoint(&entry).await?;
        result.state = BrandState::ResolvingProducts;
        Ok(true)
    }

    async fn resolve_products(
        &self,
        result: &mut BrandResult,
        budget: &mut FetchBudget,
    ) -> Result<(), CrawlError> {
        let brand = result.brand_name.clone();
        let resolved: HashSet<&str> = result
            .products
            .iter()
            .map(|p| p.source_url.as_str())
            .chain(result.product_errors().map(|e| e.url.as_str()))
            .collect();
        let pending: Vec<String> = result
            .product_urls
            .iter()
            .filter(|url| !resolved.contains(url.as_str()))
            .cloned()
            .collect();

        let total = result.product_urls.len();
        tracing::info!(
            brand = %brand,
            total,
            remaining = pending.len(),
            "resolving products"
        );

        let resolver = ProductResolver::new(&self.fetcher);
        let batch_size = self.config.checkpoint_batch_size.max(1);
        let mut batch = PendingBatch::default();

        for url in pending {
            if self.shutdown.is_requested() {
                tracing::info!(brand = %brand, "shutdown requested — pausing product resolution");
                self.flush(&brand, CheckpointStage::ProductBatch, std::mem::take(&mut batch))
                    .await?;
                return Ok(());
            }
            if let Some(cap) = self.config.max_products_per_brand {
                if result.resolved_count() >= cap {
                    tracing::info!(brand = %brand, cap, "max products per brand reached");
                    break;
                }
            }
            if !budget.try_spend() {
                tracing::error!(brand = %brand, url = %url, "fetch budget exhausted");
                let error = budget.exhausted_entry(&url, Stage::Product);
                result.errors.push(error.clone());
                batch.errors.push(error);
                batch.urls.push(url);
                result.state = BrandState::FailedPartial;
                self.flush(&brand, CheckpointStage::FailedPartial, batch)
                    .await?;
                return Ok(());
            }

            match resolver.resolve(&url).await {
                Ok(record) => {
                    result.products.push(record.clone());
                    batch.products.push(record);
                }
                Err(error) => {
                    tracing::warn!(
                        brand = %brand,
                        url = %url,
                        kind = ?error.error_kind,
                        "product could not be resolved"
                    );
                    result.errors.push(error.clone());
                    batch.errors.push(error);
                }
            }
            batch.urls.push(url);

            let done = result.resolved_count();
            if done == 1 || done == total || done % PROGRESS_LOG_INTERVAL == 0 {
                tracing::info!(brand = %brand, done, total, "product progress");
            }
            if batch.len() >= batch_size {
                self.flush(&brand, CheckpointStage::ProductBatch, std::mem::take(&mut batch))
                    .await?;
            }
        }

        self.flush(&brand, CheckpointStage::ProductsResolved, batch)
            .await?;
        result.state = BrandState::Done;
        tracing::info!(
            brand = %brand,
            products = result.products.len(),
            errors = result.errors.len(),
            "brand done"
        );
        Ok(())
    }

    /// Writes `batch` as a checkpoint. Empty intermediate batches are skipped;
    /// terminal stages are always written.
    async fn flush(
        &self,
        brand_name: &str,
        stage: CheckpointStage,
        batch: PendingBatch,
    ) -> Result<(), CrawlError> {
        if stage == CheckpointStage::ProductBatch && batch.is_empty() {
            return Ok(());
        }
        self.checkpoint(&batch.into_entry(brand_name, stage)).await
    }

    async fn checkpoint(&self, entry: &CheckpointEntry) -> Result<(), CrawlError> {
        match &self.store {
            Some(store) => store.append(entry).await,
            None => Ok(()),
        }
    }
}
