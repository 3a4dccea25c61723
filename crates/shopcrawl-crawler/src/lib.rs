pub mod error;
pub mod fetcher;
pub mod orchestrator;
pub mod product;
pub mod progress;
pub mod rate_limit;
pub mod sitemap;
pub mod types;

pub use error::{CrawlError, FetchError, FetchFailure, SitemapParseError};
pub use fetcher::{extract_origin, FetchedBody, PoliteFetcher, MAX_RETRY_AFTER_SECS};
pub use orchestrator::{CrawlOrchestrator, ShutdownHandle};
pub use product::{canonical_product_url, json_endpoint_url, ProductResolver};
pub use progress::{BrandProgress, CheckpointEntry, CheckpointStage, ProgressStore, ResumeState};
pub use rate_limit::BackoffPolicy;
pub use sitemap::{
    parse_sitemap, Expansion, ProductUrlFilter, RegexProductFilter, ShopifyProductFilter,
    SitemapDocument, SitemapExpander, SitemapKind,
};
pub use types::{
    BrandResult, BrandState, ErrorEntry, ErrorKind, FetchBudget, OrderedUrlSet, ProductRecord,
    Stage,
};
