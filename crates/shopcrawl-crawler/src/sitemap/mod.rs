//! Breadth-first expansion of a brand's seed sitemaps into product URLs.

pub mod filter;
pub mod parse;

use std::collections::{HashSet, VecDeque};

use reqwest::Url;

use crate::fetcher::PoliteFetcher;
use crate::product::canonical_product_url;
use crate::types::{ErrorEntry, ErrorKind, FetchBudget, OrderedUrlSet, Stage};

pub use filter::{ProductUrlFilter, RegexProductFilter, ShopifyProductFilter};
pub use parse::{parse_sitemap, SitemapDocument, SitemapKind};

/// Outcome of expanding one brand's seeds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Expansion {
    /// Every sitemap URL fetched (or attempted), in visit order.
    pub sitemap_urls: OrderedUrlSet,
    /// Canonical product URLs in discovery order.
    pub product_urls: OrderedUrlSet,
    /// Per-sitemap failures that did not stop the walk.
    pub errors: Vec<ErrorEntry>,
    /// Set when expansion stopped early; the brand cannot complete.
    pub terminal: Option<ErrorEntry>,
}

/// Walks sitemap indexes down to their urlsets.
///
/// Each sitemap URL is fetched at most once per expansion, so
/// self-references and cycles between indexes terminate. A failed or
/// unparseable sitemap is recorded and skipped; its siblings are still
/// visited.
pub struct SitemapExpander<'a> {
    fetcher: &'a PoliteFetcher,
    filter: &'a dyn ProductUrlFilter,
    max_nodes: usize,
}

impl<'a> SitemapExpander<'a> {
    #[must_use]
    pub fn new(
        fetcher: &'a PoliteFetcher,
        filter: &'a dyn ProductUrlFilter,
        max_nodes: usize,
    ) -> Self {
        Self {
            fetcher,
            filter,
            max_nodes,
        }
    }

    /// Expands `seeds`, spending one unit of `budget` per sitemap fetched.
    ///
    /// Stops with [`Expansion::terminal`] set when more than `max_nodes`
    /// sitemaps would be visited or the budget runs out.
    pub async fn expand(&self, seeds: &[String], budget: &mut FetchBudget) -> Expansion {
        let mut expansion = Expansion::default();
        let mut queued: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();

        for seed in seeds {
            let seed = normalize_sitemap_url(seed);
            if queued.insert(seed.clone()) {
                queue.push_back(seed);
            }
        }

        let mut visited_nodes = 0usize;
        while let Some(url) = queue.pop_front() {
            if visited_nodes >= self.max_nodes {
                tracing::warn!(
                    url = %url,
                    max_nodes = self.max_nodes,
                    "sitemap node limit reached — abandoning expansion"
                );
                expansion.terminal = Some(ErrorEntry::new(
                    url,
                    Stage::Sitemap,
                    ErrorKind::SitemapNodeLimitExceeded,
                    format!(
                        "more than {} sitemap documents reachable from the seeds",
                        self.max_nodes
                    ),
                    0,
                ));
                break;
            }
            if !budget.try_spend() {
                tracing::warn!(url = %url, "fetch budget exhausted during sitemap expansion");
                expansion.terminal = Some(budget.exhausted_entry(&url, Stage::Sitemap));
                break;
            }
            visited_nodes += 1;
            expansion.sitemap_urls.insert(url.clone());

            let fetched = match self.fetcher.get(&url).await {
                Ok(fetched) => fetched,
                Err(failure) => {
                    tracing::warn!(url = %url, error = %failure, "sitemap fetch failed");
                    expansion
                        .errors
                        .push(ErrorEntry::from_fetch(&url, Stage::Sitemap, &failure));
                    continue;
                }
            };

            let document = match parse_sitemap(&fetched.body) {
                Ok(document) => document,
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "sitemap body could not be parsed");
                    expansion.errors.push(ErrorEntry::new(
                        &url,
                        Stage::Sitemap,
                        ErrorKind::SitemapParseError,
                        e.to_string(),
                        fetched.attempts,
                    ));
                    continue;
                }
            };

            let base = Url::parse(&url).ok();
            match document {
                SitemapDocument::Index(children) => {
                    let mut followed = 0usize;
                    for child in resolve_all(base.as_ref(), &children) {
                        if !self.filter.follows_sitemap(&child) {
                            continue;
                        }
                        let child = child.to_string();
                        if queued.insert(child.clone()) {
                            queue.push_back(child);
                            followed += 1;
                        }
                    }
                    tracing::debug!(url = %url, children = children.len(), followed, "sitemap index");
                }
                SitemapDocument::UrlSet(locations) => {
                    let before = expansion.product_urls.len();
                    for page in resolve_all(base.as_ref(), &locations) {
                        if !self.filter.is_product_url(&page) {
                            continue;
                        }
                        if let Some(canonical) = canonical_product_url(page.as_str()) {
                            expansion.product_urls.insert(canonical);
                        }
                    }
                    tracing::debug!(
                        url = %url,
                        entries = locations.len(),
                        new_products = expansion.product_urls.len() - before,
                        "sitemap urlset"
                    );
                }
            }
        }

        expansion
    }
}

/// Parses a seed so that `https://a.example` and `https://a.example/` are
/// visited once. Unparseable seeds are kept verbatim and fail at fetch time.
fn normalize_sitemap_url(raw: &str) -> String {
    let trimmed = raw.trim();
    Url::parse(trimmed).map_or_else(|_| trimmed.to_owned(), |url| url.to_string())
}

/// Resolves `<loc>` values against the sitemap they came from. Entries that
/// cannot be resolved are dropped.
fn resolve_all(base: Option<&Url>, locations: &[String]) -> Vec<Url> {
    locations
        .iter()
        .filter_map(|loc| match base {
            Some(base) => base.join(loc).ok(),
            None => Url::parse(loc).ok(),
        })
        .collect()
}
