//! Pluggable predicates deciding which sitemap entries are products.

use regex::Regex;
use reqwest::Url;

/// Classifies URLs found while walking a brand's sitemaps.
///
/// `is_product_url` is applied to every `<loc>` of a `<urlset>`;
/// `follows_sitemap` to every child of a `<sitemapindex>`. Seeds are always
/// fetched.
pub trait ProductUrlFilter: Send + Sync {
    fn is_product_url(&self, url: &Url) -> bool;

    fn follows_sitemap(&self, _url: &Url) -> bool {
        true
    }
}

/// Shopify-style storefronts: a `products` path segment followed by a handle.
///
/// Matches `/products/sleep-well` and `/collections/all/products/sleep-well`,
/// but not `/products` or `/products/`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShopifyProductFilter;

impl ProductUrlFilter for ShopifyProductFilter {
    fn is_product_url(&self, url: &Url) -> bool {
        let Some(segments) = url.path_segments() else {
            return false;
        };
        let mut segments = segments.skip_while(|s| *s != "products");
        segments.next().is_some() && segments.next().is_some_and(|handle| !handle.is_empty())
    }
}

/// Regex-driven filter for storefronts that do not use Shopify paths.
///
/// The product pattern is matched against the URL path; the optional
/// sitemap pattern against the full child-sitemap URL.
#[derive(Debug, Clone)]
pub struct RegexProductFilter {
    product: Regex,
    sitemap: Option<Regex>,
}

impl RegexProductFilter {
    /// # Errors
    ///
    /// Returns [`regex::Error`] if `product_pattern` does not compile.
    pub fn new(product_pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            product: Regex::new(product_pattern)?,
            sitemap: None,
        })
    }

    /// Only follow child sitemaps whose URL matches `pattern`.
    ///
    /// # Errors
    ///
    /// Returns [`regex::Error`] if `pattern` does not compile.
    pub fn with_sitemap_pattern(mut self, pattern: &str) -> Result<Self, regex::Error> {
        self.sitemap = Some(Regex::new(pattern)?);
        Ok(self)
    }
}

impl ProductUrlFilter for RegexProductFilter {
    fn is_product_url(&self, url: &Url) -> bool {
        self.product.is_match(url.path())
    }

    fn follows_sitemap(&self, url: &Url) -> bool {
        match &self.sitemap {
            Some(pattern) => pattern.is_match(url.as_str()),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    #[test]
    fn shopify_filter_accepts_product_handles() {
        let filter = ShopifyProductFilter;
        assert!(filter.is_product_url(&url("https://shop.example/products/sleep-well")));
        assert!(filter.is_product_url(&url(
            "https://shop.example/collections/all/products/sleep-well?variant=1"
        )));
        assert!(filter.is_product_url(&url("https://shop.example/en-ca/products/x/")));
    }

    #[test]
    fn shopify_filter_rejects_non_products() {
        let filter = ShopifyProductFilter;
        assert!(!filter.is_product_url(&url("https://shop.example/")));
        assert!(!filter.is_product_url(&url("https://shop.example/products")));
        assert!(!filter.is_product_url(&url("https://shop.example/products/")));
        assert!(!filter.is_product_url(&url("https://shop.example/pages/about")));
        assert!(!filter.is_product_url(&url("https://shop.example/collections/drinks")));
    }

    #[test]
    fn shopify_filter_follows_every_child_sitemap() {
        assert!(ShopifyProductFilter.follows_sitemap(&url("https://shop.example/sitemap_blogs_1.xml")));
    }

    #[test]
    fn regex_filter_matches_path_only() {
        let filter = RegexProductFilter::new(r"^/shop/[a-z0-9-]+$").unwrap();
        assert!(filter.is_product_url(&url("https://shop.example/shop/calm-berry?ref=x")));
        assert!(!filter.is_product_url(&url("https://shop.example/blog/calm-berry")));
    }

    #[test]
    fn regex_filter_restricts_child_sitemaps() {
        let filter = RegexProductFilter::new("/item/")
            .unwrap()
            .with_sitemap_pattern("product")
            .unwrap();
        assert!(filter.follows_sitemap(&url("https://shop.example/product-sitemap.xml")));
        assert!(!filter.follows_sitemap(&url("https://shop.example/post-sitemap.xml")));
    }

    #[test]
    fn regex_filter_rejects_bad_pattern() {
        assert!(RegexProductFilter::new("(unclosed").is_err());
    }
}
