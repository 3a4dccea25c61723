//! Product page → JSON endpoint resolution.
//!
//! Shopify serves every product page as JSON at `/products/{handle}.json`.
//! The resolver derives that endpoint, fetches it, and keeps the document
//! only if it names a product id and title.

use chrono::Utc;
use reqwest::Url;
use serde_json::Value;

use crate::error::FetchError;
use crate::fetcher::PoliteFetcher;
use crate::types::{ErrorEntry, ErrorKind, ProductRecord, Stage};

/// Canonical form used to dedupe product URLs.
///
/// Drops the query string, fragment and trailing slashes; lowercases scheme
/// and host (as URL parsing does) but preserves path case. Returns `None`
/// for unparseable URLs and bare origins.
///
/// `"https://Shop.example/products/Calm/?variant=1#top"` becomes
/// `"https://shop.example/products/Calm"`.
#[must_use]
pub fn canonical_product_url(raw: &str) -> Option<String> {
    let mut url = Url::parse(raw.trim()).ok()?;
    url.set_query(None);
    url.set_fragment(None);
    let path = url.path().trim_end_matches('/').to_owned();
    if path.is_empty() {
        return None;
    }
    url.set_path(&path);
    Some(url.to_string())
}

/// Derives the JSON endpoint for a product page URL.
///
/// Collection-scoped paths (`/collections/x/products/h`) and locale prefixes
/// collapse to `/products/h`. A path already ending in `.json` is kept as-is.
///
/// # Errors
///
/// Returns [`FetchError::InvalidUrl`] if `product_url` is not an absolute URL
/// with a path.
pub fn json_endpoint_url(product_url: &str) -> Result<String, FetchError> {
    let invalid = |reason: &str| FetchError::InvalidUrl {
        url: product_url.to_owned(),
        reason: reason.to_owned(),
    };

    let canonical = canonical_product_url(product_url)
        .ok_or_else(|| invalid("not an absolute product URL"))?;
    let mut url = Url::parse(&canonical).map_err(|e| invalid(&e.to_string()))?;

    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();
    let path = match segments.iter().position(|seg| *seg == "products") {
        Some(i) if i + 1 < segments.len() => format!("/products/{}", segments[i + 1..].join("/")),
        _ => format!("/{}", segments.join("/")),
    };
    let path = if path.ends_with(".json") {
        path
    } else {
        format!("{path}.json")
    };

    url.set_path(&path);
    Ok(url.to_string())
}

/// Checks that a payload identifies a product, either at the top level or
/// under a `"product"` key. Returns the names of missing fields.
fn missing_product_fields(payload: &Value) -> Vec<&'static str> {
    let product = payload
        .get("product")
        .filter(|p| p.is_object())
        .unwrap_or(payload);

    let has_id = match product.get("id") {
        Some(Value::Number(_)) => true,
        Some(Value::String(s)) => !s.trim().is_empty(),
        _ => false,
    };
    let has_title = product
        .get("title")
        .and_then(Value::as_str)
        .is_some_and(|t| !t.trim().is_empty());

    let mut missing = Vec::new();
    if !has_id {
        missing.push("id");
    }
    if !has_title {
        missing.push("title");
    }
    missing
}

/// Fetches and validates one product's JSON document.
pub struct ProductResolver<'a> {
    fetcher: &'a PoliteFetcher,
}

impl<'a> ProductResolver<'a> {
    #[must_use]
    pub fn new(fetcher: &'a PoliteFetcher) -> Self {
        Self { fetcher }
    }

    /// Resolves `product_url` to a [`ProductRecord`].
    ///
    /// # Errors
    ///
    /// Every failure comes back as a product-stage [`ErrorEntry`] keyed by
    /// `product_url`; nothing here is fatal to the crawl.
    pub async fn resolve(&self, product_url: &str) -> Result<ProductRecord, ErrorEntry> {
        let endpoint = json_endpoint_url(product_url).map_err(|e| {
            ErrorEntry::new(
                product_url,
                Stage::Product,
                ErrorKind::FetchHttpError,
                e.to_string(),
                0,
            )
        })?;

        let fetched = self
            .fetcher
            .get(&endpoint)
            .await
            .map_err(|failure| ErrorEntry::from_fetch(product_url, Stage::Product, &failure))?;

        let payload: Value = serde_json::from_slice(&fetched.body).map_err(|e| {
            ErrorEntry::new(
                product_url,
                Stage::Product,
                ErrorKind::ProductJsonInvalid,
                format!("{endpoint} did not return valid JSON: {e}"),
                fetched.attempts,
            )
        })?;

        let missing = missing_product_fields(&payload);
        if !missing.is_empty() {
            return Err(ErrorEntry::new(
                product_url,
                Stage::Product,
                ErrorKind::ProductFieldsMissing,
                format!("{endpoint} is missing {}", missing.join(", ")),
                fetched.attempts,
            ));
        }

        Ok(ProductRecord {
            source_url: product_url.to_owned(),
            json_endpoint_url: endpoint,
            payload: Some(payload),
            fetched_at: Utc::now(),
        })
    }
}
