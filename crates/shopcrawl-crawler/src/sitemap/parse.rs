//! Sitemap XML decoding.
//!
//! A body is classified by its root element alone: `<sitemapindex>` lists
//! further sitemap documents, `<urlset>` lists leaf pages. File names such as
//! `sitemap_products_1.xml` are never consulted.

use std::borrow::Cow;
use std::io::Read;

use flate2::read::GzDecoder;
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::SitemapParseError;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SitemapKind {
    Index,
    UrlSet,
}

/// A decoded sitemap document with the raw `<loc>` values it lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SitemapDocument {
    /// `<sitemapindex>`: locations of child sitemap documents.
    Index(Vec<String>),
    /// `<urlset>`: locations of leaf pages.
    UrlSet(Vec<String>),
}

impl SitemapDocument {
    #[must_use]
    pub fn kind(&self) -> SitemapKind {
        match self {
            SitemapDocument::Index(_) => SitemapKind::Index,
            SitemapDocument::UrlSet(_) => SitemapKind::UrlSet,
        }
    }

    #[must_use]
    pub fn locations(&self) -> &[String] {
        match self {
            SitemapDocument::Index(locs) | SitemapDocument::UrlSet(locs) => locs,
        }
    }
}

/// Returns the body unchanged unless it starts with the gzip magic bytes,
/// in which case it is inflated.
///
/// # Errors
///
/// Returns [`SitemapParseError::Decompress`] if the gzip stream is corrupt.
pub fn decompress_if_gzip(body: &[u8]) -> Result<Cow<'_, [u8]>, SitemapParseError> {
    if !body.starts_with(&GZIP_MAGIC) {
        return Ok(Cow::Borrowed(body));
    }
    let mut inflated = Vec::with_capacity(body.len() * 4);
    GzDecoder::new(body)
        .read_to_end(&mut inflated)
        .map_err(SitemapParseError::Decompress)?;
    Ok(Cow::Owned(inflated))
}

/// Decodes a (possibly gzip-compressed) sitemap body.
///
/// # Errors
///
/// Returns a [`SitemapParseError`] if the body cannot be inflated, is not
/// UTF-8, is not well-formed XML, or has a root other than `<sitemapindex>`
/// or `<urlset>`.
pub fn parse_sitemap(body: &[u8]) -> Result<SitemapDocument, SitemapParseError> {
    let bytes = decompress_if_gzip(body)?;
    let xml = std::str::from_utf8(&bytes)?;
    parse_sitemap_xml(xml.trim_start_matches('\u{feff}'))
}

fn classify_root(name: &str) -> Result<SitemapKind, SitemapParseError> {
    match name {
        "sitemapindex" => Ok(SitemapKind::Index),
        "urlset" => Ok(SitemapKind::UrlSet),
        other => Err(SitemapParseError::UnrecognizedRoot(other.to_owned())),
    }
}

fn entry_element(kind: SitemapKind) -> &'static str {
    match kind {
        SitemapKind::Index => "sitemap",
        SitemapKind::UrlSet => "url",
    }
}

fn local_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

fn parse_sitemap_xml(xml: &str) -> Result<SitemapDocument, SitemapParseError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut root: Option<SitemapKind> = None;
    // Local names of the currently open elements.
    let mut open: Vec<String> = Vec::new();
    let mut locations = Vec::new();
    let mut current_loc: Option<String> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = local_name(e.local_name().as_ref());
                let kind = match root {
                    Some(kind) => kind,
                    None => {
                        let kind = classify_root(&name)?;
                        root = Some(kind);
                        kind
                    }
                };
                // Only `<loc>` directly under an entry counts; `<image:loc>`
                // and friends live one level deeper.
                if name == "loc"
                    && open.len() == 2
                    && open.last().map(String::as_str) == Some(entry_element(kind))
                {
                    current_loc = Some(String::new());
                }
                open.push(name);
            }
            Event::Empty(e) => {
                if root.is_none() {
                    let name = local_name(e.local_name().as_ref());
                    root = Some(classify_root(&name)?);
                }
            }
            Event::End(_) => {
                if open.pop().as_deref() == Some("loc") {
                    if let Some(loc) = current_loc.take() {
                        let loc = loc.trim();
                        if !loc.is_empty() {
                            locations.push(loc.to_owned());
                        }
                    }
                }
            }
            Event::Text(e) => {
                if let Some(buf) = current_loc.as_mut() {
                    buf.push_str(&e.unescape()?);
                }
            }
            Event::CData(e) => {
                if let Some(buf) = current_loc.as_mut() {
                    buf.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(unclosed) = open.into_iter().next() {
        return Err(SitemapParseError::Truncated(unclosed));
    }

    match root {
        None => Err(SitemapParseError::MissingRoot),
        Some(SitemapKind::Index) => Ok(SitemapDocument::Index(locations)),
        Some(SitemapKind::UrlSet) => Ok(SitemapDocument::UrlSet(locations)),
    }
}

#[cfg(test)]
#[path = "parse_test.rs"]
mod tests;
