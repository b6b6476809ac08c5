//! Page extraction
//!
//! Extraction runs on the HTML of a loaded page and is fully synchronous: the
//! parsed document never lives across an `.await`.

use crate::config::{validate_selector, ExtractorConfig};
use crate::harvest::{DetailRef, ExtractError};
use crate::ConfigError;
use scraper::{ElementRef, Html, Selector};
use serde_json::{Map, Value};
use url::Url;

/// Reads catalog structure out of page HTML
pub trait PageExtractor: Send + Sync {
    /// Address of the last listing page, from the pager on the catalog root
    fn last_listing_page(&self, root: &Url, html: &str) -> Result<Url, ExtractError>;

    /// Detail references found on one listing page, in page order
    fn listing_entries(&self, page: &Url, html: &str) -> Result<Vec<DetailRef>, ExtractError>;

    /// Fields of one detail page
    fn detail_record(&self, page: &Url, html: &str) -> Result<Map<String, Value>, ExtractError>;
}

/// [`PageExtractor`] driven by CSS selectors
#[derive(Debug)]
pub struct SelectorExtractor {
    pager_last_link: Selector,
    listing_links: Selector,
    detail_root: Selector,
    detail_title: Selector,
    detail_fields: Vec<(String, Selector)>,
    raw: ExtractorConfig,
}

impl SelectorExtractor {
    /// Compiles every selector of the extractor configuration
    ///
    /// # Arguments
    ///
    /// * `config` - Extractor configuration
    ///
    /// # Returns
    ///
    /// * `Ok(SelectorExtractor)` - All selectors compiled
    /// * `Err(ConfigError)` - A selector is invalid
    pub fn from_config(config: &ExtractorConfig) -> Result<Self, ConfigError> {
        let detail_fields = config
            .detail_fields
            .iter()
            .map(|(field, selector)| Ok((field.clone(), validate_selector(selector)?)))
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self {
            pager_last_link: validate_selector(&config.pager_last_link)?,
            listing_links: validate_selector(&config.listing_links)?,
            detail_root: validate_selector(&config.detail_root)?,
            detail_title: validate_selector(&config.detail_title)?,
            detail_fields,
            raw: config.clone(),
        })
    }
}

impl PageExtractor for SelectorExtractor {
    fn last_listing_page(&self, root: &Url, html: &str) -> Result<Url, ExtractError> {
        let document = Html::parse_document(html);

        let href = document
            .select(&self.pager_last_link)
            .find_map(|link| link.value().attr("href"))
            .ok_or_else(|| ExtractError::StructureNotFound(self.raw.pager_last_link.clone()))?;

        resolve(root, href)
    }

    fn listing_entries(&self, page: &Url, html: &str) -> Result<Vec<DetailRef>, ExtractError> {
        let document = Html::parse_document(html);
        let mut entries = Vec::new();

        for link in document.select(&self.listing_links) {
            let Some(href) = link.value().attr("href") else {
                continue;
            };
            entries.push(DetailRef {
                address: resolve(page, href)?,
                name: text_of(&link),
            });
        }

        if entries.is_empty() {
            tracing::debug!("No item links on listing page {}", page);
        }

        Ok(entries)
    }

    fn detail_record(&self, page: &Url, html: &str) -> Result<Map<String, Value>, ExtractError> {
        let document = Html::parse_document(html);

        let root = document
            .select(&self.detail_root)
            .next()
            .ok_or_else(|| ExtractError::StructureNotFound(self.raw.detail_root.clone()))?;

        let title = root
            .select(&self.detail_title)
            .next()
            .map(|element| text_of(&element))
            .filter(|title| !title.is_empty())
            .ok_or_else(|| ExtractError::StructureNotFound(self.raw.detail_title.clone()))?;

        let mut record = Map::new();
        record.insert("name".to_string(), Value::String(title));

        for (field, selector) in &self.detail_fields {
            let mut values: Vec<Value> = root
                .select(selector)
                .map(|element| Value::String(text_of(&element)))
                .collect();

            let value = match values.len() {
                0 => Value::Null,
                1 => values.remove(0),
                _ => Value::Array(values),
            };
            record.insert(field.clone(), value);
        }

        tracing::trace!("Extracted {} fields from {}", record.len(), page);
        Ok(record)
    }
}

/// Text content of an element with whitespace runs collapsed
fn text_of(element: &ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn resolve(base: &Url, href: &str) -> Result<Url, ExtractError> {
    base.join(href.trim())
        .map_err(|source| ExtractError::InvalidLink {
            href: href.to_string(),
            source,
        })
}
