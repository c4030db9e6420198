//! Scraper modules and their registry
//!
//! A scraper module knows one classified-ad site: how to discover listing URLs
//! and how to turn a listing page into a [`ListingRecord`]. The crawl runner
//! drives modules only through the [`ScraperModule`] trait.

mod registry;
mod selector;
#[cfg(test)]
pub(crate) mod testing;

pub use registry::{ModuleFactory, ModuleRecord, ModuleRegistry};
pub use selector::{builtin_factories, SelectorModule};

use crate::browser::{BrowserError, BrowsingContext};
use crate::errors::{ErrorKind, Reportable};
use crate::storage::ListingSink;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by scraper modules
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error("Failed to parse {url}: {message}")]
    Parse { url: String, message: String },

    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    #[error("Module used before initialize")]
    NotInitialized,

    #[error("Module unavailable: {0}")]
    Unavailable(String),

    #[error("Module failed to load: {0}")]
    Load(String),
}

impl Reportable for ModuleError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Browser(e) => e.kind(),
            Self::Parse { .. } | Self::Selector { .. } => ErrorKind::Parsing,
            Self::Unavailable(_) => ErrorKind::Network,
            Self::NotInitialized | Self::Load(_) => ErrorKind::Unknown,
        }
    }
}

/// Descriptive metadata of a module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    pub name: String,
    pub base_url: String,
}

/// One parsed listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingRecord {
    pub module: String,
    pub url: String,
    pub fields: BTreeMap<String, String>,
    pub scraped_at: DateTime<Utc>,
}

/// A site-specific scraper
///
/// Lifecycle per turn: `initialize`, then `next_listing` until it returns
/// `None`, calling `parse_listing` on each URL, then `cleanup`. The listing
/// sequence restarts only through a fresh `initialize`.
#[async_trait]
pub trait ScraperModule: Send {
    fn info(&self) -> ModuleInfo;

    /// Prepares a turn on the shared browsing context
    async fn initialize(
        &mut self,
        context: Arc<dyn BrowsingContext>,
        sink: Option<Arc<dyn ListingSink>>,
    ) -> Result<(), ModuleError>;

    /// Next listing URL, or `None` once discovery is exhausted
    async fn next_listing(&mut self) -> Option<Result<String, ModuleError>>;

    /// Parses one listing; `Ok(None)` means the page holds no listing (e.g. removed ad)
    async fn parse_listing(&mut self, url: &str) -> Result<Option<ListingRecord>, ModuleError>;

    /// Releases every page the module opened during its turn
    async fn cleanup(&mut self) -> Result<(), ModuleError>;

    /// Whether the site currently answers
    async fn is_available(
        &mut self,
        _context: &Arc<dyn BrowsingContext>,
    ) -> Result<bool, ModuleError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_error_kinds() {
        let timeout = ModuleError::from(BrowserError::Timeout {
            url: "https://ads.test".into(),
            seconds: 30,
        });
        assert_eq!(timeout.kind(), ErrorKind::Timeout);
        assert_eq!(
            ModuleError::Parse {
                url: "u".into(),
                message: "m".into()
            }
            .kind(),
            ErrorKind::Parsing
        );
        assert_eq!(ModuleError::NotInitialized.kind(), ErrorKind::Unknown);
    }

    #[test]
    fn test_listing_record_serializes() {
        let mut fields = BTreeMap::new();
        fields.insert("price".to_string(), "4 500 €".to_string());
        let record = ListingRecord {
            module: "autos".to_string(),
            url: "https://ads.test/ad/1".to_string(),
            fields,
            scraped_at: Utc::now(),
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["module"], "autos");
        assert_eq!(json["fields"]["price"], "4 500 €");
    }
}
