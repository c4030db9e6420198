//! adcrawl: an unattended classified-ad crawler
//!
//! This crate rotates through a set of site-specific scraper modules, paginates
//! their listing indexes through a shared browser session, persists every
//! listing it parses, and funnels failures through a rate-limited error
//! classifier so an operator is alerted once per problem rather than once per
//! page.

pub mod browser;
pub mod config;
pub mod errors;
pub mod modules;
pub mod pagination;
pub mod runner;
pub mod storage;

use thiserror::Error;

/// Main error type for crawl operations
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Browser error: {0}")]
    Browser(#[from] browser::BrowserError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Module error: {0}")]
    Module(#[from] modules::ModuleError),

    #[error("Module not found: {name}")]
    ModuleNotFound { name: String },

    #[error("No scraper modules available to run")]
    NoModules,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid selector in config: {0}")]
    InvalidSelector(String),

    #[error("Invalid environment override {name}: {message}")]
    Environment { name: String, message: String },
}

/// Result type alias for crawl operations
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

impl errors::Reportable for CrawlError {
    fn kind(&self) -> errors::ErrorKind {
        match self {
            Self::Browser(e) => e.kind(),
            Self::Storage(e) => e.kind(),
            Self::Module(e) => e.kind(),
            Self::ModuleNotFound { .. } | Self::NoModules => errors::ErrorKind::ModuleNotFound,
            Self::Io(e) if e.kind() == std::io::ErrorKind::OutOfMemory => {
                errors::ErrorKind::OutOfMemory
            }
            Self::Config(_) | Self::Io(_) => errors::ErrorKind::Unknown,
        }
    }
}

// Re-export commonly used types
pub use config::Config;
pub use errors::{ErrorClassifier, ErrorContext, ErrorKind};
pub use modules::{ListingRecord, ModuleRegistry, ScraperModule};
pub use pagination::{PageVisit, Paginator};
pub use runner::{CrawlRunner, RunControl, RunPhase};
