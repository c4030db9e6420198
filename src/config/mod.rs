//! Configuration module for adcrawl
//!
//! This module handles loading, parsing, and validating TOML configuration files,
//! plus the environment variables that override pacing and image loading.
//!
//! # Example
//!
//! ```no_run
//! use adcrawl::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("adcrawl.toml")).unwrap();
//! println!("Configured sites: {}", config.sites.len());
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    BrowserConfig, Config, ErrorPolicyConfig, NotifierConfig, PaginationConfig, RunnerConfig,
    SiteConfig, StorageConfig,
};

// Re-export parser functions
pub use parser::{
    apply_env_overrides, compute_config_hash, load_config, load_config_with_hash, parse_config,
    ENV_LOAD_IMAGES, ENV_REQUEST_DELAY_MS,
};
pub use validation::validate;
