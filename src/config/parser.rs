use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Overrides `[runner] request-delay-ms`
pub const ENV_REQUEST_DELAY_MS: &str = "ADCRAWL_REQUEST_DELAY_MS";

/// Overrides `[browser] load-images`
pub const ENV_LOAD_IMAGES: &str = "ADCRAWL_LOAD_IMAGES";

/// Loads and parses a configuration file from the given path
///
/// Environment overrides are applied before validation, so an override can
/// never smuggle an invalid value past the validator.
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut config = parse_config(&content)?;

    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;

    validate(&config)?;

    Ok(config)
}

/// Parses TOML content without validating it
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Applies the delay and image-loading environment overrides
///
/// # Arguments
///
/// * `config` - The parsed configuration to update
/// * `lookup` - Environment lookup (injected so tests don't touch process state)
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(ENV_REQUEST_DELAY_MS) {
        config.runner.request_delay_ms =
            raw.trim()
                .parse()
                .map_err(|e: std::num::ParseIntError| ConfigError::Environment {
                    name: ENV_REQUEST_DELAY_MS.to_string(),
                    message: e.to_string(),
                })?;
    }

    if let Some(raw) = lookup(ENV_LOAD_IMAGES) {
        config.browser.load_images = parse_bool(&raw).ok_or_else(|| ConfigError::Environment {
            name: ENV_LOAD_IMAGES.to_string(),
            message: format!("expected true/false, got '{}'", raw),
        })?;
    }

    Ok(())
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Computes a SHA-256 hash of the configuration file content
///
/// This is stored on every run record so runs made with different
/// configurations can be told apart.
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let result = hasher.finalize();
    Ok(hex::encode(result))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}
