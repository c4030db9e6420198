use crate::config::types::{
    BrowserConfig, Config, ErrorPolicyConfig, NotifierConfig, PaginationConfig, SiteConfig,
};
use crate::ConfigError;
use scraper::Selector;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_browser_config(&config.browser)?;
    validate_pagination_config(&config.pagination)?;
    validate_error_policy(&config.errors)?;
    validate_notifier_config(&config.notifier)?;

    if config.storage.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    validate_sites(&config.sites)?;
    Ok(())
}

fn validate_browser_config(config: &BrowserConfig) -> Result<(), ConfigError> {
    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user_agent cannot be empty".to_string(),
        ));
    }

    if config.navigation_timeout_secs < 1 || config.navigation_timeout_secs > 120 {
        return Err(ConfigError::Validation(format!(
            "navigation_timeout_secs must be between 1 and 120, got {}",
            config.navigation_timeout_secs
        )));
    }

    Ok(())
}

fn validate_pagination_config(config: &PaginationConfig) -> Result<(), ConfigError> {
    validate_page_limits(config.max_pages, config.max_empty_pages, "pagination")?;

    if config.min_items < 1 {
        return Err(ConfigError::Validation(
            "min_items must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_page_limits(max_pages: u32, max_empty: u32, owner: &str) -> Result<(), ConfigError> {
    if max_pages < 1 {
        return Err(ConfigError::Validation(format!(
            "{}: max_pages must be >= 1",
            owner
        )));
    }

    if max_empty < 1 {
        return Err(ConfigError::Validation(format!(
            "{}: max_empty_pages must be >= 1",
            owner
        )));
    }

    Ok(())
}

fn validate_error_policy(config: &ErrorPolicyConfig) -> Result<(), ConfigError> {
    if config.max_errors_per_hour < 1 {
        return Err(ConfigError::Validation(
            "max_errors_per_hour must be >= 1".to_string(),
        ));
    }

    if config.critical_threshold < 1 {
        return Err(ConfigError::Validation(
            "critical_threshold must be >= 1".to_string(),
        ));
    }

    if config.hourly_reset_secs < 1 {
        return Err(ConfigError::Validation(
            "hourly_reset_secs must be >= 1".to_string(),
        ));
    }

    if config.log_path.is_empty() {
        return Err(ConfigError::Validation(
            "error log_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_notifier_config(config: &NotifierConfig) -> Result<(), ConfigError> {
    if let Some(webhook) = &config.webhook_url {
        validate_http_url(webhook, "webhook_url")?;
    }
    Ok(())
}

fn validate_sites(sites: &[SiteConfig]) -> Result<(), ConfigError> {
    if sites.is_empty() {
        return Err(ConfigError::Validation(
            "at least one [[site]] must be configured".to_string(),
        ));
    }

    let mut names = HashSet::new();
    for site in sites {
        validate_site_name(&site.name)?;

        if !names.insert(site.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate site name '{}'",
                site.name
            )));
        }

        validate_site(site)?;
    }

    Ok(())
}

fn validate_site(site: &SiteConfig) -> Result<(), ConfigError> {
    validate_http_url(&site.base_url, &format!("{}.base_url", site.name))?;

    if let Some(url) = &site.availability_url {
        validate_http_url(url, &format!("{}.availability_url", site.name))?;
    }

    if let Some(template) = &site.page_url_template {
        if !template.contains("{page}") {
            return Err(ConfigError::Validation(format!(
                "{}: page_url_template must contain a {{page}} placeholder",
                site.name
            )));
        }
    }

    if site.page_param.is_empty() {
        return Err(ConfigError::Validation(format!(
            "{}: page_param cannot be empty",
            site.name
        )));
    }

    validate_page_limits(
        site.max_pages.unwrap_or(1),
        site.max_empty_pages.unwrap_or(1),
        &site.name,
    )?;

    validate_selector(&site.listing_selector, &site.name)?;

    if site.fields.is_empty() {
        return Err(ConfigError::Validation(format!(
            "{}: at least one field selector is required",
            site.name
        )));
    }

    if !site.fields.contains_key(&site.required_field) {
        return Err(ConfigError::Validation(format!(
            "{}: required_field '{}' has no selector in [site.fields]",
            site.name, site.required_field
        )));
    }

    for selector in site.fields.values() {
        validate_selector(selector, &site.name)?;
    }

    Ok(())
}

/// Site names become module names: lowercase ASCII, digits, '-' and '_'
fn validate_site_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::Validation(
            "site name cannot be empty".to_string(),
        ));
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    {
        return Err(ConfigError::Validation(format!(
            "site name must contain only lowercase letters, digits, '-' and '_', got '{}'",
            name
        )));
    }

    Ok(())
}

fn validate_selector(selector: &str, owner: &str) -> Result<(), ConfigError> {
    Selector::parse(selector)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidSelector(format!("{}: '{}': {:?}", owner, selector, e)))
}

fn validate_http_url(raw: &str, field: &str) -> Result<(), ConfigError> {
    let url = Url::parse(raw)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {}: {}", field, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "{} must use http or https, got '{}'",
            field,
            url.scheme()
        )));
    }

    Ok(())
}
