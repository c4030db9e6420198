use serde::Deserialize;
use std::collections::BTreeMap;

/// Main configuration structure for adcrawl
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub pagination: PaginationConfig,
    #[serde(default)]
    pub errors: ErrorPolicyConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default, rename = "site")]
    pub sites: Vec<SiteConfig>,
}

/// Run loop pacing
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunnerConfig {
    /// Pause between two modules of a cycle (milliseconds)
    #[serde(default = "default_inter_module_delay_ms")]
    pub inter_module_delay_ms: u64,

    /// Pause between two listings of one module (milliseconds)
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            inter_module_delay_ms: default_inter_module_delay_ms(),
            request_delay_ms: default_request_delay_ms(),
        }
    }
}

/// Browser session settings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BrowserConfig {
    /// User agent presented to target sites
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Ceiling for a single page navigation (seconds)
    #[serde(default = "default_navigation_timeout_secs")]
    pub navigation_timeout_secs: u64,

    /// Whether pages should load images
    #[serde(default)]
    pub load_images: bool,

    /// Refuse plain-http navigation
    #[serde(default)]
    pub https_only: bool,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            navigation_timeout_secs: default_navigation_timeout_secs(),
            load_images: false,
            https_only: false,
        }
    }
}

/// Default pagination limits, overridable per site
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PaginationConfig {
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    #[serde(default = "default_max_empty_pages")]
    pub max_empty_pages: u32,

    /// Minimum matching items for a page to count as non-empty
    #[serde(default = "default_min_items")]
    pub min_items: usize,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            max_pages: default_max_pages(),
            max_empty_pages: default_max_empty_pages(),
            min_items: default_min_items(),
        }
    }
}

/// Error classifier thresholds
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ErrorPolicyConfig {
    /// Minimum spacing between two reports of the same component and kind
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    #[serde(default = "default_max_errors_per_hour")]
    pub max_errors_per_hour: u32,

    /// Hourly count at which a component's errors become critical
    #[serde(default = "default_critical_threshold")]
    pub critical_threshold: u32,

    #[serde(default = "default_hourly_reset_secs")]
    pub hourly_reset_secs: u64,

    /// JSON lines file receiving every critical report
    #[serde(default = "default_error_log_path")]
    pub log_path: String,
}

impl Default for ErrorPolicyConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown_secs(),
            max_errors_per_hour: default_max_errors_per_hour(),
            critical_threshold: default_critical_threshold(),
            hourly_reset_secs: default_hourly_reset_secs(),
            log_path: default_error_log_path(),
        }
    }
}

/// Outbound notification settings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NotifierConfig {
    /// Endpoint receiving `{"text": ...}` POSTs; log-only when absent
    #[serde(default)]
    pub webhook_url: Option<String>,

    #[serde(default = "default_min_interval_secs")]
    pub min_interval_secs: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            min_interval_secs: default_min_interval_secs(),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// One configured classified-ad site
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SiteConfig {
    /// Unique module name
    pub name: String,

    /// First page of the listing index
    pub base_url: String,

    /// Anchors on index pages that link to listing detail pages
    pub listing_selector: String,

    #[serde(default = "default_page_param")]
    pub page_param: String,

    /// Separator used before the page parameter when the base URL has no query
    #[serde(default = "default_page_separator")]
    pub page_separator: String,

    /// Full page URL with a `{page}` placeholder; replaces query-parameter paging
    #[serde(default)]
    pub page_url_template: Option<String>,

    /// Static query parameters added to every index page
    #[serde(default)]
    pub extra_params: BTreeMap<String, String>,

    #[serde(default)]
    pub max_pages: Option<u32>,

    #[serde(default)]
    pub max_empty_pages: Option<u32>,

    /// Page probed by the availability check (defaults to the base URL)
    #[serde(default)]
    pub availability_url: Option<String>,

    /// Extra attempts for a failing detail page
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Linear backoff step between detail page attempts (milliseconds)
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Field that must be present for a detail page to yield a record
    #[serde(default = "default_required_field")]
    pub required_field: String,

    /// Field name -> CSS selector on the detail page
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

fn default_inter_module_delay_ms() -> u64 {
    5000
}

fn default_request_delay_ms() -> u64 {
    1000
}

fn default_user_agent() -> String {
    format!("adcrawl/{}", env!("CARGO_PKG_VERSION"))
}

fn default_navigation_timeout_secs() -> u64 {
    30
}

fn default_max_pages() -> u32 {
    1000
}

fn default_max_empty_pages() -> u32 {
    3
}

fn default_min_items() -> usize {
    1
}

fn default_cooldown_secs() -> u64 {
    300
}

fn default_max_errors_per_hour() -> u32 {
    50
}

fn default_critical_threshold() -> u32 {
    10
}

fn default_hourly_reset_secs() -> u64 {
    3600
}

fn default_error_log_path() -> String {
    "./errors.jsonl".to_string()
}

fn default_min_interval_secs() -> u64 {
    3
}

fn default_database_path() -> String {
    "./listings.db".to_string()
}

fn default_page_param() -> String {
    "page".to_string()
}

fn default_page_separator() -> String {
    "?".to_string()
}

fn default_retries() -> u32 {
    2
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_required_field() -> String {
    "title".to_string()
}
