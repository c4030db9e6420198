//! Built-in selector-driven site module
//!
//! One [`SelectorModule`] is built per `[[site]]` entry. Listing discovery
//! paginates the site's index; an index page counts as non-empty only when it
//! links to listings not seen before, so a site that keeps serving its last
//! page for out-of-range page numbers still terminates.
//!
//! A listing is skipped in later turns only once it has a definite outcome:
//! it is in storage, or it parsed to a record or to "removed" in this process.
//! Listings that failed or were still queued when a turn ended are offered
//! again next turn.

use crate::browser::{BrowserError, BrowsingContext, PageHandle};
use crate::config::{BrowserConfig, Config, PaginationConfig, SiteConfig};
use crate::errors::{ErrorClassifier, ErrorContext};
use crate::modules::{ListingRecord, ModuleError, ModuleFactory, ModuleInfo, ScraperModule};
use crate::pagination::{ContentCheck, ContentPredicate, PageUrl, PaginationOptions, Paginator};
use crate::storage::ListingSink;
use async_trait::async_trait;
use chrono::Utc;
use scraper::{Html, Selector};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use url::Url;

/// Outcomes remembered in memory; storage-backed listings are not counted
const MAX_RESOLVED: usize = 10_000;

/// Listing URL bookkeeping shared with the index predicate
#[derive(Default)]
struct Discovery {
    /// Discovered but not yet handed out
    pending: VecDeque<String>,
    /// Discovered during the current turn
    turn_seen: HashSet<String>,
    /// Stored listing URLs, reloaded every turn
    stored: HashSet<String>,
    /// Listings with a definite outcome that storage does not record
    resolved: HashSet<String>,
    /// Insertion order of `resolved`, oldest first
    resolved_order: VecDeque<String>,
}

impl Discovery {
    fn begin_turn(&mut self, stored: Option<HashSet<String>>) {
        self.end_turn();
        if let Some(stored) = stored {
            self.stored = stored;
        }
    }

    fn end_turn(&mut self) {
        self.pending.clear();
        self.turn_seen.clear();
    }

    /// Queues `url` if nothing is known about it yet; true if queued
    fn offer(&mut self, url: String) -> bool {
        if self.stored.contains(&url) || self.resolved.contains(&url) {
            return false;
        }
        if !self.turn_seen.insert(url.clone()) {
            return false;
        }
        self.pending.push_back(url);
        true
    }

    fn resolve(&mut self, url: &str) {
        if !self.resolved.insert(url.to_string()) {
            return;
        }
        self.resolved_order.push_back(url.to_string());
        while self.resolved_order.len() > MAX_RESOLVED {
            if let Some(oldest) = self.resolved_order.pop_front() {
                self.resolved.remove(&oldest);
            }
        }
    }
}

/// Site module configured entirely by CSS selectors
pub struct SelectorModule {
    site: SiteConfig,
    options: PaginationOptions,
    listing_selector: Selector,
    fields: Vec<(String, Selector)>,
    errors: Arc<ErrorClassifier>,
    context: Option<Arc<dyn BrowsingContext>>,
    paginator: Option<Paginator>,
    detail_page: Option<PageHandle>,
    discovery: Arc<Mutex<Discovery>>,
    /// No sink this turn, so saved records are remembered in memory
    remember_saved: bool,
}

impl SelectorModule {
    pub fn new(
        site: SiteConfig,
        pagination: &PaginationConfig,
        browser: &BrowserConfig,
        errors: Arc<ErrorClassifier>,
    ) -> Result<Self, ModuleError> {
        let listing_selector = parse_selector(&site.listing_selector)?;
        let fields = site
            .fields
            .iter()
            .map(|(name, css)| Ok((name.clone(), parse_selector(css)?)))
            .collect::<Result<Vec<_>, ModuleError>>()?;

        let mut options = PaginationOptions::from_config(pagination, browser);
        if let Some(max_pages) = site.max_pages {
            options.max_pages = max_pages;
        }
        if let Some(max_empty_pages) = site.max_empty_pages {
            options.max_empty_pages = max_empty_pages;
        }
        options.page_url = match &site.page_url_template {
            Some(template) => PageUrl::Template(template.clone()),
            None => PageUrl::Query {
                param: site.page_param.clone(),
                separator: site.page_separator.clone(),
                extra_params: site
                    .extra_params
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            },
        };

        Ok(Self {
            site,
            options,
            listing_selector,
            fields,
            errors,
            context: None,
            paginator: None,
            detail_page: None,
            discovery: Arc::new(Mutex::new(Discovery::default())),
            remember_saved: true,
        })
    }

    /// Predicate that queues unseen listing links and counts only those
    fn listing_predicate(&self) -> ContentPredicate {
        let selector = self.listing_selector.clone();
        let discovery = Arc::clone(&self.discovery);

        ContentPredicate::evaluate(move |document, page_url| {
            let base = Url::parse(page_url).ok();
            let mut discovery = lock(&discovery);

            let mut fresh = 0;
            for element in document.select(&selector) {
                let Some(href) = element.value().attr("href") else {
                    continue;
                };
                let Some(url) = resolve_link(base.as_ref(), href) else {
                    continue;
                };
                if discovery.offer(url) {
                    fresh += 1;
                }
            }

            ContentCheck {
                has_content: fresh > 0,
                count: fresh,
            }
        })
    }

    async fn detail_page(&mut self) -> Result<PageHandle, ModuleError> {
        if let Some(page) = &self.detail_page {
            if !page.is_closed() {
                return Ok(Arc::clone(page));
            }
        }
        let context = self.context.as_ref().ok_or(ModuleError::NotInitialized)?;
        let page = context.new_page().await?;
        self.detail_page = Some(Arc::clone(&page));
        Ok(page)
    }

    async fn close_pages(&mut self) {
        if let Some(paginator) = self.paginator.take() {
            paginator.close().await;
        }
        if let Some(page) = self.detail_page.take() {
            if let Err(e) = page.close().await {
                tracing::warn!("Failed to close detail page of '{}': {}", self.site.name, e);
            }
        }
    }

    fn extract(&self, url: &str, html: &str) -> Option<ListingRecord> {
        let document = Html::parse_document(html);

        let mut fields = BTreeMap::new();
        for (name, selector) in &self.fields {
            if let Some(element) = document.select(selector).next() {
                let text = element
                    .text()
                    .flat_map(str::split_whitespace)
                    .collect::<Vec<_>>()
                    .join(" ");
                if !text.is_empty() {
                    fields.insert(name.clone(), text);
                }
            }
        }

        if !fields.contains_key(&self.site.required_field) {
            tracing::debug!(
                "{} has no '{}', treating as removed",
                url,
                self.site.required_field
            );
            return None;
        }

        Some(ListingRecord {
            module: self.site.name.clone(),
            url: url.to_string(),
            fields,
            scraped_at: Utc::now(),
        })
    }

    async fn fetch_listing(&mut self, url: &str) -> Result<Option<ListingRecord>, ModuleError> {
        let page = self.detail_page().await?;
        let timeout = self.options.navigation_timeout;

        let mut attempt: u32 = 0;
        loop {
            match page.goto(url, timeout).await {
                Ok(_) => break,
                Err(BrowserError::HttpStatus { status: 404 | 410, .. }) => {
                    tracing::debug!("{} is gone", url);
                    return Ok(None);
                }
                Err(e) if attempt < self.site.retries => {
                    attempt += 1;
                    let delay = Duration::from_millis(self.site.retry_delay_ms) * attempt;
                    tracing::debug!(
                        "Attempt {} for {} failed ({}), retrying in {:?}",
                        attempt,
                        url,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        let html = page.content().await?;
        Ok(self.extract(url, &html))
    }
}

#[async_trait]
impl ScraperModule for SelectorModule {
    fn info(&self) -> ModuleInfo {
        ModuleInfo {
            name: self.site.name.clone(),
            base_url: self.site.base_url.clone(),
        }
    }

    async fn initialize(
        &mut self,
        context: Arc<dyn BrowsingContext>,
        sink: Option<Arc<dyn ListingSink>>,
    ) -> Result<(), ModuleError> {
        // Leftovers of a turn that was interrupted before cleanup
        self.close_pages().await;

        // On a failed reload the previous turn's stored set stays in place
        let stored = match &sink {
            Some(sink) => match sink.known_urls(&self.site.name).await {
                Ok(urls) => {
                    tracing::debug!("'{}' skips {} stored listings", self.site.name, urls.len());
                    Some(urls.into_iter().collect())
                }
                Err(e) => {
                    self.errors
                        .report("database", &e, ErrorContext::new().module(&self.site.name))
                        .await;
                    None
                }
            },
            None => Some(HashSet::new()),
        };
        lock(&self.discovery).begin_turn(stored);
        self.remember_saved = sink.is_none();

        self.paginator = Some(Paginator::new(
            Arc::clone(&context),
            self.site.base_url.clone(),
            self.listing_predicate(),
            self.options.clone(),
        ));
        self.context = Some(context);
        Ok(())
    }

    async fn next_listing(&mut self) -> Option<Result<String, ModuleError>> {
        loop {
            let queued = lock(&self.discovery).pending.pop_front();
            if let Some(url) = queued {
                return Some(Ok(url));
            }

            let paginator = self.paginator.as_mut()?;
            match paginator.next().await {
                Some(Ok(visit)) => {
                    if let Some(error) = &visit.error {
                        let context = ErrorContext::new()
                            .module(&self.site.name)
                            .url(&visit.url);
                        self.errors.report("pagination", error, context).await;
                    }
                }
                Some(Err(e)) => {
                    self.paginator = None;
                    return Some(Err(e.into()));
                }
                None => {
                    self.paginator = None;
                    return None;
                }
            }
        }
    }

    async fn parse_listing(&mut self, url: &str) -> Result<Option<ListingRecord>, ModuleError> {
        let record = self.fetch_listing(url).await?;
        if record.is_none() || self.remember_saved {
            lock(&self.discovery).resolve(url);
        }
        Ok(record)
    }

    async fn cleanup(&mut self) -> Result<(), ModuleError> {
        self.close_pages().await;
        lock(&self.discovery).end_turn();
        Ok(())
    }

    async fn is_available(
        &mut self,
        context: &Arc<dyn BrowsingContext>,
    ) -> Result<bool, ModuleError> {
        let url = self
            .site
            .availability_url
            .clone()
            .unwrap_or_else(|| self.site.base_url.clone());

        let page = context.new_page().await?;
        let result = page.goto(&url, self.options.navigation_timeout).await;
        if let Err(e) = page.close().await {
            tracing::warn!("Failed to close availability page: {}", e);
        }

        match result {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::info!("'{}' unavailable: {}", self.site.name, e);
                Ok(false)
            }
        }
    }
}

/// One factory per configured site
pub fn builtin_factories(config: &Config, errors: Arc<ErrorClassifier>) -> Vec<ModuleFactory> {
    config
        .sites
        .iter()
        .map(|site| {
            let site = site.clone();
            let pagination = config.pagination.clone();
            let browser = config.browser.clone();
            let errors = Arc::clone(&errors);
            let name = site.name.clone();

            ModuleFactory::new(name, move || {
                let module =
                    SelectorModule::new(site.clone(), &pagination, &browser, Arc::clone(&errors))?;
                Ok(Box::new(module) as Box<dyn ScraperModule>)
            })
        })
        .collect()
}

fn parse_selector(css: &str) -> Result<Selector, ModuleError> {
    Selector::parse(css).map_err(|e| ModuleError::Selector {
        selector: css.to_string(),
        message: e.to_string(),
    })
}

/// Absolute http(s) URL of a link, without fragment
fn resolve_link(base: Option<&Url>, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let mut url = match base {
        Some(base) => base.join(href).ok()?,
        None => Url::parse(href).ok()?,
    };
    url.set_fragment(None);

    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
