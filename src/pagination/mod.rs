//! Pagination engine
//!
//! Walks the numbered index pages of a listing site on a single page handle,
//! yielding one [`PageVisit`] per page until either the page cap or the
//! consecutive-empty-page cap is reached. The terminal empty visit is yielded
//! too, so callers can tell "stopped after N empty pages" from "ran to the cap".

mod cursor;
mod predicate;
mod url;

pub use cursor::PageCursor;
pub use predicate::{ContentCheck, ContentPredicate, EvaluateFn};
pub use url::{PageUrl, UrlBuilderFn, PAGE_PLACEHOLDER};

use crate::browser::{BrowserError, BrowsingContext, PageHandle};
use crate::config::{BrowserConfig, PaginationConfig};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What a page hook gets to see
#[derive(Clone)]
pub struct PageEvent {
    pub page: PageHandle,
    pub page_number: u32,
    pub url: String,
    /// Set for `on_page_content`, `None` for `on_page_load`
    pub has_content: Option<bool>,
}

/// Hook awaited by the engine before a visit is yielded
pub type PageHook = Arc<dyn Fn(PageEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// Tuning for one pagination run
#[derive(Clone)]
pub struct PaginationOptions {
    pub page_url: PageUrl,
    pub max_pages: u32,
    pub max_empty_pages: u32,
    /// Items a page needs for it to count as non-empty
    pub min_items: usize,
    pub navigation_timeout: Duration,
    /// Fires after navigation succeeds, before the content check
    pub on_page_load: Option<PageHook>,
    /// Fires after the content check
    pub on_page_content: Option<PageHook>,
    /// Ends the sequence at the next visit boundary once cancelled
    pub cancel: Option<CancellationToken>,
}

impl Default for PaginationOptions {
    fn default() -> Self {
        Self {
            page_url: PageUrl::default(),
            max_pages: 1000,
            max_empty_pages: 3,
            min_items: 1,
            navigation_timeout: Duration::from_secs(30),
            on_page_load: None,
            on_page_content: None,
            cancel: None,
        }
    }
}

impl PaginationOptions {
    pub fn from_config(pagination: &PaginationConfig, browser: &BrowserConfig) -> Self {
        Self {
            max_pages: pagination.max_pages,
            max_empty_pages: pagination.max_empty_pages,
            min_items: pagination.min_items,
            navigation_timeout: Duration::from_secs(browser.navigation_timeout_secs),
            ..Self::default()
        }
    }
}

/// One visited index page
#[derive(Clone)]
pub struct PageVisit {
    pub page_number: u32,
    pub url: String,
    /// The engine's page handle, holding this page's document until the next visit
    pub page: PageHandle,
    pub has_content: bool,
    pub item_count: usize,
    /// Navigation or evaluation failure; such pages count as empty
    pub error: Option<BrowserError>,
}

/// Lazy sequence of page visits over one browsing context
///
/// The page handle is opened on the first call to [`Paginator::next`] and
/// closed when the sequence ends, when [`Paginator::close`] is called, or when
/// the paginator is dropped early.
pub struct Paginator {
    context: Arc<dyn BrowsingContext>,
    base_url: String,
    predicate: ContentPredicate,
    options: PaginationOptions,
    cursor: PageCursor,
    page: Option<PageHandle>,
    finished: bool,
}

/// Starts paginating `base_url`
pub fn paginate(
    context: Arc<dyn BrowsingContext>,
    base_url: impl Into<String>,
    predicate: ContentPredicate,
    options: PaginationOptions,
) -> Paginator {
    Paginator::new(context, base_url, predicate, options)
}

impl Paginator {
    pub fn new(
        context: Arc<dyn BrowsingContext>,
        base_url: impl Into<String>,
        predicate: ContentPredicate,
        options: PaginationOptions,
    ) -> Self {
        let cursor = PageCursor::new(options.max_pages, options.max_empty_pages);
        Self {
            context,
            base_url: base_url.into(),
            predicate,
            options,
            cursor,
            page: None,
            finished: false,
        }
    }

    pub fn cursor(&self) -> &PageCursor {
        &self.cursor
    }

    /// Visits the next page
    ///
    /// # Returns
    ///
    /// * `Some(Ok(visit))` - A page was visited (possibly empty or failed)
    /// * `Some(Err(e))` - No page handle could be opened; the sequence is over
    /// * `None` - The sequence is exhausted or cancelled; the page is closed
    pub async fn next(&mut self) -> Option<Result<PageVisit, BrowserError>> {
        if self.finished {
            self.release().await;
            return None;
        }

        if self.is_cancelled() {
            tracing::debug!("Pagination of {} cancelled", self.base_url);
            return self.finish().await;
        }

        if self.cursor.is_exhausted() {
            tracing::debug!(
                "Pagination of {} finished after page {} ({} consecutive empty)",
                self.base_url,
                self.cursor.current_page - 1,
                self.cursor.consecutive_empty_pages
            );
            return self.finish().await;
        }

        let page = match self.page_handle().await {
            Ok(page) => page,
            Err(e) => {
                self.finished = true;
                return Some(Err(e));
            }
        };

        let page_number = self.cursor.current_page;
        let url = self.options.page_url.build(&self.base_url, page_number);

        let (check, error) = match self.load(&page, &url, page_number).await {
            Ok(check) => (check, None),
            Err(e) => {
                tracing::warn!("Page {} ({}) failed, counting as empty: {}", page_number, url, e);
                (ContentCheck::default(), Some(e))
            }
        };

        let has_content = ContentPredicate::is_non_empty(check, self.options.min_items);

        if let Some(hook) = &self.options.on_page_content {
            hook(PageEvent {
                page: Arc::clone(&page),
                page_number,
                url: url.clone(),
                has_content: Some(has_content),
            })
            .await;
        }

        self.cursor.advance(has_content);
        tracing::debug!(
            "Visited page {} ({}): {} items, content: {}",
            page_number,
            url,
            check.count,
            has_content
        );

        Some(Ok(PageVisit {
            page_number,
            url,
            page,
            has_content,
            item_count: check.count,
            error,
        }))
    }

    /// Ends the sequence early and closes the page handle
    pub async fn close(mut self) {
        self.finished = true;
        self.release().await;
    }

    async fn load(
        &self,
        page: &PageHandle,
        url: &str,
        page_number: u32,
    ) -> Result<ContentCheck, BrowserError> {
        page.goto(url, self.options.navigation_timeout).await?;

        if let Some(hook) = &self.options.on_page_load {
            hook(PageEvent {
                page: Arc::clone(page),
                page_number,
                url: url.to_string(),
                has_content: None,
            })
            .await;
        }

        let html = page.content().await?;
        let page_url = page.url().unwrap_or_else(|| url.to_string());
        Ok(self.predicate.check(&html, &page_url))
    }

    async fn page_handle(&mut self) -> Result<PageHandle, BrowserError> {
        if let Some(page) = &self.page {
            return Ok(Arc::clone(page));
        }
        let page = self.context.new_page().await?;
        self.page = Some(Arc::clone(&page));
        Ok(page)
    }

    async fn finish(&mut self) -> Option<Result<PageVisit, BrowserError>> {
        self.finished = true;
        self.release().await;
        None
    }

    async fn release(&mut self) {
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                tracing::warn!("Failed to close pagination page: {}", e);
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.options
            .cancel
            .as_ref()
            .is_some_and(|token| token.is_cancelled())
    }
}

impl Drop for Paginator {
    fn drop(&mut self) {
        let Some(page) = self.page.take() else {
            return;
        };
        if page.is_closed() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = page.close().await {
                        tracing::warn!("Failed to close abandoned pagination page: {}", e);
                    }
                });
            }
            Err(_) => tracing::warn!("Pagination page dropped outside a runtime, left open"),
        }
    }
}
