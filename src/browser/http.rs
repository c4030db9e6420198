//! HTTP-backed browser implementation
//!
//! Pages are loaded with a shared `reqwest` client and their HTML is kept for
//! evaluation with `scraper`. No scripts run, so this backend suits sites that
//! render their listing indexes server-side.
//!
//! # Error mapping
//!
//! | Condition | Error |
//! |-----------|-------|
//! | Request timeout | `Timeout` |
//! | Connection refused / DNS / TLS | `Network` |
//! | Non-2xx status | `HttpStatus` |
//! | Plain http with `https-only` | `Refused` |
//! | Navigation on a closed page | `PageClosed` |

use crate::browser::{
    Browser, BrowserError, BrowserLauncher, BrowsingContext, Navigation, Page, PageHandle,
};
use crate::config::BrowserConfig;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};

const ACCEPT_WITH_IMAGES: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/*;q=0.8,*/*;q=0.5";
const ACCEPT_WITHOUT_IMAGES: &str = "text/html,application/xhtml+xml,application/xml;q=0.9";

/// Builds an HTTP client with the browser configuration
///
/// # Arguments
///
/// * `config` - The browser configuration
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(config: &BrowserConfig) -> Result<Client, reqwest::Error> {
    let accept = if config.load_images {
        ACCEPT_WITH_IMAGES
    } else {
        ACCEPT_WITHOUT_IMAGES
    };

    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(accept));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en;q=0.8,*;q=0.5"));

    Client::builder()
        .user_agent(config.user_agent.clone())
        .default_headers(headers)
        .timeout(Duration::from_secs(config.navigation_timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .https_only(config.https_only)
        .gzip(true)
        .brotli(true)
        .build()
}

/// Launches [`HttpBrowser`]s
pub struct HttpLauncher {
    config: BrowserConfig,
}

impl HttpLauncher {
    pub fn new(config: BrowserConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BrowserLauncher for HttpLauncher {
    async fn launch(&self) -> Result<Box<dyn Browser>, BrowserError> {
        let client =
            build_http_client(&self.config).map_err(|e| BrowserError::Launch(e.to_string()))?;
        tracing::debug!("Launched HTTP browser as '{}'", self.config.user_agent);
        Ok(Box::new(HttpBrowser::new(client, self.config.https_only)))
    }
}

/// Browser whose pages are plain HTTP fetches
pub struct HttpBrowser {
    client: Client,
    https_only: bool,
    contexts: Mutex<Vec<Arc<HttpContext>>>,
    closed: AtomicBool,
}

impl HttpBrowser {
    pub fn new(client: Client, https_only: bool) -> Self {
        Self {
            client,
            https_only,
            contexts: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Browser for HttpBrowser {
    async fn new_context(&self) -> Result<Arc<dyn BrowsingContext>, BrowserError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrowserError::SessionClosed);
        }

        let context = Arc::new(HttpContext::new(self.client.clone(), self.https_only));
        self.contexts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&context));
        Ok(context)
    }

    async fn close(&self) -> Result<(), BrowserError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let contexts: Vec<_> = self
            .contexts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();

        for context in contexts {
            context.close().await?;
        }

        tracing::debug!("HTTP browser closed");
        Ok(())
    }
}

/// Browsing context tracking the pages it opened
pub struct HttpContext {
    client: Client,
    https_only: bool,
    pages: Mutex<Vec<Weak<HttpPage>>>,
    closed: AtomicBool,
}

impl HttpContext {
    fn new(client: Client, https_only: bool) -> Self {
        Self {
            client,
            https_only,
            pages: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn live_pages(&self) -> Vec<Arc<HttpPage>> {
        self.pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }
}

#[async_trait]
impl BrowsingContext for HttpContext {
    async fn new_page(&self) -> Result<PageHandle, BrowserError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrowserError::SessionClosed);
        }

        let page = Arc::new(HttpPage::new(self.client.clone(), self.https_only));
        self.pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::downgrade(&page));
        Ok(page)
    }

    fn open_pages(&self) -> usize {
        self.live_pages()
            .iter()
            .filter(|page| !page.is_closed())
            .count()
    }

    fn reclaim(&self) -> usize {
        let mut pages = self.pages.lock().unwrap_or_else(PoisonError::into_inner);
        let before = pages.len();
        pages.retain(|weak| weak.upgrade().map(|page| !page.is_closed()).unwrap_or(false));
        pages.shrink_to_fit();
        before - pages.len()
    }

    async fn close(&self) -> Result<(), BrowserError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        for page in self.live_pages() {
            page.close().await?;
        }
        self.reclaim();
        Ok(())
    }
}

/// Document held by a page after a successful navigation
struct LoadedDocument {
    url: String,
    html: String,
}

/// A page whose navigation is a single GET
pub struct HttpPage {
    client: Client,
    https_only: bool,
    document: Mutex<Option<LoadedDocument>>,
    closed: AtomicBool,
}

impl HttpPage {
    fn new(client: Client, https_only: bool) -> Self {
        Self {
            client,
            https_only,
            document: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    fn set_document(&self, document: Option<LoadedDocument>) {
        *self.document.lock().unwrap_or_else(PoisonError::into_inner) = document;
    }
}

#[async_trait]
impl Page for HttpPage {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<Navigation, BrowserError> {
        if self.is_closed() {
            return Err(BrowserError::PageClosed);
        }

        // A failed navigation must never leave the previous document readable
        self.set_document(None);

        if self.https_only && !url.starts_with("https://") {
            return Err(BrowserError::Refused {
                url: url.to_string(),
                reason: "https-only is enabled".to_string(),
            });
        }

        let started = Instant::now();
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify_request_error(url, timeout, e))?;

        let status = response.status();
        let final_url = response.url().to_string();

        if !status.is_success() {
            return Err(BrowserError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let html = response
            .text()
            .await
            .map_err(|e| classify_request_error(url, timeout, e))?;

        self.set_document(Some(LoadedDocument {
            url: final_url.clone(),
            html,
        }));

        Ok(Navigation {
            final_url,
            status: status.as_u16(),
            load_time: started.elapsed(),
        })
    }

    async fn content(&self) -> Result<String, BrowserError> {
        if self.is_closed() {
            return Err(BrowserError::PageClosed);
        }

        self.document
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|doc| doc.html.clone())
            .ok_or(BrowserError::NoDocument)
    }

    fn url(&self) -> Option<String> {
        self.document
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|doc| doc.url.clone())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.closed.store(true, Ordering::SeqCst);
        self.set_document(None);
        Ok(())
    }
}

/// Maps a reqwest failure onto the browser error taxonomy
fn classify_request_error(url: &str, timeout: Duration, e: reqwest::Error) -> BrowserError {
    if e.is_timeout() {
        BrowserError::Timeout {
            url: url.to_string(),
            seconds: timeout.as_secs(),
        }
    } else if e.is_connect() {
        BrowserError::Network {
            url: url.to_string(),
            message: "Connection refused".to_string(),
        }
    } else {
        BrowserError::Network {
            url: url.to_string(),
            message: e.to_string(),
        }
    }
}
