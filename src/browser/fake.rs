//! In-memory browser used by unit tests
//!
//! A [`FakeSite`] maps URLs to canned HTML or failures and records every
//! navigation, page open and close so tests can assert on resource discipline.

use crate::browser::{
    Browser, BrowserError, BrowserLauncher, BrowsingContext, Navigation, Page, PageHandle,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone)]
pub(crate) enum FakeResponse {
    Html(String),
    Fail(BrowserError),
}

#[derive(Default)]
struct FakeSiteState {
    responses: HashMap<String, FakeResponse>,
    visits: Vec<String>,
    pages_opened: usize,
    pages_closed: usize,
    contexts_closed: usize,
    browser_closed: bool,
}

/// Shared, cloneable view of the fake web
#[derive(Clone, Default)]
pub(crate) struct FakeSite {
    state: Arc<Mutex<FakeSiteState>>,
}

impl FakeSite {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn page(&self, url: &str, html: impl Into<String>) -> &Self {
        self.state
            .lock()
            .unwrap()
            .responses
            .insert(url.to_string(), FakeResponse::Html(html.into()));
        self
    }

    pub(crate) fn fail(&self, url: &str, error: BrowserError) -> &Self {
        self.state
            .lock()
            .unwrap()
            .responses
            .insert(url.to_string(), FakeResponse::Fail(error));
        self
    }

    pub(crate) fn visits(&self) -> Vec<String> {
        self.state.lock().unwrap().visits.clone()
    }

    pub(crate) fn pages_opened(&self) -> usize {
        self.state.lock().unwrap().pages_opened
    }

    pub(crate) fn pages_closed(&self) -> usize {
        self.state.lock().unwrap().pages_closed
    }

    pub(crate) fn contexts_closed(&self) -> usize {
        self.state.lock().unwrap().contexts_closed
    }

    pub(crate) fn browser_closed(&self) -> bool {
        self.state.lock().unwrap().browser_closed
    }

    fn navigate(&self, url: &str) -> Result<String, BrowserError> {
        let mut state = self.state.lock().unwrap();
        state.visits.push(url.to_string());
        match state.responses.get(url) {
            Some(FakeResponse::Html(html)) => Ok(html.clone()),
            Some(FakeResponse::Fail(error)) => Err(error.clone()),
            None => Err(BrowserError::HttpStatus {
                url: url.to_string(),
                status: 404,
            }),
        }
    }
}

pub(crate) struct FakeLauncher {
    site: FakeSite,
    fail: bool,
}

impl FakeLauncher {
    pub(crate) fn new(site: FakeSite) -> Self {
        Self { site, fail: false }
    }

    pub(crate) fn failing(site: FakeSite) -> Self {
        Self { site, fail: true }
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self) -> Result<Box<dyn Browser>, BrowserError> {
        if self.fail {
            return Err(BrowserError::Launch("fake launch failure".to_string()));
        }
        Ok(Box::new(FakeBrowser {
            site: self.site.clone(),
            contexts: Mutex::new(Vec::new()),
        }))
    }
}

struct FakeBrowser {
    site: FakeSite,
    contexts: Mutex<Vec<Arc<FakeContext>>>,
}

#[async_trait]
impl Browser for FakeBrowser {
    async fn new_context(&self) -> Result<Arc<dyn BrowsingContext>, BrowserError> {
        let context = Arc::new(FakeContext {
            site: self.site.clone(),
            pages: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        self.contexts.lock().unwrap().push(context.clone());
        Ok(context)
    }

    async fn close(&self) -> Result<(), BrowserError> {
        let contexts: Vec<_> = self.contexts.lock().unwrap().drain(..).collect();
        for context in contexts {
            context.close().await?;
        }
        self.site.state.lock().unwrap().browser_closed = true;
        Ok(())
    }
}

struct FakeContext {
    site: FakeSite,
    pages: Mutex<Vec<Arc<FakePage>>>,
    closed: AtomicBool,
}

#[async_trait]
impl BrowsingContext for FakeContext {
    async fn new_page(&self) -> Result<PageHandle, BrowserError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrowserError::SessionClosed);
        }
        let page = Arc::new(FakePage {
            site: self.site.clone(),
            document: Mutex::new(None),
            closed: AtomicBool::new(false),
        });
        self.pages.lock().unwrap().push(page.clone());
        self.site.state.lock().unwrap().pages_opened += 1;
        Ok(page)
    }

    fn open_pages(&self) -> usize {
        self.pages
            .lock()
            .unwrap()
            .iter()
            .filter(|page| !page.is_closed())
            .count()
    }

    fn reclaim(&self) -> usize {
        let mut pages = self.pages.lock().unwrap();
        let before = pages.len();
        pages.retain(|page| !page.is_closed());
        before - pages.len()
    }

    async fn close(&self) -> Result<(), BrowserError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let pages: Vec<_> = self.pages.lock().unwrap().clone();
        for page in pages {
            page.close().await?;
        }
        self.site.state.lock().unwrap().contexts_closed += 1;
        Ok(())
    }
}

struct FakePage {
    site: FakeSite,
    document: Mutex<Option<(String, String)>>,
    closed: AtomicBool,
}

#[async_trait]
impl Page for FakePage {
    async fn goto(&self, url: &str, _timeout: Duration) -> Result<Navigation, BrowserError> {
        if self.is_closed() {
            return Err(BrowserError::PageClosed);
        }
        *self.document.lock().unwrap() = None;
        let html = self.site.navigate(url)?;
        *self.document.lock().unwrap() = Some((url.to_string(), html));
        Ok(Navigation {
            final_url: url.to_string(),
            status: 200,
            load_time: Duration::ZERO,
        })
    }

    async fn content(&self) -> Result<String, BrowserError> {
        if self.is_closed() {
            return Err(BrowserError::PageClosed);
        }
        self.document
            .lock()
            .unwrap()
            .as_ref()
            .map(|(_, html)| html.clone())
            .ok_or(BrowserError::NoDocument)
    }

    fn url(&self) -> Option<String> {
        self.document
            .lock()
            .unwrap()
            .as_ref()
            .map(|(url, _)| url.clone())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), BrowserError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.site.state.lock().unwrap().pages_closed += 1;
        }
        Ok(())
    }
}
