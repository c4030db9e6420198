//! Browser session capability
//!
//! The crawler never talks to a browser engine directly. It goes through four
//! small traits:
//! - [`BrowserLauncher`] starts a [`Browser`] process
//! - [`Browser`] hands out [`BrowsingContext`]s
//! - [`BrowsingContext`] hands out [`Page`]s and can release closed ones
//! - [`Page`] navigates and exposes the loaded document
//!
//! [`BrowserSession`] bundles one browser with its one context, which is all a
//! run ever uses. The shipped backend lives in [`http`].

#[cfg(test)]
pub(crate) mod fake;
mod http;

pub use http::{build_http_client, HttpBrowser, HttpContext, HttpLauncher, HttpPage};

use crate::errors::{ErrorKind, Reportable};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Shared handle to an open page
pub type PageHandle = Arc<dyn Page>;

/// Errors raised by browser sessions and pages
#[derive(Debug, Clone, Error)]
pub enum BrowserError {
    #[error("Failed to launch browser: {0}")]
    Launch(String),

    #[error("Browser session is closed")]
    SessionClosed,

    #[error("Page is closed")]
    PageClosed,

    #[error("Navigation to {url} timed out after {seconds}s")]
    Timeout { url: String, seconds: u64 },

    #[error("Network error for {url}: {message}")]
    Network { url: String, message: String },

    #[error("HTTP {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Navigation to {url} refused: {reason}")]
    Refused { url: String, reason: String },

    #[error("Page has no loaded document")]
    NoDocument,

    #[error("Invalid selector '{0}'")]
    Selector(String),
}

impl Reportable for BrowserError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Launch(_) | Self::SessionClosed | Self::PageClosed => ErrorKind::BrowserSession,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Network { .. } | Self::HttpStatus { .. } | Self::Refused { .. } => {
                ErrorKind::Network
            }
            Self::NoDocument | Self::Selector(_) => ErrorKind::Parsing,
        }
    }
}

/// Outcome of a successful navigation
#[derive(Debug, Clone)]
pub struct Navigation {
    /// URL after redirects
    pub final_url: String,
    pub status: u16,
    pub load_time: Duration,
}

/// Starts browser processes
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn Browser>, BrowserError>;
}

/// A running browser process
#[async_trait]
pub trait Browser: Send + Sync {
    /// Opens a logical browsing context (cookie jar, cache, tabs)
    async fn new_context(&self) -> Result<Arc<dyn BrowsingContext>, BrowserError>;

    /// Shuts the browser down, closing every context it still has
    async fn close(&self) -> Result<(), BrowserError>;
}

/// One logical browsing context shared by every module of a run
#[async_trait]
pub trait BrowsingContext: Send + Sync {
    async fn new_page(&self) -> Result<PageHandle, BrowserError>;

    /// Number of pages opened in this context and not yet closed
    fn open_pages(&self) -> usize;

    /// Releases bookkeeping held for closed or dropped pages
    ///
    /// Returns how many page slots were released.
    fn reclaim(&self) -> usize;

    /// Closes the context and every page still open in it
    async fn close(&self) -> Result<(), BrowserError>;
}

/// A single tab
#[async_trait]
pub trait Page: Send + Sync {
    /// Navigates to `url`, failing if the load exceeds `timeout`
    async fn goto(&self, url: &str, timeout: Duration) -> Result<Navigation, BrowserError>;

    /// HTML of the currently loaded document
    async fn content(&self) -> Result<String, BrowserError>;

    /// URL of the currently loaded document
    fn url(&self) -> Option<String>;

    fn is_closed(&self) -> bool;

    async fn close(&self) -> Result<(), BrowserError>;
}

/// The browser process and browsing context owned by one run
pub struct BrowserSession {
    browser: Box<dyn Browser>,
    context: Arc<dyn BrowsingContext>,
}

impl BrowserSession {
    /// Launches a browser and opens its browsing context
    ///
    /// If the context cannot be created the browser is shut down again before
    /// the error is returned.
    pub async fn open(launcher: &dyn BrowserLauncher) -> Result<Self, BrowserError> {
        let browser = launcher.launch().await?;

        let context = match browser.new_context().await {
            Ok(context) => context,
            Err(e) => {
                if let Err(close_err) = browser.close().await {
                    tracing::warn!("Failed to close browser after context error: {}", close_err);
                }
                return Err(e);
            }
        };

        Ok(Self { browser, context })
    }

    pub fn context(&self) -> Arc<dyn BrowsingContext> {
        Arc::clone(&self.context)
    }

    /// Memory reclamation pass over the browsing context
    pub fn reclaim(&self) -> usize {
        let released = self.context.reclaim();
        tracing::debug!(
            "Reclaimed {} page slots ({} pages still open)",
            released,
            self.context.open_pages()
        );
        released
    }

    /// Closes the context, then the browser; both are attempted even if the
    /// first fails. Pages closed along with the context are reclaimed.
    pub async fn close(self) -> Result<(), BrowserError> {
        let context_result = self.context.close().await;
        self.reclaim();
        let browser_result = self.browser.close().await;
        context_result.and(browser_result)
    }
}

#[cfg(test)]
mod tests {
    use super::fake::{FakeLauncher, FakeSite};
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            BrowserError::Timeout {
                url: "u".into(),
                seconds: 1
            }
            .kind(),
            ErrorKind::Timeout
        );
        assert_eq!(
            BrowserError::HttpStatus {
                url: "u".into(),
                status: 503
            }
            .kind(),
            ErrorKind::Network
        );
        assert_eq!(
            BrowserError::Launch("no chrome".into()).kind(),
            ErrorKind::BrowserSession
        );
        assert_eq!(BrowserError::NoDocument.kind(), ErrorKind::Parsing);
    }

    #[tokio::test]
    async fn test_session_close_closes_open_pages() {
        let site = FakeSite::new();
        let launcher = FakeLauncher::new(site.clone());

        let session = BrowserSession::open(&launcher).await.unwrap();
        let page = session.context().new_page().await.unwrap();
        assert_eq!(session.context().open_pages(), 1);

        session.close().await.unwrap();

        assert!(page.is_closed());
        assert!(site.browser_closed());
    }

    #[tokio::test]
    async fn test_session_open_propagates_launch_failure() {
        let launcher = FakeLauncher::failing(FakeSite::new());
        let result = BrowserSession::open(&launcher).await;
        assert!(matches!(result, Err(BrowserError::Launch(_))));
    }

    #[tokio::test]
    async fn test_reclaim_releases_closed_pages() {
        let launcher = FakeLauncher::new(FakeSite::new());
        let session = BrowserSession::open(&launcher).await.unwrap();

        let first = session.context().new_page().await.unwrap();
        let _second = session.context().new_page().await.unwrap();
        first.close().await.unwrap();

        assert_eq!(session.reclaim(), 1);
        assert_eq!(session.context().open_pages(), 1);
    }

    #[tokio::test]
    async fn test_close_reclaims_pages_it_closed() {
        let site = FakeSite::new();
        let session = BrowserSession::open(&FakeLauncher::new(site.clone()))
            .await
            .unwrap();
        let context = session.context();
        let _first = context.new_page().await.unwrap();
        let _second = context.new_page().await.unwrap();

        session.close().await.unwrap();

        assert_eq!(site.pages_closed(), 2);
        assert_eq!(context.open_pages(), 0);
        // Nothing left for a later pass
        assert_eq!(context.reclaim(), 0);
    }
}
