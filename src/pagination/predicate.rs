//! Content predicates deciding whether an index page still has listings

use crate::browser::BrowserError;
use scraper::{Html, Selector};
use std::fmt;
use std::sync::Arc;

/// Result of evaluating a page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContentCheck {
    pub has_content: bool,
    pub count: usize,
}

/// Page-evaluated predicate: receives the parsed document and the page URL
pub type EvaluateFn = Arc<dyn Fn(&Html, &str) -> ContentCheck + Send + Sync>;

#[derive(Clone)]
pub enum ContentPredicate {
    /// Counts elements matching a CSS selector
    Selector(Selector),
    /// Arbitrary evaluation of the loaded document
    Evaluate(EvaluateFn),
}

impl ContentPredicate {
    pub fn selector(css: &str) -> Result<Self, BrowserError> {
        Selector::parse(css)
            .map(Self::Selector)
            .map_err(|e| BrowserError::Selector(format!("{}: {}", css, e)))
    }

    pub fn evaluate<F>(check: F) -> Self
    where
        F: Fn(&Html, &str) -> ContentCheck + Send + Sync + 'static,
    {
        Self::Evaluate(Arc::new(check))
    }

    /// Parses `html` and runs the predicate against it
    ///
    /// Synchronous on purpose: the parsed document is not `Send` and must not
    /// live across an await point.
    pub fn check(&self, html: &str, page_url: &str) -> ContentCheck {
        let document = Html::parse_document(html);
        match self {
            Self::Selector(selector) => {
                let count = document.select(selector).count();
                ContentCheck {
                    has_content: count > 0,
                    count,
                }
            }
            Self::Evaluate(check) => check(&document, page_url),
        }
    }

    /// True iff the page qualifies as non-empty under `min_items`
    pub fn is_non_empty(check: ContentCheck, min_items: usize) -> bool {
        check.has_content && check.count >= min_items
    }
}

impl fmt::Debug for ContentPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Selector(_) => f.write_str("Selector(..)"),
            Self::Evaluate(_) => f.write_str("Evaluate(..)"),
        }
    }
}
