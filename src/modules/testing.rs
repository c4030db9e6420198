//! Scripted module for unit tests
//!
//! Plays back a fixed list of listing URLs and records lifecycle events into a
//! shared log (`init:<name>`, `parse:<url>`, `cleanup:<name>`).

use crate::browser::BrowsingContext;
use crate::modules::{ListingRecord, ModuleError, ModuleFactory, ModuleInfo, ScraperModule};
use crate::storage::ListingSink;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub(crate) type EventLog = Arc<Mutex<Vec<String>>>;

#[derive(Clone)]
pub(crate) struct ScriptedModule {
    name: String,
    listings: Vec<String>,
    failing: HashSet<String>,
    missing: HashSet<String>,
    available: Option<bool>,
    parse_delay: Duration,
    events: EventLog,
    queue: VecDeque<String>,
    initialized: bool,
}

impl ScriptedModule {
    pub(crate) fn new(name: &str, events: EventLog) -> Self {
        Self {
            name: name.to_string(),
            listings: Vec::new(),
            failing: HashSet::new(),
            missing: HashSet::new(),
            available: Some(true),
            parse_delay: Duration::ZERO,
            events,
            queue: VecDeque::new(),
            initialized: false,
        }
    }

    pub(crate) fn listings(mut self, urls: &[&str]) -> Self {
        self.listings = urls.iter().map(|u| u.to_string()).collect();
        self
    }

    /// `parse_listing` fails for `url`
    pub(crate) fn failing(mut self, url: &str) -> Self {
        self.failing.insert(url.to_string());
        self
    }

    /// `parse_listing` returns `Ok(None)` for `url`
    pub(crate) fn missing(mut self, url: &str) -> Self {
        self.missing.insert(url.to_string());
        self
    }

    /// `None` makes the availability check error
    pub(crate) fn available(mut self, available: Option<bool>) -> Self {
        self.available = available;
        self
    }

    pub(crate) fn parse_delay(mut self, delay: Duration) -> Self {
        self.parse_delay = delay;
        self
    }

    pub(crate) fn factory(self) -> ModuleFactory {
        let name = self.name.clone();
        ModuleFactory::new(name, move || Ok(Box::new(self.clone()) as Box<dyn ScraperModule>))
    }

    fn log(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl ScraperModule for ScriptedModule {
    fn info(&self) -> ModuleInfo {
        ModuleInfo {
            name: self.name.clone(),
            base_url: format!("https://{}.test/", self.name),
        }
    }

    async fn initialize(
        &mut self,
        _context: Arc<dyn BrowsingContext>,
        _sink: Option<Arc<dyn ListingSink>>,
    ) -> Result<(), ModuleError> {
        self.log(format!("init:{}", self.name));
        self.queue = self.listings.iter().cloned().collect();
        self.initialized = true;
        Ok(())
    }

    async fn next_listing(&mut self) -> Option<Result<String, ModuleError>> {
        if !self.initialized {
            return Some(Err(ModuleError::NotInitialized));
        }
        self.queue.pop_front().map(Ok)
    }

    async fn parse_listing(&mut self, url: &str) -> Result<Option<ListingRecord>, ModuleError> {
        if !self.parse_delay.is_zero() {
            tokio::time::sleep(self.parse_delay).await;
        }
        self.log(format!("parse:{}", url));

        if self.failing.contains(url) {
            return Err(ModuleError::Parse {
                url: url.to_string(),
                message: "scripted failure".to_string(),
            });
        }
        if self.missing.contains(url) {
            return Ok(None);
        }

        let mut fields = BTreeMap::new();
        fields.insert("title".to_string(), format!("ad at {}", url));
        Ok(Some(ListingRecord {
            module: self.name.clone(),
            url: url.to_string(),
            fields,
            scraped_at: Utc::now(),
        }))
    }

    async fn cleanup(&mut self) -> Result<(), ModuleError> {
        self.log(format!("cleanup:{}", self.name));
        self.queue.clear();
        self.initialized = false;
        Ok(())
    }

    async fn is_available(
        &mut self,
        _context: &Arc<dyn BrowsingContext>,
    ) -> Result<bool, ModuleError> {
        self.available
            .ok_or_else(|| ModuleError::Unavailable(format!("{} probe failed", self.name)))
    }
}
