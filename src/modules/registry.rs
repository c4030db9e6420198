//! Module registry with round-robin selection

use crate::browser::BrowsingContext;
use crate::modules::{ModuleError, ScraperModule};
use std::collections::BTreeMap;
use std::sync::Arc;

type BuildFn = Box<dyn Fn() -> Result<Box<dyn ScraperModule>, ModuleError> + Send + Sync>;

/// Named constructor for a scraper module
pub struct ModuleFactory {
    name: String,
    build: BuildFn,
}

impl ModuleFactory {
    pub fn new<F>(name: impl Into<String>, build: F) -> Self
    where
        F: Fn() -> Result<Box<dyn ScraperModule>, ModuleError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            build: Box::new(build),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn build(&self) -> Result<Box<dyn ScraperModule>, ModuleError> {
        (self.build)()
    }
}

/// A loaded module and its place in the rotation
pub struct ModuleRecord {
    name: String,
    registration_order: usize,
    instance: Box<dyn ScraperModule>,
}

impl ModuleRecord {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registration_order(&self) -> usize {
        self.registration_order
    }

    pub fn module(&self) -> &dyn ScraperModule {
        self.instance.as_ref()
    }

    pub fn module_mut(&mut self) -> &mut dyn ScraperModule {
        self.instance.as_mut()
    }
}

/// Loaded modules in registration order
///
/// The set is fixed after [`ModuleRegistry::discover`]; only the rotation
/// cursor moves.
pub struct ModuleRegistry {
    records: Vec<ModuleRecord>,
    next_index: usize,
    current: Option<usize>,
}

impl ModuleRegistry {
    /// Builds every factory once
    ///
    /// A factory that fails, or that reuses a name already loaded, is logged
    /// and skipped; the remaining modules still load.
    pub fn discover(factories: impl IntoIterator<Item = ModuleFactory>) -> Self {
        let mut records: Vec<ModuleRecord> = Vec::new();

        for factory in factories {
            if records.iter().any(|r| r.name == factory.name()) {
                tracing::warn!("Skipping duplicate module '{}'", factory.name());
                continue;
            }

            match factory.build() {
                Ok(instance) => {
                    tracing::debug!("Loaded module '{}'", factory.name());
                    records.push(ModuleRecord {
                        name: factory.name,
                        registration_order: records.len(),
                        instance,
                    });
                }
                Err(e) => {
                    tracing::warn!("Failed to load module '{}': {}", factory.name(), e);
                }
            }
        }

        tracing::info!("Discovered {} scraper modules", records.len());

        Self {
            records,
            next_index: 0,
            current: None,
        }
    }

    /// Module names in registration order
    pub fn list(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.iter().any(|r| r.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&ModuleRecord> {
        self.records.iter().find(|r| r.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ModuleRecord> {
        self.records.iter_mut().find(|r| r.name == name)
    }

    /// Advances the rotation, wrapping after the last module
    pub fn next(&mut self) -> Option<&mut ModuleRecord> {
        if self.records.is_empty() {
            return None;
        }
        let index = self.next_index % self.records.len();
        self.next_index = (index + 1) % self.records.len();
        self.current = Some(index);
        self.records.get_mut(index)
    }

    /// The module last returned by [`ModuleRegistry::next`]
    pub fn current(&mut self) -> Option<&mut ModuleRecord> {
        let index = self.current?;
        self.records.get_mut(index)
    }

    pub fn current_name(&self) -> Option<&str> {
        self.current
            .and_then(|index| self.records.get(index))
            .map(|r| r.name.as_str())
    }

    /// Resets the rotation so the next call returns the first module
    pub fn rewind(&mut self) {
        self.next_index = 0;
        self.current = None;
    }

    /// Runs each module's availability check in isolation
    ///
    /// A check that errors is recorded as unavailable.
    pub async fn probe(&mut self, context: &Arc<dyn BrowsingContext>) -> BTreeMap<String, bool> {
        let mut availability = BTreeMap::new();
        for record in &mut self.records {
            let available = match record.instance.is_available(context).await {
                Ok(available) => available,
                Err(e) => {
                    tracing::warn!("Availability check for '{}' failed: {}", record.name, e);
                    false
                }
            };
            availability.insert(record.name.clone(), available);
        }
        availability
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::{FakeLauncher, FakeSite};
    use crate::browser::BrowserLauncher;
    use crate::modules::testing::ScriptedModule;
    use std::sync::Mutex;

    fn registry(names: &[&str]) -> ModuleRegistry {
        let events = Arc::new(Mutex::new(Vec::new()));
        ModuleRegistry::discover(
            names
                .iter()
                .map(|name| ScriptedModule::new(name, events.clone()).factory()),
        )
    }

    #[test]
    fn test_next_visits_each_module_once_then_wraps() {
        let mut registry = registry(&["alpha", "bravo", "charlie"]);

        let mut seen = Vec::new();
        for _ in 0..registry.len() {
            seen.push(registry.next().unwrap().name().to_string());
        }
        assert_eq!(seen, vec!["alpha", "bravo", "charlie"]);

        assert_eq!(registry.next().unwrap().name(), "alpha");
        assert_eq!(registry.current_name(), Some("alpha"));
    }

    #[test]
    fn test_list_keeps_registration_order() {
        let registry = registry(&["zeta", "alpha", "mid"]);
        assert_eq!(registry.list(), vec!["zeta", "alpha", "mid"]);
        assert_eq!(registry.get("mid").unwrap().registration_order(), 2);
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_failing_factory_is_skipped() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let registry = ModuleRegistry::discover(vec![
            ScriptedModule::new("good", events.clone()).factory(),
            ModuleFactory::new("broken", || Err(ModuleError::Load("bad selector".into()))),
            ScriptedModule::new("also_good", events.clone()).factory(),
        ]);

        assert_eq!(registry.list(), vec!["good", "also_good"]);
    }

    #[test]
    fn test_duplicate_names_keep_first() {
        let registry = registry(&["alpha", "alpha", "bravo"]);
        assert_eq!(registry.list(), vec!["alpha", "bravo"]);
    }

    #[test]
    fn test_empty_registry() {
        let mut registry = registry(&[]);
        assert!(registry.is_empty());
        assert!(registry.next().is_none());
        assert!(registry.current().is_none());
    }

    #[test]
    fn test_rewind_restarts_rotation() {
        let mut registry = registry(&["alpha", "bravo"]);
        registry.next();
        registry.rewind();
        assert!(registry.current().is_none());
        assert_eq!(registry.next().unwrap().name(), "alpha");
    }

    #[tokio::test]
    async fn test_probe_records_errors_as_unavailable() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ModuleRegistry::discover(vec![
            ScriptedModule::new("up", events.clone()).factory(),
            ScriptedModule::new("down", events.clone())
                .available(Some(false))
                .factory(),
            ScriptedModule::new("erroring", events.clone())
                .available(None)
                .factory(),
        ]);
        let browser = FakeLauncher::new(FakeSite::new()).launch().await.unwrap();
        let context = browser.new_context().await.unwrap();

        let availability = registry.probe(&context).await;

        assert_eq!(availability.get("up"), Some(&true));
        assert_eq!(availability.get("down"), Some(&false));
        assert_eq!(availability.get("erroring"), Some(&false));
    }
}
