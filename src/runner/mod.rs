//! Crawl runner
//!
//! Owns one run at a time: opens the persistence sink and browser session,
//! rotates through the queued scraper modules cycle after cycle, and tears the
//! session down once a stop is requested.
//!
//! # Lifecycle
//!
//! `Idle -> Starting -> Running -> Stopping -> Idle`
//!
//! - Persistence is soft: if the sink cannot be opened the failure is reported
//!   and the run continues without storage.
//! - The browser session is hard: if it cannot be created the run fails and
//!   the runner returns to `Idle`.
//! - Stop is cooperative. It is observed before every listing and at every
//!   module boundary, so shutdown waits for at most one listing.

mod control;
mod stats;

pub use control::{ModuleStats, RunControl, RunPhase};
pub use stats::{load_statistics, print_statistics, RunStatistics};

use crate::browser::{BrowserLauncher, BrowserSession, BrowsingContext};
use crate::config::Config;
use crate::errors::{ErrorClassifier, ErrorContext};
use crate::modules::{ModuleRegistry, ScraperModule};
use crate::storage::{ListingSink, RunStatus, SqliteStorage, StorageResult};
use crate::CrawlError;
use control::RunShared;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

type SinkOpener = Box<dyn Fn() -> StorageResult<Arc<dyn ListingSink>> + Send + Sync>;

/// Pacing and bookkeeping settings for a run
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Pause after a module finishes its listing sequence
    pub inter_module_delay: Duration,
    /// Pause between two listings of one module
    pub request_delay: Duration,
    pub database_path: PathBuf,
    /// Stored on the run record
    pub config_hash: String,
}

impl RunSettings {
    pub fn from_config(config: &Config, config_hash: impl Into<String>) -> Self {
        Self {
            inter_module_delay: Duration::from_millis(config.runner.inter_module_delay_ms),
            request_delay: Duration::from_millis(config.runner.request_delay_ms),
            database_path: PathBuf::from(&config.storage.database_path),
            config_hash: config_hash.into(),
        }
    }
}

/// How a module's turn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnOutcome {
    /// The listing sequence ran out
    Exhausted,
    /// Initialization or listing discovery failed
    Aborted,
    /// A stop was observed mid-turn
    Interrupted,
}

/// Drives scraper modules through a shared browser session
pub struct CrawlRunner {
    registry: ModuleRegistry,
    launcher: Arc<dyn BrowserLauncher>,
    errors: Arc<ErrorClassifier>,
    settings: RunSettings,
    open_sink: SinkOpener,
    shared: Arc<RunShared>,
}

impl CrawlRunner {
    /// Creates an idle runner
    ///
    /// Persistence defaults to the SQLite file at `settings.database_path`.
    pub fn new(
        registry: ModuleRegistry,
        launcher: Arc<dyn BrowserLauncher>,
        errors: Arc<ErrorClassifier>,
        settings: RunSettings,
    ) -> Self {
        let database_path = settings.database_path.clone();
        let open_sink: SinkOpener = Box::new(move || {
            let storage = SqliteStorage::new(&database_path)?;
            Ok(Arc::new(Mutex::new(storage)) as Arc<dyn ListingSink>)
        });

        Self {
            registry,
            launcher,
            errors,
            settings,
            open_sink,
            shared: Arc::new(RunShared::new()),
        }
    }

    /// Replaces how the persistence sink is opened at `start`
    pub fn with_sink_opener<F>(mut self, open: F) -> Self
    where
        F: Fn() -> StorageResult<Arc<dyn ListingSink>> + Send + Sync + 'static,
    {
        self.open_sink = Box::new(open);
        self
    }

    /// Handle for stopping the run and reading its state from other tasks
    pub fn control(&self) -> RunControl {
        RunControl::new(Arc::clone(&self.shared))
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn phase(&self) -> RunPhase {
        self.shared.phase()
    }

    /// Per-module counters, keyed by module name
    pub fn stats(&self) -> BTreeMap<String, ModuleStats> {
        self.shared.stats()
    }

    /// Runs until stopped through a [`RunControl`]
    ///
    /// An empty `module_names` queues every registered module. Unknown names
    /// are reported and skipped. Starting while a run is active only logs a
    /// warning.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The run stopped gracefully
    /// * `Err(CrawlError::NoModules)` - Nothing to run
    /// * `Err(CrawlError::Browser)` - The browser session could not be created
    pub async fn start(&mut self, module_names: &[String]) -> Result<(), CrawlError> {
        let cancel = match self.shared.begin() {
            Ok(token) => token,
            Err(phase) => {
                tracing::warn!("Run already {}, ignoring start", phase);
                return Ok(());
            }
        };

        let queue = self.resolve_queue(module_names).await;
        if queue.is_empty() {
            let error = CrawlError::NoModules;
            self.errors
                .report("system", &error, ErrorContext::new())
                .await;
            self.shared.set_phase(RunPhase::Idle);
            return Err(error);
        }
        tracing::info!("Starting run with modules: {}", queue.join(", "));

        let sink = match (self.open_sink)() {
            Ok(sink) => Some(sink),
            Err(e) => {
                self.errors.report("system", &e, ErrorContext::new()).await;
                tracing::warn!("Continuing without persistence");
                None
            }
        };

        let run_id = match &sink {
            Some(sink) => match sink.begin_run(&self.settings.config_hash).await {
                Ok(run_id) => run_id,
                Err(e) => {
                    self.errors.report("database", &e, ErrorContext::new()).await;
                    None
                }
            },
            None => None,
        };

        let session = match BrowserSession::open(self.launcher.as_ref()).await {
            Ok(session) => session,
            Err(e) => {
                self.errors
                    .report("browser", &e, ErrorContext::new().critical())
                    .await;
                self.finish_run(sink.as_ref(), run_id, RunStatus::Failed)
                    .await;
                self.shared.set_phase(RunPhase::Idle);
                return Err(e.into());
            }
        };
        let context = session.context();

        let availability = self.registry.probe(&context).await;
        for (name, available) in &availability {
            if !available && queue.contains(name) {
                tracing::warn!("Module '{}' reports its site as unavailable", name);
            }
        }

        let mut interrupted = false;
        if self.shared.mark_running() {
            tracing::info!("Run started");
            interrupted = self
                .run_cycles(&queue, &session, context, sink.as_ref(), run_id, &cancel)
                .await;
        }

        self.shared.set_phase(RunPhase::Stopping);
        tracing::info!("Stopping run");

        if let Err(e) = session.close().await {
            self.errors.report("browser", &e, ErrorContext::new()).await;
        }

        let status = if interrupted {
            RunStatus::Interrupted
        } else {
            RunStatus::Completed
        };
        self.finish_run(sink.as_ref(), run_id, status).await;

        self.shared.set_active_module(None);
        self.shared.set_phase(RunPhase::Idle);
        tracing::info!("Run stopped");

        Ok(())
    }

    /// Requested names in registry order, or every module if none were given
    async fn resolve_queue(&self, module_names: &[String]) -> Vec<String> {
        if module_names.is_empty() {
            return self.registry.list().into_iter().map(String::from).collect();
        }

        for name in module_names {
            if !self.registry.contains(name) {
                let error = CrawlError::ModuleNotFound { name: name.clone() };
                self.errors
                    .report("system", &error, ErrorContext::new().module(name.as_str()))
                    .await;
            }
        }

        self.registry
            .list()
            .into_iter()
            .filter(|name| module_names.iter().any(|n| n == name))
            .map(String::from)
            .collect()
    }

    /// Repeats cycles over the queue until cancelled
    ///
    /// Returns true if the stop landed in the middle of a module's turn.
    async fn run_cycles(
        &mut self,
        queue: &[String],
        session: &BrowserSession,
        context: Arc<dyn BrowsingContext>,
        sink: Option<&Arc<dyn ListingSink>>,
        run_id: Option<i64>,
        cancel: &CancellationToken,
    ) -> bool {
        let turn = ModuleTurn {
            errors: &self.errors,
            shared: &self.shared,
            context,
            sink,
            run_id,
            request_delay: self.settings.request_delay,
            cancel,
        };
        let inter_module_delay = self.settings.inter_module_delay;

        let mut cycle: u64 = 0;
        while !cancel.is_cancelled() {
            cycle += 1;
            let started = Instant::now();
            self.registry.rewind();

            for _ in 0..self.registry.len() {
                if cancel.is_cancelled() {
                    return false;
                }
                let Some(record) = self.registry.next() else {
                    break;
                };
                if !queue.iter().any(|name| name == record.name()) {
                    continue;
                }

                let name = record.name().to_string();
                match turn.run(&name, record.module_mut()).await {
                    TurnOutcome::Interrupted => return true,
                    TurnOutcome::Exhausted | TurnOutcome::Aborted => {
                        if !pause(cancel, inter_module_delay).await {
                            return false;
                        }
                    }
                }
            }

            let released = session.reclaim();
            tracing::info!(
                "Cycle {} complete in {:.1}s ({} page slots reclaimed)",
                cycle,
                started.elapsed().as_secs_f64(),
                released
            );
            tokio::task::yield_now().await;
        }

        false
    }

    async fn finish_run(
        &self,
        sink: Option<&Arc<dyn ListingSink>>,
        run_id: Option<i64>,
        status: RunStatus,
    ) {
        let (Some(sink), Some(run_id)) = (sink, run_id) else {
            return;
        };
        if let Err(e) = sink.finish_run(run_id, status).await {
            self.errors.report("database", &e, ErrorContext::new()).await;
        }
    }
}

/// Everything one module's turn needs, borrowed from the runner
struct ModuleTurn<'a> {
    errors: &'a ErrorClassifier,
    shared: &'a RunShared,
    context: Arc<dyn BrowsingContext>,
    sink: Option<&'a Arc<dyn ListingSink>>,
    run_id: Option<i64>,
    request_delay: Duration,
    cancel: &'a CancellationToken,
}

impl ModuleTurn<'_> {
    async fn run(&self, name: &str, module: &mut dyn ScraperModule) -> TurnOutcome {
        self.shared.set_active_module(Some(name));
        let started = Instant::now();
        tracing::info!("Starting module '{}'", name);

        if let Err(e) = module
            .initialize(Arc::clone(&self.context), self.sink.cloned())
            .await
        {
            self.errors
                .report("module_init", &e, ErrorContext::new().module(name))
                .await;
            self.cleanup(name, module).await;
            return TurnOutcome::Aborted;
        }

        let mut processed: u64 = 0;
        loop {
            if self.cancel.is_cancelled() {
                tracing::info!(
                    "Interrupting module '{}' after {} listings",
                    name,
                    processed
                );
                self.cleanup(name, module).await;
                return TurnOutcome::Interrupted;
            }

            let url = match module.next_listing().await {
                Some(Ok(url)) => url,
                Some(Err(e)) => {
                    self.errors
                        .report("listing_discovery", &e, ErrorContext::new().module(name))
                        .await;
                    self.cleanup(name, module).await;
                    return TurnOutcome::Aborted;
                }
                None => break,
            };

            match self.process_listing(name, module, &url).await {
                Ok(true) => processed += 1,
                Ok(false) => tracing::debug!("No listing data at {}", url),
                Err(e) => {
                    self.errors
                        .report(
                            "listing_processing",
                            &e,
                            ErrorContext::new().module(name).url(url.as_str()),
                        )
                        .await;
                }
            }

            pause(self.cancel, self.request_delay).await;
        }

        self.cleanup(name, module).await;
        self.shared.complete_module(name);

        if let (Some(sink), Some(run_id)) = (self.sink, self.run_id) {
            if let Err(e) = sink.record_module_run(run_id, name, processed).await {
                self.errors
                    .report("database", &e, ErrorContext::new().module(name))
                    .await;
            }
        }

        tracing::info!(
            "Module '{}' finished: {} listings processed in {:.1}s",
            name,
            processed,
            started.elapsed().as_secs_f64()
        );
        TurnOutcome::Exhausted
    }

    /// Parses one listing and persists it
    ///
    /// Returns whether a record was produced.
    async fn process_listing(
        &self,
        name: &str,
        module: &mut dyn ScraperModule,
        url: &str,
    ) -> Result<bool, CrawlError> {
        let Some(record) = module.parse_listing(url).await? else {
            return Ok(false);
        };

        if let Some(sink) = self.sink {
            sink.save(&record).await?;
        }
        self.shared.record_processed(name);
        Ok(true)
    }

    async fn cleanup(&self, name: &str, module: &mut dyn ScraperModule) {
        if let Err(e) = module.cleanup().await {
            self.errors
                .report("module_cleanup", &e, ErrorContext::new().module(name))
                .await;
        }
    }
}

/// Sleeps for `delay` unless cancelled first; false if cancelled
async fn pause(cancel: &CancellationToken, delay: Duration) -> bool {
    if delay.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
