//! Run state shared between the runner and its control handles

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

/// Lifecycle of the crawl runner
///
/// `Idle -> Starting -> Running -> Stopping -> Idle`; a failed start goes
/// straight back to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Counters kept per module name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleStats {
    /// Listings parsed and handed to storage
    pub total_processed: u64,
    /// When the module last exhausted its listing sequence
    pub last_run: Option<DateTime<Utc>>,
    /// Completed turns
    pub run_count: u64,
}

pub(crate) struct RunShared {
    phase: Mutex<RunPhase>,
    cancel: Mutex<CancellationToken>,
    active_module: Mutex<Option<String>>,
    stats: Mutex<BTreeMap<String, ModuleStats>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RunShared {
    pub(crate) fn new() -> Self {
        Self {
            phase: Mutex::new(RunPhase::Idle),
            cancel: Mutex::new(CancellationToken::new()),
            active_module: Mutex::new(None),
            stats: Mutex::new(BTreeMap::new()),
        }
    }

    /// Moves `Idle -> Starting` and arms a fresh cancellation token
    ///
    /// Returns `Err(phase)` without changing anything when not idle.
    pub(crate) fn begin(&self) -> Result<CancellationToken, RunPhase> {
        let mut phase = lock(&self.phase);
        if *phase != RunPhase::Idle {
            return Err(*phase);
        }
        *phase = RunPhase::Starting;

        let token = CancellationToken::new();
        *lock(&self.cancel) = token.clone();
        Ok(token)
    }

    /// Moves `Starting -> Running`; false if a stop arrived in between
    pub(crate) fn mark_running(&self) -> bool {
        let mut phase = lock(&self.phase);
        if *phase == RunPhase::Starting {
            *phase = RunPhase::Running;
            true
        } else {
            false
        }
    }

    pub(crate) fn request_stop(&self) -> bool {
        let mut phase = lock(&self.phase);
        match *phase {
            RunPhase::Starting | RunPhase::Running => {
                *phase = RunPhase::Stopping;
                lock(&self.cancel).cancel();
                true
            }
            RunPhase::Stopping | RunPhase::Idle => false,
        }
    }

    pub(crate) fn set_phase(&self, next: RunPhase) {
        *lock(&self.phase) = next;
    }

    pub(crate) fn phase(&self) -> RunPhase {
        *lock(&self.phase)
    }

    pub(crate) fn set_active_module(&self, module: Option<&str>) {
        *lock(&self.active_module) = module.map(str::to_string);
    }

    pub(crate) fn active_module(&self) -> Option<String> {
        lock(&self.active_module).clone()
    }

    pub(crate) fn record_processed(&self, module: &str) {
        lock(&self.stats)
            .entry(module.to_string())
            .or_default()
            .total_processed += 1;
    }

    pub(crate) fn complete_module(&self, module: &str) {
        let mut stats = lock(&self.stats);
        let entry = stats.entry(module.to_string()).or_default();
        entry.last_run = Some(Utc::now());
        entry.run_count += 1;
    }

    pub(crate) fn stats(&self) -> BTreeMap<String, ModuleStats> {
        lock(&self.stats).clone()
    }
}

/// Cloneable handle for observing and stopping a runner from other tasks
#[derive(Clone)]
pub struct RunControl {
    shared: Arc<RunShared>,
}

impl RunControl {
    pub(crate) fn new(shared: Arc<RunShared>) -> Self {
        Self { shared }
    }

    /// Requests a graceful stop
    ///
    /// The runner notices at its next listing or module boundary. Calling
    /// this while idle or already stopping does nothing and returns false.
    pub fn stop(&self) -> bool {
        let requested = self.shared.request_stop();
        if requested {
            tracing::info!("Stop requested");
        } else {
            tracing::debug!("Stop ignored in phase {}", self.shared.phase());
        }
        requested
    }

    pub fn phase(&self) -> RunPhase {
        self.shared.phase()
    }

    /// True while starting or running
    pub fn is_running(&self) -> bool {
        matches!(self.phase(), RunPhase::Starting | RunPhase::Running)
    }

    /// Module whose turn is in progress
    pub fn active_module(&self) -> Option<String> {
        self.shared.active_module()
    }

    /// Per-module counters, keyed by module name
    pub fn stats(&self) -> BTreeMap<String, ModuleStats> {
        self.shared.stats()
    }
}
