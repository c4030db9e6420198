//! Error classification and escalation
//!
//! Every failure raised anywhere in a run passes through the
//! [`ErrorClassifier`], which:
//! - Buckets failures by `component:kind`
//! - Drops repeats inside a cooldown window and past an hourly budget
//! - Escalates infrastructure-level kinds and noisy components to critical
//! - Persists critical reports to a durable log and forwards them to a notifier

mod classifier;
mod log;
mod notifier;

pub use classifier::{Disposition, ErrorClassifier, ErrorPolicy, ErrorStats};
pub use log::{ErrorLog, ErrorLogEntry};
pub use notifier::{notifier_from_config, LogNotifier, Notifier, WebhookNotifier};

use std::fmt;

/// Coarse failure taxonomy used for dedup keys and escalation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorKind {
    /// A navigation or request exceeded its timeout
    Timeout,
    /// Connection, DNS, TLS or HTTP status failures
    Network,
    /// Selector or extraction failure inside a module
    Parsing,
    /// Browser or browsing context creation/teardown failure
    BrowserSession,
    /// Storage layer gone (disk, file system)
    Storage,
    /// A single persistence operation failed; degraded, not critical by itself
    Database,
    OutOfMemory,
    ModuleNotFound,
    Unknown,
}

impl ErrorKind {
    /// Kinds that are critical no matter how often they occur
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Network | Self::Storage | Self::OutOfMemory | Self::BrowserSession
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::Parsing => "parsing",
            Self::BrowserSession => "browser_session",
            Self::Storage => "storage",
            Self::Database => "database",
            Self::OutOfMemory => "out_of_memory",
            Self::ModuleNotFound => "module_not_found",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error the classifier knows how to bucket
///
/// Errors that cannot tell their kind fall into the `Unknown` bucket.
pub trait Reportable: std::error::Error {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Unknown
    }
}

/// Extra information attached to a report
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// Module that was active when the failure happened
    pub module: Option<String>,
    /// Page or listing being processed
    pub url: Option<String>,
    /// Caller-forced escalation
    pub critical: bool,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }
}
