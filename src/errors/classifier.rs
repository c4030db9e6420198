//! Dedup, rate limiting and escalation of failures
//!
//! # Gate
//!
//! A report with key `component:kind` is dropped when either
//! - the same key was accepted less than `cooldown` ago, or
//! - the component already spent `max_errors_per_hour` reports this window.
//!
//! Dropped reports touch no counter. Accepted reports bump the component's
//! hourly counter and the key's last-seen time, then get classified.
//!
//! # Escalation
//!
//! | Condition | Result |
//! |-----------|--------|
//! | Kind is timeout, network, storage, out-of-memory or browser-session | Critical |
//! | Component's hourly count reached `critical_threshold` | Critical |
//! | Caller set `ErrorContext::critical` | Critical |
//! | Otherwise | Logged only |
//!
//! Critical reports are appended to the durable error log and forwarded to the
//! notifier, once per accepted report.

use crate::config::ErrorPolicyConfig;
use crate::errors::log::{ErrorLog, ErrorLogEntry};
use crate::errors::notifier::Notifier;
use crate::errors::{ErrorContext, ErrorKind, Reportable};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Thresholds driving the gate and escalation rules
#[derive(Debug, Clone)]
pub struct ErrorPolicy {
    pub cooldown: Duration,
    pub max_errors_per_hour: u32,
    pub critical_threshold: u32,
    pub hourly_reset: Duration,
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(300),
            max_errors_per_hour: 50,
            critical_threshold: 10,
            hourly_reset: Duration::from_secs(3600),
        }
    }
}

impl From<&ErrorPolicyConfig> for ErrorPolicy {
    fn from(config: &ErrorPolicyConfig) -> Self {
        Self {
            cooldown: Duration::from_secs(config.cooldown_secs),
            max_errors_per_hour: config.max_errors_per_hour,
            critical_threshold: config.critical_threshold,
            hourly_reset: Duration::from_secs(config.hourly_reset_secs),
        }
    }
}

/// What happened to a single report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Dropped by the cooldown or the hourly budget
    Suppressed,
    /// Accepted, non-critical: logged only
    Logged,
    /// Accepted and critical
    Escalated { notified: bool },
}

/// Point-in-time view of the classifier's counters
#[derive(Debug, Clone, Default)]
pub struct ErrorStats {
    pub hourly_counts: BTreeMap<String, u32>,
    pub critical_keys: BTreeSet<String>,
    pub suppressed: u64,
}

struct ErrorState {
    hourly_count_by_component: HashMap<String, u32>,
    last_seen_at_by_key: HashMap<String, Instant>,
    critical_set: HashSet<String>,
    window_started: Instant,
    suppressed: u64,
}

impl ErrorState {
    fn new(now: Instant) -> Self {
        Self {
            hourly_count_by_component: HashMap::new(),
            last_seen_at_by_key: HashMap::new(),
            critical_set: HashSet::new(),
            window_started: now,
            suppressed: 0,
        }
    }

    /// Clears hourly counters once per elapsed window, keeping windows aligned
    fn roll_window(&mut self, now: Instant, window: Duration) {
        let elapsed = now.duration_since(self.window_started);
        if elapsed >= window {
            let windows = elapsed.as_nanos() / window.as_nanos();
            let skipped = u32::try_from(windows).unwrap_or(u32::MAX);
            self.window_started += window.saturating_mul(skipped);
            self.hourly_count_by_component.clear();
        }
    }
}

/// Accepted report details handed from the gate to the escalation step
struct Admitted {
    hourly_count: u32,
    critical: bool,
}

/// Process-wide error gate; construct once and share behind an `Arc`
pub struct ErrorClassifier {
    policy: ErrorPolicy,
    state: Mutex<ErrorState>,
    notifier: Arc<dyn Notifier>,
    log: Option<ErrorLog>,
}

impl ErrorClassifier {
    pub fn new(policy: ErrorPolicy, notifier: Arc<dyn Notifier>, log: Option<ErrorLog>) -> Self {
        Self {
            policy,
            state: Mutex::new(ErrorState::new(Instant::now())),
            notifier,
            log,
        }
    }

    /// Builds a classifier from the `[errors]` section
    pub fn from_config(config: &ErrorPolicyConfig, notifier: Arc<dyn Notifier>) -> Self {
        Self::new(
            ErrorPolicy::from(config),
            notifier,
            Some(ErrorLog::new(&config.log_path)),
        )
    }

    /// Reports a failure; never fails itself
    ///
    /// The error is rendered before the returned future is created, so the
    /// future does not borrow it.
    pub fn report<'a>(
        &'a self,
        component: &str,
        error: &dyn Reportable,
        context: ErrorContext,
    ) -> impl Future<Output = Disposition> + Send + 'a {
        let kind = error.kind();
        let message = error.to_string();
        self.report_kind(component.to_string(), kind, message, context)
    }

    /// Reports a failure that has no error value, only a kind and a message
    pub async fn report_kind(
        &self,
        component: String,
        kind: ErrorKind,
        message: String,
        context: ErrorContext,
    ) -> Disposition {
        let key = format!("{}:{}", component, kind);

        let admitted = self.admit(&component, &key, kind, context.critical, Instant::now());

        let Some(admitted) = admitted else {
            tracing::warn!(
                suppressed = true,
                component = %component,
                kind = %kind,
                "{}",
                message
            );
            return Disposition::Suppressed;
        };

        if !admitted.critical {
            tracing::warn!(
                component = %component,
                kind = %kind,
                module = context.module.as_deref().unwrap_or("-"),
                url = context.url.as_deref().unwrap_or("-"),
                "{}",
                message
            );
            return Disposition::Logged;
        }

        tracing::error!(
            component = %component,
            kind = %kind,
            module = context.module.as_deref().unwrap_or("-"),
            url = context.url.as_deref().unwrap_or("-"),
            hourly_count = admitted.hourly_count,
            "critical: {}",
            message
        );

        if let Some(log) = &self.log {
            let entry = ErrorLogEntry {
                timestamp: Utc::now(),
                component: component.clone(),
                kind: kind.to_string(),
                message: message.clone(),
                module: context.module.clone(),
                url: context.url.clone(),
                hourly_count: admitted.hourly_count,
            };
            if let Err(e) = log.append(&entry).await {
                tracing::warn!("Failed to write error log {}: {}", log.path().display(), e);
            }
        }

        let alert = format_alert(&component, kind, &message, &context, admitted.hourly_count);
        let notified = self.notifier.send(&alert).await;

        Disposition::Escalated { notified }
    }

    /// Applies the gate and, if admitted, updates counters and escalation state
    fn admit(
        &self,
        component: &str,
        key: &str,
        kind: ErrorKind,
        forced_critical: bool,
        now: Instant,
    ) -> Option<Admitted> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.roll_window(now, self.policy.hourly_reset);

        let count = state
            .hourly_count_by_component
            .get(component)
            .copied()
            .unwrap_or(0);

        let in_cooldown = state
            .last_seen_at_by_key
            .get(key)
            .map(|last| now.duration_since(*last) < self.policy.cooldown)
            .unwrap_or(false);

        if in_cooldown || count >= self.policy.max_errors_per_hour {
            state.suppressed += 1;
            return None;
        }

        let hourly_count = count + 1;
        state
            .hourly_count_by_component
            .insert(component.to_string(), hourly_count);
        state.last_seen_at_by_key.insert(key.to_string(), now);

        let critical = forced_critical
            || kind.is_infrastructure()
            || hourly_count >= self.policy.critical_threshold;

        if critical {
            state.critical_set.insert(key.to_string());
        }

        Some(Admitted {
            hourly_count,
            critical,
        })
    }

    /// Returns whether `component:kind` has ever been escalated
    pub fn is_critical(&self, component: &str, kind: ErrorKind) -> bool {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .critical_set
            .contains(&format!("{}:{}", component, kind))
    }

    pub fn stats(&self) -> ErrorStats {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        ErrorStats {
            hourly_counts: state
                .hourly_count_by_component
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            critical_keys: state.critical_set.iter().cloned().collect(),
            suppressed: state.suppressed,
        }
    }
}

fn format_alert(
    component: &str,
    kind: ErrorKind,
    message: &str,
    context: &ErrorContext,
    hourly_count: u32,
) -> String {
    let mut alert = format!("CRITICAL [{}] {}: {}", component, kind, message);
    if let Some(module) = &context.module {
        alert.push_str(&format!("\nmodule: {}", module));
    }
    if let Some(url) = &context.url {
        alert.push_str(&format!("\nurl: {}", url));
    }
    alert.push_str(&format!("\nerrors this hour: {}", hourly_count));
    alert
}
