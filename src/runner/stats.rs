//! Run statistics
//!
//! Gathers the runner's per-module counters, the error classifier's counters
//! and the storage totals into one summary printed at shutdown.

use crate::errors::ErrorStats;
use crate::runner::ModuleStats;
use crate::storage::Storage;
use std::collections::BTreeMap;

/// Crawl statistics summary
#[derive(Debug, Clone)]
pub struct RunStatistics {
    pub modules: BTreeMap<String, ModuleStats>,
    pub errors: ErrorStats,
    /// Distinct listings in storage; `None` when storage was unavailable
    pub stored_listings: Option<u64>,
}

impl RunStatistics {
    pub fn total_processed(&self) -> u64 {
        self.modules.values().map(|m| m.total_processed).sum()
    }
}

/// Loads statistics from the run and, if available, from storage
///
/// A storage failure is logged and leaves `stored_listings` empty; the run's
/// own counters are always returned.
///
/// # Arguments
///
/// * `modules` - Per-module counters from the runner
/// * `errors` - Snapshot of the error classifier
/// * `storage` - The storage backend to query, if it could be opened
pub fn load_statistics(
    modules: BTreeMap<String, ModuleStats>,
    errors: ErrorStats,
    storage: Option<&dyn Storage>,
) -> RunStatistics {
    let stored_listings = storage.and_then(|storage| match storage.count_listings() {
        Ok(count) => Some(count),
        Err(e) => {
            tracing::warn!("Failed to count stored listings: {}", e);
            None
        }
    });

    RunStatistics {
        modules,
        errors,
        stored_listings,
    }
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &RunStatistics) {
    println!("=== Crawl Statistics ===\n");

    println!("Overview:");
    println!("  Listings processed this run: {}", stats.total_processed());
    match stats.stored_listings {
        Some(count) => println!("  Listings in storage: {}", count),
        None => println!("  Listings in storage: unavailable"),
    }
    println!();

    if !stats.modules.is_empty() {
        println!("Modules:");
        for (name, module) in &stats.modules {
            let last_run = module
                .last_run
                .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_else(|| "never completed".to_string());
            println!(
                "  {}: {} processed, {} turns, last run {}",
                name, module.total_processed, module.run_count, last_run
            );
        }
        println!();
    }

    if !stats.errors.hourly_counts.is_empty() || stats.errors.suppressed > 0 {
        println!("Errors (current hour):");
        let mut counts: Vec<_> = stats.errors.hourly_counts.iter().collect();
        counts.sort_by(|a, b| b.1.cmp(a.1));
        for (component, count) in counts {
            println!("  {}: {}", component, count);
        }
        println!("  Suppressed reports: {}", stats.errors.suppressed);
        println!();
    }

    if !stats.errors.critical_keys.is_empty() {
        println!("Critical ({}):", stats.errors.critical_keys.len());
        for key in &stats.errors.critical_keys {
            println!("  - {}", key);
        }
        println!();
    }
}
