//! Storage traits and error types
//!
//! [`Storage`] is the synchronous backend interface; [`ListingSink`] is the
//! async persistence capability handed to the runner and to scraper modules.

use crate::errors::{ErrorKind, Reportable};
use crate::modules::ListingRecord;
use crate::storage::{ListingRow, ModuleRunRecord, RunRecord, RunStatus};
use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl Reportable for StorageError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) => ErrorKind::Storage,
            _ => ErrorKind::Database,
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
pub trait Storage {
    // ===== Run Management =====

    /// Creates a new crawl run
    ///
    /// # Arguments
    ///
    /// * `config_hash` - Hash of the configuration file
    ///
    /// # Returns
    ///
    /// The ID of the newly created run
    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64>;

    /// Gets a run by ID
    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Gets the most recent run
    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>>;

    /// Sets the final status and finish timestamp of a run
    fn finish_run(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()>;

    // ===== Listings =====

    /// Inserts a listing or refreshes the stored copy of its URL
    ///
    /// Re-saving a URL replaces its fields, bumps `last_seen_at` and
    /// increments `times_seen`.
    fn upsert_listing(&mut self, record: &ListingRecord) -> StorageResult<()>;

    fn get_listing(&self, url: &str) -> StorageResult<Option<ListingRow>>;

    /// Every stored listing URL for a module
    fn listing_urls(&self, module: &str) -> StorageResult<Vec<String>>;

    fn count_listings(&self) -> StorageResult<u64>;

    // ===== Module Runs =====

    /// Records that a module finished its listing sequence within a run
    fn record_module_run(&mut self, run_id: i64, module: &str, processed: u64)
        -> StorageResult<()>;

    fn get_module_runs(&self, run_id: i64) -> StorageResult<Vec<ModuleRunRecord>>;
}

/// Persistence capability used while crawling
///
/// Only `save` is required; the bookkeeping methods default to no-ops so
/// lightweight sinks can skip them.
#[async_trait]
pub trait ListingSink: Send + Sync {
    async fn save(&self, record: &ListingRecord) -> StorageResult<()>;

    /// URLs already stored for `module`, used to skip known listings
    async fn known_urls(&self, _module: &str) -> StorageResult<Vec<String>> {
        Ok(Vec::new())
    }

    /// Opens a run record, returning its id
    async fn begin_run(&self, _config_hash: &str) -> StorageResult<Option<i64>> {
        Ok(None)
    }

    async fn record_module_run(
        &self,
        _run_id: i64,
        _module: &str,
        _processed: u64,
    ) -> StorageResult<()> {
        Ok(())
    }

    async fn finish_run(&self, _run_id: i64, _status: RunStatus) -> StorageResult<()> {
        Ok(())
    }
}
