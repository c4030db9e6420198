//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait,
//! and the [`ListingSink`] capability over a mutex-guarded instance.

use crate::modules::ListingRecord;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{ListingSink, Storage, StorageError, StorageResult};
use crate::storage::{ListingRow, ModuleRunRecord, RunRecord, RunStatus};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        // Configure SQLite for better performance
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        config_hash: row.get(3)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(4)?)
            .unwrap_or(RunStatus::Running),
    })
}

impl Storage for SqliteStorage {
    // ===== Run Management =====

    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![now, config_hash, RunStatus::Running.to_db_string()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        self.conn
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, status FROM runs WHERE id = ?1",
                params![run_id],
                run_from_row,
            )
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let run = self
            .conn
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, status FROM runs ORDER BY id DESC LIMIT 1",
                [],
                run_from_row,
            )
            .optional()?;
        Ok(run)
    }

    fn finish_run(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let updated = self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), now, run_id],
        )?;
        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    // ===== Listings =====

    fn upsert_listing(&mut self, record: &ListingRecord) -> StorageResult<()> {
        let fields = serde_json::to_string(&record.fields)?;
        let seen_at = record.scraped_at.to_rfc3339();
        self.conn.execute(
            "INSERT INTO listings (url, module, fields, first_seen_at, last_seen_at, times_seen)
             VALUES (?1, ?2, ?3, ?4, ?4, 1)
             ON CONFLICT(url) DO UPDATE SET
                module = excluded.module,
                fields = excluded.fields,
                last_seen_at = excluded.last_seen_at,
                times_seen = times_seen + 1",
            params![record.url, record.module, fields, seen_at],
        )?;
        Ok(())
    }

    fn get_listing(&self, url: &str) -> StorageResult<Option<ListingRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, url, module, fields, first_seen_at, last_seen_at, times_seen
                 FROM listings WHERE url = ?1",
                params![url],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, u32>(6)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, url, module, fields, first_seen_at, last_seen_at, times_seen)) = row else {
            return Ok(None);
        };

        let fields: BTreeMap<String, String> = serde_json::from_str(&fields)?;
        Ok(Some(ListingRow {
            id,
            url,
            module,
            fields,
            first_seen_at,
            last_seen_at,
            times_seen,
        }))
    }

    fn listing_urls(&self, module: &str) -> StorageResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT url FROM listings WHERE module = ?1 ORDER BY id")?;
        let urls = stmt
            .query_map(params![module], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(urls)
    }

    fn count_listings(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM listings", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    // ===== Module Runs =====

    fn record_module_run(
        &mut self,
        run_id: i64,
        module: &str,
        processed: u64,
    ) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO module_runs (run_id, module, processed, finished_at) VALUES (?1, ?2, ?3, ?4)",
            params![run_id, module, processed as i64, now],
        )?;
        Ok(())
    }

    fn get_module_runs(&self, run_id: i64) -> StorageResult<Vec<ModuleRunRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT run_id, module, processed, finished_at FROM module_runs
             WHERE run_id = ?1 ORDER BY id",
        )?;
        let runs = stmt
            .query_map(params![run_id], |row| {
                Ok(ModuleRunRecord {
                    run_id: row.get(0)?,
                    module: row.get(1)?,
                    processed: row.get::<_, i64>(2)? as u64,
                    finished_at: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }
}

fn lock(storage: &Mutex<SqliteStorage>) -> MutexGuard<'_, SqliteStorage> {
    storage.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl ListingSink for Mutex<SqliteStorage> {
    async fn save(&self, record: &ListingRecord) -> StorageResult<()> {
        lock(self).upsert_listing(record)
    }

    async fn known_urls(&self, module: &str) -> StorageResult<Vec<String>> {
        lock(self).listing_urls(module)
    }

    async fn begin_run(&self, config_hash: &str) -> StorageResult<Option<i64>> {
        lock(self).create_run(config_hash).map(Some)
    }

    async fn record_module_run(
        &self,
        run_id: i64,
        module: &str,
        processed: u64,
    ) -> StorageResult<()> {
        lock(self).record_module_run(run_id, module, processed)
    }

    async fn finish_run(&self, run_id: i64, status: RunStatus) -> StorageResult<()> {
        lock(self).finish_run(run_id, status)
    }
}
