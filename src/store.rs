// src/store.rs
//! Dedup Store: durable record of items that finished their pipeline run.
//!
//! # Invariants
//! - At most one record per `(source_kind, external_id)`.
//! - A record is never mutated after creation; the only reset is deleting the
//!   database file.
//! - Schema version is tracked via `PRAGMA user_version`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::StoreError;
use crate::ingest::types::ItemKey;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    Delivered,
    /// Deliberately not published (error-page fingerprint or no content).
    Skipped,
    Failed,
}

impl RecordStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "delivered" => Some(Self::Delivered),
            "skipped" => Some(Self::Skipped),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedRecord {
    pub key: ItemKey,
    pub status: RecordStatus,
    pub processed_at: DateTime<Utc>,
}

pub trait DedupStore: Send + Sync {
    fn exists(&self, key: &ItemKey) -> StoreResult<bool>;
    /// Insert unless a record for the key already exists. Returns whether a row was written.
    fn record(&self, record: &ProcessedRecord) -> StoreResult<bool>;
    fn get(&self, key: &ItemKey) -> StoreResult<Option<ProcessedRecord>>;
}

struct Migration {
    version: u32,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    sql: "CREATE TABLE IF NOT EXISTS processed_items (
            source_kind  TEXT NOT NULL,
            external_id  TEXT NOT NULL,
            status       TEXT NOT NULL,
            processed_at TEXT NOT NULL,
            PRIMARY KEY (source_kind, external_id)
          );",
}];

fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}

fn apply_migrations(conn: &mut Connection) -> StoreResult<()> {
    let current: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    let latest = latest_version();
    if current > latest {
        return Err(StoreError::UnsupportedSchemaVersion {
            db_version: current,
            latest_supported: latest,
        });
    }
    if current == latest {
        return Ok(());
    }
    let tx = conn.transaction()?;
    for m in MIGRATIONS.iter().filter(|m| m.version > current) {
        tx.execute_batch(m.sql)?;
        tx.execute_batch(&format!("PRAGMA user_version = {};", m.version))?;
    }
    tx.commit()?;
    Ok(())
}

/// SQLite-backed store. Single writer; the mutex only makes it `Sync`.
pub struct SqliteDedupStore {
    conn: Mutex<Connection>,
}

impl SqliteDedupStore {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let started_at = Instant::now();
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "dedup store open failed");
            StoreError::from(e)
        })?;
        let store = Self::bootstrap(conn)?;
        tracing::info!(
            path = %path.display(),
            duration_ms = started_at.elapsed().as_millis() as u64,
            "dedup store opened"
        );
        Ok(store)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::bootstrap(Connection::open_in_memory()?)
    }

    fn bootstrap(mut conn: Connection) -> StoreResult<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        apply_migrations(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> StoreResult<T>) -> StoreResult<T> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&conn)
    }
}

impl DedupStore for SqliteDedupStore {
    fn exists(&self, key: &ItemKey) -> StoreResult<bool> {
        self.with_conn(|c| {
            let hit = c
                .query_row(
                    "SELECT 1 FROM processed_items WHERE source_kind = ?1 AND external_id = ?2",
                    params![key.source_kind.as_str(), key.external_id],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(hit.is_some())
        })
    }

    fn record(&self, record: &ProcessedRecord) -> StoreResult<bool> {
        self.with_conn(|c| {
            let n = c.execute(
                "INSERT OR IGNORE INTO processed_items (source_kind, external_id, status, processed_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    record.key.source_kind.as_str(),
                    record.key.external_id,
                    record.status.as_str(),
                    record.processed_at.to_rfc3339(),
                ],
            )?;
            Ok(n == 1)
        })
    }

    fn get(&self, key: &ItemKey) -> StoreResult<Option<ProcessedRecord>> {
        self.with_conn(|c| {
            let row = c
                .query_row(
                    "SELECT status, processed_at FROM processed_items
                     WHERE source_kind = ?1 AND external_id = ?2",
                    params![key.source_kind.as_str(), key.external_id],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
                )
                .optional()?;
            let Some((status, processed_at)) = row else {
                return Ok(None);
            };
            let status = RecordStatus::parse(&status)
                .ok_or_else(|| StoreError::InvalidData(format!("status `{status}`")))?;
            let processed_at = DateTime::parse_from_rfc3339(&processed_at)
                .map_err(|e| StoreError::InvalidData(format!("processed_at: {e}")))?
                .with_timezone(&Utc);
            Ok(Some(ProcessedRecord {
                key: key.clone(),
                status,
                processed_at,
            }))
        })
    }
}

/// Reads through to a real store but keeps new records in memory, so a
/// simulation run never consumes items.
pub struct DryRunStore {
    inner: Arc<dyn DedupStore>,
    pending: Mutex<HashMap<ItemKey, ProcessedRecord>>,
}

impl DryRunStore {
    pub fn new(inner: Arc<dyn DedupStore>) -> Self {
        Self {
            inner,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn pending(&self) -> Vec<ProcessedRecord> {
        self.pending
            .lock()
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl DedupStore for DryRunStore {
    fn exists(&self, key: &ItemKey) -> StoreResult<bool> {
        let pending = self.pending.lock().map_err(|_| StoreError::Poisoned)?;
        if pending.contains_key(key) {
            return Ok(true);
        }
        drop(pending);
        self.inner.exists(key)
    }

    fn record(&self, record: &ProcessedRecord) -> StoreResult<bool> {
        if self.inner.exists(&record.key)? {
            return Ok(false);
        }
        let mut pending = self.pending.lock().map_err(|_| StoreError::Poisoned)?;
        if pending.contains_key(&record.key) {
            return Ok(false);
        }
        tracing::info!(key = %record.key, status = record.status.as_str(), "[dry-run] would record");
        pending.insert(record.key.clone(), record.clone());
        Ok(true)
    }

    fn get(&self, key: &ItemKey) -> StoreResult<Option<ProcessedRecord>> {
        if let Some(r) = self
            .pending
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .get(key)
        {
            return Ok(Some(r.clone()));
        }
        self.inner.get(key)
    }
}
