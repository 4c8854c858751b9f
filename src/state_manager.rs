// src/state_manager.rs

use crate::models::{DownloadJob, JobId, JobPatch, JobStatus};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_rusqlite::Connection;

const KEY_PREFIX: &str = "download:";

/// Lock entries are swept once the map grows past this many targets.
const LOCK_SWEEP_THRESHOLD: usize = 256;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("database query failed: {0}")]
    Query(#[from] rusqlite::Error),
}

/// A shared key-value store with per-entry expiry. Values are whole-object overwrites.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StateError>;
    async fn put_with_ttl(&self, key: &str, value: String, ttl: Duration) -> Result<(), StateError>;
    async fn delete(&self, key: &str) -> Result<(), StateError>;
}

/// Process-local store. Expired entries are dropped lazily on read.
#[derive(Default)]
pub struct MemoryStore {
    entries: std::sync::Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes every expired entry, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, (_, expires)| *expires > now);
        before - entries.len()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StateError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(key) {
            Some((value, expires)) if *expires > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put_with_ttl(&self, key: &str, value: String, ttl: Duration) -> Result<(), StateError> {
        let expires = Instant::now()
            .checked_add(ttl)
            .unwrap_or_else(|| Instant::now() + Duration::from_secs(u32::MAX as u64));
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), (value, expires));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StateError> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        Ok(())
    }
}

/// SQLite-backed store, for when several worker processes share one state file.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens the database file, creating the table if needed.
    pub async fn open(db_path: &Path) -> Result<Self, StateError> {
        let conn = Connection::open(db_path).await?;
        let store = Self { conn };
        store.setup_database().await?;
        Ok(store)
    }

    pub async fn open_in_memory() -> Result<Self, StateError> {
        let conn = Connection::open_in_memory().await?;
        let store = Self { conn };
        store.setup_database().await?;
        Ok(store)
    }

    async fn setup_database(&self) -> Result<(), StateError> {
        self.conn
            .call(|conn| {
                conn.execute(
                    "CREATE TABLE IF NOT EXISTS job_state (
                        key         TEXT PRIMARY KEY,
                        value       TEXT NOT NULL,
                        expires_at  INTEGER NOT NULL
                    )",
                    [],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Deletes expired rows. Reads already ignore them; this only reclaims space.
    pub async fn purge_expired(&self) -> Result<usize, StateError> {
        let now = Utc::now().timestamp_millis();
        let removed = self
            .conn
            .call(move |conn| {
                let n = conn.execute("DELETE FROM job_state WHERE expires_at <= ?1", params![now])?;
                Ok(n)
            })
            .await?;
        Ok(removed)
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StateError> {
        let key = key.to_string();
        let now = Utc::now().timestamp_millis();
        let value = self
            .conn
            .call(move |conn| {
                let value = conn
                    .query_row(
                        "SELECT value FROM job_state WHERE key = ?1 AND expires_at > ?2",
                        params![key, now],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?;
                Ok(value)
            })
            .await?;
        Ok(value)
    }

    async fn put_with_ttl(&self, key: &str, value: String, ttl: Duration) -> Result<(), StateError> {
        let key = key.to_string();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at = Utc::now().timestamp_millis().saturating_add(ttl_ms);
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO job_state (key, value, expires_at) VALUES (?1, ?2, ?3)",
                    params![key, value, expires_at],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StateError> {
        let key = key.to_string();
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM job_state WHERE key = ?1", params![key])?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

/// Expiry applied to every write, chosen by the record's status.
#[derive(Debug, Clone, Copy)]
pub struct StateTtls {
    pub active: Duration,
    pub error: Duration,
}

impl Default for StateTtls {
    fn default() -> Self {
        Self {
            active: Duration::from_secs(3600),
            error: Duration::from_secs(600),
        }
    }
}

/// Per-target job records on top of a [`KeyValueStore`].
///
/// The raw store only overwrites whole values, so every read-modify-write runs
/// while holding the target's lock (see [`JobStateStore::lock`]).
#[derive(Clone)]
pub struct JobStateStore {
    kv: Arc<dyn KeyValueStore>,
    ttls: StateTtls,
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl JobStateStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, ttls: StateTtls) -> Self {
        Self {
            kv,
            ttls,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn in_memory(ttls: StateTtls) -> Self {
        Self::new(Arc::new(MemoryStore::new()), ttls)
    }

    /// Takes the target's lock. Holders of the slot are the only writers for that target.
    pub async fn lock(&self, target_id: &str) -> TargetSlot<'_> {
        let lock = {
            let mut locks = self.locks.lock().await;
            if locks.len() > LOCK_SWEEP_THRESHOLD {
                locks.retain(|_, l| Arc::strong_count(l) > 1);
            }
            locks
                .entry(target_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        TargetSlot {
            store: self,
            key: format!("{KEY_PREFIX}{target_id}"),
            _guard: lock.lock_owned().await,
        }
    }

    pub async fn get(&self, target_id: &str) -> Result<Option<DownloadJob>, StateError> {
        self.lock(target_id).await.get().await
    }

    pub async fn put(&self, target_id: &str, job: DownloadJob) -> Result<(), StateError> {
        self.lock(target_id).await.put(job).await
    }

    pub async fn delete(&self, target_id: &str) -> Result<(), StateError> {
        self.lock(target_id).await.delete().await
    }

    /// Merges `patch` into the stored record. Returns `false` when no record exists.
    pub async fn update(&self, target_id: &str, patch: &JobPatch) -> Result<bool, StateError> {
        self.lock(target_id).await.update(patch).await
    }

    /// Like [`update`](Self::update) but only applies to the record owned by `job_id`.
    pub async fn update_job(
        &self,
        target_id: &str,
        job_id: &JobId,
        patch: &JobPatch,
    ) -> Result<bool, StateError> {
        self.lock(target_id).await.update_job(job_id, patch).await
    }

    /// Deletes the record only if it still belongs to `job_id`.
    pub async fn delete_job(&self, target_id: &str, job_id: &JobId) -> Result<bool, StateError> {
        self.lock(target_id).await.delete_job(job_id).await
    }

    fn ttl_for(&self, job: &DownloadJob) -> Duration {
        match job.status {
            JobStatus::Error => self.ttls.error,
            _ => self.ttls.active,
        }
    }
}

/// A held per-target lock with access to that target's record.
pub struct TargetSlot<'a> {
    store: &'a JobStateStore,
    key: String,
    _guard: OwnedMutexGuard<()>,
}

impl TargetSlot<'_> {
    pub async fn get(&self) -> Result<Option<DownloadJob>, StateError> {
        match self.store.kv.get(&self.key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn put(&mut self, mut job: DownloadJob) -> Result<(), StateError> {
        let ttl = self.store.ttl_for(&job);
        job.touch(ttl);
        let raw = serde_json::to_string(&job)?;
        self.store.kv.put_with_ttl(&self.key, raw, ttl).await
    }

    pub async fn delete(&mut self) -> Result<(), StateError> {
        self.store.kv.delete(&self.key).await
    }

    pub async fn update(&mut self, patch: &JobPatch) -> Result<bool, StateError> {
        let Some(mut job) = self.get().await? else {
            return Ok(false);
        };
        job.apply(patch);
        self.put(job).await?;
        Ok(true)
    }

    pub async fn update_job(&mut self, job_id: &JobId, patch: &JobPatch) -> Result<bool, StateError> {
        match self.get().await? {
            Some(mut job) if job.job_id == *job_id => {
                job.apply(patch);
                self.put(job).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub async fn delete_job(&mut self, job_id: &JobId) -> Result<bool, StateError> {
        match self.get().await? {
            Some(job) if job.job_id == *job_id => {
                self.delete().await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
