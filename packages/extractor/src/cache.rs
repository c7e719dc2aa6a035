//! Content-addressed cache of extraction results.
//!
//! Entries are keyed by a SHA-256 digest of the model, the broker and the
//! normalized document text, so a re-run on identical input never calls the
//! LLM again while the entry is fresh.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::error::{ExtractionError, Result};
use crate::types::FeeRecord;

/// Source of the current time, in seconds since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now_secs(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now_secs: i64) -> Self {
        Self {
            now: AtomicI64::new(now_secs),
        }
    }

    pub fn set(&self, now_secs: i64) {
        self.now.store(now_secs, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(secs_i64(by), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_secs(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now_secs(&self) -> i64 {
        (**self).now_secs()
    }
}

fn secs_i64(d: Duration) -> i64 {
    i64::try_from(d.as_secs()).unwrap_or(i64::MAX)
}

/// Hex SHA-256 key of an extraction input.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key for extracting `broker` fees from `text` with `model`.
    ///
    /// Line endings and trailing whitespace do not affect the key.
    pub fn for_input(model: &str, broker: &str, text: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(model.as_bytes());
        hasher.update(b"\n");
        hasher.update(broker.as_bytes());
        hasher.update(b"\n");
        hasher.update(normalize_text(text).as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn normalize_text(text: &str) -> String {
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Storage for deduplicated extraction results.
///
/// Failures are logged and reported as misses; a broken cache never breaks
/// an extraction.
pub trait RecordCache: Send + Sync {
    fn get(&self, key: &CacheKey) -> Option<Vec<FeeRecord>>;
    fn put(&self, key: &CacheKey, records: &[FeeRecord]);
}

#[derive(Deserialize)]
struct CacheEntry {
    records: Vec<FeeRecord>,
    stored_at: i64,
}

#[derive(Serialize)]
struct CacheEntryRef<'a> {
    records: &'a [FeeRecord],
    stored_at: i64,
}

fn is_expired(stored_at: i64, now: i64, ttl: Duration) -> bool {
    now.saturating_sub(stored_at) > secs_i64(ttl)
}

/// One JSON file per key under a directory.
#[derive(Debug)]
pub struct FileCache<C: Clock = SystemClock> {
    dir: PathBuf,
    ttl: Duration,
    clock: C,
}

impl FileCache<SystemClock> {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(&config.dir, config.ttl, SystemClock)
    }
}

impl<C: Clock> FileCache<C> {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration, clock: C) -> Self {
        Self {
            dir: dir.into(),
            ttl,
            clock,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the entry file for `key`.
    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    fn read_entry(path: &Path) -> Result<CacheEntry> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn write_entry(&self, key: &CacheKey, records: &[FeeRecord]) -> Result<()> {
        fs::create_dir_all(&self.dir)?;

        let entry = CacheEntryRef {
            records,
            stored_at: self.clock.now_secs(),
        };
        let content = serde_json::to_vec(&entry)?;

        let target = self.entry_path(key);
        let temp = self.dir.join(format!(".{key}.{}.tmp", uuid::Uuid::new_v4()));

        let written = (|| -> Result<()> {
            let mut file = File::create(&temp)?;
            file.write_all(&content)?;
            file.sync_all()?;
            fs::rename(&temp, &target)?;
            Ok(())
        })();

        if written.is_err() {
            let _ = fs::remove_file(&temp);
        }
        written
    }

    /// Entry files in the cache directory; a missing directory has none.
    fn entry_files(&self) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ExtractionError::Cache(format!("{}: {e}", self.dir.display()))),
        };

        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Delete entries whose TTL has passed; returns how many were removed.
    ///
    /// Unreadable entries are left alone.
    pub fn purge_expired(&self) -> Result<usize> {
        let now = self.clock.now_secs();
        let mut removed = 0;

        for path in self.entry_files()? {
            match Self::read_entry(&path) {
                Ok(entry) if is_expired(entry.stored_at, now, self.ttl) => {
                    match fs::remove_file(&path) {
                        Ok(()) => removed += 1,
                        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove expired cache entry"),
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable cache entry"),
            }
        }

        debug!(dir = %self.dir.display(), removed, "purged expired cache entries");
        Ok(removed)
    }

    /// Delete every entry; returns how many were removed.
    pub fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        for path in self.entry_files()? {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove cache entry"),
            }
        }
        Ok(removed)
    }
}

impl<C: Clock> RecordCache for FileCache<C> {
    fn get(&self, key: &CacheKey) -> Option<Vec<FeeRecord>> {
        let path = self.entry_path(key);
        if !path.exists() {
            return None;
        }

        let entry = match Self::read_entry(&path) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(%key, path = %path.display(), error = %e, "ignoring unreadable cache entry");
                return None;
            }
        };

        if is_expired(entry.stored_at, self.clock.now_secs(), self.ttl) {
            debug!(%key, "cache entry expired");
            return None;
        }

        Some(entry.records)
    }

    fn put(&self, key: &CacheKey, records: &[FeeRecord]) {
        match self.write_entry(key, records) {
            Ok(()) => debug!(%key, records = records.len(), "cached extraction result"),
            Err(e) => warn!(%key, error = %e, "failed to write cache entry"),
        }
    }
}

/// Process-local cache with the same expiry rules as [`FileCache`].
#[derive(Debug)]
pub struct MemoryCache<C: Clock = SystemClock> {
    entries: Mutex<HashMap<CacheKey, (i64, Vec<FeeRecord>)>>,
    ttl: Duration,
    clock: C,
}

impl MemoryCache<SystemClock> {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, SystemClock)
    }
}

impl<C: Clock> MemoryCache<C> {
    pub fn with_clock(ttl: Duration, clock: C) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<C: Clock> RecordCache for MemoryCache<C> {
    fn get(&self, key: &CacheKey) -> Option<Vec<FeeRecord>> {
        let entries = self.entries.lock().ok()?;
        let (stored_at, records) = entries.get(key)?;
        if is_expired(*stored_at, self.clock.now_secs(), self.ttl) {
            return None;
        }
        Some(records.clone())
    }

    fn put(&self, key: &CacheKey, records: &[FeeRecord]) {
        match self.entries.lock() {
            Ok(mut entries) => {
                entries.insert(key.clone(), (self.clock.now_secs(), records.to_vec()));
            }
            Err(e) => warn!(%key, error = %e, "memory cache lock poisoned"),
        }
    }
}
