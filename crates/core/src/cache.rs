use std::{
    collections::{HashMap, HashSet},
    hash::{DefaultHasher, Hash, Hasher},
    path::{Path, PathBuf},
    sync::{
        RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;

use crate::error::Result;

pub fn get_root_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("playlist-finder")
}

/// Get the path of the cache file holding the response for a request key
pub fn get_entry_path(cache_dir: &Path, key: &str) -> PathBuf {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    let key_hash = hasher.finish();

    cache_dir.join(format!("{:016x}.json", key_hash))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub payload: Value,
    pub stored_at: DateTime<Utc>,
    pub ttl_secs: i64,
}

impl CacheEntry {
    /// `None` when the ttl reaches past the representable range.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        TimeDelta::try_seconds(self.ttl_secs).and_then(|ttl| self.stored_at.checked_add_signed(ttl))
    }

    /// An entry is still valid at exactly `stored_at + ttl`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|expires_at| now > expires_at)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub hit_rate: f64,
}

/// TTL-only response cache shared by every request of a run.
///
/// Entries live in memory behind a reader/writer lock and, when a directory is
/// configured, in one JSON file per request key. Reads go memory first, then
/// disk; expired entries are dropped from both on the read that finds them.
pub struct ResponseCache {
    dir: Option<PathBuf>,
    ttl: TimeDelta,
    enabled: bool,
    entries: RwLock<HashMap<String, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    /// Cache persisted under `dir`, created if missing.
    pub async fn new(dir: impl Into<PathBuf>, expire_hours: u64) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        let mut cache = Self::in_memory(hours(expire_hours));
        cache.dir = Some(dir);
        Ok(cache)
    }

    pub fn in_memory(ttl: TimeDelta) -> Self {
        Self {
            dir: None,
            ttl,
            enabled: true,
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// A cache that never stores anything and always misses.
    pub fn disabled() -> Self {
        let mut cache = Self::in_memory(TimeDelta::zero());
        cache.enabled = false;
        cache
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.get_at(key, Utc::now()).await
    }

    pub async fn get_at(&self, key: &str, now: DateTime<Utc>) -> Option<Value> {
        if !self.enabled {
            return None;
        }

        let cached = {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            entries.get(key).cloned()
        };

        let (entry, from_disk) = match cached {
            Some(entry) => (Some(entry), false),
            None => (self.load_from_disk(key).await, true),
        };

        match entry {
            Some(entry) if !entry.is_expired_at(now) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key, from_disk, "cache hit");
                let payload = entry.payload.clone();
                if from_disk {
                    self.entries
                        .write()
                        .unwrap_or_else(|e| e.into_inner())
                        .insert(key.to_string(), entry);
                }
                Some(payload)
            }
            Some(_) => {
                tracing::debug!(key, "cache entry expired");
                self.evict(key).await;
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                tracing::debug!(key, "cache miss");
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub async fn put(&self, key: &str, payload: Value) {
        self.put_at(key, payload, Utc::now()).await
    }

    /// Store a response. Writing the same key twice just replaces the entry.
    pub async fn put_at(&self, key: &str, payload: Value, now: DateTime<Utc>) {
        if !self.enabled {
            return;
        }

        let entry = CacheEntry {
            key: key.to_string(),
            payload,
            stored_at: now,
            ttl_secs: self.ttl.num_seconds(),
        };

        if let Some(dir) = &self.dir {
            let path = get_entry_path(dir, key);
            match serde_json::to_vec(&entry) {
                Ok(bytes) => {
                    if let Err(e) = fs::write(&path, bytes).await {
                        tracing::warn!(path = %path.display(), "failed to write cache entry: {}", e);
                    }
                }
                Err(e) => tracing::warn!(key, "failed to serialize cache entry: {}", e),
            }
        }

        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), entry);
    }

    /// Drop every expired entry, returning how many distinct keys were removed.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut removed: HashSet<String> = {
            let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
            let expired: HashSet<String> = entries
                .iter()
                .filter(|(_, entry)| entry.is_expired_at(now))
                .map(|(key, _)| key.clone())
                .collect();
            entries.retain(|key, _| !expired.contains(key));
            expired
        };

        if let Some(dir) = &self.dir {
            for path in cache_files(dir).await? {
                let Ok(bytes) = fs::read(&path).await else {
                    continue;
                };
                match serde_json::from_slice::<CacheEntry>(&bytes) {
                    Ok(entry) if !entry.is_expired_at(now) => continue,
                    Ok(entry) => {
                        removed.insert(entry.key);
                    }
                    // Unreadable files are dropped as well.
                    Err(_) => {
                        removed.insert(path.display().to_string());
                    }
                }
                fs::remove_file(&path).await?;
            }
        }

        Ok(removed.len())
    }

    /// Remove every entry from memory and disk.
    pub async fn clear(&self) -> Result<usize> {
        let mut removed = {
            let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
            let count = entries.len();
            entries.clear();
            count
        };

        if let Some(dir) = &self.dir {
            let files = cache_files(dir).await?;
            removed = removed.max(files.len());
            for path in files {
                fs::remove_file(&path).await?;
            }
        }

        Ok(removed)
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner()).len();

        CacheStats {
            hits,
            misses,
            entries,
            hit_rate: if total > 0 {
                hits as f64 / total as f64 * 100.0
            } else {
                0.0
            },
        }
    }

    /// Number of entry files persisted under the cache directory.
    pub async fn disk_entries(&self) -> Result<usize> {
        match &self.dir {
            Some(dir) => Ok(cache_files(dir).await?.len()),
            None => Ok(0),
        }
    }

    async fn load_from_disk(&self, key: &str) -> Option<CacheEntry> {
        let dir = self.dir.as_ref()?;
        let bytes = fs::read(get_entry_path(dir, key)).await.ok()?;
        let entry: CacheEntry = serde_json::from_slice(&bytes).ok()?;
        // Different keys can share a file name when their hashes collide.
        (entry.key == key).then_some(entry)
    }

    async fn evict(&self, key: &str) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);

        if let Some(dir) = &self.dir {
            let _ = fs::remove_file(get_entry_path(dir, key)).await;
        }
    }
}

pub(crate) fn hours(expire_hours: u64) -> TimeDelta {
    i64::try_from(expire_hours)
        .ok()
        .and_then(TimeDelta::try_hours)
        .unwrap_or(TimeDelta::MAX)
}

async fn cache_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let Ok(mut entries) = fs::read_dir(dir).await else {
        return Ok(files);
    };

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    Ok(files)
}
