//! Persistent translation cache.
//!
//! Entries are keyed by `(normalized text, source language, target language)`
//! and stored as one JSON document that is replaced atomically on every
//! write. Hit/miss counters live only as long as the process.

use crate::error::DubsubError;
use crate::storage::write_atomic;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

const CACHE_FORMAT_VERSION: u32 = 1;

/// Trim the text and collapse every whitespace run into one space.
///
/// Case and punctuation are kept. This rule is part of the on-disk format:
/// changing it orphans every stored entry.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Identity of one translation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    #[serde(rename = "source")]
    pub text: String,
    pub source_lang: String,
    pub target_lang: String,
}

impl CacheKey {
    pub fn new(text: &str, source_lang: &str, target_lang: &str) -> Self {
        Self {
            text: normalize_text(text),
            source_lang: source_lang.trim().to_ascii_lowercase(),
            target_lang: target_lang.trim().to_ascii_lowercase(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    #[serde(flatten)]
    pub key: CacheKey,
    pub translation: String,
    /// Seconds since the Unix epoch.
    pub created_at: u64,
}

#[derive(Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    entries: Vec<CacheEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub entry_count: usize,
    pub hit_count: u64,
    pub miss_count: u64,
}

/// Thread-safe translation cache shared by every cue of a run.
pub struct TranslationCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    path: Option<PathBuf>,
    /// Serializes snapshot+write so an older snapshot never lands last.
    persist_lock: Mutex<()>,
    /// Set after a persistence failure; the cache then stays in memory.
    degraded: AtomicBool,
    io_error: Mutex<Option<String>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TranslationCache {
    /// Cache that never touches the disk.
    pub fn in_memory() -> Self {
        Self::with_entries(None, HashMap::new())
    }

    /// Open the cache file at `path`, creating it lazily on first write.
    ///
    /// A file that cannot be read or parsed is left untouched: the cache
    /// starts empty and runs in memory only, and the failure is reported
    /// through [`TranslationCache::io_error`].
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();

        match load_entries(&path) {
            Ok(entries) => {
                info!(
                    "Translation cache: {} entries from {}",
                    entries.len(),
                    path.display()
                );
                Self::with_entries(Some(path), entries)
            }
            Err(e) => {
                warn!("{}; continuing with an in-memory cache", e);
                let cache = Self::with_entries(Some(path), HashMap::new());
                cache.degrade(e.to_string());
                cache
            }
        }
    }

    fn with_entries(path: Option<PathBuf>, entries: HashMap<CacheKey, CacheEntry>) -> Self {
        Self {
            entries: RwLock::new(entries),
            path,
            persist_lock: Mutex::new(()),
            degraded: AtomicBool::new(false),
            io_error: Mutex::new(None),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self, key: &CacheKey) -> Option<String> {
        let found = self.read().get(key).map(|e| e.translation.clone());
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Upsert one translation and persist before returning.
    pub fn put(&self, key: CacheKey, translation: impl Into<String>) {
        self.put_many(vec![(key, translation.into())]);
    }

    /// Upsert several translations with a single write to disk.
    pub fn put_many(&self, items: Vec<(CacheKey, String)>) {
        if items.is_empty() {
            return;
        }

        let created_at = now_secs();
        {
            let mut entries = self.write();
            for (key, translation) in items {
                entries.insert(
                    key.clone(),
                    CacheEntry {
                        key,
                        translation,
                        created_at,
                    },
                );
            }
        }
        self.persist();
    }

    /// Write the current entries to disk.
    pub fn flush(&self) -> crate::error::Result<()> {
        self.persist();
        match self.io_error() {
            Some(e) => Err(DubsubError::CacheIo(e)),
            None => Ok(()),
        }
    }

    /// Remove every entry, on disk too. Returns the number removed.
    pub fn clear(&self) -> crate::error::Result<usize> {
        let removed = {
            let mut entries = self.write();
            let n = entries.len();
            entries.clear();
            n
        };
        if let Some(path) = &self.path {
            let _guard = lock(&self.persist_lock);
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(DubsubError::CacheIo(e.to_string())),
            }
        }
        Ok(removed)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.read().len(),
            hit_count: self.hits.load(Ordering::Relaxed),
            miss_count: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Distinct `(source, target)` pairs present in the cache.
    pub fn language_pairs(&self) -> Vec<(String, String)> {
        self.read()
            .keys()
            .map(|k| (k.source_lang.clone(), k.target_lang.clone()))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// First persistence failure seen, if any.
    pub fn io_error(&self) -> Option<String> {
        lock(&self.io_error).clone()
    }

    pub fn is_persistent(&self) -> bool {
        self.path.is_some() && !self.degraded.load(Ordering::SeqCst)
    }

    fn persist(&self) {
        let Some(path) = &self.path else {
            return;
        };
        if self.degraded.load(Ordering::SeqCst) {
            return;
        }

        let _guard = lock(&self.persist_lock);
        let mut entries: Vec<CacheEntry> = self.read().values().cloned().collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        let file = CacheFile {
            version: CACHE_FORMAT_VERSION,
            entries,
        };

        let result = serde_json::to_vec_pretty(&file)
            .map_err(|e| e.to_string())
            .and_then(|bytes| write_atomic(path, &bytes).map_err(|e| e.to_string()));

        match result {
            Ok(()) => debug!("Persisted {} cache entries", file.entries.len()),
            Err(e) => {
                let message = format!("failed to write {}: {}", path.display(), e);
                warn!("Translation cache {}; continuing in memory only", message);
                self.degrade(message);
            }
        }
    }

    fn degrade(&self, message: String) {
        self.degraded.store(true, Ordering::SeqCst);
        let mut slot = lock(&self.io_error);
        if slot.is_none() {
            *slot = Some(message);
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn load_entries(path: &Path) -> Result<HashMap<CacheKey, CacheEntry>, DubsubError> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => {
            return Err(DubsubError::CacheIo(format!(
                "cannot read {}: {}",
                path.display(),
                e
            )))
        }
    };

    let file: CacheFile = serde_json::from_slice(&bytes).map_err(|e| {
        DubsubError::CacheIo(format!("cannot parse {}: {}", path.display(), e))
    })?;

    if file.version != CACHE_FORMAT_VERSION {
        return Err(DubsubError::CacheIo(format!(
            "{} has unsupported version {}",
            path.display(),
            file.version
        )));
    }

    Ok(file
        .entries
        .into_iter()
        .map(|e| (e.key.clone(), e))
        .collect())
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
