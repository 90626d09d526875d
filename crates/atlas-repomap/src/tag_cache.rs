//! Mtime-validated tag cache.
//!
//! Each file's tags are stored under its relative path together with the
//! modification time they were computed at. A stored record is reused only
//! while the file's current mtime matches exactly; anything else (absence,
//! mismatch, undecodable record) recomputes and overwrites.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::parser::ParseError;
use crate::store::{KvStore, StoreError};
use crate::tags::{Tag, TagExtractor};

/// Stored form of one file's tags.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileRecord {
    mtime_secs: u64,
    mtime_nanos: u32,
    tags: Vec<Tag>,
}

impl FileRecord {
    fn matches(&self, mtime: (u64, u32)) -> bool {
        (self.mtime_secs, self.mtime_nanos) == mtime
    }
}

/// Hit and miss counters for the current process.
///
/// # Examples
///
/// ```
/// use atlas_repomap::tag_cache::CacheStats;
///
/// let stats = CacheStats { hits: 3, misses: 1, entries: Some(4) };
/// assert_eq!(stats.hits + stats.misses, 4);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Stored records, or `None` without a usable store.
    pub entries: Option<usize>,
}

/// Tags per file, persisted across runs and validated by mtime.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use atlas_repomap::parser::TreeSitterParser;
/// use atlas_repomap::store::MemoryStore;
/// use atlas_repomap::tag_cache::TagCache;
/// use atlas_repomap::tags::TagExtractor;
///
/// let dir = tempfile::tempdir().unwrap();
/// std::fs::write(dir.path().join("a.py"), "def helper():\n    pass\n").unwrap();
///
/// let extractor = TagExtractor::new(Arc::new(TreeSitterParser::new()));
/// let cache = TagCache::new(Some(Box::new(MemoryStore::default())), extractor);
///
/// let tags = cache.get(dir.path(), "a.py");
/// assert!(tags.iter().any(|t| t.name == "helper"));
/// assert_eq!(cache.get(dir.path(), "a.py"), tags);
/// assert_eq!(cache.stats().hits, 1);
/// ```
pub struct TagCache {
    store: Option<Box<dyn KvStore>>,
    extractor: TagExtractor,
    repair_attempted: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TagCache {
    /// Create a cache over `store`. With `None`, every lookup re-parses.
    pub fn new(store: Option<Box<dyn KvStore>>, extractor: TagExtractor) -> Self {
        Self {
            store,
            extractor,
            repair_attempted: AtomicBool::new(false),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Tags for `rel_path` under `root`.
    ///
    /// Never fails: a missing or unreadable file yields no tags, and a
    /// failing store degrades to uncached extraction.
    pub fn get(&self, root: &Path, rel_path: &str) -> Vec<Tag> {
        let abs = root.join(rel_path);
        let mtime = match std::fs::metadata(&abs).and_then(|m| m.modified()) {
            Ok(t) => mtime_parts(t),
            Err(e) => {
                tracing::warn!(file = rel_path, error = %e, "cannot stat file, skipping");
                return Vec::new();
            }
        };

        if let Some(record) = self.load(rel_path) {
            if record.matches(mtime) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return record.tags;
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let tags = self.extract(&abs, rel_path);
        let record = FileRecord {
            mtime_secs: mtime.0,
            mtime_nanos: mtime.1,
            tags,
        };
        self.save(rel_path, &record);
        record.tags
    }

    /// Drop the stored record for one file.
    pub fn invalidate(&self, rel_path: &str) {
        if let Some(store) = &self.store {
            if let Err(e) = store.remove(rel_path) {
                self.handle_store_error(&e);
            }
        }
    }

    /// Drop every stored record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend refuses.
    pub fn clear(&self) -> Result<(), StoreError> {
        match &self.store {
            Some(store) => store.clear(),
            None => Ok(()),
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.store.as_ref().and_then(|s| s.len().ok()),
        }
    }

    fn extract(&self, abs: &Path, rel_path: &str) -> Vec<Tag> {
        let bytes = match std::fs::read(abs) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(file = rel_path, error = %e, "cannot read file, skipping");
                return Vec::new();
            }
        };
        // invalid sequences become U+FFFD; the rest of the file still parses
        let content = String::from_utf8_lossy(&bytes);
        match self.extractor.extract(rel_path, &content) {
            Ok(tags) => tags,
            Err(ParseError::Unsupported(lang)) => {
                tracing::debug!(file = rel_path, language = %lang, "no parser for file");
                Vec::new()
            }
            Err(e) => {
                tracing::warn!(file = rel_path, error = %e, "tag extraction failed");
                Vec::new()
            }
        }
    }

    fn load(&self, rel_path: &str) -> Option<FileRecord> {
        let store = self.store.as_ref()?;
        let bytes = match store.get(rel_path) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                self.handle_store_error(&e);
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::debug!(file = rel_path, error = %e, "discarding undecodable cache record");
                None
            }
        }
    }

    fn save(&self, rel_path: &str, record: &FileRecord) {
        let Some(store) = &self.store else {
            return;
        };
        let bytes = match serde_json::to_vec(record) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(file = rel_path, error = %e, "cannot encode cache record");
                return;
            }
        };
        if let Err(e) = store.put(rel_path, &bytes) {
            self.handle_store_error(&e);
        }
    }

    /// Warn, then try one repair per cache lifetime.
    fn handle_store_error(&self, err: &StoreError) {
        tracing::warn!(error = %err, "tag cache store failed, falling back to parsing");
        let Some(store) = &self.store else {
            return;
        };
        if self.repair_attempted.swap(true, Ordering::SeqCst) {
            return;
        }
        match store.repair() {
            Ok(()) => tracing::info!("tag cache store repaired"),
            Err(e) => tracing::warn!(error = %e, "tag cache repair failed"),
        }
    }
}

fn mtime_parts(time: SystemTime) -> (u64, u32) {
    match time.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(d) => (d.as_secs(), d.subsec_nanos()),
        Err(_) => (0, 0),
    }
}
