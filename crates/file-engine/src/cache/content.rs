//! Three-store content cache: file bytes, directory listings, metadata.
//!
//! File bytes live in a size-weighted store whose eviction policy belongs to
//! the store itself; callers only observe the capacity bound and hit-rate
//! trends. Directory and metadata entries expire on fixed windows instead,
//! with an eviction listener used solely for counting.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use serde::Serialize;

/// Expiry window for directory listings. Directories change more often
/// than metadata, so this window is the shorter of the two.
pub const DIRECTORY_TTL: Duration = Duration::from_secs(30);

/// Expiry window for metadata entries.
pub const METADATA_TTL: Duration = Duration::from_secs(300);

/// Counter snapshot across all three stores.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub file_hits: u64,
    pub file_misses: u64,
    pub directory_hits: u64,
    pub directory_misses: u64,
    pub metadata_hits: u64,
    pub metadata_misses: u64,
    pub expired_entries: u64,
    pub hit_rate: f64,
}

#[derive(Debug, Default)]
struct Counters {
    file_hits: AtomicU64,
    file_misses: AtomicU64,
    directory_hits: AtomicU64,
    directory_misses: AtomicU64,
    metadata_hits: AtomicU64,
    metadata_misses: AtomicU64,
}

/// Multi-tier content cache.
pub struct ContentCache {
    files: Cache<PathBuf, Arc<[u8]>>,
    directories: Cache<PathBuf, Arc<str>>,
    metadata: Cache<String, Arc<serde_json::Value>>,
    counters: Counters,
    expirations: Arc<AtomicU64>,
}

impl ContentCache {
    /// Creates the cache with the given file-store capacity in bytes.
    pub fn new(capacity_bytes: u64) -> Self {
        let expirations = Arc::new(AtomicU64::new(0));

        let files = Cache::builder()
            .max_capacity(capacity_bytes)
            .weigher(|_key: &PathBuf, value: &Arc<[u8]>| -> u32 {
                value.len().try_into().unwrap_or(u32::MAX)
            })
            .build();

        let dir_expirations = expirations.clone();
        let directories = Cache::builder()
            .time_to_live(DIRECTORY_TTL)
            .eviction_listener(move |_key, _value, _cause| {
                dir_expirations.fetch_add(1, Ordering::Relaxed);
            })
            .build();

        let meta_expirations = expirations.clone();
        let metadata = Cache::builder()
            .time_to_live(METADATA_TTL)
            .eviction_listener(move |_key, _value, _cause| {
                meta_expirations.fetch_add(1, Ordering::Relaxed);
            })
            .build();

        Self {
            files,
            directories,
            metadata,
            counters: Counters::default(),
            expirations,
        }
    }

    // -----------------------------------------------------------------------
    // File bytes
    // -----------------------------------------------------------------------

    pub fn get_file(&self, path: &Path) -> Option<Arc<[u8]>> {
        match self.files.get(path) {
            Some(bytes) => {
                self.counters.file_hits.fetch_add(1, Ordering::Relaxed);
                Some(bytes)
            }
            None => {
                self.counters.file_misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn set_file(&self, path: PathBuf, bytes: Arc<[u8]>) {
        self.files.insert(path, bytes);
    }

    pub fn invalidate_file(&self, path: &Path) {
        self.files.invalidate(path);
    }

    // -----------------------------------------------------------------------
    // Directory listings
    // -----------------------------------------------------------------------

    pub fn get_directory(&self, path: &Path) -> Option<Arc<str>> {
        match self.directories.get(path) {
            Some(listing) => {
                self.counters.directory_hits.fetch_add(1, Ordering::Relaxed);
                Some(listing)
            }
            None => {
                self.counters
                    .directory_misses
                    .fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn set_directory(&self, path: PathBuf, listing: Arc<str>) {
        self.directories.insert(path, listing);
    }

    pub fn invalidate_directory(&self, path: &Path) {
        self.directories.invalidate(path);
    }

    // -----------------------------------------------------------------------
    // Metadata
    // -----------------------------------------------------------------------

    pub fn get_metadata(&self, key: &str) -> Option<Arc<serde_json::Value>> {
        match self.metadata.get(key) {
            Some(value) => {
                self.counters.metadata_hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            None => {
                self.counters
                    .metadata_misses
                    .fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn set_metadata(&self, key: String, value: Arc<serde_json::Value>) {
        self.metadata.insert(key, value);
    }

    pub fn invalidate_metadata(&self, key: &str) {
        self.metadata.invalidate(key);
    }

    // -----------------------------------------------------------------------
    // Accounting
    // -----------------------------------------------------------------------

    /// Combined hit rate across all three stores.
    ///
    /// Returns 0.0 when no accesses have occurred.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.counters.file_hits.load(Ordering::Relaxed)
            + self.counters.directory_hits.load(Ordering::Relaxed)
            + self.counters.metadata_hits.load(Ordering::Relaxed);
        let misses = self.counters.file_misses.load(Ordering::Relaxed)
            + self.counters.directory_misses.load(Ordering::Relaxed)
            + self.counters.metadata_misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            return 0.0;
        }
        hits as f64 / total as f64
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            file_hits: self.counters.file_hits.load(Ordering::Relaxed),
            file_misses: self.counters.file_misses.load(Ordering::Relaxed),
            directory_hits: self.counters.directory_hits.load(Ordering::Relaxed),
            directory_misses: self.counters.directory_misses.load(Ordering::Relaxed),
            metadata_hits: self.counters.metadata_hits.load(Ordering::Relaxed),
            metadata_misses: self.counters.metadata_misses.load(Ordering::Relaxed),
            expired_entries: self.expirations.load(Ordering::Relaxed),
            hit_rate: self.hit_rate(),
        }
    }

    /// Number of live entries in the file store. Pending internal
    /// maintenance is flushed first so the count is current.
    pub fn file_entry_count(&self) -> u64 {
        self.files.run_pending_tasks();
        self.files.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> ContentCache {
        ContentCache::new(1024 * 1024)
    }

    #[test]
    fn hit_rate_is_zero_before_any_access() {
        assert_eq!(cache().hit_rate(), 0.0);
    }

    #[test]
    fn miss_then_hit_accounting() {
        let cache = cache();
        let path = PathBuf::from("/data/a.txt");

        assert!(cache.get_file(&path).is_none());
        cache.set_file(path.clone(), Arc::from(&b"hello"[..]));
        assert!(cache.get_file(&path).is_some());

        let stats = cache.stats();
        assert_eq!(stats.file_hits, 1);
        assert_eq!(stats.file_misses, 1);
        assert_eq!(stats.hit_rate, 0.5);
    }

    #[test]
    fn hit_rate_is_one_when_every_access_hits() {
        let cache = cache();
        let path = PathBuf::from("/data/a.txt");
        cache.set_file(path.clone(), Arc::from(&b"A"[..]));

        assert!(cache.get_file(&path).is_some());
        assert!(cache.get_file(&path).is_some());
        assert_eq!(cache.hit_rate(), 1.0);
    }

    #[test]
    fn a_miss_never_stores_a_negative_marker() {
        let cache = cache();
        let path = PathBuf::from("/data/missing.txt");
        assert!(cache.get_file(&path).is_none());
        // Still a miss: nothing was cached by the failed lookup.
        assert!(cache.get_file(&path).is_none());
        assert_eq!(cache.stats().file_misses, 2);
    }

    #[test]
    fn invalidate_removes_the_entry() {
        let cache = cache();
        let path = PathBuf::from("/data/a.txt");
        cache.set_file(path.clone(), Arc::from(&b"A"[..]));
        cache.invalidate_file(&path);
        assert!(cache.get_file(&path).is_none());
    }

    #[test]
    fn file_store_respects_capacity_bound() {
        // 1 KiB capacity, 512-byte values: only a couple can stay resident.
        let cache = ContentCache::new(1024);
        for i in 0..16 {
            let bytes: Arc<[u8]> = Arc::from(vec![0u8; 512].as_slice());
            cache.set_file(PathBuf::from(format!("/data/{i}.bin")), bytes);
        }
        assert!(cache.file_entry_count() <= 2);
    }

    #[test]
    fn directory_and_metadata_stores_roundtrip() {
        let cache = cache();
        let dir = PathBuf::from("/data");
        cache.set_directory(dir.clone(), Arc::from("[FILE] a.txt"));
        assert_eq!(cache.get_directory(&dir).as_deref(), Some("[FILE] a.txt"));

        cache.set_metadata(
            "stat:/data/a.txt".to_string(),
            Arc::new(serde_json::json!({ "size": 5 })),
        );
        assert!(cache.get_metadata("stat:/data/a.txt").is_some());
        assert!(cache.get_metadata("stat:/data/b.txt").is_none());
    }

    #[test]
    fn combined_hit_rate_spans_categories() {
        let cache = cache();
        let dir = PathBuf::from("/data");
        // One directory miss, one metadata miss, one file miss.
        assert!(cache.get_directory(&dir).is_none());
        assert!(cache.get_metadata("k").is_none());
        assert!(cache.get_file(Path::new("/data/a")).is_none());
        assert_eq!(cache.hit_rate(), 0.0);

        cache.set_directory(dir.clone(), Arc::from("listing"));
        assert!(cache.get_directory(&dir).is_some());
        assert_eq!(cache.hit_rate(), 0.25);
    }
}
