//! The file-access engine.
//!
//! Every public operation follows the same shape: acquire an admission
//! permit, resolve the path through the guard, then either serve from the
//! content cache (read/list) or mutate and invalidate (write/edit/replace).
//! Metrics are recorded when the permit drops. File I/O never runs while a
//! cache lock is held.

use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::cache::{ContentCache, MappedBuffer, MappedFileCache, DEFAULT_MAPPED_ENTRIES};
use crate::config::EngineConfig;
use crate::edit::{self, EditResult};
use crate::error::{EngineError, Result};
use crate::fsio;
use crate::gate::AdmissionGate;
use crate::guard::PathGuard;
use crate::metrics::{EngineMetrics, MetricsSnapshot, OpKind, REFRESH_INTERVAL};
use crate::protocol::ProtocolAdapter;
use crate::replace::{self, ReplaceReport};
use crate::watcher::{WatchCallback, WatchRegistry};

/// Files at or above this size are served through the mapped cache (256 KiB).
pub const LARGE_FILE_BYTES: u64 = 256 * 1024;

/// Bytes returned by a read, either from the content cache or the mapped
/// cache.
pub enum FileContent {
    Buffered(Arc<[u8]>),
    Mapped(MappedBuffer),
}

impl Deref for FileContent {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Self::Buffered(bytes) => bytes,
            Self::Mapped(buffer) => buffer,
        }
    }
}

impl AsRef<[u8]> for FileContent {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

/// Admission-controlled, cached file-access engine.
pub struct FileEngine {
    config: EngineConfig,
    guard: PathGuard,
    cache: Arc<ContentCache>,
    mapped: Arc<MappedFileCache>,
    gate: AdmissionGate,
    metrics: Arc<EngineMetrics>,
    watcher: Arc<WatchRegistry>,
    protocol: ProtocolAdapter,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

impl FileEngine {
    /// Builds the engine, validating the configuration once.
    ///
    /// Must be called within a tokio runtime: the metrics refresh and
    /// watcher dispatch tasks are spawned here.
    pub fn new(config: EngineConfig) -> Result<Arc<Self>> {
        config.validate()?;

        let metrics = Arc::new(EngineMetrics::new());
        let engine = Arc::new(Self {
            guard: PathGuard::new(&config.allowed_roots),
            cache: Arc::new(ContentCache::new(config.cache_capacity_bytes)),
            mapped: Arc::new(MappedFileCache::new(DEFAULT_MAPPED_ENTRIES)),
            gate: AdmissionGate::new(config.parallelism, metrics.clone()),
            protocol: ProtocolAdapter::new(config.binary_threshold),
            watcher: Arc::new(WatchRegistry::new()),
            metrics,
            config,
            refresh_task: Mutex::new(None),
        });

        let metrics = engine.metrics.clone();
        let refresh = tokio::spawn(async move {
            let mut interval = tokio::time::interval(REFRESH_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                metrics.refresh();
            }
        });
        *engine.refresh_task.lock() = Some(refresh);

        log::info!(
            "engine started (parallelism {}, cache {} bytes, binary threshold {} bytes)",
            engine.config.parallelism,
            engine.config.cache_capacity_bytes,
            engine.config.binary_threshold
        );
        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The protocol adapter applied at the outer response boundary.
    pub fn protocol(&self) -> &ProtocolAdapter {
        &self.protocol
    }

    /// Reads a file, serving from cache when possible. Large files go
    /// through the mapped cache instead of the content cache.
    pub async fn read(&self, path: impl AsRef<Path>) -> Result<FileContent> {
        let _permit = self.gate.acquire(OpKind::Read).await?;
        let path = self.guard.resolve(path.as_ref())?;

        if let Some(bytes) = self.cache.get_file(&path) {
            return Ok(FileContent::Buffered(bytes));
        }

        let key = size_key(&path);
        let file_size = match self.cache.get_metadata(&key).and_then(|v| v.as_u64()) {
            Some(size) => size,
            None => {
                let size = tokio::fs::metadata(&path).await?.len();
                self.cache
                    .set_metadata(key, Arc::new(serde_json::Value::from(size)));
                size
            }
        };
        if file_size >= LARGE_FILE_BYTES {
            let mapped = self.mapped.clone();
            let target = path.clone();
            let buffer = spawn_fs(move || mapped.read(&target)).await?;
            return Ok(FileContent::Mapped(buffer));
        }

        let bytes: Arc<[u8]> = tokio::fs::read(&path).await?.into();
        self.cache.set_file(path, bytes.clone());
        Ok(FileContent::Buffered(bytes))
    }

    /// Writes a file atomically and refreshes the cache entry.
    pub async fn write(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) -> Result<()> {
        let _permit = self.gate.acquire(OpKind::Write).await?;
        let path = self.guard.resolve(path.as_ref())?;
        let bytes = content.into();

        let target = path.clone();
        let to_write = bytes.clone();
        spawn_fs(move || fsio::atomic_write(&target, &to_write)).await?;

        // Write-through: a present entry reflects the last successful write.
        let size = bytes.len() as u64;
        self.cache.set_file(path.clone(), bytes.into());
        self.cache
            .set_metadata(size_key(&path), Arc::new(serde_json::Value::from(size)));
        if let Some(parent) = path.parent() {
            self.cache.invalidate_directory(parent);
        }
        self.mapped.invalidate(&path);
        Ok(())
    }

    /// Lists a directory as a pre-rendered string, cached with a short
    /// expiry window.
    pub async fn list(&self, path: impl AsRef<Path>) -> Result<Arc<str>> {
        let _permit = self.gate.acquire(OpKind::List).await?;
        let path = self.guard.resolve(path.as_ref())?;

        if let Some(listing) = self.cache.get_directory(&path) {
            return Ok(listing);
        }

        let mut entries = Vec::new();
        let mut reader = tokio::fs::read_dir(&path).await?;
        while let Some(entry) = reader.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            match entry.metadata().await {
                Ok(metadata) => entries.push((name.clone(), fsio::listing_line(&name, &metadata))),
                Err(error) => {
                    // Entries can vanish between readdir and stat.
                    log::debug!("stat failed while listing {name}: {error}");
                }
            }
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let listing: Arc<str> = entries
            .into_iter()
            .map(|(_, line)| line)
            .collect::<Vec<_>>()
            .join("\n")
            .into();
        self.cache.set_directory(path, listing.clone());
        Ok(listing)
    }

    /// Applies an intelligent text replacement and persists it atomically.
    ///
    /// The cache entry is invalidated only after the rename succeeds.
    pub async fn edit(
        &self,
        path: impl AsRef<Path>,
        old_text: &str,
        new_text: &str,
    ) -> Result<EditResult> {
        let _permit = self.gate.acquire(OpKind::Edit).await?;
        let path = self.guard.resolve(path.as_ref())?;

        let metadata = tokio::fs::metadata(&path).await?;
        if metadata.is_dir() {
            return Err(EngineError::NotEditable(path));
        }
        if metadata.len() > edit::MAX_EDIT_BYTES {
            return Err(EngineError::FileTooLarge(path));
        }

        let bytes = tokio::fs::read(&path).await?;
        let content = String::from_utf8_lossy(&bytes);
        let result = edit::apply(&content, old_text, new_text)?;

        let target = path.clone();
        let to_write = result.content.clone().into_bytes();
        spawn_fs(move || fsio::atomic_write(&target, &to_write)).await?;

        self.invalidate_after_mutation(&path);
        Ok(result)
    }

    /// Pattern substitution over a file or directory tree.
    pub async fn search_and_replace(
        &self,
        path: impl AsRef<Path>,
        pattern: &str,
        replacement: &str,
        case_sensitive: bool,
    ) -> Result<ReplaceReport> {
        let _permit = self.gate.acquire(OpKind::Replace).await?;
        let path = self.guard.resolve(path.as_ref())?;
        let re = replace::compile_pattern(pattern, case_sensitive)?;

        let target = path.clone();
        let replacement = replacement.to_string();
        let report = spawn_fs(move || replace::run(&target, &re, &replacement)).await?;

        for modified in &report.modified_paths {
            self.invalidate_after_mutation(modified);
        }
        Ok(report)
    }

    /// Current metrics, including the combined cache hit rate.
    pub fn stats(&self) -> MetricsSnapshot {
        self.metrics
            .snapshot(self.cache.stats(), self.mapped.entry_count())
    }

    /// Registers a cache-invalidation watch on a path, so external changes
    /// under it drop stale entries.
    pub fn watch_for_invalidation(&self, path: &Path) -> Result<()> {
        let path = self.guard.resolve(path)?;
        let cache = self.cache.clone();
        let mapped = self.mapped.clone();
        let callback: WatchCallback = Arc::new(move |changed: &Path, _kind| {
            cache.invalidate_file(changed);
            cache.invalidate_metadata(&size_key(changed));
            cache.invalidate_directory(changed);
            if let Some(parent) = changed.parent() {
                cache.invalidate_directory(parent);
            }
            mapped.invalidate(changed);
        });
        self.watcher.register(&path, callback)
    }

    /// Stops accepting work and tears down background tasks. Operations
    /// already admitted run to completion.
    pub fn shutdown(&self) {
        self.gate.close();
        self.watcher.close();
        if let Some(handle) = self.refresh_task.lock().take() {
            handle.abort();
        }
        log::info!("engine shut down");
    }

    fn invalidate_after_mutation(&self, path: &Path) {
        self.cache.invalidate_file(path);
        self.cache.invalidate_metadata(&size_key(path));
        if let Some(parent) = path.parent() {
            self.cache.invalidate_directory(parent);
        }
        self.mapped.invalidate(path);
    }
}

fn size_key(path: &Path) -> String {
    format!("size:{}", path.display())
}

impl Drop for FileEngine {
    fn drop(&mut self) {
        if let Some(handle) = self.refresh_task.lock().take() {
            handle.abort();
        }
    }
}

async fn spawn_fs<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|error| EngineError::Internal(format!("filesystem task failed: {error}")))?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_for(root: &Path) -> Arc<FileEngine> {
        FileEngine::new(EngineConfig {
            allowed_roots: vec![root.to_path_buf()],
            ..EngineConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn write_then_read_roundtrips_and_hits_cache() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_for(dir.path());
        let path = dir.path().join("a.txt");

        engine.write(&path, "A").await.unwrap();
        let first = engine.read(&path).await.unwrap();
        assert_eq!(&first[..], b"A");
        let second = engine.read(&path).await.unwrap();
        assert_eq!(&second[..], b"A");

        let stats = engine.stats();
        assert_eq!(stats.cache.file_hits, 2);
        assert_eq!(stats.cache.file_misses, 0);
        assert_eq!(stats.cache.hit_rate, 1.0);
    }

    #[tokio::test]
    async fn read_outside_roots_is_denied_without_io() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_for(dir.path());

        let escape = dir.path().join("../outside.txt");
        assert!(matches!(
            engine.read(&escape).await,
            Err(EngineError::AccessDenied(_))
        ));
        assert!(matches!(
            engine.write("/etc/fileward-test", "x").await,
            Err(EngineError::AccessDenied(_))
        ));
    }

    #[tokio::test]
    async fn list_renders_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_for(dir.path());
        tokio::fs::create_dir(dir.path().join("sub")).await.unwrap();
        engine.write(dir.path().join("b.txt"), "bb").await.unwrap();

        let listing = engine.list(dir.path()).await.unwrap();
        assert!(listing.contains("[FILE] b.txt (2 bytes)"));
        assert!(listing.contains("[DIR]  sub"));

        let again = engine.list(dir.path()).await.unwrap();
        assert_eq!(listing, again);
        assert_eq!(engine.stats().cache.directory_hits, 1);
    }

    #[tokio::test]
    async fn write_invalidates_parent_listing() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_for(dir.path());

        engine.write(dir.path().join("a.txt"), "1").await.unwrap();
        let before = engine.list(dir.path()).await.unwrap();
        assert!(!before.contains("new.txt"));

        engine.write(dir.path().join("new.txt"), "2").await.unwrap();
        let after = engine.list(dir.path()).await.unwrap();
        assert!(after.contains("new.txt"));
    }

    #[tokio::test]
    async fn edit_applies_and_invalidates_only_after_rename() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_for(dir.path());
        let path = dir.path().join("code.txt");
        engine.write(&path, "foo foo baz").await.unwrap();

        let result = engine.edit(&path, "foo", "bar").await.unwrap();
        assert_eq!(result.content, "bar bar baz");
        assert_eq!(result.replacements, 2);

        let read_back = engine.read(&path).await.unwrap();
        assert_eq!(&read_back[..], b"bar bar baz");
    }

    #[tokio::test]
    async fn failed_edit_leaves_content_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_for(dir.path());
        let path = dir.path().join("code.txt");
        engine.write(&path, "stable content").await.unwrap();

        assert!(matches!(
            engine.edit(&path, "zzz", "yyy").await,
            Err(EngineError::NoMatch)
        ));
        let read_back = engine.read(&path).await.unwrap();
        assert_eq!(&read_back[..], b"stable content");
    }

    #[tokio::test]
    async fn editing_a_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_for(dir.path());
        assert!(matches!(
            engine.edit(dir.path(), "a", "b").await,
            Err(EngineError::NotEditable(_))
        ));
    }

    #[tokio::test]
    async fn large_files_go_through_the_mapped_cache() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_for(dir.path());
        let path = dir.path().join("large.bin");
        let content = vec![b'x'; LARGE_FILE_BYTES as usize];
        engine.write(&path, content.clone()).await.unwrap();
        // Writing populated the content cache; drop that entry so the read
        // takes the large-file route.
        engine.cache.invalidate_file(&path);

        let read = engine.read(&path).await.unwrap();
        assert!(matches!(&read, FileContent::Mapped(_)));
        assert_eq!(read.len(), content.len());
        assert_eq!(engine.stats().mapped_entries, 1);
    }

    #[tokio::test]
    async fn search_and_replace_reports_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_for(dir.path());
        engine.write(dir.path().join("a.txt"), "old old").await.unwrap();
        engine.write(dir.path().join("b.txt"), "old").await.unwrap();

        let report = engine
            .search_and_replace(dir.path(), "old", "new", true)
            .await
            .unwrap();
        assert_eq!(report.files_modified, 2);
        assert_eq!(report.total_replacements, 3);

        let a = engine.read(dir.path().join("a.txt")).await.unwrap();
        assert_eq!(&a[..], b"new new");
    }

    #[tokio::test]
    async fn shutdown_cancels_new_operations() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_for(dir.path());
        engine.shutdown();
        assert!(matches!(
            engine.read(dir.path().join("a.txt")).await,
            Err(EngineError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn concurrent_same_path_writes_never_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_for(dir.path());
        let path = dir.path().join("contended.txt");

        let a = vec![b'A'; 64 * 1024];
        let b = vec![b'B'; 64 * 1024];
        let (ra, rb) = tokio::join!(
            engine.write(&path, a.clone()),
            engine.write(&path, b.clone())
        );
        ra.unwrap();
        rb.unwrap();

        let content = tokio::fs::read(&path).await.unwrap();
        assert!(content == a || content == b, "observed a mixed write");
    }

    #[tokio::test]
    async fn external_change_invalidates_via_watcher() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_for(dir.path());
        let path = dir.path().join("watched.txt");
        engine.write(&path, "v1").await.unwrap();
        engine.watch_for_invalidation(dir.path()).unwrap();

        // Mutate behind the engine's back.
        std::fs::write(&path, "v2").unwrap();

        // The watcher event arrives asynchronously; poll until the cache
        // serves the new content.
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        loop {
            let content = engine.read(&path).await.unwrap();
            if &content[..] == b"v2" {
                break;
            }
            assert!(
                std::time::Instant::now() < deadline,
                "cache never observed the external change"
            );
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
    }
}
