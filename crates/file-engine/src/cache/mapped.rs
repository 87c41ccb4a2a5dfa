//! Reference-counted memory-mapped cache for large files.
//!
//! Entries hold a mapping of the file's full contents and a reference count
//! of live [`MappedBuffer`]s. Buffers release their reference on drop, so
//! the count always reflects outstanding holders. An entry with a non-zero
//! reference count is never evicted: when the cache is full, the
//! least-recently-used zero-reference entry goes first, and if every entry
//! is referenced the insert is rejected with `CacheFull`.

use std::collections::HashMap;
use std::fs::File;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use memmap2::Mmap;
use parking_lot::Mutex;

use crate::error::{EngineError, Result};

/// Maximum number of entries held at once.
pub const DEFAULT_MAPPED_ENTRIES: usize = 32;

#[derive(Clone)]
enum MappedData {
    Mapped(Arc<Mmap>),
    /// Fallback for files that cannot be mapped (empty files, filesystems
    /// without mmap support).
    Owned(Arc<[u8]>),
}

impl MappedData {
    fn as_slice(&self) -> &[u8] {
        match self {
            Self::Mapped(mmap) => &mmap[..],
            Self::Owned(bytes) => &bytes[..],
        }
    }
}

struct Slot {
    data: MappedData,
    len: u64,
    refs: u32,
    last_access: Instant,
}

/// A borrowed view of a cached file's bytes.
///
/// Holds one reference on the cache entry; the reference is released when
/// the buffer is dropped. Holders must not keep buffers alive across an
/// `invalidate` of the same path.
pub struct MappedBuffer {
    data: MappedData,
    _guard: ReleaseGuard,
}

impl Deref for MappedBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.data.as_slice()
    }
}

impl AsRef<[u8]> for MappedBuffer {
    fn as_ref(&self) -> &[u8] {
        self.data.as_slice()
    }
}

struct ReleaseGuard {
    cache: Arc<MappedFileCache>,
    path: PathBuf,
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.cache.release(&self.path);
    }
}

/// Entry-count-bounded cache of memory-mapped file contents.
pub struct MappedFileCache {
    max_entries: usize,
    inner: Mutex<HashMap<PathBuf, Slot>>,
}

impl MappedFileCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached contents of `path`, mapping the file on first
    /// access. Bumps the entry's reference count; the returned buffer
    /// releases it on drop.
    pub fn read(self: &Arc<Self>, path: &Path) -> Result<MappedBuffer> {
        if let Some(buffer) = self.acquire_cached(path) {
            return Ok(buffer);
        }

        // Mapping happens outside the lock.
        let (data, len) = map_or_read(path)?;

        let mut map = self.inner.lock();
        // Another task may have inserted while we were mapping.
        if let Some(slot) = map.get_mut(path) {
            slot.refs += 1;
            slot.last_access = Instant::now();
            let data = slot.data.clone();
            drop(map);
            return Ok(self.buffer(path, data));
        }

        if map.len() >= self.max_entries {
            evict_one(&mut map, path)?;
        }

        map.insert(
            path.to_path_buf(),
            Slot {
                data: data.clone(),
                len,
                refs: 1,
                last_access: Instant::now(),
            },
        );
        drop(map);

        log::debug!("mapped {} ({len} bytes)", path.display());
        Ok(self.buffer(path, data))
    }

    /// Removes and drops the entry unconditionally, regardless of its
    /// reference count. Dropping the slot closes the underlying mapping
    /// once the last outstanding buffer goes away.
    pub fn invalidate(&self, path: &Path) {
        self.inner.lock().remove(path);
    }

    pub fn entry_count(&self) -> usize {
        self.inner.lock().len()
    }

    fn acquire_cached(self: &Arc<Self>, path: &Path) -> Option<MappedBuffer> {
        let mut map = self.inner.lock();
        let slot = map.get_mut(path)?;
        slot.refs += 1;
        slot.last_access = Instant::now();
        let data = slot.data.clone();
        drop(map);
        Some(self.buffer(path, data))
    }

    fn buffer(self: &Arc<Self>, path: &Path, data: MappedData) -> MappedBuffer {
        MappedBuffer {
            data,
            _guard: ReleaseGuard {
                cache: self.clone(),
                path: path.to_path_buf(),
            },
        }
    }

    fn release(&self, path: &Path) {
        if let Some(slot) = self.inner.lock().get_mut(path) {
            slot.refs = slot.refs.saturating_sub(1);
        }
    }

    #[cfg(test)]
    fn refs(&self, path: &Path) -> Option<u32> {
        self.inner.lock().get(path).map(|slot| slot.refs)
    }
}

/// Evicts the least-recently-used zero-reference entry.
///
/// Fails with `CacheFull` when every entry is referenced; a referenced
/// entry is never evicted.
fn evict_one(map: &mut HashMap<PathBuf, Slot>, inserting: &Path) -> Result<()> {
    let victim = map
        .iter()
        .filter(|(_, slot)| slot.refs == 0)
        .min_by_key(|(_, slot)| slot.last_access)
        .map(|(path, _)| path.clone());

    match victim {
        Some(path) => {
            log::debug!("evicting mapped entry {}", path.display());
            map.remove(&path);
            Ok(())
        }
        None => Err(EngineError::CacheFull(inserting.to_path_buf())),
    }
}

fn map_or_read(path: &Path) -> Result<(MappedData, u64)> {
    let file = File::open(path)?;
    let len = file.metadata()?.len();

    if len > 0 {
        // SAFETY: the mapping is read-only; concurrent writers go through
        // temp-file-plus-rename, so the mapped inode is never truncated in
        // place underneath us.
        match unsafe { Mmap::map(&file) } {
            Ok(mmap) => return Ok((MappedData::Mapped(Arc::new(mmap)), len)),
            Err(error) => {
                log::debug!(
                    "mmap failed for {}, falling back to read: {error}",
                    path.display()
                );
            }
        }
    }

    let bytes = std::fs::read(path)?;
    Ok((MappedData::Owned(bytes.into()), len))
}
