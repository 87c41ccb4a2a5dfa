//! Shared filesystem helpers: atomic writes, binary detection, listing
//! rendering.

use std::fs::Metadata;
use std::io::Write;
use std::path::Path;

use crate::error::{EngineError, Result};

/// Sample size for the binary heuristic (8 KiB).
pub const BINARY_SAMPLE_BYTES: usize = 8 * 1024;

/// NUL bytes above this share of the sample classify a file as binary.
const BINARY_NUL_PERCENT: usize = 1;

/// Persists `bytes` to `path` atomically.
///
/// Writes to a uniquely named temporary sibling in the target directory,
/// then renames over the original. Concurrent writers to the same path each
/// get their own temp file, so readers observe one writer's bytes in full,
/// never a mixture. On rename failure the temporary file is removed before
/// the error is surfaced.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).ok_or_else(|| {
        EngineError::Internal(format!(
            "cannot write to a path without a parent directory: {}",
            path.display()
        ))
    })?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".fileward-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;

    // NamedTempFile removes the temp file on drop, which covers the
    // rename-failure cleanup path.
    tmp.persist(path).map_err(|error| {
        log::warn!(
            "atomic rename failed for {}: {}",
            path.display(),
            error.error
        );
        EngineError::Io(error.error)
    })?;

    Ok(())
}

/// Null-byte ratio heuristic over the leading sample of a file.
pub fn looks_binary(bytes: &[u8]) -> bool {
    let sample = &bytes[..bytes.len().min(BINARY_SAMPLE_BYTES)];
    if sample.is_empty() {
        return false;
    }
    let nuls = memchr::memchr_iter(0, sample).count();
    nuls * 100 > sample.len() * BINARY_NUL_PERCENT
}

/// Renders one directory entry line for a listing string.
pub fn listing_line(name: &str, metadata: &Metadata) -> String {
    if metadata.is_dir() {
        format!("[DIR]  {name}")
    } else {
        format!("[FILE] {name} ({} bytes)", metadata.len())
    }
}
