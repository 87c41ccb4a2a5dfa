//! Caching layers.
//!
//! - `content` - three-store content cache (file bytes, directory listings,
//!   metadata) with hit/miss accounting
//! - `mapped` - reference-counted memory-mapped cache for large files

mod content;
mod mapped;

pub use content::{CacheStats, ContentCache};
pub use mapped::{MappedBuffer, MappedFileCache, DEFAULT_MAPPED_ENTRIES};
