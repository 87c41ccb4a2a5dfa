//! Local file-access engine for assistant tool layers.
//!
//! This crate provides the core engine functionality:
//! - Admission-controlled read/write/list/edit/replace operations
//! - Multi-tier content caching with a mapped fast path for large files
//! - Fuzzy text replacement with confidence tiers and atomic persistence
//! - Adaptive response encoding (plain, compressed, binary framing)
//! - Filesystem watching for external cache invalidation

pub mod cache;
pub mod config;
pub mod edit;
pub mod engine;
pub mod error;
pub mod fsio;
pub mod gate;
pub mod guard;
pub mod metrics;
pub mod protocol;
pub mod replace;
pub mod watcher;

// Re-export main types
pub use cache::{CacheStats, ContentCache, MappedFileCache};
pub use config::EngineConfig;
pub use edit::{Confidence, EditResult};
pub use engine::{FileContent, FileEngine};
pub use error::{EngineError, Result};
pub use metrics::MetricsSnapshot;
pub use protocol::{PayloadKind, ProtocolAdapter};
pub use replace::ReplaceReport;
