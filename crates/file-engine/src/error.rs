use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("access denied: {0}")]
    AccessDenied(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file too large: {0}")]
    FileTooLarge(PathBuf),

    #[error("not editable: {0}")]
    NotEditable(PathBuf),

    #[error("no match found for the requested edit")]
    NoMatch,

    #[error("operation cancelled")]
    Cancelled,

    #[error("unsupported frame version: {0}")]
    UnsupportedVersion(u8),

    #[error("frame too short for declared payload length")]
    FrameTooShort,

    #[error("mapped cache full, every entry is referenced: {0}")]
    CacheFull(PathBuf),

    #[error("invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
