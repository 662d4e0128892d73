//! Error types for the GDELT loader

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for loader operations
pub type Result<T> = std::result::Result<T, GdeltError>;

/// Main error type shared by the loader crates
#[derive(Error, Debug)]
pub enum GdeltError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Checksum mismatch for {subject}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        subject: String,
        expected: String,
        actual: String,
    },

    /// A manifest line that does not carry at least `<size> <md5> <url>`
    #[error("Malformed manifest line {line_number}: {reason} ({line:?})")]
    ManifestLine {
        line_number: usize,
        line: String,
        reason: String,
    },

    /// Archive entry whose resolved path would land outside the extraction root
    #[error("Archive entry {entry:?} escapes extraction directory {root}")]
    UnsafeArchivePath { entry: String, root: PathBuf },

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
