//! Error types for Vark archive operations

use thiserror::Error;

/// Result type for Vark operations
pub type Result<T> = std::result::Result<T, VarkError>;

/// Vark error types
#[derive(Error, Debug)]
pub enum VarkError {
    /// Disallowed flag combination at open/create
    #[error("Invalid flag combination: {0}")]
    BadFlags(&'static str),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The archive header or a sharded payload lacks its expected magic
    #[error("Invalid magic: expected {expected:?}, got {actual:?}")]
    BadMagic { expected: [u8; 4], actual: [u8; 4] },

    /// The file ends before a required field, or a span exceeds its container
    #[error("Truncated data: need {expected} bytes, have {actual}")]
    Truncated { expected: u64, actual: u64 },

    /// A lookup by path missed the file table
    #[error("Entry not found: {0}")]
    NotFound(String),

    /// The partial-range API was called on a plain entry
    #[error("Entry is not sharded: {0}")]
    NotSharded(String),

    /// A requested range extends past the entry's uncompressed size
    #[error("Range violation: offset {offset} + size {size} > {total}")]
    RangeViolation { offset: u64, size: u64, total: u64 },

    /// The decompressor failed or produced an unexpected length
    #[error("Decompression failed: {0}")]
    DecompressFailed(String),

    /// The compressor returned no output for a non-empty input
    #[error("Compression refused for {0} input bytes")]
    CompressRefused(usize),

    /// Append was called on an archive opened without the write flag
    #[error("Archive is read-only")]
    ReadOnly,

    /// The path is already present in the archive
    #[error("Entry already exists: {0}")]
    DuplicateEntry(String),
}
