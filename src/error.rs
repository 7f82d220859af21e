//! Error types for the zip engine.

use std::io;

/// Result type for zip operations.
pub type Result<T> = std::result::Result<T, ZipError>;

/// Error taxonomy for the zip engine.
///
/// Readers and writers fail fast on malformed input rather than attempting
/// silent repair beyond the tolerances documented on [`crate::entry_reader`].
#[derive(Debug, thiserror::Error)]
pub enum ZipError {
    /// An expected zip signature was absent where required.
    #[error("bad signature: expected {expected:#010x} at offset {offset}, found {found:#010x}")]
    BadSignature {
        expected: u32,
        found: u32,
        offset: u64,
    },

    /// The stream ended mid-record or returned fewer bytes than required.
    #[error("truncated read: {0}")]
    BadRead(String),

    /// The recomputed CRC on extract differs from the stored CRC.
    #[error("crc mismatch for {name}: expected {expected:#010x}, computed {actual:#010x}")]
    BadCrc {
        name: String,
        expected: u32,
        actual: u32,
    },

    /// The cipher verification byte did not match after decrypting the
    /// 12-byte encryption header.
    #[error("incorrect password")]
    BadPassword,

    /// Entry not found in the archive's central directory.
    #[error("entry not found: {0}")]
    EntryNotFound(String),

    /// Strong encryption, an unsupported compression method, or a
    /// multi-disk archive was encountered.
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// A quantity exceeds the classic-format limit and the archive's ZIP64
    /// policy forbids promotion.
    #[error("zip64 required but forbidden by policy: {0}")]
    Zip64Required(String),

    /// Add of an entry whose name collides with an existing one under the
    /// archive's case-sensitivity rule.
    #[error("duplicate entry name: {0}")]
    DuplicateEntry(String),

    /// E.g. save invoked with no target set, or an entry path is ill-formed.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A caller-supplied [`crate::pipeline::Cancellation`] flag was observed
    /// set partway through a save or extract.
    #[error("operation cancelled: {0}")]
    Cancelled(String),

    /// Propagation of the underlying byte-stream error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}
