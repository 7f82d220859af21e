//! # pk-zip: a zip archive engine
//!
//! `pk-zip` reads and writes PKWARE zip archives: the classic format and
//! its ZIP64 extension, STORE and DEFLATE compression, and the PKZIP
//! classic ("ZipCrypto") password cipher.
//!
//! Two surfaces are provided:
//!
//! - [`ZipArchive`] is random access: open an existing archive (or start
//!   an empty one), inspect, add, remove, or rename entries, and save.
//!   Saving an untouched entry copies its bytes through unchanged rather
//!   than re-compressing them.
//! - [`StreamingZipReader`] and [`StreamingZipWriter`] work over
//!   non-seekable sources and sinks — a network socket, a pipe — at the
//!   cost of losing random access and (on the write side) the ability to
//!   retry an entry as STORE if DEFLATE made it larger.
//!
//! ## Quick start
//!
//! ```no_run
//! use pk_zip::ZipArchive;
//!
//! let mut archive = ZipArchive::new();
//! archive.add_file("hello.txt", "hello.txt")?;
//! archive.save_as("archive.zip")?;
//!
//! let opened = ZipArchive::open("archive.zip")?;
//! let data = opened.extract("hello.txt", None)?;
//! # Ok::<(), pk_zip::ZipError>(())
//! ```

pub mod archive;
pub mod archive_reader;
pub mod byte_codec;
pub mod cipher;
pub mod crc32;
pub mod encoding;
pub mod entry;
pub mod entry_reader;
pub mod entry_writer;
pub mod error;
pub mod options;
pub mod pipeline;
pub mod streaming_reader;
pub mod streaming_writer;

pub use archive::ZipArchive;
pub use encoding::FallbackEncoding;
pub use entry::{CompressionMethod, Encryption, EntrySource, ZipEntry};
pub use error::{Result, ZipError};
pub use options::{ArchiveOptions, ArchiveOptionsBuilder, Zip64Policy};
pub use pipeline::Cancellation;
pub use streaming_reader::StreamingZipReader;
pub use streaming_writer::{StreamingEntryRequest, StreamingZipWriter};
