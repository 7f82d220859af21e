//! The `ZipEntry` record and the small enums that parameterize it.

use std::io::Read;
use std::path::PathBuf;

use chrono::NaiveDateTime;

use crate::encoding::Encoding;

/// How an entry's file data is produced when the archive is saved.
///
/// The archive is the sole owner of its entries (see DESIGN.md); a
/// `FromArchive` entry only remembers the byte offset of its local header
/// in a separately-held backing file, not a pointer back to the archive
/// itself, which is what lets entries be `Send` and avoids the cyclic
/// ownership the teacher's source used.
pub enum EntrySource {
    /// Will be (re-)read from the archive's own backing file at the given
    /// local-header offset when saved unchanged.
    FromArchive { local_header_offset: u64 },
    /// Will be opened from this filesystem path when saved.
    FromFile(PathBuf),
    /// Will be read from this caller-supplied stream when saved. The
    /// stream must remain readable until save completes.
    FromStream(Box<dyn Read + Send>),
    /// A directory marker entry; carries no file data.
    DirectoryMarker,
}

impl std::fmt::Debug for EntrySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntrySource::FromArchive {
                local_header_offset,
            } => f
                .debug_struct("FromArchive")
                .field("local_header_offset", local_header_offset)
                .finish(),
            EntrySource::FromFile(p) => f.debug_tuple("FromFile").field(p).finish(),
            EntrySource::FromStream(_) => f.write_str("FromStream(..)"),
            EntrySource::DirectoryMarker => f.write_str("DirectoryMarker"),
        }
    }
}

/// STORE or DEFLATE; the only two compression methods this engine supports
/// (per §1's non-goals).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Store = 0,
    Deflate = 8,
}

impl CompressionMethod {
    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            0 => Some(CompressionMethod::Store),
            8 => Some(CompressionMethod::Deflate),
            _ => None,
        }
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

/// Per-entry encryption choice. Only the PKZIP classic cipher is
/// supported; AES/Blowfish are explicitly out of scope (§1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encryption {
    #[default]
    None,
    ClassicPkzip,
}

/// Bit positions within the general-purpose bit flag that this engine
/// reads or sets.
pub mod bit_flags {
    pub const ENCRYPTED: u16 = 1 << 0;
    pub const DATA_DESCRIPTOR: u16 = 1 << 3;
    pub const UTF8_NAMES: u16 = 1 << 11;
}

/// The version-needed-to-extract value for the classic format.
pub const VERSION_NEEDED_CLASSIC: u16 = 20;
/// The version-needed-to-extract value once ZIP64 is in play.
pub const VERSION_NEEDED_ZIP64: u16 = 45;

/// A single entry of a zip archive: its metadata plus a handle to where
/// its file data comes from (for a to-be-saved entry) or how to reach it
/// in the backing archive (for one already on disk).
#[derive(Debug)]
pub struct ZipEntry {
    pub name: String,
    pub comment: String,
    pub last_modified: NaiveDateTime,
    pub version_needed: u16,
    pub bit_flags: u16,
    pub compression_method: CompressionMethod,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub crc32: u32,
    pub encryption: Encryption,
    pub password: Option<String>,
    pub relative_offset_of_local_header: u64,
    pub source: EntrySource,
    pub external_attributes: u32,
    pub extra_field: Vec<u8>,
    pub actual_encoding: Encoding,
}

const EXTERNAL_ATTR_DIRECTORY: u32 = 0x10 << 16;
const EXTERNAL_ATTR_FILE: u32 = 0x20 << 16;

impl ZipEntry {
    /// Builds a new entry for `name`, sourced from `source`, with sane
    /// defaults (DEFLATE, no encryption, `now` as `last_modified`).
    pub fn new(name: impl Into<String>, source: EntrySource, now: NaiveDateTime) -> Self {
        let name = normalize_name(name.into());
        let is_dir = name.ends_with('/');
        ZipEntry {
            external_attributes: if is_dir {
                EXTERNAL_ATTR_DIRECTORY
            } else {
                EXTERNAL_ATTR_FILE
            },
            name,
            comment: String::new(),
            last_modified: now,
            version_needed: VERSION_NEEDED_CLASSIC,
            bit_flags: 0,
            compression_method: if is_dir {
                CompressionMethod::Store
            } else {
                CompressionMethod::Deflate
            },
            compressed_size: 0,
            uncompressed_size: 0,
            crc32: 0,
            encryption: Encryption::None,
            password: None,
            relative_offset_of_local_header: 0,
            source,
            extra_field: Vec::new(),
            actual_encoding: Encoding::Ibm437,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.name.ends_with('/')
    }

    pub fn is_encrypted(&self) -> bool {
        self.encryption != Encryption::None
    }

    pub fn is_zip64(&self) -> bool {
        self.version_needed >= VERSION_NEEDED_ZIP64
    }

    pub fn set_password(&mut self, password: impl Into<String>) {
        self.password = Some(password.into());
        self.encryption = Encryption::ClassicPkzip;
    }

    pub fn clear_password(&mut self) {
        self.password = None;
        self.encryption = Encryption::None;
    }
}

/// Normalizes a caller-supplied archive path: forward slashes, no leading
/// slash, no empty segments.
pub fn normalize_name(name: String) -> String {
    let name = name.replace('\\', "/");
    name.trim_start_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> NaiveDateTime {
        chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn directory_entries_default_to_store_and_zero_sizes() {
        let entry = ZipEntry::new("dir/", EntrySource::DirectoryMarker, now());
        assert!(entry.is_directory());
        assert_eq!(entry.compression_method, CompressionMethod::Store);
        assert_eq!(entry.uncompressed_size, 0);
        assert_eq!(entry.external_attributes, EXTERNAL_ATTR_DIRECTORY);
    }

    #[test]
    fn file_entries_default_to_deflate() {
        let entry = ZipEntry::new("a.txt", EntrySource::FromStream(Box::new(&[][..])), now());
        assert_eq!(entry.compression_method, CompressionMethod::Deflate);
        assert_eq!(entry.external_attributes, EXTERNAL_ATTR_FILE);
    }

    #[test]
    fn backslashes_are_normalized_to_forward_slashes() {
        assert_eq!(normalize_name("a\\b\\c.txt".to_string()), "a/b/c.txt");
    }
}
