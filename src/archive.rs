//! The public random-access archive surface: open an existing zip, add,
//! remove, and rename entries in memory, then save with the temp-file
//! rename-into-place discipline described in §4.8.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{debug, info, trace};

use crate::byte_codec::{
    write_u16_le, write_u32_le, write_u64_le, SIG_EOCD, SIG_ZIP64_EOCD_LOCATOR,
    SIG_ZIP64_EOCD_RECORD,
};
use crate::cipher::{ClassicDecryptor, DecryptingReader};
use crate::crc32::Crc32;
use crate::encoding::{self, Encoding};
use crate::entry::{bit_flags, Encryption, EntrySource, ZipEntry};
use crate::entry_reader::{self, ParsedCentralDirEntry};
use crate::entry_writer::{self, EntryWriteRequest, WrittenEntry};
use crate::error::{Result, ZipError};
use crate::options::{ArchiveOptions, Zip64Policy};
use crate::pipeline::{self, Cancellation, DecompressingReader};

/// A legacy-classic entry count ceiling of the central directory: beyond
/// this many entries the count fields must be ZIP64-promoted.
const MAX_CLASSIC_ENTRY_COUNT: usize = 0xFFFF;

/// Where an open or in-progress archive's bytes live.
enum Backing {
    /// Built fresh; not yet associated with any file on disk.
    None,
    /// Opened from, or last saved to, this path.
    File(PathBuf),
}

/// A zip archive held open for random-access editing: list, add, remove,
/// rename entries, then [`ZipArchive::save`] or [`ZipArchive::save_as`] to
/// write the result out.
///
/// Entries are owned directly by the archive (see [`crate::entry`]'s
/// module docs on why `EntrySource::FromArchive` avoids a back-pointer);
/// there is no notion of a "live" handle into the backing file other than
/// the path itself, which is reopened for every read.
pub struct ZipArchive {
    backing: Backing,
    entries: Vec<ZipEntry>,
    comment: String,
    default_password: Option<String>,
    options: ArchiveOptions,
}

impl ZipArchive {
    /// Starts a brand-new, empty archive with default options.
    pub fn new() -> Self {
        Self::new_with_options(ArchiveOptions::default())
    }

    /// Starts a brand-new, empty archive with the given options.
    pub fn new_with_options(options: ArchiveOptions) -> Self {
        ZipArchive {
            backing: Backing::None,
            entries: Vec::new(),
            comment: String::new(),
            default_password: None,
            options,
        }
    }

    /// Opens an existing archive from `path`, reading its central
    /// directory via the seekable path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_options(path, ArchiveOptions::default())
    }

    pub fn open_with_options(path: impl AsRef<Path>, options: ArchiveOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let mut reader = BufReader::new(file);
        let index = crate::archive_reader::read_archive_index(&mut reader, options.fallback_encoding)?;
        let entries = index
            .entries
            .into_iter()
            .map(entry_from_central_dir)
            .collect::<Result<Vec<_>>>()?;
        info!(path = %path.display(), entry_count = entries.len(), "opened archive");
        Ok(ZipArchive {
            backing: Backing::File(path),
            entries,
            comment: index.comment,
            default_password: None,
            options,
        })
    }

    pub fn entries(&self) -> &[ZipEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub fn set_comment(&mut self, comment: impl Into<String>) {
        self.comment = comment.into();
    }

    /// Sets a password that newly added entries inherit automatically.
    /// Entries already present are unaffected; use [`Self::set_password`]
    /// for those.
    pub fn set_default_password(&mut self, password: impl Into<String>) {
        self.default_password = Some(password.into());
    }

    pub fn clear_default_password(&mut self) {
        self.default_password = None;
    }

    fn names_equal(&self, a: &str, b: &str) -> bool {
        if self.options.case_sensitive {
            a == b
        } else {
            a.eq_ignore_ascii_case(b)
        }
    }

    pub fn find(&self, name: &str) -> Option<&ZipEntry> {
        self.entries.iter().find(|e| self.names_equal(&e.name, name))
    }

    pub fn find_index(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| self.names_equal(&e.name, name))
    }

    fn check_unique(&self, name: &str) -> Result<()> {
        if self.find_index(name).is_some() {
            Err(ZipError::DuplicateEntry(name.to_string()))
        } else {
            Ok(())
        }
    }

    fn check_all_unique(&self) -> Result<()> {
        for i in 0..self.entries.len() {
            for j in (i + 1)..self.entries.len() {
                if self.names_equal(&self.entries[i].name, &self.entries[j].name) {
                    return Err(ZipError::DuplicateEntry(self.entries[i].name.clone()));
                }
            }
        }
        Ok(())
    }

    /// Adds an entry backed by a file on disk; its bytes are (re-)read
    /// when the archive is saved, not now.
    pub fn add_file(&mut self, name: impl Into<String>, path: impl AsRef<Path>) -> Result<()> {
        let name = crate::entry::normalize_name(name.into());
        self.check_unique(&name)?;
        let mut entry = ZipEntry::new(name, EntrySource::FromFile(path.as_ref().to_path_buf()), now());
        self.apply_default_password(&mut entry);
        self.entries.push(entry);
        Ok(())
    }

    /// Adds an entry backed by an in-memory or caller-supplied stream.
    /// The stream is read exactly once, at save time.
    pub fn add_stream(
        &mut self,
        name: impl Into<String>,
        reader: impl Read + Send + 'static,
    ) -> Result<()> {
        let name = crate::entry::normalize_name(name.into());
        self.check_unique(&name)?;
        let mut entry = ZipEntry::new(name, EntrySource::FromStream(Box::new(reader)), now());
        self.apply_default_password(&mut entry);
        self.entries.push(entry);
        Ok(())
    }

    /// Adds a directory-marker entry; `name` need not end in `/` (one is
    /// appended if missing).
    pub fn add_directory(&mut self, name: impl Into<String>) -> Result<()> {
        let mut name = crate::entry::normalize_name(name.into());
        if !name.ends_with('/') {
            name.push('/');
        }
        self.check_unique(&name)?;
        let entry = ZipEntry::new(name, EntrySource::DirectoryMarker, now());
        self.entries.push(entry);
        Ok(())
    }

    fn apply_default_password(&self, entry: &mut ZipEntry) {
        if let Some(password) = &self.default_password {
            entry.set_password(password.clone());
        }
    }

    /// Removes the entry named `name`, returning whether one was found.
    pub fn remove(&mut self, name: &str) -> bool {
        match self.find_index(name) {
            Some(i) => {
                self.entries.remove(i);
                true
            }
            None => false,
        }
    }

    /// Renames `old` to `new`. Fails with [`ZipError::DuplicateEntry`] if
    /// `new` already names a different entry.
    pub fn rename(&mut self, old: &str, new: &str) -> Result<()> {
        let index = self
            .find_index(old)
            .ok_or_else(|| ZipError::EntryNotFound(old.to_string()))?;
        if !self.names_equal(old, new) && self.find_index(new).is_some() {
            return Err(ZipError::DuplicateEntry(new.to_string()));
        }
        self.entries[index].name = crate::entry::normalize_name(new.to_string());
        Ok(())
    }

    pub fn set_password(&mut self, name: &str, password: impl Into<String>) -> Result<()> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.name == name)
            .ok_or_else(|| ZipError::EntryNotFound(name.to_string()))?;
        entry.set_password(password.into());
        Ok(())
    }

    pub fn clear_password(&mut self, name: &str) -> Result<()> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.name == name)
            .ok_or_else(|| ZipError::EntryNotFound(name.to_string()))?;
        entry.clear_password();
        Ok(())
    }

    fn open_backing_file(&self) -> Result<File> {
        match &self.backing {
            Backing::File(path) => Ok(File::open(path)?),
            Backing::None => Err(ZipError::InvalidState(
                "archive has no backing file to read from yet".into(),
            )),
        }
    }

    /// Returns a lazily decompressing (and, if encrypted, decrypting)
    /// reader over `name`'s file data. The entry must already have been
    /// saved (its source is `FromArchive`); fresh in-memory entries have
    /// no readable bytes until [`Self::save`] runs.
    pub fn entry_reader(&self, name: &str, password: Option<&str>) -> Result<Box<dyn Read>> {
        let entry = self.find(name).ok_or_else(|| ZipError::EntryNotFound(name.to_string()))?;
        let local_header_offset = match entry.source {
            EntrySource::FromArchive { local_header_offset } => local_header_offset,
            _ => {
                return Err(ZipError::InvalidState(format!(
                    "entry {name} has not been saved to an archive yet"
                )))
            }
        };
        let mut file = self.open_backing_file()?;
        let data_offset = entry_reader::locate_file_data(&mut file, local_header_offset)?;
        file.seek(SeekFrom::Start(data_offset))?;
        let mut body: Box<dyn Read> = Box::new(file.take(entry.compressed_size));

        if entry.is_encrypted() {
            let password = password.ok_or(ZipError::BadPassword)?;
            let bit3 = entry.bit_flags & bit_flags::DATA_DESCRIPTOR != 0;
            let mut expected = vec![(entry.crc32 >> 24) as u8];
            if bit3 {
                let packed = crate::byte_codec::MsDosDateTime::pack(&entry.last_modified);
                expected.push((packed.time >> 8) as u8);
            }
            let decryptor = ClassicDecryptor::new(&mut body, password.as_bytes(), &expected)?;
            body = Box::new(DecryptingReader::new(body, decryptor));
        }

        Ok(Box::new(DecompressingReader::new(body, entry.compression_method)))
    }

    /// Reads `name`'s entire file data into memory, verifying its CRC32
    /// against the stored value.
    pub fn extract(&self, name: &str, password: Option<&str>) -> Result<Vec<u8>> {
        self.extract_cancellable(name, password, &Cancellation::default())
    }

    /// Same as [`Self::extract`], checking `cancellation` between
    /// [`pipeline::READBLOCK_SIZE`] blocks (§5) and stopping early with
    /// [`ZipError::Cancelled`] if it's set -- the in-memory buffer read so
    /// far is simply dropped, since extract has no partial output file to
    /// clean up.
    pub fn extract_cancellable(
        &self,
        name: &str,
        password: Option<&str>,
        cancellation: &Cancellation,
    ) -> Result<Vec<u8>> {
        let entry = self.find(name).ok_or_else(|| ZipError::EntryNotFound(name.to_string()))?;
        let uncompressed_size = entry.uncompressed_size;
        let expected_crc = entry.crc32;
        let mut reader = self.entry_reader(name, password)?;
        let mut buf = Vec::with_capacity(uncompressed_size as usize);
        let copied = pipeline::copy_cancellable(&mut reader, &mut buf, || cancellation.is_cancelled())?;
        if cancellation.is_cancelled() && copied < uncompressed_size {
            return Err(ZipError::Cancelled(format!("extract of {name} was cancelled")));
        }
        let mut crc = Crc32::new();
        crc.update(&buf);
        if crc.value() != expected_crc {
            return Err(ZipError::BadCrc {
                name: name.to_string(),
                expected: expected_crc,
                actual: crc.value(),
            });
        }
        Ok(buf)
    }

    /// Saves back to the path this archive was opened from (or last saved
    /// to). Fails with [`ZipError::InvalidState`] for a fresh archive with
    /// no associated path; use [`Self::save_as`] instead.
    pub fn save(&mut self) -> Result<()> {
        match &self.backing {
            Backing::File(path) => {
                let path = path.clone();
                self.save_as(path)
            }
            Backing::None => Err(ZipError::InvalidState(
                "archive has no target path; call save_as instead".into(),
            )),
        }
    }

    /// Writes every entry plus the central directory to a temp file in
    /// [`ArchiveOptions::effective_temp_dir`], then renames it into place
    /// at `path` -- so a crash mid-save never leaves a half-written
    /// archive where `path` used to be.
    pub fn save_as(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.save_as_cancellable(path, &Cancellation::default())
    }

    /// Same as [`Self::save_as`], checking `cancellation` between
    /// [`pipeline::READBLOCK_SIZE`] blocks of each entry's copy-through
    /// pass (§5). On cancellation the temp file is dropped without being
    /// persisted -- `tempfile` deletes it on drop -- so the target path is
    /// left exactly as it was.
    pub fn save_as_cancellable(
        &mut self,
        path: impl AsRef<Path>,
        cancellation: &Cancellation,
    ) -> Result<()> {
        let target = path.as_ref().to_path_buf();

        if self.options.zip64_policy == Zip64Policy::Never
            && self.entries.len() >= MAX_CLASSIC_ENTRY_COUNT
        {
            return Err(ZipError::Zip64Required(
                "entry count exceeds the classic 65535 limit".into(),
            ));
        }
        self.check_all_unique()?;

        let temp_dir = self.options.effective_temp_dir();
        let mut temp = tempfile::Builder::new()
            .prefix(".pk-zip-")
            .suffix(".tmp")
            .tempfile_in(&temp_dir)?;

        let mut written = Vec::with_capacity(self.entries.len());
        {
            let file = temp.as_file_mut();
            for entry in self.entries.iter_mut() {
                if cancellation.is_cancelled() {
                    return Err(ZipError::Cancelled("save was cancelled".into()));
                }
                let w = write_one_entry(file, entry, &self.options, &self.backing, cancellation)?;
                written.push(w);
            }
            if cancellation.is_cancelled() {
                return Err(ZipError::Cancelled("save was cancelled".into()));
            }

            let central_directory_offset = file.stream_position()?;
            let comment_bytes = encoding::encode_for(&self.comment, Encoding::Utf8);
            for w in &written {
                entry_writer::write_central_directory_record(file, w)?;
            }
            let central_directory_size = file.stream_position()? - central_directory_offset;

            let needs_zip64 = self.options.zip64_policy == Zip64Policy::Always
                || written.len() > MAX_CLASSIC_ENTRY_COUNT
                || central_directory_size > u32::MAX as u64
                || central_directory_offset > u32::MAX as u64;
            if needs_zip64 {
                write_zip64_eocd(
                    file,
                    written.len() as u64,
                    central_directory_size,
                    central_directory_offset,
                )?;
            }
            write_eocd(
                file,
                written.len(),
                central_directory_size,
                central_directory_offset,
                &comment_bytes,
            )?;
            file.flush()?;
        }
        debug!(entry_count = written.len(), path = %target.display(), "wrote archive body to temp file");

        if target.exists() {
            std::fs::remove_file(&target)?;
        }
        temp.persist(&target).map_err(|e| ZipError::Io(e.error))?;
        trace!(path = %target.display(), "renamed temp file into place");

        self.backing = Backing::File(target);
        for (entry, w) in self.entries.iter_mut().zip(written.into_iter()) {
            entry.relative_offset_of_local_header = w.local_header_offset;
            entry.crc32 = w.crc32;
            entry.compressed_size = w.compressed_size;
            entry.uncompressed_size = w.uncompressed_size;
            entry.version_needed = w.version_needed;
            entry.bit_flags = w.bit_flags;
            entry.compression_method = w.compression_method;
            entry.extra_field = w.extra_field;
            entry.actual_encoding = w.name_encoding;
            entry.source = EntrySource::FromArchive {
                local_header_offset: w.local_header_offset,
            };
        }
        Ok(())
    }
}

impl Default for ZipArchive {
    fn default() -> Self {
        Self::new()
    }
}

fn now() -> chrono::NaiveDateTime {
    Local::now().naive_local()
}

fn entry_from_central_dir(e: ParsedCentralDirEntry) -> Result<ZipEntry> {
    let compression_method = entry_reader::compression_method_of(e.compression_method)?;
    let actual_encoding = if e.bit_flags & bit_flags::UTF8_NAMES != 0 {
        Encoding::Utf8
    } else {
        Encoding::Ibm437
    };
    Ok(ZipEntry {
        name: e.name,
        comment: e.comment,
        last_modified: e.last_modified,
        version_needed: e.version_needed,
        bit_flags: e.bit_flags,
        compression_method,
        compressed_size: e.compressed_size,
        uncompressed_size: e.uncompressed_size,
        crc32: e.crc32,
        encryption: if e.bit_flags & bit_flags::ENCRYPTED != 0 {
            Encryption::ClassicPkzip
        } else {
            Encryption::None
        },
        password: None,
        relative_offset_of_local_header: e.relative_offset_of_local_header,
        source: EntrySource::FromArchive {
            local_header_offset: e.relative_offset_of_local_header,
        },
        external_attributes: e.external_attributes,
        extra_field: e.extra_field,
        actual_encoding,
    })
}

/// Dispatches one entry's save step according to its source: a fresh
/// compress/encrypt pass for file- and stream-backed entries, a raw byte
/// copy for an unmodified entry already in the backing archive.
fn write_one_entry(
    file: &mut File,
    entry: &mut ZipEntry,
    options: &ArchiveOptions,
    backing: &Backing,
    cancellation: &Cancellation,
) -> Result<WrittenEntry> {
    // Handled separately, read-only: copying through doesn't need (and
    // must not take) a mutable borrow of `entry.source`, since it also
    // needs to read the rest of `entry`'s metadata.
    if let EntrySource::FromArchive { local_header_offset } = &entry.source {
        let offset = *local_header_offset;
        return copy_through(file, entry, offset, backing, cancellation);
    }

    let req = EntryWriteRequest {
        name: &entry.name,
        comment: &entry.comment,
        last_modified: entry.last_modified,
        external_attributes: entry.external_attributes,
        compression_method: entry.compression_method,
        password: entry.password.as_deref(),
        zip64_policy: options.zip64_policy,
        fallback_encoding: options.fallback_encoding,
        compression_level: options.compression_level,
    };

    match &mut entry.source {
        EntrySource::DirectoryMarker => entry_writer::write_directory_entry(file, &req),
        EntrySource::FromFile(path) => {
            let path = path.clone();
            entry_writer::write_file_entry(file, &req, move || {
                Ok(Box::new(File::open(&path)?) as Box<dyn Read>)
            })
        }
        EntrySource::FromStream(reader) => {
            // The stream is single-use: buffer it once so the retry-on-
            // inflation and password-precompute passes, which both need
            // to read the plaintext twice, can each get a fresh cursor
            // over the same bytes without re-touching the caller's reader.
            let mut taken: Box<dyn Read + Send> = std::mem::replace(reader, Box::new(io::empty()));
            let mut buffered = Vec::new();
            taken.read_to_end(&mut buffered)?;
            entry_writer::write_file_entry(file, &req, move || {
                Ok(Box::new(io::Cursor::new(buffered.clone())) as Box<dyn Read>)
            })
        }
        EntrySource::FromArchive { .. } => unreachable!("handled above"),
    }
}

/// Copies an unmodified entry's local header, name, extra field, and file
/// data verbatim from the backing archive to the new one, without
/// decompressing or re-encrypting anything.
fn copy_through(
    file: &mut File,
    entry: &ZipEntry,
    local_header_offset: u64,
    backing: &Backing,
    cancellation: &Cancellation,
) -> Result<WrittenEntry> {
    let Backing::File(path) = backing else {
        return Err(ZipError::InvalidState(format!(
            "entry {} has no backing archive to copy from",
            entry.name
        )));
    };
    let mut src = File::open(path)?;
    let file_data_offset = entry_reader::locate_file_data(&mut src, local_header_offset)?;
    let span = (file_data_offset - local_header_offset) + entry.compressed_size;

    src.seek(SeekFrom::Start(local_header_offset))?;
    let new_offset = file.stream_position()?;
    let mut limited = (&mut src).take(span);
    let copied = pipeline::copy_cancellable(&mut limited, file, || cancellation.is_cancelled())?;
    if cancellation.is_cancelled() && copied < span {
        return Err(ZipError::Cancelled(format!("save of {} was cancelled", entry.name)));
    }

    Ok(WrittenEntry {
        local_header_offset: new_offset,
        name_bytes: encoding::encode_for(&entry.name, entry.actual_encoding),
        name_encoding: entry.actual_encoding,
        comment_bytes: encoding::encode_for(&entry.comment, entry.actual_encoding),
        bit_flags: entry.bit_flags,
        version_needed: entry.version_needed,
        compression_method: entry.compression_method,
        crc32: entry.crc32,
        compressed_size: entry.compressed_size,
        uncompressed_size: entry.uncompressed_size,
        extra_field: entry.extra_field.clone(),
        external_attributes: entry.external_attributes,
        last_modified: entry.last_modified,
    })
}

fn write_zip64_eocd<W: io::Write + Seek>(
    w: &mut W,
    entry_count: u64,
    central_directory_size: u64,
    central_directory_offset: u64,
) -> Result<()> {
    let zip64_eocd_offset = w.stream_position()?;
    write_u32_le(w, SIG_ZIP64_EOCD_RECORD)?;
    write_u64_le(w, 44)?; // size of the remaining record, fixed since we emit no extensible data
    write_u16_le(w, crate::entry::VERSION_NEEDED_ZIP64)?; // version made by
    write_u16_le(w, crate::entry::VERSION_NEEDED_ZIP64)?; // version needed
    write_u32_le(w, 0)?; // number of this disk
    write_u32_le(w, 0)?; // disk with the start of the central directory
    write_u64_le(w, entry_count)?; // entries on this disk
    write_u64_le(w, entry_count)?; // total entries
    write_u64_le(w, central_directory_size)?;
    write_u64_le(w, central_directory_offset)?;

    write_u32_le(w, SIG_ZIP64_EOCD_LOCATOR)?;
    write_u32_le(w, 0)?; // disk with the zip64 eocd record
    write_u64_le(w, zip64_eocd_offset)?;
    write_u32_le(w, 1)?; // total number of disks
    Ok(())
}

fn write_eocd<W: io::Write>(
    w: &mut W,
    entry_count: usize,
    central_directory_size: u64,
    central_directory_offset: u64,
    comment_bytes: &[u8],
) -> Result<()> {
    write_u32_le(w, SIG_EOCD)?;
    write_u16_le(w, 0)?; // number of this disk
    write_u16_le(w, 0)?; // disk with the start of the central directory
    let entry_count_16 = if entry_count > MAX_CLASSIC_ENTRY_COUNT {
        0xFFFFu16
    } else {
        entry_count as u16
    };
    write_u16_le(w, entry_count_16)?; // entries on this disk
    write_u16_le(w, entry_count_16)?; // total entries
    let needs_sentinel =
        central_directory_size > u32::MAX as u64 || central_directory_offset > u32::MAX as u64;
    write_u32_le(
        w,
        if needs_sentinel { u32::MAX } else { central_directory_size as u32 },
    )?;
    write_u32_le(
        w,
        if needs_sentinel { u32::MAX } else { central_directory_offset as u32 },
    )?;
    write_u16_le(w, comment_bytes.len() as u16)?;
    w.write_all(comment_bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("pk-zip-archive-test-{name}-{}.zip", std::process::id()))
    }

    #[test]
    fn save_then_open_round_trips_a_single_entry() {
        let path = temp_path("round-trip");
        let mut archive = ZipArchive::new();
        archive
            .add_stream("hello.txt", Cursor::new(b"Hello, world.\n".to_vec()))
            .unwrap();
        archive.save_as(&path).unwrap();

        let reopened = ZipArchive::open(&path).unwrap();
        assert_eq!(reopened.len(), 1);
        let data = reopened.extract("hello.txt", None).unwrap();
        assert_eq!(data, b"Hello, world.\n");

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mut archive = ZipArchive::new();
        archive.add_directory("docs").unwrap();
        let err = archive.add_directory("docs").unwrap_err();
        assert!(matches!(err, ZipError::DuplicateEntry(_)));
    }

    #[test]
    fn rename_then_find_uses_new_name() {
        let mut archive = ZipArchive::new();
        archive.add_directory("old").unwrap();
        archive.rename("old/", "new/").unwrap();
        assert!(archive.find("new/").is_some());
        assert!(archive.find("old/").is_none());
    }

    #[test]
    fn save_as_updates_entries_to_reference_new_backing() {
        let path = temp_path("rewritten");
        let mut archive = ZipArchive::new();
        archive
            .add_stream("a.txt", Cursor::new(b"some content".to_vec()))
            .unwrap();
        archive.save_as(&path).unwrap();
        assert!(matches!(
            archive.entries()[0].source,
            EntrySource::FromArchive { .. }
        ));

        // Saving again exercises the copy-through path for the now
        // archive-backed entry.
        let path2 = temp_path("rewritten-again");
        archive.save_as(&path2).unwrap();
        let reopened = ZipArchive::open(&path2).unwrap();
        assert_eq!(reopened.extract("a.txt", None).unwrap(), b"some content");

        std::fs::remove_file(&path).ok();
        std::fs::remove_file(&path2).ok();
    }

    #[test]
    fn password_protected_entry_round_trips() {
        let path = temp_path("encrypted");
        let mut archive = ZipArchive::new();
        archive
            .add_stream("secret.txt", Cursor::new(b"for your eyes only".to_vec()))
            .unwrap();
        archive.set_password("secret.txt", "hunter2").unwrap();
        archive.save_as(&path).unwrap();

        let reopened = ZipArchive::open(&path).unwrap();
        let err = reopened.extract("secret.txt", Some("wrong")).unwrap_err();
        assert!(matches!(err, ZipError::BadPassword));
        let data = reopened.extract("secret.txt", Some("hunter2")).unwrap();
        assert_eq!(data, b"for your eyes only");

        std::fs::remove_file(&path).ok();
    }
}
