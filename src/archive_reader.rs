//! Opens an existing archive: locates the end-of-central-directory
//! record (following the ZIP64 locator when present), then reads the
//! central directory into a list of entries.

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};

use tracing::{debug, trace, warn};

use crate::byte_codec::{
    self, read_u16_le, read_u32_le, read_u64_le, SIG_EOCD, SIG_LOCAL_FILE_HEADER,
    SIG_ZIP64_EOCD_LOCATOR, SIG_ZIP64_EOCD_RECORD, ZIP64_SENTINEL_16, ZIP64_SENTINEL_32,
};
use crate::encoding::{self, FallbackEncoding};
use crate::entry::bit_flags;
use crate::entry_reader::{self, ParsedCentralDirEntry};
use crate::error::{Result, ZipError};

/// The maximum size of an EOCD record's trailing comment, and therefore
/// the widest window we ever need to search from the end of the file.
const MAX_EOCD_COMMENT_LEN: u64 = 0xFFFF;
/// Fixed portion of the EOCD record, not counting the comment.
const EOCD_FIXED_LEN: u64 = 22;

/// What [`scan_end_of_central_directory`] found.
pub struct EndOfCentralDirectory {
    pub total_entries: u64,
    pub central_directory_size: u64,
    pub central_directory_offset: u64,
    pub comment: String,
    pub is_zip64: bool,
}

/// The fully-parsed result of opening an archive via the central
/// directory: every entry plus the archive-level comment.
pub struct ArchiveIndex {
    pub entries: Vec<ParsedCentralDirEntry>,
    pub comment: String,
    pub is_zip64: bool,
}

/// Scans backward from the end of `r` for the EOCD signature, starting
/// with a 64-byte window and doubling it up to 3 tries, per §4.7.
pub fn find_eocd<R: Read + Seek>(r: &mut R) -> Result<u64> {
    let file_len = r.seek(SeekFrom::End(0))?;
    let mut window = 64u64.min(file_len);
    for attempt in 0..3 {
        let search_start = file_len.saturating_sub(window.max(EOCD_FIXED_LEN));
        r.seek(SeekFrom::Start(search_start))?;
        let mut buf = vec![0u8; (file_len - search_start) as usize];
        r.read_exact(&mut buf)?;
        if let Some(pos) = find_signature_backward(&buf, SIG_EOCD) {
            trace!(attempt, offset = search_start + pos as u64, "found EOCD");
            return Ok(search_start + pos as u64);
        }
        window = (window * 2).min(file_len.min(EOCD_FIXED_LEN + MAX_EOCD_COMMENT_LEN));
    }
    Err(ZipError::BadSignature {
        expected: SIG_EOCD,
        found: 0,
        offset: file_len,
    })
}

fn find_signature_backward(buf: &[u8], sig: u32) -> Option<usize> {
    if buf.len() < 4 {
        return None;
    }
    let needle = sig.to_le_bytes();
    (0..=buf.len() - 4).rev().find(|&i| buf[i..i + 4] == needle)
}

/// Reads the EOCD record (and, if signalled, the ZIP64 EOCD record
/// reached through the ZIP64 locator) at `eocd_offset`.
pub fn read_end_of_central_directory<R: Read + Seek>(
    r: &mut R,
    eocd_offset: u64,
    fallback: FallbackEncoding,
) -> Result<EndOfCentralDirectory> {
    r.seek(SeekFrom::Start(eocd_offset))?;
    let signature = read_u32_le(r)?;
    if signature != SIG_EOCD {
        return Err(ZipError::BadSignature {
            expected: SIG_EOCD,
            found: signature,
            offset: eocd_offset,
        });
    }
    let _this_disk = read_u16_le(r)?;
    let _cd_start_disk = read_u16_le(r)?;
    let _entries_this_disk = read_u16_le(r)?;
    let total_entries_16 = read_u16_le(r)?;
    let cd_size_32 = read_u32_le(r)?;
    let cd_offset_32 = read_u32_le(r)?;
    let comment_len = read_u16_le(r)? as usize;
    let mut comment_buf = vec![0u8; comment_len];
    r.read_exact(&mut comment_buf)?;

    let mut total_entries = total_entries_16 as u64;
    let mut central_directory_size = cd_size_32 as u64;
    let mut central_directory_offset = cd_offset_32 as u64;
    let mut is_zip64 = false;

    if total_entries_16 == ZIP64_SENTINEL_16
        || cd_size_32 == ZIP64_SENTINEL_32
        || cd_offset_32 == ZIP64_SENTINEL_32
    {
        is_zip64 = true;
        let record = read_zip64_eocd(r, eocd_offset)?;
        total_entries = record.total_entries;
        central_directory_size = record.central_directory_size;
        central_directory_offset = record.central_directory_offset;
    }

    // The archive comment defaults to IBM437 with a round-trip check,
    // promoting to UTF-8 if that fails -- an intentional read-side
    // auto-promotion distinct from the write-side fallback policy.
    let comment = decode_comment_with_promotion(&comment_buf, fallback);

    Ok(EndOfCentralDirectory {
        total_entries,
        central_directory_size,
        central_directory_offset,
        comment,
        is_zip64,
    })
}

fn decode_comment_with_promotion(bytes: &[u8], fallback: FallbackEncoding) -> String {
    let ibm437 = encoding::decode_ibm437(bytes);
    let round_tripped = encoding::encode_with_policy(&ibm437, fallback);
    if round_tripped.bytes == bytes {
        ibm437
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    }
}

struct Zip64EocdRecord {
    total_entries: u64,
    central_directory_size: u64,
    central_directory_offset: u64,
}

/// Locates the ZIP64 EOCD locator (40 bytes before the EOCD record, per
/// §4.7) and follows it to the ZIP64 EOCD record.
fn read_zip64_eocd<R: Read + Seek>(r: &mut R, eocd_offset: u64) -> Result<Zip64EocdRecord> {
    let locator_offset = eocd_offset
        .checked_sub(20)
        .ok_or_else(|| ZipError::BadRead("archive too small to contain a ZIP64 locator".into()))?;
    r.seek(SeekFrom::Start(locator_offset))?;
    let signature = read_u32_le(r)?;
    if signature != SIG_ZIP64_EOCD_LOCATOR {
        return Err(ZipError::BadSignature {
            expected: SIG_ZIP64_EOCD_LOCATOR,
            found: signature,
            offset: locator_offset,
        });
    }
    let _disk_with_zip64_eocd = read_u32_le(r)?;
    let zip64_eocd_offset = read_u64_le(r)?;
    let _total_disks = read_u32_le(r)?;

    r.seek(SeekFrom::Start(zip64_eocd_offset))?;
    let signature = read_u32_le(r)?;
    if signature != SIG_ZIP64_EOCD_RECORD {
        return Err(ZipError::BadSignature {
            expected: SIG_ZIP64_EOCD_RECORD,
            found: signature,
            offset: zip64_eocd_offset,
        });
    }
    let _size = read_u64_le(r)?;
    let _version_made_by = read_u16_le(r)?;
    let _version_needed = read_u16_le(r)?;
    let _this_disk = read_u32_le(r)?;
    let _cd_start_disk = read_u32_le(r)?;
    let _entries_this_disk = read_u64_le(r)?;
    let total_entries = read_u64_le(r)?;
    let central_directory_size = read_u64_le(r)?;
    let central_directory_offset = read_u64_le(r)?;

    Ok(Zip64EocdRecord {
        total_entries,
        central_directory_size,
        central_directory_offset,
    })
}

/// Opens an archive on the preferred seekable path: find the EOCD,
/// follow ZIP64 if needed, then read every central-directory entry.
/// Falls back to [`scan_forward`] when the backward EOCD scan fails,
/// per §4.7.
pub fn read_archive_index<R: Read + Seek>(
    r: &mut R,
    fallback: FallbackEncoding,
) -> Result<ArchiveIndex> {
    r.seek(SeekFrom::Start(0))?;
    if byte_codec::skip_pk00_prefix(r)? {
        warn!("PK00 prefix found at archive start; skipping");
    }
    r.seek(SeekFrom::Start(0))?;

    let eocd_offset = match find_eocd(r) {
        Ok(offset) => offset,
        Err(_) => {
            warn!("EOCD not found by backward scan; falling back to forward scan recovery");
            return scan_forward(r, fallback);
        }
    };
    let eocd = read_end_of_central_directory(r, eocd_offset, fallback)?;
    debug!(
        total_entries = eocd.total_entries,
        cd_offset = eocd.central_directory_offset,
        is_zip64 = eocd.is_zip64,
        "read end of central directory"
    );

    r.seek(SeekFrom::Start(eocd.central_directory_offset))?;
    let mut entries = Vec::with_capacity(eocd.total_entries.min(1 << 20) as usize);
    while let Some(entry) = entry_reader::read_central_directory_entry(r, fallback)? {
        entries.push(entry);
    }
    if entries.len() as u64 != eocd.total_entries {
        warn!(
            expected = eocd.total_entries,
            found = entries.len(),
            "central directory entry count mismatch; continuing with entries actually found"
        );
    }

    Ok(ArchiveIndex {
        entries,
        comment: eocd.comment,
        is_zip64: eocd.is_zip64,
    })
}

/// Forward fallback path for a seekable source whose EOCD couldn't be
/// found by the backward scan (truncated comment, corrupted trailer,
/// etc.), per §4.7: scan from position 0, reading local headers one at
/// a time and skipping file data either by the header's own sizes or,
/// when bit 3 leaves them at zero, by scanning for the trailing data
/// descriptor. Once the local headers run out, read whatever central
/// directory follows and merge it in by filename -- central-directory
/// data (comment, external attributes, the real local-header offset)
/// wins when present; a local-scan-only entry keeps what its own header
/// said.
pub fn scan_forward<R: Read + Seek>(r: &mut R, fallback: FallbackEncoding) -> Result<ArchiveIndex> {
    r.seek(SeekFrom::Start(0))?;
    if byte_codec::skip_pk00_prefix(r)? {
        warn!("PK00 prefix found at archive start; skipping");
    }

    let mut locals: Vec<(u64, entry_reader::ParsedLocalHeader)> = Vec::new();
    loop {
        let offset = r.stream_position()?;
        let mut sig_buf = [0u8; 4];
        match r.read_exact(&mut sig_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let signature = u32::from_le_bytes(sig_buf);
        if signature != SIG_LOCAL_FILE_HEADER {
            // Not a local header: rewind so the central-directory read
            // below sees this signature as its own first byte.
            r.seek(SeekFrom::Start(offset))?;
            break;
        }
        let header = entry_reader::parse_local_header_body(r, fallback)?;
        trace!(name = %header.name, offset, "forward scan found local header");
        let has_descriptor = header.bit_flags & bit_flags::DATA_DESCRIPTOR != 0;
        if has_descriptor && header.compressed_size == 0 {
            entry_reader::scan_until_data_descriptor(r, false, header.is_zip64)?;
        } else {
            let mut remaining = header.compressed_size;
            let mut sink = [0u8; 8192];
            while remaining > 0 {
                let chunk = remaining.min(sink.len() as u64) as usize;
                r.read_exact(&mut sink[..chunk])?;
                remaining -= chunk as u64;
            }
            if has_descriptor {
                entry_reader::consume_known_data_descriptor(r, header.is_zip64)?;
            }
        }
        locals.push((offset, header));
    }

    let mut by_name: HashMap<String, ParsedCentralDirEntry> = HashMap::new();
    while let Some(entry) = entry_reader::read_central_directory_entry(r, fallback)? {
        by_name.insert(entry.name.clone(), entry);
    }
    if by_name.len() != locals.len() {
        debug!(
            local_count = locals.len(),
            central_count = by_name.len(),
            "forward scan: local header count and central directory entry count differ"
        );
    }

    let entries = locals
        .into_iter()
        .map(|(offset, local)| match by_name.remove(&local.name) {
            Some(from_central) => from_central,
            None => ParsedCentralDirEntry {
                version_made_by: local.version_needed,
                version_needed: local.version_needed,
                bit_flags: local.bit_flags,
                compression_method: local.compression_method,
                last_modified: local.last_modified,
                crc32: local.crc32,
                compressed_size: local.compressed_size,
                uncompressed_size: local.uncompressed_size,
                name: local.name,
                extra_field: local.extra_field,
                comment: String::new(),
                external_attributes: 0,
                relative_offset_of_local_header: offset,
                is_zip64: local.is_zip64,
            },
        })
        .collect();

    warn!("recovered archive index via forward scan; EOCD was not reachable by backward search");

    Ok(ArchiveIndex {
        entries,
        comment: String::new(),
        is_zip64: false,
    })
}
