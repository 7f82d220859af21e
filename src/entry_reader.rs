//! Parses local file headers and central-directory headers from a byte
//! stream, resolving ZIP64 extra-field promotion along the way.

use std::io::{Read, Seek, SeekFrom};

use crate::byte_codec::{
    self, read_u16_le, read_u32_le, MsDosDateTime, SIG_CENTRAL_DIRECTORY, SIG_DATA_DESCRIPTOR,
    SIG_EOCD, SIG_LOCAL_FILE_HEADER, SIG_ZIP64_EOCD_LOCATOR, ZIP64_SENTINEL_32,
};
use crate::encoding::{self, FallbackEncoding};
use crate::entry::{bit_flags, CompressionMethod};
use crate::error::{Result, ZipError};

/// The ZIP64 extra-field header ID.
pub const ZIP64_EXTRA_ID: u16 = 0x0001;

/// The fields a local file header carries, after ZIP64 resolution.
#[derive(Debug, Clone)]
pub struct ParsedLocalHeader {
    pub version_needed: u16,
    pub bit_flags: u16,
    pub compression_method: u16,
    pub last_modified: chrono::NaiveDateTime,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub name: String,
    pub extra_field: Vec<u8>,
    pub is_zip64: bool,
}

/// The fields a central-directory header carries, after ZIP64 resolution.
#[derive(Debug, Clone)]
pub struct ParsedCentralDirEntry {
    pub version_made_by: u16,
    pub version_needed: u16,
    pub bit_flags: u16,
    pub compression_method: u16,
    pub last_modified: chrono::NaiveDateTime,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub name: String,
    pub extra_field: Vec<u8>,
    pub comment: String,
    pub external_attributes: u32,
    pub relative_offset_of_local_header: u64,
    pub is_zip64: bool,
}

/// Reads a local file header at the stream's current position.
///
/// Returns `Ok(None)` if the signature at this position is the central
/// directory or EOCD signature instead (normal termination of a
/// sequential scan); any other unrecognized signature is `BadSignature`.
pub fn read_local_header<R: Read + Seek>(
    r: &mut R,
    fallback: FallbackEncoding,
) -> Result<Option<ParsedLocalHeader>> {
    let offset = r.stream_position()?;
    match byte_codec::probe_signature(
        r,
        &[SIG_LOCAL_FILE_HEADER, SIG_CENTRAL_DIRECTORY, SIG_EOCD],
    )? {
        Some(SIG_LOCAL_FILE_HEADER) => {}
        Some(_) => return Ok(None),
        None => {
            let found = read_u32_le(r)?;
            return Err(ZipError::BadSignature {
                expected: SIG_LOCAL_FILE_HEADER,
                found,
                offset,
            });
        }
    }
    Ok(Some(parse_local_header_body(r, fallback)?))
}

/// Forward-only variant for use on a non-seekable stream: the signature
/// has already been consumed by the caller and is passed in.
pub fn parse_local_header_body<R: Read>(
    r: &mut R,
    fallback: FallbackEncoding,
) -> Result<ParsedLocalHeader> {
    // `fallback` is accepted for symmetry with the writer's encoding policy,
    // but reading always follows bit 11: UTF-8 when set, IBM437 otherwise.
    let _ = fallback;
    let version_needed = read_u16_le(r)?;
    let bit_flags = read_u16_le(r)?;
    let compression_method = read_u16_le(r)?;
    let packed = MsDosDateTime::read(r)?;
    let crc32 = read_u32_le(r)?;
    let mut compressed_size = read_u32_le(r)? as u64;
    let mut uncompressed_size = read_u32_le(r)? as u64;
    let name_len = read_u16_le(r)? as usize;
    let extra_len = read_u16_le(r)? as usize;

    let mut name_buf = vec![0u8; name_len];
    r.read_exact(&mut name_buf)?;
    let utf8_flag = bit_flags & bit_flags::UTF8_NAMES != 0;
    let name = encoding::decode_with_flag(&name_buf, utf8_flag);

    let mut extra_field = vec![0u8; extra_len];
    r.read_exact(&mut extra_field)?;

    let mut is_zip64 = false;
    if compressed_size == ZIP64_SENTINEL_32 as u64 || uncompressed_size == ZIP64_SENTINEL_32 as u64
    {
        if let Some(zip64) = find_zip64_extra(&extra_field) {
            is_zip64 = true;
            let mut cursor = 0usize;
            if uncompressed_size == ZIP64_SENTINEL_32 as u64 && cursor + 8 <= zip64.len() {
                uncompressed_size = u64::from_le_bytes(zip64[cursor..cursor + 8].try_into().unwrap());
                cursor += 8;
            }
            if compressed_size == ZIP64_SENTINEL_32 as u64 && cursor + 8 <= zip64.len() {
                compressed_size = u64::from_le_bytes(zip64[cursor..cursor + 8].try_into().unwrap());
            }
        }
    }

    Ok(ParsedLocalHeader {
        version_needed,
        bit_flags,
        compression_method,
        last_modified: packed.unpack(),
        crc32,
        compressed_size,
        uncompressed_size,
        name,
        extra_field,
        is_zip64,
    })
}

/// Reads one central-directory header at the stream's current position.
///
/// Returns `Ok(None)` once the central-directory signature is no longer
/// found (i.e. the EOCD, or a ZIP64 locator, has been reached).
pub fn read_central_directory_entry<R: Read + Seek>(
    r: &mut R,
    fallback: FallbackEncoding,
) -> Result<Option<ParsedCentralDirEntry>> {
    match byte_codec::probe_signature(
        r,
        &[SIG_CENTRAL_DIRECTORY, SIG_EOCD, SIG_ZIP64_EOCD_LOCATOR],
    )? {
        Some(SIG_CENTRAL_DIRECTORY) => {}
        Some(_) => return Ok(None),
        None => return Ok(None),
    }
    Ok(Some(parse_central_dir_body(r, fallback)?))
}

/// Forward-only variant for use on a non-seekable stream (the fallback
/// scan): the central-directory signature has already been consumed by
/// the caller.
pub fn parse_central_dir_body<R: Read>(
    r: &mut R,
    fallback: FallbackEncoding,
) -> Result<ParsedCentralDirEntry> {
    let version_made_by = read_u16_le(r)?;
    let version_needed = read_u16_le(r)?;
    let bit_flags = read_u16_le(r)?;
    let compression_method = read_u16_le(r)?;
    let packed = MsDosDateTime::read(r)?;
    let crc32 = read_u32_le(r)?;
    let mut compressed_size = read_u32_le(r)? as u64;
    let mut uncompressed_size = read_u32_le(r)? as u64;
    let name_len = read_u16_le(r)? as usize;
    let extra_len = read_u16_le(r)? as usize;
    let comment_len = read_u16_le(r)? as usize;
    let _disk_number_start = read_u16_le(r)?;
    let _internal_attributes = read_u16_le(r)?;
    let external_attributes = read_u32_le(r)?;
    let mut relative_offset_of_local_header = read_u32_le(r)? as u64;

    let mut name_buf = vec![0u8; name_len];
    r.read_exact(&mut name_buf)?;
    let utf8_flag = bit_flags & bit_flags::UTF8_NAMES != 0;
    let name = encoding::decode_with_flag(&name_buf, utf8_flag);

    let mut extra_field = vec![0u8; extra_len];
    r.read_exact(&mut extra_field)?;

    let mut comment_buf = vec![0u8; comment_len];
    r.read_exact(&mut comment_buf)?;
    let comment = encoding::decode_with_flag(&comment_buf, utf8_flag);

    let mut is_zip64 = false;
    if compressed_size == ZIP64_SENTINEL_32 as u64
        || uncompressed_size == ZIP64_SENTINEL_32 as u64
        || relative_offset_of_local_header == ZIP64_SENTINEL_32 as u64
    {
        if let Some(zip64) = find_zip64_extra(&extra_field) {
            is_zip64 = true;
            let mut cursor = 0usize;
            if uncompressed_size == ZIP64_SENTINEL_32 as u64 && cursor + 8 <= zip64.len() {
                uncompressed_size = u64::from_le_bytes(zip64[cursor..cursor + 8].try_into().unwrap());
                cursor += 8;
            }
            if compressed_size == ZIP64_SENTINEL_32 as u64 && cursor + 8 <= zip64.len() {
                compressed_size = u64::from_le_bytes(zip64[cursor..cursor + 8].try_into().unwrap());
                cursor += 8;
            }
            if relative_offset_of_local_header == ZIP64_SENTINEL_32 as u64 && cursor + 8 <= zip64.len()
            {
                relative_offset_of_local_header =
                    u64::from_le_bytes(zip64[cursor..cursor + 8].try_into().unwrap());
            }
        }
    }

    let _ = fallback; // the fallback encoding only matters when bit 11 is clear and decode_with_flag already applies IBM437 in that case

    Ok(ParsedCentralDirEntry {
        version_made_by,
        version_needed,
        bit_flags,
        compression_method,
        last_modified: packed.unpack(),
        crc32,
        compressed_size,
        uncompressed_size,
        name,
        extra_field,
        comment,
        external_attributes,
        relative_offset_of_local_header,
        is_zip64,
    })
}

/// Scans `extra_field` for the ZIP64 extended-information record
/// (header ID 0x0001) and returns its payload.
pub fn find_zip64_extra(extra_field: &[u8]) -> Option<&[u8]> {
    let mut i = 0usize;
    while i + 4 <= extra_field.len() {
        let id = u16::from_le_bytes([extra_field[i], extra_field[i + 1]]);
        let len = u16::from_le_bytes([extra_field[i + 2], extra_field[i + 3]]) as usize;
        let start = i + 4;
        if start + len > extra_field.len() {
            return None;
        }
        if id == ZIP64_EXTRA_ID {
            return Some(&extra_field[start..start + len]);
        }
        i = start + len;
    }
    None
}

pub fn compression_method_of(raw: u16) -> Result<CompressionMethod> {
    CompressionMethod::from_u16(raw)
        .ok_or_else(|| ZipError::UnsupportedFeature(format!("compression method {raw}")))
}

/// Given the offset of a local header and the header's filename/extra
/// lengths, returns the offset at which the entry's file data begins.
pub fn file_data_offset(local_header_offset: u64, name_len: u16, extra_len: u16) -> u64 {
    local_header_offset + 30 + name_len as u64 + extra_len as u64
}

/// Fast-path used by [`crate::archive_reader`] to locate file data without
/// re-decoding the name: reads just the 30-byte fixed block and the
/// variable-length lengths, skipping name/extra entirely.
pub fn locate_file_data<R: Read + Seek>(r: &mut R, local_header_offset: u64) -> Result<u64> {
    r.seek(SeekFrom::Start(local_header_offset))?;
    let signature = read_u32_le(r)?;
    if signature != SIG_LOCAL_FILE_HEADER {
        return Err(ZipError::BadSignature {
            expected: SIG_LOCAL_FILE_HEADER,
            found: signature,
            offset: local_header_offset,
        });
    }
    r.seek(SeekFrom::Current(22))?; // version, flags, method, time, date, crc, compSize, uncompSize
    let name_len = read_u16_le(r)?;
    let extra_len = read_u16_le(r)?;
    Ok(file_data_offset(local_header_offset, name_len, extra_len))
}

/// Peeks for an unexpected trailing data descriptor after an entry whose
/// bit 3 was clear (§4.4 tolerance): some writers emit one anyway. Only
/// consumes it if the CRC and sizes that follow match the entry's known
/// values; otherwise rewinds.
pub fn skip_unexpected_data_descriptor<R: Read + Seek>(
    r: &mut R,
    expected_crc: u32,
    expected_compressed_size: u64,
    expected_uncompressed_size: u64,
) -> Result<()> {
    let start = r.stream_position()?;
    let mut word = [0u8; 4];
    if r.read_exact(&mut word).is_err() {
        r.seek(SeekFrom::Start(start))?;
        return Ok(());
    }
    let mut first = u32::from_le_bytes(word);
    if first == SIG_DATA_DESCRIPTOR {
        let mut crc_buf = [0u8; 4];
        if r.read_exact(&mut crc_buf).is_err() {
            r.seek(SeekFrom::Start(start))?;
            return Ok(());
        }
        first = u32::from_le_bytes(crc_buf);
    }
    if first != expected_crc {
        r.seek(SeekFrom::Start(start))?;
        return Ok(());
    }
    let comp = read_u32_le(r)?;
    let uncomp = read_u32_le(r)?;
    if comp as u64 == expected_compressed_size && uncomp as u64 == expected_uncompressed_size {
        Ok(())
    } else {
        r.seek(SeekFrom::Start(start))?;
        Ok(())
    }
}

/// Reads forward byte-by-byte until the data descriptor signature turns
/// up (§4.4: a bit-3 entry whose local header left sizes at zero, so the
/// body's end can't be known ahead of time). When `keep` is true the
/// bytes read before the signature are returned as the entry's body;
/// otherwise they're discarded, for the skip-without-reading case.
pub fn scan_until_data_descriptor<R: Read>(
    r: &mut R,
    keep: bool,
    is_zip64: bool,
) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    let mut window = [0u8; 4];
    let mut window_len = 0usize;
    loop {
        let mut byte = [0u8; 1];
        let n = r.read(&mut byte)?;
        if n == 0 {
            return Err(ZipError::BadRead(
                "stream ended before a data descriptor was found".into(),
            ));
        }
        if window_len == 4 {
            if keep {
                body.push(window[0]);
            }
            window.copy_within(1..4, 0);
            window[3] = byte[0];
        } else {
            window[window_len] = byte[0];
            window_len += 1;
        }
        if window_len == 4 && u32::from_le_bytes(window) == SIG_DATA_DESCRIPTOR {
            // CRC + sizes follow: 4-byte fields classically, 8-byte under ZIP64.
            let rest_len = if is_zip64 { 4 + 16 } else { 4 + 8 };
            let mut rest = vec![0u8; rest_len];
            r.read_exact(&mut rest)?;
            return Ok(body);
        }
    }
}

/// Consumes a data descriptor that follows a body read with a
/// known length, tolerating the optional 4-byte signature prefix (§6).
pub fn consume_known_data_descriptor<R: Read>(r: &mut R, is_zip64: bool) -> Result<()> {
    let size_field_len: usize = if is_zip64 { 8 } else { 4 };
    let mut word = [0u8; 4];
    r.read_exact(&mut word)?;
    if u32::from_le_bytes(word) != SIG_DATA_DESCRIPTOR {
        // No signature prefix: what was just read is the CRC field itself,
        // so only the two size fields remain.
        let mut rest = vec![0u8; size_field_len * 2];
        r.read_exact(&mut rest)?;
        return Ok(());
    }
    let mut rest = vec![0u8; size_field_len * 2 + 4]; // CRC + two sizes
    r.read_exact(&mut rest)?;
    Ok(())
}
