//! The per-entry save algorithm: header emission, the compression/
//! encryption pipeline, and seek-back back-patching of fields that
//! aren't known until the entry's body has been written.

use std::io::{self, Read, Seek, SeekFrom, Write};

use chrono::NaiveDateTime;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use crate::byte_codec::{write_u16_le, write_u32_le, MsDosDateTime, SIG_LOCAL_FILE_HEADER};
use crate::cipher::{ClassicEncryptor, EncryptingWriter};
use crate::crc32::{Crc32, CountingWriter, CrcReader};
use crate::encoding::{self, Encoding, FallbackEncoding};
use crate::entry::{bit_flags, CompressionMethod, VERSION_NEEDED_CLASSIC, VERSION_NEEDED_ZIP64};
use crate::entry_reader::ZIP64_EXTRA_ID;
use crate::error::{Result, ZipError};
use crate::options::Zip64Policy;

/// Size in bytes of the fixed local file header block (through extra
/// length), not counting the variable-length name/extra that follow.
const LOCAL_HEADER_FIXED_LEN: u64 = 30;
/// Size of the provisional ZIP64 extra-field slot reserved up front so
/// the header never has to grow after the name has been written.
const ZIP64_EXTRA_RESERVED_LEN: usize = 32;

const INCOMPRESSIBLE_EXTENSIONS: &[&str] = &[
    "mp3", "m4a", "flac", "png", "jpg", "jpeg", "gif", "webp", "mp4", "mov", "mkv", "avi", "zip",
    "gz", "bz2", "7z", "xz", "rar", "docx", "xlsx", "pptx", "pdf",
];

fn looks_incompressible(name: &str) -> bool {
    name.rsplit('.')
        .next()
        .map(|ext| INCOMPRESSIBLE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn choose_compression(name: &str, requested: CompressionMethod) -> CompressionMethod {
    if requested == CompressionMethod::Store || looks_incompressible(name) {
        CompressionMethod::Store
    } else {
        CompressionMethod::Deflate
    }
}

/// A seekable, truncatable sink. Both the real save-to-file path (backed
/// by a temp [`std::fs::File`]) and tests (backed by an in-memory cursor)
/// implement this so the retry-on-inflation and zero-length paths, which
/// both need to discard already-written bytes, work identically.
pub trait TruncatableSeekWrite: Write + Seek {
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl TruncatableSeekWrite for std::fs::File {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

impl TruncatableSeekWrite for io::Cursor<Vec<u8>> {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.get_mut().truncate(len as usize);
        Ok(())
    }
}

/// Everything the writer needs to know about a single file entry before
/// its body is streamed through.
pub struct EntryWriteRequest<'a> {
    pub name: &'a str,
    pub comment: &'a str,
    pub last_modified: NaiveDateTime,
    pub external_attributes: u32,
    pub compression_method: CompressionMethod,
    pub password: Option<&'a str>,
    pub zip64_policy: Zip64Policy,
    pub fallback_encoding: FallbackEncoding,
    pub compression_level: u32,
}

/// What actually happened, needed to build the corresponding
/// central-directory record.
pub struct WrittenEntry {
    pub local_header_offset: u64,
    pub name_bytes: Vec<u8>,
    pub name_encoding: Encoding,
    pub comment_bytes: Vec<u8>,
    pub bit_flags: u16,
    pub version_needed: u16,
    pub compression_method: CompressionMethod,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub extra_field: Vec<u8>,
    pub external_attributes: u32,
    pub last_modified: NaiveDateTime,
}

enum CipherSink<W: Write> {
    Plain(W),
    Encrypted(EncryptingWriter<W>),
}

impl<W: Write> Write for CipherSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            CipherSink::Plain(w) => w.write(buf),
            CipherSink::Encrypted(w) => w.write(buf),
        }
    }
    fn flush(&mut self) -> io::Result<()> {
        match self {
            CipherSink::Plain(w) => w.flush(),
            CipherSink::Encrypted(w) => w.flush(),
        }
    }
}

impl<W: Write> CipherSink<W> {
    fn into_inner(self) -> W {
        match self {
            CipherSink::Plain(w) => w,
            CipherSink::Encrypted(w) => w.into_inner(),
        }
    }
}

fn crc_and_len(mut reader: impl Read) -> Result<(u32, u64)> {
    let mut crc = Crc32::new();
    let mut buf = [0u8; 8192];
    let mut len = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        crc.update(&buf[..n]);
        len += n as u64;
    }
    Ok((crc.value(), len))
}

/// Streams `method`-compressed, optionally encrypted, plaintext from
/// `reader` into `sink`, returning (crc32, uncompressed_size, bytes
/// written to `sink`). `sink` is whatever sits after the compression
/// stage: a [`CountingWriter`] or an [`EncryptingWriter`] around one.
/// Writes a regular file entry to a seekable, truncatable sink, running
/// the full compression/encryption pipeline and back-patching the header
/// once the body's true size and CRC are known.
pub fn write_file_entry<W: TruncatableSeekWrite>(
    w: &mut W,
    req: &EntryWriteRequest,
    mut open_reader: impl FnMut() -> Result<Box<dyn Read + 'static>>,
) -> Result<WrittenEntry> {
    let local_header_offset = w.stream_position()?;
    let name_encoded = encoding::encode_with_policy(req.name, req.fallback_encoding);
    let comment_encoded = encoding::encode_with_policy(req.comment, req.fallback_encoding);

    let mut bit_flags = 0u16;
    if name_encoded.encoding == Encoding::Utf8 || comment_encoded.encoding == Encoding::Utf8 {
        bit_flags |= bit_flags::UTF8_NAMES;
    }
    if req.password.is_some() {
        bit_flags |= bit_flags::ENCRYPTED;
    }

    let mut method = choose_compression(req.name, req.compression_method);
    let reserve_zip64 = req.zip64_policy != Zip64Policy::Never;

    let precomputed_crc = if req.password.is_some() {
        crc_and_len(open_reader()?)?.0
    } else {
        0
    };

    write_local_header_placeholder(
        w,
        VERSION_NEEDED_CLASSIC,
        bit_flags,
        method,
        &req.last_modified,
        &name_encoded.bytes,
        reserve_zip64,
    )?;

    let data_start = w.stream_position()?;

    let mut encryptor_header_len = 0u64;
    let mut encryptor = None;
    if let Some(password) = req.password {
        let mut enc = ClassicEncryptor::new(password.as_bytes());
        let verify_byte = (precomputed_crc >> 24) as u8;
        let header = enc.build_header(entropy_bytes(), verify_byte);
        w.write_all(&header)?;
        encryptor_header_len = header.len() as u64;
        encryptor = Some(enc);
    }

    let (crc32, uncompressed_size, payload_size) =
        stream_body(&mut open_reader()?, method, &mut *w, req.compression_level, encryptor.take())?;

    let mut final_method = method;
    let mut final_crc = crc32;
    let mut final_uncompressed = uncompressed_size;
    let mut final_payload = payload_size;

    if uncompressed_size == 0 {
        w.seek(SeekFrom::Start(data_start))?;
        w.truncate(data_start)?;
        final_method = CompressionMethod::Store;
        final_crc = 0;
        final_payload = 0;
    } else if method == CompressionMethod::Deflate && payload_size >= uncompressed_size {
        // Retry-on-inflation: the source is reopenable, so rewrite this
        // entry as STORE instead of keeping a DEFLATE output that grew.
        w.seek(SeekFrom::Start(data_start))?;
        w.truncate(data_start)?;
        method = CompressionMethod::Store;
        let mut encryptor = req.password.map(|p| {
            let mut enc = ClassicEncryptor::new(p.as_bytes());
            let verify_byte = (precomputed_crc >> 24) as u8;
            let header = enc.build_header(entropy_bytes(), verify_byte);
            (enc, header)
        });
        if let Some((_, header)) = &encryptor {
            w.write_all(header)?;
        }
        let enc = encryptor.take().map(|(e, _)| e);
        let (crc2, uncompressed2, payload2) =
            stream_body(&mut open_reader()?, method, &mut *w, req.compression_level, enc)?;
        final_method = method;
        final_crc = crc2;
        final_uncompressed = uncompressed2;
        final_payload = payload2;
    }

    let compressed_on_disk = final_payload + if req.password.is_some() { encryptor_header_len } else { 0 };

    let is_zip64 = match req.zip64_policy {
        Zip64Policy::Always => true,
        Zip64Policy::Never => false,
        Zip64Policy::AsNecessary => {
            final_uncompressed > u32::MAX as u64
                || compressed_on_disk > u32::MAX as u64
                || local_header_offset > u32::MAX as u64
        }
    };

    if req.zip64_policy == Zip64Policy::Never
        && (final_uncompressed > u32::MAX as u64
            || compressed_on_disk > u32::MAX as u64
            || local_header_offset > u32::MAX as u64)
    {
        return Err(ZipError::Zip64Required(req.name.to_string()));
    }

    let version_needed = if is_zip64 {
        VERSION_NEEDED_ZIP64
    } else {
        VERSION_NEEDED_CLASSIC
    };

    let extra_field = if reserve_zip64 {
        Some(build_zip64_extra(
            is_zip64,
            final_uncompressed,
            compressed_on_disk,
            local_header_offset,
        ))
    } else {
        None
    };

    let end_of_entry = w.stream_position()?;
    patch_local_header(
        w,
        local_header_offset,
        version_needed,
        final_method,
        final_crc,
        compressed_on_disk,
        final_uncompressed,
        name_encoded.bytes.len() as u64,
        extra_field.as_deref(),
    )?;
    w.seek(SeekFrom::Start(end_of_entry))?;

    Ok(WrittenEntry {
        local_header_offset,
        name_bytes: name_encoded.bytes,
        name_encoding: name_encoded.encoding,
        comment_bytes: comment_encoded.bytes,
        bit_flags,
        version_needed,
        compression_method: final_method,
        crc32: final_crc,
        compressed_size: compressed_on_disk,
        uncompressed_size: final_uncompressed,
        extra_field: extra_field.unwrap_or_default(),
        external_attributes: req.external_attributes,
        last_modified: req.last_modified,
    })
}

/// Writes one 46-byte-fixed central-directory record (plus its
/// variable-length name/extra/comment) describing an already-written
/// entry.
pub fn write_central_directory_record<W: Write>(w: &mut W, entry: &WrittenEntry) -> Result<()> {
    use crate::byte_codec::SIG_CENTRAL_DIRECTORY;

    let is_zip64 = entry.extra_field.len() >= 4
        && u16::from_le_bytes([entry.extra_field[0], entry.extra_field[1]]) == ZIP64_EXTRA_ID;
    let sentinel32 = is_zip64
        && (entry.compressed_size > u32::MAX as u64
            || entry.uncompressed_size > u32::MAX as u64
            || entry.local_header_offset > u32::MAX as u64);

    write_u32_le(w, SIG_CENTRAL_DIRECTORY)?;
    write_u16_le(w, entry.version_needed)?; // version made by: this engine never targets another host OS
    write_u16_le(w, entry.version_needed)?;
    write_u16_le(w, entry.bit_flags)?;
    write_u16_le(w, entry.compression_method.as_u16())?;
    MsDosDateTime::pack(&entry.last_modified).write(w)?;
    write_u32_le(w, entry.crc32)?;
    write_u32_le(
        w,
        if sentinel32 { u32::MAX } else { entry.compressed_size as u32 },
    )?;
    write_u32_le(
        w,
        if sentinel32 { u32::MAX } else { entry.uncompressed_size as u32 },
    )?;
    write_u16_le(w, entry.name_bytes.len() as u16)?;
    write_u16_le(w, entry.extra_field.len() as u16)?;
    write_u16_le(w, entry.comment_bytes.len() as u16)?;
    write_u16_le(w, 0)?; // disk number start
    write_u16_le(w, 0)?; // internal file attributes
    write_u32_le(w, entry.external_attributes)?;
    write_u32_le(
        w,
        if sentinel32 {
            u32::MAX
        } else {
            entry.local_header_offset as u32
        },
    )?;
    w.write_all(&entry.name_bytes)?;
    w.write_all(&entry.extra_field)?;
    w.write_all(&entry.comment_bytes)?;
    Ok(())
}

/// Writes a directory-marker entry: no body, STORE method, all-zero
/// sizes and CRC.
pub fn write_directory_entry<W: Write + Seek>(
    w: &mut W,
    req: &EntryWriteRequest,
) -> Result<WrittenEntry> {
    let local_header_offset = w.stream_position()?;
    let name_encoded = encoding::encode_with_policy(req.name, req.fallback_encoding);
    let comment_encoded = encoding::encode_with_policy(req.comment, req.fallback_encoding);
    let mut bit_flags = 0u16;
    if name_encoded.encoding == Encoding::Utf8 || comment_encoded.encoding == Encoding::Utf8 {
        bit_flags |= bit_flags::UTF8_NAMES;
    }
    write_local_header_placeholder(
        w,
        VERSION_NEEDED_CLASSIC,
        bit_flags,
        CompressionMethod::Store,
        &req.last_modified,
        &name_encoded.bytes,
        false,
    )?;
    Ok(WrittenEntry {
        local_header_offset,
        name_bytes: name_encoded.bytes,
        name_encoding: name_encoded.encoding,
        comment_bytes: comment_encoded.bytes,
        bit_flags,
        version_needed: VERSION_NEEDED_CLASSIC,
        compression_method: CompressionMethod::Store,
        crc32: 0,
        compressed_size: 0,
        uncompressed_size: 0,
        extra_field: Vec::new(),
        external_attributes: req.external_attributes,
        last_modified: req.last_modified,
    })
}

#[allow(clippy::too_many_arguments)]
fn write_local_header_placeholder<W: Write + Seek>(
    w: &mut W,
    version_needed: u16,
    bit_flags: u16,
    method: CompressionMethod,
    last_modified: &NaiveDateTime,
    name_bytes: &[u8],
    reserve_zip64: bool,
) -> Result<()> {
    write_u32_le(w, SIG_LOCAL_FILE_HEADER)?;
    write_u16_le(w, version_needed)?;
    write_u16_le(w, bit_flags)?;
    write_u16_le(w, method.as_u16())?;
    MsDosDateTime::pack(last_modified).write(w)?;
    write_u32_le(w, 0)?; // crc placeholder
    write_u32_le(w, 0)?; // compressed size placeholder
    write_u32_le(w, 0)?; // uncompressed size placeholder
    write_u16_le(w, name_bytes.len() as u16)?;
    write_u16_le(w, if reserve_zip64 { ZIP64_EXTRA_RESERVED_LEN as u16 } else { 0 })?;
    w.write_all(name_bytes)?;
    if reserve_zip64 {
        write_u16_le(w, 0xFFFF)?; // placeholder header id, ignored by readers
        write_u16_le(w, (ZIP64_EXTRA_RESERVED_LEN - 4) as u16)?;
        w.write_all(&vec![0u8; ZIP64_EXTRA_RESERVED_LEN - 4])?;
    }
    Ok(())
}

fn stream_body<W: Write>(
    reader: &mut (impl Read + ?Sized),
    method: CompressionMethod,
    sink: W,
    level: u32,
    encryptor: Option<ClassicEncryptor>,
) -> Result<(u32, u64, u64)> {
    let counting = CountingWriter::new(sink);
    let cipher_sink = match encryptor {
        Some(enc) => CipherSink::Encrypted(EncryptingWriter::new(counting, enc)),
        None => CipherSink::Plain(counting),
    };
    let mut crc_reader = CrcReader::new(reader);
    let cipher_sink = match method {
        CompressionMethod::Store => {
            let mut cipher_sink = cipher_sink;
            io::copy(&mut crc_reader, &mut cipher_sink)?;
            cipher_sink
        }
        CompressionMethod::Deflate => {
            let mut encoder = DeflateEncoder::new(cipher_sink, Compression::new(level));
            io::copy(&mut crc_reader, &mut encoder)?;
            encoder.finish()?
        }
    };
    let counting = cipher_sink.into_inner();
    Ok((crc_reader.crc32(), crc_reader.bytes_read(), counting.bytes_written()))
}

fn build_zip64_extra(active: bool, uncompressed: u64, compressed: u64, offset: u64) -> Vec<u8> {
    let mut extra = Vec::with_capacity(ZIP64_EXTRA_RESERVED_LEN);
    if active {
        extra.extend_from_slice(&ZIP64_EXTRA_ID.to_le_bytes());
        extra.extend_from_slice(&28u16.to_le_bytes());
        extra.extend_from_slice(&uncompressed.to_le_bytes());
        extra.extend_from_slice(&compressed.to_le_bytes());
        extra.extend_from_slice(&offset.to_le_bytes());
        extra.extend_from_slice(&[0u8; 4]);
    } else {
        extra.extend_from_slice(&0xFFFFu16.to_le_bytes());
        extra.extend_from_slice(&((ZIP64_EXTRA_RESERVED_LEN - 4) as u16).to_le_bytes());
        extra.extend_from_slice(&vec![0u8; ZIP64_EXTRA_RESERVED_LEN - 4]);
    }
    extra
}

#[allow(clippy::too_many_arguments)]
fn patch_local_header<W: Write + Seek>(
    w: &mut W,
    local_header_offset: u64,
    version_needed: u16,
    method: CompressionMethod,
    crc32: u32,
    compressed_size: u64,
    uncompressed_size: u64,
    name_len: u64,
    extra_field: Option<&[u8]>,
) -> Result<()> {
    w.seek(SeekFrom::Start(local_header_offset + 4))?;
    write_u16_le(w, version_needed)?;
    w.seek(SeekFrom::Current(2))?; // bit flags unchanged
    write_u16_le(w, method.as_u16())?;
    w.seek(SeekFrom::Start(local_header_offset + 14))?;
    write_u32_le(w, crc32)?;
    let sentinel = compressed_size > u32::MAX as u64 || uncompressed_size > u32::MAX as u64;
    write_u32_le(w, if sentinel { u32::MAX } else { compressed_size as u32 })?;
    write_u32_le(w, if sentinel { u32::MAX } else { uncompressed_size as u32 })?;
    if let Some(extra) = extra_field {
        w.seek(SeekFrom::Start(
            local_header_offset + LOCAL_HEADER_FIXED_LEN + name_len,
        ))?;
        w.write_all(extra)?;
    }
    Ok(())
}

/// Fills the non-verification 11 bytes of an encryption header. The
/// original PKZIP format calls for random bytes here; this engine derives
/// them from the plaintext-independent key schedule starting state so no
/// external RNG dependency is needed for a library whose threat model
/// already excludes strong encryption.
fn entropy_bytes() -> [u8; 11] {
    let mut bytes = [0u8; 11];
    let mut state = Crc32::new();
    state.update(b"pk-zip-entropy");
    let seed = state.value();
    for (i, b) in bytes.iter_mut().enumerate() {
        *b = seed.wrapping_mul(i as u32 + 1).to_le_bytes()[i % 4];
    }
    bytes
}
