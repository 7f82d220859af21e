//! Writes entries to a non-seekable sink: since the header can never be
//! revisited once its bytes have gone out, every entry sets bit 3 and
//! trails a data descriptor carrying the CRC and sizes that would
//! otherwise have been back-patched into the header.
//!
//! This is the counterpart to [`crate::entry_writer`]'s seekable,
//! back-patching save algorithm; adapted from the teacher's original
//! streaming writer, which already wrote headers this way, to this
//! crate's compression/encryption pipeline and ZIP64 extra-field layout.

use std::io::{self, Write};

use chrono::NaiveDateTime;

use crate::byte_codec::{
    write_u16_le, write_u32_le, write_u64_le, MsDosDateTime, SIG_DATA_DESCRIPTOR, SIG_EOCD,
    SIG_LOCAL_FILE_HEADER, SIG_ZIP64_EOCD_LOCATOR, SIG_ZIP64_EOCD_RECORD,
};
use crate::cipher::{ClassicEncryptor, EncryptingWriter};
use crate::crc32::{CountingWriter, Crc32, CrcReader};
use crate::encoding::{self, Encoding, FallbackEncoding};
use crate::entry::{bit_flags, CompressionMethod, VERSION_NEEDED_CLASSIC, VERSION_NEEDED_ZIP64};
use crate::entry_reader::ZIP64_EXTRA_ID;
use crate::entry_writer::{write_central_directory_record, WrittenEntry};
use crate::error::{Result, ZipError};
use crate::options::Zip64Policy;
use crate::pipeline::CompressingWriter;

/// Parameters for one streamed entry, mirroring
/// [`crate::entry_writer::EntryWriteRequest`] minus the fields that only
/// make sense with a reopenable source: this writer consumes its reader
/// exactly once and can't retry with STORE if DEFLATE inflates the data,
/// since there is no seeking back to rewrite what's already gone out.
pub struct StreamingEntryRequest<'a> {
    pub name: &'a str,
    pub comment: &'a str,
    pub last_modified: NaiveDateTime,
    pub external_attributes: u32,
    pub compression_method: CompressionMethod,
    pub password: Option<&'a str>,
    pub zip64_policy: Zip64Policy,
    pub fallback_encoding: FallbackEncoding,
    pub compression_level: u32,
    /// An optional upper bound on the plaintext size, used only to decide
    /// whether the local header needs to claim ZIP64 up front (sizes
    /// themselves are always carried in the trailing data descriptor
    /// instead, regardless of this hint). Needed because, unlike the
    /// seekable writer, this one can't go back and patch the header once
    /// the true size turns out to exceed 4 GiB.
    pub expected_size_hint: Option<u64>,
}

/// Writes zip entries one after another to a non-seekable sink, each
/// terminated by its own data descriptor, and finally the central
/// directory and EOCD.
pub struct StreamingZipWriter<W: Write> {
    sink: W,
    offset: u64,
    written: Vec<(WrittenEntry, bool)>,
    zip64_policy: Zip64Policy,
}

impl<W: Write> StreamingZipWriter<W> {
    pub fn new(sink: W, zip64_policy: Zip64Policy) -> Self {
        StreamingZipWriter {
            sink,
            offset: 0,
            written: Vec::new(),
            zip64_policy,
        }
    }

    fn entry_is_zip64(&self, req: &StreamingEntryRequest, local_header_offset: u64) -> bool {
        match req.zip64_policy {
            Zip64Policy::Always => true,
            Zip64Policy::Never => false,
            Zip64Policy::AsNecessary => {
                local_header_offset > u32::MAX as u64
                    || req.expected_size_hint.map(|s| s > u32::MAX as u64).unwrap_or(false)
            }
        }
    }

    /// Streams one entry's plaintext from `reader` through compression
    /// and (if a password is set) encryption, writing the local header
    /// up front with bit 3 set and a data descriptor at the end.
    pub fn write_entry(&mut self, req: &StreamingEntryRequest, reader: impl io::Read) -> Result<()> {
        let local_header_offset = self.offset;
        let name_encoded = encoding::encode_with_policy(req.name, req.fallback_encoding);
        let comment_encoded = encoding::encode_with_policy(req.comment, req.fallback_encoding);

        let mut flags = bit_flags::DATA_DESCRIPTOR;
        if name_encoded.encoding == Encoding::Utf8 || comment_encoded.encoding == Encoding::Utf8 {
            flags |= bit_flags::UTF8_NAMES;
        }
        if req.password.is_some() {
            flags |= bit_flags::ENCRYPTED;
        }

        let is_zip64 = self.entry_is_zip64(req, local_header_offset);
        let version_needed = if is_zip64 { VERSION_NEEDED_ZIP64 } else { VERSION_NEEDED_CLASSIC };

        self.write_local_header(version_needed, flags, req.compression_method, &req.last_modified, &name_encoded.bytes)?;
        self.offset += 30 + name_encoded.bytes.len() as u64;

        let mut encryptor_header_len = 0u64;
        let mut encryptor = None;
        if let Some(password) = req.password {
            let mut enc = ClassicEncryptor::new(password.as_bytes());
            // The true CRC isn't known until the body has been streamed,
            // so the verification byte falls back to the packed
            // modification time's high byte, per APPNOTE 6.1.5.
            let verify_byte = (MsDosDateTime::pack(&req.last_modified).time >> 8) as u8;
            let header = enc.build_header(entropy_bytes(), verify_byte);
            self.sink.write_all(&header)?;
            self.offset += header.len() as u64;
            encryptor_header_len = header.len() as u64;
            encryptor = Some(enc);
        }

        let (crc32, uncompressed_size, payload_size) = stream_body(
            reader,
            req.compression_method,
            &mut self.sink,
            req.compression_level,
            encryptor,
        )?;
        let compressed_size = payload_size + encryptor_header_len;
        self.offset += payload_size;

        // The sizes were unknown (or assumed small) when the header went
        // out; if they turned out to exceed the classic limit without
        // having claimed ZIP64 up front, there is no way to fix the
        // already-written header on a non-seekable sink.
        if !is_zip64 && (uncompressed_size > u32::MAX as u64 || compressed_size > u32::MAX as u64) {
            return Err(ZipError::Zip64Required(req.name.to_string()));
        }

        self.write_data_descriptor(crc32, compressed_size, uncompressed_size, is_zip64)?;
        self.offset += if is_zip64 { 4 + 4 + 8 + 8 } else { 4 + 4 + 4 + 4 };

        let extra_field = if is_zip64 {
            let mut extra = Vec::with_capacity(28);
            extra.extend_from_slice(&ZIP64_EXTRA_ID.to_le_bytes());
            extra.extend_from_slice(&24u16.to_le_bytes());
            extra.extend_from_slice(&uncompressed_size.to_le_bytes());
            extra.extend_from_slice(&compressed_size.to_le_bytes());
            extra.extend_from_slice(&local_header_offset.to_le_bytes());
            extra
        } else {
            Vec::new()
        };

        self.written.push((
            WrittenEntry {
                local_header_offset,
                name_bytes: name_encoded.bytes,
                name_encoding: name_encoded.encoding,
                comment_bytes: comment_encoded.bytes,
                bit_flags: flags,
                version_needed,
                compression_method: req.compression_method,
                crc32,
                compressed_size,
                uncompressed_size,
                extra_field,
                external_attributes: req.external_attributes,
                last_modified: req.last_modified,
            },
            is_zip64,
        ));
        Ok(())
    }

    fn write_local_header(
        &mut self,
        version_needed: u16,
        flags: u16,
        method: CompressionMethod,
        last_modified: &NaiveDateTime,
        name_bytes: &[u8],
    ) -> Result<()> {
        write_u32_le(&mut self.sink, SIG_LOCAL_FILE_HEADER)?;
        write_u16_le(&mut self.sink, version_needed)?;
        write_u16_le(&mut self.sink, flags)?;
        write_u16_le(&mut self.sink, method.as_u16())?;
        MsDosDateTime::pack(last_modified).write(&mut self.sink)?;
        write_u32_le(&mut self.sink, 0)?; // crc, carried in the data descriptor instead
        write_u32_le(&mut self.sink, 0)?; // compressed size, ditto
        write_u32_le(&mut self.sink, 0)?; // uncompressed size, ditto
        write_u16_le(&mut self.sink, name_bytes.len() as u16)?;
        write_u16_le(&mut self.sink, 0)?; // no local extra field: readers are told via bit 3 to trust the descriptor instead
        self.sink.write_all(name_bytes)?;
        Ok(())
    }

    fn write_data_descriptor(
        &mut self,
        crc32: u32,
        compressed_size: u64,
        uncompressed_size: u64,
        is_zip64: bool,
    ) -> Result<()> {
        write_u32_le(&mut self.sink, SIG_DATA_DESCRIPTOR)?;
        write_u32_le(&mut self.sink, crc32)?;
        if is_zip64 {
            write_u64_le(&mut self.sink, compressed_size)?;
            write_u64_le(&mut self.sink, uncompressed_size)?;
        } else {
            write_u32_le(&mut self.sink, compressed_size as u32)?;
            write_u32_le(&mut self.sink, uncompressed_size as u32)?;
        }
        Ok(())
    }

    /// Writes the central directory and EOCD (promoting to ZIP64 records
    /// when needed) and returns the underlying sink.
    pub fn finish(mut self, comment: &str) -> Result<W> {
        let central_directory_offset = self.offset;
        let mut central_directory_size = 0u64;
        for (entry, _) in &self.written {
            write_central_directory_record(&mut self.sink, entry)?;
            central_directory_size += 46
                + entry.name_bytes.len() as u64
                + entry.extra_field.len() as u64
                + entry.comment_bytes.len() as u64;
        }

        let needs_zip64 = self.zip64_policy == Zip64Policy::Always
            || self.written.len() > 0xFFFF
            || central_directory_size > u32::MAX as u64
            || central_directory_offset > u32::MAX as u64;
        if needs_zip64 {
            self.write_zip64_eocd(central_directory_size, central_directory_offset)?;
        }
        let comment_bytes = encoding::encode_for(comment, Encoding::Utf8);
        self.write_eocd(central_directory_size, central_directory_offset, &comment_bytes)?;
        Ok(self.sink)
    }

    fn write_zip64_eocd(&mut self, cd_size: u64, cd_offset: u64) -> Result<()> {
        let zip64_eocd_offset = cd_offset + cd_size;
        let entry_count = self.written.len() as u64;
        write_u32_le(&mut self.sink, SIG_ZIP64_EOCD_RECORD)?;
        write_u64_le(&mut self.sink, 44)?;
        write_u16_le(&mut self.sink, VERSION_NEEDED_ZIP64)?;
        write_u16_le(&mut self.sink, VERSION_NEEDED_ZIP64)?;
        write_u32_le(&mut self.sink, 0)?;
        write_u32_le(&mut self.sink, 0)?;
        write_u64_le(&mut self.sink, entry_count)?;
        write_u64_le(&mut self.sink, entry_count)?;
        write_u64_le(&mut self.sink, cd_size)?;
        write_u64_le(&mut self.sink, cd_offset)?;

        write_u32_le(&mut self.sink, SIG_ZIP64_EOCD_LOCATOR)?;
        write_u32_le(&mut self.sink, 0)?;
        write_u64_le(&mut self.sink, zip64_eocd_offset)?;
        write_u32_le(&mut self.sink, 1)?;
        Ok(())
    }

    fn write_eocd(&mut self, cd_size: u64, cd_offset: u64, comment_bytes: &[u8]) -> Result<()> {
        write_u32_le(&mut self.sink, SIG_EOCD)?;
        write_u16_le(&mut self.sink, 0)?;
        write_u16_le(&mut self.sink, 0)?;
        let count = self.written.len();
        let count16 = if count > 0xFFFF { 0xFFFFu16 } else { count as u16 };
        write_u16_le(&mut self.sink, count16)?;
        write_u16_le(&mut self.sink, count16)?;
        let sentinel = cd_size > u32::MAX as u64 || cd_offset > u32::MAX as u64;
        write_u32_le(&mut self.sink, if sentinel { u32::MAX } else { cd_size as u32 })?;
        write_u32_le(&mut self.sink, if sentinel { u32::MAX } else { cd_offset as u32 })?;
        write_u16_le(&mut self.sink, comment_bytes.len() as u16)?;
        self.sink.write_all(comment_bytes)?;
        Ok(())
    }
}

/// Streams `method`-compressed, optionally encrypted plaintext from
/// `reader` into `sink`, returning (crc32, uncompressed_size,
/// compressed/ciphertext bytes written -- not counting the encryption
/// header, which the caller accounts for separately).
fn stream_body<R: io::Read, W: Write>(
    reader: R,
    method: CompressionMethod,
    sink: W,
    level: u32,
    encryptor: Option<ClassicEncryptor>,
) -> Result<(u32, u64, u64)> {
    let counting = CountingWriter::new(sink);
    let mut crc_reader = CrcReader::new(reader);
    let written = match encryptor {
        Some(enc) => {
            let mut compressing = CompressingWriter::new(EncryptingWriter::new(counting, enc), method, level);
            io::copy(&mut crc_reader, &mut compressing)?;
            compressing.finish()?.into_inner()
        }
        None => {
            let mut compressing = CompressingWriter::new(counting, method, level);
            io::copy(&mut crc_reader, &mut compressing)?;
            compressing.finish()?
        }
    };
    Ok((crc_reader.crc32(), crc_reader.bytes_read(), written.bytes_written()))
}

/// See [`crate::entry_writer`]'s `entropy_bytes`: the same rationale
/// applies here, just duplicated because the two writers don't share a
/// private helper across module boundaries.
fn entropy_bytes() -> [u8; 11] {
    let mut bytes = [0u8; 11];
    let mut state = Crc32::new();
    state.update(b"pk-zip-streaming-entropy");
    let seed = state.value();
    for (i, b) in bytes.iter_mut().enumerate() {
        *b = seed.wrapping_mul(i as u32 + 1).to_le_bytes()[i % 4];
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming_reader::StreamingZipReader;
    use std::io::{Cursor, Read};

    fn req<'a>(name: &'a str, password: Option<&'a str>) -> StreamingEntryRequest<'a> {
        StreamingEntryRequest {
            name,
            comment: "",
            last_modified: chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            external_attributes: 0,
            compression_method: CompressionMethod::Deflate,
            password,
            zip64_policy: Zip64Policy::AsNecessary,
            fallback_encoding: FallbackEncoding::Utf8,
            compression_level: 6,
            expected_size_hint: None,
        }
    }

    #[test]
    fn single_entry_round_trips_through_a_streaming_reader() {
        let mut writer = StreamingZipWriter::new(Vec::new(), Zip64Policy::AsNecessary);
        writer
            .write_entry(&req("a.txt", None), Cursor::new(b"streamed content".to_vec()))
            .unwrap();
        let bytes = writer.finish("").unwrap();

        let mut reader = StreamingZipReader::new(Cursor::new(bytes));
        let header = reader.next_entry().unwrap().unwrap();
        assert_eq!(header.name, "a.txt");
        assert!(header.bit_flags & bit_flags::DATA_DESCRIPTOR != 0);
        let mut body = Vec::new();
        reader.body_reader(None).unwrap().read_to_end(&mut body).unwrap();
        assert_eq!(body, b"streamed content");
    }

    #[test]
    fn encrypted_entry_round_trips_through_a_streaming_reader() {
        let mut writer = StreamingZipWriter::new(Vec::new(), Zip64Policy::AsNecessary);
        writer
            .write_entry(&req("secret.txt", Some("hunter2")), Cursor::new(b"shh".to_vec()))
            .unwrap();
        let bytes = writer.finish("").unwrap();

        let mut reader = StreamingZipReader::new(Cursor::new(bytes));
        reader.next_entry().unwrap().unwrap();
        let err = match reader.body_reader(Some("wrong")) {
            Err(e) => e,
            Ok(_) => panic!("expected an error"),
        };
        assert!(matches!(err, ZipError::BadPassword));
    }

    #[test]
    fn two_entries_in_sequence_both_read_back() {
        let mut writer = StreamingZipWriter::new(Vec::new(), Zip64Policy::AsNecessary);
        writer.write_entry(&req("one.txt", None), Cursor::new(b"one".to_vec())).unwrap();
        writer.write_entry(&req("two.txt", None), Cursor::new(b"two".to_vec())).unwrap();
        let bytes = writer.finish("archive comment").unwrap();

        let mut reader = StreamingZipReader::new(Cursor::new(bytes));
        let first = reader.next_entry().unwrap().unwrap();
        assert_eq!(first.name, "one.txt");
        let second = reader.next_entry().unwrap().unwrap();
        assert_eq!(second.name, "two.txt");
        let mut body = Vec::new();
        reader.body_reader(None).unwrap().read_to_end(&mut body).unwrap();
        assert_eq!(body, b"two");
        assert!(reader.next_entry().unwrap().is_none());
    }
}
