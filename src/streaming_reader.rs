//! A forward-only entry iterator for non-seekable input: reads one local
//! header at a time, hands back a reader over the (already fully
//! buffered) body, then on the next call skips whatever body bytes the
//! caller never asked for before moving on to the next header.
//!
//! Unlike [`crate::archive_reader`] -- which despite some libraries'
//! habit of calling the central-directory path "streaming", is actually
//! fully random-access -- this reader never seeks and never looks at the
//! central directory. It is what a caller reaches for when piping an
//! archive through a network socket or another non-seekable source.

use std::io::{self, Cursor, Read};

use tracing::{trace, warn};

use crate::byte_codec::{SIG_CENTRAL_DIRECTORY, SIG_LOCAL_FILE_HEADER, SIG_PK00_PREFIX};
use crate::cipher::{ClassicDecryptor, DecryptingReader};
use crate::encoding::FallbackEncoding;
use crate::entry::bit_flags;
use crate::entry_reader::{self, ParsedLocalHeader};
use crate::error::{Result, ZipError};
use crate::pipeline::DecompressingReader;

/// One entry's metadata plus whether [`StreamingZipReader::body_reader`]
/// has already advanced the underlying stream past it.
struct PendingEntry {
    header: ParsedLocalHeader,
    body_consumed: bool,
}

/// Iterates an archive's entries in on-disk order from a non-seekable
/// source, without ever consulting the central directory.
pub struct StreamingZipReader<R: Read> {
    inner: R,
    fallback: FallbackEncoding,
    pending: Option<PendingEntry>,
    finished: bool,
    checked_prefix: bool,
}

impl<R: Read> StreamingZipReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_fallback(inner, FallbackEncoding::Utf8)
    }

    pub fn with_fallback(inner: R, fallback: FallbackEncoding) -> Self {
        StreamingZipReader {
            inner,
            fallback,
            pending: None,
            finished: false,
            checked_prefix: false,
        }
    }

    /// Advances past whatever remains of the previous entry's body, then
    /// reads the next local header. Returns `Ok(None)` once the central
    /// directory signature -- or anything else that isn't a local file
    /// header -- is reached.
    pub fn next_entry(&mut self) -> Result<Option<ParsedLocalHeader>> {
        if self.finished {
            return Ok(None);
        }
        if let Some(pending) = self.pending.take() {
            if !pending.body_consumed {
                self.skip_body(&pending.header)?;
            }
        }

        let signature = match self.read_next_signature()? {
            Some(sig) => sig,
            None => {
                self.finished = true;
                return Ok(None);
            }
        };
        if signature == SIG_CENTRAL_DIRECTORY {
            self.finished = true;
            return Ok(None);
        }
        if signature != SIG_LOCAL_FILE_HEADER {
            self.finished = true;
            return Err(ZipError::BadSignature {
                expected: SIG_LOCAL_FILE_HEADER,
                found: signature,
                offset: 0,
            });
        }

        let header = entry_reader::parse_local_header_body(&mut self.inner, self.fallback)?;
        trace!(name = %header.name, "streaming reader found entry");
        self.pending = Some(PendingEntry {
            header: header.clone(),
            body_consumed: false,
        });
        Ok(Some(header))
    }

    /// Reads the next 4-byte signature, transparently skipping a leading
    /// PK00 "packed to removable media" prefix on the very first call
    /// (§4.4, §7): such an archive starts with that marker instead of a
    /// local file header signature.
    fn read_next_signature(&mut self) -> Result<Option<u32>> {
        let mut buf = [0u8; 4];
        match self.inner.read_exact(&mut buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let mut signature = u32::from_le_bytes(buf);
        if !self.checked_prefix {
            self.checked_prefix = true;
            if signature == SIG_PK00_PREFIX {
                warn!("PK00 prefix found at archive start; skipping");
                match self.inner.read_exact(&mut buf) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
                    Err(e) => return Err(e.into()),
                }
                signature = u32::from_le_bytes(buf);
            }
        }
        Ok(Some(signature))
    }

    /// Reads the current entry's body (and, if present, its trailing data
    /// descriptor) fully into memory right now -- advancing the stream
    /// past the entry regardless of how much of the returned reader the
    /// caller goes on to consume -- then returns it decrypted and
    /// decompressed as needed.
    pub fn body_reader(&mut self, password: Option<&str>) -> Result<Box<dyn Read>> {
        let header = {
            let pending = self
                .pending
                .as_ref()
                .ok_or_else(|| ZipError::InvalidState("no entry is currently open".into()))?;
            pending.header.clone()
        };

        let has_descriptor = header.bit_flags & bit_flags::DATA_DESCRIPTOR != 0;
        let raw = if has_descriptor && header.compressed_size == 0 {
            entry_reader::scan_until_data_descriptor(&mut self.inner, true, header.is_zip64)?
        } else {
            let mut buf = vec![0u8; header.compressed_size as usize];
            self.inner.read_exact(&mut buf)?;
            if has_descriptor {
                entry_reader::consume_known_data_descriptor(&mut self.inner, header.is_zip64)?;
            }
            buf
        };
        if let Some(pending) = self.pending.as_mut() {
            pending.body_consumed = true;
        }

        let mut body: Box<dyn Read> = Box::new(Cursor::new(raw));
        if header.bit_flags & bit_flags::ENCRYPTED != 0 {
            let password = password.ok_or(ZipError::BadPassword)?;
            let mut expected = vec![(header.crc32 >> 24) as u8];
            if has_descriptor {
                let packed = crate::byte_codec::MsDosDateTime::pack(&header.last_modified);
                expected.push((packed.time >> 8) as u8);
            }
            let decryptor = ClassicDecryptor::new(&mut body, password.as_bytes(), &expected)?;
            body = Box::new(DecryptingReader::new(body, decryptor));
        }

        let method = entry_reader::compression_method_of(header.compression_method)?;
        Ok(Box::new(DecompressingReader::new(body, method)))
    }

    fn skip_body(&mut self, header: &ParsedLocalHeader) -> Result<()> {
        let has_descriptor = header.bit_flags & bit_flags::DATA_DESCRIPTOR != 0;
        if has_descriptor && header.compressed_size == 0 {
            entry_reader::scan_until_data_descriptor(&mut self.inner, false, header.is_zip64)?;
        } else {
            io::copy(&mut (&mut self.inner).take(header.compressed_size), &mut io::sink())?;
            if has_descriptor {
                entry_reader::consume_known_data_descriptor(&mut self.inner, header.is_zip64)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::byte_codec::{write_u16_le, write_u32_le};
    use std::io::{Cursor as IoCursor, Write};

    fn build_simple_entry(name: &str, data: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        write_u32_le(&mut buf, SIG_LOCAL_FILE_HEADER).unwrap();
        write_u16_le(&mut buf, 20).unwrap();
        write_u16_le(&mut buf, 0).unwrap();
        write_u16_le(&mut buf, 0).unwrap(); // store
        buf.extend_from_slice(&[0, 0, 0x21, 0]);
        let mut crc = crate::crc32::Crc32::new();
        crc.update(data);
        write_u32_le(&mut buf, crc.value()).unwrap();
        write_u32_le(&mut buf, data.len() as u32).unwrap();
        write_u32_le(&mut buf, data.len() as u32).unwrap();
        write_u16_le(&mut buf, name.len() as u16).unwrap();
        write_u16_le(&mut buf, 0).unwrap();
        buf.write_all(name.as_bytes()).unwrap();
        buf.write_all(data).unwrap();
        buf
    }

    #[test]
    fn reads_single_entry_then_stops_at_central_directory() {
        let mut bytes = build_simple_entry("a.txt", b"hello streaming");
        write_u32_le(&mut bytes, SIG_CENTRAL_DIRECTORY).unwrap();
        let mut reader = StreamingZipReader::new(IoCursor::new(bytes));
        let header = reader.next_entry().unwrap().unwrap();
        assert_eq!(header.name, "a.txt");
        let mut body = Vec::new();
        reader.body_reader(None).unwrap().read_to_end(&mut body).unwrap();
        assert_eq!(body, b"hello streaming");
        assert!(reader.next_entry().unwrap().is_none());
    }

    #[test]
    fn skips_unread_body_before_advancing() {
        let mut bytes = build_simple_entry("first.txt", b"first contents");
        bytes.extend_from_slice(&build_simple_entry("second.txt", b"second contents"));
        write_u32_le(&mut bytes, SIG_CENTRAL_DIRECTORY).unwrap();
        let mut reader = StreamingZipReader::new(IoCursor::new(bytes));
        let first = reader.next_entry().unwrap().unwrap();
        assert_eq!(first.name, "first.txt");
        // Deliberately don't read the body.
        let second = reader.next_entry().unwrap().unwrap();
        assert_eq!(second.name, "second.txt");
        let mut body = Vec::new();
        reader.body_reader(None).unwrap().read_to_end(&mut body).unwrap();
        assert_eq!(body, b"second contents");
    }
}
