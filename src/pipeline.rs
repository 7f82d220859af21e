//! Composable per-entry streams: the deflate/inflate wrappers that sit
//! between [`crate::crc32`]'s CRC-accumulating wrappers and
//! [`crate::cipher`]'s encrypting/decrypting wrappers.
//!
//! An entry's write-side pipeline is, from plaintext to sink:
//! `CrcWriter -> (DeflateEncoder | identity) -> (EncryptingWriter | identity) -> CountingWriter -> sink`.
//! The read-side pipeline runs the mirror image.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use crate::entry::CompressionMethod;

/// Either passes bytes through unchanged (STORE) or runs them through
/// DEFLATE, picked once per entry based on its compression method.
pub enum CompressingWriter<W: Write> {
    Store(W),
    Deflate(DeflateEncoder<W>),
}

impl<W: Write> CompressingWriter<W> {
    pub fn new(inner: W, method: CompressionMethod, level: u32) -> Self {
        match method {
            CompressionMethod::Store => CompressingWriter::Store(inner),
            CompressionMethod::Deflate => {
                CompressingWriter::Deflate(DeflateEncoder::new(inner, Compression::new(level)))
            }
        }
    }

    /// Flushes and unwraps the inner writer, finishing the DEFLATE stream
    /// if one is in use.
    pub fn finish(self) -> io::Result<W> {
        match self {
            CompressingWriter::Store(w) => Ok(w),
            CompressingWriter::Deflate(enc) => enc.finish(),
        }
    }
}

impl<W: Write> Write for CompressingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            CompressingWriter::Store(w) => w.write(buf),
            CompressingWriter::Deflate(enc) => enc.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            CompressingWriter::Store(w) => w.flush(),
            CompressingWriter::Deflate(enc) => enc.flush(),
        }
    }
}

/// The read-side mirror of [`CompressingWriter`].
pub enum DecompressingReader<R: Read> {
    Store(R),
    Deflate(DeflateDecoder<R>),
}

impl<R: Read> DecompressingReader<R> {
    pub fn new(inner: R, method: CompressionMethod) -> Self {
        match method {
            CompressionMethod::Store => DecompressingReader::Store(inner),
            CompressionMethod::Deflate => DecompressingReader::Deflate(DeflateDecoder::new(inner)),
        }
    }
}

impl<R: Read> Read for DecompressingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            DecompressingReader::Store(r) => r.read(buf),
            DecompressingReader::Deflate(dec) => dec.read(buf),
        }
    }
}

/// A cancellation flag shared between a progress callback and the
/// save/extract pipeline that checks it. Cloning shares the same
/// underlying flag, so a caller can hold one clone and hand another to
/// [`ZipArchive::save_as_cancellable`](crate::ZipArchive::save_as_cancellable)
/// or [`ZipArchive::extract_cancellable`](crate::ZipArchive::extract_cancellable).
#[derive(Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Cancellation(Arc::new(AtomicBool::new(false)))
    }

    /// Sets the flag; observed by the next block-boundary check.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The block size used when copying entry bodies during save/extract;
/// cancellation is checked between blocks of this size.
pub const READBLOCK_SIZE: usize = 8704;

/// Copies `reader` into `writer` in [`READBLOCK_SIZE`] chunks, invoking
/// `should_cancel` between blocks and stopping early (returning the byte
/// count copied so far) if it returns true.
pub fn copy_cancellable<R: Read, W: Write>(
    reader: &mut R,
    writer: &mut W,
    mut should_cancel: impl FnMut() -> bool,
) -> io::Result<u64> {
    let mut buf = [0u8; READBLOCK_SIZE];
    let mut total = 0u64;
    loop {
        if should_cancel() {
            return Ok(total);
        }
        let n = reader.read(&mut buf)?;
        if n == 0 {
            return Ok(total);
        }
        writer.write_all(&buf[..n])?;
        total += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn store_pipeline_is_identity() {
        let mut out = Vec::new();
        {
            let mut w = CompressingWriter::new(&mut out, CompressionMethod::Store, 6);
            w.write_all(b"raw bytes").unwrap();
            w.finish().unwrap();
        }
        assert_eq!(out, b"raw bytes");
    }

    #[test]
    fn deflate_round_trips() {
        let plaintext = b"the quick brown fox jumps over the lazy dog".repeat(20);
        let mut compressed = Vec::new();
        {
            let mut w = CompressingWriter::new(&mut compressed, CompressionMethod::Deflate, 6);
            w.write_all(&plaintext).unwrap();
            w.finish().unwrap();
        }
        assert!(compressed.len() < plaintext.len());
        let mut r = DecompressingReader::new(Cursor::new(compressed), CompressionMethod::Deflate);
        let mut decoded = Vec::new();
        r.read_to_end(&mut decoded).unwrap();
        assert_eq!(decoded, plaintext);
    }

    #[test]
    fn cancellation_clone_shares_flag() {
        let flag = Cancellation::new();
        let clone = flag.clone();
        assert!(!flag.is_cancelled());
        clone.cancel();
        assert!(flag.is_cancelled());
    }

    #[test]
    fn copy_cancellable_stops_early() {
        let data = vec![1u8; READBLOCK_SIZE * 4];
        let mut reader = Cursor::new(data);
        let mut out = Vec::new();
        let mut blocks = 0;
        let copied = copy_cancellable(&mut reader, &mut out, || {
            blocks += 1;
            blocks > 2
        })
        .unwrap();
        assert_eq!(copied, READBLOCK_SIZE as u64 * 2);
    }
}
