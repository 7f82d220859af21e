//! Streaming CRC32 (PKZIP polynomial, reflected) and transparent
//! reader/writer wrappers that accumulate it as bytes pass through.

use std::io::{self, Read, Write};

use crc32fast::Hasher;

/// A running CRC32 accumulator using the PKZIP polynomial (0xEDB88320,
/// reflected), delegated to `crc32fast` for the table and any available
/// SIMD acceleration.
#[derive(Default)]
pub struct Crc32 {
    hasher: Hasher,
}

impl Crc32 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    pub fn value(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    pub fn reset(&mut self) {
        self.hasher = Hasher::new();
    }
}

/// Wraps a reader, updating a CRC32 and byte counter on every read.
pub struct CrcReader<R> {
    inner: R,
    crc: Crc32,
    count: u64,
}

impl<R: Read> CrcReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            crc: Crc32::new(),
            count: 0,
        }
    }

    pub fn crc32(&self) -> u32 {
        self.crc.value()
    }

    pub fn bytes_read(&self) -> u64 {
        self.count
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for CrcReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.crc.update(&buf[..n]);
        self.count += n as u64;
        Ok(n)
    }
}

/// Wraps a writer, updating a CRC32 and byte counter on every write.
pub struct CrcWriter<W> {
    inner: W,
    crc: Crc32,
    count: u64,
}

impl<W: Write> CrcWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            crc: Crc32::new(),
            count: 0,
        }
    }

    pub fn crc32(&self) -> u32 {
        self.crc.value()
    }

    pub fn bytes_written(&self) -> u64 {
        self.count
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CrcWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.crc.update(&buf[..n]);
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// A writer that only counts bytes transiting through it, used on the
/// compressed/ciphertext side of the pipeline where the CRC is irrelevant.
pub struct CountingWriter<W> {
    inner: W,
    count: u64,
}

impl<W: Write> CountingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, count: 0 }
    }

    pub fn bytes_written(&self) -> u64 {
        self.count
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
