//! PKZIP classic "weak" stream cipher ("ZipCrypto").
//!
//! Three 32-bit keys are seeded from constants, then mixed with every byte
//! of the password. Each plaintext byte is XORed with a keystream byte
//! derived from the high key, and the keys are advanced using the
//! plaintext byte's CRC32 feedback — so encryption and decryption share the
//! same `update_keys` step, just fed with plaintext instead of ciphertext.
//!
//! This is deliberately weak by modern standards (no authentication, a
//! tiny effective keyspace once the header is known); it exists here only
//! because APPNOTE bit 0 is still the de facto password-protection format
//! for plain zip archives.

use std::io::{self, Read, Write};

use crate::crc32::Crc32;
use crate::error::{Result, ZipError};

/// Size in bytes of the cipher-initialization header prepended to an
/// encrypted entry's data.
pub const ENCRYPTION_HEADER_SIZE: usize = 12;

const K0_INIT: u32 = 305_419_896;
const K1_INIT: u32 = 591_751_049;
const K2_INIT: u32 = 878_082_192;

/// Key state shared by the encrypting and decrypting sides of the cipher.
#[derive(Clone, Copy, Debug)]
struct Keys {
    k0: u32,
    k1: u32,
    k2: u32,
}

impl Keys {
    fn new(password: &[u8]) -> Self {
        let mut keys = Keys {
            k0: K0_INIT,
            k1: K1_INIT,
            k2: K2_INIT,
        };
        for &byte in password {
            keys.update(byte);
        }
        keys
    }

    /// Mixes a plaintext byte into the three keys.
    fn update(&mut self, plain_byte: u8) {
        self.k0 = crc32_table_step(self.k0, plain_byte);
        self.k1 = self.k1.wrapping_add(self.k0 & 0xff);
        self.k1 = self.k1.wrapping_mul(134_775_813).wrapping_add(1);
        self.k2 = crc32_table_step(self.k2, (self.k1 >> 24) as u8);
    }

    /// The next keystream byte, derived from key 2.
    fn keystream_byte(&self) -> u8 {
        let temp = (self.k2 | 2) as u16;
        (temp.wrapping_mul(temp ^ 1) >> 8) as u8
    }
}

/// The per-byte CRC32 feedback step used by the cipher's key schedule.
///
/// This is not `crate::crc32::Crc32` (which computes a complete CRC32 with
/// its own init/final XOR): PKZIP's key schedule instead folds one byte at
/// a time directly into a running key, so the bit-at-a-time table step is
/// reproduced here rather than routed through the full CRC type.
fn crc32_table_step(mut crc: u32, byte: u8) -> u32 {
    crc ^= byte as u32;
    for _ in 0..8 {
        if crc & 1 != 0 {
            crc = (crc >> 1) ^ 0xEDB8_8320;
        } else {
            crc >>= 1;
        }
    }
    crc
}

/// Encrypts an entry's plaintext: emits the 12-byte header then encrypts
/// each byte written to it in place.
pub struct ClassicEncryptor {
    keys: Keys,
}

impl ClassicEncryptor {
    pub fn new(password: &[u8]) -> Self {
        Self {
            keys: Keys::new(password),
        }
    }

    /// Builds the 12-byte cipher-initialization header.
    ///
    /// `random_bytes` fills the first 11 bytes (caller-supplied entropy);
    /// the 12th byte is the verification byte: the high-order byte of the
    /// plaintext CRC32, or — when the true CRC isn't known yet because a
    /// trailing data descriptor will carry it (bit 3 set) — the high-order
    /// byte of the packed MS-DOS time, per APPNOTE 6.1.5.
    pub fn build_header(&mut self, random_bytes: [u8; 11], verify_byte: u8) -> [u8; ENCRYPTION_HEADER_SIZE] {
        let mut header = [0u8; ENCRYPTION_HEADER_SIZE];
        header[..11].copy_from_slice(&random_bytes);
        header[11] = verify_byte;
        self.encrypt_in_place(&mut header);
        header
    }

    pub fn encrypt_in_place(&mut self, buf: &mut [u8]) {
        for byte in buf.iter_mut() {
            let k = self.keys.keystream_byte();
            let plain = *byte;
            *byte = plain ^ k;
            self.keys.update(plain);
        }
    }
}

/// Decrypts an entry: consumes the 12-byte header first, verifying the
/// password, then decrypts subsequent bytes in place.
#[derive(Debug)]
pub struct ClassicDecryptor {
    keys: Keys,
}

impl ClassicDecryptor {
    /// Reads and decrypts the 12-byte header, checking the verification
    /// byte against `expected_verify_bytes` (one or two acceptable values,
    /// per the data-descriptor tolerance in APPNOTE 6.1.5).
    pub fn new<R: Read>(
        r: &mut R,
        password: &[u8],
        expected_verify_bytes: &[u8],
    ) -> Result<Self> {
        let mut keys = Keys::new(password);
        let mut header = [0u8; ENCRYPTION_HEADER_SIZE];
        r.read_exact(&mut header)?;
        for byte in header.iter_mut() {
            let k = keys.keystream_byte();
            let plain = *byte ^ k;
            keys.update(plain);
            *byte = plain;
        }
        if !expected_verify_bytes.contains(&header[11]) {
            return Err(ZipError::BadPassword);
        }
        Ok(Self { keys })
    }

    pub fn decrypt_in_place(&mut self, buf: &mut [u8]) {
        for byte in buf.iter_mut() {
            let k = self.keys.keystream_byte();
            let plain = *byte ^ k;
            self.keys.update(plain);
            *byte = plain;
        }
    }
}

/// Wraps a writer, encrypting every byte written to it with the classic
/// cipher. The 12-byte header must already have been written by the
/// caller via [`ClassicEncryptor::build_header`].
pub struct EncryptingWriter<W> {
    inner: W,
    encryptor: ClassicEncryptor,
}

impl<W: Write> EncryptingWriter<W> {
    pub fn new(inner: W, encryptor: ClassicEncryptor) -> Self {
        Self { inner, encryptor }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for EncryptingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut scratch = buf.to_vec();
        self.encryptor.encrypt_in_place(&mut scratch);
        self.inner.write(&scratch)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Wraps a reader, decrypting every byte read from it with the classic
/// cipher. The caller must have already consumed the 12-byte header via
/// [`ClassicDecryptor::new`].
pub struct DecryptingReader<R> {
    inner: R,
    decryptor: ClassicDecryptor,
}

impl<R: Read> DecryptingReader<R> {
    pub fn new(inner: R, decryptor: ClassicDecryptor) -> Self {
        Self { inner, decryptor }
    }
}

impl<R: Read> Read for DecryptingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.decryptor.decrypt_in_place(&mut buf[..n]);
        Ok(n)
    }
}
