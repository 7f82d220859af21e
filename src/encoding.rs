//! Filename/comment encoding policy: IBM437 first, UTF-8 (or a caller
//! supplied fallback) only when the round trip through IBM437 fails.

use oem_cp::code_table::{DECODING_TABLE_CP437, ENCODING_TABLE_CP437};

/// The codepage used to encode/decode a particular name or comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Codepage 437, the original PKZIP default.
    Ibm437,
    /// UTF-8, signalled by bit 11 of the general-purpose bit flag.
    Utf8,
}

/// The archive-wide encoding used when IBM437 round-tripping fails.
///
/// Only `Utf8` sets bit 11; a caller-supplied non-UTF-8 page is accepted
/// for writing but leaves bit 11 clear, per §4.6 — interoperability with
/// other readers is then the caller's responsibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackEncoding {
    Utf8,
    Ibm437,
}

impl Default for FallbackEncoding {
    fn default() -> Self {
        FallbackEncoding::Utf8
    }
}

/// The result of applying the encoding policy to a single string.
pub struct EncodedText {
    pub bytes: Vec<u8>,
    pub encoding: Encoding,
}

/// Encodes `text` per §4.6: try IBM437 first with a round-trip check, fall
/// back to `fallback` only if that fails.
pub fn encode_with_policy(text: &str, fallback: FallbackEncoding) -> EncodedText {
    if let Some(bytes) = encode_ibm437_round_trip(text) {
        return EncodedText {
            bytes,
            encoding: Encoding::Ibm437,
        };
    }
    match fallback {
        FallbackEncoding::Utf8 => EncodedText {
            bytes: text.as_bytes().to_vec(),
            encoding: Encoding::Utf8,
        },
        FallbackEncoding::Ibm437 => EncodedText {
            // The caller opted out of UTF-8 entirely; emit a best-effort
            // IBM437 encoding, replacing anything unrepresentable with '?'
            // since there is nowhere else to fall back to. Bit 11 stays
            // clear either way.
            bytes: encode_ibm437_lossy(text),
            encoding: Encoding::Ibm437,
        },
    }
}

/// Re-derives the on-disk byte representation of `text` under a
/// previously-decided `encoding`, used when copying an unchanged entry
/// through to a new archive without re-running the full policy.
pub fn encode_for(text: &str, encoding: Encoding) -> Vec<u8> {
    match encoding {
        Encoding::Utf8 => text.as_bytes().to_vec(),
        Encoding::Ibm437 => {
            encode_ibm437_round_trip(text).unwrap_or_else(|| encode_ibm437_lossy(text))
        }
    }
}

/// Decodes `bytes` as UTF-8 if `utf8_flag` is set, else as IBM437.
pub fn decode_with_flag(bytes: &[u8], utf8_flag: bool) -> String {
    if utf8_flag {
        String::from_utf8_lossy(bytes).into_owned()
    } else {
        decode_ibm437(bytes)
    }
}

pub fn decode_ibm437(bytes: &[u8]) -> String {
    oem_cp::decode_string_complete_table(bytes, &DECODING_TABLE_CP437)
}

fn encode_ibm437_lossy(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| {
            let mut buf = [0u8; 4];
            let s = c.encode_utf8(&mut buf);
            oem_cp::encode_string_checked(s, &ENCODING_TABLE_CP437)
                .and_then(|v| v.first().copied())
                .unwrap_or(b'?')
        })
        .collect()
}

fn encode_ibm437_round_trip(text: &str) -> Option<Vec<u8>> {
    let encoded = oem_cp::encode_string_checked(text, &ENCODING_TABLE_CP437)?;
    let round_tripped = decode_ibm437(&encoded);
    if round_tripped == text {
        Some(encoded)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_name_uses_ibm437_and_clears_utf8_bit() {
        let encoded = encode_with_policy("hello.txt", FallbackEncoding::Utf8);
        assert_eq!(encoded.encoding, Encoding::Ibm437);
        assert_eq!(decode_with_flag(&encoded.bytes, false), "hello.txt");
    }

    #[test]
    fn non_representable_name_falls_back_to_utf8() {
        let name = "春夏秋冬.txt";
        let encoded = encode_with_policy(name, FallbackEncoding::Utf8);
        assert_eq!(encoded.encoding, Encoding::Utf8);
        assert_eq!(decode_with_flag(&encoded.bytes, true), name);
    }
}
