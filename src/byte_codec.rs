//! Little-endian integer pack/unpack, signature probing, and the MS-DOS
//! packed date/time format used throughout the zip binary layout.

use std::io::{self, Read, Seek, SeekFrom, Write};

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

use crate::error::{Result, ZipError};

/// Local file header signature.
pub const SIG_LOCAL_FILE_HEADER: u32 = 0x0403_4b50;
/// Data descriptor signature (optional prefix).
pub const SIG_DATA_DESCRIPTOR: u32 = 0x0807_4b50;
/// Central directory file header signature.
pub const SIG_CENTRAL_DIRECTORY: u32 = 0x0201_4b50;
/// End of central directory signature.
pub const SIG_EOCD: u32 = 0x0605_4b50;
/// ZIP64 end of central directory record signature.
pub const SIG_ZIP64_EOCD_RECORD: u32 = 0x0606_4b50;
/// ZIP64 end of central directory locator signature.
pub const SIG_ZIP64_EOCD_LOCATOR: u32 = 0x0706_4b50;
/// "Packed to removable media" prefix, tolerated at the start of an archive.
pub const SIG_PK00_PREFIX: u32 = 0x3030_4b50;

/// Size in bytes of the sentinel marking a classic field as ZIP64-promoted.
pub const ZIP64_SENTINEL_32: u32 = 0xFFFF_FFFF;
/// Size in bytes of the sentinel marking the entry count as ZIP64-promoted.
pub const ZIP64_SENTINEL_16: u16 = 0xFFFF;

pub fn read_u16_le<R: Read>(r: &mut R) -> Result<u16> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf).map_err(from_eof)?;
    Ok(u16::from_le_bytes(buf))
}

pub fn read_u32_le<R: Read>(r: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf).map_err(from_eof)?;
    Ok(u32::from_le_bytes(buf))
}

pub fn read_u64_le<R: Read>(r: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf).map_err(from_eof)?;
    Ok(u64::from_le_bytes(buf))
}

fn from_eof(e: io::Error) -> ZipError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        ZipError::bad_read_eof()
    } else {
        ZipError::Io(e)
    }
}

impl ZipError {
    pub(crate) fn bad_read_eof() -> Self {
        ZipError::BadRead("unexpected end of stream".to_string())
    }
}

pub fn write_u16_le<W: Write>(w: &mut W, v: u16) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

pub fn write_u32_le<W: Write>(w: &mut W, v: u32) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

pub fn write_u64_le<W: Write>(w: &mut W, v: u64) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

/// Reads a 4-byte signature, leaving the stream positioned just past it.
///
/// Used where a signature is unconditionally expected (local/central
/// headers, EOCD, ZIP64 records); callers that need to distinguish "not
/// present" from "malformed" should use [`probe_signature`] instead.
pub fn read_signature<R: Read>(r: &mut R) -> Result<u32> {
    read_u32_le(r)
}

/// Reads a 4-byte value at the stream's current position without consuming
/// it unless it equals one of `accepted`. On a non-match, the stream is
/// seeked back to where it started so the caller can try a different parse.
pub fn probe_signature<R: Read + Seek>(r: &mut R, accepted: &[u32]) -> Result<Option<u32>> {
    let start = r.stream_position()?;
    let mut buf = [0u8; 4];
    match r.read_exact(&mut buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            r.seek(SeekFrom::Start(start))?;
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    }
    let value = u32::from_le_bytes(buf);
    if accepted.contains(&value) {
        Ok(Some(value))
    } else {
        r.seek(SeekFrom::Start(start))?;
        Ok(None)
    }
}

/// Consumes the legacy PK00 "packed to removable media" prefix if it's
/// present at the stream's current position, per §4.4/§7 -- some
/// archives written to floppy-spanned media begin with this 4-byte
/// marker before the first local file header. Returns whether it was
/// found and skipped.
pub fn skip_pk00_prefix<R: Read + Seek>(r: &mut R) -> Result<bool> {
    Ok(probe_signature(r, &[SIG_PK00_PREFIX])?.is_some())
}

/// A date-time packed in the MS-DOS format used by local/central headers.
///
/// Resolution is 2 seconds; the valid year range is 1980..=2107 (a 7-bit
/// offset from 1980). Seconds are rounded down to the nearest even value
/// before packing, matching how every PKZIP-compatible writer truncates
/// (not rounds) sub-2-second precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsDosDateTime {
    pub date: u16,
    pub time: u16,
}

impl MsDosDateTime {
    pub const EPOCH: MsDosDateTime = MsDosDateTime { date: 0x21, time: 0 };

    pub fn pack(dt: &NaiveDateTime) -> MsDosDateTime {
        let year = dt.year().clamp(1980, 2107);
        let date = (((year - 1980) as u16) << 9)
            | ((dt.month() as u16) << 5)
            | (dt.day() as u16);
        let seconds_even = dt.second() - (dt.second() % 2);
        let time = ((dt.hour() as u16) << 11)
            | ((dt.minute() as u16) << 6)
            | ((seconds_even / 2) as u16);
        MsDosDateTime { date, time }
    }

    pub fn unpack(&self) -> NaiveDateTime {
        let year = 1980 + ((self.date >> 9) as i32);
        let month = ((self.date >> 5) & 0b1111).max(1) as u32;
        let day = (self.date & 0b1_1111).max(1) as u32;
        let hour = (self.time >> 11) as u32;
        let minute = ((self.time >> 5) & 0b11_1111) as u32;
        let second = (self.time & 0b1_1111) as u32 * 2;
        NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|d| d.and_hms_opt(hour.min(23), minute.min(59), second.min(59)))
            .unwrap_or_else(|| NaiveDate::from_ymd_opt(1980, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap())
    }

    pub fn read<R: Read>(r: &mut R) -> Result<MsDosDateTime> {
        let time = read_u16_le(r)?;
        let date = read_u16_le(r)?;
        Ok(MsDosDateTime { date, time })
    }

    pub fn write<W: Write>(&self, w: &mut W) -> Result<()> {
        write_u16_le(w, self.time)?;
        write_u16_le(w, self.date)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_round_trip() {
        let dt = NaiveDate::from_ymd_opt(2019, 9, 5)
            .unwrap()
            .and_hms_opt(12, 52, 58)
            .unwrap();
        let packed = MsDosDateTime::pack(&dt);
        let unpacked = packed.unpack();
        assert_eq!(unpacked.year(), 2019);
        assert_eq!(unpacked.month(), 9);
        assert_eq!(unpacked.day(), 5);
        assert_eq!(unpacked.hour(), 12);
        assert_eq!(unpacked.minute(), 52);
        // odd seconds are truncated to the nearest even value, not rounded up
        assert_eq!(unpacked.second(), 58);
    }

    #[test]
    fn odd_seconds_truncate_down() {
        let dt = NaiveDate::from_ymd_opt(2020, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 37)
            .unwrap();
        let packed = MsDosDateTime::pack(&dt);
        assert_eq!(packed.unpack().second(), 36);
    }

    #[test]
    fn probe_signature_does_not_consume_on_mismatch() {
        let data = [0x11u8, 0x22, 0x33, 0x44, 0xAA];
        let mut cur = io::Cursor::new(data);
        let found = probe_signature(&mut cur, &[SIG_LOCAL_FILE_HEADER]).unwrap();
        assert_eq!(found, None);
        assert_eq!(cur.stream_position().unwrap(), 0);
    }

    #[test]
    fn probe_signature_consumes_on_match() {
        let mut data = SIG_LOCAL_FILE_HEADER.to_le_bytes().to_vec();
        data.push(0xAA);
        let mut cur = io::Cursor::new(data);
        let found = probe_signature(&mut cur, &[SIG_LOCAL_FILE_HEADER]).unwrap();
        assert_eq!(found, Some(SIG_LOCAL_FILE_HEADER));
        assert_eq!(cur.stream_position().unwrap(), 4);
    }
}
