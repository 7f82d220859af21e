use std::fs::File;
use std::io::{Seek, Write};
use tempfile::tempdir;

// Crafts a minimal ZIP64 archive on disk by hand: a local file header with
// a trailing data descriptor, a central directory entry carrying the
// ZIP64 extra field, a ZIP64 EOCD record and locator, and a classic EOCD
// with the 0xFFFF/0xFFFFFFFF sentinels. Then opens it with ZipArchive to
// exercise the central-directory ZIP64 promotion path end to end.

#[test]
fn read_zip64_crafted() {
    use pk_zip::ZipArchive;

    let dir = tempdir().unwrap();
    let path = dir.path().join("zip64_test.zip");
    let mut f = File::create(&path).unwrap();

    // Local file header for a.txt (no sizes, using data descriptor).
    f.write_all(&[0x50, 0x4b, 0x03, 0x04]).unwrap(); // local file header signature
    f.write_all(&[20, 0]).unwrap(); // version needed
    f.write_all(&[8, 0]).unwrap(); // flags (bit 3 set)
    f.write_all(&[0, 0]).unwrap(); // compression method (0 = stored)
    f.write_all(&[0, 0, 0x21, 0]).unwrap(); // mod time/date
    f.write_all(&0u32.to_le_bytes()).unwrap(); // crc placeholder
    f.write_all(&0xFFFFFFFFu32.to_le_bytes()).unwrap(); // compressed size placeholder
    f.write_all(&0xFFFFFFFFu32.to_le_bytes()).unwrap(); // uncompressed size placeholder
    f.write_all(&(5u16).to_le_bytes()).unwrap(); // name length
    f.write_all(&0u16.to_le_bytes()).unwrap(); // extra length
    f.write_all(b"a.txt").unwrap();

    let local_header_offset = 0u64;
    let data = b"hello";
    f.write_all(data).unwrap();

    // Data descriptor, ZIP64-style: 64-bit sizes.
    let crc = crc32fast::hash(data);
    f.write_all(&[0x50, 0x4b, 0x07, 0x08]).unwrap();
    f.write_all(&crc.to_le_bytes()).unwrap();
    f.write_all(&(data.len() as u64).to_le_bytes()).unwrap();
    f.write_all(&(data.len() as u64).to_le_bytes()).unwrap();

    let cd_start = f.stream_position().unwrap();

    f.write_all(&[0x50, 0x4b, 0x01, 0x02]).unwrap(); // central dir header signature
    f.write_all(&[20, 0]).unwrap(); // version made by
    f.write_all(&[20, 0]).unwrap(); // version needed
    f.write_all(&[8, 0]).unwrap(); // flags
    f.write_all(&[0, 0]).unwrap(); // compression method
    f.write_all(&[0, 0, 0x21, 0]).unwrap(); // mod time/date
    f.write_all(&crc.to_le_bytes()).unwrap();
    f.write_all(&0xFFFFFFFFu32.to_le_bytes()).unwrap(); // compressed size placeholder
    f.write_all(&0xFFFFFFFFu32.to_le_bytes()).unwrap(); // uncompressed size placeholder
    f.write_all(&(5u16).to_le_bytes()).unwrap(); // name len
    f.write_all(&(28u16).to_le_bytes()).unwrap(); // extra len: header(2)+len(2)+data(24)
    f.write_all(&0u16.to_le_bytes()).unwrap(); // comment len
    f.write_all(&0u16.to_le_bytes()).unwrap(); // disk start
    f.write_all(&0u16.to_le_bytes()).unwrap(); // internal attrs
    f.write_all(&0u32.to_le_bytes()).unwrap(); // external attrs
    f.write_all(&0xFFFFFFFFu32.to_le_bytes()).unwrap(); // relative offset placeholder
    f.write_all(b"a.txt").unwrap();
    f.write_all(&0x0001u16.to_le_bytes()).unwrap(); // ZIP64 extra header id
    f.write_all(&(24u16).to_le_bytes()).unwrap();
    f.write_all(&(data.len() as u64).to_le_bytes()).unwrap(); // uncompressed size
    f.write_all(&(data.len() as u64).to_le_bytes()).unwrap(); // compressed size
    f.write_all(&local_header_offset.to_le_bytes()).unwrap(); // relative header offset

    let cd_end = f.stream_position().unwrap();
    let cd_size = cd_end - cd_start;

    let zip64_eocd_start = f.stream_position().unwrap();
    f.write_all(&[0x50, 0x4b, 0x06, 0x06]).unwrap(); // zip64 eocd signature
    f.write_all(&(44u64).to_le_bytes()).unwrap(); // size of zip64 eocd record
    f.write_all(&[45, 0]).unwrap(); // version made by
    f.write_all(&[45, 0]).unwrap(); // version needed
    f.write_all(&0u32.to_le_bytes()).unwrap(); // disk number
    f.write_all(&0u32.to_le_bytes()).unwrap(); // disk with central dir start
    f.write_all(&(1u64).to_le_bytes()).unwrap(); // entries on disk
    f.write_all(&(1u64).to_le_bytes()).unwrap(); // total entries
    f.write_all(&cd_size.to_le_bytes()).unwrap();
    f.write_all(&cd_start.to_le_bytes()).unwrap();

    f.write_all(&[0x50, 0x4b, 0x06, 0x07]).unwrap(); // zip64 eocd locator signature
    f.write_all(&0u32.to_le_bytes()).unwrap(); // disk with zip64 eocd
    f.write_all(&zip64_eocd_start.to_le_bytes()).unwrap();
    f.write_all(&1u32.to_le_bytes()).unwrap(); // total disks

    f.write_all(&[0x50, 0x4b, 0x05, 0x06]).unwrap(); // classic eocd signature
    f.write_all(&0u16.to_le_bytes()).unwrap(); // disk
    f.write_all(&0u16.to_le_bytes()).unwrap(); // disk with cd
    f.write_all(&0xFFFFu16.to_le_bytes()).unwrap(); // entries on disk
    f.write_all(&0xFFFFu16.to_le_bytes()).unwrap(); // total entries
    f.write_all(&0xFFFFFFFFu32.to_le_bytes()).unwrap(); // cd size
    f.write_all(&0xFFFFFFFFu32.to_le_bytes()).unwrap(); // cd offset
    f.write_all(&0u16.to_le_bytes()).unwrap(); // comment len

    f.flush().unwrap();

    let archive = ZipArchive::open(&path).expect("should open crafted zip64 archive");
    let entries = archive.entries();
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.name, "a.txt");
    assert_eq!(entry.uncompressed_size, data.len() as u64);
    assert!(entry.is_zip64());

    let extracted = archive.extract("a.txt", None).unwrap();
    assert_eq!(extracted, data);
}
