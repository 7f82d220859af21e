use std::io::{Cursor, Read};

use tempfile::tempdir;

use pk_zip::{
    ArchiveOptions, FallbackEncoding, StreamingEntryRequest, StreamingZipReader, StreamingZipWriter,
    ZipArchive, ZipError, Zip64Policy,
};

// 1. A single small text entry round-trips exactly, with the expected
// CRC32 and a total archive size well under the fixed-header overhead
// of a bigger one.
#[test]
fn hello_world_entry_has_expected_crc_and_stays_small() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("hello.zip");

    let mut archive = ZipArchive::new();
    archive
        .add_stream("hello.txt", Cursor::new(b"Hello, world.\n".to_vec()))
        .unwrap();
    archive.save_as(&path).unwrap();

    assert_eq!(archive.len(), 1);
    assert_eq!(archive.entries()[0].crc32, 0x3610A686);

    let archive_size = std::fs::metadata(&path).unwrap().len();
    assert!(archive_size <= 150, "archive was {archive_size} bytes");

    let reopened = ZipArchive::open(&path).unwrap();
    let data = reopened.extract("hello.txt", None).unwrap();
    assert_eq!(data, b"Hello, world.\n");
}

// 2. Twenty entries of varying size all come back with the CRC32 the
// writer recorded, verified independently by streaming each body
// through a fresh CRC accumulator rather than trusting the stored value.
#[test]
fn twenty_entries_verify_under_a_forward_reader() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("many.zip");

    // A small deterministic PRNG so sizes and contents are reproducible
    // without depending on an RNG crate.
    let mut state: u64 = 0x9E3779B97F4A7C15;
    let mut next = || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        state
    };

    let mut archive = ZipArchive::new();
    let mut expected = Vec::new();
    for i in 0..20 {
        let size = 5000 + (next() % 34000) as usize;
        let byte = (next() % 256) as u8;
        let content = vec![byte; size];
        let name = format!("file_{i:02}.txt");
        archive.add_stream(&name, Cursor::new(content.clone())).unwrap();
        expected.push((name, content));
    }
    archive.save_as(&path).unwrap();

    let file = std::fs::File::open(&path).unwrap();
    let mut reader = StreamingZipReader::new(file);
    let mut seen = 0;
    while let Some(header) = reader.next_entry().unwrap() {
        let (_, content) = expected
            .iter()
            .find(|(name, _)| *name == header.name)
            .expect("unexpected entry name");

        let mut body_reader = reader.body_reader(None).unwrap();
        let mut crc_state = crc32fast::Hasher::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = body_reader.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            crc_state.update(&buf[..n]);
        }
        drop(body_reader);
        assert_eq!(crc_state.finalize(), header.crc32, "crc mismatch for {}", header.name);
        assert_eq!(content.len() as u64, header.uncompressed_size);
        seen += 1;
    }
    assert_eq!(seen, 20);
}

// 3. A password-protected entry rejects the wrong password and opens
// with the right one.
#[test]
fn wrong_password_is_rejected_right_password_opens() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("secret.zip");

    let mut archive = ZipArchive::new();
    archive
        .add_stream("secret.txt", Cursor::new(b"top secret payload".to_vec()))
        .unwrap();
    archive.set_password("secret.txt", "s3cret").unwrap();
    archive.save_as(&path).unwrap();

    let reopened = ZipArchive::open(&path).unwrap();
    let err = reopened.extract("secret.txt", Some("wrong")).unwrap_err();
    assert!(matches!(err, ZipError::BadPassword));

    let data = reopened.extract("secret.txt", Some("s3cret")).unwrap();
    assert_eq!(data, b"top secret payload");
}

// 4. A non-ASCII name forces the UTF-8 language encoding bit, and an
// archive opened with a non-UTF-8 fallback still decodes it correctly
// because bit 11 overrides the fallback.
#[test]
fn non_ascii_name_sets_utf8_bit_and_survives_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("seasons.zip");

    let mut archive = ZipArchive::new_with_options(
        ArchiveOptions::builder().fallback_encoding(FallbackEncoding::Utf8).build(),
    );
    archive
        .add_stream("春夏秋冬.txt", Cursor::new(b"four seasons".to_vec()))
        .unwrap();
    archive.save_as(&path).unwrap();

    let entry = archive.find("春夏秋冬.txt").unwrap();
    assert_ne!(entry.bit_flags & pk_zip::entry::bit_flags::UTF8_NAMES, 0);

    let reopened = ZipArchive::open_with_options(
        &path,
        ArchiveOptions::builder().fallback_encoding(FallbackEncoding::Ibm437).build(),
    )
    .unwrap();
    let data = reopened.extract("春夏秋冬.txt", None).unwrap();
    assert_eq!(data, b"four seasons");
}

// 5. An archive with enough entries to exceed the classic 16-bit count
// forces a ZIP64 EOCD record, and the classic EOCD carries the
// 0xFFFFFFFF sentinel rather than a real offset.
#[test]
fn seventy_thousand_entries_force_zip64_eocd() {
    let mut archive = ZipArchive::new_with_options(
        ArchiveOptions::builder().zip64_policy(Zip64Policy::AsNecessary).build(),
    );
    for i in 0..70_000u32 {
        archive.add_stream(format!("f{i}"), Cursor::new(Vec::new())).unwrap();
    }
    let dir = tempdir().unwrap();
    let path = dir.path().join("huge.zip");
    archive.save_as(&path).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    let has_zip64_eocd = bytes
        .windows(4)
        .any(|w| w == [0x50, 0x4b, 0x06, 0x06]);
    assert!(has_zip64_eocd, "expected a ZIP64 EOCD record in the saved archive");

    let eocd_pos = bytes
        .windows(4)
        .rposition(|w| w == [0x50, 0x4b, 0x05, 0x06])
        .expect("classic EOCD not found");
    let count_field = u16::from_le_bytes([bytes[eocd_pos + 10], bytes[eocd_pos + 11]]);
    assert_eq!(count_field, 0xFFFF);
    let offset_field = u32::from_le_bytes([
        bytes[eocd_pos + 16],
        bytes[eocd_pos + 17],
        bytes[eocd_pos + 18],
        bytes[eocd_pos + 19],
    ]);
    assert_eq!(offset_field, 0xFFFFFFFF);

    let reopened = ZipArchive::open(&path).unwrap();
    assert_eq!(reopened.len(), 70_000);
}

// 6. Saving to a non-seekable sink sets bit 3 on every entry and trails
// each one with a data descriptor; copying those bytes into a seekable
// buffer and reading it back yields the original contents.
#[test]
fn streaming_write_sets_data_descriptor_bit_and_reads_back() {
    let mut writer = StreamingZipWriter::new(Vec::new(), Zip64Policy::AsNecessary);
    let req = StreamingEntryRequest {
        name: "piped.txt",
        comment: "",
        last_modified: chrono::NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap(),
        external_attributes: 0,
        compression_method: pk_zip::CompressionMethod::Deflate,
        password: None,
        zip64_policy: Zip64Policy::AsNecessary,
        fallback_encoding: FallbackEncoding::Utf8,
        compression_level: 6,
        expected_size_hint: None,
    };
    writer
        .write_entry(&req, Cursor::new(b"data pushed through a pipe".to_vec()))
        .unwrap();
    let bytes = writer.finish("").unwrap();

    assert_eq!(&bytes[0..4], &[0x50, 0x4b, 0x03, 0x04]);
    let flags = u16::from_le_bytes([bytes[6], bytes[7]]);
    assert_ne!(flags & pk_zip::entry::bit_flags::DATA_DESCRIPTOR, 0);

    let has_descriptor_sig = bytes.windows(4).any(|w| w == [0x50, 0x4b, 0x07, 0x08]);
    assert!(has_descriptor_sig, "expected a data descriptor signature");

    // A "seekable copy" of the piped bytes: write them to a real file and
    // reopen it as a random-access archive.
    let dir = tempdir().unwrap();
    let path = dir.path().join("piped.zip");
    std::fs::write(&path, &bytes).unwrap();
    let archive = ZipArchive::open(&path).unwrap();
    let data = archive.extract("piped.txt", None).unwrap();
    assert_eq!(data, b"data pushed through a pipe");
}
