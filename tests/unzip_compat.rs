use std::io::Cursor;
use std::process::Command;

use tempfile::tempdir;

// Writes a ZIP using the library, then shells out to the system `unzip -t`
// to verify byte-for-byte compatibility with a real-world reader. Skipped
// if `unzip` isn't installed.

#[test]
fn unzip_compatibility() {
    use pk_zip::ZipArchive;

    let check = Command::new("unzip").arg("-v").output();
    if check.is_err() {
        eprintln!("skipping test: `unzip` not found");
        return;
    }

    let dir = tempdir().unwrap();
    let zip_path = dir.path().join("compat.zip");

    let mut archive = ZipArchive::new();
    archive
        .add_stream("hello.txt", Cursor::new(b"hello from test".to_vec()))
        .unwrap();
    // A moderately large, compressible entry so the archive isn't trivial.
    let big = vec![0u8; 1024 * 1024];
    archive.add_stream("big.bin", Cursor::new(big)).unwrap();
    archive.save_as(&zip_path).unwrap();

    let output = Command::new("unzip")
        .arg("-t")
        .arg(&zip_path)
        .output()
        .expect("failed to run unzip");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(
        output.status.success(),
        "unzip reported failure: {stdout} {stderr}"
    );
}
