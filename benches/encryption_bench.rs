use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pk_zip::cipher::ClassicEncryptor;
use pk_zip::ZipArchive;
use std::io::Cursor;
use tempfile::NamedTempFile;

fn generate_data(size: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(size);
    let pattern = b"This is a test pattern that repeats. Lorem ipsum dolor sit amet. ";
    for _ in 0..(size / pattern.len() + 1) {
        data.extend_from_slice(pattern);
    }
    data.truncate(size);
    data
}

fn bench_encryption(c: &mut Criterion) {
    let sizes = vec![1024, 10 * 1024, 100 * 1024, 1024 * 1024]; // 1KB, 10KB, 100KB, 1MB

    let mut group = c.benchmark_group("encryption_overhead");

    for size in sizes {
        let data = generate_data(size);

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("no_encryption", size), &data, |b, data| {
            b.iter(|| {
                let temp = NamedTempFile::new().unwrap();
                let mut archive = ZipArchive::new();
                archive.add_stream("test.txt", Cursor::new(black_box(data.clone()))).unwrap();
                archive.save_as(temp.path()).unwrap();
            });
        });

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(
            BenchmarkId::new("classic_pkzip_encryption", size),
            &data,
            |b, data| {
                b.iter(|| {
                    let temp = NamedTempFile::new().unwrap();
                    let mut archive = ZipArchive::new();
                    archive.add_stream("test.txt", Cursor::new(black_box(data.clone()))).unwrap();
                    archive.set_password("test.txt", "benchmark_password_123").unwrap();
                    archive.save_as(temp.path()).unwrap();
                });
            },
        );
    }

    group.finish();
}

fn bench_memory_usage(c: &mut Criterion) {
    let mut group = c.benchmark_group("memory_usage");

    // Test with a 10MB file to see the cipher's per-byte overhead at scale.
    let large_data = generate_data(10 * 1024 * 1024);

    group.bench_function("10mb_no_encryption", |b| {
        b.iter(|| {
            let temp = NamedTempFile::new().unwrap();
            let mut archive = ZipArchive::new();
            archive.add_stream("large.txt", Cursor::new(black_box(large_data.clone()))).unwrap();
            archive.save_as(temp.path()).unwrap();
        });
    });

    group.bench_function("10mb_classic_pkzip_encryption", |b| {
        b.iter(|| {
            let temp = NamedTempFile::new().unwrap();
            let mut archive = ZipArchive::new();
            archive.add_stream("large.txt", Cursor::new(black_box(large_data.clone()))).unwrap();
            archive.set_password("large.txt", "test_password").unwrap();
            archive.save_as(temp.path()).unwrap();
        });
    });

    group.finish();
}

fn bench_key_setup(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_setup");

    group.bench_function("classic_cipher_key_init", |b| {
        b.iter(|| ClassicEncryptor::new(black_box(b"test_password_123")));
    });

    group.finish();
}

criterion_group!(benches, bench_encryption, bench_memory_usage, bench_key_setup);
criterion_main!(benches);
