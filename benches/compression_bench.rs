use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ggpack::bundle::{Bundle, DEFAULT_CHUNK_SIZE};
use ggpack::codec::{Compressor, CompressorId, Lz4Compressor, StoredCompressor};
use std::io::Cursor;
use std::sync::Arc;

fn sample(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8 ^ (i / 4096) as u8).collect()
}

fn bench_compression(c: &mut Criterion) {
    let data = sample(1024 * 1024);
    c.bench_function("lz4_compress_1mb", |b| {
        b.iter(|| Lz4Compressor.compress(CompressorId::Leviathan, black_box(&data), 4))
    });
}

fn bench_write_all(c: &mut Criterion) {
    let data = sample(4 * 1024 * 1024);

    for (name, compressor) in [
        ("write_all_4mb_stored", Arc::new(StoredCompressor) as Arc<dyn Compressor>),
        ("write_all_4mb_lz4", Arc::new(Lz4Compressor) as Arc<dyn Compressor>),
    ] {
        c.bench_function(name, |b| {
            b.iter(|| {
                let mut bundle = Bundle::create(
                    Cursor::new(Vec::new()),
                    Arc::clone(&compressor),
                    CompressorId::Leviathan,
                    DEFAULT_CHUNK_SIZE,
                )
                .unwrap();
                bundle.write_all(black_box(&data), 4).unwrap();
            })
        });
    }
}

fn bench_read_range(c: &mut Criterion) {
    let data = sample(4 * 1024 * 1024);
    let mut bundle = Bundle::create(
        Cursor::new(Vec::new()),
        Arc::new(Lz4Compressor),
        CompressorId::Leviathan,
        DEFAULT_CHUNK_SIZE,
    )
    .unwrap();
    bundle.write_all(&data, 4).unwrap();

    // 64 KiB straddling the boundary between chunks 7 and 8.
    let offset = 8 * DEFAULT_CHUNK_SIZE as usize - 32 * 1024;
    c.bench_function("read_range_64k_two_chunks", |b| {
        b.iter(|| bundle.read_range(black_box(offset), 64 * 1024).unwrap())
    });
    c.bench_function("read_all_4mb", |b| b.iter(|| bundle.read_all().unwrap()));
}

criterion_group!(benches, bench_compression, bench_write_all, bench_read_range);
criterion_main!(benches);
