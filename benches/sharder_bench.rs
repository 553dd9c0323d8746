//! Benchmarks for shardrun
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::fs;
use std::io::{BufWriter, Write};

fn write_seed_file(dir: &std::path::Path, lines: usize) -> std::path::PathBuf {
    let path = dir.join("seeds.txt");
    let mut out = BufWriter::new(fs::File::create(&path).unwrap());
    for i in 0..lines {
        writeln!(out, "10.{}.{}.{}:6379", (i >> 16) & 0xff, (i >> 8) & 0xff, i & 0xff).unwrap();
    }
    out.flush().unwrap();
    path
}

fn benchmark_count_lines(c: &mut Criterion) {
    use shardrun::sharder::count_lines;

    let dir = tempfile::tempdir().unwrap();
    let source = write_seed_file(dir.path(), 100_000);

    c.bench_function("count_lines_100k", |b| {
        b.iter(|| black_box(count_lines(&source).unwrap()))
    });
}

fn benchmark_split(c: &mut Criterion) {
    use shardrun::sharder::split;

    let dir = tempfile::tempdir().unwrap();
    let source = write_seed_file(dir.path(), 100_000);

    let mut group = c.benchmark_group("split_100k");
    for shards in [2, 8, 32] {
        group.bench_with_input(BenchmarkId::from_parameter(shards), &shards, |b, &shards| {
            b.iter(|| black_box(split(&source, shards).unwrap()))
        });
    }
    group.finish();
}

fn benchmark_telemetry_decode(c: &mut Criterion) {
    use shardrun::channel::Telemetry;

    let line = r#"{"kind":"progress","worker_id":"scan_03","completed":1234,"total":50000}"#;
    c.bench_function("telemetry_decode", |b| {
        b.iter(|| black_box(Telemetry::decode(black_box(line)).unwrap()))
    });
}

criterion_group!(
    benches,
    benchmark_count_lines,
    benchmark_split,
    benchmark_telemetry_decode
);
criterion_main!(benches);
