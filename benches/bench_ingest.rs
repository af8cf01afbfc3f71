//! Ingestion and routing throughput.
//!
//! Run with:
//! ```
//! cargo bench --bench bench_ingest
//! ```

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use geotweets_rs::decode::decode_line;
use geotweets_rs::extract::extract;
use geotweets_rs::test_support::generate_tweets;
use geotweets_rs::{ChunkRouter, MemoryStore, RouterOptions, ShardPattern, SqliteStore, UpsertController};
use std::hint::black_box;
use std::time::Duration;
use tempfile::TempDir;

// =============================================================================
// DECODE BENCHMARKS
// =============================================================================

fn bench_decode_extract(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    let dataset = generate_tweets(2_000, 0.0, 42);

    group.throughput(Throughput::Elements(dataset.lines.len() as u64));
    group.bench_function("decode_extract", |b| {
        b.iter(|| {
            for line in &dataset.lines {
                let tweet = decode_line(line).unwrap();
                black_box(extract(&tweet).unwrap());
            }
        })
    });

    group.finish();
}

// =============================================================================
// INGEST BENCHMARKS
// =============================================================================

fn bench_ingest(c: &mut Criterion) {
    let mut group = c.benchmark_group("ingest");
    group.sample_size(10);
    group.warm_up_time(Duration::from_secs(1));
    group.measurement_time(Duration::from_secs(5));

    let count = 5_000u32;
    let dataset = generate_tweets(count, 0.05, 42);
    group.throughput(Throughput::Elements(count as u64));

    group.bench_with_input(
        BenchmarkId::new("memory", format!("{count}_records")),
        &dataset.lines,
        |b, lines| {
            b.iter(|| {
                let mut controller = UpsertController::new(MemoryStore::new());
                for (idx, line) in lines.iter().enumerate() {
                    let _ = controller.ingest_line(idx as u64 + 1, line).unwrap();
                }
                black_box(controller.finish().unwrap())
            })
        },
    );

    group.bench_with_input(
        BenchmarkId::new("sqlite", format!("{count}_records")),
        &dataset.lines,
        |b, lines| {
            b.iter_batched(
                || TempDir::new().unwrap(),
                |dir| {
                    let store =
                        SqliteStore::open(dir.path().join("bench.db"), Default::default()).unwrap();
                    let mut controller = UpsertController::new(store);
                    for (idx, line) in lines.iter().enumerate() {
                        let _ = controller.ingest_line(idx as u64 + 1, line).unwrap();
                    }
                    black_box(controller.finish().unwrap().1)
                },
                BatchSize::PerIteration,
            )
        },
    );

    group.finish();
}

// =============================================================================
// ROUTING BENCHMARKS
// =============================================================================

fn bench_route(c: &mut Criterion) {
    let mut group = c.benchmark_group("route");
    group.sample_size(10);

    let count = 5_000u32;
    let dataset = generate_tweets(count, 0.0, 42);
    group.throughput(Throughput::Elements(count as u64));

    for (name, pattern, compress) in [
        ("date_plain", "{date}", false),
        ("lang_gzip", "{lang}", true),
        ("hash_gzip", "{hash:user.id%16}", true),
    ] {
        let pattern = ShardPattern::parse(pattern).unwrap();
        group.bench_with_input(BenchmarkId::new("pattern", name), &pattern, |b, pattern| {
            b.iter_batched(
                || TempDir::new().unwrap(),
                |dir| {
                    let mut router = ChunkRouter::new(RouterOptions {
                        output_dir: dir.path().to_path_buf(),
                        pattern: pattern.clone(),
                        compress,
                    })
                    .unwrap();
                    for (idx, line) in dataset.lines.iter().enumerate() {
                        let _ = router.route_line(idx as u64 + 1, line).unwrap();
                    }
                    black_box(router.finish().unwrap())
                },
                BatchSize::PerIteration,
            )
        });
    }

    group.finish();
}

criterion_group!(benches, bench_decode_extract, bench_ingest, bench_route);
criterion_main!(benches);
