use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use seqwatch::{FileProcessedSet, ProcessedSetStore, RunId};
use std::fmt::Write as _;
use std::fs;
use tempfile::TempDir;

fn run_id(i: usize) -> String {
    format!("{:06}_NB500892_{:04}_AH{:07}GXX", 150101 + i % 28, i % 10000, i)
}

fn populated(n: usize) -> (TempDir, std::path::PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("demux.done");
    let mut text = String::new();
    for i in 0..n {
        writeln!(text, "{}", run_id(i)).unwrap();
    }
    fs::write(&path, text).unwrap();
    (temp_dir, path)
}

fn bench_open(c: &mut Criterion) {
    let (_dir, path) = populated(10_000);
    c.bench_function("processed_set_open_10k", |b| {
        b.iter(|| FileProcessedSet::open(black_box(&path)).unwrap())
    });
}

fn bench_contains(c: &mut Criterion) {
    let (_dir, path) = populated(10_000);
    let store = FileProcessedSet::open(&path).unwrap();
    let present = RunId::from_stored(&run_id(5_000));
    let absent = RunId::from_stored("990101_NB500892_9999_AHZZZZZZZXX");

    c.bench_function("processed_set_contains_hit", |b| {
        b.iter(|| store.contains(black_box(&present)))
    });
    c.bench_function("processed_set_contains_miss", |b| {
        b.iter(|| store.contains(black_box(&absent)))
    });
}

fn bench_add(c: &mut Criterion) {
    c.bench_function("processed_set_add_durable", |b| {
        b.iter_batched(
            || populated(1_000),
            |(dir, path)| {
                let mut store = FileProcessedSet::open(&path).unwrap();
                store.add(&RunId::from_stored(&run_id(1_000_000))).unwrap();
                dir
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_load_all(c: &mut Criterion) {
    let (_dir, path) = populated(10_000);
    let mut store = FileProcessedSet::open(&path).unwrap();
    c.bench_function("processed_set_load_all_10k", |b| {
        b.iter(|| store.load_all().unwrap().len())
    });
}

criterion_group!(benches, bench_open, bench_contains, bench_add, bench_load_all);
criterion_main!(benches);
