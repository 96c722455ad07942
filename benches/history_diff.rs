//! Benchmarks for history diff performance
//!
//! These measure `diff_histories` against varying gpath counts and
//! different verdict mixes (all in-sync, all new, modified, moved, mixed).

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::collections::HashMap;
use std::hint::black_box;
use versync::diff_histories;
use versync::hash::ContentHash;
use versync::history::{AuthorAction, History, HistoryEntry};
use versync::path::{GroupedPath, RelPath};

fn mock_hash(seed: u64) -> ContentHash {
    ContentHash(format!("{seed:064x}"))
}

fn entry(path: &str, size: u64, mtime: i64, hash: ContentHash, author_peerid: &str, author_utime: i64) -> HistoryEntry {
    HistoryEntry {
        utime: author_utime,
        peerid: author_peerid.to_string(),
        groupid: "g1".to_string(),
        path: RelPath::new(path),
        size,
        mtime,
        hash,
        author_peerid: author_peerid.to_string(),
        author_utime,
        author_action: AuthorAction::Create,
    }
}

fn histories(entries: Vec<(String, HistoryEntry)>) -> HashMap<GroupedPath, History> {
    entries
        .into_iter()
        .map(|(path, e)| (GroupedPath::new("g1", RelPath::new(&path)), History::new(vec![e])))
        .collect()
}

fn base_entries(count: usize) -> Vec<(String, HistoryEntry)> {
    (0..count)
        .map(|i| {
            let path = format!("file_{i:05}.txt");
            let e = entry(&path, 1024 * (i as u64 + 1), 1_000_000, mock_hash(i as u64), "source", 1);
            (path, e)
        })
        .collect()
}

fn identical_histories(count: usize) -> (HashMap<GroupedPath, History>, HashMap<GroupedPath, History>) {
    let base = base_entries(count);
    let h1 = histories(base.clone());
    let h2 = histories(base);
    (h1, h2)
}

fn all_new_histories(count: usize) -> (HashMap<GroupedPath, History>, HashMap<GroupedPath, History>) {
    let h1 = histories(base_entries(count));
    let h2 = HashMap::new();
    (h1, h2)
}

fn modified_histories(count: usize, modify_percent: usize) -> (HashMap<GroupedPath, History>, HashMap<GroupedPath, History>) {
    let base = base_entries(count);
    let modify_count = (count * modify_percent) / 100;
    let h1 = histories(base.clone());

    let dest: Vec<(String, HistoryEntry)> = base
        .into_iter()
        .enumerate()
        .map(|(i, (path, e))| {
            if i < modify_count {
                let modified = entry(&path, e.size, e.mtime, mock_hash((i + 100_000) as u64), "dest", 2);
                (path, modified)
            } else {
                (path, e)
            }
        })
        .collect();
    let h2 = histories(dest);
    (h1, h2)
}

fn bench_diff_scale(c: &mut Criterion) {
    let mut group = c.benchmark_group("history_diff_scale");
    let counts = vec![("100_files", 100), ("1000_files", 1000), ("10000_files", 10000)];

    for (name, count) in counts {
        let (h1, h2) = identical_histories(count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(name), &count, |b, _| {
            b.iter(|| {
                let result = diff_histories(black_box(&h1), black_box(&h2));
                black_box(result);
            });
        });
    }
    group.finish();
}

fn bench_diff_all_new(c: &mut Criterion) {
    let mut group = c.benchmark_group("history_diff_all_new");
    let counts = vec![("100_files", 100), ("1000_files", 1000)];

    for (name, count) in counts {
        let (h1, h2) = all_new_histories(count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(name), &count, |b, _| {
            b.iter(|| {
                let result = diff_histories(black_box(&h1), black_box(&h2));
                black_box(result);
            });
        });
    }
    group.finish();
}

fn bench_diff_modified(c: &mut Criterion) {
    let mut group = c.benchmark_group("history_diff_modified");
    let configs = vec![("1000_files_10pct", 1000, 10), ("1000_files_50pct", 1000, 50), ("1000_files_90pct", 1000, 90)];

    for (name, count, percent) in configs {
        let (h1, h2) = modified_histories(count, percent);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(name), &count, |b, _| {
            b.iter(|| {
                let result = diff_histories(black_box(&h1), black_box(&h2));
                black_box(result);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_diff_scale, bench_diff_all_new, bench_diff_modified);
criterion_main!(benches);
