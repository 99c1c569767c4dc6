//! Concurrent index benchmarks.

use brokerlog_bench::shuffled_ids;
use brokerlog_collections::{ConcurrentLongHashMap, ConcurrentLongHashSet};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use std::thread;

/// Benchmark map inserts into a map that has to grow.
fn bench_map_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("map_put");

    for count in [1_000usize, 10_000, 100_000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let ids = shuffled_ids(count);
            b.iter(|| {
                let map: ConcurrentLongHashMap<i64> = ConcurrentLongHashMap::new();
                for &id in &ids {
                    map.put(id, id);
                }
                black_box(map.len());
            });
        });
    }

    group.finish();
}

/// Benchmark lookups, half of them misses.
fn bench_map_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("map_get");

    for count in [1_000usize, 100_000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let map: ConcurrentLongHashMap<i64> = ConcurrentLongHashMap::with_expected_items(count);
            for id in (0..count as i64).step_by(2) {
                map.put(id, id);
            }
            let ids = shuffled_ids(count);

            b.iter(|| {
                let mut hits = 0usize;
                for &id in &ids {
                    if map.get(black_box(id)).is_some() {
                        hits += 1;
                    }
                }
                black_box(hits);
            });
        });
    }

    group.finish();
}

/// Benchmark lookups from several threads while one thread writes.
fn bench_map_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("map_contended");
    group.sample_size(20);

    let count = 10_000usize;
    for readers in [1usize, 4].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(readers), readers, |b, &readers| {
            let map = Arc::new(ConcurrentLongHashMap::<i64>::with_expected_items(count));
            for id in 0..count as i64 {
                map.put(id, id);
            }

            b.iter(|| {
                let handles: Vec<_> = (0..readers)
                    .map(|_| {
                        let map = Arc::clone(&map);
                        thread::spawn(move || {
                            (0..count as i64).filter(|&id| map.get(id).is_some()).count()
                        })
                    })
                    .collect();
                for id in 0..count as i64 {
                    map.put(id, id + 1);
                }
                for handle in handles {
                    black_box(handle.join().unwrap());
                }
            });
        });
    }

    group.finish();
}

/// Benchmark set add and remove cycles.
fn bench_set_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("set_churn");
    let count = 10_000usize;
    group.throughput(Throughput::Elements(count as u64));

    group.bench_function("add_remove_10000", |b| {
        let set = ConcurrentLongHashSet::with_expected_items(count);
        let ids = shuffled_ids(count);
        b.iter(|| {
            for &id in &ids {
                set.add(id);
            }
            for &id in &ids {
                set.remove(id);
            }
            black_box(set.len());
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_map_put,
    bench_map_get,
    bench_map_contended,
    bench_set_churn
);
criterion_main!(benches);
