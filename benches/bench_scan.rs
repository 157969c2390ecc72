//! Criterion-based windrow benchmark
//!
//! Run: cargo bench --bench bench_scan

use std::hint::black_box;

use criterion::{ criterion_group, criterion_main, BenchmarkId, Criterion, Throughput };

use windrow::{ ColumnCache, ColumnType, DataSource, MemTable, MovingCacheSource, Upstream };

const N_ROWS: i64 = 100_000;

fn make_source(window: (i64, i64)) -> MovingCacheSource {
    let table = MemTable::builder()
        .column_f64("price", (0..N_ROWS).map(|v| v as f64).collect())
        .column_i64("volume", (0..N_ROWS).collect())
        .build()
        .unwrap();

    MovingCacheSource::builder(Upstream::Table(table))
        .with_n_slots(1)
        .with_column("price", ColumnType::Float64)
        .with_column("volume", ColumnType::Int64)
        .with_window(window.0, window.1)
        .unwrap()
        .build()
        .unwrap()
}

/// Full windowed scan: fill, publish and purge every entry once
fn windowed_scan(window: (i64, i64)) -> f64 {
    let source = make_source(window);

    source.initialise().unwrap();
    let ranges = source.get_entry_ranges().unwrap();
    source.init_slot(0, ranges[0].first).unwrap();

    let mut reader = source.get_column_readers(0, "price", ColumnType::Float64).unwrap();

    let mut acc = 0.0;
    for entry in ranges[0].first..ranges[0].last {
        source.set_entry(0, entry).unwrap();
        acc += reader.get(entry).unwrap().as_f64().unwrap();
    }

    source.finalise_slot(0).unwrap();
    acc
}

/// Raw cache churn: load one value and purge one value per step
fn cache_cycle(steps: i64) -> i64 {
    let cache = ColumnCache::<i64>::new(1);
    cache.init_slot(0, 0).unwrap();

    for entry in 0..steps {
        cache.load_value(0, entry).unwrap();
        if entry > 0 {
            cache.purge_till(0, entry - 1).unwrap();
        }
    }

    let (lo, _) = cache.stored_range(0).unwrap();
    lo
}

fn bench_windowed_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("windowed_scan");
    group.throughput(Throughput::Elements(N_ROWS as u64));

    for window in [(0i64, 0i64), (0, 8), (-8, 8)] {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{:?}", window)),
            &window,
            |b, window| {
                b.iter(|| black_box(windowed_scan(*window)));
            }
        );
    }

    group.finish();
}

fn bench_cache_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_cycle");
    group.throughput(Throughput::Elements(N_ROWS as u64));

    group.bench_function("load_purge", |b| {
        b.iter(|| black_box(cache_cycle(N_ROWS)));
    });

    group.finish();
}

criterion_group!(benches, bench_windowed_scan, bench_cache_cycle);
criterion_main!(benches);
