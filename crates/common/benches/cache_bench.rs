//! Cache tier benchmarks
//!
//! Run with: `cargo bench --bench cache_bench -p tributary-common`

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tributary_common::cache::{LruTier, TierConfig, TtlTier};
use tributary_domain::{CacheEntry, CacheTier};

fn entry(i: u64) -> CacheEntry<Arc<String>> {
    CacheEntry::new(
        format!("source|key|{i}"),
        Arc::new(format!("value_{i}")),
        0,
        Duration::from_secs(60),
        CacheTier::L1,
    )
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("tier_insert");
    group.throughput(Throughput::Elements(1));

    for capacity in [1_000usize, 10_000] {
        group.bench_with_input(BenchmarkId::new("l1", capacity), &capacity, |b, &capacity| {
            let tier = LruTier::new(TierConfig::builder().capacity(capacity).build().unwrap()).unwrap();
            let mut counter = 0u64;
            b.iter(|| {
                tier.insert(black_box(entry(counter)), 0);
                counter = counter.wrapping_add(1);
            });
        });

        group.bench_with_input(BenchmarkId::new("l2", capacity), &capacity, |b, &capacity| {
            let config = TierConfig::builder().capacity(capacity).max_ttl(Duration::from_secs(300));
            let tier = TtlTier::new(config.build().unwrap()).unwrap();
            let mut counter = 0u64;
            b.iter(|| {
                tier.insert(black_box(entry(counter)), 0);
                counter = counter.wrapping_add(1);
            });
        });
    }

    group.finish();
}

fn bench_get_hit(c: &mut Criterion) {
    let mut group = c.benchmark_group("tier_get_hit");
    group.throughput(Throughput::Elements(1));

    let l1 = LruTier::new(TierConfig::l1()).unwrap();
    let l2 = TtlTier::new(TierConfig::l2()).unwrap();
    let keys: Vec<String> = (0..1_000).map(|i| entry(i).key).collect();
    for i in 0..1_000 {
        l1.insert(entry(i), 0);
        l2.insert(entry(i), 0);
    }

    group.bench_function("l1", |b| {
        let mut counter = 0usize;
        b.iter(|| {
            let _ = black_box(l1.get(&keys[counter % keys.len()], 1));
            counter = counter.wrapping_add(1);
        });
    });
    group.bench_function("l2", |b| {
        let mut counter = 0usize;
        b.iter(|| {
            let _ = black_box(l2.get(&keys[counter % keys.len()], 1));
            counter = counter.wrapping_add(1);
        });
    });

    group.finish();
}

fn bench_contended_l1(c: &mut Criterion) {
    let mut group = c.benchmark_group("l1_contended");

    for shards in [1usize, 16] {
        group.bench_with_input(BenchmarkId::new("shards", shards), &shards, |b, &shards| {
            let tier = Arc::new(LruTier::new(TierConfig::builder().shards(shards).build().unwrap()).unwrap());
            b.iter(|| {
                let handles: Vec<_> = (0..4)
                    .map(|t| {
                        let tier = Arc::clone(&tier);
                        thread::spawn(move || {
                            for i in 0..250 {
                                let e = entry(t * 1_000 + i);
                                let key = e.key.clone();
                                tier.insert(e, 0);
                                let _ = tier.get(&key, 1);
                            }
                        })
                    })
                    .collect();
                for handle in handles {
                    let _ = handle.join();
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_insert, bench_get_hit, bench_contended_l1);
criterion_main!(benches);
