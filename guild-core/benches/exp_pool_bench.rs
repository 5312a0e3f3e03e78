/// Experience pool benchmarks
///
/// Measures the hot path of the write-coalescing buffer:
/// 1. contribute into existing records (every kill)
/// 2. contribute + drain over a full flush window
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use guild_core::exp_pool::{ExpKey, ExpPool};

fn key(i: u32) -> ExpKey {
    ExpKey {
        guild_id: i % 32 + 1,
        account_id: i,
        char_id: i * 10,
    }
}

/// Benchmark: accumulate into an already-allocated record
fn bench_contribute_existing(c: &mut Criterion) {
    let mut pool = ExpPool::with_capacity(1024);
    let hot = key(1);
    pool.contribute(hot, 1).unwrap();

    c.bench_function("contribute_existing", |b| {
        b.iter(|| pool.contribute(black_box(hot), black_box(37)).unwrap())
    });
}

/// Benchmark: one flush window of contributions followed by a drain
fn bench_flush_window(c: &mut Criterion) {
    let mut group = c.benchmark_group("flush_window");

    for members in [16u32, 256, 1024] {
        group.bench_with_input(BenchmarkId::from_parameter(members), &members, |b, &members| {
            let mut pool = ExpPool::with_capacity(1024);
            b.iter(|| {
                for round in 0..4u64 {
                    for i in 0..members {
                        pool.contribute(key(i), round + 1).unwrap();
                    }
                }
                black_box(pool.drain())
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_contribute_existing, bench_flush_window);
criterion_main!(benches);
