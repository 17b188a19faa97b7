// benches/coherence_benchmarks.rs

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use cachesim_moesi::{Addr, CpuOp, System, SystemSpec, Tracer};

fn quiet_system(num_cores: usize) -> System {
    let specs = SystemSpec {
        num_cores,
        ..Default::default()
    };
    System::with_tracer(specs, Tracer::sink())
}

/// Two cores alternately writing the same word: every operation is a miss or
/// an upgrade, so each round trips through BusRdX/BusUpgr snooping.
fn bench_write_ping_pong(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_ping_pong");
    for num_cores in [2, 4, 8] {
        group.bench_with_input(BenchmarkId::from_parameter(num_cores), &num_cores, |b, &n| {
            let sys = quiet_system(n);
            b.iter(|| {
                for i in 0..64 {
                    sys.execute(i % n, CpuOp::Write(i as i32), black_box(Addr(0x40)));
                }
            });
        });
    }
    group.finish();
}

/// All cores reading one word: one miss then hit after hit, the cheapest
/// path through the protocol.
fn bench_shared_readers(c: &mut Criterion) {
    c.bench_function("shared_readers", |b| {
        let sys = quiet_system(4);
        sys.poke(Addr(0x80), 0x1234);
        b.iter(|| {
            for core in 0..4 {
                sys.execute(core, CpuOp::Read, black_box(Addr(0x80)));
            }
        });
    });
}

/// Strided writes that collide in the direct-mapped cache, forcing a
/// write-back on every access.
fn bench_conflict_evictions(c: &mut Criterion) {
    c.bench_function("conflict_evictions", |b| {
        let sys = quiet_system(1);
        let stride = 64 * 4; // one full cache of words
        b.iter(|| {
            for i in 0..8 {
                sys.execute(0, CpuOp::Write(i), black_box(Addr(i * stride)));
            }
        });
    });
}

criterion_group!(
    benches,
    bench_write_ping_pong,
    bench_shared_readers,
    bench_conflict_evictions
);
criterion_main!(benches);
