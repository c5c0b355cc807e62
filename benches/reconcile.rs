use criterion::{black_box, criterion_group, criterion_main, Criterion};
use xen_balloon::{emulated::EmulatedGuest, Balloon, BalloonConfig, BootInfo};

fn balloon() -> Balloon<EmulatedGuest> {
    Balloon::init_without_worker(
        EmulatedGuest::new(BootInfo::new(4096, 8192, 6144)),
        BalloonConfig::default(),
    )
}

#[allow(clippy::unwrap_used)]
fn benchmark_grow_shrink_cycle(c: &mut Criterion) {
    let balloon = balloon();
    c.bench_function("grow shrink 2048 pages", |b| {
        b.iter(|| {
            balloon.set_target(6144);
            let _grown = black_box(balloon.process().unwrap());
            balloon.set_target(4096);
            let _shrunk = black_box(balloon.process().unwrap());
        })
    });
}

#[allow(clippy::unwrap_used)]
fn benchmark_converged_run(c: &mut Criterion) {
    let balloon = balloon();
    c.bench_function("converged run", |b| {
        b.iter(|| {
            let _report = black_box(balloon.process().unwrap());
        })
    });
}

#[allow(clippy::unwrap_used)]
fn benchmark_donate_return(c: &mut Criterion) {
    let balloon = balloon();
    c.bench_function("donate and return 64 pages", |b| {
        b.iter(|| {
            let base = balloon.donate_range(64).unwrap();
            balloon.return_range(base, 64).unwrap();
            let _report = black_box(balloon.process().unwrap());
        })
    });
}

criterion_group!(
    benches,
    benchmark_grow_shrink_cycle,
    benchmark_converged_run,
    benchmark_donate_return
);
criterion_main!(benches);
