//! Latency benchmarks for the admission-control core.
//!
//! These exist to catch regressions in the hot path: `Governor::evaluate`
//! runs once per request, `TailDivergenceTracker::record`/`percentile` runs
//! at least that often when a host wires tail stats into its metrics.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use retrograde_core::governor::{Governor, SystemIntegrityMetrics};
use retrograde_core::tail::TailDivergenceTracker;
use retrograde_core::usl::{fit_usl, UslSample};
use std::time::Duration;

fn stable_metrics() -> SystemIntegrityMetrics {
    SystemIntegrityMetrics {
        immutable_ops_verified: 1000,
        mutable_shared_state: 5,
        supervised_processes: 100,
        unsupervised_processes: 1,
        scaling_ratio: 0.1,
        delta_critical_core: 0.0,
        delta_complexity: 0.0,
        estimated_coupling: None,
    }
}

fn bench_governor_evaluate(c: &mut Criterion) {
    let governor = Governor::new(1.5);
    let metrics = stable_metrics();
    c.bench_function("governor_evaluate_stable", |b| {
        b.iter(|| black_box(governor.evaluate(black_box(metrics))))
    });
}

fn bench_governor_evaluate_with_deploy_gate(c: &mut Criterion) {
    let governor = Governor::new(1.5);
    let mut metrics = stable_metrics();
    metrics.delta_critical_core = 50.0;
    metrics.delta_complexity = 10.0; // within bound, falls through to runtime eval
    c.bench_function("governor_evaluate_with_deploy_gate", |b| {
        b.iter(|| black_box(governor.evaluate(black_box(metrics))))
    });
}

fn bench_tail_tracker_record(c: &mut Criterion) {
    let tracker = TailDivergenceTracker::new(1000);
    let mut group = c.benchmark_group("tail_tracker_record");
    group.bench_function("record", |b| {
        b.iter(|| tracker.record(black_box(Duration::from_micros(250))))
    });
    group.finish();
}

fn bench_tail_tracker_percentile(c: &mut Criterion) {
    let mut group = c.benchmark_group("tail_tracker_percentile");
    for capacity in [100usize, 1_000, 10_000] {
        let tracker = TailDivergenceTracker::new(capacity);
        for i in 0..capacity {
            tracker.record(Duration::from_micros((i % 997 + 1) as u64));
        }
        group.bench_with_input(
            BenchmarkId::new("p99", capacity),
            &capacity,
            |b, _| b.iter(|| black_box(tracker.percentile(black_box(0.99)))),
        );
    }
    group.finish();
}

fn bench_usl_fit(c: &mut Criterion) {
    let samples: Vec<UslSample> = (1..=32)
        .map(|n| UslSample::new(n, 1000.0 * n as f64 / (1.0 + 0.1 * (n - 1) as f64)))
        .collect();
    c.bench_function("usl_fit_32_samples", |b| {
        b.iter(|| black_box(fit_usl(black_box(&samples))))
    });
}

criterion_group!(
    benches,
    bench_governor_evaluate,
    bench_governor_evaluate_with_deploy_gate,
    bench_tail_tracker_record,
    bench_tail_tracker_percentile,
    bench_usl_fit,
);

criterion_main!(benches);
