//! # Drift Detection Benchmarks
//!
//! Benchmarks for the statistical tests that back model monitoring.
//!
//! ## Running the Benchmarks
//!
//! ```bash
//! cargo bench -p perkon-monitor --bench drift
//! ```
//!
//! ## Benchmark Groups
//!
//! - **drift_methods**: KS / JS divergence / PSI / combined statistical test
//!   on 1K-sample windows
//! - **drift_scaling**: KS test at 100 / 1K / 10K / 100K samples
//! - **feature_report**: full per-feature report at 5/20/50 features

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use perkon_core::config::DriftConfig;
use perkon_core::DriftMethodKind;
use perkon_monitor::drift::DriftDetector;
use rustc_hash::FxHashMap;
use std::time::Duration;

// =============================================================================
// Sample generators
// =============================================================================

/// Approximately normal samples via a sum of LCG uniforms.
fn generate_gaussian_samples(length: usize, mean: f64, std: f64, seed: u64) -> Vec<f64> {
    let mut state = seed;
    let mut next_uniform = move || {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (state >> 11) as f64 / (1u64 << 53) as f64
    };
    (0..length)
        .map(|_| {
            let sum: f64 = (0..12).map(|_| next_uniform()).sum();
            mean + std * (sum - 6.0)
        })
        .collect()
}

/// Column-per-feature windows, each feature with its own seed.
fn generate_feature_window(
    features: usize,
    samples: usize,
    mean: f64,
    seed: u64,
) -> FxHashMap<String, Vec<f64>> {
    let mut window = FxHashMap::default();
    for i in 0..features {
        window.insert(
            format!("f{}", i),
            generate_gaussian_samples(samples, mean, 1.0, seed + i as u64),
        );
    }
    window
}

// =============================================================================
// Benchmark: individual methods
// =============================================================================

fn bench_drift_methods(c: &mut Criterion) {
    let mut group = c.benchmark_group("drift_methods");
    group.measurement_time(Duration::from_secs(5));

    let detector = DriftDetector::new(DriftConfig::default());
    let reference = generate_gaussian_samples(1_000, 0.0, 1.0, 42);
    let current = generate_gaussian_samples(1_000, 0.5, 1.2, 1337);

    let kinds = [
        DriftMethodKind::KsTest,
        DriftMethodKind::JsDivergence,
        DriftMethodKind::Psi,
        DriftMethodKind::StatisticalTest,
    ];

    for kind in kinds {
        let method = detector.method(Some(kind));
        group.bench_function(kind.to_string(), |b| {
            b.iter(|| black_box(method.compare(black_box(&reference), black_box(&current))))
        });
    }

    group.finish();
}

// =============================================================================
// Benchmark: KS scaling
// =============================================================================

fn bench_drift_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("drift_scaling");
    group.measurement_time(Duration::from_secs(10));

    let detector = DriftDetector::new(DriftConfig::default());
    let method = detector.method(Some(DriftMethodKind::KsTest));
    let sizes = [100, 1_000, 10_000, 100_000];

    for &size in &sizes {
        let reference = generate_gaussian_samples(size, 0.0, 1.0, 7);
        let current = generate_gaussian_samples(size, 0.3, 1.0, 23);
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("ks_test", size), &size, |b, _| {
            b.iter(|| black_box(method.compare(black_box(&reference), black_box(&current))))
        });
    }

    group.finish();
}

// =============================================================================
// Benchmark: multi-feature report
// =============================================================================

fn bench_feature_report(c: &mut Criterion) {
    let mut group = c.benchmark_group("feature_report");
    group.measurement_time(Duration::from_secs(10));

    let detector = DriftDetector::new(DriftConfig::default());
    let feature_counts = [5, 20, 50];

    for &features in &feature_counts {
        let reference = generate_feature_window(features, 500, 0.0, 99);
        let current = generate_feature_window(features, 500, 0.4, 4242);
        group.throughput(Throughput::Elements(features as u64));

        group.bench_with_input(
            BenchmarkId::new("detect_feature_drift", features),
            &features,
            |b, _| {
                b.iter(|| {
                    black_box(detector.detect_feature_drift(
                        black_box(&reference),
                        black_box(&current),
                        None,
                    ))
                })
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_drift_methods,
    bench_drift_scaling,
    bench_feature_report
);
criterion_main!(benches);
