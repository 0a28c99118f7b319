//! Criterion benchmarks for Clark CLEAN core operations.
//!
//! Run with: cargo bench
//! Run specific: cargo bench -- active_pixel_scan

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ndarray::{Array2, ArrayD};
use rand::prelude::*;
use rand_distr::{Distribution, Normal};

use clark_clean::minor_cycle::{run_minor_cycle, MinorCycleParams};
use clark_clean::scanner::abs_histogram;
use clark_clean::{
    biggest_residuals, cache_active_pixels, peak_residual, ClarkClean, CleanFloat, ComponentList,
    ResidualEngine,
};

// =============================================================================
// Helper Functions for Test Data Generation
// =============================================================================

fn noise_residual<F: CleanFloat>(nx: usize, ny: usize, seed: u64) -> ArrayD<F> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0f64, 1.0).unwrap();
    let mut img = ArrayD::<F>::zeros(vec![nx, ny, 1]);
    for v in img.iter_mut() {
        *v = F::from_f64_c(normal.sample(&mut rng));
    }
    // A handful of bright sources on top of the noise.
    for k in 0..8 {
        let x = (k * 37 + 11) % nx;
        let y = (k * 53 + 7) % ny;
        img[[x, y, 0]] = F::from_f64_c(20.0 + k as f64);
    }
    img
}

fn gaussian_patch<F: CleanFloat>(n: usize, sigma: f64) -> Array2<F> {
    let c = (n / 2) as f64;
    Array2::from_shape_fn((n, n), |(i, j)| {
        let dx = i as f64 - c;
        let dy = j as f64 - c;
        F::from_f64_c((-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp())
    })
}

/// Delta-PSF engine: the residual is just dirty - model.
struct DeltaEngine<F> {
    dirty: ArrayD<F>,
    psf_size: usize,
}

impl<F: CleanFloat> ResidualEngine<F> for DeltaEngine<F> {
    fn residual(&mut self, residual: &mut ArrayD<F>, model: &ArrayD<F>) {
        residual.assign(&(&self.dirty - model));
    }

    fn psf_shape(&self) -> (usize, usize) {
        (self.psf_size, self.psf_size)
    }

    fn evaluate_psf(&mut self, center: (usize, usize), scale: F, shape: (usize, usize)) -> Array2<F> {
        Array2::from_shape_fn(shape, |(i, j)| {
            if (i, j) == center {
                scale
            } else {
                F::zero()
            }
        })
    }
}

// =============================================================================
// Active Pixel Scan Benchmarks
// =============================================================================

fn bench_active_pixel_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("active_pixel_scan");

    for size in [128, 256, 512] {
        let residual = noise_residual::<f32>(size, size, 42);

        group.throughput(Throughput::Elements((size * size) as u64));

        // ~1% of Gaussian noise clears 2.5 sigma.
        group.bench_with_input(BenchmarkId::new("limit_2.5", size), &size, |b, _| {
            b.iter(|| {
                let mut list = ComponentList::<f32>::new(1, 32 * 1024);
                cache_active_pixels(&mut list, black_box(&residual), None, 2.5);
                list.len()
            })
        });

        // Undersized ledger forces grow-and-rescan recovery.
        group.bench_with_input(BenchmarkId::new("limit_2.5_grow", size), &size, |b, _| {
            b.iter(|| {
                let mut list = ComponentList::<f32>::new(1, 16);
                cache_active_pixels(&mut list, black_box(&residual), None, 2.5);
                list.len()
            })
        });

        group.bench_with_input(BenchmarkId::new("peak_residual", size), &size, |b, _| {
            b.iter(|| peak_residual(black_box(&residual), None))
        });
    }

    group.finish();
}

// =============================================================================
// Histogram Benchmarks
// =============================================================================

fn bench_histogram(c: &mut Criterion) {
    let mut group = c.benchmark_group("histogram");

    for size in [256, 512] {
        let residual = noise_residual::<f32>(size, size, 7);

        group.throughput(Throughput::Elements((size * size) as u64));

        group.bench_with_input(BenchmarkId::new("abs_histogram", size), &size, |b, _| {
            let mut hist = vec![0usize; 1024];
            b.iter(|| abs_histogram(&mut hist, black_box(&residual), None))
        });

        group.bench_with_input(
            BenchmarkId::new("biggest_residuals", size),
            &size,
            |b, _| {
                b.iter(|| biggest_residuals(1024, 0.0f32, black_box(&residual), None, 1024))
            },
        );
    }

    group.finish();
}

// =============================================================================
// Minor Cycle Benchmarks
// =============================================================================

fn bench_minor_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("minor_cycle");
    group.sample_size(20);

    let residual = noise_residual::<f32>(256, 256, 42);
    let patch = gaussian_patch::<f32>(51, 2.0);
    let mut active = ComponentList::<f32>::new(1, 32 * 1024);
    cache_active_pixels(&mut active, &residual, None, 2.5);

    group.throughput(Throughput::Elements(active.len() as u64));

    for budget in [10usize, 100] {
        let params = MinorCycleParams {
            gain: 0.1f32,
            flux_limit: 0.0,
            threshold: 1e-6,
            max_iterations: budget,
            speedup: 0.0,
            uncertainty: 0.0,
            total_iterations: 0,
        };
        group.bench_with_input(BenchmarkId::new("iterations", budget), &budget, |b, _| {
            b.iter(|| {
                let mut ledger = active.clone();
                let mut model = ArrayD::<f32>::zeros(vec![256, 256, 1]);
                let mut total_flux = 0.0f32;
                let mut first = true;
                run_minor_cycle(
                    black_box(&mut ledger),
                    patch.view(),
                    &mut model,
                    &params,
                    None,
                    &mut total_flux,
                    &mut first,
                )
            })
        });
    }

    group.finish();
}

// =============================================================================
// Full Solve / Precision Comparison Benchmarks
// =============================================================================

fn run_full_clean<F: CleanFloat>(size: usize, seed: u64) -> usize {
    let dirty = noise_residual::<F>(size, size, seed);
    let mut engine = DeltaEngine {
        dirty,
        psf_size: 2 * size,
    };
    let mut model = ArrayD::<F>::zeros(vec![size, size, 1]);
    let mut clean = ClarkClean::new(&mut model);
    clean.config_mut().threshold = F::from_f64_c(5.0);
    let outcome = clean.solve(&mut engine).unwrap();
    outcome.iterations
}

fn bench_full_solve(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_solve");
    group.sample_size(10);

    let size = 256;
    group.throughput(Throughput::Elements((size * size) as u64));

    group.bench_function("clean_256_f32", |b| {
        b.iter(|| run_full_clean::<f32>(black_box(size), 42))
    });

    group.bench_function("clean_256_f64", |b| {
        b.iter(|| run_full_clean::<f64>(black_box(size), 42))
    });

    group.finish();
}

// =============================================================================
// Criterion Configuration
// =============================================================================

criterion_group!(
    benches,
    bench_active_pixel_scan,
    bench_histogram,
    bench_minor_cycle,
    bench_full_solve,
);

criterion_main!(benches);
