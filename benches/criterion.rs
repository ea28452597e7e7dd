// Copyright 2024-2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::mem::size_of;

const NUM_THREADS: &[usize] = &[1, 2, 4, 8];
const LENGTHS: &[usize] = &[10_000, 100_000, 1_000_000, 10_000_000];

fn maximum(c: &mut Criterion) {
    let mut group = c.benchmark_group("maximum");
    for len in LENGTHS {
        group.throughput(Throughput::Bytes((len * size_of::<u64>()) as u64));
        group.bench_with_input(BenchmarkId::new("serial", len), len, serial::maximum);
        for &num_threads in NUM_THREADS {
            group.bench_with_input(
                BenchmarkId::new(format!("rayon@{num_threads}"), len),
                len,
                |bencher, len| rayon::maximum(bencher, num_threads, len),
            );
            group.bench_with_input(
                BenchmarkId::new(format!("parascalar_ephemeral@{num_threads}"), len),
                len,
                |bencher, len| parascalar::maximum(bencher, false, num_threads, len),
            );
            group.bench_with_input(
                BenchmarkId::new(format!("parascalar_pooled@{num_threads}"), len),
                len,
                |bencher, len| parascalar::maximum(bencher, true, num_threads, len),
            );
        }
    }
    group.finish();
}

fn all(c: &mut Criterion) {
    let mut group = c.benchmark_group("all");
    for len in LENGTHS {
        group.throughput(Throughput::Bytes((len * size_of::<u64>()) as u64));
        group.bench_with_input(BenchmarkId::new("serial", len), len, serial::all);
        for &num_threads in NUM_THREADS {
            group.bench_with_input(
                BenchmarkId::new(format!("rayon@{num_threads}"), len),
                len,
                |bencher, len| rayon::all(bencher, num_threads, len),
            );
            group.bench_with_input(
                BenchmarkId::new(format!("parascalar_ephemeral@{num_threads}"), len),
                len,
                |bencher, len| parascalar::all(bencher, false, num_threads, len),
            );
            group.bench_with_input(
                BenchmarkId::new(format!("parascalar_pooled@{num_threads}"), len),
                len,
                |bencher, len| parascalar::all(bencher, true, num_threads, len),
            );
        }
    }
    group.finish();
}

/// Baseline benchmarks using serial iterators (without any multi-threading
/// involved).
mod serial {
    use criterion::{black_box, Bencher};

    pub fn maximum(bencher: &mut Bencher, len: &usize) {
        let input = (0..*len as u64).collect::<Vec<u64>>();
        let input_slice = input.as_slice();
        bencher.iter(|| black_box(input_slice).iter().max().copied());
    }

    pub fn all(bencher: &mut Bencher, len: &usize) {
        let input = (0..*len as u64).collect::<Vec<u64>>();
        let input_slice = input.as_slice();
        bencher.iter(|| black_box(input_slice).iter().all(|x| *x < u64::MAX));
    }
}

/// Benchmarks using Rayon.
mod rayon {
    use criterion::{black_box, Bencher};
    use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

    pub fn maximum(bencher: &mut Bencher, num_threads: usize, len: &usize) {
        let input = (0..*len as u64).collect::<Vec<u64>>();
        let input_slice = input.as_slice();
        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()
            .unwrap();
        thread_pool.install(|| bencher.iter(|| black_box(input_slice).par_iter().max().copied()));
    }

    pub fn all(bencher: &mut Bencher, num_threads: usize, len: &usize) {
        let input = (0..*len as u64).collect::<Vec<u64>>();
        let input_slice = input.as_slice();
        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()
            .unwrap();
        thread_pool.install(|| {
            bencher.iter(|| black_box(input_slice).par_iter().all(|x| *x < u64::MAX))
        });
    }
}

/// Benchmarks using Parascalar.
mod parascalar {
    use criterion::{black_box, Bencher};
    use parascalar::{CpuPinningPolicy, ScalarReducer, ThreadCount, WorkerPoolBuilder};
    use std::sync::Arc;

    fn reducer(pooled: bool, num_threads: usize) -> ScalarReducer {
        if pooled {
            let pool = WorkerPoolBuilder {
                num_threads: ThreadCount::try_from(num_threads).unwrap(),
                cpu_pinning: CpuPinningPolicy::No,
            }
            .build()
            .unwrap();
            ScalarReducer::with_pool(Arc::new(pool))
        } else {
            ScalarReducer::new()
        }
    }

    pub fn maximum(bencher: &mut Bencher, pooled: bool, num_threads: usize, len: &usize) {
        let input = (0..*len as u64).collect::<Vec<u64>>();
        let input_slice = input.as_slice();
        let reducer = reducer(pooled, num_threads);
        bencher.iter(|| {
            reducer
                .maximum(num_threads, black_box(input_slice), u64::cmp)
                .unwrap()
        });
    }

    pub fn all(bencher: &mut Bencher, pooled: bool, num_threads: usize, len: &usize) {
        let input = (0..*len as u64).collect::<Vec<u64>>();
        let input_slice = input.as_slice();
        let reducer = reducer(pooled, num_threads);
        bencher.iter(|| {
            reducer
                .all(num_threads, black_box(input_slice), |x| *x < u64::MAX)
                .unwrap()
        });
    }
}

criterion_group!(benches, maximum, all);
criterion_main!(benches);
