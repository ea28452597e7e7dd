// Copyright 2024-2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

fn main() {
    divan::main();
}

const NUM_THREADS: &[usize] = &[1, 2, 4, 8];
const LENGTHS: &[usize] = &[10_000, 100_000, 1_000_000];

/// Baseline benchmarks using serial iterators (without any multi-threading
/// involved).
mod serial {
    use super::LENGTHS;
    use divan::counter::BytesCount;
    use divan::{black_box, Bencher};

    #[divan::bench(args = LENGTHS)]
    fn maximum(bencher: Bencher, len: usize) {
        let input = (0..len as u64).collect::<Vec<u64>>();
        let input_slice = input.as_slice();
        bencher
            .counter(BytesCount::of_many::<u64>(len))
            .bench_local(|| black_box(input_slice).iter().max().copied())
    }

    #[divan::bench(args = LENGTHS)]
    fn any(bencher: Bencher, len: usize) {
        let input = (0..len as u64).collect::<Vec<u64>>();
        let input_slice = input.as_slice();
        bencher
            .counter(BytesCount::of_many::<u64>(len))
            .bench_local(|| black_box(input_slice).iter().any(|x| *x == u64::MAX))
    }
}

/// Benchmarks using Rayon.
mod rayon {
    use super::{LENGTHS, NUM_THREADS};
    use divan::counter::BytesCount;
    use divan::{black_box, Bencher};
    use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

    #[divan::bench(consts = NUM_THREADS, args = LENGTHS)]
    fn maximum_rayon<const NUM_THREADS: usize>(bencher: Bencher, len: usize) {
        let input = (0..len as u64).collect::<Vec<u64>>();
        let input_slice = input.as_slice();
        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(NUM_THREADS)
            .build()
            .unwrap();
        // divan::Bencher isn't Send, so bench_local() can't run inside the Rayon
        // thread pool.
        bencher
            .counter(BytesCount::of_many::<u64>(len))
            .bench_local(|| {
                thread_pool.install(|| black_box(input_slice).par_iter().max().copied())
            });
    }

    #[divan::bench(consts = NUM_THREADS, args = LENGTHS)]
    fn any_rayon<const NUM_THREADS: usize>(bencher: Bencher, len: usize) {
        let input = (0..len as u64).collect::<Vec<u64>>();
        let input_slice = input.as_slice();
        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(NUM_THREADS)
            .build()
            .unwrap();
        bencher
            .counter(BytesCount::of_many::<u64>(len))
            .bench_local(|| {
                thread_pool.install(|| black_box(input_slice).par_iter().any(|x| *x == u64::MAX))
            });
    }
}

/// Benchmarks using Parascalar.
mod parascalar {
    use super::{LENGTHS, NUM_THREADS};
    use divan::counter::BytesCount;
    use divan::{black_box, Bencher};
    use parascalar::{CpuPinningPolicy, ScalarReducer, ThreadCount, WorkerPoolBuilder};
    use std::sync::Arc;

    #[divan::bench(consts = NUM_THREADS, args = LENGTHS)]
    fn maximum_ephemeral<const NUM_THREADS: usize>(bencher: Bencher, len: usize) {
        maximum_impl::<NUM_THREADS>(bencher, ScalarReducer::new(), len)
    }

    #[divan::bench(consts = NUM_THREADS, args = LENGTHS)]
    fn maximum_pooled<const NUM_THREADS: usize>(bencher: Bencher, len: usize) {
        maximum_impl::<NUM_THREADS>(bencher, pooled_reducer(NUM_THREADS), len)
    }

    #[divan::bench(consts = NUM_THREADS, args = LENGTHS)]
    fn any_ephemeral<const NUM_THREADS: usize>(bencher: Bencher, len: usize) {
        any_impl::<NUM_THREADS>(bencher, ScalarReducer::new(), len)
    }

    #[divan::bench(consts = NUM_THREADS, args = LENGTHS)]
    fn any_pooled<const NUM_THREADS: usize>(bencher: Bencher, len: usize) {
        any_impl::<NUM_THREADS>(bencher, pooled_reducer(NUM_THREADS), len)
    }

    fn pooled_reducer(num_threads: usize) -> ScalarReducer {
        let pool = WorkerPoolBuilder {
            num_threads: ThreadCount::try_from(num_threads).unwrap(),
            cpu_pinning: CpuPinningPolicy::No,
        }
        .build()
        .unwrap();
        ScalarReducer::with_pool(Arc::new(pool))
    }

    fn maximum_impl<const NUM_THREADS: usize>(
        bencher: Bencher,
        reducer: ScalarReducer,
        len: usize,
    ) {
        let input = (0..len as u64).collect::<Vec<u64>>();
        let input_slice = input.as_slice();
        bencher
            .counter(BytesCount::of_many::<u64>(len))
            .bench_local(|| {
                reducer
                    .maximum(NUM_THREADS, black_box(input_slice), u64::cmp)
                    .unwrap()
            });
    }

    fn any_impl<const NUM_THREADS: usize>(bencher: Bencher, reducer: ScalarReducer, len: usize) {
        let input = (0..len as u64).collect::<Vec<u64>>();
        let input_slice = input.as_slice();
        bencher
            .counter(BytesCount::of_many::<u64>(len))
            .bench_local(|| {
                reducer
                    .any(NUM_THREADS, black_box(input_slice), |x| *x == u64::MAX)
                    .unwrap()
            });
    }
}
