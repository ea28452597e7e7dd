// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! CLI tool to run examples of parallel reductions.

use clap::{Parser, ValueEnum};
use parascalar::{
    ChunkStrategy, CpuPinningPolicy, ReducerBuilder, ScalarReducer, ThreadCount,
    WorkerPoolBuilder,
};
use rand::seq::index;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha12Rng;
use std::hint::black_box;
use std::num::NonZeroUsize;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> parascalar::Result<()> {
    let threads = match cli.num_threads {
        Some(num_threads) => num_threads,
        None => ThreadCount::AvailableParallelism.count()?,
    };
    let chunk_strategy = match cli.chunk_strategy {
        ChunkStrategyCli::Balanced => ChunkStrategy::Balanced,
        ChunkStrategyCli::FloorDivision => ChunkStrategy::FloorDivision,
    };

    let reducer: ScalarReducer = match cli.mode {
        Mode::Ephemeral => ReducerBuilder {
            chunk_strategy,
            ..ReducerBuilder::default()
        }
        .build(),
        Mode::Pooled => {
            let pool = WorkerPoolBuilder {
                num_threads: ThreadCount::Count(threads),
                cpu_pinning: CpuPinningPolicy::IfSupported,
            }
            .build()?;
            ReducerBuilder {
                pool: Some(Arc::new(pool)),
                chunk_strategy,
                cancellation: None,
            }
            .build()
        }
    };

    let threads = threads.get();
    let start = Instant::now();
    match cli.scenario {
        Scenario::Max => {
            let input = random_values(cli.input_size);
            let max = reducer.maximum(threads, black_box(&input), i64::cmp)?;
            println!("max = {max}");
        }
        Scenario::Min => {
            let input = random_values(cli.input_size);
            let min = reducer.minimum(threads, black_box(&input), i64::cmp)?;
            println!("min = {min}");
        }
        Scenario::All => {
            let input = fill_needles(cli.input_size, cli.density);
            let all = reducer.all(threads, black_box(&input), |x| !*x)?;
            println!("all = {all}");
        }
        Scenario::Any => {
            let input = fill_needles(cli.input_size, cli.density);
            let any = reducer.any(threads, black_box(&input), |x| *x)?;
            println!("any = {any}");
        }
    }
    println!("elapsed = {:?}", start.elapsed());
    Ok(())
}

/// Creates a vector of `input_size` random integers, fixed by a constant seed
/// for reproducibility.
fn random_values(input_size: usize) -> Vec<i64> {
    let mut rng = ChaCha12Rng::seed_from_u64(42);
    (0..input_size).map(|_| rng.random()).collect()
}

/// Creates a vector of `input_size` booleans, `density` of which are set to
/// [`true`] (the needles). The set of needles follows a uniform distribution,
/// but is fixed by a constant seed for reproducibility.
fn fill_needles(input_size: usize, density: usize) -> Vec<bool> {
    let mut input = vec![false; input_size];
    let mut rng = ChaCha12Rng::seed_from_u64(42);
    let needles = index::sample(&mut rng, input_size, density.min(input_size));
    for needle in needles {
        input[needle] = true;
    }
    input
}

/// CLI tool to run examples of parallel reductions.
#[derive(Parser, Debug, PartialEq, Eq)]
#[command(version)]
struct Cli {
    /// Number of threads per reduction. Default to the available parallelism.
    #[arg(long)]
    num_threads: Option<NonZeroUsize>,
    /// Where to run the chunks.
    #[arg(long, value_enum, default_value_t = Mode::Pooled)]
    mode: Mode,
    /// Policy to split the input into chunks.
    #[arg(long, value_enum, default_value_t = ChunkStrategyCli::Balanced)]
    chunk_strategy: ChunkStrategyCli,
    /// Reduction to run in parallel.
    #[arg(long, value_enum)]
    scenario: Scenario,
    /// Number of items in the input.
    #[arg(long, default_value_t = 1_000_000)]
    input_size: usize,
    /// Number of items that match the predicate. Used only for the all and any
    /// scenarios.
    #[arg(long, default_value_t = 1)]
    density: usize,
}

/// Where to run the chunks.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    /// One short-lived thread per chunk.
    Ephemeral,
    /// A long-lived worker pool.
    Pooled,
}

/// Policy to split the input into chunks.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum ChunkStrategyCli {
    /// Exactly one chunk per thread, of balanced sizes.
    Balanced,
    /// Chunks of `input_size / num_threads` items, plus the leftover.
    FloorDivision,
}

/// Scenario to run.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Scenario {
    /// Maximum of random integers.
    Max,
    /// Minimum of random integers.
    Min,
    /// Whether no needle is present.
    All,
    /// Whether any needle is present.
    Any,
}
