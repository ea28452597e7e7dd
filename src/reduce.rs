// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Parallel scalar reductions: maximum, minimum, all and any.

use crate::core::partition::{split_with, Chunk, ChunkStrategy};
use crate::core::{BatchExecutor, CancellationToken, Counter, WorkerPool};
use crate::error::{Error, Result};
use crate::macros::log_debug;
#[cfg(feature = "log_parallelism")]
use crate::macros::log_trace;
use std::cmp::Ordering;
use std::ops::{Deref, Range};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Configuration of a [`ScalarReducer`].
pub struct ReducerBuilder<P = WorkerPool> {
    /// Pool to dispatch the chunks to. Without a pool, each reduction spawns
    /// one short-lived thread per chunk.
    pub pool: Option<Arc<P>>,
    /// Strategy to split the input into chunks.
    pub chunk_strategy: ChunkStrategy,
    /// Token to cancel the reductions while they wait for their chunks.
    pub cancellation: Option<CancellationToken>,
}

impl<P> Default for ReducerBuilder<P> {
    fn default() -> Self {
        Self {
            pool: None,
            chunk_strategy: ChunkStrategy::default(),
            cancellation: None,
        }
    }
}

impl<P> ReducerBuilder<P> {
    /// Creates a reducer with this configuration.
    pub fn build(self) -> ScalarReducer<P> {
        ScalarReducer {
            pool: self.pool,
            chunk_strategy: self.chunk_strategy,
            cancellation: self.cancellation,
        }
    }
}

/// Computes scalar reductions by splitting the input into contiguous chunks,
/// reducing each chunk in parallel and combining the partial results.
///
/// The chunks are either processed on an injected [`BatchExecutor`] (such as a
/// [`WorkerPool`]) or on one scoped thread per chunk. Both modes return the
/// same results for the same inputs.
///
/// ```
/// # use parascalar::{ScalarReducer, WorkerPool};
/// # use std::sync::Arc;
/// let values = [3, 1, 4, 1, 5, 9, 2, 6];
///
/// let reducer = ScalarReducer::new();
/// assert_eq!(reducer.maximum(3, &values, i32::cmp), Ok(9));
///
/// let pool = Arc::new(WorkerPool::new(2).unwrap());
/// let reducer = ScalarReducer::with_pool(pool);
/// assert_eq!(reducer.minimum(3, &values, i32::cmp), Ok(1));
/// assert_eq!(reducer.any(3, &values, |x| *x > 8), Ok(true));
/// ```
pub struct ScalarReducer<P = WorkerPool> {
    pool: Option<Arc<P>>,
    chunk_strategy: ChunkStrategy,
    cancellation: Option<CancellationToken>,
}

impl<P> Clone for ScalarReducer<P> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            chunk_strategy: self.chunk_strategy,
            cancellation: self.cancellation.clone(),
        }
    }
}

impl ScalarReducer<WorkerPool> {
    /// Creates a reducer that spawns short-lived threads for each reduction.
    pub fn new() -> Self {
        ReducerBuilder::default().build()
    }
}

impl Default for ScalarReducer<WorkerPool> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: BatchExecutor> ScalarReducer<P> {
    /// Creates a reducer that dispatches the chunks to the given pool.
    pub fn with_pool(pool: Arc<P>) -> Self {
        ReducerBuilder {
            pool: Some(pool),
            ..ReducerBuilder::default()
        }
        .build()
    }

    /// Returns the maximal value under the comparator, computed with the given
    /// number of threads.
    ///
    /// If several values are maximal, the first one in input order is
    /// returned. Fails with [`Error::EmptyInput`] if there are no values.
    pub fn maximum<T, C>(&self, threads: usize, values: &[T], comparator: C) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        C: Fn(&T, &T) -> Ordering + Send + Sync + 'static,
    {
        let comparator = Arc::new(comparator);
        let partials = self.map_chunks(threads, values, {
            let comparator = comparator.clone();
            move |chunk: &[T]| first_max(chunk.iter(), |a, b| comparator(a, b)).cloned()
        })?;

        // Chunks are never empty, so only an empty input yields no partial result.
        let num_chunks = partials.len();
        let partials = partials.into_iter().flatten();
        std::panic::catch_unwind(AssertUnwindSafe(|| {
            first_max(partials, |a, b| comparator(a, b))
        }))
        .map_err(|payload| Error::from_panic(num_chunks, payload))?
        .ok_or(Error::EmptyInput)
    }

    /// Returns the minimal value under the comparator, computed with the given
    /// number of threads.
    ///
    /// This is the [`maximum()`](Self::maximum) under the reversed comparator,
    /// so if several values are minimal the first one in input order is
    /// returned. Fails with [`Error::EmptyInput`] if there are no values.
    pub fn minimum<T, C>(&self, threads: usize, values: &[T], comparator: C) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        C: Fn(&T, &T) -> Ordering + Send + Sync + 'static,
    {
        self.maximum(threads, values, move |a, b| comparator(a, b).reverse())
    }

    /// Returns whether the predicate holds for all the values (true for an
    /// empty input), computed with the given number of threads.
    ///
    /// Every chunk is fully evaluated, even if another chunk already found a
    /// value for which the predicate doesn't hold.
    pub fn all<T, F>(&self, threads: usize, values: &[T], predicate: F) -> Result<bool>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let partials = self.map_chunks(threads, values, move |chunk: &[T]| {
            chunk.iter().all(|x| predicate(x))
        })?;
        Ok(partials.into_iter().all(|matched| matched))
    }

    /// Returns whether the predicate holds for any of the values (false for
    /// an empty input), computed with the given number of threads.
    ///
    /// This is the negation of [`all()`](Self::all) under the negated
    /// predicate.
    pub fn any<T, F>(&self, threads: usize, values: &[T], predicate: F) -> Result<bool>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.all(threads, values, move |x| !predicate(x))
            .map(|all| !all)
    }

    /// Splits the values into chunks and applies the function to each chunk in
    /// parallel, returning the outputs in chunk order.
    fn map_chunks<T, R, F>(&self, threads: usize, values: &[T], function: F) -> Result<Vec<R>>
    where
        T: Clone + Send + Sync + 'static,
        R: Send + 'static,
        F: Fn(&[T]) -> R + Send + Sync + 'static,
    {
        let chunks = split_with(threads, values, self.chunk_strategy)?;
        log_debug!(
            "Reducing {} item(s) in {} chunk(s) ({})",
            values.len(),
            chunks.len(),
            if self.pool.is_some() { "pooled" } else { "ephemeral" }
        );

        match &self.pool {
            Some(pool) => {
                let shared: Arc<[T]> = values.into();
                let chunks = chunks
                    .iter()
                    .map(|chunk| SharedChunk {
                        values: shared.clone(),
                        range: chunk.range(),
                    })
                    .collect();
                pool.submit_batch_with(
                    move |chunk: SharedChunk<T>| {
                        #[cfg(feature = "log_parallelism")]
                        log_trace!("[pooled chunk] Reducing items {:?}", chunk.range);
                        function(&chunk)
                    },
                    chunks,
                    self.cancellation.as_ref(),
                )
            }
            None => run_ephemeral(&chunks, &function, self.cancellation.as_ref()),
        }
    }
}

/// A chunk owning a handle to the whole input, so that it can be sent to a
/// pool's worker threads.
struct SharedChunk<T> {
    values: Arc<[T]>,
    range: Range<usize>,
}

impl<T> Deref for SharedChunk<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.values[self.range.clone()]
    }
}

/// Applies the function to each chunk on its own scoped thread.
///
/// All the threads are joined before returning, including when a chunk fails
/// or the wait is cancelled.
fn run_ephemeral<T, R, F>(
    chunks: &[Chunk<'_, T>],
    function: &F,
    cancel: Option<&CancellationToken>,
) -> Result<Vec<R>>
where
    T: Sync,
    R: Send,
    F: Fn(&[T]) -> R + Sync,
{
    // Same as an empty batch on a pool, which completes without waiting.
    if chunks.is_empty() {
        return Ok(Vec::new());
    }

    let counter = Arc::new(Counter::new(chunks.len()));
    std::thread::scope(|scope| {
        let handles = chunks
            .iter()
            .map(|chunk| {
                let counter = &counter;
                scope.spawn(move || {
                    #[cfg(feature = "log_parallelism")]
                    log_trace!(
                        "[chunk {}] Reducing items {:?}",
                        chunk.index(),
                        chunk.range()
                    );
                    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| function(chunk)))
                        .map_err(|payload| Error::from_panic(chunk.index(), payload));
                    counter.complete(outcome.as_ref().map(|_| ()).map_err(Error::clone));
                    outcome
                })
            })
            .collect::<Vec<_>>();

        counter.wait_with(cancel)?;

        handles
            .into_iter()
            .zip(chunks)
            .map(|(handle, chunk)| {
                handle
                    .join()
                    .unwrap_or_else(|payload| Err(Error::from_panic(chunk.index(), payload)))
            })
            .collect()
    })
}

/// Returns the first maximal item under the comparator.
fn first_max<T>(
    items: impl Iterator<Item = T>,
    comparator: impl Fn(&T, &T) -> Ordering,
) -> Option<T> {
    items.reduce(|best, item| {
        if comparator(&item, &best) == Ordering::Greater {
            item
        } else {
            best
        }
    })
}
