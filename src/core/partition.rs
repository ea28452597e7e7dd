// Copyright 2024-2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Splitting of a sequence into contiguous chunks.
//!
//! Whatever the [`ChunkStrategy`], the chunks are non-empty, don't overlap, and
//! their concatenation in order is exactly the input sequence.

use crate::error::{Error, Result};
use std::iter::FusedIterator;
use std::ops::{Deref, Range};

/// Strategy to split a sequence of `len` items into chunks, given a requested
/// number of threads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChunkStrategy {
    /// Yields exactly `min(threads, len)` chunks, whose sizes differ by at most
    /// one. The remainder of `len / threads` is distributed to the first
    /// chunks.
    ///
    /// For example 10 items over 3 threads yield chunks of sizes 4, 3, 3.
    #[default]
    Balanced,
    /// Yields chunks of `len / threads` items (or 1 item if `threads >= len`),
    /// the leftover items being spread over extra chunks, for a total of
    /// `len.div_ceil(len / threads)` chunks. This may yield several more
    /// chunks than `threads`, which is then only a lower bound on the
    /// parallelism.
    ///
    /// For example 10 items over 3 threads yield chunks of sizes 3, 3, 3, 1,
    /// and 11 items over 4 threads yield chunks of sizes 2, 2, 2, 2, 2, 1.
    FloorDivision,
}

/// Returns an iterator over the index ranges of the chunks that split a
/// sequence of `len` items for the given number of threads.
///
/// Fails with [`Error::InvalidArgument`] if `threads` is zero.
///
/// ```
/// # use parascalar::partition::{split_ranges, ChunkStrategy};
/// let ranges = split_ranges(3, 10, ChunkStrategy::Balanced).unwrap();
/// assert_eq!(ranges.collect::<Vec<_>>(), [0..4, 4..7, 7..10]);
///
/// let ranges = split_ranges(3, 10, ChunkStrategy::FloorDivision).unwrap();
/// assert_eq!(ranges.collect::<Vec<_>>(), [0..3, 3..6, 6..9, 9..10]);
/// ```
pub fn split_ranges(threads: usize, len: usize, strategy: ChunkStrategy) -> Result<ChunkRanges> {
    Error::check_threads(threads)?;
    if len == 0 {
        return Ok(ChunkRanges::empty());
    }

    let ranges = match strategy {
        ChunkStrategy::Balanced => {
            let num_chunks = threads.min(len);
            ChunkRanges {
                len,
                num_chunks,
                base: len / num_chunks,
                remainder: len % num_chunks,
                next: 0,
            }
        }
        ChunkStrategy::FloorDivision => {
            let chunk_size = if threads < len { len / threads } else { 1 };
            ChunkRanges {
                len,
                num_chunks: len.div_ceil(chunk_size),
                base: chunk_size,
                remainder: 0,
                next: 0,
            }
        }
    };
    Ok(ranges)
}

/// Splits the given values into chunks with the default
/// [`ChunkStrategy::Balanced`] strategy.
pub fn split<T>(threads: usize, values: &[T]) -> Result<Vec<Chunk<'_, T>>> {
    split_with(threads, values, ChunkStrategy::default())
}

/// Splits the given values into chunks with the given strategy.
pub fn split_with<T>(
    threads: usize,
    values: &[T],
    strategy: ChunkStrategy,
) -> Result<Vec<Chunk<'_, T>>> {
    let chunks = split_ranges(threads, values.len(), strategy)?
        .enumerate()
        .map(|(index, range)| Chunk {
            index,
            start: range.start,
            values: &values[range],
        })
        .collect();
    Ok(chunks)
}

/// A view over a contiguous range of an input sequence, at a given position
/// among all the chunks.
#[derive(Debug, PartialEq, Eq)]
pub struct Chunk<'a, T> {
    index: usize,
    start: usize,
    values: &'a [T],
}

impl<T> Clone for Chunk<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Chunk<'_, T> {}

impl<'a, T> Chunk<'a, T> {
    /// Position of this chunk among all the chunks.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Range of indices covered by this chunk in the input sequence.
    pub fn range(&self) -> Range<usize> {
        self.start..self.start + self.values.len()
    }

    /// Items of this chunk.
    pub fn as_slice(&self) -> &'a [T] {
        self.values
    }
}

impl<T> Deref for Chunk<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.values
    }
}

/// Iterator over the index ranges of chunks, returned by [`split_ranges()`].
#[derive(Clone, Debug)]
pub struct ChunkRanges {
    /// Total number of items.
    len: usize,
    /// Total number of chunks.
    num_chunks: usize,
    /// Minimal size of a chunk.
    base: usize,
    /// Number of leading chunks that hold one more item than `base`.
    remainder: usize,
    /// Index of the next chunk to yield.
    next: usize,
}

impl ChunkRanges {
    fn empty() -> Self {
        Self {
            len: 0,
            num_chunks: 0,
            base: 0,
            remainder: 0,
            next: 0,
        }
    }

    /// Start index of the chunk at the given position. Clamping to `len` only
    /// matters for the end of the last chunk of
    /// [`ChunkStrategy::FloorDivision`], which may exceed `usize::MAX` before
    /// clamping.
    fn start(&self, chunk: usize) -> usize {
        chunk
            .saturating_mul(self.base)
            .saturating_add(chunk.min(self.remainder))
            .min(self.len)
    }
}

impl Iterator for ChunkRanges {
    type Item = Range<usize>;

    fn next(&mut self) -> Option<Range<usize>> {
        if self.next == self.num_chunks {
            return None;
        }
        let chunk = self.next;
        self.next += 1;
        Some(self.start(chunk)..self.start(chunk + 1))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.num_chunks - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for ChunkRanges {}

impl FusedIterator for ChunkRanges {}
