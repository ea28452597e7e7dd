// Copyright 2024-2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Core engine: worker pool, partitioning and synchronization primitives.

pub mod partition;
mod sync;
mod thread_pool;

pub(crate) use sync::Counter;
pub use sync::CancellationToken;
pub use thread_pool::{
    BatchExecutor, CpuPinningPolicy, ThreadCount, WorkerPool, WorkerPoolBuilder,
};
