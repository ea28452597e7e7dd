// Copyright 2024-2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A pool of persistent worker threads consuming batches of tasks from a
//! shared FIFO queue.

use super::sync::{CancellationToken, Counter, Status};
use crate::error::{Error, Result};
use crate::macros::{log_debug, log_error, log_warn};
// Platforms that support `libc::sched_setaffinity()`.
#[cfg(all(
    not(miri),
    any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux"
    )
))]
use nix::{
    sched::{sched_setaffinity, CpuSet},
    unistd::Pid,
};
use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

/// Number of threads to spawn in a worker pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadCount {
    /// Spawn the number of threads returned by
    /// [`std::thread::available_parallelism()`].
    AvailableParallelism,
    /// Spawn the given number of threads.
    Count(NonZeroUsize),
}

impl ThreadCount {
    /// Resolves the number of threads to spawn.
    pub fn count(self) -> Result<NonZeroUsize> {
        match self {
            ThreadCount::AvailableParallelism => {
                std::thread::available_parallelism().map_err(|e| Error::WorkerSetup {
                    message: format!("getting the available parallelism failed: {e}"),
                })
            }
            ThreadCount::Count(count) => Ok(count),
        }
    }
}

impl TryFrom<usize> for ThreadCount {
    type Error = Error;

    fn try_from(thread_count: usize) -> Result<Self> {
        Ok(ThreadCount::Count(Error::check_threads(thread_count)?))
    }
}

/// Policy to pin worker threads to CPUs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CpuPinningPolicy {
    /// Don't pin worker threads to CPUs.
    #[default]
    No,
    /// Pin each worker thread to a CPU, if CPU pinning is supported and
    /// implemented on this platform.
    IfSupported,
    /// Pin each worker thread to a CPU. If CPU pinning isn't supported on this
    /// platform (or not implemented), or if it fails, building a worker pool
    /// fails with [`Error::WorkerSetup`].
    Always,
}

/// A builder for [`WorkerPool`].
#[derive(Clone, Copy, Debug)]
pub struct WorkerPoolBuilder {
    /// Number of worker threads to spawn in the pool.
    pub num_threads: ThreadCount,
    /// Policy to pin worker threads to CPUs.
    pub cpu_pinning: CpuPinningPolicy,
}

impl WorkerPoolBuilder {
    /// Spawns a worker pool.
    ///
    /// ```
    /// # use parascalar::{CpuPinningPolicy, ThreadCount, WorkerPoolBuilder};
    /// let pool = WorkerPoolBuilder {
    ///     num_threads: ThreadCount::AvailableParallelism,
    ///     cpu_pinning: CpuPinningPolicy::No,
    /// }
    /// .build()
    /// .unwrap();
    ///
    /// let squares = pool.submit_batch(|x: u64| x * x, vec![1, 2, 3, 4, 5]);
    /// assert_eq!(squares, Ok(vec![1, 4, 9, 16, 25]));
    /// ```
    pub fn build(&self) -> Result<WorkerPool> {
        WorkerPool::spawn(self.num_threads.count()?, self.cpu_pinning)
    }
}

/// A unit of work in the shared queue, with its type erased.
trait Job: Send {
    /// Runs this job on the given worker thread.
    fn run(self: Box<Self>, worker_id: usize);

    /// Discards this job without running it.
    fn abandon(self: Box<Self>);
}

/// Results of a batch, index-aligned with its input items.
struct Batch<R> {
    /// Barrier on which the submitter waits.
    counter: Arc<Counter>,
    /// One slot per input item.
    results: Box<[Mutex<Option<R>>]>,
}

/// A function applied to one item of a batch.
struct Task<T, R, F> {
    /// Function shared by all the tasks of the batch.
    function: Arc<F>,
    /// Item to process.
    argument: T,
    /// Position of the item in the batch.
    index: usize,
    /// Batch that this task belongs to.
    batch: Arc<Batch<R>>,
}

impl<T, R, F> Job for Task<T, R, F>
where
    T: Send,
    R: Send,
    F: Fn(T) -> R + Send + Sync,
{
    fn run(self: Box<Self>, _worker_id: usize) {
        let Task {
            function,
            argument,
            index,
            batch,
        } = *self;

        if batch.counter.is_aborted() {
            log_debug!("[thread {_worker_id}] Skipping task #{index} of an aborted batch");
            batch.counter.complete(Ok(()));
            return;
        }

        // The panic is forwarded to the submitter as an error, so the function isn't
        // observed after an unwind.
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| (*function)(argument)));
        match outcome {
            Ok(result) => {
                *batch.results[index]
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(result);
                batch.counter.complete(Ok(()));
            }
            Err(payload) => {
                let error = Error::from_panic(index, payload);
                log_error!("[thread {_worker_id}] Detected panic in a task: {error}");
                batch.counter.complete(Err(error));
            }
        }
    }

    fn abandon(self: Box<Self>) {
        self.batch.counter.abort(Error::ShutDown);
    }
}

/// Queue shared between the submitters and the worker threads.
struct TaskQueue {
    /// Pending tasks, in submission order.
    tasks: VecDeque<Box<dyn Job>>,
    /// Whether the pool still accepts and runs tasks.
    live: bool,
}

/// Handle to a worker thread in the pool.
struct WorkerThreadHandle {
    /// Thread handle object, returning the number of tasks that the thread
    /// ran.
    handle: JoinHandle<usize>,
}

/// A fixed set of persistent worker threads, consuming tasks from one shared
/// FIFO queue.
///
/// A pool can be shared between threads (for example via an [`Arc`]), and
/// batches submitted concurrently by several callers are processed without
/// interfering with each other. Dropping the pool shuts it down.
///
/// ```
/// # use parascalar::WorkerPool;
/// let pool = WorkerPool::new(2).unwrap();
/// let squares = pool.submit_batch(|x: u32| x * x, vec![1, 2, 3, 4, 5]);
/// assert_eq!(squares, Ok(vec![1, 4, 9, 16, 25]));
/// ```
pub struct WorkerPool {
    /// Number of worker threads spawned.
    num_threads: NonZeroUsize,
    /// Queue shared with the worker threads.
    queue: Arc<Status<TaskQueue>>,
    /// Handles to the worker threads that haven't been joined yet.
    threads: Mutex<Vec<WorkerThreadHandle>>,
}

impl WorkerPool {
    /// Creates a pool of `num_threads` worker threads, without CPU pinning.
    ///
    /// Fails with [`Error::InvalidArgument`] if `num_threads` is zero.
    pub fn new(num_threads: usize) -> Result<Self> {
        WorkerPoolBuilder {
            num_threads: ThreadCount::try_from(num_threads)?,
            cpu_pinning: CpuPinningPolicy::No,
        }
        .build()
    }

    fn spawn(num_threads: NonZeroUsize, cpu_pinning: CpuPinningPolicy) -> Result<Self> {
        check_pinning_support(cpu_pinning)?;

        let pool = Self {
            num_threads,
            queue: Arc::new(Status::new(TaskQueue {
                tasks: VecDeque::new(),
                live: true,
            })),
            threads: Mutex::new(Vec::with_capacity(num_threads.get())),
        };

        // Workers report their setup outcome before starting to consume tasks. If
        // anything fails, returning early drops the pool, which joins the threads
        // spawned so far.
        let (setup_sender, setup_receiver) = mpsc::channel();
        for id in 0..num_threads.get() {
            let context = WorkerContext {
                id,
                queue: pool.queue.clone(),
            };
            let setup_sender = setup_sender.clone();
            let handle = std::thread::Builder::new()
                .name(format!("parascalar-worker-{id}"))
                .spawn(move || {
                    // The receiver is only gone if the build already failed.
                    let _ = setup_sender.send(pin_current_thread(id, cpu_pinning));
                    drop(setup_sender);
                    context.run()
                })
                .map_err(|e| Error::WorkerSetup {
                    message: format!("failed to spawn worker thread #{id}: {e}"),
                })?;
            pool.lock_threads().push(WorkerThreadHandle { handle });
        }
        drop(setup_sender);

        for outcome in setup_receiver.iter() {
            outcome?;
        }
        log_debug!("[main thread] Spawned {num_threads} worker threads");

        Ok(pool)
    }

    /// Returns the number of worker threads that have been spawned in this
    /// pool.
    pub fn num_threads(&self) -> NonZeroUsize {
        self.num_threads
    }

    /// Returns the number of tasks waiting in the queue, not started yet.
    pub fn pending_tasks(&self) -> usize {
        self.queue.lock().tasks.len()
    }

    /// Applies the function to each item in parallel on the worker threads,
    /// blocking until all of them are processed. The results are returned in
    /// the order of the input items.
    ///
    /// If the function panics, the first panic observed is returned as
    /// [`Error::TaskFailure`] as soon as it happens, and the remaining tasks
    /// of this batch are skipped. The worker threads stay alive.
    pub fn submit_batch<T, R, F>(&self, function: F, items: Vec<T>) -> Result<Vec<R>>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        self.submit_batch_with(function, items, None)
    }

    /// Same as [`submit_batch()`](Self::submit_batch), but the wait can be
    /// interrupted via the given [`CancellationToken`], in which case this
    /// returns [`Error::Cancelled`] and the remaining tasks of the batch are
    /// skipped.
    pub fn submit_batch_with<T, R, F>(
        &self,
        function: F,
        items: Vec<T>,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<R>>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        let len = items.len();
        if len == 0 {
            return Ok(Vec::new());
        }

        let counter = Arc::new(Counter::new(len));
        let batch = Arc::new(Batch {
            counter: counter.clone(),
            results: (0..len).map(|_| Mutex::new(None)).collect(),
        });
        let function = Arc::new(function);

        {
            let mut queue = self.queue.lock();
            if !queue.live {
                log_warn!("Rejecting a batch of {len} task(s) submitted after shutdown");
                return Err(Error::ShutDown);
            }
            queue
                .tasks
                .extend(items.into_iter().enumerate().map(|(index, argument)| {
                    Box::new(Task {
                        function: function.clone(),
                        argument,
                        index,
                        batch: batch.clone(),
                    }) as Box<dyn Job>
                }));
        }
        // Several batches may share the pool, so all idle workers are woken up.
        self.queue.notify_all();
        log_debug!("[main thread] Submitted a batch of {len} task(s)");

        counter.wait_with(cancel)?;

        let results = batch
            .results
            .iter()
            .map(|slot| {
                slot.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take()
                    .expect("a task of a completed batch didn't store its result")
            })
            .collect();
        Ok(results)
    }

    /// Stops the worker threads and discards the pending tasks.
    ///
    /// Callers waiting on a batch that still has pending tasks are released
    /// with [`Error::ShutDown`], and later submissions fail with the same
    /// error. Tasks already running are allowed to finish, and the worker
    /// threads are joined (except the calling thread, if this is called from a
    /// task). Calling this more than once has no further effect.
    pub fn shutdown(&self) {
        let abandoned = {
            let mut queue = self.queue.lock();
            queue.live = false;
            std::mem::take(&mut queue.tasks)
        };
        self.queue.notify_all();

        if !abandoned.is_empty() {
            log_warn!(
                "[main thread] Abandoning {} pending task(s) on shutdown",
                abandoned.len()
            );
        }
        for job in abandoned {
            job.abandon();
        }

        let threads = std::mem::take(&mut *self.lock_threads());
        if threads.is_empty() {
            return;
        }

        log_debug!("[main thread] Joining threads in the pool...");
        let current = std::thread::current().id();
        for (_i, t) in threads.into_iter().enumerate() {
            if t.handle.thread().id() == current {
                log_warn!("[main thread] Not joining thread {_i}, which requested the shutdown");
                continue;
            }
            let result = t.handle.join();
            match result {
                Ok(_tasks) => {
                    log_debug!("[main thread] Thread {_i} joined after running {_tasks} task(s)")
                }
                Err(_) => log_error!("[main thread] Thread {_i} joined with result: {result:?}"),
            }
        }
        log_debug!("[main thread] Joined threads.");
    }

    fn lock_threads(&self) -> std::sync::MutexGuard<'_, Vec<WorkerThreadHandle>> {
        self.threads.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for WorkerPool {
    /// Shuts down the pool and joins all the threads.
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// An executor that can run a batch of tasks in parallel, returning their
/// results in input order.
///
/// This is the interface through which a
/// [`ScalarReducer`](crate::ScalarReducer) dispatches chunks to an injected
/// pool.
pub trait BatchExecutor {
    /// Applies the function to each item in parallel, blocking until all of
    /// them are processed or until the given token is cancelled.
    fn submit_batch_with<T, R, F>(
        &self,
        function: F,
        items: Vec<T>,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<R>>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> R + Send + Sync + 'static;

    /// Applies the function to each item in parallel, blocking until all of
    /// them are processed.
    fn submit_batch<T, R, F>(&self, function: F, items: Vec<T>) -> Result<Vec<R>>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        self.submit_batch_with(function, items, None)
    }

    /// Stops accepting tasks and discards the pending ones.
    fn shutdown(&self);
}

impl BatchExecutor for WorkerPool {
    fn submit_batch_with<T, R, F>(
        &self,
        function: F,
        items: Vec<T>,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<R>>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        WorkerPool::submit_batch_with(self, function, items, cancel)
    }

    fn shutdown(&self) {
        WorkerPool::shutdown(self)
    }
}

/// Context object owned by a worker thread.
struct WorkerContext {
    /// Thread index.
    id: usize,
    /// Queue shared with the submitters.
    queue: Arc<Status<TaskQueue>>,
}

impl WorkerContext {
    /// Main function run by this thread. Returns the number of tasks run.
    fn run(&self) -> usize {
        let mut tasks_run = 0;
        loop {
            log_debug!("[thread {}] Waiting for a task", self.id);
            let mut queue = self
                .queue
                .wait_while(|queue| queue.live && queue.tasks.is_empty());
            if !queue.live {
                log_debug!("[thread {}] Received shutdown signal", self.id);
                break;
            }
            let Some(job) = queue.tasks.pop_front() else {
                continue;
            };
            let more = !queue.tasks.is_empty();
            drop(queue);

            if more {
                self.queue.notify_one();
            }
            job.run(self.id);
            tasks_run += 1;
        }
        tasks_run
    }
}

#[cfg(all(
    not(miri),
    any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux"
    )
))]
fn check_pinning_support(_cpu_pinning: CpuPinningPolicy) -> Result<()> {
    Ok(())
}

#[cfg(any(
    miri,
    not(any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux"
    ))
))]
fn check_pinning_support(cpu_pinning: CpuPinningPolicy) -> Result<()> {
    match cpu_pinning {
        CpuPinningPolicy::No => Ok(()),
        CpuPinningPolicy::IfSupported => {
            log_warn!("Pinning threads to CPUs is not implemented on this platform.");
            Ok(())
        }
        CpuPinningPolicy::Always => Err(Error::WorkerSetup {
            message: "pinning threads to CPUs is not implemented on this platform".to_owned(),
        }),
    }
}

/// Pins the calling worker thread to the CPU of the same index, according to
/// the policy.
#[cfg(all(
    not(miri),
    any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux"
    )
))]
fn pin_current_thread(id: usize, cpu_pinning: CpuPinningPolicy) -> Result<()> {
    if cpu_pinning == CpuPinningPolicy::No {
        return Ok(());
    }

    let mut cpu_set = CpuSet::new();
    let pinned = cpu_set
        .set(id)
        .and_then(|()| sched_setaffinity(Pid::from_raw(0), &cpu_set));
    match pinned {
        Ok(()) => {
            log_debug!("Pinned thread #{id} to CPU #{id}");
            Ok(())
        }
        Err(e) if cpu_pinning == CpuPinningPolicy::Always => Err(Error::WorkerSetup {
            message: format!("failed to set CPU affinity for thread #{id}: {e}"),
        }),
        Err(_e) => {
            log_warn!("Failed to set CPU affinity for thread #{id}: {_e}");
            Ok(())
        }
    }
}

#[cfg(any(
    miri,
    not(any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux"
    ))
))]
fn pin_current_thread(_id: usize, _cpu_pinning: CpuPinningPolicy) -> Result<()> {
    Ok(())
}
