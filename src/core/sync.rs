// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Synchronization primitives

use crate::error::{Error, Result};
use crate::macros::log_debug;
use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};

/// An ergonomic wrapper around a [`Mutex`]-[`Condvar`] pair.
///
/// No user code ever runs while the mutex is held, so a poisoned mutex still
/// holds a consistent value and is simply recovered.
pub struct Status<T> {
    mutex: Mutex<T>,
    condvar: Condvar,
}

impl<T> Status<T> {
    /// Creates a new status initialized with the given value.
    pub fn new(t: T) -> Self {
        Self {
            mutex: Mutex::new(t),
            condvar: Condvar::new(),
        }
    }

    /// Locks the status, without waiting on the condition variable.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Notifies one waiting thread.
    pub fn notify_one(&self) {
        self.condvar.notify_one();
    }

    /// Notifies all waiting threads.
    pub fn notify_all(&self) {
        self.condvar.notify_all();
    }

    /// Waits until the predicate is false on this status.
    ///
    /// This returns a [`MutexGuard`], allowing to further inspect or modify the
    /// status.
    pub fn wait_while(&self, predicate: impl FnMut(&mut T) -> bool) -> MutexGuard<'_, T> {
        self.condvar
            .wait_while(self.lock(), predicate)
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Progress of a [`Counter`].
struct CounterState {
    /// Number of tasks that have completed so far.
    completed: usize,
    /// First failure recorded for this batch, if any.
    failure: Option<Error>,
}

/// A countdown barrier tracking the completion of one batch of tasks.
///
/// Tasks report their completion via [`complete()`](Self::complete), and
/// exactly one thread blocks in [`wait()`](Self::wait) until all of them are
/// done. The first failure (or an [`abort()`](Self::abort)) releases the
/// waiter early.
pub struct Counter {
    /// Number of completions to wait for.
    target: usize,
    /// Set once a failure was recorded. Workers check this without locking to
    /// skip tasks of a doomed batch.
    aborted: CachePadded<AtomicBool>,
    /// Progress, guarded by the mutex that the waiter sleeps on.
    state: Status<CounterState>,
}

impl Counter {
    /// Creates a counter waiting for `target` completions.
    pub fn new(target: usize) -> Self {
        Self {
            target,
            aborted: CachePadded::new(AtomicBool::new(false)),
            state: Status::new(CounterState {
                completed: 0,
                failure: None,
            }),
        }
    }

    /// Returns whether this batch has been aborted, in which case the result
    /// of any further task will be discarded.
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Records the completion of one task, with its outcome.
    pub fn complete(&self, outcome: Result<()>) {
        let mut state = self.state.lock();
        state.completed += 1;
        assert!(
            state.completed <= self.target,
            "a batch counter was completed more times than its target"
        );

        let mut release = state.completed == self.target;
        if let Err(e) = outcome {
            release |= Self::record_failure(&self.aborted, &mut state, e);
        }
        drop(state);

        if release {
            self.state.notify_all();
        }
    }

    /// Aborts the batch without completing a task, releasing the waiter with
    /// the given error unless a failure was already recorded.
    pub fn abort(&self, error: Error) {
        let mut state = self.state.lock();
        let release = Self::record_failure(&self.aborted, &mut state, error);
        drop(state);

        if release {
            self.state.notify_all();
        }
    }

    /// Keeps the first failure only. Returns whether this one was recorded.
    fn record_failure(aborted: &AtomicBool, state: &mut CounterState, error: Error) -> bool {
        if state.failure.is_some() {
            log_debug!("Discarding subsequent batch failure: {error}");
            return false;
        }
        state.failure = Some(error);
        aborted.store(true, Ordering::Release);
        true
    }

    /// Blocks until all the tasks have completed, or until the batch is
    /// aborted.
    pub fn wait(&self) -> Result<()> {
        let state = self
            .state
            .wait_while(|state| state.completed < self.target && state.failure.is_none());
        match &state.failure {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    /// Same as [`wait()`](Self::wait), but the wait is also released with
    /// [`Error::Cancelled`] if the given token is cancelled.
    pub fn wait_with(self: &Arc<Self>, cancel: Option<&CancellationToken>) -> Result<()> {
        let _registration = cancel.map(|token| token.register(self));
        self.wait()
    }
}

/// A handle to cancel blocking operations from another thread.
///
/// Cancelling a token releases every thread currently waiting on a batch under
/// this token with [`Error::Cancelled`], as well as any later wait. Waiters
/// that use another token (or none) are never woken up. A token cannot be
/// reset once cancelled.
///
/// ```
/// # use parascalar::{CancellationToken, Error, WorkerPool};
/// let pool = WorkerPool::new(1).unwrap();
/// let token = CancellationToken::new();
/// token.cancel();
///
/// let result = pool.submit_batch_with(|x: u32| x + 1, vec![1, 2, 3], Some(&token));
/// assert_eq!(result, Err(Error::Cancelled));
/// ```
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

#[derive(Default)]
struct TokenInner {
    cancelled: AtomicBool,
    waiters: Mutex<Vec<Weak<Counter>>>,
}

impl CancellationToken {
    /// Creates a new token, not cancelled yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels this token.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        let waiters = std::mem::take(&mut *self.waiters());
        log_debug!("Cancelling {} waiting batch(es)", waiters.len());
        for counter in waiters.iter().filter_map(Weak::upgrade) {
            counter.abort(Error::Cancelled);
        }
    }

    /// Returns whether this token has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    fn waiters(&self) -> MutexGuard<'_, Vec<Weak<Counter>>> {
        self.inner
            .waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a counter to abort upon cancellation, for as long as the
    /// returned guard lives.
    fn register(&self, counter: &Arc<Counter>) -> Registration<'_> {
        let weak = Arc::downgrade(counter);
        self.waiters().push(weak.clone());
        // Checked after publishing the counter: either `cancel()` sees it in the
        // list, or this sees the flag.
        if self.is_cancelled() {
            counter.abort(Error::Cancelled);
        }
        Registration {
            token: self,
            counter: weak,
        }
    }
}

/// Guard unregistering a counter from a [`CancellationToken`] on drop.
struct Registration<'a> {
    token: &'a CancellationToken,
    counter: Weak<Counter>,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.token
            .waiters()
            .retain(|weak| !Weak::ptr_eq(weak, &self.counter));
    }
}
