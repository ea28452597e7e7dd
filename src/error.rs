// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Errors returned by the worker pool and the reductions.

use std::any::Any;
use std::num::NonZeroUsize;

/// Error returned by the operations of this crate.
///
/// Every operation either returns a valid value or fails with exactly one of
/// these variants.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// An argument is out of its valid domain, for example a thread count of
    /// zero.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the offending argument.
        message: String,
    },
    /// A maximum or minimum was requested over an empty sequence.
    #[error("cannot reduce an empty sequence")]
    EmptyInput,
    /// A user-supplied function panicked while processing the task at the
    /// given index of its batch.
    #[error("task #{index} failed: {message}")]
    TaskFailure {
        /// Index of the failed task in its batch. For a reduction, this is the
        /// index of the chunk, or the number of chunks if the final combining
        /// step failed.
        index: usize,
        /// Panic payload, if it was a string.
        message: String,
    },
    /// The wait on a batch was cancelled via a
    /// [`CancellationToken`](crate::CancellationToken).
    #[error("the operation was cancelled")]
    Cancelled,
    /// The worker pool was shut down before the batch could complete, or a
    /// batch was submitted to a pool that is already shut down.
    #[error("the worker pool is shut down")]
    ShutDown,
    /// Spawning or configuring a worker thread failed.
    #[error("failed to set up a worker thread: {message}")]
    WorkerSetup {
        /// Description of the underlying failure.
        message: String,
    },
}

/// Result type of this crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Validates a requested thread count.
    pub(crate) fn check_threads(threads: usize) -> Result<NonZeroUsize> {
        NonZeroUsize::new(threads).ok_or_else(|| Error::InvalidArgument {
            message: format!("thread count must be at least 1, got {threads}"),
        })
    }

    /// Builds a [`Error::TaskFailure`] from the payload of a caught panic.
    pub(crate) fn from_panic(index: usize, payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_owned()
        };
        Error::TaskFailure { index, message }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_check_threads() {
        assert_eq!(Error::check_threads(1), Ok(NonZeroUsize::MIN));
        assert_eq!(Error::check_threads(64).map(NonZeroUsize::get), Ok(64));
        assert_eq!(
            Error::check_threads(0),
            Err(Error::InvalidArgument {
                message: "thread count must be at least 1, got 0".to_owned()
            })
        );
    }

    #[test]
    fn test_from_panic_payloads() {
        let payload = std::panic::catch_unwind(|| panic!("static message")).unwrap_err();
        assert_eq!(
            Error::from_panic(3, payload),
            Error::TaskFailure {
                index: 3,
                message: "static message".to_owned()
            }
        );

        let payload = std::panic::catch_unwind(|| panic!("formatted {}", 42)).unwrap_err();
        assert_eq!(
            Error::from_panic(0, payload),
            Error::TaskFailure {
                index: 0,
                message: "formatted 42".to_owned()
            }
        );

        let payload = std::panic::catch_unwind(|| std::panic::panic_any(17u32)).unwrap_err();
        assert_eq!(
            Error::from_panic(1, payload),
            Error::TaskFailure {
                index: 1,
                message: "non-string panic payload".to_owned()
            }
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Error::EmptyInput.to_string(),
            "cannot reduce an empty sequence"
        );
        assert_eq!(
            Error::TaskFailure {
                index: 2,
                message: "boom".to_owned()
            }
            .to_string(),
            "task #2 failed: boom"
        );
        assert_eq!(Error::Cancelled.to_string(), "the operation was cancelled");
        assert_eq!(Error::ShutDown.to_string(), "the worker pool is shut down");
    }
}
