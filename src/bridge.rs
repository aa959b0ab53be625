//! Thread-safe view of a promise's outcome.
//!
//! The bridge does not depend on the cooperative scheduler: any OS thread can
//! hold one and block on it, with or without a deadline.

use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// # Examples
///
/// ```
/// use promising::{Promise, Scheduler};
/// use std::thread;
///
/// let mut scheduler = Scheduler::new();
/// let promise = Promise::builder()
///     .scheduler(scheduler.handle())
///     .start_immediately(true)
///     .computation(async { Ok(String::from("🍓")) })
///     .build()
///     .unwrap();
/// let bridge = promise.as_concurrent_bridge();
/// let waiter = thread::spawn(move || bridge.result(None));
/// scheduler.run();
/// assert_eq!(waiter.join().unwrap().unwrap(), "🍓");
/// ```
pub struct ConcurrentBridge<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    outcome: Mutex<Option<Result<T>>>,
    settled: Condvar,
}

impl<T> Clone for ConcurrentBridge<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> ConcurrentBridge<T> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                outcome: Mutex::new(None),
                settled: Condvar::new(),
            }),
        }
    }

    /// Store the outcome and release every blocked waiter.
    ///
    /// The slot is single assignment: a second call leaves the first outcome
    /// in place and returns it back as an error.
    pub(crate) fn set(&self, outcome: Result<T>) -> std::result::Result<(), Result<T>> {
        let mut slot = self.inner.outcome.lock();
        if slot.is_some() {
            return Err(outcome);
        }
        *slot = Some(outcome);
        drop(slot);
        self.inner.settled.notify_all();
        Ok(())
    }

    pub fn is_done(&self) -> bool {
        self.inner.outcome.lock().is_some()
    }
}

impl<T: Clone> ConcurrentBridge<T> {
    /// The outcome if it is already known, without blocking.
    pub fn try_result(&self) -> Option<Result<T>> {
        self.inner.outcome.lock().clone()
    }

    /// Block the calling thread until the outcome is known.
    ///
    /// With `Some(timeout)` the wait gives up with [`Error::BridgeTimeout`]
    /// once the deadline passes; the outcome is still delivered to other
    /// waiters when it arrives.
    pub fn result(&self, timeout: Option<Duration>) -> Result<T> {
        let deadline = timeout.map(|timeout| (timeout, Instant::now() + timeout));
        let mut slot = self.inner.outcome.lock();
        loop {
            if let Some(outcome) = slot.as_ref() {
                return outcome.clone();
            }
            match deadline {
                None => self.inner.settled.wait(&mut slot),
                Some((timeout, deadline)) => {
                    if self.inner.settled.wait_until(&mut slot, deadline).timed_out() && slot.is_none() {
                        return Err(Error::BridgeTimeout(timeout));
                    }
                }
            }
        }
    }
}

impl<T> fmt::Debug for ConcurrentBridge<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentBridge")
            .field("done", &self.is_done())
            .finish()
    }
}
