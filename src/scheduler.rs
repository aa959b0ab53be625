//! The cooperative host promises run on.
//!
//! A [`Scheduler`] is one scheduling domain: a single-threaded
//! [`LocalPool`] plus an identity. Promises spawn their fulfilment routines
//! through a [`SchedulerHandle`] and compare handles to detect a parent that
//! lives in another domain.

use crate::error::{Error, Result};
use futures::executor::{LocalPool, LocalSpawner};
use futures::future::LocalBoxFuture;
use futures::task::{LocalSpawn, LocalSpawnExt};
use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SCHEDULER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SchedulerId(u64);

impl fmt::Display for SchedulerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

thread_local! {
    static CURRENT_SCHEDULER: RefCell<Option<SchedulerHandle>> = const { RefCell::new(None) };
}

/// Restores the previously current scheduler on drop.
struct CurrentSchedulerGuard {
    prev: Option<SchedulerHandle>,
}

impl Drop for CurrentSchedulerGuard {
    fn drop(&mut self) {
        let prev = self.prev.take();
        CURRENT_SCHEDULER.with(|slot| *slot.borrow_mut() = prev);
    }
}

fn enter(handle: SchedulerHandle) -> CurrentSchedulerGuard {
    let prev = CURRENT_SCHEDULER.with(|slot| slot.borrow_mut().replace(handle));
    CurrentSchedulerGuard { prev }
}

/// Cloneable reference to a scheduler's spawner.
#[derive(Clone)]
pub struct SchedulerHandle {
    id: SchedulerId,
    spawner: LocalSpawner,
}

impl SchedulerHandle {
    /// Handle of the scheduler being driven on this thread.
    pub fn current() -> Option<SchedulerHandle> {
        CURRENT_SCHEDULER.with(|slot| slot.borrow().clone())
    }

    pub fn id(&self) -> SchedulerId {
        self.id
    }

    /// Fails if the owning [`Scheduler`] has been dropped.
    pub fn ensure_running(&self) -> Result<()> {
        self.spawner
            .status_local()
            .map_err(|_| Error::SchedulerShutdown)
    }

    pub(crate) fn spawn(&self, work: LocalBoxFuture<'static, ()>) -> Result<()> {
        self.spawner
            .spawn_local(work)
            .map_err(|_| Error::SchedulerShutdown)
    }
}

impl PartialEq for SchedulerHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SchedulerHandle {}

impl fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SchedulerHandle").field(&self.id).finish()
    }
}

pub struct Scheduler {
    pool: LocalPool,
    handle: SchedulerHandle,
}

impl Scheduler {
    pub fn new() -> Self {
        let pool = LocalPool::new();
        let handle = SchedulerHandle {
            id: SchedulerId(NEXT_SCHEDULER_ID.fetch_add(1, Ordering::Relaxed)),
            spawner: pool.spawner(),
        };
        tracing::trace!(scheduler = %handle.id, "Scheduler created");
        Self { pool, handle }
    }

    pub fn id(&self) -> SchedulerId {
        self.handle.id
    }

    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    /// Drive the pool until `future` completes.
    pub fn block_on<F: Future>(&mut self, future: F) -> F::Output {
        let _current = enter(self.handle.clone());
        self.pool.run_until(future)
    }

    /// Drive the pool until every spawned task has finished.
    pub fn run(&mut self) {
        let _current = enter(self.handle.clone());
        self.pool.run();
    }

    /// Drive the pool until no task can make progress.
    pub fn run_until_stalled(&mut self) {
        let _current = enter(self.handle.clone());
        self.pool.run_until_stalled();
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler").field("id", &self.handle.id).finish()
    }
}
