//! The untyped part of a promise: identity, tree links, state and wakers.
//!
//! A [`PromiseNode`] knows nothing about the value its promise produces. That
//! keeps the ambient slot, the children set and the wait-for-children
//! protocol independent of `T`.

use crate::config::PromiseConfig;
use crate::error::{Error, Result};
use crate::scheduler::{SchedulerHandle, SchedulerId};
use futures::future::{join_all, LocalBoxFuture};
use indexmap::IndexMap;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

/// Attempts at snapshotting the children set before giving up.
pub const MAX_SNAPSHOT_ATTEMPTS: usize = 64;

static NEXT_PROMISE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PromiseId(u64);

impl PromiseId {
    fn next() -> Self {
        PromiseId(NEXT_PROMISE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for PromiseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a promise. Moves forward only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl PromiseState {
    pub fn is_done(self) -> bool {
        matches!(self, PromiseState::Succeeded | PromiseState::Failed)
    }
}

/// A promise's one-shot fulfilment routine, ready to be polled or spawned.
pub type Fulfilment = LocalBoxFuture<'static, ()>;

/// Builds the fulfilment routine once a strong node is at hand.
pub(crate) type Routine = Box<dyn FnOnce(PromiseNode) -> Fulfilment>;

enum Stage {
    Idle(Routine),
    Started,
    /// Begun inline, then left behind by its driver with nowhere to go.
    Suspended(Fulfilment),
    /// Constructed from a ready value or error.
    Absent,
}

struct NodeInner {
    id: PromiseId,
    name: String,
    parent: Option<PromiseNode>,
    children: RefCell<IndexMap<PromiseId, Weak<NodeInner>>>,
    config: Arc<PromiseConfig>,
    scheduler: Option<SchedulerHandle>,
    state: Cell<PromiseState>,
    stage: RefCell<Stage>,
    wakers: RefCell<Vec<Waker>>,
}

/// Shared handle to a promise's tree node.
///
/// A child keeps its parent alive; a parent only holds weak references to its
/// children, which are dropped from the set when they settle.
#[derive(Clone)]
pub struct PromiseNode {
    inner: Rc<NodeInner>,
}

impl PromiseNode {
    pub(crate) fn new(
        name: Option<String>,
        parent: Option<PromiseNode>,
        config: Arc<PromiseConfig>,
        scheduler: Option<SchedulerHandle>,
        routine: Option<Routine>,
    ) -> Self {
        let id = PromiseId::next();
        let stage = match routine {
            Some(routine) => Stage::Idle(routine),
            None => Stage::Absent,
        };
        Self {
            inner: Rc::new(NodeInner {
                id,
                name: name.unwrap_or_else(|| format!("Promise-{id}")),
                parent,
                children: RefCell::new(IndexMap::new()),
                config,
                scheduler,
                state: Cell::new(PromiseState::Pending),
                stage: RefCell::new(stage),
                wakers: RefCell::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> PromiseId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn parent(&self) -> Option<PromiseNode> {
        self.inner.parent.clone()
    }

    pub fn config(&self) -> Arc<PromiseConfig> {
        self.inner.config.clone()
    }

    pub fn scheduler(&self) -> Option<SchedulerHandle> {
        self.inner.scheduler.clone()
    }

    pub fn scheduler_id(&self) -> Option<SchedulerId> {
        self.inner.scheduler.as_ref().map(SchedulerHandle::id)
    }

    pub fn state(&self) -> PromiseState {
        self.inner.state.get()
    }

    pub fn is_done(&self) -> bool {
        self.state().is_done()
    }

    /// Children that have not settled yet, in creation order.
    ///
    /// Dead entries are pruned on the way. If the set stays mutably borrowed
    /// for [`MAX_SNAPSHOT_ATTEMPTS`] tries this fails with
    /// [`Error::SnapshotExhausted`].
    pub fn pending_children(&self) -> Result<Vec<PromiseNode>> {
        for _ in 0..MAX_SNAPSHOT_ATTEMPTS {
            let Ok(mut children) = self.inner.children.try_borrow_mut() else {
                std::hint::spin_loop();
                continue;
            };
            children.retain(|_, child| child.strong_count() > 0);
            return Ok(children
                .values()
                .filter_map(Weak::upgrade)
                .map(|inner| PromiseNode { inner })
                .filter(|child| !child.is_done())
                .collect());
        }
        Err(Error::SnapshotExhausted {
            attempts: MAX_SNAPSHOT_ATTEMPTS,
        })
    }

    pub(crate) fn link_child(&self, child: &PromiseNode) {
        self.inner
            .children
            .borrow_mut()
            .insert(child.id(), Rc::downgrade(&child.inner));
    }

    fn unlink_child(&self, id: PromiseId) {
        self.inner.children.borrow_mut().shift_remove(&id);
    }

    /// Take the fulfilment routine, moving the promise to `Running`.
    pub(crate) fn begin(&self) -> Result<Fulfilment> {
        let mut stage = self.inner.stage.borrow_mut();
        match std::mem::replace(&mut *stage, Stage::Started) {
            Stage::Idle(routine) => {
                drop(stage);
                self.inner.state.set(PromiseState::Running);
                tracing::debug!(promise = %self.name(), "Fulfilment started");
                Ok(routine(self.clone()))
            }
            previous => {
                *stage = previous;
                Err(Error::Reentrancy {
                    name: self.name().to_string(),
                })
            }
        }
    }

    /// The routine to drive inline: a fresh one if idle, or one that an
    /// earlier awaiter left unfinished.
    fn take_routine(&self) -> Option<Fulfilment> {
        let mut stage = self.inner.stage.borrow_mut();
        match std::mem::replace(&mut *stage, Stage::Started) {
            Stage::Suspended(routine) => {
                tracing::debug!(promise = %self.name(), "Fulfilment resumed");
                Some(routine)
            }
            Stage::Idle(routine) => {
                *stage = Stage::Idle(routine);
                drop(stage);
                self.begin().ok()
            }
            previous => {
                *stage = previous;
                None
            }
        }
    }

    /// Park an unfinished routine and wake the other awaiters so one of them
    /// takes over driving it.
    fn suspend(&self, routine: Fulfilment) {
        *self.inner.stage.borrow_mut() = Stage::Suspended(routine);
        let wakers = std::mem::take(&mut *self.inner.wakers.borrow_mut());
        for waker in wakers {
            waker.wake();
        }
    }

    pub(crate) fn ensure_idle(&self) -> Result<()> {
        match *self.inner.stage.borrow() {
            Stage::Idle(_) => Ok(()),
            _ => Err(Error::Reentrancy {
                name: self.name().to_string(),
            }),
        }
    }

    /// Future that completes once this promise is done, driving the
    /// fulfilment routine inline if nobody has started it.
    pub fn settled(&self) -> Settled {
        Settled {
            node: self.clone(),
            inline: None,
        }
    }

    /// Record the terminal state and release everything waiting on it.
    pub(crate) fn settle(&self, state: PromiseState) {
        let previous = self.inner.state.replace(state);
        assert!(
            state.is_done() && !previous.is_done(),
            "{} moved from {previous:?} to {state:?}",
            self.name()
        );
        if let Some(parent) = &self.inner.parent {
            parent.unlink_child(self.id());
        }
        let wakers = std::mem::take(&mut *self.inner.wakers.borrow_mut());
        for waker in wakers {
            waker.wake();
        }
    }

    /// Await every pending child whose own config asks its parent to wait.
    /// Their outcomes are ignored.
    pub(crate) async fn wait_for_flagged_children(&self) {
        let flagged: Vec<PromiseNode> = match self.pending_children() {
            Ok(children) => children
                .into_iter()
                .filter(|child| child.config().wait_for_children())
                .collect(),
            Err(err) => {
                tracing::warn!(promise = %self.name(), error = %err, "Not waiting for children");
                return;
            }
        };
        if flagged.is_empty() {
            return;
        }
        tracing::debug!(promise = %self.name(), children = flagged.len(), "Waiting for children");
        join_all(flagged.iter().map(PromiseNode::settled)).await;
    }

    fn register_waker(&self, waker: &Waker) {
        let mut wakers = self.inner.wakers.borrow_mut();
        if !wakers.iter().any(|registered| registered.will_wake(waker)) {
            wakers.push(waker.clone());
        }
    }
}

impl PartialEq for PromiseNode {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for PromiseNode {}

impl Hash for PromiseNode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Debug for PromiseNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromiseNode")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("state", &self.state())
            .field("parent", &self.inner.parent.as_ref().map(PromiseNode::id))
            .finish()
    }
}

/// See [`PromiseNode::settled`].
///
/// Dropping it while it drives a routine hands the routine over to the
/// promise's scheduler. Without one the routine is parked in the node and the
/// next awaiter picks it up.
pub struct Settled {
    node: PromiseNode,
    inline: Option<Fulfilment>,
}

impl Future for Settled {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = &mut *self;
        if this.inline.is_none() && !this.node.is_done() {
            this.inline = this.node.take_routine();
        }
        if let Some(routine) = this.inline.as_mut() {
            if routine.as_mut().poll(cx).is_pending() {
                return Poll::Pending;
            }
            this.inline = None;
        }
        if this.node.is_done() {
            return Poll::Ready(());
        }
        this.node.register_waker(cx.waker());
        Poll::Pending
    }
}

impl Drop for Settled {
    fn drop(&mut self) {
        let Some(routine) = self.inline.take() else {
            return;
        };
        let Some(scheduler) = self.node.scheduler() else {
            tracing::debug!(promise = %self.node.name(), "Fulfilment parked until awaited again");
            self.node.suspend(routine);
            return;
        };
        if let Err(err) = scheduler.spawn(routine) {
            tracing::warn!(promise = %self.node.name(), error = %err, "Fulfilment abandoned before completion");
        }
    }
}
