//! The ambient "current promise" of a strand.
//!
//! The slot is thread-local, but it is only ever filled while a [`Scoped`]
//! future is being polled: each poll swaps the scope's promise in and swaps
//! the previous value back out before returning. A strand that suspends
//! therefore takes its current promise along with its continuation, and
//! other strands polled in the gap never observe it.

use crate::error::{Error, Result};
use crate::node::PromiseNode;
use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

thread_local! {
    static CURRENT_PROMISE: RefCell<Option<PromiseNode>> = const { RefCell::new(None) };
}

/// Pops the pushed promise on drop, including during unwinding.
pub(crate) struct AmbientGuard {
    pushed: PromiseNode,
    prev: Option<PromiseNode>,
}

impl Drop for AmbientGuard {
    fn drop(&mut self) {
        let prev = self.prev.take();
        let popped = CURRENT_PROMISE.with(|slot| std::mem::replace(&mut *slot.borrow_mut(), prev));
        tracing::trace!(promise = %self.pushed.name(), "Ambient pop");
        if !std::thread::panicking() {
            assert!(
                popped.as_ref() == Some(&self.pushed),
                "ambient context popped out of order: expected {}, found {:?}",
                self.pushed.name(),
                popped.as_ref().map(PromiseNode::name),
            );
        }
    }
}

/// Make `node` current until the guard drops.
pub(crate) fn push(node: PromiseNode) -> AmbientGuard {
    tracing::trace!(promise = %node.name(), "Ambient push");
    let prev = CURRENT_PROMISE.with(|slot| slot.borrow_mut().replace(node.clone()));
    AmbientGuard { pushed: node, prev }
}

/// The promise whose fulfilment routine is running on this strand.
pub fn try_current_promise() -> Option<PromiseNode> {
    CURRENT_PROMISE.with(|slot| slot.borrow().clone())
}

pub fn current_promise() -> Result<PromiseNode> {
    try_current_promise().ok_or(Error::NoCurrentPromise)
}

/// Future that runs `inner` with `node` as the current promise.
pub struct Scoped<F> {
    node: PromiseNode,
    inner: Pin<Box<F>>,
}

pub fn scope<F: Future>(node: PromiseNode, inner: F) -> Scoped<F> {
    Scoped {
        node,
        inner: Box::pin(inner),
    }
}

impl<F: Future> Future for Scoped<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let _current = push(this.node.clone());
        this.inner.as_mut().poll(cx)
    }
}
