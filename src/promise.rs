//! Typed promises: construction, fulfilment and the single completion path.

use crate::ambient;
use crate::bridge::ConcurrentBridge;
use crate::config::{ConfigFlags, ConfigParent, PromiseConfig};
use crate::defaults::MismatchPolicy;
use crate::error::{Error, Result};
use crate::node::{Fulfilment, PromiseId, PromiseNode, PromiseState, Routine, Settled};
use crate::scheduler::{SchedulerHandle, SchedulerId};
use futures::future::LocalBoxFuture;
use futures::FutureExt;
use once_cell::unsync::OnceCell;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

/// Deferred work wrapped by a promise.
pub type Computation<T> = LocalBoxFuture<'static, anyhow::Result<T>>;

/// Awaitable handle to one unit of asynchronous work and its outcome.
///
/// Handles are cheap to clone and every clone can be awaited on its own;
/// all awaiters are released together when the promise completes. Awaiting
/// a promise nobody has started runs its fulfilment routine on the awaiting
/// strand.
///
/// # Examples
///
/// ```
/// use promising::{Promise, Scheduler};
///
/// let mut scheduler = Scheduler::new();
/// let answer = scheduler.block_on(async {
///     let promise = Promise::new(async { Ok(21 * 2) })?;
///     promise.await
/// });
/// assert_eq!(answer.unwrap(), 42);
/// ```
pub struct Promise<T> {
    node: PromiseNode,
    completion: Completion<T>,
    settled: Settled,
}

/// Both observation channels of a promise, written through [`Completion::commit`] only.
struct Completion<T> {
    slot: Rc<OnceCell<Result<T>>>,
    bridge: ConcurrentBridge<T>,
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
            bridge: self.bridge.clone(),
        }
    }
}

impl<T: Clone> Completion<T> {
    fn new() -> Self {
        Self {
            slot: Rc::new(OnceCell::new()),
            bridge: ConcurrentBridge::new(),
        }
    }

    fn commit(&self, node: &PromiseNode, outcome: Result<T>) {
        let state = match &outcome {
            Ok(_) => PromiseState::Succeeded,
            Err(err) => {
                tracing::debug!(promise = %node.name(), error = %err, "Promise failed");
                PromiseState::Failed
            }
        };
        assert!(
            self.slot.set(outcome.clone()).is_ok() && self.bridge.set(outcome).is_ok(),
            "{} was completed twice",
            node.name()
        );
        node.settle(state);
        tracing::debug!(promise = %node.name(), ?state, "Promise settled");
    }
}

#[derive(Debug, Clone, Default)]
enum PromiseParent {
    #[default]
    Implicit,
    Root,
    Explicit(PromiseNode),
}

enum Source<T> {
    Deferred(Computation<T>),
    Value(T),
    Error(anyhow::Error),
}

/// Collects the parts of a promise; [`PromiseBuilder::build`] validates them.
pub struct PromiseBuilder<T> {
    sources: Vec<Source<T>>,
    parent: PromiseParent,
    scheduler: Option<SchedulerHandle>,
    name: Option<String>,
    flags: ConfigFlags,
    config: Option<Arc<PromiseConfig>>,
}

impl<T: Clone + 'static> PromiseBuilder<T> {
    fn new() -> Self {
        Self {
            sources: Vec::new(),
            parent: PromiseParent::Implicit,
            scheduler: None,
            name: None,
            flags: ConfigFlags::default(),
            config: None,
        }
    }

    pub fn computation<F>(mut self, computation: F) -> Self
    where
        F: Future<Output = anyhow::Result<T>> + 'static,
    {
        self.sources.push(Source::Deferred(computation.boxed_local()));
        self
    }

    pub fn value(mut self, value: T) -> Self {
        self.sources.push(Source::Value(value));
        self
    }

    pub fn error(mut self, error: impl Into<anyhow::Error>) -> Self {
        self.sources.push(Source::Error(error.into()));
        self
    }

    /// Use `parent` instead of the ambient current promise.
    pub fn parent(mut self, parent: &PromiseNode) -> Self {
        self.parent = PromiseParent::Explicit(parent.clone());
        self
    }

    /// Build a root promise even if another promise is current.
    pub fn root(mut self) -> Self {
        self.parent = PromiseParent::Root;
        self
    }

    pub fn scheduler(mut self, scheduler: SchedulerHandle) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Use `config` verbatim. Cannot be combined with explicit flags.
    pub fn config(mut self, config: Arc<PromiseConfig>) -> Self {
        self.config = Some(config);
        self
    }

    pub fn flags(mut self, flags: ConfigFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn start_immediately(mut self, value: bool) -> Self {
        self.flags = self.flags.start_immediately(value);
        self
    }

    pub fn wait_for_children(mut self, value: bool) -> Self {
        self.flags = self.flags.wait_for_children(value);
        self
    }

    pub fn inheritable(mut self, value: bool) -> Self {
        self.flags = self.flags.inheritable(value);
        self
    }

    pub fn scheduler_mismatch(mut self, policy: MismatchPolicy) -> Self {
        self.flags = self.flags.scheduler_mismatch(policy);
        self
    }

    pub fn build(self) -> Result<Promise<T>> {
        let PromiseBuilder {
            mut sources,
            parent,
            scheduler,
            name,
            flags,
            config,
        } = self;

        let count = sources.len();
        let source = match (sources.pop(), count) {
            (Some(source), 1) => source,
            _ => {
                return Err(Error::Construction(format!(
                    "expected exactly one of a computation, a value or an error, got {count}"
                )))
            }
        };
        if config.is_some() && !flags.is_empty() {
            return Err(Error::Construction(
                "an explicit config and explicit flags cannot be combined".to_string(),
            ));
        }

        let candidate = match parent {
            PromiseParent::Implicit => ambient::try_current_promise(),
            PromiseParent::Root => None,
            PromiseParent::Explicit(parent) => Some(parent),
        };
        // A lazy parent may be awaited from another scheduler; its children
        // still belong to the parent's.
        let scheduler = scheduler
            .or_else(|| candidate.as_ref().and_then(PromiseNode::scheduler))
            .or_else(SchedulerHandle::current);
        let parent = match candidate {
            Some(candidate) => {
                let policy = flags
                    .scheduler_mismatch
                    .or_else(|| config.as_ref().map(|config| config.scheduler_mismatch()))
                    .unwrap_or_else(|| candidate.config().scheduler_mismatch());
                link_target(candidate, scheduler.as_ref(), policy)?
            }
            None => None,
        };

        let config = match (config, &parent) {
            (Some(config), _) => config,
            (None, Some(parent)) if flags.is_empty() => parent.config().find_inheritable()?,
            (None, Some(parent)) => PromiseConfig::new(
                ConfigParent::Explicit(parent.config().find_inheritable()?),
                flags,
            )?,
            (None, None) => PromiseConfig::new(ConfigParent::Root, flags)?,
        };

        let eager = matches!(source, Source::Deferred(_)) && config.start_immediately();
        if eager {
            scheduler.as_ref().ok_or(Error::NoScheduler)?.ensure_running()?;
        }

        let completion = Completion::new();
        let (routine, ready) = match source {
            Source::Deferred(computation) => (Some(fulfilment(computation, completion.clone())), None),
            Source::Value(value) => (None, Some(Ok(value))),
            Source::Error(err) => (None, Some(Err(Error::from(err)))),
        };
        let node = PromiseNode::new(name, parent.clone(), config, scheduler, routine);
        if let Some(parent) = &parent {
            parent.link_child(&node);
        }
        tracing::debug!(
            promise = %node.name(),
            parent = ?parent.as_ref().map(PromiseNode::name),
            eager,
            "Promise created"
        );

        let promise = Promise::from_parts(node, completion);
        if let Some(outcome) = ready {
            promise.completion.commit(&promise.node, outcome);
        } else if eager {
            promise.start()?;
        }
        Ok(promise)
    }
}

/// Decide whether `candidate` may become the parent of a promise running on
/// `scheduler`.
fn link_target(
    candidate: PromiseNode,
    scheduler: Option<&SchedulerHandle>,
    policy: MismatchPolicy,
) -> Result<Option<PromiseNode>> {
    match (candidate.scheduler_id(), scheduler.map(SchedulerHandle::id)) {
        (Some(parent), Some(child)) if parent != child => match policy {
            MismatchPolicy::Detach => {
                tracing::debug!(
                    parent = %candidate.name(),
                    parent_scheduler = %parent,
                    child_scheduler = %child,
                    "Parent runs on another scheduler, constructing a root promise"
                );
                Ok(None)
            }
            MismatchPolicy::Reject => Err(Error::WrongScheduler { parent, child }),
        },
        _ => Ok(Some(candidate)),
    }
}

fn fulfilment<T: Clone + 'static>(computation: Computation<T>, completion: Completion<T>) -> Routine {
    Box::new(move |node: PromiseNode| {
        async move {
            let outcome = ambient::scope(node.clone(), async {
                let outcome = match AssertUnwindSafe(computation).catch_unwind().await {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(err)) => Err(Error::from(err)),
                    Err(payload) => Err(Error::Panicked(panic_message(payload.as_ref()))),
                };
                node.wait_for_flagged_children().await;
                outcome
            })
            .await;
            completion.commit(&node, outcome);
        }
        .boxed_local()
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl<T: Clone + 'static> Promise<T> {
    pub fn builder() -> PromiseBuilder<T> {
        PromiseBuilder::new()
    }

    pub fn new<F>(computation: F) -> Result<Self>
    where
        F: Future<Output = anyhow::Result<T>> + 'static,
    {
        Self::builder().computation(computation).build()
    }

    pub fn ready(value: T) -> Result<Self> {
        Self::builder().value(value).build()
    }

    pub fn failed(error: impl Into<anyhow::Error>) -> Result<Self> {
        Self::builder().error(error).build()
    }
}

impl<T> Promise<T> {
    fn from_parts(node: PromiseNode, completion: Completion<T>) -> Self {
        let settled = node.settled();
        Self {
            node,
            completion,
            settled,
        }
    }

    pub fn node(&self) -> &PromiseNode {
        &self.node
    }

    pub fn id(&self) -> PromiseId {
        self.node.id()
    }

    pub fn name(&self) -> &str {
        self.node.name()
    }

    pub fn state(&self) -> PromiseState {
        self.node.state()
    }

    pub fn is_done(&self) -> bool {
        self.node.is_done()
    }

    pub fn parent(&self) -> Option<PromiseNode> {
        self.node.parent()
    }

    pub fn config(&self) -> Arc<PromiseConfig> {
        self.node.config()
    }

    pub fn scheduler_id(&self) -> Option<SchedulerId> {
        self.node.scheduler_id()
    }

    pub fn pending_children(&self) -> Result<Vec<PromiseNode>> {
        self.node.pending_children()
    }

    /// Thread-safe handle that observes the same outcome as awaiting.
    pub fn as_concurrent_bridge(&self) -> ConcurrentBridge<T> {
        self.completion.bridge.clone()
    }

    /// Take the fulfilment routine to drive it yourself.
    ///
    /// Fails with [`Error::Reentrancy`] if the routine was already taken,
    /// started, or never existed because the promise was built ready.
    pub fn fulfil(&self) -> Result<Fulfilment> {
        self.node.begin()
    }

    /// Spawn the fulfilment routine on the promise's scheduler.
    pub fn start(&self) -> Result<()> {
        self.node.ensure_idle()?;
        let scheduler = self.node.scheduler().ok_or(Error::NoScheduler)?;
        scheduler.ensure_running()?;
        scheduler.spawn(self.node.begin()?)
    }
}

impl<T: Clone> Promise<T> {
    /// The outcome, if the promise is done.
    pub fn try_outcome(&self) -> Option<Result<T>> {
        self.completion.slot.get().cloned()
    }
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self::from_parts(self.node.clone(), self.completion.clone())
    }
}

impl<T: Clone> Future for Promise<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        ready!(Pin::new(&mut self.settled).poll(cx));
        match self.completion.slot.get() {
            Some(outcome) => Poll::Ready(outcome.clone()),
            None => unreachable!("{} settled without an outcome", self.node.name()),
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise").field("node", &self.node).finish()
    }
}
