//! Hierarchical, context-aware promises for cooperative async execution.
//!
//! Every [`Promise`] knows its parent and its children. A promise built while
//! another promise's fulfilment routine is running becomes that promise's
//! child and inherits its [`PromiseConfig`]. Promises run on a
//! [`Scheduler`], are awaited cooperatively, and expose a
//! [`ConcurrentBridge`] that OS threads can block on.
//!
//! ```
//! use promising::{current_promise, Promise, Scheduler};
//!
//! let mut scheduler = Scheduler::new();
//! let linked = scheduler.block_on(async {
//!     let parent = Promise::builder()
//!         .wait_for_children(true)
//!         .computation(async {
//!             let me = current_promise()?;
//!             let child = Promise::new(async { Ok(1) })?;
//!             Ok(child.parent() == Some(me))
//!         })
//!         .build()?;
//!     parent.await
//! });
//! assert!(linked.unwrap());
//! ```
//!
//! Cancellation of whole trees and escalation of child failures to the
//! parent are not provided: a parent's outcome is its own computation's.

pub mod ambient;
pub mod bridge;
pub mod config;
pub mod defaults;
pub mod error;
pub mod logging;
pub mod node;
pub mod promise;
pub mod scheduler;

pub use ambient::{current_promise, try_current_promise};
pub use bridge::ConcurrentBridge;
pub use config::{ConfigFlags, ConfigParent, PromiseConfig};
pub use defaults::{Defaults, MismatchPolicy};
pub use error::{Error, Result};
pub use node::{Fulfilment, PromiseId, PromiseNode, PromiseState, Settled};
pub use promise::{Computation, Promise, PromiseBuilder};
pub use scheduler::{Scheduler, SchedulerHandle, SchedulerId};
