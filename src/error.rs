//! Error types for promises, configs and bridges.

use crate::scheduler::SchedulerId;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong around a promise.
///
/// Construction-time variants are returned synchronously and leave nothing
/// behind. [`Error::Failed`] and [`Error::Panicked`] are terminal outcomes of a
/// computation and only reach code that awaits the promise or reads its
/// bridge. The enum is `Clone` so every observer gets the same outcome.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("Invalid promise construction: {0}")]
    Construction(String),

    #[error("Invalid promise config: {0}")]
    Config(String),

    #[error("Invalid promising defaults: {0}")]
    Defaults(String),

    #[error("Logging setup failed: {0}")]
    Logging(String),

    #[error("No promise is currently running on this strand")]
    NoCurrentPromise,

    #[error("Promise config has no parent")]
    NoParent,

    #[error("No inheritable ancestor config found after {steps} steps")]
    NoInheritableAncestor { steps: usize },

    #[error("Fulfilment routine of {name} was already started")]
    Reentrancy { name: String },

    #[error("Timed out after {0:?} waiting for the bridge")]
    BridgeTimeout(Duration),

    #[error("Parent runs on scheduler {parent} but child runs on scheduler {child}")]
    WrongScheduler {
        parent: SchedulerId,
        child: SchedulerId,
    },

    #[error("No scheduler available to start the promise")]
    NoScheduler,

    #[error("Scheduler has shut down")]
    SchedulerShutdown,

    #[error("Children set kept changing during {attempts} snapshot attempts")]
    SnapshotExhausted { attempts: usize },

    #[error("{0}")]
    Failed(Arc<anyhow::Error>),

    #[error("Computation panicked: {0}")]
    Panicked(String),
}

impl Error {
    /// The captured computation error, if this is a failed outcome.
    pub fn failure(&self) -> Option<&anyhow::Error> {
        match self {
            Error::Failed(err) => Some(err),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Failed(Arc::new(err))
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Defaults(err.to_string())
    }
}
