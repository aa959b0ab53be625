//! Promise configs and their inheritance chain.
//!
//! A config resolves every flag once, at construction. Flags that were not
//! given explicitly are copied by value from the nearest inheritable
//! ancestor, so a config never changes after it is built and can be shared
//! freely through an [`Arc`].

use crate::ambient;
use crate::defaults::{Defaults, MismatchPolicy};
use crate::error::{Error, Result};
use std::sync::Arc;

/// Upper bound on parent hops when looking for an inheritable config.
pub const MAX_ANCESTRY_STEPS: usize = 64;

/// Explicitly requested flags. `None` means "inherit or default".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigFlags {
    pub start_immediately: Option<bool>,
    pub wait_for_children: Option<bool>,
    pub inheritable: Option<bool>,
    pub scheduler_mismatch: Option<MismatchPolicy>,
}

impl ConfigFlags {
    pub fn is_empty(&self) -> bool {
        *self == ConfigFlags::default()
    }

    pub fn start_immediately(mut self, value: bool) -> Self {
        self.start_immediately = Some(value);
        self
    }

    pub fn wait_for_children(mut self, value: bool) -> Self {
        self.wait_for_children = Some(value);
        self
    }

    pub fn inheritable(mut self, value: bool) -> Self {
        self.inheritable = Some(value);
        self
    }

    pub fn scheduler_mismatch(mut self, policy: MismatchPolicy) -> Self {
        self.scheduler_mismatch = Some(policy);
        self
    }
}

/// Where a new config takes its parent from.
#[derive(Debug, Clone, Default)]
pub enum ConfigParent {
    /// The config of the ambient current promise, or none.
    #[default]
    Implicit,
    Root,
    Explicit(Arc<PromiseConfig>),
}

#[derive(Debug)]
pub struct PromiseConfig {
    parent: Option<Arc<PromiseConfig>>,
    /// Nearest inheritable ancestor; `None` only for roots.
    inherited_from: Option<Arc<PromiseConfig>>,
    start_immediately: bool,
    wait_for_children: bool,
    inheritable: bool,
    scheduler_mismatch: MismatchPolicy,
}

impl PromiseConfig {
    pub fn new(parent: ConfigParent, flags: ConfigFlags) -> Result<Arc<Self>> {
        let parent = match parent {
            ConfigParent::Implicit => ambient::try_current_promise().map(|promise| promise.config()),
            ConfigParent::Root => None,
            ConfigParent::Explicit(parent) => Some(parent),
        };
        match parent {
            Some(parent) => Self::child_of(parent, flags),
            None => Self::root_from(Defaults::global(), flags),
        }
    }

    /// A root config using the process-wide defaults for unset flags.
    pub fn root(flags: ConfigFlags) -> Result<Arc<Self>> {
        Self::root_from(Defaults::global(), flags)
    }

    pub fn root_from(defaults: &Defaults, flags: ConfigFlags) -> Result<Arc<Self>> {
        if flags.inheritable == Some(false) {
            return Err(Error::Config(
                "a root config is always inheritable".to_string(),
            ));
        }
        Ok(Arc::new(Self {
            parent: None,
            inherited_from: None,
            start_immediately: flags.start_immediately.unwrap_or(defaults.start_immediately),
            wait_for_children: flags.wait_for_children.unwrap_or(defaults.wait_for_children),
            inheritable: true,
            scheduler_mismatch: flags.scheduler_mismatch.unwrap_or(defaults.scheduler_mismatch),
        }))
    }

    fn child_of(parent: Arc<Self>, flags: ConfigFlags) -> Result<Arc<Self>> {
        let source = parent.find_inheritable()?;
        Ok(Arc::new(Self {
            start_immediately: flags.start_immediately.unwrap_or(source.start_immediately),
            wait_for_children: flags.wait_for_children.unwrap_or(source.wait_for_children),
            inheritable: flags.inheritable.unwrap_or(source.inheritable),
            scheduler_mismatch: flags.scheduler_mismatch.unwrap_or(source.scheduler_mismatch),
            parent: Some(parent),
            inherited_from: Some(source),
        }))
    }

    /// The nearest inheritable config, starting with this one.
    ///
    /// Roots are always inheritable so the walk ends there; it is bounded by
    /// [`MAX_ANCESTRY_STEPS`] regardless.
    pub fn find_inheritable(self: &Arc<Self>) -> Result<Arc<Self>> {
        let mut cursor = Arc::clone(self);
        for _ in 0..MAX_ANCESTRY_STEPS {
            if cursor.inheritable {
                return Ok(cursor);
            }
            cursor = match cursor.inherited_from.as_ref().or(cursor.parent.as_ref()) {
                Some(next) => Arc::clone(next),
                None => break,
            };
        }
        Err(Error::NoInheritableAncestor {
            steps: MAX_ANCESTRY_STEPS,
        })
    }

    pub fn parent(&self) -> Option<&Arc<Self>> {
        self.parent.as_ref()
    }

    pub fn require_parent(&self) -> Result<&Arc<Self>> {
        self.parent.as_ref().ok_or(Error::NoParent)
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn start_immediately(&self) -> bool {
        self.start_immediately
    }

    pub fn wait_for_children(&self) -> bool {
        self.wait_for_children
    }

    pub fn is_inheritable(&self) -> bool {
        self.inheritable
    }

    pub fn scheduler_mismatch(&self) -> MismatchPolicy {
        self.scheduler_mismatch
    }

    /// Every flag as resolved at construction.
    pub fn resolved_flags(&self) -> ConfigFlags {
        ConfigFlags {
            start_immediately: Some(self.start_immediately),
            wait_for_children: Some(self.wait_for_children),
            inheritable: Some(self.inheritable),
            scheduler_mismatch: Some(self.scheduler_mismatch),
        }
    }
}
