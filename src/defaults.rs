//! Process-wide defaults for root configs.
//!
//! Values come from built-ins overridden by `PROMISING_DEFAULT_*` environment
//! variables, e.g. `PROMISING_DEFAULT_START_IMMEDIATELY=false` or
//! `PROMISING_DEFAULT_SCHEDULER_MISMATCH=reject`.

use crate::error::{Error, Result};
use config::{Config, Environment};
use once_cell::sync::Lazy;
use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;
use std::fmt;

pub const ENV_PREFIX: &str = "PROMISING_DEFAULT";

/// What to do when a resolved parent runs on another scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MismatchPolicy {
    /// Construct the promise as a root.
    #[default]
    Detach,
    /// Fail construction with [`Error::WrongScheduler`].
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Defaults {
    #[serde(deserialize_with = "strict_bool")]
    pub start_immediately: bool,
    #[serde(deserialize_with = "strict_bool")]
    pub wait_for_children: bool,
    #[serde(deserialize_with = "strict_bool")]
    pub config_inheritable: bool,
    pub scheduler_mismatch: MismatchPolicy,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            start_immediately: true,
            wait_for_children: false,
            config_inheritable: true,
            scheduler_mismatch: MismatchPolicy::Detach,
        }
    }
}

/// Only a real bool or the words `true`/`false` (any case). The `config`
/// crate alone would also take `yes`, `on`, `1` and friends.
fn strict_bool<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    struct StrictBool;

    impl<'de> Visitor<'de> for StrictBool {
        type Value = bool;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("`true` or `false`")
        }

        fn visit_bool<E: de::Error>(self, value: bool) -> std::result::Result<bool, E> {
            Ok(value)
        }

        fn visit_str<E: de::Error>(self, value: &str) -> std::result::Result<bool, E> {
            if value.eq_ignore_ascii_case("true") {
                Ok(true)
            } else if value.eq_ignore_ascii_case("false") {
                Ok(false)
            } else {
                Err(E::invalid_value(de::Unexpected::Str(value), &self))
            }
        }
    }

    deserializer.deserialize_any(StrictBool)
}

static GLOBAL: Lazy<Defaults> = Lazy::new(|| match Defaults::from_env() {
    Ok(defaults) => defaults,
    Err(err) => {
        tracing::warn!(error = %err, "Falling back to built-in promising defaults");
        Defaults::default()
    }
});

impl Defaults {
    /// Defaults read once per process.
    pub fn global() -> &'static Defaults {
        &GLOBAL
    }

    pub fn from_env() -> Result<Self> {
        Self::load(Environment::with_prefix(ENV_PREFIX))
    }

    /// Layer an environment source over the built-ins.
    pub fn load(environment: Environment) -> Result<Self> {
        let builtin = Defaults::default();
        let defaults: Defaults = Config::builder()
            .set_default("start_immediately", builtin.start_immediately)?
            .set_default("wait_for_children", builtin.wait_for_children)?
            .set_default("config_inheritable", builtin.config_inheritable)?
            .set_default("scheduler_mismatch", "detach")?
            .add_source(environment.try_parsing(true))
            .build()?
            .try_deserialize()?;

        if !defaults.config_inheritable {
            return Err(Error::Defaults(
                "config_inheritable cannot be false: root configs are always inheritable".into(),
            ));
        }
        Ok(defaults)
    }
}
