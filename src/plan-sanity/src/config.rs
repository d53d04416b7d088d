// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Dynamically updatable configuration of the sanity checks.
//!
//! A type-safe `const` [`Config`] is declared next to where it is used and
//! registered to a [`ConfigSet`], which is plumbed to the checks. Values in
//! a set are shared, so updates applied through [`ConfigUpdates`] are seen
//! by every holder of the set.
//!
//! ```
//! # use mz_plan_sanity::config::{Config, ConfigSet};
//! const FOO: Config<bool> = Config::new("foo", false, "description of foo");
//! let cfg = ConfigSet::default().add(&FOO);
//! assert_eq!(FOO.get(&cfg), false);
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::error;

/// Whether the plan type validator runs as part of the final plan sanity
/// checks.
pub const ENABLE_PLAN_TYPE_VALIDATION: Config<bool> = Config::new(
    "enable_plan_type_validation",
    true,
    "Whether to verify the types of all symbols of a plan before executing it.",
);

/// How deep a plan may be before sanity checks give up on it.
pub const PLAN_SANITY_RECURSION_LIMIT: Config<usize> = Config::new(
    "plan_sanity_recursion_limit",
    crate::stack::RECURSION_LIMIT,
    "The maximum depth of a plan accepted by the plan sanity checks.",
);

/// Adds every config of this crate to `configs`.
pub fn all_plan_sanity_configs(configs: ConfigSet) -> ConfigSet {
    configs
        .add(&ENABLE_PLAN_TYPE_VALIDATION)
        .add(&PLAN_SANITY_RECURSION_LIMIT)
}

/// A handle to a dynamically updatable configuration value of type `T`.
#[derive(Clone, Debug)]
pub struct Config<T: ConfigType> {
    name: &'static str,
    desc: &'static str,
    default: T,
}

impl<T: ConfigType> Config<T> {
    /// Constructs a handle for a config of type `T`.
    pub const fn new(name: &'static str, default: T, desc: &'static str) -> Self {
        Config {
            name,
            default,
            desc,
        }
    }

    /// The name of this config.
    pub fn name(&self) -> &str {
        self.name
    }

    /// The description of this config.
    pub fn desc(&self) -> &str {
        self.desc
    }

    /// The default value of this config.
    pub fn default(&self) -> T {
        self.default.clone()
    }

    /// Returns the latest value of this config within the given set, or the
    /// default if the config was never registered to it.
    pub fn get(&self, set: &ConfigSet) -> T {
        match T::shared(self, set) {
            Some(shared) => T::get(shared),
            None => self.default(),
        }
    }
}

/// A type usable as a [`Config`].
pub trait ConfigType: Clone + Sized {
    /// A value of this type, sharable between updaters and readers.
    type Shared;

    /// Extracts the sharable value for a config of this type from a set.
    fn shared<'a>(config: &Config<Self>, set: &'a ConfigSet) -> Option<&'a Arc<Self::Shared>>;

    /// Converts this type to its type-erased enum equivalent.
    fn to_val(val: &Self) -> ConfigVal;

    /// Retrieves the current value from its sharable form.
    fn get(x: &Self::Shared) -> Self;

    /// Updates the sharable value to `val`.
    fn set(x: &Self::Shared, val: Self);
}

impl ConfigType for bool {
    type Shared = AtomicBool;

    fn shared<'a>(config: &Config<Self>, set: &'a ConfigSet) -> Option<&'a Arc<Self::Shared>> {
        match set.configs.get(config.name)?.val() {
            ConfigVal::Bool(x) => Some(x),
            _ => None,
        }
    }
    fn to_val(val: &Self) -> ConfigVal {
        ConfigVal::Bool(Arc::new((*val).into()))
    }
    fn get(x: &Self::Shared) -> Self {
        x.load(Ordering::SeqCst)
    }
    fn set(x: &Self::Shared, val: Self) {
        x.store(val, Ordering::SeqCst);
    }
}

impl ConfigType for usize {
    type Shared = AtomicUsize;

    fn shared<'a>(config: &Config<Self>, set: &'a ConfigSet) -> Option<&'a Arc<Self::Shared>> {
        match set.configs.get(config.name)?.val() {
            ConfigVal::Usize(x) => Some(x),
            _ => None,
        }
    }
    fn to_val(val: &Self) -> ConfigVal {
        ConfigVal::Usize(Arc::new((*val).into()))
    }
    fn get(x: &Self::Shared) -> Self {
        x.load(Ordering::SeqCst)
    }
    fn set(x: &Self::Shared, val: Self) {
        x.store(val, Ordering::SeqCst);
    }
}

/// A set of [`Config`]s with values independent of other sets, even ones
/// containing the same configs.
#[derive(Clone, Debug, Default)]
pub struct ConfigSet {
    configs: BTreeMap<String, ConfigEntry>,
}

impl ConfigSet {
    /// Adds the given config to this set.
    ///
    /// Panics if a config with the same name was added before.
    pub fn add<T: ConfigType>(mut self, config: &Config<T>) -> Self {
        let entry = ConfigEntry {
            name: config.name,
            desc: config.desc,
            default: T::to_val(&config.default),
            val: T::to_val(&config.default),
        };
        if let Some(prev) = self.configs.insert(config.name.to_owned(), entry) {
            panic!("{} registered twice", prev.name);
        }
        self
    }

    /// Returns the configs currently registered to this set.
    pub fn entries(&self) -> impl Iterator<Item = &ConfigEntry> {
        self.configs.values()
    }
}

/// An entry for a config in a [`ConfigSet`].
#[derive(Clone, Debug)]
pub struct ConfigEntry {
    name: &'static str,
    desc: &'static str,
    default: ConfigVal,
    val: ConfigVal,
}

impl ConfigEntry {
    /// The name of this config.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The description of this config.
    pub fn desc(&self) -> &'static str {
        self.desc
    }

    /// The default value of this config. Never updated.
    pub fn default(&self) -> &ConfigVal {
        &self.default
    }

    /// The shared value of this config in the set.
    pub fn val(&self) -> &ConfigVal {
        &self.val
    }
}

/// A type-erased [`ConfigType::Shared`].
#[derive(Clone, Debug)]
pub enum ConfigVal {
    /// A `bool` shared value.
    Bool(Arc<AtomicBool>),
    /// A `usize` shared value.
    Usize(Arc<AtomicUsize>),
}

/// A plain value of some [`ConfigType`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigValue {
    #[allow(missing_docs)]
    Bool(bool),
    #[allow(missing_docs)]
    Usize(usize),
}

/// A batch of new config values, applied to a [`ConfigSet`] at once.
#[derive(Clone, Debug, Default)]
pub struct ConfigUpdates {
    updates: BTreeMap<String, ConfigValue>,
}

impl ConfigUpdates {
    /// Sets `config` to `val`, replacing any previously added value.
    pub fn add<T: ConfigType + Into<ConfigValue>>(&mut self, config: &Config<T>, val: T) {
        self.updates.insert(config.name.to_owned(), val.into());
    }

    /// Sets the config named `name` to `val`.
    pub fn add_dynamic(&mut self, name: &str, val: ConfigValue) {
        self.updates.insert(name.to_owned(), val);
    }

    /// Applies these updates to `set`.
    ///
    /// Updates of configs unknown to `set`, or of the wrong type, are logged
    /// and skipped.
    pub fn apply(&self, set: &ConfigSet) {
        for (name, val) in self.updates.iter() {
            let Some(config) = set.configs.get(name) else {
                error!("config update {} {:?} not known to set", name, val);
                continue;
            };
            match (val, &config.val) {
                (ConfigValue::Bool(src), ConfigVal::Bool(dst)) => bool::set(dst, *src),
                (ConfigValue::Usize(src), ConfigVal::Usize(dst)) => usize::set(dst, *src),
                (src, dst) => error!(
                    "config update {} type mismatch: {:?} vs {:?}",
                    name, src, dst
                ),
            }
        }
    }
}

impl From<bool> for ConfigValue {
    fn from(val: bool) -> ConfigValue {
        ConfigValue::Bool(val)
    }
}

impl From<usize> for ConfigValue {
    fn from(val: usize) -> ConfigValue {
        ConfigValue::Usize(val)
    }
}
