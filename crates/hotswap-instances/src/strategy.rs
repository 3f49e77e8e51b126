//! Update strategy selection
//!
//! The strategy set is closed ([`UpdateStrategy`]); which one applies to a unit
//! is a policy decision made by [`StrategySelector`].
//!
//! # Selection order
//! 1. Explicit per-identity override from [`MigrationConfig`]
//! 2. External refresher registered → `ExternalFactory`
//! 3. Post-update hook registered → `StatePreserving`
//! 4. Otherwise `NoOp` (the runtime already switched dispatch to the new code)

use crate::hooks::MigrationHooks;
use hotswap_unit::UnitIdentity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// How live instances are brought up to date after a redefinition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStrategy {
    /// Nothing to do: mark every instance updated
    NoOp,
    /// Invoke the post-update hook on each instance
    StatePreserving,
    /// Delegate to the owning container's refresher
    ExternalFactory,
}

impl fmt::Display for UpdateStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NoOp => "no_op",
            Self::StatePreserving => "state_preserving",
            Self::ExternalFactory => "external_factory",
        })
    }
}

/// Migration settings
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Forced strategy per unit identity
    pub strategy_overrides: BTreeMap<UnitIdentity, UpdateStrategy>,
}

impl MigrationConfig {
    /// Force a strategy for one identity
    #[must_use]
    pub fn with_override(mut self, identity: UnitIdentity, strategy: UpdateStrategy) -> Self {
        self.strategy_overrides.insert(identity, strategy);
        self
    }
}

/// Picks the update strategy for a unit
#[derive(Debug, Clone, Default)]
pub struct StrategySelector {
    overrides: BTreeMap<UnitIdentity, UpdateStrategy>,
}

impl StrategySelector {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Selector honoring the overrides in `config`
    #[must_use]
    pub fn from_config(config: &MigrationConfig) -> Self {
        Self {
            overrides: config.strategy_overrides.clone(),
        }
    }

    /// Select the strategy for `identity` given the registered callbacks
    #[must_use]
    pub fn select(&self, identity: &UnitIdentity, hooks: &MigrationHooks) -> UpdateStrategy {
        if let Some(strategy) = self.overrides.get(identity) {
            return *strategy;
        }
        if hooks.has_refresher(identity) {
            UpdateStrategy::ExternalFactory
        } else if hooks.has_post_update(identity) {
            UpdateStrategy::StatePreserving
        } else {
            UpdateStrategy::NoOp
        }
    }
}
