//! Compatibility verdicts
//!
//! A [`CompatibilityVerdict`] is produced once per validation and never
//! mutated. When incompatible it lists every detected [`Violation`], so a
//! user-facing report can explain precisely why a restart is required.

use crate::hash::CodeDigest;
use crate::identity::UnitIdentity;
use crate::signature::Visibility;
use crate::unit::CodeUnit;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Binary compatibility decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Compatibility {
    /// Safe for in-place redefinition
    Compatible,
    /// Requires a restart
    Incompatible,
}

/// What a compatible change touches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeScope {
    /// Identical bytes
    Unchanged,
    /// Only method bodies changed
    BodyOnly {
        /// Methods whose body digest changed
        changed_methods: Vec<String>,
    },
    /// Private methods were added or removed (policy permitting)
    PrivateMembers {
        /// Added private methods
        added: Vec<String>,
        /// Removed private methods
        removed: Vec<String>,
        /// Methods whose body digest changed
        changed_methods: Vec<String>,
    },
    /// Incompatible change
    Structural,
}

impl ChangeScope {
    /// Whether the runtime's automatic dispatch update covers the change
    #[inline]
    #[must_use]
    pub fn is_body_only(&self) -> bool {
        matches!(self, Self::Unchanged | Self::BodyOnly { .. })
    }
}

/// A single structural incompatibility
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "violation", rename_all = "snake_case")]
pub enum Violation {
    /// Old and new snapshots name different units
    #[error("unit identity changed from {old} to {new}")]
    IdentityMismatch { old: UnitIdentity, new: UnitIdentity },

    /// Supertype changed
    #[error("supertype changed from {} to {}", display_opt(.old), display_opt(.new))]
    SupertypeChanged {
        old: Option<String>,
        new: Option<String>,
    },

    /// Interface added to the implemented set
    #[error("interface {name} added")]
    InterfaceAdded { name: String },

    /// Interface removed from the implemented set
    #[error("interface {name} removed")]
    InterfaceRemoved { name: String },

    /// Field added (schema change)
    #[error("field {name}: {type_name} added (schema change)")]
    FieldAdded {
        name: String,
        type_name: String,
        visibility: Visibility,
    },

    /// Field removed (schema change)
    #[error("field {name}: {type_name} removed (schema change)")]
    FieldRemoved {
        name: String,
        type_name: String,
        visibility: Visibility,
    },

    /// Field type changed
    #[error("field {name} changed type from {old} to {new}")]
    FieldTypeChanged {
        name: String,
        old: String,
        new: String,
    },

    /// Field visibility or static-ness changed
    #[error("field {name} modifiers changed")]
    FieldModifiersChanged { name: String },

    /// Method added
    #[error("method {signature} added")]
    MethodAdded {
        signature: String,
        visibility: Visibility,
    },

    /// Method removed
    #[error("method {signature} removed")]
    MethodRemoved {
        signature: String,
        visibility: Visibility,
    },

    /// Method return type changed
    #[error("method {signature} changed return type from {old} to {new}")]
    MethodReturnTypeChanged {
        signature: String,
        old: String,
        new: String,
    },

    /// Method visibility or static-ness changed
    #[error("method {signature} modifiers changed")]
    MethodModifiersChanged { signature: String },
}

fn display_opt(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("<none>")
}

impl Violation {
    /// Whether the violation changes the per-instance layout
    #[inline]
    #[must_use]
    pub fn is_schema_change(&self) -> bool {
        matches!(
            self,
            Self::FieldAdded { .. }
                | Self::FieldRemoved { .. }
                | Self::FieldTypeChanged { .. }
                | Self::FieldModifiersChanged { .. }
        )
    }

    /// Whether the violation changes the type hierarchy
    #[inline]
    #[must_use]
    pub fn is_hierarchy_change(&self) -> bool {
        matches!(
            self,
            Self::SupertypeChanged { .. } | Self::InterfaceAdded { .. } | Self::InterfaceRemoved { .. }
        )
    }
}

/// Outcome of one validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompatibilityVerdict {
    identity: UnitIdentity,
    old_digest: CodeDigest,
    new_digest: CodeDigest,
    compatibility: Compatibility,
    scope: ChangeScope,
    violations: Vec<Violation>,
}

impl CompatibilityVerdict {
    pub(crate) fn compatible(old: &CodeUnit, new: &CodeUnit, scope: ChangeScope) -> Self {
        Self {
            identity: old.identity().clone(),
            old_digest: old.digest(),
            new_digest: new.digest(),
            compatibility: Compatibility::Compatible,
            scope,
            violations: Vec::new(),
        }
    }

    pub(crate) fn incompatible(old: &CodeUnit, new: &CodeUnit, violations: Vec<Violation>) -> Self {
        Self {
            identity: old.identity().clone(),
            old_digest: old.digest(),
            new_digest: new.digest(),
            compatibility: Compatibility::Incompatible,
            scope: ChangeScope::Structural,
            violations,
        }
    }

    /// Unit the verdict is about (the old snapshot's identity)
    #[inline]
    #[must_use]
    pub fn identity(&self) -> &UnitIdentity {
        &self.identity
    }

    /// Decision
    #[inline]
    #[must_use]
    pub fn compatibility(&self) -> Compatibility {
        self.compatibility
    }

    /// Whether the change is safe for in-place redefinition
    #[inline]
    #[must_use]
    pub fn is_compatible(&self) -> bool {
        self.compatibility == Compatibility::Compatible
    }

    /// What the change touches
    #[inline]
    #[must_use]
    pub fn scope(&self) -> &ChangeScope {
        &self.scope
    }

    /// Every detected violation (empty when compatible)
    #[inline]
    #[must_use]
    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// Digest of the old snapshot
    #[inline]
    #[must_use]
    pub fn old_digest(&self) -> CodeDigest {
        self.old_digest
    }

    /// Digest of the new snapshot
    #[inline]
    #[must_use]
    pub fn new_digest(&self) -> CodeDigest {
        self.new_digest
    }

    /// Human-readable explanation
    #[must_use]
    pub fn summary(&self) -> String {
        if self.is_compatible() {
            return match &self.scope {
                ChangeScope::Unchanged => format!("{}: no changes", self.identity),
                ChangeScope::BodyOnly { changed_methods } => format!(
                    "{}: compatible, method body changes only ({} method(s))",
                    self.identity,
                    changed_methods.len()
                ),
                ChangeScope::PrivateMembers { added, removed, .. } => format!(
                    "{}: compatible, {} private method(s) added, {} removed",
                    self.identity,
                    added.len(),
                    removed.len()
                ),
                ChangeScope::Structural => format!("{}: compatible", self.identity),
            };
        }
        let reasons: Vec<String> = self.violations.iter().map(ToString::to_string).collect();
        format!(
            "{}: restart required, {} incompatible change(s): {}",
            self.identity,
            reasons.len(),
            reasons.join("; ")
        )
    }
}

/// Proof that an (old, new) pair passed validation
///
/// Only [`CompatibilityValidator::check`](crate::CompatibilityValidator::check)
/// creates one, so a redefinition can never be issued for an incompatible pair.
#[derive(Debug, Clone)]
pub struct ValidatedChange {
    old: Arc<CodeUnit>,
    new: Arc<CodeUnit>,
    verdict: CompatibilityVerdict,
}

impl ValidatedChange {
    pub(crate) fn new(old: Arc<CodeUnit>, new: Arc<CodeUnit>, verdict: CompatibilityVerdict) -> Self {
        debug_assert!(verdict.is_compatible());
        Self { old, new, verdict }
    }

    /// Unit being redefined
    #[inline]
    #[must_use]
    pub fn identity(&self) -> &UnitIdentity {
        self.old.identity()
    }

    /// Currently loaded snapshot
    #[inline]
    #[must_use]
    pub fn old(&self) -> &Arc<CodeUnit> {
        &self.old
    }

    /// Replacement snapshot
    #[inline]
    #[must_use]
    pub fn new_unit(&self) -> &Arc<CodeUnit> {
        &self.new
    }

    /// The compatible verdict
    #[inline]
    #[must_use]
    pub fn verdict(&self) -> &CompatibilityVerdict {
        &self.verdict
    }

    /// Change scope
    #[inline]
    #[must_use]
    pub fn scope(&self) -> &ChangeScope {
        self.verdict.scope()
    }
}
