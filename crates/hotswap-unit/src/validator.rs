//! Structural compatibility validation
//!
//! Decides whether replacing one code-unit snapshot with another is safe for
//! in-place redefinition. The policy is conservative: anything the host runtime
//! might refuse, or that would change the per-instance layout, is rejected.
//!
//! # Rules
//! - Method body changes only: compatible.
//! - Any field added/removed/retyped, supertype or interface change, method
//!   signature change (name, parameters, return type, modifiers): incompatible.
//! - Private method additions/removals: compatible only when
//!   [`ValidationPolicy::allow_private_method_changes`] is set.
//!
//! Every violation is reported, not just the first.

use crate::signature::{MethodKey, MethodSig, StructuralSignature};
use crate::unit::CodeUnit;
use crate::verdict::{ChangeScope, CompatibilityVerdict, ValidatedChange, Violation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Validation policy knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationPolicy {
    /// Accept added/removed private methods
    pub allow_private_method_changes: bool,
}

impl ValidationPolicy {
    /// Conservative default policy
    #[inline]
    #[must_use]
    pub fn conservative() -> Self {
        Self::default()
    }

    /// Permit private method additions and removals
    #[inline]
    #[must_use]
    pub fn with_private_method_changes(mut self, allow: bool) -> Self {
        self.allow_private_method_changes = allow;
        self
    }
}

/// Compatibility validator
///
/// `validate` is a pure function of its inputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompatibilityValidator {
    policy: ValidationPolicy,
}

/// Rejected (old, new) pair, returned by [`CompatibilityValidator::check`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", .verdict.summary())]
pub struct Incompatible {
    /// Incompatible verdict with every violation
    pub verdict: CompatibilityVerdict,
}

impl CompatibilityValidator {
    /// Create validator with a policy
    #[inline]
    #[must_use]
    pub fn new(policy: ValidationPolicy) -> Self {
        Self { policy }
    }

    /// Active policy
    #[inline]
    #[must_use]
    pub fn policy(&self) -> ValidationPolicy {
        self.policy
    }

    /// Compare two snapshots and produce a verdict
    #[must_use]
    pub fn validate(&self, old: &CodeUnit, new: &CodeUnit) -> CompatibilityVerdict {
        let mut violations = Vec::new();

        if old.identity() != new.identity() {
            violations.push(Violation::IdentityMismatch {
                old: old.identity().clone(),
                new: new.identity().clone(),
            });
        }

        let old_sig = old.signature();
        let new_sig = new.signature();
        compare_hierarchy(old_sig, new_sig, &mut violations);
        compare_fields(old_sig, new_sig, &mut violations);
        let methods = self.compare_methods(old_sig, new_sig, &mut violations);

        if !violations.is_empty() {
            return CompatibilityVerdict::incompatible(old, new, violations);
        }

        let scope = if old.digest() == new.digest() {
            ChangeScope::Unchanged
        } else if methods.private_added.is_empty() && methods.private_removed.is_empty() {
            ChangeScope::BodyOnly {
                changed_methods: methods.changed_bodies,
            }
        } else {
            ChangeScope::PrivateMembers {
                added: methods.private_added,
                removed: methods.private_removed,
                changed_methods: methods.changed_bodies,
            }
        };
        CompatibilityVerdict::compatible(old, new, scope)
    }

    /// Validate and, when compatible, issue the [`ValidatedChange`] proof
    ///
    /// # Errors
    /// Returns [`Incompatible`] carrying the full verdict otherwise.
    pub fn check(
        &self,
        old: Arc<CodeUnit>,
        new: Arc<CodeUnit>,
    ) -> Result<ValidatedChange, Incompatible> {
        let verdict = self.validate(&old, &new);
        if verdict.is_compatible() {
            Ok(ValidatedChange::new(old, new, verdict))
        } else {
            Err(Incompatible { verdict })
        }
    }

    fn compare_methods(
        &self,
        old: &StructuralSignature,
        new: &StructuralSignature,
        violations: &mut Vec<Violation>,
    ) -> MethodDiff {
        let mut diff = MethodDiff::default();

        for (key, old_method) in &old.methods {
            match new.methods.get(key) {
                None => {
                    if self.private_change_allowed(old_method) {
                        diff.private_removed.push(key.to_string());
                    } else {
                        violations.push(Violation::MethodRemoved {
                            signature: key.to_string(),
                            visibility: old_method.visibility,
                        });
                    }
                }
                Some(new_method) => {
                    compare_method(key, old_method, new_method, violations);
                    if old_method.body_digest != new_method.body_digest {
                        diff.changed_bodies.push(key.to_string());
                    }
                }
            }
        }

        for (key, new_method) in &new.methods {
            if old.methods.contains_key(key) {
                continue;
            }
            if self.private_change_allowed(new_method) {
                diff.private_added.push(key.to_string());
            } else {
                violations.push(Violation::MethodAdded {
                    signature: key.to_string(),
                    visibility: new_method.visibility,
                });
            }
        }

        diff
    }

    fn private_change_allowed(&self, method: &MethodSig) -> bool {
        self.policy.allow_private_method_changes && !method.visibility.is_externally_visible()
    }
}

#[derive(Debug, Default)]
struct MethodDiff {
    changed_bodies: Vec<String>,
    private_added: Vec<String>,
    private_removed: Vec<String>,
}

fn compare_hierarchy(
    old: &StructuralSignature,
    new: &StructuralSignature,
    violations: &mut Vec<Violation>,
) {
    if old.supertype != new.supertype {
        violations.push(Violation::SupertypeChanged {
            old: old.supertype.clone(),
            new: new.supertype.clone(),
        });
    }
    for name in new.interfaces.difference(&old.interfaces) {
        violations.push(Violation::InterfaceAdded { name: name.clone() });
    }
    for name in old.interfaces.difference(&new.interfaces) {
        violations.push(Violation::InterfaceRemoved { name: name.clone() });
    }
}

fn compare_fields(
    old: &StructuralSignature,
    new: &StructuralSignature,
    violations: &mut Vec<Violation>,
) {
    for (name, old_field) in &old.fields {
        match new.fields.get(name) {
            None => violations.push(Violation::FieldRemoved {
                name: name.clone(),
                type_name: old_field.type_name.clone(),
                visibility: old_field.visibility,
            }),
            Some(new_field) => {
                if old_field.type_name != new_field.type_name {
                    violations.push(Violation::FieldTypeChanged {
                        name: name.clone(),
                        old: old_field.type_name.clone(),
                        new: new_field.type_name.clone(),
                    });
                }
                if old_field.visibility != new_field.visibility
                    || old_field.is_static != new_field.is_static
                {
                    violations.push(Violation::FieldModifiersChanged { name: name.clone() });
                }
            }
        }
    }
    for (name, new_field) in &new.fields {
        if !old.fields.contains_key(name) {
            violations.push(Violation::FieldAdded {
                name: name.clone(),
                type_name: new_field.type_name.clone(),
                visibility: new_field.visibility,
            });
        }
    }
}

fn compare_method(
    key: &MethodKey,
    old: &MethodSig,
    new: &MethodSig,
    violations: &mut Vec<Violation>,
) {
    if old.return_type != new.return_type {
        violations.push(Violation::MethodReturnTypeChanged {
            signature: key.to_string(),
            old: old.return_type.clone(),
            new: new.return_type.clone(),
        });
    }
    if old.visibility != new.visibility || old.is_static != new.is_static {
        violations.push(Violation::MethodModifiersChanged {
            signature: key.to_string(),
        });
    }
}
