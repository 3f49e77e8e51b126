//! Hotswap Code Units
//!
//! Code-unit snapshots, structural compatibility validation and redefinition
//! attempt records.
//!
//! # Core Concepts
//!
//! - [`CodeUnit`]: immutable snapshot of a compiled unit (identity, signature, bytes)
//! - [`CompatibilityValidator`]: pure old-vs-new structural comparison
//! - [`CompatibilityVerdict`]: binary decision plus every detected [`Violation`]
//! - [`ValidatedChange`]: proof that a pair passed validation
//! - [`RedefinitionAttempt`]: immutable record of one runtime redefinition call
//!
//! # Example
//!
//! ```rust
//! use hotswap_unit::{CodeUnit, CompatibilityValidator, MethodSig, StructuralSignature, UnitIdentity};
//! use std::sync::Arc;
//!
//! let id = UnitIdentity::new("com.acme.Greeter").unwrap();
//! let v1 = StructuralSignature::builder()
//!     .method(MethodSig::new("greet", ["java.lang.String"], "void").with_body(b"hello"))
//!     .build();
//! let v2 = StructuralSignature::builder()
//!     .method(MethodSig::new("greet", ["java.lang.String"], "void").with_body(b"hi"))
//!     .build();
//!
//! let old = Arc::new(CodeUnit::new(id.clone(), v1, b"v1".to_vec()));
//! let new = Arc::new(CodeUnit::new(id, v2, b"v2".to_vec()));
//!
//! let change = CompatibilityValidator::default().check(old, new).unwrap();
//! assert!(change.scope().is_body_only());
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod attempt;
mod hash;
mod identity;
mod signature;
mod unit;
mod validator;
mod verdict;

pub use attempt::{
    AttemptId, AttemptOutcome, FailureClass, PendingAttempt, RecoveryAction, RedefinitionAttempt,
    RedefinitionFailureInfo, RequestId,
};
pub use hash::{CodeDigest, DigestError};
pub use identity::{IdentityError, UnitIdentity};
pub use signature::{FieldSig, MethodKey, MethodSig, SignatureBuilder, StructuralSignature, Visibility};
pub use unit::CodeUnit;
pub use validator::{CompatibilityValidator, Incompatible, ValidationPolicy};
pub use verdict::{ChangeScope, Compatibility, CompatibilityVerdict, ValidatedChange, Violation};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for code-unit handling
    pub use crate::{
        ChangeScope, CodeUnit, CompatibilityValidator, CompatibilityVerdict, MethodSig,
        RedefinitionAttempt, StructuralSignature, UnitIdentity, ValidatedChange, Violation,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
