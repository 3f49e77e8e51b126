//! Fully-qualified code-unit names
//!
//! [`UnitIdentity`] is the key every other component uses: the validator
//! compares snapshots of one identity, the registry shards instances by it and
//! the pipeline serializes requests per identity.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;

/// Fully-qualified name of a code unit, e.g. `com.acme.billing.Invoice`
///
/// Segments are separated by `.`; nested units use `$`
/// (`com.acme.Outer$Inner`). Cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UnitIdentity(Arc<str>);

impl UnitIdentity {
    /// Parse and validate a fully-qualified name
    ///
    /// # Errors
    /// Returns [`IdentityError`] when the name is empty or contains an
    /// empty or malformed segment.
    pub fn new(name: impl AsRef<str>) -> Result<Self, IdentityError> {
        let name = name.as_ref().trim();
        if name.is_empty() {
            return Err(IdentityError::Empty);
        }
        for segment in name.split('.') {
            validate_segment(segment).map_err(|reason| IdentityError::InvalidSegment {
                name: name.to_string(),
                segment: segment.to_string(),
                reason,
            })?;
        }
        Ok(Self(Arc::from(name)))
    }

    /// Full name as a string slice
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Simple (unqualified) name: last segment after `.`
    #[must_use]
    pub fn simple_name(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or(&self.0)
    }

    /// Package part of the name, if any
    #[must_use]
    pub fn package(&self) -> Option<&str> {
        self.0.rsplit_once('.').map(|(pkg, _)| pkg)
    }

    /// Whether this identity denotes a nested unit
    #[inline]
    #[must_use]
    pub fn is_nested(&self) -> bool {
        self.simple_name().contains('$')
    }
}

fn validate_segment(segment: &str) -> Result<(), &'static str> {
    let mut chars = segment.chars();
    let Some(first) = chars.next() else {
        return Err("empty segment");
    };
    if !(first.is_alphabetic() || first == '_') {
        return Err("must start with a letter or underscore");
    }
    if segment.ends_with('$') {
        return Err("dangling nested-unit separator");
    }
    if chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$') {
        Ok(())
    } else {
        Err("contains characters outside [A-Za-z0-9_$]")
    }
}

impl Display for UnitIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for UnitIdentity {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for UnitIdentity {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<UnitIdentity> for String {
    fn from(value: UnitIdentity) -> Self {
        value.0.to_string()
    }
}

impl AsRef<str> for UnitIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identity parsing errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    /// Name was empty or whitespace
    #[error("unit identity cannot be empty")]
    Empty,

    /// A dot-separated segment is malformed
    #[error("invalid segment '{segment}' in '{name}': {reason}")]
    InvalidSegment {
        name: String,
        segment: String,
        reason: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_parses_qualified_names() {
        let id = UnitIdentity::new("com.acme.billing.Invoice").unwrap();
        assert_eq!(id.simple_name(), "Invoice");
        assert_eq!(id.package(), Some("com.acme.billing"));
        assert!(!id.is_nested());
    }

    #[test]
    fn identity_accepts_nested_units() {
        let id: UnitIdentity = "com.acme.Outer$Inner".parse().unwrap();
        assert!(id.is_nested());
        assert_eq!(id.simple_name(), "Outer$Inner");
    }

    #[test]
    fn identity_without_package() {
        let id = UnitIdentity::new("Main").unwrap();
        assert_eq!(id.package(), None);
        assert_eq!(id.simple_name(), "Main");
    }

    #[test]
    fn identity_rejects_malformed_names() {
        assert_eq!(UnitIdentity::new("  "), Err(IdentityError::Empty));
        assert!(UnitIdentity::new("com..Foo").is_err());
        assert!(UnitIdentity::new("com.1Foo").is_err());
        assert!(UnitIdentity::new("com.Foo$").is_err());
        assert!(UnitIdentity::new("com.Fo-o").is_err());
    }

    #[test]
    fn identity_serde_roundtrip_as_string() {
        let id = UnitIdentity::new("com.acme.Foo").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"com.acme.Foo\"");
        let back: UnitIdentity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<UnitIdentity>("\"bad..name\"").is_err());
    }
}
