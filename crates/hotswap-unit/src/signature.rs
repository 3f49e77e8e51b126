//! Structural signatures of code units
//!
//! A [`StructuralSignature`] is the part of a code unit that the host runtime
//! cannot change in place: supertype, implemented interfaces, fields and method
//! signatures. Method bodies are represented only by their digest so that a
//! body-only edit is visible without being structural.

use crate::hash::CodeDigest;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display, Formatter};

/// Member visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Visible everywhere
    #[default]
    Public,
    /// Visible to subtypes
    Protected,
    /// Visible within the package
    Package,
    /// Visible only inside the unit
    Private,
}

impl Visibility {
    /// Whether code outside the unit can observe the member
    #[inline]
    #[must_use]
    pub fn is_externally_visible(self) -> bool {
        !matches!(self, Self::Private)
    }
}

/// Field signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSig {
    /// Declared type name
    pub type_name: String,
    /// Visibility
    #[serde(default)]
    pub visibility: Visibility,
    /// Static (per-unit rather than per-instance)
    #[serde(default)]
    pub is_static: bool,
}

impl FieldSig {
    /// Create a public instance field
    #[inline]
    #[must_use]
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            visibility: Visibility::Public,
            is_static: false,
        }
    }

    /// With visibility
    #[inline]
    #[must_use]
    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    /// Mark static
    #[inline]
    #[must_use]
    pub fn static_field(mut self) -> Self {
        self.is_static = true;
        self
    }
}

/// Method identity: name plus ordered parameter types
///
/// Overloads with different parameter lists are distinct methods.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MethodKey {
    /// Method name
    pub name: String,
    /// Parameter type names, in declaration order
    pub params: Vec<String>,
}

impl Display for MethodKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.params.join(", "))
    }
}

/// Method signature with a digest of its body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodSig {
    /// Method name
    pub name: String,
    /// Parameter type names
    #[serde(default)]
    pub params: Vec<String>,
    /// Return type name
    pub return_type: String,
    /// Visibility
    #[serde(default)]
    pub visibility: Visibility,
    /// Static method
    #[serde(default)]
    pub is_static: bool,
    /// Digest of the compiled body
    #[serde(default)]
    pub body_digest: CodeDigest,
}

impl MethodSig {
    /// Create a public instance method with an empty body
    #[must_use]
    pub fn new<P, S>(name: impl Into<String>, params: P, return_type: impl Into<String>) -> Self
    where
        P: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            params: params.into_iter().map(Into::into).collect(),
            return_type: return_type.into(),
            visibility: Visibility::Public,
            is_static: false,
            body_digest: CodeDigest::compute(&[]),
        }
    }

    /// With visibility
    #[inline]
    #[must_use]
    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    /// Mark static
    #[inline]
    #[must_use]
    pub fn static_method(mut self) -> Self {
        self.is_static = true;
        self
    }

    /// Set the body from compiled body bytes
    #[inline]
    #[must_use]
    pub fn with_body(mut self, body: impl AsRef<[u8]>) -> Self {
        self.body_digest = CodeDigest::compute(body.as_ref());
        self
    }

    /// Lookup key for this method
    #[must_use]
    pub fn key(&self) -> MethodKey {
        MethodKey {
            name: self.name.clone(),
            params: self.params.clone(),
        }
    }
}

/// Structural signature of a code unit
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StructuralSignature {
    /// Direct supertype, if any
    #[serde(default)]
    pub supertype: Option<String>,
    /// Implemented interfaces
    #[serde(default)]
    pub interfaces: BTreeSet<String>,
    /// Fields by name
    #[serde(default)]
    pub fields: BTreeMap<String, FieldSig>,
    /// Methods by (name, params)
    #[serde(default, with = "method_list")]
    pub methods: BTreeMap<MethodKey, MethodSig>,
}

impl StructuralSignature {
    /// Start building a signature
    #[inline]
    #[must_use]
    pub fn builder() -> SignatureBuilder {
        SignatureBuilder::default()
    }

    /// Look up a method by name and parameter types
    #[must_use]
    pub fn method(&self, name: &str, params: &[&str]) -> Option<&MethodSig> {
        self.methods.iter().find_map(|(key, sig)| {
            (key.name == name && key.params.iter().map(String::as_str).eq(params.iter().copied()))
                .then_some(sig)
        })
    }

    /// Number of non-static fields (the per-instance layout)
    #[must_use]
    pub fn instance_field_count(&self) -> usize {
        self.fields.values().filter(|f| !f.is_static).count()
    }
}

/// Builder for [`StructuralSignature`]
#[derive(Debug, Default, Clone)]
pub struct SignatureBuilder {
    signature: StructuralSignature,
}

impl SignatureBuilder {
    /// Set supertype
    #[must_use]
    pub fn supertype(mut self, name: impl Into<String>) -> Self {
        self.signature.supertype = Some(name.into());
        self
    }

    /// Add implemented interface
    #[must_use]
    pub fn interface(mut self, name: impl Into<String>) -> Self {
        self.signature.interfaces.insert(name.into());
        self
    }

    /// Add field
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, field: FieldSig) -> Self {
        self.signature.fields.insert(name.into(), field);
        self
    }

    /// Add method (replaces an existing overload with the same key)
    #[must_use]
    pub fn method(mut self, method: MethodSig) -> Self {
        self.signature.methods.insert(method.key(), method);
        self
    }

    /// Finish
    #[must_use]
    pub fn build(self) -> StructuralSignature {
        self.signature
    }
}

/// Methods are serialized as a flat list since JSON maps need string keys.
mod method_list {
    use super::{MethodKey, MethodSig};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub(super) fn serialize<S>(
        methods: &BTreeMap<MethodKey, MethodSig>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let list: Vec<&MethodSig> = methods.values().collect();
        list.serialize(serializer)
    }

    pub(super) fn deserialize<'de, D>(
        deserializer: D,
    ) -> Result<BTreeMap<MethodKey, MethodSig>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let list = Vec::<MethodSig>::deserialize(deserializer)?;
        let mut methods = BTreeMap::new();
        for method in list {
            let key = method.key();
            if methods.insert(key.clone(), method).is_some() {
                return Err(serde::de::Error::custom(format!(
                    "duplicate method signature {key}"
                )));
            }
        }
        Ok(methods)
    }
}
