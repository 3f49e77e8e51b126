//! JSON unit descriptors
//!
//! The CLI reads code units from JSON files:
//!
//! ```json
//! {
//!   "identity": "com.acme.Cart",
//!   "supertype": "com.acme.Base",
//!   "interfaces": ["java.io.Serializable"],
//!   "fields": { "total": { "type_name": "long", "visibility": "private" } },
//!   "methods": [
//!     { "name": "pay", "params": ["long"], "return_type": "boolean", "body": "return total > 0;" }
//!   ]
//! }
//! ```
//!
//! Method bodies are text; only their digest enters the signature. The unit's
//! bytes are the file contents.

use anyhow::{Context, Result};
use hotswap_unit::{CodeUnit, FieldSig, MethodSig, StructuralSignature, UnitIdentity, Visibility};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitDescriptor {
    pub identity: String,
    #[serde(default)]
    pub supertype: Option<String>,
    #[serde(default)]
    pub interfaces: BTreeSet<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldSig>,
    #[serde(default)]
    pub methods: Vec<MethodDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDescriptor {
    pub name: String,
    #[serde(default)]
    pub params: Vec<String>,
    #[serde(default = "void")]
    pub return_type: String,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub body: String,
}

fn void() -> String {
    "void".to_string()
}

impl UnitDescriptor {
    /// Parse a descriptor from JSON text
    ///
    /// # Errors
    /// Malformed JSON or a missing required field.
    pub fn from_json(input: &str) -> Result<Self> {
        serde_json::from_str(input).context("invalid unit descriptor")
    }

    /// Build the signature this descriptor describes
    #[must_use]
    pub fn signature(&self) -> StructuralSignature {
        let mut builder = StructuralSignature::builder();
        if let Some(supertype) = &self.supertype {
            builder = builder.supertype(supertype.clone());
        }
        for interface in &self.interfaces {
            builder = builder.interface(interface.clone());
        }
        for (name, field) in &self.fields {
            builder = builder.field(name.clone(), field.clone());
        }
        for method in &self.methods {
            let mut sig = MethodSig::new(method.name.clone(), method.params.clone(), method.return_type.clone())
                .with_visibility(method.visibility)
                .with_body(method.body.as_bytes());
            if method.is_static {
                sig = sig.static_method();
            }
            builder = builder.method(sig);
        }
        builder.build()
    }

    /// Turn the descriptor into a code unit carrying `bytes`
    ///
    /// # Errors
    /// An invalid identity.
    pub fn into_unit(self, bytes: Vec<u8>) -> Result<CodeUnit> {
        let identity = UnitIdentity::new(&self.identity)
            .with_context(|| format!("invalid unit identity {:?}", self.identity))?;
        Ok(CodeUnit::new(identity, self.signature(), bytes))
    }
}

/// Read a code unit from a descriptor file
///
/// # Errors
/// I/O failures and invalid descriptors, with the path in the message.
pub fn load_unit(path: &Path) -> Result<CodeUnit> {
    let text = std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
    let descriptor = UnitDescriptor::from_json(&text).with_context(|| format!("in {}", path.display()))?;
    descriptor.into_unit(text.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const CART: &str = r#"{
        "identity": "com.acme.Cart",
        "fields": { "total": { "type_name": "long", "visibility": "private" } },
        "methods": [
            { "name": "pay", "params": ["long"], "return_type": "boolean", "body": "return total > 0;" },
            { "name": "reset" }
        ]
    }"#;

    #[test]
    fn descriptor_builds_signature() {
        let descriptor = UnitDescriptor::from_json(CART).unwrap();
        let signature = descriptor.signature();

        assert_eq!(signature.fields["total"].visibility, Visibility::Private);
        assert_eq!(signature.method("reset", &[]).unwrap().return_type, "void");
        assert!(signature.method("pay", &["long"]).is_some());
    }

    #[test]
    fn body_text_only_changes_digest() {
        let old = UnitDescriptor::from_json(CART).unwrap();
        let mut new = old.clone();
        new.methods[0].body = "return total >= 0;".into();

        let (old, new) = (old.signature(), new.signature());
        let (a, b) = (old.method("pay", &["long"]).unwrap(), new.method("pay", &["long"]).unwrap());
        assert_ne!(a.body_digest, b.body_digest);
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn load_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{").unwrap();
        let err = load_unit(&path).unwrap_err();
        assert!(format!("{err:#}").contains("broken.json"));
    }

    #[test]
    fn invalid_identity_is_an_error() {
        let descriptor = UnitDescriptor::from_json(r#"{ "identity": "" }"#).unwrap();
        assert!(descriptor.into_unit(Vec::new()).is_err());
    }
}
