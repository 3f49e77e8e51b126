//! Code-unit snapshots
//!
//! A [`CodeUnit`] captures one version of a compiled unit: its identity, its
//! structural signature and the raw bytes handed to the host runtime. Two
//! snapshots (old, new) are compared by the validator.

use crate::hash::CodeDigest;
use crate::identity::UnitIdentity;
use crate::signature::StructuralSignature;
use std::sync::Arc;

/// Immutable snapshot of a compiled code unit
///
/// Bytes are shared (`Arc<[u8]>`) so handing them to a blocking runtime call
/// does not copy them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeUnit {
    identity: UnitIdentity,
    signature: StructuralSignature,
    bytes: Arc<[u8]>,
    digest: CodeDigest,
}

impl CodeUnit {
    /// Capture a snapshot; the digest is computed from `bytes`
    #[must_use]
    pub fn new(
        identity: UnitIdentity,
        signature: StructuralSignature,
        bytes: impl Into<Arc<[u8]>>,
    ) -> Self {
        let bytes = bytes.into();
        let digest = CodeDigest::compute(&bytes);
        Self {
            identity,
            signature,
            bytes,
            digest,
        }
    }

    /// Fully-qualified name
    #[inline]
    #[must_use]
    pub fn identity(&self) -> &UnitIdentity {
        &self.identity
    }

    /// Structural signature
    #[inline]
    #[must_use]
    pub fn signature(&self) -> &StructuralSignature {
        &self.signature
    }

    /// Raw code bytes
    #[inline]
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Shared handle to the raw bytes
    #[inline]
    #[must_use]
    pub fn shared_bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.bytes)
    }

    /// Digest of the raw bytes
    #[inline]
    #[must_use]
    pub fn digest(&self) -> CodeDigest {
        self.digest
    }

    /// Size of the raw bytes
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the unit carries no bytes
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::MethodSig;

    #[test]
    fn unit_digest_tracks_bytes() {
        let id = UnitIdentity::new("com.acme.Foo").unwrap();
        let sig = StructuralSignature::builder()
            .method(MethodSig::new("run", Vec::<String>::new(), "void"))
            .build();

        let a = CodeUnit::new(id.clone(), sig.clone(), b"v1".to_vec());
        let b = CodeUnit::new(id.clone(), sig.clone(), b"v1".to_vec());
        let c = CodeUnit::new(id, sig, b"v2".to_vec());

        assert_eq!(a.digest(), b.digest());
        assert_ne!(a.digest(), c.digest());
        assert_eq!(a.len(), 2);
        assert_eq!(a.bytes(), b"v1");
    }
}
