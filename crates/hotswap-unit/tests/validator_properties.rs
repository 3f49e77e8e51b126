use hotswap_unit::{
    ChangeScope, CodeUnit, CompatibilityValidator, FieldSig, MethodSig, StructuralSignature,
    UnitIdentity, ValidationPolicy, Violation, Visibility,
};
use proptest::prelude::*;

fn visibility() -> impl Strategy<Value = Visibility> {
    prop_oneof![
        Just(Visibility::Public),
        Just(Visibility::Protected),
        Just(Visibility::Package),
        Just(Visibility::Private),
    ]
}

fn type_name() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("int".to_string()),
        Just("long".to_string()),
        Just("java.lang.String".to_string()),
        Just("java.util.List".to_string()),
    ]
}

prop_compose! {
    fn method()(
        name in "[a-z][a-zA-Z]{0,8}",
        params in prop::collection::vec(type_name(), 0..3),
        ret in type_name(),
        vis in visibility(),
        body in prop::collection::vec(any::<u8>(), 0..16),
    ) -> MethodSig {
        MethodSig::new(name, params, ret).with_visibility(vis).with_body(body)
    }
}

prop_compose! {
    fn signature()(
        fields in prop::collection::btree_map("[a-z]{1,6}", type_name(), 0..5),
        methods in prop::collection::vec(method(), 1..6),
    ) -> StructuralSignature {
        let mut builder = StructuralSignature::builder().supertype("java.lang.Object");
        for (name, ty) in fields {
            builder = builder.field(name, FieldSig::new(ty));
        }
        for m in methods {
            builder = builder.method(m);
        }
        builder.build()
    }
}

fn unit(sig: StructuralSignature, bytes: Vec<u8>) -> CodeUnit {
    CodeUnit::new(UnitIdentity::new("com.acme.Subject").unwrap(), sig, bytes)
}

fn rebody(sig: &StructuralSignature, salt: &[u8]) -> StructuralSignature {
    let mut out = sig.clone();
    for method in out.methods.values_mut() {
        let mut body = method.body_digest.as_bytes().to_vec();
        body.extend_from_slice(salt);
        method.body_digest = hotswap_unit::CodeDigest::compute(&body);
    }
    out
}

proptest! {
    #[test]
    fn body_only_changes_are_compatible(
        sig in signature(),
        salt in prop::collection::vec(any::<u8>(), 1..8),
        old_bytes in prop::collection::vec(any::<u8>(), 1..32),
        new_bytes in prop::collection::vec(any::<u8>(), 1..32),
    ) {
        let old = unit(sig.clone(), old_bytes);
        let new = unit(rebody(&sig, &salt), new_bytes);

        for policy in [ValidationPolicy::default(), ValidationPolicy::default().with_private_method_changes(true)] {
            let verdict = CompatibilityValidator::new(policy).validate(&old, &new);
            prop_assert!(verdict.is_compatible(), "{}", verdict.summary());
            prop_assert!(verdict.violations().is_empty());
            prop_assert!(verdict.scope().is_body_only());
        }
    }

    #[test]
    fn added_field_is_always_reported(
        sig in signature(),
        ty in type_name(),
        vis in visibility(),
    ) {
        prop_assume!(!sig.fields.contains_key("zzAdded"));
        let mut changed = sig.clone();
        changed.fields.insert("zzAdded".to_string(), FieldSig::new(ty).with_visibility(vis));

        let verdict = CompatibilityValidator::new(ValidationPolicy::default().with_private_method_changes(true))
            .validate(&unit(sig, b"v1".to_vec()), &unit(changed, b"v2".to_vec()));

        prop_assert!(!verdict.is_compatible());
        prop_assert_eq!(verdict.scope(), &ChangeScope::Structural);
        let found = verdict
            .violations()
            .iter()
            .any(|v| matches!(v, Violation::FieldAdded { name, .. } if name == "zzAdded"));
        prop_assert!(found);
    }

    #[test]
    fn removed_field_is_always_reported(sig in signature()) {
        prop_assume!(!sig.fields.is_empty());
        let mut changed = sig.clone();
        let removed = changed.fields.keys().next().cloned().unwrap();
        changed.fields.remove(&removed);

        let verdict = CompatibilityValidator::default()
            .validate(&unit(sig, b"v1".to_vec()), &unit(changed, b"v2".to_vec()));

        prop_assert!(!verdict.is_compatible());
        let found = verdict
            .violations()
            .iter()
            .any(|v| matches!(v, Violation::FieldRemoved { name, .. } if *name == removed));
        prop_assert!(found);
    }

    #[test]
    fn validation_is_deterministic(a in signature(), b in signature()) {
        let old = unit(a, b"v1".to_vec());
        let new = unit(b, b"v2".to_vec());
        let validator = CompatibilityValidator::default();
        prop_assert_eq!(validator.validate(&old, &new), validator.validate(&old, &new));
    }

    #[test]
    fn self_comparison_is_unchanged(sig in signature()) {
        let old = unit(sig.clone(), b"same".to_vec());
        let new = unit(sig, b"same".to_vec());
        let verdict = CompatibilityValidator::default().validate(&old, &new);
        prop_assert_eq!(verdict.scope(), &ChangeScope::Unchanged);
    }
}
