// Copyright (c) 2025 SUSE LLC, herd
// SPDX-License-Identifier: MIT

//! Unit tests for `values.rs`
//!
//! The merge pipeline itself needs a Kubernetes API for source fetches;
//! these tests cover the pure pieces: deep-merge semantics, precedence,
//! toggle injection, and payload validation.

#[cfg(test)]
mod tests {
    use crate::reconcilers::values::{
        deep_merge, inject_feature_toggles, validate_values, RenderedValues,
    };
    use serde_json::{json, Value};

    fn values(v: Value) -> RenderedValues {
        match v {
            Value::Object(map) => map.into_iter().collect(),
            _ => panic!("test values must be an object"),
        }
    }

    #[test]
    fn test_scalars_overwrite() {
        let mut base = values(json!({"a": 1, "b": 1}));
        deep_merge(&mut base, values(json!({"b": 2})));
        assert_eq!(base.get("a").unwrap(), &json!(1));
        assert_eq!(base.get("b").unwrap(), &json!(2));
    }

    #[test]
    fn test_nested_mappings_merge() {
        let mut base = values(json!({"db": {"host": "a", "port": 5432}}));
        deep_merge(&mut base, values(json!({"db": {"host": "b"}})));
        assert_eq!(base.get("db").unwrap(), &json!({"host": "b", "port": 5432}));
    }

    #[test]
    fn test_sequences_are_replaced_not_concatenated() {
        let mut base = values(json!({"tolerations": [1, 2, 3]}));
        deep_merge(&mut base, values(json!({"tolerations": [4]})));
        assert_eq!(base.get("tolerations").unwrap(), &json!([4]));
    }

    #[test]
    fn test_mapping_replaces_scalar_and_vice_versa() {
        let mut base = values(json!({"x": 1}));
        deep_merge(&mut base, values(json!({"x": {"nested": true}})));
        assert_eq!(base.get("x").unwrap(), &json!({"nested": true}));

        let mut base = values(json!({"x": {"nested": true}}));
        deep_merge(&mut base, values(json!({"x": 1})));
        assert_eq!(base.get("x").unwrap(), &json!(1));
    }

    #[test]
    fn test_precedence_chain() {
        // configMapRefs < env overlay < per-cluster < secretRefs < inline:
        // cm1={a:1,b:1}, env={b:2,c:2}, cluster={c:3,d:3}, secret={d:4,e:4},
        // inline={e:5} must merge to {a:1,b:2,c:3,d:4,e:5}
        let mut merged = RenderedValues::new();
        deep_merge(&mut merged, values(json!({"a": 1, "b": 1})));
        deep_merge(&mut merged, values(json!({"b": 2, "c": 2})));
        deep_merge(&mut merged, values(json!({"c": 3, "d": 3})));
        deep_merge(&mut merged, values(json!({"d": 4, "e": 4})));
        deep_merge(&mut merged, values(json!({"e": 5})));

        assert_eq!(
            serde_json::to_value(&merged).unwrap(),
            json!({"a": 1, "b": 2, "c": 3, "d": 4, "e": 5})
        );
    }

    #[test]
    fn test_later_refs_override_earlier_ones() {
        let mut merged = RenderedValues::new();
        deep_merge(&mut merged, values(json!({"replicas": 1})));
        deep_merge(&mut merged, values(json!({"replicas": 3})));
        assert_eq!(merged.get("replicas").unwrap(), &json!(3));
    }

    #[test]
    fn test_toggle_injection_defaults_off() {
        let mut merged = values(json!({"a": 1}));
        inject_feature_toggles(&mut merged, false, false);
        assert_eq!(
            merged.get("herd").unwrap(),
            &json!({
                "security": {"enabled": false},
                "observability": {"enabled": false}
            })
        );
        assert_eq!(merged.get("a").unwrap(), &json!(1));
    }

    #[test]
    fn test_toggle_injection_cannot_be_suppressed_by_user_values() {
        // User tries to force the toggles off through inline values
        let mut merged = values(json!({
            "herd": {"security": {"enabled": false}, "extra": "kept"}
        }));
        inject_feature_toggles(&mut merged, true, true);

        let herd = merged.get("herd").unwrap();
        assert_eq!(herd["security"]["enabled"], json!(true));
        assert_eq!(herd["observability"]["enabled"], json!(true));
        // Unknown keys under the reserved prefix pass through unchanged
        assert_eq!(herd["extra"], json!("kept"));
    }

    #[test]
    fn test_toggle_injection_replaces_non_mapping_herd_key() {
        let mut merged = values(json!({"herd": "surprise"}));
        inject_feature_toggles(&mut merged, true, false);
        assert_eq!(merged.get("herd").unwrap()["security"]["enabled"], json!(true));
    }

    #[test]
    fn test_validate_flags_underscore_keys() {
        let merged = values(json!({"_internal": 1, "ok": {"_hidden": 2}}));
        let warnings = validate_values(&merged);
        assert!(warnings.iter().any(|w| w.contains("_internal")));
        assert!(warnings.iter().any(|w| w.contains("ok._hidden")));
    }

    #[test]
    fn test_validate_flags_empty_values() {
        let warnings = validate_values(&RenderedValues::new());
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("empty"));
    }

    #[test]
    fn test_validate_passes_clean_values() {
        let merged = values(json!({"replicas": 3, "image": {"tag": "v1"}}));
        assert!(validate_values(&merged).is_empty());
    }
}
