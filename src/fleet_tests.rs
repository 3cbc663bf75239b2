// Copyright (c) 2025 SUSE LLC, herd
// SPDX-License-Identifier: MIT

//! Unit tests for `fleet.rs`

#[cfg(test)]
mod tests {
    use crate::fleet::{
        Bundle, BundleCondition, BundleHelm, BundleSpec, BundleStatus, BundleSummary,
    };
    use crate::labels::HERD_CONTENT_HASH_ANNOTATION;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn bundle_with_status(status: Option<BundleStatus>) -> Bundle {
        Bundle {
            metadata: ObjectMeta {
                name: Some("stack-demo-x".to_string()),
                namespace: Some("fleet-default".to_string()),
                ..ObjectMeta::default()
            },
            spec: BundleSpec::default(),
            status,
        }
    }

    #[test]
    fn test_not_ready_without_status() {
        assert!(!bundle_with_status(None).is_ready());
    }

    #[test]
    fn test_ready_when_summary_complete() {
        let bundle = bundle_with_status(Some(BundleStatus {
            summary: Some(BundleSummary {
                ready: 3,
                desired_ready: 3,
                non_ready_resources: vec![],
            }),
            conditions: vec![],
        }));
        assert!(bundle.is_ready());
    }

    #[test]
    fn test_not_ready_when_summary_partial() {
        let bundle = bundle_with_status(Some(BundleStatus {
            summary: Some(BundleSummary {
                ready: 1,
                desired_ready: 3,
                non_ready_resources: vec![],
            }),
            conditions: vec![],
        }));
        assert!(!bundle.is_ready());
    }

    #[test]
    fn test_not_ready_when_desired_is_zero() {
        let bundle = bundle_with_status(Some(BundleStatus {
            summary: Some(BundleSummary {
                ready: 0,
                desired_ready: 0,
                non_ready_resources: vec![],
            }),
            conditions: vec![],
        }));
        assert!(!bundle.is_ready());
    }

    #[test]
    fn test_ready_condition_counts() {
        let bundle = bundle_with_status(Some(BundleStatus {
            summary: None,
            conditions: vec![BundleCondition {
                r#type: "Ready".to_string(),
                status: "True".to_string(),
                message: None,
            }],
        }));
        assert!(bundle.is_ready());
    }

    #[test]
    fn test_content_hash_annotation_getter() {
        let mut bundle = bundle_with_status(None);
        assert!(bundle.content_hash().is_none());

        bundle.metadata.annotations = Some(BTreeMap::from([(
            HERD_CONTENT_HASH_ANNOTATION.to_string(),
            "abc123".to_string(),
        )]));
        assert_eq!(bundle.content_hash(), Some("abc123"));
    }

    #[test]
    fn test_bundle_spec_serializes_camel_case() {
        let spec = BundleSpec {
            default_namespace: Some("vector-db".to_string()),
            helm: Some(BundleHelm {
                chart: Some("qdrant".to_string()),
                repo: Some("https://qdrant.github.io/qdrant-helm".to_string()),
                version: Some("0.9.1".to_string()),
                release_name: Some("qdrant".to_string()),
                values: None,
                atomic: Some(true),
                timeout: Some("10m".to_string()),
                create_namespace: Some(true),
            }),
            targets: vec![],
        };

        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["defaultNamespace"], "vector-db");
        assert_eq!(json["helm"]["releaseName"], "qdrant");
        assert_eq!(json["helm"]["atomic"], true);
        assert_eq!(json["helm"]["createNamespace"], true);
        // Empty targets are omitted from the wire form
        assert!(json.get("targets").is_none());
    }

    #[test]
    fn test_bundle_summary_tolerates_sparse_status() {
        let status: BundleStatus = serde_json::from_value(serde_json::json!({
            "summary": { "desiredReady": 2 }
        }))
        .unwrap();
        let summary = status.summary.unwrap();
        assert_eq!(summary.ready, 0);
        assert_eq!(summary.desired_ready, 2);
        assert!(summary.non_ready_resources.is_empty());
    }
}
