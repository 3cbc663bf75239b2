// Copyright (c) 2025 SUSE LLC, herd
// SPDX-License-Identifier: MIT

//! Integration tests for the Herd controller
//!
//! These tests verify the controller end-to-end against a Kubernetes
//! cluster with the Herd and Fleet CRDs installed and the controller
//! running.
//!
//! Run with: cargo test --test stack_integration -- --ignored

mod common;

use common::{create_test_namespace, delete_test_namespace, get_kube_client_or_skip};
use herd::crd::{DeploymentPhase, Stack};
use herd::fleet::Bundle;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use serde_json::json;
use std::time::Duration;
use tokio::time::sleep;

const TEST_NAMESPACE: &str = "herd-integration-test";

fn simple_stack(name: &str) -> Stack {
    serde_json::from_value(json!({
        "apiVersion": "herd.suse.com/v1",
        "kind": "Stack",
        "metadata": {
            "name": name,
            "namespace": TEST_NAMESPACE
        },
        "spec": {
            "env": "dev",
            "targets": { "clusterIds": ["local"] },
            "charts": [{
                "name": "nginx",
                "repo": "https://charts.bitnami.com/bitnami",
                "version": "15.0.0",
                "namespace": "integration-nginx",
                "releaseName": "nginx",
                "values": { "inline": { "replicaCount": 1 } }
            }]
        }
    }))
    .expect("valid stack manifest")
}

#[tokio::test]
#[ignore] // Run with: cargo test --test stack_integration -- --ignored
async fn test_stack_creates_fleet_bundle() {
    let Some(client) = get_kube_client_or_skip().await else {
        return;
    };

    create_test_namespace(&client, TEST_NAMESPACE)
        .await
        .expect("create namespace");

    let stacks: Api<Stack> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let stack = simple_stack("it-simple");

    stacks
        .create(&PostParams::default(), &stack)
        .await
        .expect("create stack");

    // Wait for the controller to synthesize the Bundle
    let bundles: Api<Bundle> = Api::namespaced(client.clone(), "fleet-local");
    let mut found = false;
    for _ in 0..30 {
        if bundles.get_opt("stack-it-simple-nginx").await.unwrap().is_some() {
            found = true;
            break;
        }
        sleep(Duration::from_secs(2)).await;
    }
    assert!(found, "expected Bundle stack-it-simple-nginx in fleet-local");

    // The Bundle must carry the owner labels used for garbage collection
    let bundle = bundles.get("stack-it-simple-nginx").await.unwrap();
    let labels = bundle.metadata.labels.as_ref().unwrap();
    assert_eq!(labels.get("herd.suse.com/owner-kind").unwrap(), "stack");
    assert_eq!(labels.get("herd.suse.com/owner-name").unwrap(), "it-simple");

    // Cleanup
    stacks
        .delete("it-simple", &DeleteParams::default())
        .await
        .expect("delete stack");
    delete_test_namespace(&client, TEST_NAMESPACE).await;
}

#[tokio::test]
#[ignore]
async fn test_stack_status_progresses() {
    let Some(client) = get_kube_client_or_skip().await else {
        return;
    };

    create_test_namespace(&client, TEST_NAMESPACE)
        .await
        .expect("create namespace");

    let stacks: Api<Stack> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    stacks
        .create(&PostParams::default(), &simple_stack("it-status"))
        .await
        .expect("create stack");

    let mut last_phase = None;
    for _ in 0..60 {
        if let Some(stack) = stacks.get_opt("it-status").await.unwrap() {
            if let Some(status) = stack.status {
                last_phase = Some(status.phase);
                assert_eq!(status.target_clusters, vec!["local".to_string()]);
                if matches!(
                    status.phase,
                    DeploymentPhase::Deployed | DeploymentPhase::Failed
                ) {
                    break;
                }
            }
        }
        sleep(Duration::from_secs(5)).await;
    }

    assert!(
        last_phase.is_some(),
        "controller never wrote a status for the Stack"
    );

    stacks
        .delete("it-status", &DeleteParams::default())
        .await
        .expect("delete stack");
    delete_test_namespace(&client, TEST_NAMESPACE).await;
}

#[tokio::test]
#[ignore]
async fn test_cyclic_stack_fails_without_bundles() {
    let Some(client) = get_kube_client_or_skip().await else {
        return;
    };

    create_test_namespace(&client, TEST_NAMESPACE)
        .await
        .expect("create namespace");

    let stacks: Api<Stack> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let stack: Stack = serde_json::from_value(json!({
        "apiVersion": "herd.suse.com/v1",
        "kind": "Stack",
        "metadata": { "name": "it-cycle", "namespace": TEST_NAMESPACE },
        "spec": {
            "env": "dev",
            "targets": { "clusterIds": ["local"] },
            "charts": [
                {
                    "name": "a", "repo": "r", "version": "1", "namespace": "a",
                    "releaseName": "a", "dependsOn": ["b"]
                },
                {
                    "name": "b", "repo": "r", "version": "1", "namespace": "b",
                    "releaseName": "b", "dependsOn": ["a"]
                }
            ]
        }
    }))
    .unwrap();

    stacks
        .create(&PostParams::default(), &stack)
        .await
        .expect("create stack");

    let mut saw_failed = false;
    for _ in 0..30 {
        if let Some(stack) = stacks.get_opt("it-cycle").await.unwrap() {
            if let Some(status) = stack.status {
                if status.phase == DeploymentPhase::Failed {
                    saw_failed = true;
                    let ready = status.conditions.iter().find(|c| c.r#type == "Ready");
                    assert_eq!(
                        ready.and_then(|c| c.reason.as_deref()),
                        Some("CycleDetected")
                    );
                    break;
                }
            }
        }
        sleep(Duration::from_secs(2)).await;
    }
    assert!(saw_failed, "cycle never surfaced as Failed");

    // No Bundles may have been written for the cyclic spec
    let bundles: Api<Bundle> = Api::namespaced(client.clone(), "fleet-local");
    let owned = bundles
        .list(&ListParams::default().labels("herd.suse.com/owner-name=it-cycle"))
        .await
        .unwrap();
    assert!(owned.items.is_empty(), "cycle must not produce Bundles");

    stacks
        .delete("it-cycle", &DeleteParams::default())
        .await
        .expect("delete stack");
    delete_test_namespace(&client, TEST_NAMESPACE).await;
}
