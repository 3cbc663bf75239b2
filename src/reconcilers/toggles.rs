// Copyright (c) 2025 SUSE LLC, herd
// SPDX-License-Identifier: MIT

//! Feature-toggle side effects: security scan and observability markers.
//!
//! When `security` or `observability` is enabled on a parent resource the
//! controller emits a marker ConfigMap keyed on the owner. The external
//! scan service and observability stack watch for these markers; their
//! results flow back through the status subtrees, which start in a
//! requested/pending shape.

use crate::crd::{ObservabilityStatus, SecurityStatus};
use crate::reconcilers::bundles::BundleOwner;
use crate::reconcilers::retry::retry_kube;
use anyhow::Result;
use chrono::Utc;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::PostParams;
use kube::{Api, Client};
use std::collections::BTreeMap;
use tracing::info;

/// Marker ConfigMap name suffix for security scans
const SECURITY_MARKER_SUFFIX: &str = "neuvector-scan";

/// Marker ConfigMap name suffix for observability wiring
const OBSERVABILITY_MARKER_SUFFIX: &str = "observability-config";

/// Ensure the security scan marker exists for this owner.
///
/// Creation is idempotent; an existing marker is left untouched so the
/// scan service's own updates survive reconciliations. Returns `true`
/// when the marker was created by this call.
///
/// # Errors
///
/// Returns an error if the create fails for a reason other than the
/// marker already existing.
pub async fn ensure_security_marker(client: &Client, owner: &BundleOwner) -> Result<bool> {
    ensure_marker(client, owner, SECURITY_MARKER_SUFFIX).await
}

/// Ensure the observability marker exists for this owner. Returns `true`
/// when the marker was created by this call.
///
/// # Errors
///
/// Returns an error if the create fails for a reason other than the
/// marker already existing.
pub async fn ensure_observability_marker(client: &Client, owner: &BundleOwner) -> Result<bool> {
    ensure_marker(client, owner, OBSERVABILITY_MARKER_SUFFIX).await
}

async fn ensure_marker(client: &Client, owner: &BundleOwner, suffix: &str) -> Result<bool> {
    let name = format!("{}-{}", owner.name, suffix);
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), &owner.namespace);

    let existing = retry_kube("get marker configmap", || api.get_opt(&name)).await?;
    if existing.is_some() {
        return Ok(false);
    }

    let marker = ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(owner.namespace.clone()),
            labels: Some(owner.base_labels()),
            ..ObjectMeta::default()
        },
        data: Some(BTreeMap::from([
            ("ownerKind".to_string(), owner.kind.clone()),
            ("ownerName".to_string(), owner.name.clone()),
            ("requestedAt".to_string(), Utc::now().to_rfc3339()),
        ])),
        ..ConfigMap::default()
    };

    match api.create(&PostParams::default(), &marker).await {
        Ok(_) => {
            info!(marker = %name, namespace = %owner.namespace, "Created toggle marker");
            Ok(true)
        }
        Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Initial security status subtree, carried until the scan service reports.
#[must_use]
pub fn initial_security_status(previous: Option<&SecurityStatus>) -> SecurityStatus {
    previous.cloned().unwrap_or(SecurityStatus {
        scan_status: Some("Requested".to_string()),
        vulnerabilities: None,
        critical_issues: None,
    })
}

/// Initial observability status subtree, carried until the stack reports.
#[must_use]
pub fn initial_observability_status(
    previous: Option<&ObservabilityStatus>,
) -> ObservabilityStatus {
    previous.cloned().unwrap_or(ObservabilityStatus {
        metrics_collected: Some(false),
        dashboards_available: Some(false),
        alerts_configured: Some(false),
    })
}
