// Copyright (c) 2025 SUSE LLC, herd
// SPDX-License-Identifier: MIT

//! Fleet Bundle types and the bundle API façade.
//!
//! Herd deploys Helm charts by writing `Bundle` resources
//! (`fleet.cattle.io/v1alpha1`) into the Fleet workspace namespaces;
//! Fleet agents on the downstream clusters execute the actual Helm
//! operations. This module defines the subset of the Bundle schema the
//! controller reads and writes, plus the [`BundleApi`] trait the
//! synthesizer and reconcilers go through.
//!
//! The trait boundary exists so tests can run the full reconciliation
//! pipeline against an in-memory bundle store.

use crate::labels::HERD_CONTENT_HASH_ANNOTATION;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use kube::api::{DeleteParams, ListParams, PostParams};
use kube::{Api, Client, CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Helm options carried on a Bundle or one of its targets.
///
/// The Bundle-level entry carries the chart coordinates; per-target entries
/// carry only that cluster's rendered values.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BundleHelm {
    /// Chart name within the repository
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart: Option<String>,

    /// Helm repository URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,

    /// Chart version
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Helm release name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_name: Option<String>,

    /// Rendered Helm values
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<BTreeMap<String, serde_json::Value>>,

    /// Roll back on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub atomic: Option<bool>,

    /// Helm operation timeout (e.g. `"10m"`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    /// Create the release namespace if it does not exist
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_namespace: Option<bool>,
}

/// One deployment target within a Bundle.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BundleTarget {
    /// Fleet cluster name this target addresses
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,

    /// Per-cluster Helm overrides (values only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub helm: Option<BundleHelm>,
}

/// Fleet Bundle specification.
///
/// Only the fields Herd produces are modeled; Fleet tolerates the absence
/// of the rest.
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "fleet.cattle.io",
    version = "v1alpha1",
    kind = "Bundle",
    namespaced,
    status = "BundleStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct BundleSpec {
    /// Namespace the chart is released into on the downstream clusters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_namespace: Option<String>,

    /// Chart coordinates and shared Helm options
    #[serde(skip_serializing_if = "Option::is_none")]
    pub helm: Option<BundleHelm>,

    /// One entry per resolved cluster in this Bundle's workspace
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<BundleTarget>,
}

/// Condition reported on a Bundle by Fleet.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BundleCondition {
    /// Condition type (`Ready` is the one Herd consumes)
    pub r#type: String,
    /// `True`, `False`, or `Unknown`
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Per-cluster deployment detail inside the Bundle summary.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NonReadyResource {
    /// Bundle deployment name, `{cluster-namespace}/{cluster-name}`
    pub name: String,
    /// Deployment state reported by the Fleet agent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Failure or progress detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Rollup of the Bundle's per-cluster deployments.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BundleSummary {
    /// Deployments that reached Ready
    #[serde(default)]
    pub ready: i64,
    /// Deployments expected to become Ready
    #[serde(default)]
    pub desired_ready: i64,
    /// Deployments that are not Ready, with detail
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub non_ready_resources: Vec<NonReadyResource>,
}

/// Status subresource written by Fleet.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BundleStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<BundleSummary>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<BundleCondition>,
}

impl Bundle {
    /// Whether Fleet reports this Bundle Ready on every target.
    ///
    /// Ready means the summary shows all desired deployments ready (with at
    /// least one desired), or a `Ready=True` condition is present.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        let Some(status) = &self.status else {
            return false;
        };

        if let Some(summary) = &status.summary {
            if summary.desired_ready > 0 && summary.ready == summary.desired_ready {
                return true;
            }
        }

        status
            .conditions
            .iter()
            .any(|c| c.r#type == "Ready" && c.status == "True")
    }

    /// The content hash recorded at the last apply, if any.
    #[must_use]
    pub fn content_hash(&self) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(HERD_CONTENT_HASH_ANNOTATION))
            .map(String::as_str)
    }
}

/// Result of an idempotent Bundle apply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Bundle did not exist and was created
    Created,
    /// Bundle existed with different content and was replaced
    Updated,
    /// Bundle existed with identical content; no write was issued
    Unchanged,
}

/// CRUD façade over Fleet Bundles.
///
/// One production implementation ([`KubeBundles`]) talks to the API server;
/// tests substitute an in-memory store.
#[async_trait]
pub trait BundleApi: Send + Sync {
    /// Fetch a Bundle by workspace namespace and name.
    async fn get(&self, workspace: &str, name: &str) -> Result<Option<Bundle>>;

    /// Create or update a Bundle, keyed by (namespace, name).
    ///
    /// Equal content (by hash annotation) produces no write. A conflicting
    /// concurrent update is retried once after a refetch.
    async fn apply(&self, desired: &Bundle) -> Result<ApplyOutcome>;

    /// Delete a Bundle. Missing Bundles are not an error.
    async fn delete(&self, workspace: &str, name: &str) -> Result<()>;

    /// List Bundles in a workspace matching a label selector.
    async fn list(&self, workspace: &str, label_selector: &str) -> Result<Vec<Bundle>>;
}

/// Production [`BundleApi`] backed by the Kubernetes API server.
pub struct KubeBundles {
    client: Client,
}

impl KubeBundles {
    /// Wrap a Kubernetes client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, workspace: &str) -> Api<Bundle> {
        Api::namespaced(self.client.clone(), workspace)
    }

    /// Replace an existing Bundle, carrying over immutable annotations and
    /// the resource version. Returns `Err` on conflict so the caller can
    /// refetch and retry.
    async fn replace(&self, api: &Api<Bundle>, existing: &Bundle, desired: &Bundle) -> Result<()> {
        let mut replacement = desired.clone();
        replacement.metadata.resource_version = existing.metadata.resource_version.clone();

        // The first-applied anchor must survive updates; timeouts are
        // measured against it.
        if let Some(existing_annotations) = &existing.metadata.annotations {
            if let Some(first_applied) =
                existing_annotations.get(crate::labels::HERD_FIRST_APPLIED_ANNOTATION)
            {
                replacement
                    .metadata
                    .annotations
                    .get_or_insert_with(BTreeMap::new)
                    .insert(
                        crate::labels::HERD_FIRST_APPLIED_ANNOTATION.to_string(),
                        first_applied.clone(),
                    );
            }
        }

        api.replace(&desired.name_any(), &PostParams::default(), &replacement)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl BundleApi for KubeBundles {
    async fn get(&self, workspace: &str, name: &str) -> Result<Option<Bundle>> {
        match self.api(workspace).get(name).await {
            Ok(bundle) => Ok(Some(bundle)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn apply(&self, desired: &Bundle) -> Result<ApplyOutcome> {
        let workspace = desired
            .namespace()
            .ok_or_else(|| anyhow!("Bundle has no namespace"))?;
        let name = desired.name_any();
        let api = self.api(&workspace);

        let Some(existing) = self.get(&workspace, &name).await? else {
            api.create(&PostParams::default(), desired).await?;
            info!("Created Fleet Bundle {workspace}/{name}");
            return Ok(ApplyOutcome::Created);
        };

        if existing.content_hash().is_some() && existing.content_hash() == desired.content_hash() {
            debug!("Fleet Bundle {workspace}/{name} unchanged, skipping write");
            return Ok(ApplyOutcome::Unchanged);
        }

        match self.replace(&api, &existing, desired).await {
            Ok(()) => {
                info!("Updated Fleet Bundle {workspace}/{name}");
                Ok(ApplyOutcome::Updated)
            }
            Err(e) if is_conflict(&e) => {
                // Someone wrote between our get and replace; refetch and
                // retry exactly once before surfacing the failure.
                warn!("Conflict updating Fleet Bundle {workspace}/{name}, retrying once");
                let refetched = self
                    .get(&workspace, &name)
                    .await?
                    .ok_or_else(|| anyhow!("Bundle {workspace}/{name} disappeared mid-update"))?;
                self.replace(&api, &refetched, desired).await?;
                info!("Updated Fleet Bundle {workspace}/{name} after conflict retry");
                Ok(ApplyOutcome::Updated)
            }
            Err(e) => Err(e),
        }
    }

    async fn delete(&self, workspace: &str, name: &str) -> Result<()> {
        match self
            .api(workspace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => {
                info!("Deleted Fleet Bundle {workspace}/{name}");
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, workspace: &str, label_selector: &str) -> Result<Vec<Bundle>> {
        let params = ListParams::default().labels(label_selector);
        let list = self.api(workspace).list(&params).await?;
        Ok(list.items)
    }
}

fn is_conflict(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<kube::Error>(),
        Some(kube::Error::Api(ae)) if ae.code == 409
    )
}

#[cfg(test)]
#[path = "fleet_tests.rs"]
mod fleet_tests;
