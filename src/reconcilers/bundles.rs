// Copyright (c) 2025 SUSE LLC, herd
// SPDX-License-Identifier: MIT

//! Fleet Bundle synthesis, idempotent apply, observation, and reaping.
//!
//! Each chart (or lowered pipeline step) produces one Bundle per Fleet
//! workspace containing its resolved clusters. Bundle names are
//! deterministic (`{kind}-{parent}-{chart}`, truncated to 63 characters),
//! and every Bundle carries owner labels for garbage collection plus a
//! content-hash annotation so an unchanged spec produces zero writes.

use crate::constants::BUNDLE_NAME_MAX_LEN;
use crate::crd::{ChartSpec, DeploymentState};
use crate::fleet::{
    ApplyOutcome, Bundle, BundleApi, BundleHelm, BundleSpec, BundleTarget,
};
use crate::labels::{
    HERD_CHART_LABEL, HERD_CONTENT_HASH_ANNOTATION, HERD_FIRST_APPLIED_ANNOTATION,
    HERD_OWNER_KIND_LABEL, HERD_OWNER_NAME_LABEL, HERD_OWNER_NAMESPACE_LABEL, K8S_MANAGED_BY,
    K8S_PART_OF, MANAGED_BY_HERD, PART_OF_HERD,
};
use crate::metrics;
use crate::reconcilers::resolver::{ResolvedCluster, Workspace};
use crate::reconcilers::values::RenderedValues;
use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

/// Identity of the parent resource, stamped onto every owned Bundle.
#[derive(Clone, Debug)]
pub struct BundleOwner {
    /// Lowercased parent kind (`stack` or `pipeline`)
    pub kind: String,
    /// Parent name
    pub name: String,
    /// Parent namespace
    pub namespace: String,
}

impl BundleOwner {
    /// Build an owner identity from a kind string and object metadata.
    #[must_use]
    pub fn new(kind: &str, name: &str, namespace: &str) -> Self {
        Self {
            kind: kind.to_lowercase(),
            name: name.to_string(),
            namespace: namespace.to_string(),
        }
    }

    /// Label selector matching every Bundle owned by this parent.
    #[must_use]
    pub fn selector(&self) -> String {
        format!(
            "{HERD_OWNER_KIND_LABEL}={},{HERD_OWNER_NAME_LABEL}={},{HERD_OWNER_NAMESPACE_LABEL}={}",
            self.kind, self.name, self.namespace
        )
    }

    /// Owner labels without a chart association (markers, auxiliary objects).
    #[must_use]
    pub fn base_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (HERD_OWNER_KIND_LABEL.to_string(), self.kind.clone()),
            (HERD_OWNER_NAME_LABEL.to_string(), self.name.clone()),
            (
                HERD_OWNER_NAMESPACE_LABEL.to_string(),
                self.namespace.clone(),
            ),
            (K8S_MANAGED_BY.to_string(), MANAGED_BY_HERD.to_string()),
            (K8S_PART_OF.to_string(), PART_OF_HERD.to_string()),
        ])
    }

    /// Owner labels applied to every synthesized Bundle.
    #[must_use]
    pub fn labels(&self, chart_name: &str) -> BTreeMap<String, String> {
        let mut labels = self.base_labels();
        labels.insert(HERD_CHART_LABEL.to_string(), chart_name.to_string());
        labels
    }
}

/// Deterministic Bundle name: `{kind}-{parent}-{chart}`, truncated to the
/// 63-character label limit with any trailing `-` stripped.
#[must_use]
pub fn bundle_name(owner: &BundleOwner, chart_name: &str) -> String {
    let full = format!("{}-{}-{}", owner.kind, owner.name, chart_name);
    let truncated: String = full.chars().take(BUNDLE_NAME_MAX_LEN).collect();
    truncated.trim_end_matches('-').to_string()
}

/// Hex SHA-256 of the canonical JSON serialization of a Bundle spec.
///
/// Stored in the content-hash annotation; an equal hash suppresses the
/// update write.
#[must_use]
pub fn content_hash(spec: &BundleSpec) -> String {
    let json = serde_json::to_vec(spec).unwrap_or_default();
    let digest = Sha256::digest(&json);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Render the desired Bundle for one chart in one workspace.
///
/// The Bundle-level Helm block carries the chart coordinates; each target
/// entry carries one cluster's rendered values.
#[must_use]
pub fn desired_bundle(
    owner: &BundleOwner,
    chart: &ChartSpec,
    workspace: Workspace,
    clusters: &[&ResolvedCluster],
    values_by_cluster: &BTreeMap<String, RenderedValues>,
) -> Bundle {
    let targets = clusters
        .iter()
        .map(|cluster| BundleTarget {
            cluster_name: Some(cluster.id.clone()),
            helm: values_by_cluster.get(&cluster.id).map(|values| BundleHelm {
                values: Some(values.clone()),
                ..BundleHelm::default()
            }),
        })
        .collect();

    let spec = BundleSpec {
        default_namespace: Some(chart.namespace.clone()),
        helm: Some(BundleHelm {
            chart: Some(chart.chart.clone().unwrap_or_else(|| chart.name.clone())),
            repo: Some(chart.repo.clone()),
            version: Some(chart.version.clone()),
            release_name: Some(chart.release_name.clone()),
            values: None,
            atomic: Some(true),
            timeout: chart.timeout.clone(),
            create_namespace: Some(chart.create_namespace),
        }),
        targets,
    };

    let hash = content_hash(&spec);
    let annotations = BTreeMap::from([
        (HERD_CONTENT_HASH_ANNOTATION.to_string(), hash),
        // Overwritten with the preserved value on update; authoritative
        // only for the initial create
        (
            HERD_FIRST_APPLIED_ANNOTATION.to_string(),
            Utc::now().to_rfc3339(),
        ),
    ]);

    Bundle {
        metadata: ObjectMeta {
            name: Some(bundle_name(owner, &chart.name)),
            namespace: Some(workspace.namespace().to_string()),
            labels: Some(owner.labels(&chart.name)),
            annotations: Some(annotations),
            ..ObjectMeta::default()
        },
        spec,
        status: None,
    }
}

/// Apply one chart's Bundles across the workspace partitions.
///
/// Returns the (workspace, name) keys that were applied so the caller can
/// observe them.
///
/// # Errors
///
/// Returns an error if any apply fails after the conflict retry.
pub async fn apply_chart_bundles(
    bundles: &dyn BundleApi,
    owner: &BundleOwner,
    chart: &ChartSpec,
    partitions: &[(Workspace, Vec<&ResolvedCluster>)],
    values_by_cluster: &BTreeMap<String, RenderedValues>,
) -> Result<Vec<(Workspace, String)>> {
    let mut applied = Vec::new();

    for (workspace, clusters) in partitions {
        let desired = desired_bundle(owner, chart, *workspace, clusters, values_by_cluster);
        let name = desired.metadata.name.clone().unwrap_or_default();

        let outcome = bundles.apply(&desired).await?;
        match outcome {
            ApplyOutcome::Created => metrics::record_bundle_write("created"),
            ApplyOutcome::Updated => metrics::record_bundle_write("updated"),
            ApplyOutcome::Unchanged => metrics::record_bundle_write("unchanged"),
        }

        applied.push((*workspace, name));
    }

    Ok(applied)
}

/// Observed readiness of one chart across its Bundles.
#[derive(Clone, Debug)]
pub struct ChartObservation {
    /// All Bundles report Ready on all targets
    pub ready: bool,
    /// Earliest first-applied anchor across the chart's Bundles
    pub first_applied: Option<DateTime<Utc>>,
    /// Per-cluster deployment states
    pub per_cluster: Vec<(String, DeploymentState, Option<String>)>,
}

/// Observe a chart's Bundles and derive per-cluster deployment states.
///
/// A Ready Bundle marks all of its targets `Deployed`. A non-ready Bundle
/// marks targets listed in the summary's non-ready resources with the
/// reported detail (`ErrApplied` maps to `Failed`), and everything else
/// `Deploying`.
///
/// # Errors
///
/// Returns an error if a Bundle fetch fails.
pub async fn observe_chart(
    bundles: &dyn BundleApi,
    applied: &[(Workspace, String)],
    partitions: &[(Workspace, Vec<&ResolvedCluster>)],
) -> Result<ChartObservation> {
    let mut ready = true;
    let mut first_applied: Option<DateTime<Utc>> = None;
    let mut per_cluster = Vec::new();

    for (workspace, name) in applied {
        let Some(bundle) = bundles.get(workspace.namespace(), name).await? else {
            // Applied a moment ago; treat as still deploying
            ready = false;
            continue;
        };

        if let Some(anchor) = bundle
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(HERD_FIRST_APPLIED_ANNOTATION))
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        {
            let anchor = anchor.with_timezone(&Utc);
            first_applied = Some(match first_applied {
                Some(existing) => existing.min(anchor),
                None => anchor,
            });
        }

        let bundle_ready = bundle.is_ready();
        ready &= bundle_ready;

        let clusters = partitions
            .iter()
            .find(|(w, _)| w == workspace)
            .map(|(_, c)| c.as_slice())
            .unwrap_or(&[]);

        for cluster in clusters {
            if bundle_ready {
                per_cluster.push((cluster.id.clone(), DeploymentState::Deployed, None));
                continue;
            }

            let non_ready = bundle.status.as_ref().and_then(|s| {
                s.summary.as_ref().and_then(|summary| {
                    summary
                        .non_ready_resources
                        .iter()
                        .find(|r| r.name == cluster.id || r.name.ends_with(&format!("/{}", cluster.id)))
                })
            });

            match non_ready {
                Some(resource) if resource.state.as_deref() == Some("ErrApplied") => {
                    per_cluster.push((
                        cluster.id.clone(),
                        DeploymentState::Failed,
                        resource.message.clone(),
                    ));
                }
                Some(resource) => {
                    per_cluster.push((
                        cluster.id.clone(),
                        DeploymentState::Deploying,
                        resource.message.clone(),
                    ));
                }
                None => {
                    per_cluster.push((cluster.id.clone(), DeploymentState::Deploying, None));
                }
            }
        }
    }

    Ok(ChartObservation {
        ready,
        first_applied,
        per_cluster,
    })
}

/// Delete Bundles owned by this parent whose chart no longer exists in the
/// spec. Returns the number of Bundles reaped.
///
/// # Errors
///
/// Returns an error if listing or deletion fails.
pub async fn reap_orphans(
    bundles: &dyn BundleApi,
    owner: &BundleOwner,
    live_charts: &BTreeSet<String>,
) -> Result<usize> {
    let mut reaped = 0;

    for workspace in [Workspace::Local, Workspace::Default] {
        let owned = bundles
            .list(workspace.namespace(), &owner.selector())
            .await?;

        for bundle in owned {
            let chart = bundle
                .metadata
                .labels
                .as_ref()
                .and_then(|l| l.get(HERD_CHART_LABEL))
                .cloned();

            let Some(chart) = chart else {
                warn!(
                    bundle = ?bundle.metadata.name,
                    "Owned Bundle missing chart label, leaving in place"
                );
                continue;
            };

            if !live_charts.contains(&chart) {
                let name = bundle.metadata.name.clone().unwrap_or_default();
                info!(
                    bundle = %name,
                    workspace = workspace.namespace(),
                    chart = %chart,
                    "Reaping Bundle for removed chart"
                );
                bundles.delete(workspace.namespace(), &name).await?;
                metrics::record_bundle_write("deleted");
                reaped += 1;
            }
        }
    }

    Ok(reaped)
}

/// Delete every Bundle owned by this parent, in reverse declared order,
/// then verify nothing remains.
///
/// Called from the finalizer path; an error (including Bundles still
/// terminating) leaves the finalizer in place so teardown is retried.
///
/// # Errors
///
/// Returns an error if deletion fails or owned Bundles still exist.
pub async fn delete_owned_bundles(
    bundles: &dyn BundleApi,
    owner: &BundleOwner,
    charts_in_order: &[String],
) -> Result<()> {
    // Reverse dependency order: dependents come down before their
    // prerequisites
    for chart_name in charts_in_order.iter().rev() {
        let name = bundle_name(owner, chart_name);
        for workspace in [Workspace::Local, Workspace::Default] {
            bundles.delete(workspace.namespace(), &name).await?;
        }
    }

    // Reap anything left over (renamed charts, older spec revisions)
    let mut remaining = 0;
    for workspace in [Workspace::Local, Workspace::Default] {
        let owned = bundles
            .list(workspace.namespace(), &owner.selector())
            .await?;
        for bundle in &owned {
            let name = bundle.metadata.name.clone().unwrap_or_default();
            bundles.delete(workspace.namespace(), &name).await?;
        }
        remaining += owned.len();
    }

    if remaining > 0 {
        bail!("{remaining} owned Bundles still present, retrying teardown");
    }

    Ok(())
}

#[cfg(test)]
#[path = "bundles_tests.rs"]
mod bundles_tests;
