// Copyright (c) 2025 SUSE LLC, herd
// SPDX-License-Identifier: MIT

//! Cluster-target resolution.
//!
//! Translates a `targets` specification (explicit ids or label selector)
//! into a concrete, sorted set of downstream clusters, and classifies each
//! cluster into its Fleet workspace. The resolved set is computed once at
//! the start of a reconciliation and never changes mid-flight.

use crate::constants::{CLUSTER_STATE_ACTIVE, MANAGEMENT_CLUSTER_ID, WORKSPACE_DEFAULT, WORKSPACE_LOCAL};
use crate::crd::TargetSpec;
use crate::rancher::{ClusterInfo, ClusterInventory, InventoryError};
use crate::selector::matches_labels;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{info, warn};

/// Fleet workspace a cluster's Bundles are placed in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Workspace {
    /// `fleet-local`: the Rancher management cluster
    Local,
    /// `fleet-default`: all downstream clusters
    Default,
}

impl Workspace {
    /// The workspace namespace name.
    #[must_use]
    pub fn namespace(self) -> &'static str {
        match self {
            Workspace::Local => WORKSPACE_LOCAL,
            Workspace::Default => WORKSPACE_DEFAULT,
        }
    }

    /// Classify a cluster id into its workspace.
    #[must_use]
    pub fn for_cluster(cluster_id: &str) -> Self {
        if cluster_id == MANAGEMENT_CLUSTER_ID {
            Workspace::Local
        } else {
            Workspace::Default
        }
    }
}

/// A cluster validated against Rancher's inventory at reconciliation time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedCluster {
    /// Rancher cluster id
    pub id: String,
    /// Cluster labels
    pub labels: BTreeMap<String, String>,
    /// Fleet workspace this cluster's Bundles go to
    pub workspace: Workspace,
}

/// Target resolution failures.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// No usable clusters remained after validation; permanent for this spec
    #[error("no valid target clusters resolved")]
    NoTargets,

    /// A selector without matchLabels would select every cluster; rejected
    #[error("selector has no matchLabels")]
    EmptySelector,

    /// Cluster inventory listing failed transiently; retry with backoff
    #[error("cluster list failed: {0}")]
    TransientClusterListFailure(String),
}

/// Resolve a `targets` specification into a sorted set of clusters.
///
/// On `clusterIds`, each id is verified against the inventory; unknown or
/// inactive ids are recorded as warnings and dropped. On `selector`,
/// clusters whose labels are a superset of `matchLabels` are retained.
/// Results are sorted by cluster id so downstream Bundle generation is
/// stable across reconciliations.
///
/// # Errors
///
/// - [`ResolveError::NoTargets`] if zero valid clusters remain (permanent)
/// - [`ResolveError::EmptySelector`] for a selector with no labels (permanent)
/// - [`ResolveError::TransientClusterListFailure`] if the inventory is
///   unavailable (retried by the controller with backoff)
pub async fn resolve_targets(
    inventory: &dyn ClusterInventory,
    targets: &TargetSpec,
) -> Result<Vec<ResolvedCluster>, ResolveError> {
    let clusters = inventory.list_clusters().await.map_err(|e| match e {
        InventoryError::Transient(msg) | InventoryError::Permanent(msg) => {
            ResolveError::TransientClusterListFailure(msg)
        }
    })?;

    // Clusters Rancher does not report active cannot receive Bundles
    let active: Vec<&ClusterInfo> = clusters
        .iter()
        .filter(|c| c.state == CLUSTER_STATE_ACTIVE)
        .collect();

    let mut resolved: Vec<ResolvedCluster> = if let Some(ids) = &targets.cluster_ids {
        let mut out = Vec::new();
        for id in ids {
            match active.iter().find(|c| &c.id == id) {
                Some(cluster) => out.push(to_resolved(cluster)),
                None => {
                    warn!(cluster_id = %id, "Target cluster not found or not active, skipping");
                }
            }
        }
        out
    } else if let Some(selector) = &targets.selector {
        if selector.match_labels.is_empty() {
            return Err(ResolveError::EmptySelector);
        }
        active
            .iter()
            .filter(|c| matches_labels(selector, &c.labels))
            .map(|c| to_resolved(c))
            .collect()
    } else {
        // validate() rejects this before resolution; belt and braces
        return Err(ResolveError::NoTargets);
    };

    if resolved.is_empty() {
        return Err(ResolveError::NoTargets);
    }

    resolved.sort_by(|a, b| a.id.cmp(&b.id));
    resolved.dedup_by(|a, b| a.id == b.id);

    info!(
        count = resolved.len(),
        clusters = ?resolved.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(),
        "Resolved target clusters"
    );

    Ok(resolved)
}

fn to_resolved(cluster: &ClusterInfo) -> ResolvedCluster {
    ResolvedCluster {
        id: cluster.id.clone(),
        labels: cluster.labels.clone(),
        workspace: Workspace::for_cluster(&cluster.id),
    }
}

/// Split resolved clusters by workspace, preserving the sorted order.
///
/// When a resource's clusters span both workspaces, each chart yields one
/// Bundle per workspace, each targeting only its subset.
#[must_use]
pub fn partition_by_workspace(
    clusters: &[ResolvedCluster],
) -> Vec<(Workspace, Vec<&ResolvedCluster>)> {
    let mut partitions: Vec<(Workspace, Vec<&ResolvedCluster>)> = Vec::new();
    for workspace in [Workspace::Local, Workspace::Default] {
        let subset: Vec<&ResolvedCluster> = clusters
            .iter()
            .filter(|c| c.workspace == workspace)
            .collect();
        if !subset.is_empty() {
            partitions.push((workspace, subset));
        }
    }
    partitions
}

#[cfg(test)]
#[path = "resolver_tests.rs"]
mod resolver_tests;
