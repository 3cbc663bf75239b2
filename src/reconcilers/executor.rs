// Copyright (c) 2025 SUSE LLC, herd
// SPDX-License-Identifier: MIT

//! Chart execution: the work done for one ready scheduler node.
//!
//! Both reconcilers drive the same executor: a Stack executes its charts
//! directly, a Pipeline lowers each step to a chart first. Executing a node
//! means merging values for every resolved cluster, applying the chart's
//! Bundles per workspace, observing readiness, and enforcing the node's
//! timeout against the first-applied anchor.
//!
//! Transient failures leave the node `Deploying` so the next reconciliation
//! retries; for pipeline steps a retry budget bounds how often, after which
//! the node fails.

use crate::context::Context;
use crate::crd::{ChartSpec, DeploymentState, DeploymentStatus, Environment};
use crate::events::actions;
use crate::reconcilers::bundles::{
    apply_chart_bundles, observe_chart, BundleOwner,
};
use crate::reconcilers::resolver::{partition_by_workspace, ResolvedCluster};
use crate::reconcilers::scheduler::{DagNode, NodeExecutor, NodeOutcome};
use crate::reconcilers::values::{
    inject_feature_toggles, merge_chart_values, validate_values, RenderedValues, ValuesError,
};
use crate::status_reasons::{REASON_MISSING_VALUE_SOURCE, REASON_PARSE_FAILURE, REASON_TIMEOUT_EXPIRED};
use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::EventType;
use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::{error, warn};

/// Executes chart nodes for one parent resource.
///
/// Holds everything fixed for the reconciliation: the resolved cluster set
/// (invariant: computed once at the start), the lowered charts, and the
/// retry ledger for pipeline steps.
pub struct ChartExecutor<'a> {
    ctx: &'a Context,
    owner: BundleOwner,
    owner_ref: ObjectReference,
    env: Environment,
    security: bool,
    observability: bool,
    /// Namespace values references resolve in (the parent's namespace)
    source_namespace: String,
    charts: &'a [ChartSpec],
    nodes: &'a [DagNode],
    clusters: &'a [ResolvedCluster],
    /// Retry budget per node; `None` means unbounded (Stack charts)
    retry_budgets: Vec<Option<u32>>,
    /// Retries consumed per node name, seeded from prior status
    retry_counts: Mutex<BTreeMap<String, u32>>,
    /// Per-(chart, cluster) observations accumulated during the run
    observations: Mutex<Vec<DeploymentStatus>>,
    /// First-applied anchor per node, from the Bundle annotations
    first_applied: Mutex<BTreeMap<String, chrono::DateTime<Utc>>>,
}

impl<'a> ChartExecutor<'a> {
    /// Build an executor for one reconciliation.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        ctx: &'a Context,
        owner: BundleOwner,
        owner_ref: ObjectReference,
        env: Environment,
        security: bool,
        observability: bool,
        source_namespace: String,
        charts: &'a [ChartSpec],
        nodes: &'a [DagNode],
        clusters: &'a [ResolvedCluster],
        retry_budgets: Vec<Option<u32>>,
        prior_retries: BTreeMap<String, u32>,
    ) -> Self {
        Self {
            ctx,
            owner,
            owner_ref,
            env,
            security,
            observability,
            source_namespace,
            charts,
            nodes,
            clusters,
            retry_budgets,
            retry_counts: Mutex::new(prior_retries),
            observations: Mutex::new(Vec::new()),
            first_applied: Mutex::new(BTreeMap::new()),
        }
    }

    /// Drain the accumulated per-(chart, cluster) observations.
    #[must_use]
    pub fn take_observations(&self) -> Vec<DeploymentStatus> {
        std::mem::take(&mut *self.observations.lock().expect("observation lock poisoned"))
    }

    /// Retries consumed per node, for status reporting.
    #[must_use]
    pub fn retry_counts(&self) -> BTreeMap<String, u32> {
        self.retry_counts
            .lock()
            .expect("retry lock poisoned")
            .clone()
    }

    /// First-applied anchor per node, for execution-time reporting.
    #[must_use]
    pub fn first_applied(&self) -> BTreeMap<String, chrono::DateTime<Utc>> {
        self.first_applied
            .lock()
            .expect("first-applied lock poisoned")
            .clone()
    }

    fn record(&self, chart: &ChartSpec, cluster_id: &str, state: DeploymentState, message: Option<String>) {
        self.observations
            .lock()
            .expect("observation lock poisoned")
            .push(DeploymentStatus {
                chart_name: chart.name.clone(),
                cluster_id: cluster_id.to_string(),
                release_name: Some(chart.release_name.clone()),
                namespace: Some(chart.namespace.clone()),
                version: Some(chart.version.clone()),
                status: state,
                message,
                last_updated: Utc::now().to_rfc3339(),
            });
    }

    fn record_all(&self, chart: &ChartSpec, state: DeploymentState, message: &str) {
        for cluster in self.clusters {
            self.record(chart, &cluster.id, state, Some(message.to_string()));
        }
    }

    /// Handle a transient failure: consume a retry if this node has a
    /// budget, fail the node once the budget is spent.
    fn transient_outcome(&self, index: usize, detail: &str) -> NodeOutcome {
        let node = &self.nodes[index];
        let chart = &self.charts[index];

        let budget = self.retry_budgets.get(index).copied().flatten();
        let count = budget.map(|_| {
            let mut counts = self.retry_counts.lock().expect("retry lock poisoned");
            let count = counts.entry(node.name.clone()).or_insert(0);
            *count += 1;
            *count
        });

        let (state, message) = retry_outcome(budget, count, detail);
        self.record_all(chart, state, &message);
        NodeOutcome {
            state,
            message: Some(message),
        }
    }

    async fn warn_event(&self, reason: &str, note: String) {
        self.ctx
            .events
            .publish(
                &self.owner_ref,
                EventType::Warning,
                reason,
                actions::APPLY,
                Some(note),
            )
            .await;
    }
}

#[async_trait]
impl NodeExecutor for ChartExecutor<'_> {
    async fn execute(&self, index: usize) -> NodeOutcome {
        let chart = &self.charts[index];
        let node = &self.nodes[index];
        let partitions = partition_by_workspace(self.clusters);

        // Values merge, per cluster. A missing source or parse failure is
        // permanent for this chart; dependents become Blocked.
        let mut values_by_cluster: BTreeMap<String, RenderedValues> = BTreeMap::new();
        for cluster in self.clusters {
            match merge_chart_values(
                &self.ctx.client,
                chart.values.as_ref(),
                self.env,
                &cluster.id,
                &self.source_namespace,
            )
            .await
            {
                Ok(mut values) => {
                    inject_feature_toggles(&mut values, self.security, self.observability);
                    for warning in validate_values(&values) {
                        warn!(chart = %chart.name, cluster = %cluster.id, "Values warning: {warning}");
                    }
                    values_by_cluster.insert(cluster.id.clone(), values);
                }
                Err(err @ ValuesError::MissingSource { .. }) => {
                    let detail = err.to_string();
                    error!(chart = %chart.name, "Values merge failed: {detail}");
                    self.record_all(chart, DeploymentState::Failed, &detail);
                    self.warn_event(REASON_MISSING_VALUE_SOURCE, detail.clone()).await;
                    return NodeOutcome {
                        state: DeploymentState::Failed,
                        message: Some(detail),
                    };
                }
                Err(err @ ValuesError::ParseFailure { .. }) => {
                    let detail = err.to_string();
                    error!(chart = %chart.name, "Values merge failed: {detail}");
                    self.record_all(chart, DeploymentState::Failed, &detail);
                    self.warn_event(REASON_PARSE_FAILURE, detail.clone()).await;
                    return NodeOutcome {
                        state: DeploymentState::Failed,
                        message: Some(detail),
                    };
                }
                Err(ValuesError::Api(e)) => {
                    return self.transient_outcome(index, &format!("values fetch failed: {e}"));
                }
            }
        }

        // Apply one Bundle per workspace partition
        let applied = match apply_chart_bundles(
            self.ctx.bundles.as_ref(),
            &self.owner,
            chart,
            &partitions,
            &values_by_cluster,
        )
        .await
        {
            Ok(applied) => applied,
            Err(e) => {
                error!(chart = %chart.name, "Bundle apply failed: {e}");
                return self.transient_outcome(index, &format!("bundle apply failed: {e}"));
            }
        };

        // Observe readiness and enforce the timeout from first apply
        let observation =
            match observe_chart(self.ctx.bundles.as_ref(), &applied, &partitions).await {
                Ok(observation) => observation,
                Err(e) => {
                    return self.transient_outcome(index, &format!("bundle observe failed: {e}"));
                }
            };

        if let Some(anchor) = observation.first_applied {
            self.first_applied
                .lock()
                .expect("first-applied lock poisoned")
                .insert(node.name.clone(), anchor);
        }

        if observation.ready {
            for (cluster_id, state, message) in observation.per_cluster {
                self.record(chart, &cluster_id, state, message);
            }
            return NodeOutcome {
                state: DeploymentState::Deployed,
                message: Some("deployed on all target clusters".to_string()),
            };
        }

        if let Some(first_applied) = observation.first_applied {
            let elapsed = Utc::now().signed_duration_since(first_applied);
            if elapsed.to_std().unwrap_or_default() > node.timeout {
                let message = format!(
                    "did not become ready within {}s of first apply",
                    node.timeout.as_secs()
                );
                self.record_all(chart, DeploymentState::Failed, &message);
                self.warn_event(REASON_TIMEOUT_EXPIRED, format!("{}: {message}", chart.name))
                    .await;
                return NodeOutcome {
                    state: DeploymentState::Failed,
                    message: Some(message),
                };
            }
        }

        for (cluster_id, state, message) in observation.per_cluster {
            self.record(chart, &cluster_id, state, message);
        }

        NodeOutcome {
            state: DeploymentState::Deploying,
            message: Some("waiting for Fleet deployments to become ready".to_string()),
        }
    }
}

/// Classify a transient failure against the node's retry budget.
///
/// Without a budget (Stack charts) the node stays `Deploying` and the next
/// reconciliation retries indefinitely. With a budget (Pipeline steps) the
/// node fails once `count` exceeds it.
fn retry_outcome(
    budget: Option<u32>,
    count: Option<u32>,
    detail: &str,
) -> (DeploymentState, String) {
    match (budget, count) {
        (Some(budget), Some(count)) if count > budget => (
            DeploymentState::Failed,
            format!("retry budget exhausted ({budget}): {detail}"),
        ),
        (Some(budget), Some(count)) => (
            DeploymentState::Deploying,
            format!("transient failure, retry {count}/{budget}: {detail}"),
        ),
        _ => (DeploymentState::Deploying, detail.to_string()),
    }
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod executor_tests;
