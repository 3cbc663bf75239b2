// Copyright (c) 2025 SUSE LLC, herd
// SPDX-License-Identifier: MIT

//! Stack reconciliation.
//!
//! One reconciliation resolves the target clusters, runs the dependency
//! schedule over `spec.charts` (merging values and applying Fleet Bundles
//! per ready chart), reaps Bundles for removed charts, and aggregates the
//! observed deployment states back onto `status`.
//!
//! Validation failures, unresolvable targets, and dependency cycles are
//! permanent: the Stack goes `Failed` without any Bundle writes and the
//! reconciler does not retry until the spec changes.

use crate::context::Context;
use crate::crd::{
    ChartSpec, Condition, DeploymentPhase, DeploymentState, DeploymentStatus, Stack, StackStatus,
};
use crate::duration::timeout_or_default;
use crate::events::actions;
use crate::reconcilers::bundles::{delete_owned_bundles, reap_orphans, BundleOwner};
use crate::reconcilers::executor::ChartExecutor;
use crate::reconcilers::finalizers::{ensure_finalizer, handle_deletion, FinalizerCleanup};
use crate::reconcilers::resolver::{resolve_targets, ResolveError, ResolvedCluster};
use crate::reconcilers::scheduler::{
    aggregate_phase, run_schedule, DagNode, NodeOutcome, SchedulerError,
};
use crate::reconcilers::status::{create_condition, transition};
use crate::reconcilers::toggles::{
    ensure_observability_marker, ensure_security_marker, initial_observability_status,
    initial_security_status,
};
use crate::status_reasons::{
    CONDITION_TYPE_OBSERVABILITY_CONFIGURED, CONDITION_TYPE_READY, CONDITION_TYPE_SECURITY_SCANNED,
    REASON_CYCLE_DETECTED, REASON_DEPLOYMENT_FAILED, REASON_DEPLOYMENT_IN_PROGRESS,
    REASON_DEPLOYMENT_SUCCEEDED, REASON_EMPTY_SELECTOR, REASON_NO_TARGETS,
    REASON_OBSERVABILITY_REQUESTED, REASON_SCAN_REQUESTED, REASON_VALIDATION_FAILED,
};
use anyhow::Result;
use chrono::Utc;
use kube::api::{Patch, PatchParams};
use kube::runtime::events::EventType;
use kube::{Api, Resource, ResourceExt};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Build scheduler nodes from the chart list, preserving declared order.
#[must_use]
pub fn build_nodes(charts: &[ChartSpec]) -> Vec<DagNode> {
    charts
        .iter()
        .map(|chart| DagNode {
            name: chart.name.clone(),
            depends_on: chart.depends_on.clone(),
            wait: chart.wait,
            timeout: timeout_or_default(chart.timeout.as_deref()),
        })
        .collect()
}

#[async_trait::async_trait]
impl FinalizerCleanup for Stack {
    async fn cleanup(&self, ctx: &Context) -> Result<()> {
        let owner = BundleOwner::new(
            "Stack",
            &self.name_any(),
            &self.namespace().unwrap_or_default(),
        );
        let chart_names: Vec<String> = self.spec.charts.iter().map(|c| c.name.clone()).collect();
        delete_owned_bundles(ctx.bundles.as_ref(), &owner, &chart_names).await
    }
}

/// Reconcile a `Stack` resource.
///
/// # Errors
///
/// Returns an error only for transient conditions (API failures, cluster
/// inventory outages); the controller requeues with backoff. Permanent
/// failures are written to status and return `Ok`.
pub async fn reconcile_stack(ctx: Arc<Context>, stack: Stack) -> Result<()> {
    let namespace = stack.namespace().unwrap_or_default();
    let name = stack.name_any();

    info!("Reconciling Stack: {}/{}", namespace, name);

    // Deletion: reap owned Bundles, then drop the finalizer
    if stack.metadata.deletion_timestamp.is_some() {
        let mut status = stack.status.clone().unwrap_or_default();
        status.phase = DeploymentPhase::Deleting;
        status.message = Some("Tearing down Fleet Bundles".to_string());
        if let Err(e) = write_status(&ctx, &namespace, &name, &status).await {
            warn!("Failed to record Deleting phase for {namespace}/{name}: {e}");
        }
        return handle_deletion(&ctx, &stack).await;
    }

    ensure_finalizer(&ctx.client, &stack).await?;

    let owner = BundleOwner::new("Stack", &name, &namespace);
    let owner_ref = stack.object_ref(&());
    let prior = stack.status.clone().unwrap_or_default();

    // Admission-level validation: permanent, no Bundle writes
    if let Err(e) = stack.spec.validate() {
        return fail_stack(
            &ctx,
            &stack,
            &prior,
            REASON_VALIDATION_FAILED,
            &e.to_string(),
            vec![],
        )
        .await;
    }

    // Resolve the cluster set once; it is fixed for this reconciliation
    let clusters: Vec<ResolvedCluster> =
        match resolve_targets(ctx.inventory.as_ref(), &stack.spec.targets).await {
            Ok(clusters) => clusters,
            Err(ResolveError::NoTargets) => {
                return fail_stack(
                    &ctx,
                    &stack,
                    &prior,
                    REASON_NO_TARGETS,
                    "no valid target clusters resolved",
                    vec![],
                )
                .await;
            }
            Err(ResolveError::EmptySelector) => {
                return fail_stack(
                    &ctx,
                    &stack,
                    &prior,
                    REASON_EMPTY_SELECTOR,
                    "targets.selector has no matchLabels",
                    vec![],
                )
                .await;
            }
            Err(ResolveError::TransientClusterListFailure(msg)) => {
                anyhow::bail!("cluster inventory unavailable: {msg}");
            }
        };

    let target_ids: Vec<String> = clusters.iter().map(|c| c.id.clone()).collect();

    let nodes = build_nodes(&stack.spec.charts);
    let retry_budgets = vec![None; nodes.len()];

    let executor = ChartExecutor::new(
        &ctx,
        owner.clone(),
        owner_ref.clone(),
        stack.spec.env,
        stack.spec.security,
        stack.spec.observability,
        namespace.clone(),
        &stack.spec.charts,
        &nodes,
        &clusters,
        retry_budgets,
        BTreeMap::new(),
    );

    let outcomes = match run_schedule(&nodes, &executor, ctx.config.apply_concurrency).await {
        Ok(outcomes) => outcomes,
        Err(SchedulerError::CycleDetected(node)) => {
            return fail_stack(
                &ctx,
                &stack,
                &prior,
                REASON_CYCLE_DETECTED,
                &format!("dependency cycle detected involving '{node}'"),
                target_ids,
            )
            .await;
        }
    };

    // Bundles for charts removed from the spec are deleted
    let live: std::collections::BTreeSet<String> =
        stack.spec.charts.iter().map(|c| c.name.clone()).collect();
    let reaped = reap_orphans(ctx.bundles.as_ref(), &owner, &live).await?;
    if reaped > 0 {
        ctx.events
            .publish(
                &owner_ref,
                EventType::Normal,
                "BundlesReaped",
                actions::DELETE,
                Some(format!("removed {reaped} Bundles for charts no longer in spec")),
            )
            .await;
    }

    // Toggle side effects
    if stack.spec.security && ensure_security_marker(&ctx.client, &owner).await? {
        ctx.events
            .publish(
                &owner_ref,
                EventType::Normal,
                REASON_SCAN_REQUESTED,
                actions::SCAN,
                Some("security scan marker created".to_string()),
            )
            .await;
    }
    if stack.spec.observability && ensure_observability_marker(&ctx.client, &owner).await? {
        ctx.events
            .publish(
                &owner_ref,
                EventType::Normal,
                REASON_OBSERVABILITY_REQUESTED,
                actions::CONFIGURE,
                Some("observability marker created".to_string()),
            )
            .await;
    }

    // Aggregate status
    let phase = aggregate_phase(&outcomes);
    let deployments = collect_deployments(&executor, &outcomes, &stack.spec.charts, &clusters);
    let (reason, message) = summarize(&outcomes, phase);

    let conditions = build_conditions(
        &prior.conditions,
        phase,
        &reason,
        &message,
        stack.spec.security,
        stack.spec.observability,
    );

    let status = StackStatus {
        phase,
        message: Some(message.clone()),
        observed_generation: stack.metadata.generation,
        conditions,
        deployments,
        target_clusters: target_ids,
        last_reconcile_time: Some(Utc::now().to_rfc3339()),
        security: stack
            .spec
            .security
            .then(|| initial_security_status(prior.security.as_ref())),
        observability: stack
            .spec
            .observability
            .then(|| initial_observability_status(prior.observability.as_ref())),
    };

    write_status(&ctx, &namespace, &name, &status).await?;
    publish_phase_event(&ctx, &owner_ref, prior.phase, phase, &message).await;

    Ok(())
}

/// Per-(chart, cluster) observations: the executor's records for executed
/// charts, plus synthesized Pending/Blocked entries for the rest.
fn collect_deployments(
    executor: &ChartExecutor<'_>,
    outcomes: &BTreeMap<String, NodeOutcome>,
    charts: &[ChartSpec],
    clusters: &[ResolvedCluster],
) -> Vec<DeploymentStatus> {
    let mut deployments = executor.take_observations();
    let observed: std::collections::BTreeSet<String> =
        deployments.iter().map(|d| d.chart_name.clone()).collect();

    for chart in charts {
        if observed.contains(&chart.name) {
            continue;
        }
        let Some(outcome) = outcomes.get(&chart.name) else {
            continue;
        };
        for cluster in clusters {
            deployments.push(DeploymentStatus {
                chart_name: chart.name.clone(),
                cluster_id: cluster.id.clone(),
                release_name: Some(chart.release_name.clone()),
                namespace: Some(chart.namespace.clone()),
                version: Some(chart.version.clone()),
                status: outcome.state,
                message: outcome.message.clone(),
                last_updated: Utc::now().to_rfc3339(),
            });
        }
    }

    deployments
}

fn summarize(outcomes: &BTreeMap<String, NodeOutcome>, phase: DeploymentPhase) -> (String, String) {
    let total = outcomes.len();
    let deployed = outcomes
        .values()
        .filter(|o| o.state == DeploymentState::Deployed)
        .count();
    let failed = outcomes
        .values()
        .filter(|o| matches!(o.state, DeploymentState::Failed | DeploymentState::Blocked))
        .count();

    match phase {
        DeploymentPhase::Deployed => (
            REASON_DEPLOYMENT_SUCCEEDED.to_string(),
            format!("all {total} charts deployed"),
        ),
        DeploymentPhase::Failed => (
            REASON_DEPLOYMENT_FAILED.to_string(),
            format!("{failed}/{total} charts failed or blocked"),
        ),
        _ => (
            REASON_DEPLOYMENT_IN_PROGRESS.to_string(),
            format!("{deployed}/{total} charts deployed"),
        ),
    }
}

/// Build the condition set for this pass, preserving transition times for
/// conditions whose status did not flip.
pub(crate) fn build_conditions(
    prior: &[Condition],
    phase: DeploymentPhase,
    reason: &str,
    message: &str,
    security: bool,
    observability: bool,
) -> Vec<Condition> {
    let ready_status = if phase == DeploymentPhase::Deployed {
        "True"
    } else {
        "False"
    };

    let mut conditions = vec![transition(
        prior,
        create_condition(CONDITION_TYPE_READY, ready_status, reason, message),
    )];

    if security {
        conditions.push(transition(
            prior,
            create_condition(
                CONDITION_TYPE_SECURITY_SCANNED,
                "True",
                REASON_SCAN_REQUESTED,
                "security scan requested for deployed workloads",
            ),
        ));
    }

    if observability {
        conditions.push(transition(
            prior,
            create_condition(
                CONDITION_TYPE_OBSERVABILITY_CONFIGURED,
                "True",
                REASON_OBSERVABILITY_REQUESTED,
                "observability wiring requested for deployed workloads",
            ),
        ));
    }

    conditions
}

/// Mark the Stack permanently failed with the given reason. Writes status
/// and emits a warning event; returns `Ok` so the controller does not spin
/// on an unfixable spec.
async fn fail_stack(
    ctx: &Context,
    stack: &Stack,
    prior: &StackStatus,
    reason: &str,
    message: &str,
    target_clusters: Vec<String>,
) -> Result<()> {
    let namespace = stack.namespace().unwrap_or_default();
    let name = stack.name_any();

    warn!("Stack {namespace}/{name} failed: {reason}: {message}");

    let conditions = build_conditions(
        &prior.conditions,
        DeploymentPhase::Failed,
        reason,
        message,
        stack.spec.security,
        stack.spec.observability,
    );

    let status = StackStatus {
        phase: DeploymentPhase::Failed,
        message: Some(message.to_string()),
        observed_generation: stack.metadata.generation,
        conditions,
        deployments: prior.deployments.clone(),
        target_clusters,
        last_reconcile_time: Some(Utc::now().to_rfc3339()),
        security: prior.security.clone(),
        observability: prior.observability.clone(),
    };

    write_status(ctx, &namespace, &name, &status).await?;

    ctx.events
        .publish(
            &stack.object_ref(&()),
            EventType::Warning,
            reason,
            actions::RECONCILE,
            Some(message.to_string()),
        )
        .await;

    Ok(())
}

/// Patch the status subresource, retrying on write conflicts.
async fn write_status(
    ctx: &Context,
    namespace: &str,
    name: &str,
    status: &StackStatus,
) -> Result<()> {
    let api: Api<Stack> = Api::namespaced(ctx.client.clone(), namespace);
    let patch = json!({ "status": status });

    let mut attempt = 0;
    loop {
        attempt += 1;
        match api
            .patch_status(
                name,
                &PatchParams::apply("herd-controller"),
                &Patch::Merge(&patch),
            )
            .await
        {
            Ok(_) => {
                debug!("Updated Stack {namespace}/{name} status: {:?}", status.phase);
                return Ok(());
            }
            Err(kube::Error::Api(ae))
                if ae.code == 409 && attempt < crate::constants::STATUS_UPDATE_MAX_ATTEMPTS =>
            {
                debug!("Conflict writing Stack {namespace}/{name} status, retrying");
            }
            Err(e) => return Err(e.into()),
        }
    }
}

async fn publish_phase_event(
    ctx: &Context,
    owner_ref: &k8s_openapi::api::core::v1::ObjectReference,
    previous: DeploymentPhase,
    current: DeploymentPhase,
    message: &str,
) {
    if previous == current {
        return;
    }

    let (event_type, reason) = match current {
        DeploymentPhase::Deployed => (EventType::Normal, REASON_DEPLOYMENT_SUCCEEDED),
        DeploymentPhase::Failed => (EventType::Warning, REASON_DEPLOYMENT_FAILED),
        _ => (EventType::Normal, REASON_DEPLOYMENT_IN_PROGRESS),
    };

    ctx.events
        .publish(
            owner_ref,
            event_type,
            reason,
            actions::RECONCILE,
            Some(message.to_string()),
        )
        .await;
}

#[cfg(test)]
#[path = "stack_tests.rs"]
mod stack_tests;
