// Copyright (c) 2025 SUSE LLC, herd
// SPDX-License-Identifier: MIT

//! Pipeline reconciliation.
//!
//! A Pipeline is an ordered DAG of typed steps over the same targeting
//! model as a Stack. Each step is lowered to a chart before synthesis: the
//! step's `config` supplies Helm coordinates under reserved keys, the step
//! type supplies defaults for anything omitted, and every other config key
//! passes through as inline values. From there the scheduling, values
//! merge, Bundle synthesis, and reaping paths are shared with Stacks.
//!
//! Steps differ from charts in two ways: dependents always wait for the
//! step's deployments to be ready, and a `retries` budget bounds how many
//! transient failures a step absorbs before failing.

use crate::constants::{DEFAULT_STEP_CHART_REPO, DEFAULT_STEP_CHART_VERSION, DEFAULT_STEP_RETRIES};
use crate::context::Context;
use crate::crd::{
    ChartSpec, ChartValues, DeploymentPhase, DeploymentState, Pipeline, PipelineStatus, StepSpec,
    StepStatus,
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
use crate::reconcilers::stack::build_conditions;
use crate::reconcilers::toggles::{
    ensure_observability_marker, ensure_security_marker, initial_observability_status,
    initial_security_status,
};
use crate::status_reasons::{
    REASON_CYCLE_DETECTED, REASON_DEPLOYMENT_FAILED, REASON_DEPLOYMENT_IN_PROGRESS,
    REASON_DEPLOYMENT_SUCCEEDED, REASON_EMPTY_SELECTOR, REASON_NO_TARGETS,
    REASON_OBSERVABILITY_REQUESTED, REASON_SCAN_REQUESTED, REASON_VALIDATION_FAILED,
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use kube::api::{Patch, PatchParams};
use kube::runtime::events::EventType;
use kube::{Api, Resource, ResourceExt};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reserved config keys consumed during step lowering.
const RESERVED_CONFIG_KEYS: [&str; 6] =
    ["chart", "repo", "version", "namespace", "releaseName", "values"];

/// Lower a pipeline step to a chart specification.
///
/// The step name becomes the chart identity (Bundle naming, status keys,
/// `dependsOn` references). Helm coordinates come from the reserved config
/// keys with per-type defaults; unreserved keys pass through as inline
/// values, with an explicit `values` object merged on top.
#[must_use]
pub fn step_to_chart(step: &StepSpec) -> ChartSpec {
    let get_string = |key: &str| -> Option<String> {
        step.config
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    let chart = get_string("chart").unwrap_or_else(|| step.r#type.default_chart().to_string());
    let repo = get_string("repo").unwrap_or_else(|| DEFAULT_STEP_CHART_REPO.to_string());
    let version = get_string("version").unwrap_or_else(|| DEFAULT_STEP_CHART_VERSION.to_string());
    let namespace =
        get_string("namespace").unwrap_or_else(|| step.r#type.default_chart().to_string());
    let release_name = get_string("releaseName").unwrap_or_else(|| step.name.clone());

    // Pass-through config becomes inline values, with the explicit values
    // object taking precedence
    let mut inline: BTreeMap<String, Value> = step
        .config
        .iter()
        .filter(|(key, _)| !RESERVED_CONFIG_KEYS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    if let Some(Value::Object(values)) = step.config.get("values") {
        crate::reconcilers::values::deep_merge(
            &mut inline,
            values.clone().into_iter().collect(),
        );
    }

    ChartSpec {
        name: step.name.clone(),
        chart: Some(chart),
        repo,
        version,
        namespace,
        release_name,
        values: Some(ChartValues {
            inline: (!inline.is_empty()).then_some(inline),
            ..ChartValues::default()
        }),
        depends_on: step.depends_on.clone(),
        // Step dependencies mean completion, not mere application
        wait: true,
        timeout: step.timeout.clone(),
        create_namespace: true,
    }
}

/// Build scheduler nodes from the step list, preserving declared order.
#[must_use]
pub fn build_step_nodes(steps: &[StepSpec]) -> Vec<DagNode> {
    steps
        .iter()
        .map(|step| DagNode {
            name: step.name.clone(),
            depends_on: step.depends_on.clone(),
            wait: true,
            timeout: timeout_or_default(step.timeout.as_deref()),
        })
        .collect()
}

#[async_trait::async_trait]
impl FinalizerCleanup for Pipeline {
    async fn cleanup(&self, ctx: &Context) -> Result<()> {
        let owner = BundleOwner::new(
            "Pipeline",
            &self.name_any(),
            &self.namespace().unwrap_or_default(),
        );
        let step_names: Vec<String> = self.spec.steps.iter().map(|s| s.name.clone()).collect();
        delete_owned_bundles(ctx.bundles.as_ref(), &owner, &step_names).await
    }
}

/// Reconcile a `Pipeline` resource.
///
/// # Errors
///
/// Returns an error only for transient conditions (API failures, cluster
/// inventory outages); the controller requeues with backoff. Permanent
/// failures are written to status and return `Ok`.
pub async fn reconcile_pipeline(ctx: Arc<Context>, pipeline: Pipeline) -> Result<()> {
    let namespace = pipeline.namespace().unwrap_or_default();
    let name = pipeline.name_any();

    info!("Reconciling Pipeline: {}/{}", namespace, name);

    if pipeline.metadata.deletion_timestamp.is_some() {
        let mut status = pipeline.status.clone().unwrap_or_default();
        status.phase = DeploymentPhase::Deleting;
        status.message = Some("Tearing down Fleet Bundles".to_string());
        if let Err(e) = write_status(&ctx, &namespace, &name, &status).await {
            warn!("Failed to record Deleting phase for {namespace}/{name}: {e}");
        }
        return handle_deletion(&ctx, &pipeline).await;
    }

    ensure_finalizer(&ctx.client, &pipeline).await?;

    let owner = BundleOwner::new("Pipeline", &name, &namespace);
    let owner_ref = pipeline.object_ref(&());
    let prior = pipeline.status.clone().unwrap_or_default();

    if let Err(e) = pipeline.spec.validate() {
        return fail_pipeline(
            &ctx,
            &pipeline,
            &prior,
            REASON_VALIDATION_FAILED,
            &e.to_string(),
            vec![],
        )
        .await;
    }

    let clusters: Vec<ResolvedCluster> =
        match resolve_targets(ctx.inventory.as_ref(), &pipeline.spec.targets).await {
            Ok(clusters) => clusters,
            Err(ResolveError::NoTargets) => {
                return fail_pipeline(
                    &ctx,
                    &pipeline,
                    &prior,
                    REASON_NO_TARGETS,
                    "no valid target clusters resolved",
                    vec![],
                )
                .await;
            }
            Err(ResolveError::EmptySelector) => {
                return fail_pipeline(
                    &ctx,
                    &pipeline,
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

    // Lower steps to charts and seed retry state from the prior status
    let charts: Vec<ChartSpec> = pipeline.spec.steps.iter().map(step_to_chart).collect();
    let nodes = build_step_nodes(&pipeline.spec.steps);
    let retry_budgets: Vec<Option<u32>> = pipeline
        .spec
        .steps
        .iter()
        .map(|s| Some(s.retries.unwrap_or(DEFAULT_STEP_RETRIES)))
        .collect();
    let prior_retries: BTreeMap<String, u32> = prior
        .step_status
        .iter()
        .map(|s| (s.step_name.clone(), s.retry_count))
        .collect();

    let executor = ChartExecutor::new(
        &ctx,
        owner.clone(),
        owner_ref.clone(),
        pipeline.spec.env,
        pipeline.spec.security,
        pipeline.spec.observability,
        namespace.clone(),
        &charts,
        &nodes,
        &clusters,
        retry_budgets,
        prior_retries,
    );

    let outcomes = match run_schedule(&nodes, &executor, ctx.config.apply_concurrency).await {
        Ok(outcomes) => outcomes,
        Err(SchedulerError::CycleDetected(node)) => {
            return fail_pipeline(
                &ctx,
                &pipeline,
                &prior,
                REASON_CYCLE_DETECTED,
                &format!("dependency cycle detected involving '{node}'"),
                target_ids,
            )
            .await;
        }
    };

    let live: std::collections::BTreeSet<String> =
        pipeline.spec.steps.iter().map(|s| s.name.clone()).collect();
    let reaped = reap_orphans(ctx.bundles.as_ref(), &owner, &live).await?;
    if reaped > 0 {
        ctx.events
            .publish(
                &owner_ref,
                EventType::Normal,
                "BundlesReaped",
                actions::DELETE,
                Some(format!("removed {reaped} Bundles for steps no longer in spec")),
            )
            .await;
    }

    if pipeline.spec.security && ensure_security_marker(&ctx.client, &owner).await? {
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
    if pipeline.spec.observability && ensure_observability_marker(&ctx.client, &owner).await? {
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

    let phase = aggregate_phase(&outcomes);
    let retry_counts = executor.retry_counts();
    let first_applied = executor.first_applied();
    let deployments = executor.take_observations();
    let step_status = build_step_status(
        &pipeline.spec.steps,
        &outcomes,
        &retry_counts,
        &first_applied,
    );
    let (reason, message) = summarize_steps(&outcomes, phase);

    let conditions = build_conditions(
        &prior.conditions,
        phase,
        &reason,
        &message,
        pipeline.spec.security,
        pipeline.spec.observability,
    );

    let status = PipelineStatus {
        phase,
        message: Some(message.clone()),
        observed_generation: pipeline.metadata.generation,
        conditions,
        step_status,
        deployments,
        target_clusters: target_ids,
        last_reconcile_time: Some(Utc::now().to_rfc3339()),
        security: pipeline
            .spec
            .security
            .then(|| initial_security_status(prior.security.as_ref())),
        observability: pipeline
            .spec
            .observability
            .then(|| initial_observability_status(prior.observability.as_ref())),
    };

    write_status(&ctx, &namespace, &name, &status).await?;
    publish_phase_event(&ctx, &owner_ref, prior.phase, phase, &message).await;

    Ok(())
}

fn build_step_status(
    steps: &[StepSpec],
    outcomes: &BTreeMap<String, NodeOutcome>,
    retry_counts: &BTreeMap<String, u32>,
    first_applied: &BTreeMap<String, DateTime<Utc>>,
) -> Vec<StepStatus> {
    steps
        .iter()
        .map(|step| {
            let outcome = outcomes.get(&step.name);
            let state = outcome.map_or(DeploymentState::Pending, |o| o.state);

            // Wall-clock from first apply, reported once the step is terminal
            let execution_time = state
                .is_terminal()
                .then(|| first_applied.get(&step.name))
                .flatten()
                .map(|anchor| {
                    let secs = Utc::now()
                        .signed_duration_since(*anchor)
                        .num_seconds()
                        .max(0);
                    format!("{secs}s")
                });

            StepStatus {
                step_name: step.name.clone(),
                step_type: step.r#type,
                status: state,
                message: outcome.and_then(|o| o.message.clone()),
                last_updated: Utc::now().to_rfc3339(),
                retry_count: retry_counts.get(&step.name).copied().unwrap_or(0),
                execution_time,
            }
        })
        .collect()
}

fn summarize_steps(
    outcomes: &BTreeMap<String, NodeOutcome>,
    phase: DeploymentPhase,
) -> (String, String) {
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
            format!("all {total} steps completed"),
        ),
        DeploymentPhase::Failed => (
            REASON_DEPLOYMENT_FAILED.to_string(),
            format!("{failed}/{total} steps failed or blocked"),
        ),
        _ => (
            REASON_DEPLOYMENT_IN_PROGRESS.to_string(),
            format!("{deployed}/{total} steps completed"),
        ),
    }
}

/// Mark the Pipeline permanently failed. Writes status and emits a warning
/// event; returns `Ok` so the controller does not spin on an unfixable spec.
async fn fail_pipeline(
    ctx: &Context,
    pipeline: &Pipeline,
    prior: &PipelineStatus,
    reason: &str,
    message: &str,
    target_clusters: Vec<String>,
) -> Result<()> {
    let namespace = pipeline.namespace().unwrap_or_default();
    let name = pipeline.name_any();

    warn!("Pipeline {namespace}/{name} failed: {reason}: {message}");

    let conditions = build_conditions(
        &prior.conditions,
        DeploymentPhase::Failed,
        reason,
        message,
        pipeline.spec.security,
        pipeline.spec.observability,
    );

    let status = PipelineStatus {
        phase: DeploymentPhase::Failed,
        message: Some(message.to_string()),
        observed_generation: pipeline.metadata.generation,
        conditions,
        step_status: prior.step_status.clone(),
        deployments: prior.deployments.clone(),
        target_clusters,
        last_reconcile_time: Some(Utc::now().to_rfc3339()),
        security: prior.security.clone(),
        observability: prior.observability.clone(),
    };

    write_status(ctx, &namespace, &name, &status).await?;

    ctx.events
        .publish(
            &pipeline.object_ref(&()),
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
    status: &PipelineStatus,
) -> Result<()> {
    let api: Api<Pipeline> = Api::namespaced(ctx.client.clone(), namespace);
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
                debug!(
                    "Updated Pipeline {namespace}/{name} status: {:?}",
                    status.phase
                );
                return Ok(());
            }
            Err(kube::Error::Api(ae))
                if ae.code == 409 && attempt < crate::constants::STATUS_UPDATE_MAX_ATTEMPTS =>
            {
                debug!("Conflict writing Pipeline {namespace}/{name} status, retrying");
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
#[path = "pipeline_tests.rs"]
mod pipeline_tests;
