// Copyright (c) 2025 SUSE LLC, herd
// SPDX-License-Identifier: MIT

//! Custom Resource Definitions (CRDs) for AI/ML workload deployment.
//!
//! This module defines the Kubernetes Custom Resource Definitions used by Herd
//! to deploy Helm-chart based workloads across Rancher-managed clusters.
//!
//! # Resource Types
//!
//! - [`Stack`] - A declarative bundle of Helm charts deployed across a set of clusters
//! - [`Pipeline`] - A declarative DAG of typed steps (ingestion, vector-db, llm, service)
//!
//! # Example: Creating a Stack
//!
//! ```rust,no_run
//! use herd::crd::{ChartSpec, Environment, StackSpec, TargetSpec};
//!
//! let spec = StackSpec {
//!     env: Environment::Prod,
//!     security: false,
//!     observability: false,
//!     targets: TargetSpec {
//!         cluster_ids: Some(vec!["c-m-abc123".to_string()]),
//!         selector: None,
//!     },
//!     charts: vec![ChartSpec {
//!         name: "qdrant".to_string(),
//!         chart: None,
//!         repo: "https://qdrant.github.io/qdrant-helm".to_string(),
//!         version: "0.9.1".to_string(),
//!         namespace: "vector-db".to_string(),
//!         release_name: "qdrant".to_string(),
//!         values: None,
//!         depends_on: vec![],
//!         wait: true,
//!         timeout: None,
//!         create_namespace: true,
//!     }],
//! };
//! ```

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Deployment environment for a Stack or Pipeline.
///
/// Selects the implicit environment-overlay ConfigMap (`herd-env-{env}`)
/// consulted during the values merge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Development environment
    Dev,
    /// Staging environment
    Staging,
    /// Production environment
    Prod,
}

impl Environment {
    /// The environment label as it appears in overlay ConfigMap names.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Staging => "staging",
            Environment::Prod => "prod",
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CRD schema for a feature toggle: accepts a boolean or the legacy
/// strings `"enabled"` / `"disabled"`, so older manifests keep admitting.
fn toggle_schema(_gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
    serde_json::from_value(serde_json::json!({
        "anyOf": [
            { "type": "boolean" },
            { "type": "string" }
        ]
    }))
    .expect("static toggle schema is valid")
}

/// Deserialize a feature toggle that may arrive as a boolean or as the
/// legacy strings `"enabled"` / `"disabled"`.
///
/// Both forms normalize to `bool` at admission time; everything downstream
/// of the CRD layer only sees booleans.
fn de_feature_toggle<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Toggle {
        Bool(bool),
        Str(String),
    }

    match Toggle::deserialize(deserializer)? {
        Toggle::Bool(b) => Ok(b),
        Toggle::Str(s) => match s.to_lowercase().as_str() {
            "enabled" | "true" => Ok(true),
            "disabled" | "false" | "" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "invalid toggle value '{other}', expected boolean or enabled/disabled"
            ))),
        },
    }
}

/// Selector for targeting clusters based on labels.
///
/// A cluster matches when its labels are a superset of `matchLabels`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TargetSelector {
    /// Labels a cluster must carry to be selected. All entries must match.
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}

/// Target cluster specification.
///
/// Exactly one of `clusterIds` or `selector` must be set; supplying both or
/// neither is a validation failure.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TargetSpec {
    /// Explicit list of downstream cluster ids.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_ids: Option<Vec<String>>,

    /// Label selector matched against cluster labels known to Rancher.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<TargetSelector>,
}

/// Reference to a ConfigMap or Secret key containing a YAML values payload.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValuesSourceRef {
    /// Name of the referenced object.
    pub name: String,

    /// Namespace of the referenced object. Defaults to the parent resource's namespace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Data key holding the payload.
    #[serde(default = "default_values_key")]
    pub key: String,
}

fn default_values_key() -> String {
    "values.yaml".to_string()
}

/// Values configuration for a Helm chart.
///
/// Sources are merged lowest to highest precedence: `configMapRefs`, the
/// environment overlay, `perClusterConfigMapRef`, `secretRefs`, `inline`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChartValues {
    /// Base values loaded from ConfigMaps, in declared order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config_map_refs: Vec<ValuesSourceRef>,

    /// Sensitive values loaded from Secrets, in declared order.
    /// Secret payloads never appear in logs, events, or status.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secret_refs: Vec<ValuesSourceRef>,

    /// ConfigMap with per-cluster overrides; keys are `{clusterId}.yaml`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_cluster_config_map_ref: Option<ValuesSourceRef>,

    /// Inline values. Highest precedence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline: Option<BTreeMap<String, serde_json::Value>>,
}

/// Helm chart specification within a Stack.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChartSpec {
    /// Name of the chart, unique within the Stack.
    pub name: String,

    /// Helm chart name within the repository. Defaults to `name`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chart: Option<String>,

    /// Helm repository URL.
    pub repo: String,

    /// Chart version.
    pub version: String,

    /// Target Kubernetes namespace on the downstream clusters.
    pub namespace: String,

    /// Helm release name.
    pub release_name: String,

    /// Values configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<ChartValues>,

    /// Charts that must reach a terminal state before this one is applied.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    /// Whether dependents wait for this chart's deployments to report Ready.
    #[serde(default = "default_true")]
    pub wait: bool,

    /// Deployment timeout measured from first apply (e.g. `"10m"`, `"600s"`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    /// Create the target namespace if it does not exist.
    #[serde(default = "default_true")]
    pub create_namespace: bool,
}

fn default_true() -> bool {
    true
}

/// `Stack` declares a set of Helm charts to deploy across target clusters.
///
/// The controller resolves target clusters, merges values per chart and
/// cluster, and synthesizes one Fleet Bundle per chart per Fleet workspace.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "herd.suse.com",
    version = "v1",
    kind = "Stack",
    namespaced,
    status = "StackStatus",
    shortname = "stk"
)]
#[serde(rename_all = "camelCase")]
pub struct StackSpec {
    /// Deployment environment. Selects the `herd-env-{env}` values overlay.
    pub env: Environment,

    /// Enable security scanning for deployed workloads.
    #[serde(default, deserialize_with = "de_feature_toggle")]
    #[schemars(schema_with = "toggle_schema")]
    pub security: bool,

    /// Enable observability wiring for deployed workloads.
    #[serde(default, deserialize_with = "de_feature_toggle")]
    #[schemars(schema_with = "toggle_schema")]
    pub observability: bool,

    /// Target cluster specification.
    pub targets: TargetSpec,

    /// Charts to deploy, in declared order.
    pub charts: Vec<ChartSpec>,
}

/// Type of a pipeline step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum StepType {
    /// Data ingestion components (connectors, brokers)
    Ingestion,
    /// Vector database components
    VectorDb,
    /// LLM serving infrastructure
    Llm,
    /// Application services and gateways
    Service,
}

impl StepType {
    /// The step type as it appears in the CRD and in status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StepType::Ingestion => "ingestion",
            StepType::VectorDb => "vector-db",
            StepType::Llm => "llm",
            StepType::Service => "service",
        }
    }

    /// Default chart (and namespace) name for steps of this type.
    #[must_use]
    pub fn default_chart(self) -> &'static str {
        match self {
            StepType::Ingestion => "herd-ingestion",
            StepType::VectorDb => "herd-vector-db",
            StepType::Llm => "herd-llm",
            StepType::Service => "herd-service",
        }
    }
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline step specification.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StepSpec {
    /// Name of the step, unique within the Pipeline.
    pub name: String,

    /// Step type.
    pub r#type: StepType,

    /// Type-specific configuration. Reserved keys (`chart`, `repo`, `version`,
    /// `namespace`, `releaseName`, `values`) override the Helm coordinates;
    /// everything else is passed through as inline values.
    #[serde(default)]
    pub config: BTreeMap<String, serde_json::Value>,

    /// Steps that must complete before this one runs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    /// Execution timeout measured from first apply (e.g. `"10m"`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    /// Retry budget for transient failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(range(min = 0, max = 10))]
    pub retries: Option<u32>,
}

/// `Pipeline` declares an ordered DAG of typed steps over the Stack targeting model.
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "herd.suse.com",
    version = "v1",
    kind = "Pipeline",
    namespaced,
    status = "PipelineStatus",
    shortname = "ppl"
)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSpec {
    /// Deployment environment. Selects the `herd-env-{env}` values overlay.
    pub env: Environment,

    /// Enable security scanning for pipeline components.
    #[serde(default, deserialize_with = "de_feature_toggle")]
    #[schemars(schema_with = "toggle_schema")]
    pub security: bool,

    /// Enable observability wiring for the pipeline.
    #[serde(default, deserialize_with = "de_feature_toggle")]
    #[schemars(schema_with = "toggle_schema")]
    pub observability: bool,

    /// Target cluster specification.
    pub targets: TargetSpec,

    /// Steps to execute, in declared order.
    pub steps: Vec<StepSpec>,
}

// ============================================================================
// Status types
// ============================================================================

/// Overall phase of a Stack or Pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum DeploymentPhase {
    /// Resource observed, reconciliation not yet progressed
    #[default]
    Pending,
    /// Bundles applied, deployments in flight
    Deploying,
    /// All deployments reached Ready
    Deployed,
    /// One or more deployments failed or were blocked
    Failed,
    /// Finalizer-driven teardown in progress
    Deleting,
}

/// State of one chart or step deployment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum DeploymentState {
    /// Waiting on dependencies
    #[default]
    Pending,
    /// Bundle applied, not yet ready everywhere
    Deploying,
    /// Ready on all target clusters
    Deployed,
    /// Permanently failed
    Failed,
    /// Not attempted because a dependency failed
    Blocked,
}

impl DeploymentState {
    /// Whether this state is terminal for scheduling purposes.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DeploymentState::Deployed | DeploymentState::Failed | DeploymentState::Blocked
        )
    }
}

/// Condition represents an observation of a resource's current state.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition: Ready, SecurityScanned, ObservabilityConfigured.
    pub r#type: String,

    /// Status of the condition: True, False, or Unknown.
    pub status: String,

    /// Brief CamelCase reason for the condition's last transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message indicating details about the transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Last time the condition transitioned from one status to another (RFC3339).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

/// Status of one (chart, cluster) deployment.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStatus {
    /// Chart (or lowered step) name.
    pub chart_name: String,

    /// Target cluster id.
    pub cluster_id: String,

    /// Helm release name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_name: Option<String>,

    /// Target namespace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Chart version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Deployment state.
    pub status: DeploymentState,

    /// Most recent human-readable detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// RFC3339 timestamp of the last observation.
    pub last_updated: String,
}

/// Status of one pipeline step execution.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StepStatus {
    /// Step name.
    pub step_name: String,

    /// Step type.
    pub step_type: StepType,

    /// Execution state.
    pub status: DeploymentState,

    /// Most recent human-readable detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// RFC3339 timestamp of the last observation.
    pub last_updated: String,

    /// Retries consumed on transient failures.
    #[serde(default)]
    pub retry_count: u32,

    /// Wall-clock duration between first apply and terminal state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<String>,
}

/// Security scan summary, populated when `spec.security` is enabled.
///
/// Fields are sourced from the external scan service.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecurityStatus {
    /// Scan progress reported by the scanner
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_status: Option<String>,
    /// Total vulnerabilities found
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vulnerabilities: Option<i64>,
    /// Critical findings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub critical_issues: Option<i64>,
}

/// Observability summary, populated when `spec.observability` is enabled.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObservabilityStatus {
    /// Whether metrics collection is active
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_collected: Option<bool>,
    /// Whether dashboards have been provisioned
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dashboards_available: Option<bool>,
    /// Whether alerting rules have been configured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alerts_configured: Option<bool>,
}

/// Status subresource of a `Stack`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StackStatus {
    /// Overall phase.
    #[serde(default)]
    pub phase: DeploymentPhase,

    /// Most recent human-readable summary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Generation last acted upon.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Structured condition history.
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Per-(chart, cluster) deployment observations.
    #[serde(default)]
    pub deployments: Vec<DeploymentStatus>,

    /// Sorted resolved cluster ids from the last reconciliation.
    #[serde(default)]
    pub target_clusters: Vec<String>,

    /// RFC3339 timestamp of the last reconciliation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_reconcile_time: Option<String>,

    /// Security scan summary; present only when `spec.security` is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security: Option<SecurityStatus>,

    /// Observability summary; present only when `spec.observability` is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observability: Option<ObservabilityStatus>,
}

/// Status subresource of a `Pipeline`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStatus {
    /// Overall phase.
    #[serde(default)]
    pub phase: DeploymentPhase,

    /// Most recent human-readable summary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Generation last acted upon.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Structured condition history.
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Per-step execution status.
    #[serde(default)]
    pub step_status: Vec<StepStatus>,

    /// Per-(step, cluster) deployment observations.
    #[serde(default)]
    pub deployments: Vec<DeploymentStatus>,

    /// Sorted resolved cluster ids from the last reconciliation.
    #[serde(default)]
    pub target_clusters: Vec<String>,

    /// RFC3339 timestamp of the last reconciliation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_reconcile_time: Option<String>,

    /// Security scan summary; present only when `spec.security` is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security: Option<SecurityStatus>,

    /// Observability summary; present only when `spec.observability` is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observability: Option<ObservabilityStatus>,
}

// ============================================================================
// Validation
// ============================================================================

/// Admission-level validation failures.
///
/// These are permanent: the reconciler sets phase `Failed` and writes no
/// Bundles.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A Stack must declare at least one chart
    #[error("spec.charts must not be empty")]
    EmptyCharts,

    /// A Pipeline must declare at least one step
    #[error("spec.steps must not be empty")]
    EmptySteps,

    /// Exactly one targeting form must be used
    #[error("spec.targets must set exactly one of clusterIds or selector, both are set")]
    AmbiguousTargets,

    /// Exactly one targeting form must be used
    #[error("spec.targets must set one of clusterIds or selector")]
    MissingTargets,

    /// Chart or step names must be unique within the resource
    #[error("duplicate name '{0}' in spec")]
    DuplicateName(String),
}

fn validate_targets(targets: &TargetSpec) -> Result<(), ValidationError> {
    match (&targets.cluster_ids, &targets.selector) {
        (Some(_), Some(_)) => Err(ValidationError::AmbiguousTargets),
        (None, None) => Err(ValidationError::MissingTargets),
        // An explicitly empty clusterIds list is equivalent to unset
        (Some(ids), None) if ids.is_empty() => Err(ValidationError::MissingTargets),
        _ => Ok(()),
    }
}

fn validate_unique_names<'a>(
    names: impl Iterator<Item = &'a str>,
) -> Result<(), ValidationError> {
    let mut seen = std::collections::BTreeSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(ValidationError::DuplicateName(name.to_string()));
        }
    }
    Ok(())
}

impl StackSpec {
    /// Validate invariants the CRD schema cannot express.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] for empty charts, ambiguous or missing
    /// targets, or duplicate chart names.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.charts.is_empty() {
            return Err(ValidationError::EmptyCharts);
        }
        validate_targets(&self.targets)?;
        validate_unique_names(self.charts.iter().map(|c| c.name.as_str()))
    }
}

impl PipelineSpec {
    /// Validate invariants the CRD schema cannot express.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] for empty steps, ambiguous or missing
    /// targets, or duplicate step names.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.steps.is_empty() {
            return Err(ValidationError::EmptySteps);
        }
        validate_targets(&self.targets)?;
        validate_unique_names(self.steps.iter().map(|s| s.name.as_str()))
    }
}

#[cfg(test)]
#[path = "crd_tests.rs"]
mod crd_tests;
